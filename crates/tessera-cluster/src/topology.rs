//! Topology mutations: datacenters, namespaces, placement, renames and shards.

use std::collections::BTreeMap;

use rand::seq::IteratorRandom;
use serde_json::{Value, json};
use tessera_admin::Method;
use tessera_types::{
    Datacenter, EntityHandle, EntityKind, Identifier, ModelError, Namespace, NamespaceKind, Reference,
    TopologyEntity, WireObject,
};
use tracing::info;

use crate::cluster::StagedEntity;
use crate::{Cluster, Error, Result};

/// Parameters of a new namespace; unset fields get random defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceSpec {
    pub name: Option<String>,
    pub port: Option<u16>,
    /// Primary datacenter; a random tracked one when unset.
    pub primary: Option<Reference>,
    pub affinities: Vec<(Reference, u32)>,
}

impl NamespaceSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn with_primary(mut self, datacenter: impl Into<Reference>) -> Self {
        self.primary = Some(datacenter.into());
        self
    }

    #[must_use]
    pub fn with_affinity(mut self, datacenter: impl Into<Reference>, replicas: u32) -> Self {
        self.affinities.push((datacenter.into(), replicas));
        self
    }
}

/// The single `{id: payload}` entry of a creation response.
fn single_entity(response: &Value) -> Result<(Identifier, &WireObject)> {
    let unexpected = || Error::UnexpectedResponse(format!("expected exactly one new entity, got {response}"));
    let object = response.as_object().filter(|object| object.len() == 1).ok_or_else(unexpected)?;
    let (id, payload) = object.iter().next().ok_or_else(unexpected)?;
    let payload = payload.as_object().ok_or_else(unexpected)?;
    Ok((Identifier::parse(id)?, payload))
}

impl Cluster {
    /// Creates a datacenter, named randomly when no name is given.
    pub fn add_datacenter(&mut self, name: Option<&str>) -> Result<EntityHandle> {
        let name = name.map_or_else(|| self.random_name(), str::to_string);
        let response = self.query(Method::Post, "/ajax/datacenters/new", Some(&json!({ "name": name })))?;
        let (id, payload) = single_entity(&response)?;
        let datacenter = Datacenter::from_wire(id, payload)?;
        self.datacenters.insert(id, datacenter);
        info!(%id, %name, "datacenter added");

        self.settle_and_verify()?;
        Ok(self.issue_handle(EntityKind::Datacenter, id))
    }

    pub fn add_namespace(&mut self, kind: NamespaceKind, spec: NamespaceSpec) -> Result<EntityHandle> {
        let primary = match spec.primary {
            Some(reference) => Some(self.find_datacenter(reference)?.id()),
            None => self.datacenters.keys().copied().choose(&mut self.rng),
        };
        let affinities = self.resolve_affinities(spec.affinities)?;
        let port = match spec.port {
            Some(port) => port,
            None => {
                let range = self.config().namespace_port_range;
                range.pick(&mut self.rng)
            }
        };
        let name = spec.name.unwrap_or_else(|| self.random_name());

        let entity = kind.entity_kind();
        let body = json!({
            "name": name,
            "port": port,
            "primary_uuid": primary.map(|id| id.to_string()),
            "replica_affinities": affinities
                .iter()
                .map(|(id, count)| (id.to_string(), json!(count)))
                .collect::<serde_json::Map<_, _>>(),
        });
        let response = self.query(Method::Post, &format!("/ajax/{}/new", entity.route_prefix()), Some(&body))?;
        let (id, payload) = single_entity(&response)?;
        let namespace = Namespace::from_wire(id, kind, payload)?;
        self.namespace_map_mut(kind).insert(id, namespace);
        info!(%id, %name, port, %entity, "namespace added");

        self.settle_and_verify()?;
        Ok(self.issue_handle(entity, id))
    }

    fn resolve_affinities(&self, affinities: Vec<(Reference, u32)>) -> Result<BTreeMap<Identifier, u32>> {
        affinities
            .into_iter()
            .map(|(datacenter, count)| Ok((self.find_datacenter(datacenter)?.id(), count)))
            .collect()
    }

    /// Sends a staged change and keeps it once the cluster accepted it.
    fn send_staged(&mut self, staged: StagedEntity, path: &str, body: &Value) -> Result<()> {
        self.query(Method::Post, path, Some(body))?;
        self.commit(staged);
        self.settle_and_verify()
    }

    fn staged_namespace(&self, namespace: impl Into<Reference>) -> Result<Namespace> {
        Ok(self.find_namespace(namespace)?.clone())
    }

    fn send_namespace(&mut self, namespace: Namespace) -> Result<()> {
        let path = format!("/ajax/{}/{}", namespace.route_prefix(), namespace.id());
        let body = namespace.to_json();
        info!(id = %namespace.id(), "namespace updated");
        self.send_staged(StagedEntity::Namespace(namespace), &path, &body)
    }

    pub fn move_server_to_datacenter(
        &mut self,
        machine: impl Into<Reference>,
        datacenter: impl Into<Reference>,
    ) -> Result<()> {
        let mut machine = self.find_machine(machine)?.clone();
        let datacenter = self.find_datacenter(datacenter)?.id();
        let id = machine.id();
        if let Some(info) = machine.info_mut() {
            info.datacenter = Some(datacenter);
        }
        info!(%id, %datacenter, "moving machine");
        self.send_staged(
            StagedEntity::Machine(machine),
            &format!("/ajax/machines/{id}/datacenter_uuid"),
            &json!(datacenter.to_string()),
        )
    }

    /// Sets (or clears) the namespace's primary datacenter.
    pub fn move_namespace_to_datacenter(
        &mut self,
        namespace: impl Into<Reference>,
        datacenter: Option<Reference>,
    ) -> Result<()> {
        let mut namespace = self.staged_namespace(namespace)?;
        namespace.primary = match datacenter {
            Some(datacenter) => Some(self.find_datacenter(datacenter)?.id()),
            None => None,
        };
        self.send_namespace(namespace)
    }

    pub fn set_namespace_affinities<R: Into<Reference>>(
        &mut self,
        namespace: impl Into<Reference>,
        affinities: impl IntoIterator<Item = (R, u32)>,
    ) -> Result<()> {
        let mut namespace = self.staged_namespace(namespace)?;
        let affinities = affinities
            .into_iter()
            .map(|(datacenter, count)| (datacenter.into(), count))
            .collect();
        namespace.affinities = self.resolve_affinities(affinities)?;
        self.send_namespace(namespace)
    }

    /// Renames a machine, datacenter or namespace.
    ///
    /// Either namespace kind finds a namespace of any kind.
    pub fn rename(&mut self, kind: EntityKind, target: impl Into<Reference>, name: &str) -> Result<()> {
        let target = target.into();
        let (kind, id) = match kind {
            EntityKind::Machine => (kind, self.find_machine(target)?.id()),
            EntityKind::Datacenter => (kind, self.find_datacenter(target)?.id()),
            EntityKind::Namespace(_) => {
                let namespace = self.find_namespace(target)?;
                (namespace.kind().entity_kind(), namespace.id())
            }
        };
        let mut staged = self.stage(kind, id).ok_or(Error::InvalidServer(id))?;
        staged.apply_field("name", &json!(name)).map_err(|err| match err {
            ModelError::InvalidField { .. } if kind == EntityKind::Machine => Error::InvalidServer(id),
            other => Error::Model(other),
        })?;
        info!(%id, %kind, name, "renaming");
        self.send_staged(staged, &format!("/ajax/{}/{id}/name", kind.route_prefix()), &json!(name))
    }

    /// Splits a namespace's key space further.
    ///
    /// For keyed namespaces `shard` is a set of letters; for range
    /// namespaces it is a new split point.
    pub fn add_namespace_shard(&mut self, namespace: impl Into<Reference>, shard: &str) -> Result<()> {
        let mut namespace = self.staged_namespace(namespace)?;
        namespace.add_shard(shard).map_err(ModelError::from)?;
        self.send_shards(namespace)
    }

    pub fn remove_namespace_shard(&mut self, namespace: impl Into<Reference>, shard: &str) -> Result<()> {
        let mut namespace = self.staged_namespace(namespace)?;
        namespace.remove_shard(shard).map_err(ModelError::from)?;
        self.send_shards(namespace)
    }

    fn send_shards(&mut self, namespace: Namespace) -> Result<()> {
        let path = format!("/ajax/{}/{}/shards", namespace.route_prefix(), namespace.id());
        let body = namespace.shards().to_json();
        info!(id = %namespace.id(), shards = %body, "resharding namespace");
        self.send_staged(StagedEntity::Namespace(namespace), &path, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_entity() {
        let id = Identifier::random();
        let response = json!({ id.to_string(): {"name": "east"} });
        let (parsed, payload) = single_entity(&response).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(payload["name"], "east");
    }

    #[test]
    fn test_single_entity_rejects_other_shapes() {
        let two = json!({
            Identifier::random().to_string(): {},
            Identifier::random().to_string(): {},
        });
        assert!(matches!(single_entity(&two), Err(Error::UnexpectedResponse(_))));
        assert!(single_entity(&json!({})).is_err());
        assert!(single_entity(&json!([])).is_err());
        assert!(single_entity(&json!({"not-an-id": {}})).is_err());
    }

    #[test]
    fn test_namespace_spec_builder() {
        let spec = NamespaceSpec::named("ns").with_port(11_211).with_primary("east").with_affinity("west", 2);
        assert_eq!(spec.name.as_deref(), Some("ns"));
        assert_eq!(spec.port, Some(11_211));
        assert_eq!(spec.primary, Some(Reference::Name("east".to_string())));
        assert_eq!(spec.affinities, vec![(Reference::Name("west".to_string()), 2)]);
    }
}
