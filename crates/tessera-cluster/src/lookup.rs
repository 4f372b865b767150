//! Entity lookup and host selection.

use rand::seq::SliceRandom;
use tessera_types::{
    ClusterToken, Datacenter, EntityKind, Identifier, Machine, Namespace, NamespaceKind, Reference, TopologyEntity,
};

use crate::{Cluster, Error, Result};

/// Which machine serves a namespace in [`Cluster::namespace_host`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HostSelector {
    /// Any reachable known machine.
    #[default]
    Any,
    /// Any known machine in this datacenter.
    Datacenter(Reference),
    /// This machine.
    Machine(Reference),
}

/// Resolves a reference among `entities`.
///
/// Handles must come from `token` and name an accepted kind; names must
/// match exactly one entity.
fn find<'a, E: TopologyEntity + 'a>(
    token: ClusterToken,
    what: &'static str,
    accepts: impl Fn(EntityKind) -> bool,
    mut entities: impl Iterator<Item = &'a E>,
    reference: Reference,
) -> Result<&'a E> {
    let unknown = |reference: &Reference| Error::UnknownReference {
        what,
        reference: reference.to_string(),
    };
    match &reference {
        Reference::Handle(handle) => {
            if handle.token() != token {
                return Err(Error::ForeignEntity {
                    kind: handle.kind(),
                    id: handle.id(),
                });
            }
            if !accepts(handle.kind()) {
                return Err(unknown(&reference));
            }
            entities.find(|entity| entity.id() == handle.id()).ok_or_else(|| unknown(&reference))
        }
        Reference::Id(id) => entities.find(|entity| entity.id() == *id).ok_or_else(|| unknown(&reference)),
        Reference::Name(name) => {
            let hits: Vec<&E> = entities.filter(|entity| entity.name() == Some(name.as_str())).collect();
            match hits.as_slice() {
                [] => Err(unknown(&reference)),
                [entity] => Ok(*entity),
                _ => Err(Error::AmbiguousReference {
                    what,
                    name: name.clone(),
                    count: hits.len(),
                }),
            }
        }
    }
}

impl Cluster {
    pub fn find_machine(&self, machine: impl Into<Reference>) -> Result<&Machine> {
        find(
            self.token(),
            "machine",
            |kind| kind == EntityKind::Machine,
            self.machines.values(),
            machine.into(),
        )
    }

    pub fn find_datacenter(&self, datacenter: impl Into<Reference>) -> Result<&Datacenter> {
        find(
            self.token(),
            "datacenter",
            |kind| kind == EntityKind::Datacenter,
            self.datacenters.values(),
            datacenter.into(),
        )
    }

    /// Finds a namespace of either kind.
    pub fn find_namespace(&self, namespace: impl Into<Reference>) -> Result<&Namespace> {
        let all = NamespaceKind::ALL
            .into_iter()
            .flat_map(move |kind| self.namespace_map(kind).values());
        find(
            self.token(),
            "namespace",
            |kind| kind.namespace_kind().is_some(),
            all,
            namespace.into(),
        )
    }

    /// Port a machine serves a namespace on.
    pub fn compute_port(&self, namespace: impl Into<Reference>, machine: impl Into<Reference>) -> Result<u16> {
        let port = self.find_namespace(namespace)?.port;
        let machine = self.find_machine(machine)?;
        let offset = machine.port_offset().ok_or(Error::InvalidServer(machine.id()))?;
        port.checked_add(offset).ok_or(Error::PortOverflow { port, offset })
    }

    /// Host and port to reach a namespace through a selected machine.
    pub fn namespace_host(
        &mut self,
        namespace: impl Into<Reference>,
        selector: HostSelector,
    ) -> Result<(String, u16)> {
        let namespace = self.find_namespace(namespace)?.id();
        let machine = match selector {
            HostSelector::Any => {
                let candidates: Vec<Identifier> = self.reachable_machines().map(Machine::id).collect();
                *candidates.choose(&mut self.rng).ok_or(Error::NoReachableMachine)?
            }
            HostSelector::Datacenter(datacenter) => self.machine_in_datacenter(datacenter)?.id(),
            HostSelector::Machine(machine) => self.find_machine(machine)?.id(),
        };
        let port = self.compute_port(namespace, machine)?;
        let host = self
            .machines
            .get(&machine)
            .and_then(Machine::endpoint)
            .map(|endpoint| endpoint.host.clone())
            .ok_or(Error::InvalidServer(machine))?;
        Ok((host, port))
    }

    /// The namespace's primary datacenter, or any of its primary and
    /// affinity datacenters picked at random.
    pub fn datacenter_for_namespace(
        &mut self,
        namespace: impl Into<Reference>,
        primary_only: bool,
    ) -> Result<&Datacenter> {
        let namespace = self.find_namespace(namespace)?;
        let unknown = Error::UnknownReference {
            what: "datacenter",
            reference: format!("of namespace {}", namespace.id()),
        };
        let candidates: Vec<Identifier> = if primary_only {
            namespace.primary.into_iter().collect()
        } else {
            namespace.datacenters()
        };
        let candidates: Vec<Identifier> = candidates
            .into_iter()
            .filter(|id| self.datacenters.contains_key(id))
            .collect();
        let id = *candidates.choose(&mut self.rng).ok_or(unknown)?;
        self.find_datacenter(id)
    }

    /// A known machine in the datacenter, picked at random.
    pub fn machine_in_datacenter(&mut self, datacenter: impl Into<Reference>) -> Result<&Machine> {
        let datacenter = self.find_datacenter(datacenter)?.id();
        let candidates: Vec<Identifier> = self
            .machines
            .values()
            .filter(|machine| machine.datacenter() == Some(datacenter))
            .map(Machine::id)
            .collect();
        let id = *candidates.choose(&mut self.rng).ok_or_else(|| Error::UnknownReference {
            what: "machine",
            reference: format!("in datacenter {datacenter}"),
        })?;
        self.find_machine(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::EntityHandle;

    fn datacenters(names: &[&str]) -> Vec<Datacenter> {
        names.iter().map(|name| Datacenter::new(Identifier::random(), *name)).collect()
    }

    fn lookup<'a>(token: ClusterToken, entities: &'a [Datacenter], reference: Reference) -> Result<&'a Datacenter> {
        find(token, "datacenter", |kind| kind == EntityKind::Datacenter, entities.iter(), reference)
    }

    #[test]
    fn test_find_by_name() {
        let token = ClusterToken::next();
        let all = datacenters(&["east", "west", "west"]);
        assert_eq!(lookup(token, &all, "east".into()).unwrap().name(), "east");
        assert!(matches!(
            lookup(token, &all, "west".into()),
            Err(Error::AmbiguousReference { count: 2, .. })
        ));
        assert!(matches!(
            lookup(token, &all, "north".into()),
            Err(Error::UnknownReference { what: "datacenter", .. })
        ));
    }

    #[test]
    fn test_find_by_id() {
        let token = ClusterToken::next();
        let all = datacenters(&["east"]);
        assert_eq!(lookup(token, &all, all[0].id().into()).unwrap(), &all[0]);
        assert!(lookup(token, &all, Identifier::random().into()).is_err());
    }

    #[test]
    fn test_find_by_handle() {
        let token = ClusterToken::next();
        let all = datacenters(&["east"]);
        let ours = EntityHandle::new(token, EntityKind::Datacenter, all[0].id());
        assert!(lookup(token, &all, ours.into()).is_ok());

        let foreign = EntityHandle::new(ClusterToken::next(), EntityKind::Datacenter, all[0].id());
        assert!(matches!(lookup(token, &all, foreign.into()), Err(Error::ForeignEntity { .. })));

        let wrong_kind = EntityHandle::new(token, NamespaceKind::Keyed.entity_kind(), all[0].id());
        assert!(matches!(lookup(token, &all, wrong_kind.into()), Err(Error::UnknownReference { .. })));
    }

    #[test]
    fn test_placeholders_have_no_name() {
        let token = ClusterToken::next();
        let machines = [Machine::placeholder(Identifier::random())];
        let result = find(token, "machine", |kind| kind == EntityKind::Machine, machines.iter(), "node".into());
        assert!(matches!(result, Err(Error::UnknownReference { .. })));
    }
}
