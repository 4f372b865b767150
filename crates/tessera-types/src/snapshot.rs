use std::collections::BTreeMap;

use serde_json::Value;

use crate::wire::WireObject;
use crate::{EntityKind, Identifier, ModelError};

/// A node's full view of the cluster as served by `GET /ajax`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterSnapshot {
    collections: BTreeMap<EntityKind, BTreeMap<Identifier, WireObject>>,
}

impl ClusterSnapshot {
    /// Removes the `me` field from a raw snapshot document and returns it.
    pub fn take_me(raw: &mut Value) -> Result<Identifier, ModelError> {
        let object = raw
            .as_object_mut()
            .ok_or_else(|| ModelError::MalformedSnapshot("snapshot is not an object".to_string()))?;
        let me = object
            .remove("me")
            .ok_or_else(|| ModelError::MalformedSnapshot("snapshot has no `me` field".to_string()))?;
        let me = me
            .as_str()
            .ok_or_else(|| ModelError::MalformedSnapshot(format!("`me` is not a string: {me}")))?;
        Identifier::parse(me)
    }

    /// Parses every entity collection of a snapshot document.
    pub fn from_json(raw: &Value) -> Result<Self, ModelError> {
        let object = raw
            .as_object()
            .ok_or_else(|| ModelError::MalformedSnapshot("snapshot is not an object".to_string()))?;
        let mut collections = BTreeMap::new();
        for kind in EntityKind::ALL {
            let prefix = kind.route_prefix();
            let entries = object
                .get(prefix)
                .and_then(Value::as_object)
                .ok_or_else(|| ModelError::MalformedSnapshot(format!("missing collection `{prefix}`")))?;
            let mut collection = BTreeMap::new();
            for (id, payload) in entries {
                let payload = payload.as_object().ok_or_else(|| {
                    ModelError::MalformedSnapshot(format!("{kind} {id} is not an object"))
                })?;
                collection.insert(Identifier::parse(id)?, payload.clone());
            }
            collections.insert(kind, collection);
        }
        Ok(Self { collections })
    }

    /// Entities of one kind, keyed by identifier.
    pub fn collection(&self, kind: EntityKind) -> impl Iterator<Item = (&Identifier, &WireObject)> {
        self.collections.get(&kind).into_iter().flatten()
    }

    pub fn entity(&self, kind: EntityKind, id: Identifier) -> Option<&WireObject> {
        self.collections.get(&kind)?.get(&id)
    }

    pub fn contains(&self, kind: EntityKind, id: Identifier) -> bool {
        self.entity(kind, id).is_some()
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.collections.get(&kind).map_or(0, BTreeMap::len)
    }

    pub fn ids(&self, kind: EntityKind) -> impl Iterator<Item = Identifier> + '_ {
        self.collection(kind).map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_take_me_and_parse() {
        let me = Identifier::random();
        let dc = Identifier::random();
        let mut raw = json!({
            "me": me.to_string(),
            "machines": { me.to_string(): {"name": "a", "datacenter_uuid": null, "port_offset": 0} },
            "datacenters": { dc.to_string(): {"name": "east"} },
            "dummy_namespaces": {},
            "memcached_namespaces": {},
        });

        assert_eq!(ClusterSnapshot::take_me(&mut raw).unwrap(), me);
        assert!(raw.get("me").is_none());

        let snapshot = ClusterSnapshot::from_json(&raw).unwrap();
        assert_eq!(snapshot.len(EntityKind::Machine), 1);
        assert!(snapshot.contains(EntityKind::Datacenter, dc));
        assert_eq!(snapshot.entity(EntityKind::Datacenter, dc).unwrap()["name"], "east");
        assert_eq!(snapshot.ids(EntityKind::Machine).collect::<Vec<_>>(), vec![me]);
    }

    #[test]
    fn test_rejects_missing_collection() {
        let raw = json!({"machines": {}, "datacenters": {}, "dummy_namespaces": {}});
        assert!(matches!(
            ClusterSnapshot::from_json(&raw),
            Err(ModelError::MalformedSnapshot(_))
        ));
        assert!(ClusterSnapshot::take_me(&mut json!({"machines": {}})).is_err());
    }

    #[test]
    fn test_rejects_bad_entity_id() {
        let raw = json!({
            "machines": {"not-an-id": {}},
            "datacenters": {},
            "dummy_namespaces": {},
            "memcached_namespaces": {},
        });
        assert!(matches!(
            ClusterSnapshot::from_json(&raw),
            Err(ModelError::InvalidIdentifier(_))
        ));
    }
}
