use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::shard::kind_mismatch;
use crate::wire::{self, WireObject};
use crate::{EntityKind, Identifier, ModelError, NamespaceKind, ShardError, ShardSet, TopologyEntity};

/// Replica role assignment computed by the cluster; carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    #[serde(default)]
    pub peers_roles: Value,
}

/// A sharded, replicated logical table.
#[derive(Debug, Clone, PartialEq)]
pub struct Namespace {
    id: Identifier,
    pub name: String,
    pub port: u16,
    pub primary: Option<Identifier>,
    /// Desired replica count per datacenter.
    pub affinities: BTreeMap<Identifier, u32>,
    shards: ShardSet,
    pub primary_pinnings: Value,
    pub secondary_pinnings: Value,
    pub blueprint: Blueprint,
}

impl Namespace {
    /// A namespace holding a single shard that covers the whole key space.
    pub fn new(id: Identifier, kind: NamespaceKind, name: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            name: name.into(),
            port,
            primary: None,
            affinities: BTreeMap::new(),
            shards: ShardSet::whole(kind),
            primary_pinnings: Value::Object(Map::new()),
            secondary_pinnings: Value::Object(Map::new()),
            blueprint: Blueprint::default(),
        }
    }

    /// Decodes a namespace payload; conflict-marked fields take their defaults.
    pub fn from_wire(id: Identifier, kind: NamespaceKind, payload: &WireObject) -> Result<Self, ModelError> {
        let entity = kind.entity_kind();
        let mut namespace = Self::new(id, kind, String::new(), 0);
        for field in ["name", "port", "primary_uuid", "replica_affinities", "shards"] {
            if let Some(value) = wire::settled(payload, entity, field)? {
                namespace.apply_field(field, value)?;
            }
        }
        namespace.primary_pinnings = wire::opaque(payload, "primary_pinnings");
        namespace.secondary_pinnings = wire::opaque(payload, "secondary_pinnings");
        namespace.blueprint = Self::decode_blueprint(&wire::opaque(payload, "blueprint"))?;
        Ok(namespace)
    }

    fn decode_blueprint(value: &Value) -> Result<Blueprint, ModelError> {
        if value.is_null() {
            return Ok(Blueprint::default());
        }
        serde_json::from_value(value.clone()).map_err(|err| ModelError::InvalidField {
            field: "blueprint".to_string(),
            reason: err.to_string(),
        })
    }

    pub fn kind(&self) -> NamespaceKind {
        self.shards.kind()
    }

    pub fn shards(&self) -> &ShardSet {
        &self.shards
    }

    /// Replaces the shard set; it must be of this namespace's kind.
    pub fn set_shards(&mut self, shards: ShardSet) -> Result<(), ShardError> {
        if shards.kind() != self.kind() {
            return Err(kind_mismatch(self.kind(), shards.kind()));
        }
        self.shards = shards;
        Ok(())
    }

    pub fn add_shard(&mut self, shard: &str) -> Result<(), ShardError> {
        self.shards.add_shard(shard)
    }

    pub fn remove_shard(&mut self, shard: &str) -> Result<(), ShardError> {
        self.shards.remove_shard(shard)
    }

    /// Primary plus every datacenter with an affinity.
    pub fn datacenters(&self) -> Vec<Identifier> {
        let mut ids: Vec<Identifier> = self.primary.into_iter().collect();
        ids.extend(self.affinities.keys().filter(|id| Some(**id) != self.primary));
        ids
    }
}

impl TopologyEntity for Namespace {
    fn id(&self) -> Identifier {
        self.id
    }

    fn owner_map_kind(&self) -> EntityKind {
        self.kind().entity_kind()
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "port": self.port,
            "primary_uuid": wire::encode_optional_id(self.primary),
            "replica_affinities": wire::encode_affinities(&self.affinities),
            "shards": self.shards.to_json(),
            "primary_pinnings": self.primary_pinnings,
            "secondary_pinnings": self.secondary_pinnings,
            "blueprint": self.blueprint,
        })
    }

    fn field_matches(&self, field: &str, remote: &Value) -> bool {
        match field {
            "name" => remote.as_str() == Some(self.name.as_str()),
            "port" => remote.as_u64() == Some(u64::from(self.port)),
            "primary_uuid" => wire::decode_optional_id(field, remote).is_ok_and(|id| id == self.primary),
            "replica_affinities" => wire::decode_affinities(field, remote).is_ok_and(|a| a == self.affinities),
            "shards" => ShardSet::parse(self.kind(), remote).is_ok_and(|shards| shards == self.shards),
            _ => true,
        }
    }

    fn apply_field(&mut self, field: &str, value: &Value) -> Result<(), ModelError> {
        match field {
            "name" => self.name = wire::decode_string(field, value)?,
            "port" => self.port = wire::decode_port(field, value)?,
            "primary_uuid" => self.primary = wire::decode_optional_id(field, value)?,
            "replica_affinities" => self.affinities = wire::decode_affinities(field, value)?,
            "shards" => self.shards = ShardSet::parse(self.kind(), value)?,
            "primary_pinnings" => self.primary_pinnings = value.clone(),
            "secondary_pinnings" => self.secondary_pinnings = value.clone(),
            "blueprint" => self.blueprint = Self::decode_blueprint(value)?,
            _ => {
                return Err(ModelError::UnknownField {
                    kind: self.owner_map_kind(),
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace(name: {}, port: {}, primary: ", self.name, self.port)?;
        match self.primary {
            Some(id) => write!(f, "{id}")?,
            None => f.write_str("none")?,
        }
        f.write_str(", affinities: {")?;
        for (i, (dc, count)) in self.affinities.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dc}: {count}")?;
        }
        write!(f, "}}, shards: [{}])", self.shards.to_strings().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CONFLICT_MARKER;

    fn payload(kind: NamespaceKind, dc: Identifier) -> Value {
        json!({
            "name": "ns",
            "port": 11211,
            "primary_uuid": dc.to_string(),
            "replica_affinities": { dc.to_string(): 2 },
            "shards": ShardSet::whole(kind).to_json(),
            "primary_pinnings": {},
            "secondary_pinnings": {},
            "blueprint": { "peers_roles": {} },
        })
    }

    #[test]
    fn test_from_wire_round_trips_json() {
        let dc = Identifier::random();
        let raw = payload(NamespaceKind::Range, dc);
        let ns = Namespace::from_wire(Identifier::random(), NamespaceKind::Range, raw.as_object().unwrap()).unwrap();

        assert_eq!(ns.kind(), NamespaceKind::Range);
        assert_eq!(ns.primary, Some(dc));
        assert_eq!(ns.affinities.get(&dc), Some(&2));
        assert_eq!(ns.to_json(), raw);
        assert_eq!(ns.datacenters(), vec![dc]);
    }

    #[test]
    fn test_conflicted_fields_default() {
        let dc = Identifier::random();
        let mut raw = payload(NamespaceKind::Keyed, dc);
        raw["name"] = json!(CONFLICT_MARKER);
        raw["shards"] = json!(CONFLICT_MARKER);
        let ns = Namespace::from_wire(Identifier::random(), NamespaceKind::Keyed, raw.as_object().unwrap()).unwrap();

        assert_eq!(ns.name, "");
        assert_eq!(ns.shards(), &ShardSet::whole(NamespaceKind::Keyed));
        assert_eq!(ns.port, 11211);
    }

    #[test]
    fn test_shards_compared_after_parsing() {
        let ns = Namespace::new(Identifier::random(), NamespaceKind::Keyed, "ns", 1);
        let reordered = json!(["{z, y, x, w, v, u, t, s, r, q, p, o, n, m, l, k, j, i, h, g, f, e, d, c, b, a}"]);
        assert!(ns.field_matches("shards", &reordered));
        assert!(!ns.field_matches("shards", &json!(["{a}"])));
        assert!(ns.field_matches("blueprint", &json!("anything")));
    }

    #[test]
    fn test_set_shards_checks_kind() {
        let mut ns = Namespace::new(Identifier::random(), NamespaceKind::Keyed, "ns", 1);
        assert!(ns.set_shards(ShardSet::whole(NamespaceKind::Range)).is_err());
        assert!(ns.add_shard("abc").is_ok());
        assert!(ns.apply_field("port", &json!("x")).is_err());
    }
}
