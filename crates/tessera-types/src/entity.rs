use std::fmt::{self, Display};

use serde_json::Value;

use crate::{Identifier, ModelError};

/// The two namespace variants, distinguished by how they partition keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NamespaceKind {
    /// Keys partitioned by their leading character.
    Keyed,
    /// Keys partitioned by ordered split points.
    Range,
}

impl NamespaceKind {
    pub const ALL: [NamespaceKind; 2] = [NamespaceKind::Keyed, NamespaceKind::Range];

    pub fn entity_kind(self) -> EntityKind {
        EntityKind::Namespace(self)
    }
}

impl Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NamespaceKind::Keyed => "keyed",
            NamespaceKind::Range => "range",
        })
    }
}

/// Kind of a topology entity, which also decides the admin route it lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Machine,
    Datacenter,
    Namespace(NamespaceKind),
}

impl EntityKind {
    /// Every kind, in snapshot order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Machine,
        EntityKind::Datacenter,
        EntityKind::Namespace(NamespaceKind::Keyed),
        EntityKind::Namespace(NamespaceKind::Range),
    ];

    /// Path segment under `/ajax` and snapshot collection name.
    pub fn route_prefix(self) -> &'static str {
        match self {
            EntityKind::Machine => "machines",
            EntityKind::Datacenter => "datacenters",
            EntityKind::Namespace(NamespaceKind::Keyed) => "dummy_namespaces",
            EntityKind::Namespace(NamespaceKind::Range) => "memcached_namespaces",
        }
    }

    pub fn from_route_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.route_prefix() == prefix)
    }

    pub fn namespace_kind(self) -> Option<NamespaceKind> {
        match self {
            EntityKind::Namespace(kind) => Some(kind),
            EntityKind::Machine | EntityKind::Datacenter => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Machine => "machine",
            EntityKind::Datacenter => "datacenter",
            EntityKind::Namespace(NamespaceKind::Keyed) => "keyed namespace",
            EntityKind::Namespace(NamespaceKind::Range) => "range namespace",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Common contract of machines, datacenters and namespaces.
///
/// Field names are the wire names served by the admin interface.
pub trait TopologyEntity {
    fn id(&self) -> Identifier;

    /// Kind of the map that owns this entity.
    fn owner_map_kind(&self) -> EntityKind;

    fn route_prefix(&self) -> &'static str {
        self.owner_map_kind().route_prefix()
    }

    /// Display name, if the entity has one locally.
    fn name(&self) -> Option<&str>;

    /// Whether the entity's fields take part in verification.
    fn is_verifiable(&self) -> bool {
        true
    }

    /// Wire rendering of every field.
    fn to_json(&self) -> Value;

    /// Compares a remote field rendering against the local value.
    ///
    /// Fields the cluster is free to evolve always match.
    fn field_matches(&self, field: &str, remote: &Value) -> bool;

    /// Decodes `value` into the canonical representation of `field` and stores it.
    fn apply_field(&mut self, field: &str, value: &Value) -> Result<(), ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_prefix_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_route_prefix(kind.route_prefix()), Some(kind));
        }
        assert_eq!(EntityKind::from_route_prefix("me"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(NamespaceKind::Keyed.to_string(), "keyed");
        assert_eq!(NamespaceKind::Range.to_string(), "range");
        assert_eq!(NamespaceKind::Range.entity_kind().to_string(), "range namespace");
    }

    #[test]
    fn test_namespace_kind() {
        assert_eq!(EntityKind::Machine.namespace_kind(), None);
        assert_eq!(
            NamespaceKind::Range.entity_kind().namespace_kind(),
            Some(NamespaceKind::Range)
        );
    }
}
