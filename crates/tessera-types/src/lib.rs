//! # tessera-types: topology entities for `Tessera`
//!
//! Leaf data types shared by the cluster controller and its collaborators:
//! - Identifiers ([`Identifier`])
//! - Entity kinds and the common entity contract ([`EntityKind`], [`TopologyEntity`])
//! - Machines ([`Machine`], [`MachineInfo`], [`Endpoint`])
//! - Datacenters ([`Datacenter`])
//! - Namespaces and shard sets ([`Namespace`], [`ShardSet`], [`KeyedShards`], [`RangeShards`])
//! - Value conflicts ([`ValueConflict`], [`ConflictKey`])
//! - Cluster snapshots as served by the admin interface ([`ClusterSnapshot`])
//! - Cross-controller references ([`ClusterToken`], [`EntityHandle`], [`Reference`])

mod conflict;
mod datacenter;
mod entity;
mod error;
mod identifier;
mod machine;
mod namespace;
mod reference;
mod shard;
mod snapshot;
mod wire;

pub use conflict::{ConflictKey, ValueConflict};
pub use datacenter::Datacenter;
pub use entity::{EntityKind, NamespaceKind, TopologyEntity};
pub use error::{ModelError, ShardError};
pub use identifier::Identifier;
pub use machine::{Endpoint, Machine, MachineInfo};
pub use namespace::{Blueprint, Namespace};
pub use reference::{ClusterToken, EntityHandle, Reference};
pub use shard::{KeyedShards, RangeShards, ShardSet, KEYED_ALPHABET};
pub use snapshot::ClusterSnapshot;
pub use wire::{CONFLICT_MARKER, WireObject, is_conflict_marker};

#[cfg(test)]
mod tests;
