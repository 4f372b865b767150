//! # tessera-cluster: topology controller and partition simulator
//!
//! Drives the administrative topology of a clustered database under test.
//!
//! A [`Cluster`] owns a client-side mirror of the cluster's machines,
//! datacenters and namespaces. Every mutation goes to one live node and is
//! followed by the verification protocol: the full snapshot of every
//! reachable node must agree, unseen entities are pulled in, and fields that
//! disagree between partitions are recorded as value conflicts.
//!
//! A [`PartitionSimulator`] cuts a cluster into groups by blocking peer
//! paths, gives each group its own controller, and joins groups back.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │             PartitionSimulator             │
//! │  GroupId → (Cluster, blocked ports, links) │
//! └──────────────────────┬─────────────────────┘
//!                        │ split / join / add_machine
//! ┌──────────────────────┴─────────────────────┐
//! │                  Cluster                   │
//! │   mutate → settle → verify → pull → audit  │
//! └──────────────────────┬─────────────────────┘
//!                        │ ClusterIo
//!      AdminClient · NodeLauncher · PathBlocker · PortAllocator
//! ```
//!
//! Nothing here reads the environment: the controller is built from an
//! explicit [`ClusterConfig`] and a [`ClusterIo`] bundle, which tests fill
//! with the in-memory `tessera-sim` cluster.

mod cluster;
mod config;
mod conflict;
mod error;
mod io;
mod layout;
mod lookup;
mod partition;
mod settle;
mod topology;
mod transaction;
mod verify;

pub use cluster::Cluster;
pub use config::{ClusterConfig, PortRange, SettleConfig};
pub use conflict::ConflictRegistry;
pub use error::{Error, Result};
pub use io::{ClusterIo, NodePorts, PortAllocator};
pub use layout::{ClusterLayout, NamespaceLayout};
pub use lookup::HostSelector;
pub use partition::{GroupId, PartitionSimulator, Selector};
pub use topology::NamespaceSpec;
