//! Shared fixtures: controllers wired to an in-memory simulated cluster.

#![allow(dead_code)]

use std::sync::Arc;

use tessera_cluster::{Cluster, ClusterConfig, ClusterIo, PortAllocator, SettleConfig};
use tessera_sim::SimCluster;
use tessera_types::{Endpoint, Identifier, Machine, TopologyEntity};

/// Base port of the fixture allocator; machine `n` listens on `BASE_PORT + n`.
pub const BASE_PORT: u16 = 30_000;

pub fn config() -> ClusterConfig {
    ClusterConfig {
        seed: Some(7),
        settle: SettleConfig::immediate(),
        join_settle_ms: 0,
        ..ClusterConfig::default()
    }
}

pub fn io(sim: &SimCluster) -> ClusterIo {
    ClusterIo::new(
        Arc::new(sim.clone()),
        Arc::new(sim.clone()),
        Arc::new(sim.clone()),
        Arc::new(PortAllocator::new(BASE_PORT)),
    )
}

/// A controller that started `machines` simulated nodes.
pub fn cluster(machines: usize) -> (SimCluster, Cluster) {
    let sim = SimCluster::new();
    let mut cluster = Cluster::new(config(), io(&sim)).unwrap();
    for _ in 0..machines {
        cluster.add_machine(None).unwrap();
    }
    (sim, cluster)
}

pub fn peer_port(n: u16) -> u16 {
    BASE_PORT + n
}

pub fn endpoint(n: u16) -> Endpoint {
    Endpoint::with_admin_offset("localhost", peer_port(n), config().admin_port_offset).unwrap()
}

pub fn known(cluster: &Cluster) -> Vec<Identifier> {
    cluster
        .machines()
        .filter(|machine| !machine.is_placeholder())
        .map(Machine::id)
        .collect()
}

pub fn placeholders(cluster: &Cluster) -> Vec<Identifier> {
    cluster
        .machines()
        .filter(|machine| machine.is_placeholder())
        .map(Machine::id)
        .collect()
}
