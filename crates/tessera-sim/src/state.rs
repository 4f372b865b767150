//! Shared state of the simulated cluster.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde_json::{Value, json};
use tessera_types::{EntityKind, Identifier};
use tracing::debug;

use crate::metadata::{Metadata, VersionLog};

#[derive(Debug)]
pub(crate) struct SimNode {
    pub(crate) id: Identifier,
    pub(crate) local_peer_port: u16,
    /// Nodes only gossip with nodes of the same membership.
    pub(crate) membership: u64,
    pub(crate) running: bool,
    pub(crate) metadata: Metadata,
}

#[derive(Debug, Default)]
pub(crate) struct SimState {
    /// Nodes keyed by peer port.
    pub(crate) nodes: BTreeMap<u16, SimNode>,
    /// Blocked `(local peer port, peer port)` paths.
    pub(crate) blocked: BTreeSet<(u16, u16)>,
    pub(crate) versions: VersionLog,
    next_membership: u64,
    /// Successful path changes allowed before the next one fails.
    pub(crate) path_budget: Option<usize>,
    pub(crate) fail_next_start: bool,
    pub(crate) path_calls: usize,
}

impl SimState {
    pub(crate) fn new_membership(&mut self) -> u64 {
        self.next_membership += 1;
        self.next_membership
    }

    /// Adds a running node whose metadata holds only its own machine record.
    pub(crate) fn add_node(
        &mut self,
        peer_port: u16,
        local_peer_port: u16,
        membership: u64,
        name: String,
        port_offset: u16,
    ) -> Identifier {
        let id = Identifier::random();
        let mut metadata = Metadata::default();
        for (field, value) in [
            ("datacenter_uuid", Value::Null),
            ("name", json!(name)),
            ("port_offset", json!(port_offset)),
        ] {
            metadata.write(&mut self.versions, EntityKind::Machine, id, field, value);
        }
        self.nodes.insert(
            peer_port,
            SimNode {
                id,
                local_peer_port,
                membership,
                running: true,
                metadata,
            },
        );
        id
    }

    fn linked(&self, a: &SimNode, a_port: u16, b: &SimNode, b_port: u16) -> bool {
        a.running
            && b.running
            && a.membership == b.membership
            && !self.blocked.contains(&(a.local_peer_port, b_port))
            && !self.blocked.contains(&(b.local_peer_port, a_port))
    }

    /// Running nodes grouped by reachability.
    pub(crate) fn components(&self) -> Vec<Vec<u16>> {
        let mut visited = BTreeSet::new();
        let mut components = Vec::new();
        for (&start, node) in &self.nodes {
            if !node.running || !visited.insert(start) {
                continue;
            }
            let mut component = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(port) = queue.pop_front() {
                let current = &self.nodes[&port];
                for (&other_port, other) in &self.nodes {
                    if !visited.contains(&other_port) && self.linked(current, port, other, other_port) {
                        visited.insert(other_port);
                        component.push(other_port);
                        queue.push_back(other_port);
                    }
                }
            }
            components.push(component);
        }
        components
    }

    /// Brings every connected component to a common view of the metadata.
    pub(crate) fn gossip(&mut self) {
        for component in self.components() {
            if component.len() < 2 {
                continue;
            }
            let mut merged = Metadata::default();
            for port in &component {
                merged.merge(&self.nodes[port].metadata, &self.versions);
            }
            for port in &component {
                if let Some(node) = self.nodes.get_mut(port) {
                    node.metadata = merged.clone();
                }
            }
            debug!(nodes = component.len(), "gossip round");
        }
    }
}
