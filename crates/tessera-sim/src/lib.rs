//! # tessera-sim: an in-memory cluster for testing the controller
//!
//! [`SimCluster`] stands in for every external collaborator at once: it
//! answers admin requests ([`AdminClient`]), starts and stops nodes
//! ([`NodeLauncher`]) and cuts paths between them ([`PathBlocker`]).
//!
//! Each simulated node keeps its own copy of the cluster metadata. Nodes that
//! can reach each other (same membership, running, no blocked path in either
//! direction) gossip after every state change, so a partition lets the two
//! sides diverge and a heal surfaces concurrent writes as
//! `VALUE_IN_CONFLICT` fields, the same way the real database does.
//!
//! Fault injection:
//! - [`SimCluster::fail_paths_after`]: the n+1-th path change fails
//! - [`SimCluster::fail_next_start`]: the next node start fails

mod metadata;
mod routes;
mod state;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tessera_admin::{AdminClient, AdminError, BlockError, Method, NodeError, NodeHandle, NodeLauncher, NodeSpec, PathBlocker};
use tessera_types::{EntityKind, Endpoint, Identifier};
use tracing::{debug, info};

use crate::state::SimState;

/// Handle to a shared simulated cluster. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct SimCluster {
    state: Arc<Mutex<SimState>>,
}

impl SimCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lets `successes` more path changes through, then fails the next one.
    pub fn fail_paths_after(&self, successes: usize) {
        self.lock().path_budget = Some(successes);
    }

    pub fn fail_next_start(&self) {
        self.lock().fail_next_start = true;
    }

    /// Currently blocked `(local peer port, peer port)` paths.
    pub fn blocked_paths(&self) -> BTreeSet<(u16, u16)> {
        self.lock().blocked.clone()
    }

    /// Number of block and unblock calls received so far.
    pub fn path_calls(&self) -> usize {
        self.lock().path_calls
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn running_ports(&self) -> Vec<u16> {
        self.lock()
            .nodes
            .iter()
            .filter(|(_, node)| node.running)
            .map(|(port, _)| *port)
            .collect()
    }

    pub fn node_id(&self, peer_port: u16) -> Option<Identifier> {
        self.lock().nodes.get(&peer_port).map(|node| node.id)
    }

    /// Running nodes grouped by mutual reachability, by peer port.
    pub fn components(&self) -> Vec<Vec<u16>> {
        self.lock().components()
    }

    /// Stops a node behind the controller's back.
    pub fn crash(&self, peer_port: u16) {
        let mut state = self.lock();
        if let Some(node) = state.nodes.get_mut(&peer_port) {
            node.running = false;
        }
        state.gossip();
    }

    /// Writes a field directly on one node, as another client would.
    pub fn write_field(&self, peer_port: u16, kind: EntityKind, id: Identifier, field: &str, value: Value) {
        let mut state = self.lock();
        let state = &mut *state;
        if let Some(node) = state.nodes.get_mut(&peer_port) {
            node.metadata.write(&mut state.versions, kind, id, field, value);
        }
        state.gossip();
    }

    /// Drops an entity from every node, as a deletion the controller never
    /// saw would.
    pub fn remove_entity(&self, kind: EntityKind, id: Identifier) {
        let mut state = self.lock();
        for node in state.nodes.values_mut() {
            node.metadata.remove(kind, id);
        }
    }

    /// Rendered value of a field as seen by one node.
    pub fn field(&self, peer_port: u16, kind: EntityKind, id: Identifier, field: &str) -> Option<Value> {
        let state = self.lock();
        let node = state.nodes.get(&peer_port)?;
        node.metadata.field(kind, id, field).map(|f| f.render())
    }

    /// Entity identifiers of one kind as seen by one node.
    pub fn entity_ids(&self, peer_port: u16, kind: EntityKind) -> Vec<Identifier> {
        let state = self.lock();
        state.nodes.get(&peer_port).map(|node| node.metadata.ids(kind)).unwrap_or_default()
    }

    fn change_path(&self, verb: &str, from_port: u16, to_port: u16) -> Result<(), BlockError> {
        let mut state = self.lock();
        state.path_calls += 1;
        match state.path_budget {
            Some(0) => {
                state.path_budget = None;
                return Err(BlockError::Daemon {
                    addr: "sim".to_string(),
                    reason: format!("injected failure on {verb} {from_port} {to_port}"),
                });
            }
            Some(left) => state.path_budget = Some(left - 1),
            None => {}
        }
        if verb == "block" {
            state.blocked.insert((from_port, to_port));
        } else {
            state.blocked.remove(&(from_port, to_port));
        }
        debug!(verb, from_port, to_port, "simulated path change");
        state.gossip();
        Ok(())
    }
}

impl AdminClient for SimCluster {
    fn request(
        &self,
        endpoint: &Endpoint,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, AdminError> {
        self.lock().handle(endpoint, method, path, body)
    }
}

impl NodeLauncher for SimCluster {
    fn start(&self, spec: &NodeSpec) -> Result<Box<dyn NodeHandle>, NodeError> {
        let mut state = self.lock();
        if state.fail_next_start {
            state.fail_next_start = false;
            return Err(NodeError::Spawn("injected start failure".to_string()));
        }

        if let Some(node) = state.nodes.get_mut(&spec.peer_port) {
            if node.running {
                return Err(NodeError::Spawn(format!("port {} already in use", spec.peer_port)));
            }
            if !spec.restart {
                return Err(NodeError::Spawn(format!("node data for port {} already exists", spec.peer_port)));
            }
            node.running = true;
            info!(peer_port = spec.peer_port, "simulated node restarted");
        } else if spec.restart {
            return Err(NodeError::Spawn(format!("no node data for port {}", spec.peer_port)));
        } else {
            let joined = spec
                .join
                .as_ref()
                .and_then(|target| state.nodes.get(&target.peer_port))
                .map(|target| target.membership);
            let membership = match joined {
                Some(membership) => membership,
                None => state.new_membership(),
            };
            let name = spec.name.clone().unwrap_or_else(|| format!("node-{}", spec.peer_port));
            let id = state.add_node(spec.peer_port, spec.local_peer_port, membership, name, spec.port_offset);
            info!(%id, peer_port = spec.peer_port, membership, "simulated node started");
        }
        state.gossip();

        Ok(Box::new(SimNodeHandle {
            sim: self.clone(),
            peer_port: spec.peer_port,
        }))
    }
}

impl PathBlocker for SimCluster {
    fn block(&self, from_port: u16, to_port: u16) -> Result<(), BlockError> {
        self.change_path("block", from_port, to_port)
    }

    fn unblock(&self, from_port: u16, to_port: u16) -> Result<(), BlockError> {
        self.change_path("unblock", from_port, to_port)
    }
}

/// A simulated node started through [`NodeLauncher::start`].
#[derive(Debug)]
pub struct SimNodeHandle {
    sim: SimCluster,
    peer_port: u16,
}

impl NodeHandle for SimNodeHandle {
    fn stop(&mut self) -> Result<(), NodeError> {
        self.sim.crash(self.peer_port);
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.sim
            .lock()
            .nodes
            .get(&self.peer_port)
            .is_some_and(|node| node.running)
    }

    fn destroy(&mut self) -> Result<(), NodeError> {
        let mut state = self.sim.lock();
        state.nodes.remove(&self.peer_port);
        state.gossip();
        Ok(())
    }
}

#[cfg(test)]
mod tests;
