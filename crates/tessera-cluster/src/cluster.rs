//! The cluster topology controller.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};

use rand::Rng;
use rand::rngs::SmallRng;
use serde_json::Value;
use tessera_admin::{Method, NodeHandle, NodeSpec};
use tessera_types::{
    ClusterToken, Datacenter, Endpoint, EntityHandle, EntityKind, Identifier, Machine, ModelError, Namespace,
    NamespaceKind, Reference, TopologyEntity,
};
use tracing::{debug, info, warn};

use crate::settle::settle;
use crate::{ClusterConfig, ClusterIo, ConflictRegistry, Error, NodePorts, Result};

/// A node this controller started, with what it takes to restart it.
#[derive(Debug)]
pub(crate) struct LocalNode {
    spec: NodeSpec,
    handle: Box<dyn NodeHandle>,
}

/// A machine taken out of one controller to be handed to another.
#[derive(Debug)]
pub(crate) struct DetachedMachine {
    machine: Machine,
    node: Option<LocalNode>,
    killed: bool,
}

/// Copy of one entity, changed locally before the change is sent.
#[derive(Debug, Clone)]
pub(crate) enum StagedEntity {
    Machine(Machine),
    Datacenter(Datacenter),
    Namespace(Namespace),
}

impl StagedEntity {
    pub(crate) fn kind(&self) -> EntityKind {
        match self {
            StagedEntity::Machine(machine) => machine.owner_map_kind(),
            StagedEntity::Datacenter(datacenter) => datacenter.owner_map_kind(),
            StagedEntity::Namespace(namespace) => namespace.owner_map_kind(),
        }
    }

    pub(crate) fn id(&self) -> Identifier {
        match self {
            StagedEntity::Machine(machine) => machine.id(),
            StagedEntity::Datacenter(datacenter) => datacenter.id(),
            StagedEntity::Namespace(namespace) => namespace.id(),
        }
    }

    pub(crate) fn apply_field(&mut self, field: &str, value: &Value) -> std::result::Result<(), ModelError> {
        match self {
            StagedEntity::Machine(machine) => machine.apply_field(field, value),
            StagedEntity::Datacenter(datacenter) => datacenter.apply_field(field, value),
            StagedEntity::Namespace(namespace) => namespace.apply_field(field, value),
        }
    }
}

/// Client-side mirror of a running cluster, and the operations that change it.
///
/// Every mutating operation sends one admin request to a reachable machine,
/// waits for the cluster to settle and then verifies the whole mirror against
/// every reachable machine before returning.
pub struct Cluster {
    token: ClusterToken,
    config: ClusterConfig,
    io: ClusterIo,
    pub(crate) rng: SmallRng,
    pub(crate) machines: BTreeMap<Identifier, Machine>,
    pub(crate) datacenters: BTreeMap<Identifier, Datacenter>,
    keyed_namespaces: BTreeMap<Identifier, Namespace>,
    range_namespaces: BTreeMap<Identifier, Namespace>,
    nodes: BTreeMap<Identifier, LocalNode>,
    /// Locally started machines that were stopped on purpose.
    killed: BTreeSet<Identifier>,
    pub(crate) conflicts: ConflictRegistry,
    /// Set while this controller owns one side of a split; machines can then
    /// only be added through the partition simulator.
    partitioned: bool,
}

impl Cluster {
    /// An empty controller; machines are added with [`Cluster::add_machine`].
    pub fn new(config: ClusterConfig, io: ClusterIo) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, io))
    }

    fn build(config: ClusterConfig, io: ClusterIo) -> Self {
        let rng = config.rng();
        let token = ClusterToken::next();
        debug!(%token, base_port = io.ports.base(), "cluster controller created");
        Self {
            token,
            config,
            io,
            rng,
            machines: BTreeMap::new(),
            datacenters: BTreeMap::new(),
            keyed_namespaces: BTreeMap::new(),
            range_namespaces: BTreeMap::new(),
            nodes: BTreeMap::new(),
            killed: BTreeSet::new(),
            conflicts: ConflictRegistry::default(),
            partitioned: false,
        }
    }

    /// A controller over nodes started elsewhere, one admin endpoint per node.
    pub fn attach(config: ClusterConfig, io: ClusterIo, endpoints: &[Endpoint]) -> Result<Self> {
        let mut cluster = Self::new(config, io)?;
        for endpoint in endpoints {
            let machine = cluster.discover_machine(endpoint)?;
            cluster.insert_known(machine)?;
        }
        cluster.settle_and_verify()?;
        info!(token = %cluster.token, machines = cluster.machines.len(), "attached to external cluster");
        Ok(cluster)
    }

    pub fn token(&self) -> ClusterToken {
        self.token
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub(crate) fn io(&self) -> &ClusterIo {
        &self.io
    }

    // ========================================================================
    // Entity access
    // ========================================================================

    pub fn machines(&self) -> impl Iterator<Item = &Machine> {
        self.machines.values()
    }

    pub fn machine(&self, id: Identifier) -> Option<&Machine> {
        self.machines.get(&id)
    }

    pub fn datacenters(&self) -> impl Iterator<Item = &Datacenter> {
        self.datacenters.values()
    }

    pub fn datacenter(&self, id: Identifier) -> Option<&Datacenter> {
        self.datacenters.get(&id)
    }

    pub fn namespaces(&self, kind: NamespaceKind) -> impl Iterator<Item = &Namespace> {
        self.namespace_map(kind).values()
    }

    pub fn namespace(&self, id: Identifier) -> Option<&Namespace> {
        self.keyed_namespaces
            .get(&id)
            .or_else(|| self.range_namespaces.get(&id))
    }

    /// Identifiers of every tracked entity of one kind, placeholders included.
    pub fn entity_ids(&self, kind: EntityKind) -> BTreeSet<Identifier> {
        match kind {
            EntityKind::Machine => self.machines.keys().copied().collect(),
            EntityKind::Datacenter => self.datacenters.keys().copied().collect(),
            EntityKind::Namespace(kind) => self.namespace_map(kind).keys().copied().collect(),
        }
    }

    /// Handle to a tracked entity.
    pub fn handle(&self, kind: EntityKind, id: Identifier) -> Option<EntityHandle> {
        self.entity(kind, id).map(|_| EntityHandle::new(self.token, kind, id))
    }

    pub(crate) fn issue_handle(&self, kind: EntityKind, id: Identifier) -> EntityHandle {
        EntityHandle::new(self.token, kind, id)
    }

    pub(crate) fn namespace_map(&self, kind: NamespaceKind) -> &BTreeMap<Identifier, Namespace> {
        match kind {
            NamespaceKind::Keyed => &self.keyed_namespaces,
            NamespaceKind::Range => &self.range_namespaces,
        }
    }

    pub(crate) fn namespace_map_mut(&mut self, kind: NamespaceKind) -> &mut BTreeMap<Identifier, Namespace> {
        match kind {
            NamespaceKind::Keyed => &mut self.keyed_namespaces,
            NamespaceKind::Range => &mut self.range_namespaces,
        }
    }

    pub(crate) fn entity(&self, kind: EntityKind, id: Identifier) -> Option<&dyn TopologyEntity> {
        match kind {
            EntityKind::Machine => self.machines.get(&id).map(|m| m as &dyn TopologyEntity),
            EntityKind::Datacenter => self.datacenters.get(&id).map(|d| d as &dyn TopologyEntity),
            EntityKind::Namespace(kind) => self.namespace_map(kind).get(&id).map(|n| n as &dyn TopologyEntity),
        }
    }

    pub(crate) fn stage(&self, kind: EntityKind, id: Identifier) -> Option<StagedEntity> {
        match kind {
            EntityKind::Machine => self.machines.get(&id).cloned().map(StagedEntity::Machine),
            EntityKind::Datacenter => self.datacenters.get(&id).cloned().map(StagedEntity::Datacenter),
            EntityKind::Namespace(kind) => self.namespace_map(kind).get(&id).cloned().map(StagedEntity::Namespace),
        }
    }

    pub(crate) fn commit(&mut self, staged: StagedEntity) {
        match staged {
            StagedEntity::Machine(machine) => {
                self.machines.insert(machine.id(), machine);
            }
            StagedEntity::Datacenter(datacenter) => {
                self.datacenters.insert(datacenter.id(), datacenter);
            }
            StagedEntity::Namespace(namespace) => {
                let kind = namespace.kind();
                self.namespace_map_mut(kind).insert(namespace.id(), namespace);
            }
        }
    }

    pub(crate) fn random_name(&mut self) -> String {
        self.rng.gen_range(0..1_000_000u32).to_string()
    }

    // ========================================================================
    // Admin requests
    // ========================================================================

    /// Known machines that should answer admin requests.
    pub(crate) fn reachable_machines(&self) -> impl Iterator<Item = &Machine> {
        self.machines
            .values()
            .filter(|machine| !machine.is_placeholder() && !self.killed.contains(&machine.id()))
    }

    /// Known machines in identifier order, reachable or not.
    pub(crate) fn known_machine_ids(&self) -> Vec<Identifier> {
        self.machines
            .values()
            .filter(|machine| !machine.is_placeholder())
            .map(Machine::id)
            .collect()
    }

    /// The machine admin commands are sent to.
    pub(crate) fn command_machine(&self) -> Result<&Machine> {
        self.reachable_machines().next().ok_or(Error::NoReachableMachine)
    }

    pub(crate) fn command_endpoint(&self) -> Result<&Endpoint> {
        self.command_machine()?
            .endpoint()
            .ok_or(Error::NoReachableMachine)
    }

    /// Sends one request to the command machine.
    pub(crate) fn query(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let endpoint = self.command_endpoint()?;
        debug!(%endpoint, %method, path, "admin request");
        Ok(self.io.admin.request(endpoint, method, path, body)?)
    }

    /// Sends one request to a specific machine.
    pub(crate) fn query_machine(&self, id: Identifier, method: Method, path: &str) -> Result<Value> {
        let endpoint = self
            .machines
            .get(&id)
            .and_then(Machine::endpoint)
            .ok_or(Error::InvalidServer(id))?;
        Ok(self.io.admin.request(endpoint, method, path, None)?)
    }

    // ========================================================================
    // Machines
    // ========================================================================

    /// Starts a new node joined to this cluster and waits until it is verified.
    pub fn add_machine(&mut self, name: Option<&str>) -> Result<EntityHandle> {
        self.ensure_unpartitioned()?;
        let ports = self.io.ports.reserve()?;
        let id = self.launch_machine(ports, name)?;
        self.settle_and_verify()?;
        Ok(self.issue_handle(EntityKind::Machine, id))
    }

    /// Starts a node on reserved ports and tracks it, without verifying.
    ///
    /// The node is stopped again when it cannot be bootstrapped.
    pub(crate) fn launch_machine(&mut self, ports: NodePorts, name: Option<&str>) -> Result<Identifier> {
        let offset = self.config.admin_port_offset;
        let endpoint = Endpoint::with_admin_offset(self.config.host.clone(), ports.peer_port, offset).ok_or(
            Error::PortOverflow {
                port: ports.peer_port,
                offset,
            },
        )?;
        let join = self.command_endpoint().ok().cloned();
        let spec = NodeSpec {
            host: self.config.host.clone(),
            peer_port: ports.peer_port,
            local_peer_port: ports.local_peer_port,
            port_offset: ports.port_offset,
            name: name.map(str::to_string),
            join,
            restart: false,
        };

        let mut handle = self.io.launcher.start(&spec)?;
        let policy = self.config.settle.clone();
        let bootstrapped = settle(&policy, || self.fetch_machine(&endpoint, Some(ports.local_peer_port)))
            .and_then(|machine| {
                let id = machine.id();
                self.insert_known(machine).map(|()| id)
            });
        match bootstrapped {
            Ok(id) => {
                info!(%id, peer_port = ports.peer_port, local_peer_port = ports.local_peer_port, "machine added");
                self.nodes.insert(id, LocalNode { spec, handle });
                Ok(id)
            }
            Err(err) => {
                if let Err(stop_err) = handle.stop() {
                    warn!(peer_port = ports.peer_port, error = %stop_err, "failed to stop unusable node");
                }
                Err(err)
            }
        }
    }

    /// Adopts a machine discovered elsewhere, superseding its placeholder.
    pub fn add_existing_machine(&mut self, machine: Machine) -> Result<EntityHandle> {
        self.ensure_unpartitioned()?;
        if machine.is_placeholder() {
            return Err(Error::InvalidServer(machine.id()));
        }
        let id = machine.id();
        self.insert_known(machine)?;
        info!(%id, "existing machine added");
        self.settle_and_verify()?;
        Ok(self.issue_handle(EntityKind::Machine, id))
    }

    /// Bootstraps a known machine from the admin endpoint of a running node.
    pub fn discover_machine(&self, endpoint: &Endpoint) -> Result<Machine> {
        settle(&self.config.settle, || self.fetch_machine(endpoint, None))
    }

    fn fetch_machine(&self, endpoint: &Endpoint, local_peer_port: Option<u16>) -> Result<Machine> {
        let me = self.io.admin.get(endpoint, "/ajax/me")?;
        let id = me
            .as_str()
            .ok_or_else(|| Error::UnexpectedResponse(format!("`/ajax/me` returned {me}")))?;
        let id = Identifier::parse(id)?;
        let payload = self.io.admin.get(endpoint, &format!("/ajax/machines/{id}"))?;
        let payload = payload
            .as_object()
            .ok_or_else(|| Error::UnexpectedResponse(format!("machine {id} is not an object: {payload}")))?;
        Ok(Machine::from_wire(id, payload, endpoint.clone(), local_peer_port)?)
    }

    fn insert_known(&mut self, machine: Machine) -> Result<()> {
        let id = machine.id();
        if self.machines.get(&id).is_some_and(|old| !old.is_placeholder()) {
            return Err(Error::ServerExists(id));
        }
        self.machines.insert(id, machine);
        Ok(())
    }

    /// Resolves references to locally started machines.
    fn local_machine_ids<R: Into<Reference>>(
        &self,
        machines: impl IntoIterator<Item = R>,
    ) -> Result<Vec<Identifier>> {
        machines
            .into_iter()
            .map(|reference| {
                let id = self.find_machine(reference)?.id();
                if self.nodes.contains_key(&id) {
                    Ok(id)
                } else {
                    Err(Error::InvalidServer(id))
                }
            })
            .collect()
    }

    /// Stops locally started machines, keeping their data and their entries.
    ///
    /// Killed machines are skipped by verification until recovered.
    pub fn kill_machines<R: Into<Reference>>(
        &mut self,
        machines: impl IntoIterator<Item = R>,
    ) -> Result<()> {
        let ids = self.local_machine_ids(machines)?;
        for id in ids {
            if self.killed.contains(&id) {
                debug!(%id, "machine already killed");
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                node.handle.stop()?;
            }
            self.killed.insert(id);
            info!(%id, "machine killed");
        }
        Ok(())
    }

    /// Restarts killed machines on the same ports and data, then verifies.
    pub fn recover_machines<R: Into<Reference>>(
        &mut self,
        machines: impl IntoIterator<Item = R>,
    ) -> Result<()> {
        let ids = self.local_machine_ids(machines)?;
        for id in ids {
            if !self.killed.contains(&id) {
                debug!(%id, "machine is not killed");
                continue;
            }
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            let spec = NodeSpec {
                join: None,
                restart: true,
                ..node.spec.clone()
            };
            node.handle = self.io.launcher.start(&spec)?;
            self.killed.remove(&id);
            info!(%id, "machine recovered");
        }
        self.settle_and_verify()
    }

    pub fn is_killed(&self, id: Identifier) -> bool {
        self.killed.contains(&id)
    }

    /// False if a locally started machine that should be running has exited.
    pub fn is_alive(&mut self) -> bool {
        let killed = &self.killed;
        self.nodes
            .iter_mut()
            .filter(|(id, _)| !killed.contains(*id))
            .all(|(_, node)| node.handle.is_alive())
    }

    /// Stops every locally started machine and discards its data. Idempotent.
    pub fn shutdown(&mut self) -> Result<()> {
        let mut first_error = None;
        for (id, mut node) in std::mem::take(&mut self.nodes) {
            match node.handle.destroy() {
                Ok(()) => debug!(%id, "machine shut down"),
                Err(err) => {
                    warn!(%id, error = %err, "failed to shut machine down");
                    first_error.get_or_insert(Error::Node(err));
                }
            }
            self.killed.insert(id);
        }
        first_error.map_or(Ok(()), Err)
    }

    // ========================================================================
    // Partition support
    // ========================================================================

    pub fn is_partitioned(&self) -> bool {
        self.partitioned
    }

    pub(crate) fn set_partitioned(&mut self, partitioned: bool) {
        self.partitioned = partitioned;
    }

    /// New nodes on one side of a split would not be cut off from the other.
    fn ensure_unpartitioned(&self) -> Result<()> {
        if self.partitioned {
            return Err(Error::PartitionPrecondition(
                "cluster is split; add machines through its partition simulator".to_string(),
            ));
        }
        Ok(())
    }

    /// `(local peer port, peer port)` of a known machine; the local port is
    /// only known for machines started by this controller.
    pub(crate) fn peer_path(&self, id: Identifier) -> Option<(Option<u16>, u16)> {
        let machine = self.machines.get(&id)?;
        let peer_port = machine.endpoint()?.peer_port;
        Some((machine.local_peer_port(), peer_port))
    }

    /// Local peer ports of every locally started machine.
    pub(crate) fn local_peer_ports(&self) -> Vec<u16> {
        self.machines.values().filter_map(Machine::local_peer_port).collect()
    }

    /// A new controller sharing this one's collaborators, with independent
    /// copies of the datacenters, namespaces and conflicts and no machines.
    pub(crate) fn diverge(&self) -> Self {
        let mut fork = Self::build(self.config.clone(), self.io.clone());
        fork.datacenters = self.datacenters.clone();
        fork.keyed_namespaces = self.keyed_namespaces.clone();
        fork.range_namespaces = self.range_namespaces.clone();
        fork.conflicts = self.conflicts.clone();
        fork
    }

    pub(crate) fn detach_machine(&mut self, id: Identifier) -> Option<DetachedMachine> {
        let machine = self.machines.remove(&id)?;
        Some(DetachedMachine {
            machine,
            node: self.nodes.remove(&id),
            killed: self.killed.remove(&id),
        })
    }

    pub(crate) fn attach_machine(&mut self, detached: DetachedMachine) {
        let id = detached.machine.id();
        self.machines.insert(id, detached.machine);
        if let Some(node) = detached.node {
            self.nodes.insert(id, node);
        }
        if detached.killed {
            self.killed.insert(id);
        }
    }

    /// Takes over the known machines of `other` and merges its datacenters,
    /// namespaces and conflicts; `other` wins where both track an entity.
    pub(crate) fn absorb(&mut self, mut other: Cluster) {
        for id in other.known_machine_ids() {
            if let Some(detached) = other.detach_machine(id) {
                self.attach_machine(detached);
            }
        }
        merge_entities(&mut self.datacenters, std::mem::take(&mut other.datacenters));
        merge_entities(&mut self.keyed_namespaces, std::mem::take(&mut other.keyed_namespaces));
        merge_entities(&mut self.range_namespaces, std::mem::take(&mut other.range_namespaces));
        self.conflicts.merge(std::mem::take(&mut other.conflicts));
    }
}

fn merge_entities<E>(ours: &mut BTreeMap<Identifier, E>, theirs: BTreeMap<Identifier, E>)
where
    E: TopologyEntity + PartialEq,
{
    for (id, entity) in theirs {
        if let Some(previous) = ours.get(&id).filter(|previous| **previous != entity) {
            warn!(
                kind = %entity.owner_map_kind(),
                %id,
                ours = %previous.to_json(),
                theirs = %entity.to_json(),
                "partitions diverged; keeping the joining side's copy"
            );
        }
        ours.insert(id, entity);
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(token = %self.token, error = %err, "cluster shutdown on drop failed");
        }
    }
}

impl Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Machines:")?;
        for (id, machine) in &self.machines {
            write!(f, "\n{id}: {machine}")?;
            if self.killed.contains(id) {
                f.write_str(" (killed)")?;
            }
        }
        f.write_str("\nDatacenters:")?;
        for (id, datacenter) in &self.datacenters {
            write!(f, "\n{id}: {datacenter}")?;
        }
        f.write_str("\nNamespaces:")?;
        for (id, namespace) in self.keyed_namespaces.iter().chain(&self.range_namespaces) {
            write!(f, "\n{id}: {namespace}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("token", &self.token)
            .field("machines", &self.machines.len())
            .field("datacenters", &self.datacenters.len())
            .field("keyed_namespaces", &self.keyed_namespaces.len())
            .field("range_namespaces", &self.range_namespaces.len())
            .field("conflicts", &self.conflicts.len())
            .finish_non_exhaustive()
    }
}
