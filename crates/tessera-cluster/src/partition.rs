//! Network partition simulation over one cluster.
//!
//! The simulator owns an arena of partition groups. Each group has its own
//! [`Cluster`] controller over the machines on its side, the peer ports its
//! machines are cut off from, and the groups it is split from (its
//! siblings). Groups start linked to every group they were split from and
//! every sibling of that group, so the sibling relation stays symmetric.
//!
//! Every split, join and machine add changes paths inside one
//! [`PathTransaction`]: when any path change fails, the ones already made
//! are undone before the error is returned and no bookkeeping is touched.

use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::thread;

use tessera_types::{EntityHandle, EntityKind, Identifier, Machine, Reference, TopologyEntity};
use tracing::{info, warn};

use crate::transaction::{PathChange, PathTransaction};
use crate::{Cluster, Error, Result};

/// Address of a partition group in a [`PartitionSimulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(usize);

impl Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

/// Machines to move out of a group in [`PartitionSimulator::split`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// These known machines of the group.
    Machines(Vec<Reference>),
    /// The first `n` known machines, in identifier order.
    Count(usize),
}

#[derive(Debug)]
struct PartitionGroup {
    cluster: Cluster,
    /// Peer ports the group's machines cannot reach.
    blocked_ports: BTreeSet<u16>,
    siblings: BTreeSet<GroupId>,
}

/// `(local peer port, peer port)` of known machines, all of which must have
/// been started by the cluster's controller.
fn local_paths(cluster: &Cluster, machines: &[Identifier]) -> Result<Vec<(u16, u16)>> {
    machines
        .iter()
        .map(|id| match cluster.peer_path(*id) {
            Some((Some(local_peer_port), peer_port)) => Ok((local_peer_port, peer_port)),
            _ => Err(Error::PartitionPrecondition(format!(
                "machine {id} was not started by this controller; its paths cannot be cut"
            ))),
        })
        .collect()
}

fn peer_ports(paths: &[(u16, u16)]) -> BTreeSet<u16> {
    paths.iter().map(|(_, peer_port)| *peer_port).collect()
}

/// Splits and rejoins one cluster into partition groups.
#[derive(Debug)]
pub struct PartitionSimulator {
    groups: Vec<Option<PartitionGroup>>,
    closed: bool,
}

impl PartitionSimulator {
    /// A simulator whose only group, [`PartitionSimulator::root`], owns `cluster`.
    pub fn new(cluster: Cluster) -> Self {
        Self {
            groups: vec![Some(PartitionGroup {
                cluster,
                blocked_ports: BTreeSet::new(),
                siblings: BTreeSet::new(),
            })],
            closed: false,
        }
    }

    /// The group that owned the whole cluster. It is gone once joined into another group.
    pub fn root() -> GroupId {
        GroupId(0)
    }

    fn group(&self, id: GroupId) -> Result<&PartitionGroup> {
        self.groups
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(Error::UnknownGroup(id))
    }

    fn group_mut(&mut self, id: GroupId) -> Result<&mut PartitionGroup> {
        self.groups
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(Error::UnknownGroup(id))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn cluster(&self, group: GroupId) -> Result<&Cluster> {
        Ok(&self.group(group)?.cluster)
    }

    pub fn cluster_mut(&mut self, group: GroupId) -> Result<&mut Cluster> {
        Ok(&mut self.group_mut(group)?.cluster)
    }

    pub fn blocked_ports(&self, group: GroupId) -> Result<&BTreeSet<u16>> {
        Ok(&self.group(group)?.blocked_ports)
    }

    pub fn siblings(&self, group: GroupId) -> Result<&BTreeSet<GroupId>> {
        Ok(&self.group(group)?.siblings)
    }

    /// Live groups, oldest first.
    pub fn groups(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, group)| group.is_some())
            .map(|(index, _)| GroupId(index))
    }

    /// Marks every controller that shares the cluster with a sibling group.
    fn sync_partitioned(&mut self) {
        for group in self.groups.iter_mut().flatten() {
            group.cluster.set_partitioned(!group.siblings.is_empty());
        }
    }

    // ========================================================================
    // Split and join
    // ========================================================================

    /// Moves the selected machines of `group` into a new group cut off from
    /// the rest of it.
    pub fn split(&mut self, group: GroupId, selector: Selector) -> Result<GroupId> {
        let parent = self.group(group)?;
        let cluster = &parent.cluster;
        let known = cluster.known_machine_ids();

        let moved: BTreeSet<Identifier> = match selector {
            Selector::Machines(machines) => machines
                .into_iter()
                .map(|reference| {
                    let machine = cluster.find_machine(reference)?;
                    if machine.is_placeholder() {
                        return Err(Error::PartitionPrecondition(format!(
                            "machine {} is not part of {group}",
                            machine.id()
                        )));
                    }
                    Ok(machine.id())
                })
                .collect::<Result<_>>()?,
            Selector::Count(count) => known.iter().copied().take(count).collect(),
        };
        let moved: Vec<Identifier> = moved.into_iter().collect();
        let remaining: Vec<Identifier> = known.into_iter().filter(|id| !moved.contains(id)).collect();
        if moved.is_empty() {
            return Err(Error::PartitionPrecondition(format!(
                "no machines selected to split off {group}"
            )));
        }
        if remaining.is_empty() {
            return Err(Error::PartitionPrecondition(format!(
                "splitting would leave {group} without machines"
            )));
        }

        let moved_paths = local_paths(cluster, &moved)?;
        let remaining_paths = local_paths(cluster, &remaining)?;
        let moved_ports = peer_ports(&moved_paths);
        let remaining_ports = peer_ports(&remaining_paths);

        let mut transaction = PathTransaction::new(Arc::clone(&cluster.io().blocker), PathChange::Block);
        for (local_peer_port, _) in &remaining_paths {
            for peer_port in &moved_ports {
                transaction.apply(*local_peer_port, *peer_port)?;
            }
        }
        for (local_peer_port, _) in &moved_paths {
            for peer_port in &remaining_ports {
                transaction.apply(*local_peer_port, *peer_port)?;
            }
        }
        transaction.commit();

        let child = GroupId(self.groups.len());
        let parent = self.group_mut(group)?;
        let mut child_cluster = parent.cluster.diverge();
        for id in &moved {
            if let Some(detached) = parent.cluster.detach_machine(*id) {
                child_cluster.attach_machine(detached);
            }
        }
        let mut child_blocked = parent.blocked_ports.clone();
        child_blocked.extend(&remaining_ports);
        parent.blocked_ports.extend(&moved_ports);
        let mut child_siblings = parent.siblings.clone();
        child_siblings.insert(group);

        for sibling in &child_siblings {
            self.group_mut(*sibling)?.siblings.insert(child);
        }
        self.groups.push(Some(PartitionGroup {
            cluster: child_cluster,
            blocked_ports: child_blocked,
            siblings: child_siblings,
        }));
        self.sync_partitioned();
        info!(%group, %child, moved = moved.len(), remaining = remaining.len(), "cluster split");

        self.group_mut(group)?.cluster.refresh()?;
        self.group_mut(child)?.cluster.refresh()?;
        Ok(child)
    }

    /// Heals the partition between `group` and `other`; `other` is merged
    /// into `group` and removed.
    pub fn join(&mut self, group: GroupId, other: GroupId) -> Result<()> {
        if group == other {
            return Err(Error::PartitionPrecondition(format!("cannot join {group} with itself")));
        }
        let ours = self.group(group)?;
        let theirs = self.group(other)?;
        if !ours.siblings.contains(&other) || !theirs.siblings.contains(&group) {
            return Err(Error::PartitionPrecondition(format!("{group} and {other} are not split from each other")));
        }

        let our_paths = local_paths(&ours.cluster, &ours.cluster.known_machine_ids())?;
        let their_paths = local_paths(&theirs.cluster, &theirs.cluster.known_machine_ids())?;
        let our_ports = peer_ports(&our_paths);
        let their_ports = peer_ports(&their_paths);

        let blocked: BTreeSet<u16> = ours.blocked_ports.difference(&their_ports).copied().collect();
        let their_blocked: BTreeSet<u16> = theirs.blocked_ports.difference(&our_ports).copied().collect();
        if blocked != their_blocked {
            return Err(Error::PartitionPrecondition(format!(
                "{group} and {other} would still be cut off from different ports: {blocked:?} and {their_blocked:?}"
            )));
        }
        let mut siblings = ours.siblings.clone();
        siblings.remove(&other);
        let mut their_siblings = theirs.siblings.clone();
        their_siblings.remove(&group);
        if siblings != their_siblings {
            return Err(Error::PartitionPrecondition(format!(
                "{group} and {other} are split from different groups"
            )));
        }

        let mut transaction = PathTransaction::new(Arc::clone(&ours.cluster.io().blocker), PathChange::Unblock);
        for (local_peer_port, _) in &our_paths {
            for peer_port in &their_ports {
                transaction.apply(*local_peer_port, *peer_port)?;
            }
        }
        for (local_peer_port, _) in &their_paths {
            for peer_port in &our_ports {
                transaction.apply(*local_peer_port, *peer_port)?;
            }
        }
        transaction.commit();

        let theirs = self
            .groups
            .get_mut(other.0)
            .and_then(Option::take)
            .ok_or(Error::UnknownGroup(other))?;
        for sibling in &siblings {
            self.group_mut(*sibling)?.siblings.remove(&other);
        }
        let ours = self.group_mut(group)?;
        ours.siblings.remove(&other);
        ours.blocked_ports = blocked;
        ours.cluster.absorb(theirs.cluster);
        self.sync_partitioned();
        let ours = self.group_mut(group)?;
        info!(%group, %other, machines = ours.cluster.known_machine_ids().len(), "partitions joined");

        let settle = ours.cluster.config().join_settle();
        if !settle.is_zero() {
            thread::sleep(settle);
        }
        ours.cluster.refresh()
    }

    // ========================================================================
    // Machines
    // ========================================================================

    /// Starts a new machine in `group`, cut off from every sibling group.
    pub fn add_machine(&mut self, group: GroupId, name: Option<&str>) -> Result<EntityHandle> {
        let entry = self.group(group)?;
        let io = entry.cluster.io();
        let ports = io.ports.reserve()?;

        let mut transaction = PathTransaction::new(Arc::clone(&io.blocker), PathChange::Block);
        for sibling in &entry.siblings {
            for local_peer_port in self.group(*sibling)?.cluster.local_peer_ports() {
                transaction.apply(local_peer_port, ports.peer_port)?;
            }
        }
        for peer_port in &entry.blocked_ports {
            transaction.apply(ports.local_peer_port, *peer_port)?;
        }
        let siblings = entry.siblings.clone();

        let id = self.group_mut(group)?.cluster.launch_machine(ports, name)?;
        transaction.commit();
        for sibling in &siblings {
            self.group_mut(*sibling)?.blocked_ports.insert(ports.peer_port);
        }
        info!(%group, %id, peer_port = ports.peer_port, "machine added to partition");

        let cluster = &mut self.group_mut(group)?.cluster;
        cluster.refresh()?;
        Ok(cluster.issue_handle(EntityKind::Machine, id))
    }

    /// Adopts an externally started machine; only possible while `group` is
    /// not split from any other group.
    pub fn add_existing_machine(&mut self, group: GroupId, machine: Machine) -> Result<EntityHandle> {
        let entry = self.group_mut(group)?;
        if !entry.siblings.is_empty() {
            return Err(Error::PartitionPrecondition(format!(
                "{group} is split from {} other groups; external machines cannot be cut off",
                entry.siblings.len()
            )));
        }
        entry.cluster.add_existing_machine(machine)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Unblocks every path still cut and shuts every group's machines down.
    /// Idempotent; returns the first failure.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_error = None;
        for (index, group) in self.groups.iter_mut().enumerate() {
            let Some(group) = group else {
                continue;
            };
            let blocker = Arc::clone(&group.cluster.io().blocker);
            for local_peer_port in group.cluster.local_peer_ports() {
                for peer_port in &group.blocked_ports {
                    if let Err(err) = blocker.unblock(local_peer_port, *peer_port) {
                        warn!(group = %GroupId(index), local_peer_port, peer_port, error = %err, "failed to unblock path");
                        first_error.get_or_insert(Error::Block(err));
                    }
                }
            }
            group.blocked_ports.clear();
            if let Err(err) = group.cluster.shutdown() {
                first_error.get_or_insert(err);
            }
        }
        info!(groups = self.groups().count(), "partition simulator shut down");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for PartitionSimulator {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "partition simulator shutdown on drop failed");
        }
    }
}
