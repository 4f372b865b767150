//! Consistency verification of the mirror against the live cluster.
//!
//! One pass runs in three steps:
//!
//! 1. every reachable machine must serve the same snapshot (minus `me`);
//! 2. entities the snapshot has and the mirror lacks are pulled in, machines
//!    as placeholders; an entity the snapshot lacks fails the pass;
//! 3. every field of every verifiable entity is audited: conflict-marked
//!    fields become value conflicts, fields whose conflict disappeared are
//!    adopted, and anything else must match the mirror.
//!
//! Passes run under the settle policy, so an inconsistent or unreachable
//! cluster is retried until the timeout.

use serde_json::{Value, json};
use tessera_admin::Method;
use tessera_types::{
    ClusterSnapshot, ConflictKey, Datacenter, EntityKind, Identifier, Machine, Namespace, TopologyEntity,
    ValueConflict, WireObject, is_conflict_marker,
};
use tracing::{debug, info, warn};

use crate::cluster::StagedEntity;
use crate::settle::settle;
use crate::{Cluster, Error, Result};

fn materialize(kind: EntityKind, id: Identifier, payload: &WireObject) -> Result<StagedEntity> {
    Ok(match kind {
        EntityKind::Machine => StagedEntity::Machine(Machine::placeholder(id)),
        EntityKind::Datacenter => StagedEntity::Datacenter(Datacenter::from_wire(id, payload)?),
        EntityKind::Namespace(namespace_kind) => {
            StagedEntity::Namespace(Namespace::from_wire(id, namespace_kind, payload)?)
        }
    })
}

/// Outcome of auditing one remote field.
#[derive(Debug)]
enum Audit {
    /// Field carries the conflict marker and no conflict is tracked yet.
    NewConflict(ConflictKey),
    /// A tracked conflict was resolved on another controller.
    Resolved(ConflictKey, Value),
}

impl Cluster {
    /// Verifies the mirror against every reachable machine.
    pub fn refresh(&mut self) -> Result<()> {
        self.settle_and_verify()
    }

    pub(crate) fn settle_and_verify(&mut self) -> Result<()> {
        let policy = self.config().settle.clone();
        settle(&policy, || self.update_cluster_data())
    }

    fn update_cluster_data(&mut self) -> Result<()> {
        let snapshot = self.verify_consistent()?;
        self.pull(&snapshot)?;
        self.audit(&snapshot)
    }

    /// Fetches the command machine's snapshot and checks every other
    /// reachable machine serves the same one.
    fn verify_consistent(&self) -> Result<ClusterSnapshot> {
        let mut expected = self.query(Method::Get, "/ajax", None)?;
        ClusterSnapshot::take_me(&mut expected)?;

        for machine in self.reachable_machines() {
            let id = machine.id();
            let mut actual = self.query_machine(id, Method::Get, "/ajax")?;
            let me = ClusterSnapshot::take_me(&mut actual)?;
            if me != id {
                return Err(Error::inconsistent(json!({ "me": id.to_string() }), json!({ "me": me.to_string() })));
            }
            if actual != expected {
                return Err(Error::inconsistent(expected, actual));
            }
        }
        Ok(ClusterSnapshot::from_json(&expected)?)
    }

    /// Materializes entities only the cluster knows about.
    ///
    /// Nothing is inserted unless the snapshot covers every tracked entity
    /// and every new entity decodes.
    fn pull(&mut self, snapshot: &ClusterSnapshot) -> Result<()> {
        for kind in EntityKind::ALL {
            let deleted = self.entity_ids(kind).into_iter().find(|id| !snapshot.contains(kind, *id));
            if let Some(id) = deleted {
                let local = self.entity(kind, id).map_or(Value::Null, |entity| entity.to_json());
                return Err(Error::inconsistent(
                    json!({ kind.route_prefix(): { id.to_string(): local } }),
                    json!({ kind.route_prefix(): {} }),
                ));
            }
        }

        let mut pulled = Vec::new();
        for kind in EntityKind::ALL {
            for (id, payload) in snapshot.collection(kind) {
                if self.entity(kind, *id).is_none() {
                    pulled.push(materialize(kind, *id, payload)?);
                }
            }
        }
        for entity in pulled {
            debug!(kind = %entity.kind(), id = %entity.id(), "pulled entity from cluster");
            self.commit(entity);
        }
        Ok(())
    }

    /// Checks every field of every verifiable entity against the snapshot.
    fn audit(&mut self, snapshot: &ClusterSnapshot) -> Result<()> {
        let mut findings = Vec::new();
        for kind in EntityKind::ALL {
            for (id, remote) in snapshot.collection(kind) {
                let Some(local) = self.entity(kind, *id).filter(|entity| entity.is_verifiable()) else {
                    continue;
                };
                for (field, value) in remote {
                    let key = ConflictKey::new(kind, *id, field.as_str());
                    let tracked = self.conflicts.contains(&key);
                    if is_conflict_marker(value) {
                        if !tracked {
                            findings.push(Audit::NewConflict(key));
                        }
                    } else if tracked {
                        findings.push(Audit::Resolved(key, value.clone()));
                    } else if !local.field_matches(field, value) {
                        return Err(Error::inconsistent(local.to_json(), Value::Object(remote.clone())));
                    }
                }
            }
        }

        for finding in findings {
            match finding {
                Audit::NewConflict(key) => {
                    let listing = self.query(Method::Get, &key.resolve_path(), None)?;
                    let conflict = ValueConflict::from_resolve_listing(key, &listing)?;
                    warn!(%conflict, "value conflict detected");
                    self.conflicts.insert(conflict);
                }
                Audit::Resolved(key, value) => {
                    if let Some(mut staged) = self.stage(key.kind, key.id) {
                        staged.apply_field(&key.field, &value)?;
                        self.commit(staged);
                    }
                    self.conflicts.remove(&key);
                    info!(%key, %value, "value conflict resolved elsewhere");
                }
            }
        }
        Ok(())
    }
}
