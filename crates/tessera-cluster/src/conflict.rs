//! Value conflicts seen by one controller, and their resolution.

use serde_json::Value;
use tessera_admin::Method;
use tessera_types::{ConflictKey, ValueConflict};
use tracing::info;

use crate::{Cluster, Error, Result};

/// Unresolved value conflicts, at most one per `(entity, field)`.
#[derive(Debug, Clone, Default)]
pub struct ConflictRegistry {
    conflicts: Vec<ValueConflict>,
}

impl ConflictRegistry {
    pub fn as_slice(&self) -> &[ValueConflict] {
        &self.conflicts
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn contains(&self, key: &ConflictKey) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &ConflictKey) -> Option<&ValueConflict> {
        self.conflicts.iter().find(|conflict| conflict.key() == key)
    }

    /// Records a conflict unless one with the same key is already tracked.
    pub(crate) fn insert(&mut self, conflict: ValueConflict) -> bool {
        if self.contains(conflict.key()) {
            return false;
        }
        self.conflicts.push(conflict);
        true
    }

    pub(crate) fn remove(&mut self, key: &ConflictKey) -> Option<ValueConflict> {
        let index = self.conflicts.iter().position(|conflict| conflict.key() == key)?;
        Some(self.conflicts.remove(index))
    }

    pub(crate) fn merge(&mut self, other: ConflictRegistry) {
        for conflict in other.conflicts {
            self.insert(conflict);
        }
    }
}

impl Cluster {
    /// Conflicts observed and not yet resolved, in discovery order.
    pub fn conflicts(&self) -> &[ValueConflict] {
        self.conflicts.as_slice()
    }

    /// Settles a conflict on one of its candidate values.
    ///
    /// The value is decoded into the entity's own representation before it is
    /// sent, so a malformed candidate never reaches the cluster.
    pub fn resolve_conflict(&mut self, key: &ConflictKey, value: Value) -> Result<()> {
        let conflict = self
            .conflicts
            .get(key)
            .ok_or_else(|| Error::ConflictPrecondition(format!("no conflict on {key}")))?;
        if !conflict.is_candidate(&value) {
            return Err(Error::ConflictPrecondition(format!(
                "{value} is not a candidate for {key}"
            )));
        }

        let mut staged = self.stage(key.kind, key.id).ok_or_else(|| {
            Error::ConflictPrecondition(format!("{} {} is no longer tracked", key.kind, key.id))
        })?;
        staged.apply_field(&key.field, &value)?;

        self.query(Method::Post, &key.resolve_path(), Some(&value))?;
        self.conflicts.remove(key);
        self.commit(staged);
        info!(%key, %value, "value conflict resolved");
        self.settle_and_verify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_types::{EntityKind, Identifier};

    fn conflict(id: Identifier, field: &str, candidates: &[&str]) -> ValueConflict {
        ValueConflict::new(
            ConflictKey::new(EntityKind::Datacenter, id, field),
            candidates.iter().map(|c| json!(c)),
        )
    }

    #[test]
    fn test_insert_deduplicates_by_key() {
        let id = Identifier::random();
        let mut registry = ConflictRegistry::default();
        assert!(registry.insert(conflict(id, "name", &["a", "b"])));
        assert!(!registry.insert(conflict(id, "name", &["c"])));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.as_slice()[0].candidates(), [json!("a"), json!("b")]);
    }

    #[test]
    fn test_remove() {
        let id = Identifier::random();
        let mut registry = ConflictRegistry::default();
        registry.insert(conflict(id, "name", &["a", "b"]));
        let key = ConflictKey::new(EntityKind::Datacenter, id, "name");
        assert!(registry.remove(&key).is_some());
        assert!(registry.remove(&key).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_merge_keeps_existing_entries() {
        let id = Identifier::random();
        let mut ours = ConflictRegistry::default();
        ours.insert(conflict(id, "name", &["a", "b"]));
        let mut theirs = ConflictRegistry::default();
        theirs.insert(conflict(id, "name", &["x"]));
        theirs.insert(conflict(Identifier::random(), "name", &["y", "z"]));

        ours.merge(theirs);
        assert_eq!(ours.len(), 2);
        assert_eq!(ours.as_slice()[0].candidates(), [json!("a"), json!("b")]);
    }
}
