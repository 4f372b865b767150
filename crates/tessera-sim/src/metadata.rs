//! Versioned cluster metadata held by each simulated node.
//!
//! Every write gets a fresh version whose ancestors are all versions the
//! writing node had seen. Merging two copies keeps, per field, the heads that
//! no other head descends from; more than one surviving head is a conflict.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::{Map, Value};
use tessera_types::{CONFLICT_MARKER, EntityKind, Identifier};

pub(crate) type Version = u64;

/// Causal history of every write in the simulation.
#[derive(Debug, Default)]
pub(crate) struct VersionLog {
    next: Version,
    ancestors: HashMap<Version, BTreeSet<Version>>,
}

impl VersionLog {
    fn record(&mut self, seen: &BTreeSet<Version>) -> Version {
        self.next += 1;
        self.ancestors.insert(self.next, seen.clone());
        self.next
    }

    fn descends(&self, later: Version, earlier: Version) -> bool {
        self.ancestors.get(&later).is_some_and(|set| set.contains(&earlier))
    }
}

/// Concurrent values of one field.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FieldState {
    heads: BTreeMap<Version, Value>,
}

impl FieldState {
    pub(crate) fn is_conflicted(&self) -> bool {
        self.heads.len() > 1
    }

    pub(crate) fn render(&self) -> Value {
        match self.heads.values().next() {
            Some(value) if !self.is_conflicted() => value.clone(),
            Some(_) => Value::String(CONFLICT_MARKER.to_string()),
            None => Value::Null,
        }
    }

    /// `[version, value]` pairs, as served by the resolve route.
    pub(crate) fn listing(&self) -> Value {
        Value::Array(
            self.heads
                .iter()
                .map(|(version, value)| Value::Array(vec![Value::from(*version), value.clone()]))
                .collect(),
        )
    }

    fn prune(&mut self, log: &VersionLog) {
        let versions: Vec<Version> = self.heads.keys().copied().collect();
        self.heads
            .retain(|v, _| !versions.iter().any(|other| other != v && log.descends(*other, *v)));
    }
}

type Fields = BTreeMap<String, FieldState>;

/// One node's copy of the cluster metadata.
#[derive(Debug, Clone, Default)]
pub(crate) struct Metadata {
    entities: BTreeMap<EntityKind, BTreeMap<Identifier, Fields>>,
    seen: BTreeSet<Version>,
}

impl Metadata {
    pub(crate) fn write(&mut self, log: &mut VersionLog, kind: EntityKind, id: Identifier, field: &str, value: Value) {
        let version = log.record(&self.seen);
        self.seen.insert(version);
        let fields = self.entities.entry(kind).or_default().entry(id).or_default();
        fields.insert(
            field.to_string(),
            FieldState {
                heads: BTreeMap::from([(version, value)]),
            },
        );
    }

    pub(crate) fn merge(&mut self, other: &Metadata, log: &VersionLog) {
        self.seen.extend(other.seen.iter().copied());
        for (kind, collection) in &other.entities {
            let mine = self.entities.entry(*kind).or_default();
            for (id, fields) in collection {
                let my_fields = mine.entry(*id).or_default();
                for (field, state) in fields {
                    match my_fields.get_mut(field) {
                        Some(existing) => {
                            existing.heads.extend(state.heads.iter().map(|(v, value)| (*v, value.clone())));
                            existing.prune(log);
                        }
                        None => {
                            my_fields.insert(field.clone(), state.clone());
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn remove(&mut self, kind: EntityKind, id: Identifier) -> bool {
        self.entities.get_mut(&kind).is_some_and(|c| c.remove(&id).is_some())
    }

    pub(crate) fn contains(&self, kind: EntityKind, id: Identifier) -> bool {
        self.entities.get(&kind).is_some_and(|c| c.contains_key(&id))
    }

    pub(crate) fn field(&self, kind: EntityKind, id: Identifier, field: &str) -> Option<&FieldState> {
        self.entities.get(&kind)?.get(&id)?.get(field)
    }

    pub(crate) fn render_entity(&self, kind: EntityKind, id: Identifier) -> Option<Value> {
        let fields = self.entities.get(&kind)?.get(&id)?;
        Some(Value::Object(
            fields
                .iter()
                .map(|(name, state)| (name.clone(), state.render()))
                .collect(),
        ))
    }

    pub(crate) fn render_collection(&self, kind: EntityKind) -> Value {
        let mut collection = Map::new();
        for id in self.entities.get(&kind).into_iter().flat_map(BTreeMap::keys) {
            if let Some(entity) = self.render_entity(kind, *id) {
                collection.insert(id.to_string(), entity);
            }
        }
        Value::Object(collection)
    }

    pub(crate) fn ids(&self, kind: EntityKind) -> Vec<Identifier> {
        self.entities.get(&kind).map(|c| c.keys().copied().collect()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_later_write_wins_after_merge() {
        let mut log = VersionLog::default();
        let id = Identifier::random();
        let mut a = Metadata::default();
        a.write(&mut log, EntityKind::Datacenter, id, "name", json!("old"));
        let mut b = a.clone();
        b.write(&mut log, EntityKind::Datacenter, id, "name", json!("new"));

        a.merge(&b, &log);
        let state = a.field(EntityKind::Datacenter, id, "name").unwrap();
        assert!(!state.is_conflicted());
        assert_eq!(state.render(), json!("new"));
    }

    #[test]
    fn test_concurrent_writes_conflict_until_resolved() {
        let mut log = VersionLog::default();
        let id = Identifier::random();
        let mut a = Metadata::default();
        a.write(&mut log, EntityKind::Datacenter, id, "name", json!("dc"));
        let mut b = a.clone();
        a.write(&mut log, EntityKind::Datacenter, id, "name", json!("east"));
        b.write(&mut log, EntityKind::Datacenter, id, "name", json!("west"));

        a.merge(&b, &log);
        let state = a.field(EntityKind::Datacenter, id, "name").unwrap();
        assert!(state.is_conflicted());
        assert_eq!(state.render(), json!(CONFLICT_MARKER));
        assert_eq!(state.listing().as_array().unwrap().len(), 2);

        a.write(&mut log, EntityKind::Datacenter, id, "name", json!("east"));
        b.merge(&a, &log);
        assert_eq!(b.field(EntityKind::Datacenter, id, "name").unwrap().render(), json!("east"));
    }
}
