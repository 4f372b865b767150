use std::fmt::{self, Display};

use serde_json::Value;

use crate::{EntityKind, Identifier, ModelError};

/// Identity of a value conflict: the disputed field of one entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConflictKey {
    pub kind: EntityKind,
    pub id: Identifier,
    pub field: String,
}

impl ConflictKey {
    pub fn new(kind: EntityKind, id: Identifier, field: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            field: field.into(),
        }
    }

    /// Route of the resolve endpoint for this field.
    pub fn resolve_path(&self) -> String {
        format!("/ajax/{}/{}/{}/resolve", self.kind.route_prefix(), self.id, self.field)
    }
}

impl Display for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} field {:?}", self.kind, self.id, self.field)
    }
}

/// A field whose value diverged between partitions and awaits resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueConflict {
    key: ConflictKey,
    candidates: Vec<Value>,
}

impl ValueConflict {
    /// Creates a conflict, keeping the first occurrence of each candidate.
    pub fn new(key: ConflictKey, candidates: impl IntoIterator<Item = Value>) -> Self {
        let mut distinct: Vec<Value> = Vec::new();
        for candidate in candidates {
            if !distinct.contains(&candidate) {
                distinct.push(candidate);
            }
        }
        Self {
            key,
            candidates: distinct,
        }
    }

    /// Builds a conflict from a resolve listing of `[version, value]` pairs.
    pub fn from_resolve_listing(key: ConflictKey, listing: &Value) -> Result<Self, ModelError> {
        let malformed = || ModelError::InvalidField {
            field: key.field.clone(),
            reason: format!("unexpected resolve listing {listing}"),
        };
        let entries = listing.as_array().ok_or_else(malformed)?;
        let candidates = entries
            .iter()
            .map(|entry| entry.as_array().and_then(|pair| pair.get(1)).cloned().ok_or_else(malformed))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(key, candidates))
    }

    pub fn key(&self) -> &ConflictKey {
        &self.key
    }

    pub fn target_kind(&self) -> EntityKind {
        self.key.kind
    }

    pub fn target_id(&self) -> Identifier {
        self.key.id
    }

    pub fn field(&self) -> &str {
        &self.key.field
    }

    pub fn candidates(&self) -> &[Value] {
        &self.candidates
    }

    pub fn is_candidate(&self, value: &Value) -> bool {
        self.candidates.contains(value)
    }
}

impl Display for ValueConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "value conflict on {} with possible values", self.key)?;
        for (i, candidate) in self.candidates.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{candidate}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> ConflictKey {
        ConflictKey::new(EntityKind::Datacenter, Identifier::random(), "name")
    }

    #[test]
    fn test_candidates_deduplicated_in_order() {
        let listing = json!([[3, "west"], [1, "east"], [2, "west"]]);
        let conflict = ValueConflict::from_resolve_listing(key(), &listing).unwrap();
        assert_eq!(conflict.candidates(), [json!("west"), json!("east")]);
        assert!(conflict.is_candidate(&json!("east")));
        assert!(!conflict.is_candidate(&json!("north")));
    }

    #[test]
    fn test_malformed_listing() {
        assert!(ValueConflict::from_resolve_listing(key(), &json!({"a": 1})).is_err());
        assert!(ValueConflict::from_resolve_listing(key(), &json!([["only-version"]])).is_err());
    }

    #[test]
    fn test_resolve_path() {
        let key = key();
        assert_eq!(key.resolve_path(), format!("/ajax/datacenters/{}/name/resolve", key.id));
    }
}
