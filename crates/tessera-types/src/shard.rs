//! Shard sets of keyed and range namespaces.
//!
//! Both variants travel as a JSON list of strings. Keyed shards render each
//! subset of the alphabet as `"{a, b, c}"`; range shards render each interval
//! as a JSON pair `["lower", "upper"]`, the last one open (`null`).

use std::collections::BTreeSet;

use serde_json::Value;

use crate::{EntityKind, NamespaceKind, ShardError};

/// Characters a keyed namespace partitions.
pub const KEYED_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz";

/// Shard set of either namespace kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardSet {
    Keyed(KeyedShards),
    Range(RangeShards),
}

impl ShardSet {
    /// Shard set of a freshly created namespace: one shard holding everything.
    pub fn whole(kind: NamespaceKind) -> Self {
        match kind {
            NamespaceKind::Keyed => ShardSet::Keyed(KeyedShards::whole()),
            NamespaceKind::Range => ShardSet::Range(RangeShards::default()),
        }
    }

    /// Parses the wire rendering for a namespace of the given kind.
    pub fn parse(kind: NamespaceKind, value: &Value) -> Result<Self, ShardError> {
        let items = string_list(value)?;
        match kind {
            NamespaceKind::Keyed => KeyedShards::parse(&items).map(ShardSet::Keyed),
            NamespaceKind::Range => RangeShards::parse(&items).map(ShardSet::Range),
        }
    }

    pub fn kind(&self) -> NamespaceKind {
        match self {
            ShardSet::Keyed(_) => NamespaceKind::Keyed,
            ShardSet::Range(_) => NamespaceKind::Range,
        }
    }

    pub fn to_strings(&self) -> Vec<String> {
        match self {
            ShardSet::Keyed(shards) => shards.to_strings(),
            ShardSet::Range(shards) => shards.to_strings(),
        }
    }

    pub fn to_json(&self) -> Value {
        Value::from(self.to_strings())
    }

    /// Adds a keyed subset or a range split point.
    pub fn add_shard(&mut self, shard: &str) -> Result<(), ShardError> {
        match self {
            ShardSet::Keyed(shards) => shards.add_shard(shard),
            ShardSet::Range(shards) => shards.add_split(shard),
        }
    }

    /// Removes a keyed subset or a range split point.
    pub fn remove_shard(&mut self, shard: &str) -> Result<(), ShardError> {
        match self {
            ShardSet::Keyed(shards) => shards.remove_shard(shard),
            ShardSet::Range(shards) => shards.remove_split(shard),
        }
    }
}

fn string_list(value: &Value) -> Result<Vec<&str>, ShardError> {
    value
        .as_array()
        .ok_or(ShardError::NotAList)?
        .iter()
        .map(|item| item.as_str().ok_or(ShardError::NotAList))
        .collect()
}

// ============================================================================
// Keyed shards
// ============================================================================

/// Disjoint, covering partition of [`KEYED_ALPHABET`] into non-empty subsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedShards {
    shards: Vec<BTreeSet<char>>,
}

impl KeyedShards {
    pub fn whole() -> Self {
        Self {
            shards: vec![KEYED_ALPHABET.chars().collect()],
        }
    }

    /// Builds a shard set, checking the partition invariants.
    pub fn new(shards: Vec<BTreeSet<char>>) -> Result<Self, ShardError> {
        let mut seen = BTreeSet::new();
        for shard in &shards {
            if shard.is_empty() {
                return Err(ShardError::EmptyShard);
            }
            for &c in shard {
                if !KEYED_ALPHABET.contains(c) {
                    return Err(ShardError::InvalidCharacter(c));
                }
                if !seen.insert(c) {
                    return Err(ShardError::Overlap(c));
                }
            }
        }
        let missing: String = KEYED_ALPHABET.chars().filter(|c| !seen.contains(c)).collect();
        if !missing.is_empty() {
            return Err(ShardError::Uncovered(missing));
        }
        Ok(Self { shards })
    }

    pub fn parse<S: AsRef<str>>(items: &[S]) -> Result<Self, ShardError> {
        let shards = items
            .iter()
            .map(|item| parse_subset(item.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(shards)
    }

    pub fn shards(&self) -> &[BTreeSet<char>] {
        &self.shards
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.shards
            .iter()
            .map(|shard| {
                let chars: Vec<String> = shard.iter().map(char::to_string).collect();
                format!("{{{}}}", chars.join(", "))
            })
            .collect()
    }

    /// Carves `subset` out of the existing shards and appends it as a new shard.
    pub fn add_shard(&mut self, subset: &str) -> Result<(), ShardError> {
        let subset = parse_subset(subset)?;
        if subset.is_empty() {
            return Err(ShardError::EmptyShard);
        }
        for shard in &mut self.shards {
            shard.retain(|c| !subset.contains(c));
        }
        self.shards.retain(|shard| !shard.is_empty());
        self.shards.push(subset);
        Ok(())
    }

    /// Removes an existing shard, folding its characters into the first remaining one.
    pub fn remove_shard(&mut self, subset: &str) -> Result<(), ShardError> {
        let subset_chars = parse_subset(subset)?;
        let position = self
            .shards
            .iter()
            .position(|shard| *shard == subset_chars)
            .ok_or_else(|| ShardError::NotFound(subset.to_string()))?;
        if self.shards.len() == 1 {
            return Err(ShardError::LastShard);
        }
        let removed = self.shards.remove(position);
        self.shards[0].extend(removed);
        Ok(())
    }
}

/// Parses one keyed subset, ignoring braces, commas and spaces.
fn parse_subset(text: &str) -> Result<BTreeSet<char>, ShardError> {
    let mut subset = BTreeSet::new();
    for c in text.chars().filter(|c| !matches!(c, '{' | '}' | ',' | ' ')) {
        if !KEYED_ALPHABET.contains(c) {
            return Err(ShardError::InvalidCharacter(c));
        }
        subset.insert(c);
    }
    Ok(subset)
}

// ============================================================================
// Range shards
// ============================================================================

/// Strictly ascending split points of a range namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeShards {
    splits: Vec<String>,
}

impl RangeShards {
    pub fn new(splits: Vec<String>) -> Result<Self, ShardError> {
        for split in &splits {
            validate_split(split)?;
        }
        if let Some(pair) = splits.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(ShardError::Unordered(pair[1].clone()));
        }
        Ok(Self { splits })
    }

    /// Parses the wire form; an empty list is a single unbounded shard.
    pub fn parse<S: AsRef<str>>(items: &[S]) -> Result<Self, ShardError> {
        let mut splits = Vec::new();
        let mut lower = String::new();
        let mut closed = false;
        for item in items {
            let item = item.as_ref();
            if closed {
                return Err(ShardError::BrokenChain(format!("{item:?} follows the open interval")));
            }
            let (start, end): (String, Option<String>) =
                serde_json::from_str(item).map_err(|_| ShardError::MalformedRange(item.to_string()))?;
            if start != lower {
                return Err(ShardError::BrokenChain(format!(
                    "expected lower bound {lower:?}, found {start:?}"
                )));
            }
            match end {
                Some(upper) => {
                    validate_split(&upper)?;
                    if upper <= lower {
                        return Err(ShardError::Unordered(upper));
                    }
                    splits.push(upper.clone());
                    lower = upper;
                }
                None => closed = true,
            }
        }
        if !closed && !items.is_empty() {
            return Err(ShardError::BrokenChain("missing open upper bound".to_string()));
        }
        Ok(Self { splits })
    }

    pub fn splits(&self) -> &[String] {
        &self.splits
    }

    pub fn to_strings(&self) -> Vec<String> {
        let mut lower = String::new();
        let mut items = Vec::with_capacity(self.splits.len() + 1);
        for split in &self.splits {
            items.push(format!("[{}, {}]", Value::from(lower.as_str()), Value::from(split.as_str())));
            lower.clone_from(split);
        }
        items.push(format!("[{}, null]", Value::from(lower)));
        items
    }

    pub fn add_split(&mut self, split: &str) -> Result<(), ShardError> {
        validate_split(split)?;
        match self.splits.binary_search_by(|existing| existing.as_str().cmp(split)) {
            Ok(_) => Err(ShardError::DuplicateSplit(split.to_string())),
            Err(index) => {
                self.splits.insert(index, split.to_string());
                Ok(())
            }
        }
    }

    pub fn remove_split(&mut self, split: &str) -> Result<(), ShardError> {
        let index = self
            .splits
            .iter()
            .position(|existing| existing == split)
            .ok_or_else(|| ShardError::NotFound(split.to_string()))?;
        self.splits.remove(index);
        Ok(())
    }
}

fn validate_split(split: &str) -> Result<(), ShardError> {
    let is_word = !split.is_empty() && split.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if is_word {
        Ok(())
    } else {
        Err(ShardError::InvalidSplit(split.to_string()))
    }
}

impl From<KeyedShards> for ShardSet {
    fn from(shards: KeyedShards) -> Self {
        ShardSet::Keyed(shards)
    }
}

impl From<RangeShards> for ShardSet {
    fn from(shards: RangeShards) -> Self {
        ShardSet::Range(shards)
    }
}

pub(crate) fn kind_mismatch(expected: NamespaceKind, actual: NamespaceKind) -> ShardError {
    ShardError::KindMismatch {
        expected: EntityKind::Namespace(expected),
        actual: EntityKind::Namespace(actual),
    }
}
