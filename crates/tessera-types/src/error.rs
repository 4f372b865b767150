//! Error types for topology entities.

use thiserror::Error;

use crate::EntityKind;

/// Errors raised while decoding or mutating topology entities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Text that is not an identifier in canonical form.
    #[error("invalid identifier {0:?}: expected 36 characters in 8-4-4-4-12 hexadecimal groups")]
    InvalidIdentifier(String),

    /// Shard set invariant violation.
    #[error("invalid shard set: {0}")]
    Shard(#[from] ShardError),

    /// Field not carried by this entity kind.
    #[error("{kind} has no field {field:?}")]
    UnknownField { kind: EntityKind, field: String },

    /// Field value of the wrong shape.
    #[error("invalid value for field {field:?}: {reason}")]
    InvalidField { field: String, reason: String },

    /// Required field absent from an entity payload.
    #[error("missing field {field:?} in {kind} payload")]
    MissingField { kind: EntityKind, field: String },

    /// Snapshot document with an unexpected structure.
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),
}

/// Shard set invariant violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardError {
    /// Keyed shard character outside `a..=z`.
    #[error("invalid character {0:?} in keyed shard")]
    InvalidCharacter(char),

    /// Keyed character held by more than one shard.
    #[error("character {0:?} appears in more than one shard")]
    Overlap(char),

    /// Keyed shard with no characters.
    #[error("keyed shards must not be empty")]
    EmptyShard,

    /// Keyed shards leave part of the alphabet unassigned.
    #[error("keyed shards do not cover {0:?}")]
    Uncovered(String),

    /// Shard or split point not present.
    #[error("shard {0:?} is not present")]
    NotFound(String),

    /// Removing the last remaining shard.
    #[error("cannot remove the only shard")]
    LastShard,

    /// Split point already present.
    #[error("split point {0:?} is already present")]
    DuplicateSplit(String),

    /// Split point that is empty or not a word.
    #[error("invalid split point {0:?}")]
    InvalidSplit(String),

    /// Range entry that is not a `[lower, upper]` pair.
    #[error("malformed range shard entry {0:?}")]
    MalformedRange(String),

    /// Range entries that do not chain from `""` to an open upper bound.
    #[error("range shards do not chain: {0}")]
    BrokenChain(String),

    /// Split points out of ascending order.
    #[error("split point {0:?} is out of order")]
    Unordered(String),

    /// Shard payload that is not a list of strings.
    #[error("shards must be a list of strings")]
    NotAList,

    /// Shard set applied to a namespace of the other kind.
    #[error("{expected} shards cannot be applied to a {actual}")]
    KindMismatch { expected: EntityKind, actual: EntityKind },
}
