//! Error types for the cluster controller.

use serde_json::Value;
use tessera_admin::{AdminError, BlockError, NodeError};
use tessera_types::{EntityKind, Identifier, ModelError};
use thiserror::Error;

use crate::GroupId;

/// Cluster controller errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Entity decoding or invariant violation.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Admin request failure, including unreachable nodes.
    #[error(transparent)]
    Admin(#[from] AdminError),

    /// Node process failure.
    #[error(transparent)]
    Node(#[from] NodeError),

    /// Path blocker failure.
    #[error(transparent)]
    Block(#[from] BlockError),

    /// Machine already tracked as known.
    #[error("machine {0} is already part of this cluster")]
    ServerExists(Identifier),

    /// Machine the controller cannot address.
    #[error("no information about machine {0}; it was probably added to the cluster elsewhere")]
    InvalidServer(Identifier),

    /// No known, running machine to send commands to.
    #[error("no reachable machine to issue commands against")]
    NoReachableMachine,

    /// Nodes disagree with each other or with the local mirror.
    #[error("cluster is inconsistent\nexpected: {expected}\nactual: {actual}")]
    InconsistentCluster { expected: Box<Value>, actual: Box<Value> },

    /// Name lookup matching more than one entity.
    #[error("{count} {what}s are named {name:?}")]
    AmbiguousReference {
        what: &'static str,
        name: String,
        count: usize,
    },

    /// Lookup matching nothing.
    #[error("no {what} matches {reference}")]
    UnknownReference { what: &'static str, reference: String },

    /// Handle issued by a different controller.
    #[error("{kind} {id} belongs to a different cluster")]
    ForeignEntity { kind: EntityKind, id: Identifier },

    /// Conflict missing or value not among its candidates.
    #[error("conflict precondition violated: {0}")]
    ConflictPrecondition(String),

    /// Split, join or machine add that would corrupt partition bookkeeping.
    #[error("partition precondition violated: {0}")]
    PartitionPrecondition(String),

    /// Partition group no longer (or never) in the arena.
    #[error("unknown partition group {0}")]
    UnknownGroup(GroupId),

    /// Admin response of an unexpected shape.
    #[error("unexpected admin response: {0}")]
    UnexpectedResponse(String),

    /// Port arithmetic past `u16::MAX`.
    #[error("port {port} plus offset {offset} overflows")]
    PortOverflow { port: u16, offset: u16 },

    /// Port allocator ran out of local peer ports.
    #[error("no node ports left below base port {0}")]
    PortsExhausted(u16),

    /// Provisioning layout that cannot be built.
    #[error("invalid cluster layout: {0}")]
    Layout(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    pub(crate) fn inconsistent(expected: Value, actual: Value) -> Self {
        Error::InconsistentCluster {
            expected: Box::new(expected),
            actual: Box::new(actual),
        }
    }

    /// Whether the settle policy should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::InconsistentCluster { .. } | Error::Admin(AdminError::Unreachable { .. })
        )
    }

    /// Status code of a failed admin request, if that is what this is.
    pub fn admin_status(&self) -> Option<u16> {
        match self {
            Error::Admin(AdminError::RequestFailed { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, Error>;
