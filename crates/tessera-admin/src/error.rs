//! Collaborator error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from admin interface requests.
#[derive(Error, Debug)]
pub enum AdminError {
    /// The node answered with a non-success status.
    #[error("admin request failed: {status} {reason}")]
    RequestFailed { status: u16, reason: String },

    /// The node could not be reached at all.
    #[error("admin endpoint {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    /// The node answered with a body that is not JSON.
    #[error("invalid admin response: {0}")]
    InvalidResponse(String),
}

/// Errors from starting or stopping node processes.
#[derive(Error, Debug)]
pub enum NodeError {
    /// No database binary at any of the searched locations.
    #[error("database binary not found (searched {searched:?})")]
    BinaryNotFound { searched: Vec<PathBuf> },

    /// Process could not be started or exited during setup.
    #[error("failed to spawn node: {0}")]
    Spawn(String),

    /// Fresh start over data left behind by an earlier node.
    #[error("node data directory {} already exists", .0.display())]
    DataDirExists(PathBuf),

    /// Restart of a node whose data is gone.
    #[error("node data directory {} does not exist", .0.display())]
    DataDirMissing(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Signal delivery failed.
    #[error("failed to signal node process {pid}: {status}")]
    Signal { pid: u32, status: String },
}

/// Errors from the path blocker.
#[derive(Error, Debug)]
pub enum BlockError {
    /// The blocking daemon refused or could not be reached.
    #[error("path blocker at {addr} failed: {reason}")]
    Daemon { addr: String, reason: String },
}
