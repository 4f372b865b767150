//! # tessera-admin: collaborators of the Tessera cluster controller
//!
//! The controller never talks to the outside world directly. It goes
//! through three narrow traits, each with one production implementation:
//!
//! - [`AdminClient`]: JSON requests against a node's admin interface
//!   ([`HttpAdminClient`], blocking `ureq`)
//! - [`NodeLauncher`] / [`NodeHandle`]: database node processes
//!   ([`ProcessLauncher`], `std::process` with SIGINT/SIGKILL escalation)
//! - [`PathBlocker`]: cuts reachability between peer ports
//!   ([`DaemonPathBlocker`], a line protocol to a firewall daemon)
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │           tessera-cluster          │
//! └──────┬──────────────┬──────────┬───┘
//!        │              │          │
//! ┌──────┴─────┐ ┌──────┴─────┐ ┌──┴──────────┐
//! │AdminClient │ │NodeLauncher│ │ PathBlocker │
//! └────────────┘ └────────────┘ └─────────────┘
//! ```

mod blocker;
mod client;
mod error;
mod node;

pub use blocker::{DEFAULT_BLOCKER_ADDR, DaemonPathBlocker, PathBlocker};
pub use client::{AdminClient, AdminTimeouts, HttpAdminClient, Method};
pub use error::{AdminError, BlockError, NodeError};
pub use node::{BuildMode, LauncherConfig, LogSink, NodeHandle, NodeLauncher, NodeSpec, ProcessHandle, ProcessLauncher};
