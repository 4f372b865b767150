//! Reachability cuts between peer ports.

use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::BlockError;

/// Default address of the firewall daemon.
pub const DEFAULT_BLOCKER_ADDR: &str = "127.0.0.1:46594";

/// Blocks and unblocks traffic from a node's local peer port to another node's peer port.
///
/// Both operations are idempotent.
pub trait PathBlocker: Send + Sync {
    fn block(&self, from_port: u16, to_port: u16) -> Result<(), BlockError>;

    fn unblock(&self, from_port: u16, to_port: u16) -> Result<(), BlockError>;
}

/// [`PathBlocker`] sending `block <from> <to>` lines to a firewall daemon.
#[derive(Debug, Clone)]
pub struct DaemonPathBlocker {
    addr: String,
    timeout: Duration,
}

impl DaemonPathBlocker {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn failure(&self, reason: impl ToString) -> BlockError {
        BlockError::Daemon {
            addr: self.addr.clone(),
            reason: reason.to_string(),
        }
    }

    fn resolve(&self) -> Result<SocketAddr, BlockError> {
        self.addr
            .to_socket_addrs()
            .map_err(|e| self.failure(e))?
            .next()
            .ok_or_else(|| self.failure("address resolved to nothing"))
    }

    fn send(&self, verb: &str, from_port: u16, to_port: u16) -> Result<(), BlockError> {
        let addr = self.resolve()?;
        let mut stream = TcpStream::connect_timeout(&addr, self.timeout).map_err(|e| self.failure(e))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| self.failure(e))?;
        stream
            .write_all(format!("{verb} {from_port} {to_port}\n").as_bytes())
            .map_err(|e| self.failure(e))?;
        debug!(verb, from_port, to_port, "path change sent");
        Ok(())
    }
}

impl Default for DaemonPathBlocker {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCKER_ADDR, Duration::from_secs(5))
    }
}

impl PathBlocker for DaemonPathBlocker {
    fn block(&self, from_port: u16, to_port: u16) -> Result<(), BlockError> {
        self.send("block", from_port, to_port)
    }

    fn unblock(&self, from_port: u16, to_port: u16) -> Result<(), BlockError> {
        self.send("unblock", from_port, to_port)
    }
}
