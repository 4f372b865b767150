//! Collaborators shared by every controller of one test cluster.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use tessera_admin::{AdminClient, DaemonPathBlocker, HttpAdminClient, NodeLauncher, PathBlocker, ProcessLauncher};

use crate::{ClusterConfig, Error, Result};

/// Ports assigned to one locally started node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePorts {
    pub peer_port: u16,
    /// Source port of the node's outgoing peer connections.
    pub local_peer_port: u16,
    pub port_offset: u16,
}

/// Hands out node ports around a base port.
///
/// Node `n` listens on `base + n` and connects out from `base - n - 1`, so a
/// single counter never produces colliding ports. Shared between partition
/// groups.
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    issued: AtomicU16,
}

impl PortAllocator {
    pub fn new(base: u16) -> Self {
        Self {
            base,
            issued: AtomicU16::new(0),
        }
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    /// Number of nodes reserved so far.
    pub fn issued(&self) -> u16 {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn reserve(&self) -> Result<NodePorts> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let peer_port = self.base.checked_add(n).ok_or(Error::PortOverflow {
            port: self.base,
            offset: n,
        })?;
        let local_peer_port = n
            .checked_add(1)
            .and_then(|below| self.base.checked_sub(below))
            .filter(|port| *port > 0)
            .ok_or(Error::PortsExhausted(self.base))?;
        Ok(NodePorts {
            peer_port,
            local_peer_port,
            port_offset: n,
        })
    }
}

/// The admin client, node launcher, path blocker and port allocator.
#[derive(Clone)]
pub struct ClusterIo {
    pub admin: Arc<dyn AdminClient>,
    pub launcher: Arc<dyn NodeLauncher>,
    pub blocker: Arc<dyn PathBlocker>,
    pub ports: Arc<PortAllocator>,
}

impl ClusterIo {
    pub fn new(
        admin: Arc<dyn AdminClient>,
        launcher: Arc<dyn NodeLauncher>,
        blocker: Arc<dyn PathBlocker>,
        ports: Arc<PortAllocator>,
    ) -> Self {
        Self {
            admin,
            launcher,
            blocker,
            ports,
        }
    }

    /// Real processes, HTTP and the firewall daemon.
    ///
    /// The base port comes from the configuration or, failing that, from the
    /// configured range using the seeded random source.
    pub fn production(config: &ClusterConfig) -> Self {
        let base = config
            .base_port
            .unwrap_or_else(|| config.base_port_range.pick(&mut config.rng()));
        Self {
            admin: Arc::new(HttpAdminClient::new(&config.admin)),
            launcher: Arc::new(ProcessLauncher::new(config.launcher.clone())),
            blocker: Arc::new(DaemonPathBlocker::new(
                config.blocker_addr.clone(),
                Duration::from_millis(config.admin.connect_timeout_ms),
            )),
            ports: Arc::new(PortAllocator::new(base)),
        }
    }
}

impl fmt::Debug for ClusterIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterIo").field("ports", &self.ports).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ports_mirror_around_base() {
        let ports = PortAllocator::new(30_000);
        assert_eq!(
            ports.reserve().unwrap(),
            NodePorts {
                peer_port: 30_000,
                local_peer_port: 29_999,
                port_offset: 0,
            }
        );
        let second = ports.reserve().unwrap();
        assert_eq!((second.peer_port, second.local_peer_port, second.port_offset), (30_001, 29_998, 1));
        assert_eq!(ports.issued(), 2);
    }

    #[test]
    fn test_ports_exhausted() {
        let ports = PortAllocator::new(2);
        assert!(ports.reserve().is_ok());
        assert!(matches!(ports.reserve(), Err(Error::PortsExhausted(2))));
    }

    #[test]
    fn test_peer_port_overflow() {
        let ports = PortAllocator::new(u16::MAX);
        assert!(ports.reserve().is_ok());
        assert!(matches!(ports.reserve(), Err(Error::PortOverflow { .. })));
    }
}
