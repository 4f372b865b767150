//! Cluster controller configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tessera_admin::{AdminTimeouts, DEFAULT_BLOCKER_ADDR, LauncherConfig};

use crate::{Error, Result};

/// Inclusive range of ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn pick(&self, rng: &mut impl Rng) -> u16 {
        rng.gen_range(self.start..=self.end)
    }
}

/// How long to wait for the cluster to converge after a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    /// Pause before the first verification attempt.
    pub delay_ms: u64,
    /// Retries stop once this much time has passed since the first attempt.
    pub timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl SettleConfig {
    /// No waiting and no retries.
    pub fn immediate() -> Self {
        Self {
            delay_ms: 0,
            timeout_ms: 0,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms.max(1))
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms).max(1))
    }
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            delay_ms: 200,
            timeout_ms: 10_000,
            initial_backoff_ms: 50,
            max_backoff_ms: 1_000,
        }
    }
}

/// Configuration of a cluster controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Host every locally started node runs on.
    pub host: String,

    /// Base port (node N peers on base + N, connects out from base - N - 1).
    /// Picked from `base_port_range` when absent.
    pub base_port: Option<u16>,

    pub base_port_range: PortRange,

    /// Range random namespace ports are drawn from.
    pub namespace_port_range: PortRange,

    /// Admin port = peer port + this offset.
    pub admin_port_offset: u16,

    /// Seed of the controller's random source; entropy when absent.
    pub seed: Option<u64>,

    pub settle: SettleConfig,

    /// Extra pause after a join before re-verifying.
    pub join_settle_ms: u64,

    pub admin: AdminTimeouts,

    pub launcher: LauncherConfig,

    /// Address of the firewall daemon that cuts peer paths.
    pub blocker_addr: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            base_port: None,
            base_port_range: PortRange::new(20_000, 60_000),
            namespace_port_range: PortRange::new(10_000, 20_000),
            admin_port_offset: 1_000,
            seed: None,
            settle: SettleConfig::default(),
            join_settle_ms: 5_000,
            admin: AdminTimeouts::default(),
            launcher: LauncherConfig::default(),
            blocker_addr: DEFAULT_BLOCKER_ADDR.to_string(),
        }
    }
}

impl ClusterConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!("{} does not exist", path.display())));
        }
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (label, range) in [
            ("base_port_range", self.base_port_range),
            ("namespace_port_range", self.namespace_port_range),
        ] {
            if range.start > range.end {
                return Err(Error::Config(format!(
                    "{label} is empty ({}..={})",
                    range.start, range.end
                )));
            }
        }
        if self.base_port == Some(0) || self.base_port_range.start == 0 {
            return Err(Error::Config("base port must leave room for local peer ports".to_string()));
        }
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        Ok(())
    }

    /// Random source of a controller built from this configuration.
    pub fn rng(&self) -> SmallRng {
        match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        }
    }

    pub fn join_settle(&self) -> Duration {
        Duration::from_millis(self.join_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClusterConfig::default();
        config.validate().unwrap();
        assert_eq!(config.admin_port_offset, 1_000);
        assert_eq!(config.launcher.stop_timeout_ms, 15_000);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cluster").join("tessera.toml");
        let config = ClusterConfig {
            base_port: Some(31_000),
            seed: Some(7),
            settle: SettleConfig::immediate(),
            ..ClusterConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = ClusterConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tessera.toml");
        fs::write(&path, "host = \"db-host\"\n\n[settle]\ndelay_ms = 5\n").unwrap();

        let loaded = ClusterConfig::load(&path).unwrap();
        assert_eq!(loaded.host, "db-host");
        assert_eq!(loaded.settle.delay_ms, 5);
        assert_eq!(loaded.settle.timeout_ms, SettleConfig::default().timeout_ms);
        assert_eq!(loaded.namespace_port_range, ClusterConfig::default().namespace_port_range);
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            ClusterConfig::load(&temp.path().join("absent.toml")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        let config = ClusterConfig {
            namespace_port_range: PortRange::new(20, 10),
            ..ClusterConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_seeded_rng_is_deterministic() {
        let config = ClusterConfig {
            seed: Some(42),
            ..ClusterConfig::default()
        };
        let range = config.namespace_port_range;
        assert_eq!(range.pick(&mut config.rng()), range.pick(&mut config.rng()));
    }
}
