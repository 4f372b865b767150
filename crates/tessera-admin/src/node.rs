//! Node process management.

use std::fmt::Debug;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tessera_types::Endpoint;
use tracing::{debug, info, warn};

use crate::NodeError;

/// Everything needed to start (or restart) one database node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub host: String,
    /// Port the node listens on for peer traffic.
    pub peer_port: u16,
    /// Source port of the node's outgoing peer connections.
    pub local_peer_port: u16,
    pub port_offset: u16,
    pub name: Option<String>,
    /// Existing node to join; its peer port is used.
    pub join: Option<Endpoint>,
    /// Start from the node's existing data instead of creating it.
    pub restart: bool,
}

/// A started node.
pub trait NodeHandle: Send + Debug {
    /// Stops the node, keeping its data for a later restart. Idempotent.
    fn stop(&mut self) -> Result<(), NodeError>;

    fn is_alive(&mut self) -> bool;

    /// Stops the node and discards its data.
    fn destroy(&mut self) -> Result<(), NodeError> {
        self.stop()
    }
}

/// Starts database nodes.
pub trait NodeLauncher: Send + Sync {
    /// Starts a node. Fresh starts create the node's data and fail if it
    /// already exists; restarts require it.
    fn start(&self, spec: &NodeSpec) -> Result<Box<dyn NodeHandle>, NodeError>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Build flavour of the database binary, which decides `build/<mode>/`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildMode {
    #[default]
    Debug,
    Release,
}

impl BuildMode {
    pub fn dir_name(self) -> &'static str {
        match self {
            BuildMode::Debug => "debug",
            BuildMode::Release => "release",
        }
    }
}

/// Where node output goes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogSink {
    #[default]
    Stdout,
    /// One file per node, `<path>.<peer port>`.
    File(PathBuf),
}

/// Configuration of [`ProcessLauncher`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Explicit binary path; skips the search.
    pub binary: Option<PathBuf>,
    /// File name searched for under `build/<mode>/`.
    pub binary_name: String,
    pub mode: BuildMode,
    /// Parent of the per-node data directories.
    pub work_root: PathBuf,
    pub log_sink: LogSink,
    /// Grace period between SIGINT and SIGKILL.
    pub stop_timeout_ms: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            binary: None,
            binary_name: "clusterd".to_string(),
            mode: BuildMode::default(),
            work_root: PathBuf::from("/tmp/tessera"),
            log_sink: LogSink::default(),
            stop_timeout_ms: 15_000,
        }
    }
}

// ============================================================================
// Process launcher
// ============================================================================

/// [`NodeLauncher`] running the database binary as child processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: LauncherConfig,
}

impl ProcessLauncher {
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Data directory of the node listening on `peer_port`.
    pub fn data_dir(&self, peer_port: u16) -> PathBuf {
        self.config.work_root.join(format!("node-{peer_port}"))
    }

    /// Locates the binary in `build/<mode>/` of the working directory or up to three parents.
    pub fn locate_binary(&self) -> Result<PathBuf, NodeError> {
        if let Some(binary) = &self.config.binary {
            return if binary.is_file() {
                Ok(binary.clone())
            } else {
                Err(NodeError::BinaryNotFound {
                    searched: vec![binary.clone()],
                })
            };
        }
        let cwd = std::env::current_dir()?;
        let relative = Path::new("build")
            .join(self.config.mode.dir_name())
            .join(&self.config.binary_name);
        let searched: Vec<PathBuf> = cwd.ancestors().take(4).map(|dir| dir.join(&relative)).collect();
        searched
            .iter()
            .find(|candidate| candidate.is_file())
            .cloned()
            .ok_or(NodeError::BinaryNotFound { searched })
    }

    fn output(&self, peer_port: u16) -> Result<(Stdio, Stdio), NodeError> {
        match &self.config.log_sink {
            LogSink::Stdout => Ok((Stdio::inherit(), Stdio::inherit())),
            LogSink::File(path) => {
                let mut name = path.as_os_str().to_owned();
                name.push(format!(".{peer_port}"));
                let file = OpenOptions::new().create(true).append(true).open(PathBuf::from(name))?;
                let err = file.try_clone()?;
                Ok((Stdio::from(file), Stdio::from(err)))
            }
        }
    }

    fn create_data_dir(&self, binary: &Path, spec: &NodeSpec, data_dir: &Path) -> Result<(), NodeError> {
        fs::create_dir_all(&self.config.work_root)?;
        let mut command = Command::new(binary);
        command
            .arg("create")
            .arg(format!("--directory={}", data_dir.display()))
            .arg(format!("--port-offset={}", spec.port_offset));
        if let Some(name) = &spec.name {
            command.arg(format!("--name={name}"));
        }
        let (stdout, stderr) = self.output(spec.peer_port)?;
        let status = command.stdin(Stdio::null()).stdout(stdout).stderr(stderr).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(NodeError::Spawn(format!(
                "creating {} exited with {status}",
                data_dir.display()
            )))
        }
    }
}

impl NodeLauncher for ProcessLauncher {
    fn start(&self, spec: &NodeSpec) -> Result<Box<dyn NodeHandle>, NodeError> {
        let data_dir = self.data_dir(spec.peer_port);
        match (spec.restart, data_dir.exists()) {
            (true, false) => return Err(NodeError::DataDirMissing(data_dir)),
            (false, true) => return Err(NodeError::DataDirExists(data_dir)),
            _ => {}
        }
        let binary = self.locate_binary()?;
        if !spec.restart {
            debug!(path = %data_dir.display(), "creating node data directory");
            self.create_data_dir(&binary, spec, &data_dir)?;
        }

        let mut command = Command::new(&binary);
        command
            .arg("serve")
            .arg(format!("--directory={}", data_dir.display()))
            .arg(format!("--port={}", spec.peer_port))
            .arg(format!("--client-port={}", spec.local_peer_port));
        if let Some(join) = &spec.join {
            command.arg(format!("--join={}:{}", join.host, join.peer_port));
        }
        let (stdout, stderr) = self.output(spec.peer_port)?;
        let child = command
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| NodeError::Spawn(e.to_string()))?;

        info!(
            pid = child.id(),
            peer_port = spec.peer_port,
            local_peer_port = spec.local_peer_port,
            "node started"
        );
        Ok(Box::new(ProcessHandle::new(
            child,
            Some(data_dir),
            Duration::from_millis(self.config.stop_timeout_ms),
        )))
    }
}

// ============================================================================
// Process handle
// ============================================================================

/// A running child process, stopped with SIGINT and then SIGKILL.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    data_dir: Option<PathBuf>,
    stop_timeout: Duration,
    stopped: bool,
}

impl ProcessHandle {
    pub fn new(child: Child, data_dir: Option<PathBuf>, stop_timeout: Duration) -> Self {
        Self {
            child,
            data_dir,
            stop_timeout,
            stopped: false,
        }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut backoff = Duration::from_millis(5);
        while Instant::now() < deadline {
            if self.has_exited() {
                return true;
            }
            thread::sleep(backoff);
            backoff = std::cmp::min(backoff.saturating_mul(2), Duration::from_millis(50));
        }
        self.has_exited()
    }
}

impl NodeHandle for ProcessHandle {
    fn stop(&mut self) -> Result<(), NodeError> {
        if self.stopped || self.has_exited() {
            self.stopped = true;
            return Ok(());
        }
        let pid = self.child.id();
        let status = Command::new("kill").args(["-INT", &pid.to_string()]).status()?;
        if !status.success() && !self.has_exited() {
            return Err(NodeError::Signal { pid, status: status.to_string() });
        }
        if !self.wait_for_exit(self.stop_timeout) {
            warn!(pid = self.child.id(), "node ignored SIGINT, sending SIGKILL");
            self.child.kill()?;
            self.child.wait()?;
        }
        self.stopped = true;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        !self.stopped && !self.has_exited()
    }

    fn destroy(&mut self) -> Result<(), NodeError> {
        self.stop()?;
        if let Some(dir) = self.data_dir.take() {
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleeper(seconds: &str) -> Child {
        Command::new("sleep").arg(seconds).spawn().unwrap()
    }

    #[test]
    fn test_stop_running_process() {
        let mut handle = ProcessHandle::new(sleeper("30"), None, Duration::from_secs(5));
        assert!(handle.is_alive());

        handle.stop().unwrap();
        assert!(!handle.is_alive());
        // Stopping twice is a no-op.
        handle.stop().unwrap();
    }

    #[test]
    fn test_exited_process_is_not_alive() {
        let mut handle = ProcessHandle::new(sleeper("0"), None, Duration::from_secs(1));
        assert!(handle.wait_for_exit(Duration::from_secs(5)));
        assert!(!handle.is_alive());
        handle.stop().unwrap();
    }

    #[test]
    fn test_destroy_removes_data_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let data_dir = temp.path().join("node-1");
        fs::create_dir_all(&data_dir).unwrap();

        let mut handle = ProcessHandle::new(sleeper("30"), Some(data_dir.clone()), Duration::from_secs(5));
        handle.destroy().unwrap();
        assert!(!data_dir.exists());
    }

    #[test]
    fn test_missing_explicit_binary() {
        let launcher = ProcessLauncher::new(LauncherConfig {
            binary: Some(PathBuf::from("/nonexistent/clusterd")),
            ..LauncherConfig::default()
        });
        assert!(matches!(
            launcher.locate_binary(),
            Err(NodeError::BinaryNotFound { .. })
        ));
    }

    #[test]
    fn test_binary_search_under_build_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let launcher = ProcessLauncher::new(LauncherConfig {
            mode: BuildMode::Release,
            work_root: temp.path().to_path_buf(),
            ..LauncherConfig::default()
        });
        assert_eq!(launcher.data_dir(30_000), temp.path().join("node-30000"));
        if let Err(NodeError::BinaryNotFound { searched }) = launcher.locate_binary() {
            assert!(!searched.is_empty() && searched.len() <= 4);
            assert!(searched.iter().all(|p| p.ends_with("build/release/clusterd")));
        }
    }

    fn spec(peer_port: u16, restart: bool) -> NodeSpec {
        NodeSpec {
            host: "localhost".to_string(),
            peer_port,
            local_peer_port: peer_port - 1,
            port_offset: 0,
            name: None,
            join: None,
            restart,
        }
    }

    #[test]
    fn test_fresh_start_refuses_stale_data_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let launcher = ProcessLauncher::new(LauncherConfig {
            work_root: temp.path().to_path_buf(),
            ..LauncherConfig::default()
        });
        let stale = launcher.data_dir(30_000);
        fs::create_dir_all(&stale).unwrap();

        assert!(matches!(
            launcher.start(&spec(30_000, false)),
            Err(NodeError::DataDirExists(path)) if path == stale
        ));
        assert!(stale.exists());
    }

    #[test]
    fn test_restart_requires_data_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let launcher = ProcessLauncher::new(LauncherConfig {
            work_root: temp.path().to_path_buf(),
            ..LauncherConfig::default()
        });

        assert!(matches!(
            launcher.start(&spec(30_001, true)),
            Err(NodeError::DataDirMissing(_))
        ));
        assert!(!launcher.data_dir(30_001).exists());
    }

    #[test]
    fn test_log_sink_serde() {
        assert_eq!(serde_json::to_value(LogSink::Stdout).unwrap(), serde_json::json!("stdout"));
        let sink: LogSink = serde_json::from_value(serde_json::json!({"file": "/tmp/node.log"})).unwrap();
        assert_eq!(sink, LogSink::File(PathBuf::from("/tmp/node.log")));
    }
}
