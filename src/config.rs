use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Environment variable naming a YAML config file.
pub const CONFIG_ENV: &str = "WEBSERV_CONFIG";

/// Environment variable overriding `server.listen_addr`.
pub const LISTEN_ENV: &str = "LISTEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub workers: WorkerConfig,
    pub static_files: StaticFilesConfig,
    pub log: LogConfig,
}

/// Which sockets are registered edge-triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Listener and connections level-triggered.
    Level,
    /// Connections edge-triggered, listener level-triggered.
    ConnectionEdge,
    /// Listener edge-triggered, connections level-triggered.
    ListenerEdge,
    /// Both edge-triggered.
    #[default]
    Edge,
}

impl TriggerMode {
    pub fn listener_edge(self) -> bool {
        matches!(self, TriggerMode::ListenerEdge | TriggerMode::Edge)
    }

    pub fn connection_edge(self) -> bool {
        matches!(self, TriggerMode::ConnectionEdge | TriggerMode::Edge)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub trigger_mode: TriggerMode,
    /// Idle connection timeout. `0` disables eviction.
    pub idle_timeout_ms: u64,
    pub linger: bool,
    pub max_connections: usize,
    pub max_events: usize,
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            trigger_mode: TriggerMode::Edge,
            idle_timeout_ms: 60_000,
            linger: false,
            max_connections: 65_536,
            max_events: 1024,
            backlog: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub threads: usize,
    /// Pending task limit. `0` means unbounded.
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            queue_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    pub root: PathBuf,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./resources"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub level: String,
    /// Log directory. Logs go to stdout when unset.
    pub dir: Option<PathBuf>,
    pub suffix: String,
    /// Records buffered for the background writer. `0` writes inline.
    pub queue_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            dir: None,
            suffix: ".log".to_string(),
            queue_capacity: 1024,
        }
    }
}

impl Config {
    /// Defaults, overlaid with the file named by `WEBSERV_CONFIG` and the
    /// `LISTEN` address override.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        if let Ok(addr) = std::env::var(LISTEN_ENV) {
            cfg.server.listen_addr = addr;
        }
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }
}
