//! Configuration for the board client.
//!
//! Settings are read from `.boardsync/boardsync.toml` and layered
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! base_url = "http://localhost:8000"
//! ws_url = "ws://localhost:8000/ws"
//! board_id = 1
//!
//! [connection]
//! ping_interval_secs = 15
//! dead_after_missed = 3
//! base_backoff_ms = 1000
//! max_backoff_ms = 30000
//! max_attempts = 10
//!
//! [mutations]
//! timeout_secs = 10
//! notice_ttl_secs = 5
//! sweep_interval_secs = 5
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::board::supervisor::SupervisorConfig;

pub const CONFIG_DIR: &str = ".boardsync";
pub const CONFIG_FILE: &str = "boardsync.toml";

pub const ENV_SERVER_URL: &str = "BOARDSYNC_SERVER_URL";
pub const ENV_WS_URL: &str = "BOARDSYNC_WS_URL";
pub const ENV_BOARD_ID: &str = "BOARDSYNC_BOARD_ID";

/// Backend endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// WebSocket endpoint; derived from `base_url` when unset.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_board_id")]
    pub board_id: i64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_board_id() -> i64 {
    1
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_url: None,
            board_id: default_board_id(),
        }
    }
}

/// Heartbeat and reconnect tuning for the live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSection {
    /// Seconds between client pings
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Missed intervals before the connection is declared dead
    #[serde(default = "default_dead_after_missed")]
    pub dead_after_missed: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Reconnect attempts before reporting a persistent failure
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_ping_interval_secs() -> u64 {
    15
}

fn default_dead_after_missed() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            dead_after_missed: default_dead_after_missed(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Lifetime of optimistic mutations and the notices they raise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationsSection {
    /// Seconds before an unconfirmed mutation is treated as failed
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Seconds a transient notice stays visible
    #[serde(default = "default_notice_ttl_secs")]
    pub notice_ttl_secs: u64,
    /// Seconds between sweeps for expired pending mutations
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_notice_ttl_secs() -> u64 {
    5
}

fn default_sweep_interval_secs() -> u64 {
    5
}

impl Default for MutationsSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            notice_ttl_secs: default_notice_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Parsed `boardsync.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoardsyncToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub mutations: MutationsSection,
}

impl BoardsyncToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse boardsync.toml")
    }

    /// Load from `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize boardsync.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let conn = &self.connection;

        if conn.ping_interval_secs == 0 {
            warnings.push("connection.ping_interval_secs must be greater than 0".to_string());
        }
        if conn.dead_after_missed < 2 {
            warnings.push(format!(
                "connection.dead_after_missed = {} will drop connections after a single late ping; use 2 or more",
                conn.dead_after_missed
            ));
        }
        if conn.max_backoff_ms < conn.base_backoff_ms {
            warnings.push(format!(
                "connection.max_backoff_ms ({}) is below base_backoff_ms ({})",
                conn.max_backoff_ms, conn.base_backoff_ms
            ));
        }
        if conn.max_attempts == 0 {
            warnings.push("connection.max_attempts = 0 disables reconnection".to_string());
        }
        if self.mutations.timeout_secs == 0 {
            warnings.push("mutations.timeout_secs must be greater than 0".to_string());
        }
        if !self.server.base_url.starts_with("http://")
            && !self.server.base_url.starts_with("https://")
        {
            warnings.push(format!(
                "server.base_url '{}' is not an http(s) URL",
                self.server.base_url
            ));
        }
        if let Some(ws) = &self.server.ws_url
            && !ws.starts_with("ws://")
            && !ws.starts_with("wss://")
        {
            warnings.push(format!("server.ws_url '{}' is not a ws(s) URL", ws));
        }

        warnings
    }
}

/// Derive the WebSocket endpoint from the REST base URL.
pub fn derive_ws_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    let swapped = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        trimmed.to_string()
    };
    format!("{}/ws", swapped)
}

/// CLI overrides, applied last.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub server_url: Option<String>,
    pub ws_url: Option<String>,
    pub board_id: Option<i64>,
}

/// Effective configuration: `boardsync.toml` → environment → CLI.
#[derive(Debug, Clone)]
pub struct BoardsyncConfig {
    /// Path the file layer was read from (it may not exist)
    pub config_path: PathBuf,
    pub toml: BoardsyncToml,
    pub cli: CliOverrides,
}

impl BoardsyncConfig {
    /// Load from the default location under `project_dir`.
    pub fn new(project_dir: &Path) -> Result<Self> {
        Self::from_path(project_dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn from_path(config_path: PathBuf) -> Result<Self> {
        let toml = BoardsyncToml::load_or_default(&config_path)?;
        Ok(Self {
            config_path,
            toml,
            cli: CliOverrides::default(),
        })
    }

    pub fn with_cli(mut self, cli: CliOverrides) -> Self {
        self.cli = cli;
        self
    }

    /// REST base URL (CLI → env → file).
    pub fn base_url(&self) -> String {
        self.cli
            .server_url
            .clone()
            .or_else(|| std::env::var(ENV_SERVER_URL).ok())
            .unwrap_or_else(|| self.toml.server.base_url.clone())
    }

    /// WebSocket URL (CLI → env → file → derived from base URL).
    pub fn ws_url(&self) -> String {
        self.cli
            .ws_url
            .clone()
            .or_else(|| std::env::var(ENV_WS_URL).ok())
            .or_else(|| self.toml.server.ws_url.clone())
            .unwrap_or_else(|| derive_ws_url(&self.base_url()))
    }

    /// Board to open (CLI → env → file). An unparseable env value is ignored.
    pub fn board_id(&self) -> i64 {
        self.cli
            .board_id
            .or_else(|| {
                std::env::var(ENV_BOARD_ID)
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(self.toml.server.board_id)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let conn = &self.toml.connection;
        SupervisorConfig {
            ping_interval: Duration::from_secs(conn.ping_interval_secs.max(1)),
            dead_after_missed: conn.dead_after_missed.max(1),
            base_backoff: Duration::from_millis(conn.base_backoff_ms),
            max_backoff: Duration::from_millis(conn.max_backoff_ms.max(conn.base_backoff_ms)),
            max_attempts: conn.max_attempts,
        }
    }

    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.mutations.timeout_secs.max(1))
    }

    pub fn notice_ttl(&self) -> Duration {
        Duration::from_secs(self.toml.mutations.notice_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.toml.mutations.sweep_interval_secs.max(1))
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
