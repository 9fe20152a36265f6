//! Link configuration loaded from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::protocol::file::DEFAULT_CHUNK_SIZE;
use crate::state::TargetProfile;
use crate::task::DispatcherSettings;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LinkConfig {
    pub transport: TransportConfig,
    pub queue: QueueConfig,
    pub heartbeat: HeartbeatConfig,
    pub target: TargetConfig,
    pub logging: LoggingConfig,
}

/// Serial endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Port name, e.g. `/dev/ttyACM0` or `COM3`. Empty means "choose later".
    pub port: String,
    pub baud_rate: u32,
    /// How long a single read waits for bytes.
    pub read_timeout_ms: u64,
}

/// Dispatcher queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of queued commands.
    pub capacity: usize,
    /// How long an enqueue waits for space before reporting a full queue.
    pub enqueue_timeout_ms: u64,
    /// How long the dispatcher waits for a command before polling the link.
    pub poll_interval_ms: u64,
    /// How long the dispatcher holds at a flash write for its ack.
    pub flash_timeout_ms: u64,
    /// How long a blocking workflow waits for each reply.
    pub response_timeout_ms: u64,
    /// Send a `Ping` right after connecting so status is known early.
    pub probe_on_connect: bool,
}

/// Keepalive settings. `0` disables either check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    /// Treat the link as failed when nothing arrives for this long.
    pub link_timeout_ms: u64,
}

/// What sits at the other end of the link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub model: String,
    pub patch_base_address: u32,
    pub patch_max_size: u32,
    /// Bytes per `AppendFile` / upload fragment.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            read_timeout_ms: 10,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            enqueue_timeout_ms: 500,
            poll_interval_ms: 5,
            flash_timeout_ms: 5_000,
            response_timeout_ms: 2_000,
            probe_on_connect: true,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            link_timeout_ms: 0,
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        let profile = TargetProfile::default();
        Self {
            model: profile.model,
            patch_base_address: profile.patch_base_address,
            patch_max_size: profile.patch_max_size,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl LinkConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => config,
            Err(LinkError::Config(reason)) => {
                tracing::warn!("invalid config {}: {reason}; using defaults", path.display());
                Self::default()
            }
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Load configuration from a TOML file, reporting every failure.
    pub fn try_load(path: &Path) -> Result<Self, LinkError> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| LinkError::Config(e.to_string()))
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> Result<(), LinkError> {
        let text = Self::default_toml()?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn default_toml() -> Result<String, LinkError> {
        toml::to_string_pretty(&Self::default()).map_err(|e| LinkError::Config(e.to_string()))
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            capacity: self.queue.capacity.max(1),
            enqueue_timeout: Duration::from_millis(self.queue.enqueue_timeout_ms),
            poll_interval: Duration::from_millis(self.queue.poll_interval_ms.max(1)),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.read_timeout_ms)
    }

    pub fn flash_timeout(&self) -> Duration {
        Duration::from_millis(self.queue.flash_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.queue.response_timeout_ms.max(1))
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        non_zero_ms(self.heartbeat.interval_ms)
    }

    pub fn link_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.heartbeat.link_timeout_ms)
    }

    /// Chunk size bounded to what one frame can carry.
    pub fn chunk_size(&self) -> usize {
        // Leave room for the bincode envelope of a memory write.
        let max = crate::packet::MAX_PAYLOAD_SIZE - 64;
        self.target.chunk_size.clamp(1, max)
    }
}

impl TargetConfig {
    pub fn to_profile(&self) -> TargetProfile {
        TargetProfile {
            model: self.model.clone(),
            patch_base_address: self.patch_base_address,
            patch_max_size: self.patch_max_size,
            firmware: None,
        }
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// ── Tests ────────────────────────────────────────────────────────
