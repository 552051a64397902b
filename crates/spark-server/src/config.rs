//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conversation::SYSTEM_PROMPT;

pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4096;
pub const DEFAULT_PONG_WAIT_SECS: u64 = 60;
/// Must stay below the pong wait so a probe lands before the peer's deadline.
pub const DEFAULT_PING_PERIOD_SECS: u64 = 54;
pub const DEFAULT_WRITE_WAIT_SECS: u64 = 10;
pub const DEFAULT_TURN_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_WINDOW_LIMIT: usize = 20;

/// Lower bound for every configured period. `tokio::time::interval` panics on zero.
const MIN_PERIOD_SECS: u64 = 1;

fn secs(value: u64) -> Duration {
    Duration::from_secs(value.max(MIN_PERIOD_SECS))
}

/// Per-connection transport limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Outbound mailbox capacity (frames).
    pub mailbox_capacity: usize,
    /// Largest inbound frame accepted, in bytes.
    pub max_frame_bytes: usize,
    /// Read deadline, refreshed on every inbound frame.
    pub pong_wait_secs: u64,
    /// Keepalive probe interval.
    pub ping_period_secs: u64,
    /// Upper bound on a single transport write.
    pub write_wait_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            pong_wait_secs: DEFAULT_PONG_WAIT_SECS,
            ping_period_secs: DEFAULT_PING_PERIOD_SECS,
            write_wait_secs: DEFAULT_WRITE_WAIT_SECS,
        }
    }
}

impl HubConfig {
    pub fn pong_wait(&self) -> Duration {
        secs(self.pong_wait_secs)
    }

    pub fn ping_period(&self) -> Duration {
        secs(self.ping_period_secs)
    }

    pub fn write_wait(&self) -> Duration {
        secs(self.write_wait_secs)
    }
}

/// Chat turn settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub turn_timeout_secs: u64,
    /// Conversation window size, system instruction included.
    pub window_limit: usize,
    pub system_prompt: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            turn_timeout_secs: DEFAULT_TURN_TIMEOUT_SECS,
            window_limit: DEFAULT_WINDOW_LIMIT,
            system_prompt: SYSTEM_PROMPT.to_owned(),
        }
    }
}

impl BridgeConfig {
    pub fn turn_timeout(&self) -> Duration {
        secs(self.turn_timeout_secs)
    }
}

/// Configuration for the hub server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    pub hub: HubConfig,
    pub bridge: BridgeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
            hub: HubConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
