/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Runtime configuration for broker and network agents.
//!
//! # Example Configuration File
//!
//! ```toml
//! [network]
//! bind_addr = "0.0.0.0"
//! port = 3333
//!
//! [limits]
//! max_frame_size = 16777216  # 16 MiB
//! max_connections = 1024
//! queue_capacity = 1024
//! session_buffer = 64
//!
//! [timeouts]
//! handshake_timeout_ms = 10000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OefError;
use crate::protocol::{AGENTS_PORT, MAX_FRAME_SIZE};

/// Configuration for the broker and the agent-side network proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OefConfig {
    /// Listening address and port.
    pub network: NetworkConfig,
    /// Frame, queue, and connection limits.
    pub limits: LimitsConfig,
    /// Timeout configuration.
    pub timeouts: TimeoutsConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the broker binds to.
    pub bind_addr: String,

    /// TCP port agents connect to. Port 0 binds an ephemeral port.
    pub port: u16,
}

/// Limits for framing and session handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum frame payload size in bytes.
    pub max_frame_size: usize,

    /// Maximum concurrent broker sessions. The broker opens one file
    /// descriptor per session; raise the process FD limit for large fleets.
    pub max_connections: usize,

    /// Capacity of the broker dispatch queue.
    pub queue_capacity: usize,

    /// Capacity of each session's outbound write queue.
    pub session_buffer: usize,
}

/// Timeout configuration. All values are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Handshake timeout in milliseconds. Applies to the whole exchange on
    /// both sides; an unresponsive peer fails the handshake instead of
    /// blocking the caller forever.
    #[serde(rename = "handshake_timeout_ms")]
    pub handshake: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: AGENTS_PORT,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            max_connections: 1024,
            queue_capacity: 1024,
            session_buffer: 64,
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            handshake: 10_000, // 10 seconds
        }
    }
}

impl OefConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`OefError::Io`] when the file cannot be read and
    /// [`OefError::Serialization`] when it does not parse.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, OefError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| OefError::Io(format!("{}: {e}", path.as_ref().display())))?;
        toml::from_str(&raw).map_err(|e| OefError::Serialization(e.to_string()))
    }

    /// The handshake timeout as a `Duration`.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.handshake)
    }

    /// The broker bind address as `host:port`.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.network.bind_addr, self.network.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OefConfig::default();
        assert_eq!(config.network.port, AGENTS_PORT);
        assert_eq!(config.limits.max_frame_size, MAX_FRAME_SIZE);
        assert_eq!(config.limits.max_connections, 1024);
        assert_eq!(config.timeouts.handshake, 10_000);
    }

    #[test]
    fn test_handshake_timeout_duration() {
        let config = OefConfig::default();
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_bind_address() {
        let mut config = OefConfig::default();
        config.network.bind_addr = "127.0.0.1".to_string();
        config.network.port = 4000;
        assert_eq!(config.bind_address(), "127.0.0.1:4000");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: OefConfig = toml::from_str(
            r#"
            [network]
            port = 4001

            [timeouts]
            handshake_timeout_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.network.port, 4001);
        assert_eq!(config.network.bind_addr, "0.0.0.0");
        assert_eq!(config.timeouts.handshake, 500);
        assert_eq!(config.limits.queue_capacity, 1024);
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = OefConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: OefConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.limits.max_connections, config.limits.max_connections);
    }
}
