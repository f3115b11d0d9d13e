//! Layered configuration for every meshline subsystem.
//!
//! Each subsystem owns one `*Config` struct with a `Default` impl carrying
//! the values named in the external-interfaces table of the specification.
//! They are aggregated under [`MeshlineConfig`], which is loaded with
//! precedence defaults < config file (TOML) < environment variables
//! (prefixed `MESHLINE_`) < values set explicitly by the caller (typically
//! CLI flags, applied after `MeshlineConfig::load`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

fn duration_millis(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

mod duration_secs_serde {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        value.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_millis_serde {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        value.as_millis().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Per-peer supervisor configuration consumed by the layered connection
/// manager. `max_retries`/`retry_delay` are accepted for forward
/// compatibility but not consulted by the current supervisor algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(with = "duration_secs_serde")]
    pub connection_timeout: Duration,
    pub max_retries: u32,
    #[serde(with = "duration_secs_serde")]
    pub retry_delay: Duration,
    #[serde(with = "duration_millis_serde")]
    pub health_check_interval: Duration,
    #[serde(with = "duration_millis_serde")]
    pub factory_stagger: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connection_timeout: duration_secs(30),
            max_retries: 3,
            retry_delay: duration_secs(5),
            health_check_interval: duration_secs(5),
            factory_stagger: duration_millis(500),
        }
    }
}

/// STUN-media (unrelayed direct P2P) connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StunMediaConfig {
    pub stun_servers: Vec<String>,
}

impl Default for StunMediaConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun.l.google.com:19302".to_string()],
        }
    }
}

/// Relayed-media (TURN-backed) connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    pub url: String,
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayedMediaConfig {
    pub turn_servers: Vec<TurnServer>,
}

/// Direct-stream (raw TCP upgrade) connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectStreamConfig {
    pub direct_ports: Vec<u16>,
}

impl Default for DirectStreamConfig {
    fn default() -> Self {
        Self {
            direct_ports: vec![7000, 7001, 7002, 7003],
        }
    }
}

/// Polling (HTTP request/response) connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(with = "duration_secs_serde")]
    pub poll_interval: Duration,
    pub default_http_port: u16,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval: duration_secs(2),
            default_http_port: 8088,
        }
    }
}

/// LAN-broadcast (UDP datagram) connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanBroadcastConfig {
    pub lan_listen_port: u16,
    pub lan_broadcast_port: u16,
}

impl Default for LanBroadcastConfig {
    fn default() -> Self {
        Self {
            lan_listen_port: 9998,
            lan_broadcast_port: 9999,
        }
    }
}

/// Signaling relay bind configuration, plus the client-side address used to
/// dial a (possibly remote) relay when bootstrapping a media connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    pub bind_address: String,
    pub port: u16,
    /// Websocket base URL a rendezvous client dials to reach the relay
    /// bootstrapping this node's media connections. Defaults to this
    /// node's own relay; override when peers share a third-party relay
    /// instead of each hosting one.
    pub connect_url: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9000,
            connect_url: "ws://127.0.0.1:9000".to_string(),
        }
    }
}

/// Persistent message log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data/meshline-log".to_string(),
        }
    }
}

/// Structured-logging verbosity; layered over `RUST_LOG` by the CLI binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Root configuration aggregating every subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshlineConfig {
    #[serde(default)]
    pub peer_id: Option<String>,
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub stun_media: StunMediaConfig,
    #[serde(default)]
    pub relayed_media: RelayedMediaConfig,
    #[serde(default)]
    pub direct_stream: DirectStreamConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub lan_broadcast: LanBroadcastConfig,
    #[serde(default)]
    pub signaling: SignalingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MeshlineConfig {
    /// Load configuration with precedence defaults < `path` (if it exists)
    /// < environment variables prefixed `MESHLINE_` (double-underscore
    /// separated, e.g. `MESHLINE_MANAGER__MAX_RETRIES`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        let defaults_value = config::Config::try_from(&defaults)?;

        let mut builder = config::Config::builder().add_source(defaults_value);

        if let Some(path) = path {
            if std::path::Path::new(path).exists() {
                builder = builder.add_source(config::File::with_name(path));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("MESHLINE")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = MeshlineConfig::default();
        assert_eq!(config.manager.connection_timeout, duration_secs(30));
        assert_eq!(config.lan_broadcast.lan_listen_port, 9998);
        assert_eq!(config.lan_broadcast.lan_broadcast_port, 9999);
        assert_eq!(config.polling.poll_interval, duration_secs(2));
    }

    #[test]
    fn load_without_file_falls_back_to_defaults() {
        let config = MeshlineConfig::load(Some("/nonexistent/meshline.toml")).unwrap();
        assert_eq!(config.manager.max_retries, 3);
    }
}
