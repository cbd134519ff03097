//! Node configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (WEFT_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use weft_endpoint::EndpointConfig;

/// Node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to listen on for peerings.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on for peerings.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Endpoint tuning.
    #[serde(default)]
    pub endpoint: EndpointSection,

    /// Peers to dial at startup.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    /// Topic prefixes this node subscribes to and logs.
    #[serde(default)]
    pub subscribe: SubscribeConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Endpoint tuning section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSection {
    /// Keepalive PING interval in milliseconds.
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// Session timeout in milliseconds.
    #[serde(default = "default_keepalive_timeout_ms")]
    pub keepalive_timeout_ms: u64,

    /// Largest accepted frame in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Default subscriber queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Status bus ring capacity.
    #[serde(default = "default_status_capacity")]
    pub status_capacity: usize,

    /// Stamp published messages with a hop budget.
    #[serde(default)]
    pub enable_hop_ttl: bool,

    /// Hop budget used when hop TTL is enabled.
    #[serde(default = "default_max_hops")]
    pub max_hops: u8,
}

/// A peer to dial at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub host: String,
    pub port: u16,
    /// Retry interval in seconds; absent means a single attempt.
    #[serde(default)]
    pub retry_secs: Option<u64>,
}

/// Subscriptions of this node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubscribeConfig {
    /// Topic prefixes to subscribe to.
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Exporter port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("WEFT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("WEFT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9999)
}

fn default_true() -> bool {
    true
}

fn default_keepalive_interval_ms() -> u64 {
    10_000
}

fn default_keepalive_timeout_ms() -> u64 {
    30_000
}

fn default_max_frame_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_queue_capacity() -> usize {
    20
}

fn default_status_capacity() -> usize {
    512
}

fn default_max_hops() -> u8 {
    16
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            endpoint: EndpointSection::default(),
            peers: Vec::new(),
            subscribe: SubscribeConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: default_keepalive_interval_ms(),
            keepalive_timeout_ms: default_keepalive_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            queue_capacity: default_queue_capacity(),
            status_capacity: default_status_capacity(),
            enable_hop_ttl: false,
            max_hops: default_max_hops(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl EndpointSection {
    /// Translate into the endpoint's configuration record.
    #[must_use]
    pub fn to_endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            keepalive_interval: Duration::from_millis(self.keepalive_interval_ms),
            keepalive_timeout: Duration::from_millis(self.keepalive_timeout_ms),
            max_frame_bytes: self.max_frame_bytes,
            default_queue_capacity: self.queue_capacity,
            status_queue_capacity: self.status_capacity,
            enable_hop_ttl: self.enable_hop_ttl,
            max_hops: self.max_hops,
            ..EndpointConfig::default()
        }
    }
}

impl PeerConfig {
    /// Retry interval, if configured.
    #[must_use]
    pub fn retry(&self) -> Option<Duration> {
        self.retry_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Load configuration from the default file locations, falling
    /// back to defaults with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = ["weft.toml", "/etc/weft/weft.toml", "~/.config/weft/weft.toml"];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
