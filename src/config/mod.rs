//! Configuration management for mockrtc-bridge

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Extension directory configuration
    #[serde(default)]
    pub extension: ExtensionConfig,

    /// Discovery retry configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Proxy settings used to derive the per-instance config key
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Directly configured peer (skips per-instance discovery)
    #[serde(default)]
    pub peer: PeerConfig,

    /// Admin transport configuration
    #[serde(default)]
    pub admin: AdminConfig,

    /// Relay endpoint configuration
    #[serde(default)]
    pub relay: RelayConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionConfig {
    /// Directory holding the `config/<key>` files written by the controller
    #[serde(default = "default_extension_dir")]
    pub dir: PathBuf,

    /// Fetch `config/<key>` from this base URL instead of the directory
    #[serde(default)]
    pub config_base_url: Option<String>,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            dir: default_extension_dir(),
            config_base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Delay between failed discovery attempts, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl DiscoveryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy host; when unset the proxy is read from the environment
    #[serde(default)]
    pub host: Option<String>,

    /// Proxy port
    #[serde(default)]
    pub port: Option<u16>,

    /// Fall back to `http_proxy`-style environment variables
    #[serde(default = "default_true")]
    pub from_env: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            from_env: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PeerConfig {
    /// Peer id on a directly started mock server
    #[serde(default)]
    pub peer_id: Option<String>,

    /// Admin URL of that server
    #[serde(default)]
    pub admin_url: Option<String>,
}

impl PeerConfig {
    pub fn is_static(&self) -> bool {
        self.peer_id.is_some() && self.admin_url.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Per-request timeout for admin queries, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl AdminConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Bind address for the relay endpoint
    #[serde(default = "default_relay_host")]
    pub host: String,

    /// Bind port for the relay endpoint
    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// WebSocket path pages connect to
    #[serde(default = "default_relay_path")]
    pub path: String,

    /// Requests a single page connection may have in flight
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            port: default_relay_port(),
            path: default_relay_path(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.discovery.retry_delay_ms == 0 {
            return Err("Discovery retry delay must be non-zero".into());
        }

        if self.admin.request_timeout_ms == 0 {
            return Err("Admin request timeout must be non-zero".into());
        }

        if self.relay.port == 0 {
            return Err("Relay port must be non-zero".into());
        }

        if self.relay.max_in_flight == 0 {
            return Err("Relay max_in_flight must be non-zero".into());
        }

        if !self.relay.path.starts_with('/') {
            return Err("Relay path must start with '/'".into());
        }

        if self.proxy.host.is_some() != self.proxy.port.is_some() {
            return Err("Proxy host and port must be set together".into());
        }

        if self.peer.peer_id.is_some() != self.peer.admin_url.is_some() {
            return Err("Peer id and admin URL must be set together".into());
        }

        if let Some(ref url) = self.peer.admin_url {
            if reqwest::Url::parse(url).is_err() {
                return Err("Peer admin_url must be an absolute URL".into());
            }
        }

        if let Some(ref url) = self.extension.config_base_url {
            if reqwest::Url::parse(url).is_err() {
                return Err("Extension config_base_url must be an absolute URL".into());
            }
        }

        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_extension_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_retry_delay_ms() -> u64 { 1000 }
fn default_request_timeout_ms() -> u64 { 10_000 }
fn default_relay_port() -> u16 { 45457 }
fn default_max_in_flight() -> usize { 64 }

fn default_relay_host() -> String {
    "127.0.0.1".to_string()
}

fn default_relay_path() -> String {
    "/relay".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
