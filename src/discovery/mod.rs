//! Peer discovery
//!
//! Locates this instance's MockRTC configuration. Many browsers may share a
//! single extension directory, each intercepted through a different proxy
//! port, so the proxy address is used as the key under which the controller
//! writes each instance's config file.

pub mod proxy;
pub mod source;

pub use proxy::{EnvProxy, NoProxy, ProxyAddress, ProxySource, StaticProxy};
pub use source::{ConfigSource, FileConfigSource, HttpConfigSource};

use crate::error::{BridgeError, Result};
use futures::future::BoxFuture;
use log::debug;
use serde::Deserialize;
use std::sync::Arc;

/// Connection parameters for a remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerParams {
    pub peer_id: String,
    pub admin_base_url: String,
}

/// Outcome of a successful discovery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovered {
    /// The controller explicitly switched interception off
    Disabled,
    Peer(PeerParams),
}

/// One discovery attempt. Errors are transient and retried by the caller.
pub trait Discovery: Send + Sync {
    fn discover(&self) -> BoxFuture<'_, Result<Discovered>>;
}

/// Derive a file-name-safe key from a proxy address.
///
/// `.` becomes `_` and `:` becomes `.`, so `127.0.0.1:8000` maps to
/// `127_0_0_1.8000`. Characters that would collide with that scheme or
/// escape the config directory are percent-escaped, which keeps the mapping
/// injective.
pub fn config_key(host: &str, port: u16) -> String {
    let address = format!("{}:{}", host, port);
    let mut key = String::with_capacity(address.len());
    for c in address.chars() {
        match c {
            '.' => key.push('_'),
            ':' => key.push('.'),
            '_' => key.push_str("%5F"),
            '%' => key.push_str("%25"),
            '/' => key.push_str("%2F"),
            '\\' => key.push_str("%5C"),
            other => key.push(other),
        }
    }
    key
}

/// Per-instance config file written by the controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectedConfig {
    pub mock_rtc: MockRtcSetting,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MockRtcSetting {
    Endpoint(MockRtcEndpoint),
    Flag(bool),
}

#[derive(Debug, Clone, Deserialize)]
pub struct MockRtcEndpoint {
    #[serde(rename = "peerId")]
    pub peer_id: String,
    #[serde(rename = "adminBaseUrl", alias = "mockRtcUrl")]
    pub admin_base_url: String,
}

impl InjectedConfig {
    /// Parse the raw config body fetched for `key`.
    pub fn parse(key: &str, body: &[u8]) -> Result<Discovered> {
        let config: InjectedConfig =
            serde_json::from_slice(body).map_err(|e| BridgeError::InvalidConfig {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        config.into_discovered(key)
    }

    fn into_discovered(self, key: &str) -> Result<Discovered> {
        let invalid = |reason: &str| BridgeError::InvalidConfig {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        match self.mock_rtc {
            MockRtcSetting::Flag(false) => Ok(Discovered::Disabled),
            MockRtcSetting::Flag(true) => Err(invalid("mockRtc must be false or an object")),
            MockRtcSetting::Endpoint(endpoint) => {
                if endpoint.peer_id.is_empty() {
                    return Err(invalid("empty peerId"));
                }
                if endpoint.admin_base_url.is_empty() {
                    return Err(invalid("empty adminBaseUrl"));
                }
                Ok(Discovered::Peer(PeerParams {
                    peer_id: endpoint.peer_id,
                    admin_base_url: endpoint.admin_base_url,
                }))
            }
        }
    }
}

/// Discovery through the proxy-keyed config file.
pub struct ExtensionDiscovery {
    proxy: Arc<dyn ProxySource>,
    source: Arc<dyn ConfigSource>,
}

impl ExtensionDiscovery {
    pub fn new(proxy: Arc<dyn ProxySource>, source: Arc<dyn ConfigSource>) -> Self {
        Self { proxy, source }
    }

    async fn discover_once(&self) -> Result<Discovered> {
        let address = self.proxy.proxy_address().ok_or(BridgeError::ProxyUnavailable)?;
        let key = address.config_key();
        debug!("Looking up config for proxy {} (key {})", address, key);

        let body = self.source.fetch(&key).await?;
        InjectedConfig::parse(&key, &body)
    }
}

impl Discovery for ExtensionDiscovery {
    fn discover(&self) -> BoxFuture<'_, Result<Discovered>> {
        Box::pin(self.discover_once())
    }
}

/// A directly configured mock server; always yields the same peer.
pub struct StaticDiscovery {
    params: PeerParams,
}

impl StaticDiscovery {
    pub fn new(peer_id: impl Into<String>, admin_base_url: impl Into<String>) -> Self {
        Self {
            params: PeerParams {
                peer_id: peer_id.into(),
                admin_base_url: admin_base_url.into(),
            },
        }
    }
}

impl Discovery for StaticDiscovery {
    fn discover(&self) -> BoxFuture<'_, Result<Discovered>> {
        let params = self.params.clone();
        Box::pin(async move { Ok(Discovered::Peer(params)) })
    }
}
