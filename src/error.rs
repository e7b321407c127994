//! Error types shared across the bridge

use serde_json::Value;
use thiserror::Error;

/// Message surfaced to the page once interception is switched off.
pub const DISABLED_MESSAGE: &str = "MockRTC interception disabled";

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Interception was explicitly disabled; terminal until restart
    #[error("MockRTC interception disabled")]
    Disabled,

    /// No usable proxy settings for this instance
    #[error("Could not detect proxy settings, can't intercept WebRTC")]
    ProxyUnavailable,

    /// The per-instance config could not be read or fetched
    #[error("No WebExtension config available for {key}")]
    ConfigUnavailable { key: String },

    /// The per-instance config was readable but not understood
    #[error("Invalid WebExtension config for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    /// The admin endpoint could not be reached or answered badly
    #[error("Admin request failed: {0}")]
    AdminUnavailable(String),

    /// The admin endpoint answered with a GraphQL error list
    #[error("Unexpected GraphQL errors")]
    GraphQl(Vec<Value>),

    /// The page sent something outside the permitted method set
    #[error("Invalid relay request: {0}")]
    InvalidRequest(String),
}

impl BridgeError {
    /// Whether this failure should trigger rediscovery and a retry rather
    /// than being reported to the caller.
    pub fn is_recoverable(&self) -> bool {
        match self {
            BridgeError::ProxyUnavailable
            | BridgeError::ConfigUnavailable { .. }
            | BridgeError::InvalidConfig { .. }
            | BridgeError::AdminUnavailable(_) => true,
            BridgeError::Disabled | BridgeError::GraphQl(_) | BridgeError::InvalidRequest(_) => {
                false
            }
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        BridgeError::InvalidRequest(msg.into())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::AdminUnavailable(err.to_string())
    }
}
