//! mockrtc-bridge - MockRTC peer connection manager
//!
//! Discovers the MockRTC peer configured for the current proxy, keeps a
//! connection to its admin server alive across failures, and relays page
//! requests to it over a local WebSocket.

pub mod admin;
pub mod config;
pub mod discovery;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod peer;
pub mod relay;

// Re-exports
pub use config::Config;
pub use error::{BridgeError, Result};
pub use manager::{ConnectionState, HostControl, PeerConnectionManager};
pub use relay::{run_relay_server, ForwardingGate};
