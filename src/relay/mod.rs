//! Page relay
//!
//! Inbound messages from the page:
//! - `{"type": "peer:method", "methodName", "args"}`
//! - `{"type": "session:method", "sessionId", "methodName", "args"}`
//!
//! Outbound: `{"type": "result", "result"}` or `{"type": "error", "message"}`.
//! An optional `id` on a request is echoed on its response.

pub mod methods;
pub mod server;

pub use methods::{
    PeerCall, PeerOutcome, RelayOutcome, RelayRequest, SessionCall, SessionMethod, SessionOutcome,
};
pub use server::{run_relay_server, ForwardingGate};

use crate::error::{BridgeError, Result};
use crate::manager::PeerConnectionManager;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum InboundMessage {
    #[serde(rename = "peer:method")]
    PeerMethod {
        #[serde(rename = "methodName")]
        method_name: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    #[serde(rename = "session:method")]
    SessionMethod {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "methodName")]
        method_name: String,
        #[serde(default)]
        args: Vec<Value>,
    },
}

/// Response sent back to the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayResponse {
    Result { result: Value },
    Error { message: String },
}

impl RelayResponse {
    pub fn error(err: &BridgeError) -> Self {
        RelayResponse::Error {
            message: err.to_string(),
        }
    }

    /// Serialize, attaching the request's correlation id if it had one.
    pub fn to_json(&self, id: Option<&Value>) -> String {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let (Some(id), Value::Object(map)) = (id, &mut value) {
            map.insert("id".to_string(), id.clone());
        }
        value.to_string()
    }
}

impl RelayRequest {
    /// Parse and validate a raw page message. The correlation id is
    /// returned even when validation fails.
    pub fn parse(text: &str) -> (Option<Value>, Result<RelayRequest>) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => return (None, Err(BridgeError::invalid_request(e.to_string()))),
        };
        let id = value.get("id").cloned();

        let request = serde_json::from_value::<InboundMessage>(value)
            .map_err(|e| BridgeError::invalid_request(e.to_string()))
            .and_then(|message| match message {
                InboundMessage::PeerMethod { method_name, args } => {
                    PeerCall::parse(&method_name, args).map(RelayRequest::Peer)
                }
                InboundMessage::SessionMethod {
                    session_id,
                    method_name,
                    args,
                } => SessionCall::parse(session_id, &method_name, args).map(RelayRequest::Session),
            });
        (id, request)
    }
}

/// Run a validated request through the manager and shape the reply.
pub async fn dispatch(manager: &Arc<PeerConnectionManager>, request: RelayRequest) -> RelayResponse {
    let target = request.target();
    match manager.run_method(&request).await {
        Ok(outcome) => {
            manager.metrics().relay_requests.with_label_values(&[target, "ok"]).inc();
            RelayResponse::Result {
                result: outcome.into_page_value(),
            }
        }
        Err(e) => {
            manager.metrics().relay_requests.with_label_values(&[target, "error"]).inc();
            warn!("{} failed: {}", request.describe(), e);
            RelayResponse::error(&e)
        }
    }
}

/// Handle one raw page message and produce the raw reply.
pub async fn handle_message(manager: &Arc<PeerConnectionManager>, text: &str) -> String {
    debug!("request {}", text);
    let (id, request) = RelayRequest::parse(text);
    let response = match request {
        Ok(request) => dispatch(manager, request).await,
        Err(e) => {
            manager.metrics().relay_requests.with_label_values(&["invalid", "error"]).inc();
            warn!("Rejected page message: {}", e);
            RelayResponse::error(&e)
        }
    };
    let reply = response.to_json(id.as_ref());
    debug!("response {}", reply);
    reply
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::admin::{AdminConnector, AdminTransport};
    use crate::discovery::{Discovered, Discovery};
    use crate::error::{BridgeError, Result};
    use crate::manager::{HostControl, PeerConnectionManager};
    use crate::metrics::Metrics;
    use crate::peer::testing::FakeTransport;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    /// Replays discovery steps in order, repeating the last one. `None`
    /// fails the attempt as if the config file were missing.
    struct ScriptedDiscovery(Mutex<VecDeque<Option<Discovered>>>);

    impl Discovery for ScriptedDiscovery {
        fn discover(&self) -> BoxFuture<'_, Result<Discovered>> {
            let mut script = self.0.lock();
            let step = if script.len() > 1 {
                script.pop_front().flatten()
            } else {
                script.front().cloned().flatten()
            };
            Box::pin(async move {
                step.ok_or_else(|| BridgeError::ConfigUnavailable { key: "127_0_0_1.8000".into() })
            })
        }
    }

    struct FixedConnector(Arc<FakeTransport>);

    impl AdminConnector for FixedConnector {
        fn connect(&self, _admin_base_url: &str) -> Result<Arc<dyn AdminTransport>> {
            let transport: Arc<dyn AdminTransport> = self.0.clone();
            Ok(transport)
        }
    }

    /// A manager whose discovery always yields `found`, talking to `transport`.
    pub fn manager_with(
        found: Discovered,
        transport: Arc<FakeTransport>,
        host: Arc<dyn HostControl>,
    ) -> Arc<PeerConnectionManager> {
        scripted_manager(vec![Some(found)], transport, host)
    }

    pub fn scripted_manager(
        script: Vec<Option<Discovered>>,
        transport: Arc<FakeTransport>,
        host: Arc<dyn HostControl>,
    ) -> Arc<PeerConnectionManager> {
        PeerConnectionManager::new(
            Arc::new(ScriptedDiscovery(Mutex::new(script.into()))),
            Arc::new(FixedConnector(transport)),
            host,
            Arc::new(Metrics::new().unwrap()),
            Duration::from_millis(10),
        )
    }
}
