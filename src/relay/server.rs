//! WebSocket relay server
//!
//! Pages connect to the relay path once forwarding is open. Each text frame
//! is one request; up to `max_in_flight` requests per connection run
//! concurrently and replies are written back in completion order. When
//! forwarding stops, no further frames are read but replies already owed
//! are flushed before the close frame.

use crate::config::RelayConfig;
use crate::manager::{HostControl, PeerConnectionManager};
use crate::relay::handle_message;
use axum::{
    extract::ws::{Message, WebSocket},
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Pending,
    Open,
    Closed,
}

/// Host-side switch deciding whether page requests reach the manager.
/// Closing is permanent.
pub struct ForwardingGate {
    tx: watch::Sender<GateState>,
}

impl ForwardingGate {
    pub fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(GateState::Pending);
        Arc::new(Self { tx })
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow() == GateState::Open
    }

    /// Resolves once the gate is closed for good.
    async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|state| *state == GateState::Closed).await;
    }
}

impl HostControl for ForwardingGate {
    fn start_forwarding(&self) {
        let opened = self.tx.send_if_modified(|state| {
            if *state != GateState::Pending {
                return false;
            }
            *state = GateState::Open;
            true
        });
        if opened {
            info!("Page forwarding enabled");
        }
    }

    fn stop_forwarding(&self) {
        let closed = self.tx.send_if_modified(|state| {
            if *state == GateState::Closed {
                return false;
            }
            *state = GateState::Closed;
            true
        });
        if closed {
            info!("Page forwarding stopped");
        }
    }
}

struct RelayState {
    manager: Arc<PeerConnectionManager>,
    gate: Arc<ForwardingGate>,
    max_in_flight: usize,
    connections: AtomicUsize,
}

/// Build the relay router: the WebSocket endpoint plus `/health` and `/metrics`.
pub fn relay_router(
    config: &RelayConfig,
    manager: Arc<PeerConnectionManager>,
    gate: Arc<ForwardingGate>,
) -> Router {
    let state = Arc::new(RelayState {
        manager,
        gate,
        max_in_flight: config.max_in_flight,
        connections: AtomicUsize::new(0),
    });

    Router::new()
        .route(&config.path, get(relay_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the relay server until it fails.
pub async fn run_relay_server(
    config: &RelayConfig,
    manager: Arc<PeerConnectionManager>,
    gate: Arc<ForwardingGate>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Relay listening on ws://{}{}", addr, config.path);

    axum::serve(listener, relay_router(config, manager, gate)).await?;
    Ok(())
}

async fn relay_handler(State(state): State<Arc<RelayState>>, ws: WebSocketUpgrade) -> Response {
    if !state.gate.is_open() {
        debug!("Refusing page connection: forwarding is not enabled");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_relay_connection(socket, state))
}

async fn handle_relay_connection(socket: WebSocket, state: Arc<RelayState>) {
    let conn_id = uuid::Uuid::new_v4();
    state.connections.fetch_add(1, Ordering::Relaxed);
    info!("Page connected ({})", conn_id);

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.max_in_flight);
    let in_flight = Arc::new(Semaphore::new(state.max_in_flight));

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.close().await;
    });

    // A frame is only read once a request slot is free.
    let forwarding_stopped = loop {
        let permit = tokio::select! {
            biased;
            _ = state.gate.closed() => break true,
            permit = in_flight.clone().acquire_owned() => permit,
        };
        let Ok(permit) = permit else { break false };

        let result = tokio::select! {
            biased;
            _ = state.gate.closed() => break true,
            result = ws_receiver.next() => result,
        };
        let Some(result) = result else { break false };

        match result {
            Ok(Message::Text(text)) => {
                let text = text.as_str().to_owned();
                let manager = state.manager.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let reply = handle_message(&manager, &text).await;
                    let _ = tx.send(reply).await;
                    drop(permit);
                });
            }
            Ok(Message::Binary(_)) => {
                warn!("Ignoring binary frame from page {}", conn_id);
            }
            Ok(Message::Close(_)) => {
                debug!("Page {} closed the connection", conn_id);
                break false;
            }
            Err(e) => {
                error!("WebSocket error on {}: {}", conn_id, e);
                break false;
            }
            _ => {}
        }
    };

    drop(tx);
    if forwarding_stopped {
        // Requests already read still get their replies before the close frame.
        info!("Closing page connection {}: forwarding stopped", conn_id);
        let _ = send_task.await;
    } else {
        send_task.abort();
    }
    state.connections.fetch_sub(1, Ordering::Relaxed);
    info!("Page disconnected ({})", conn_id);
}

async fn health_handler(State(state): State<Arc<RelayState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "connection_state": state.manager.state().as_str(),
        "forwarding": state.gate.is_open(),
        "connections": state.connections.load(Ordering::Relaxed),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_handler(State(state): State<Arc<RelayState>>) -> String {
    state.manager.metrics().render()
}
