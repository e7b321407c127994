//! Peer connection manager
//!
//! Owns the reference to the remote peer and its lifecycle:
//! - Lazy discovery, retried at a fixed delay until it succeeds or the
//!   controller disables interception
//! - A single pending handle every caller waits on while discovery runs
//! - Recovery after a failed call: rediscover, then replay the call
//! - Permanent shutdown on an explicit disable signal

mod deferred;

pub use deferred::Deferred;

use crate::admin::AdminConnector;
use crate::discovery::{Discovered, Discovery};
use crate::error::{BridgeError, Result};
use crate::metrics::Metrics;
use crate::peer::RemotePeer;
use crate::relay::{PeerCall, PeerOutcome, RelayOutcome, RelayRequest, SessionCall, SessionOutcome};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No peer yet, or recovering from a failure
    Unknown,
    /// A peer is available
    Active,
    /// Explicitly disabled; terminal until restart
    Disabled,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Unknown => "unknown",
            ConnectionState::Active => "active",
            ConnectionState::Disabled => "disabled",
        }
    }

    fn gauge_value(&self) -> i64 {
        match self {
            ConnectionState::Unknown => 0,
            ConnectionState::Active => 1,
            ConnectionState::Disabled => 2,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The surrounding host, which decides whether page requests reach us.
pub trait HostControl: Send + Sync {
    /// Start forwarding page requests (a peer became available).
    fn start_forwarding(&self);
    /// Stop forwarding page requests for good.
    fn stop_forwarding(&self);
}

type PeerHandle = Arc<Deferred<Arc<RemotePeer>>>;

struct Inner {
    state: ConnectionState,
    handle: PeerHandle,
    /// A discovery loop is running
    discovering: bool,
}

pub struct PeerConnectionManager {
    discovery: Arc<dyn Discovery>,
    connector: Arc<dyn AdminConnector>,
    host: Arc<dyn HostControl>,
    metrics: Arc<Metrics>,
    retry_delay: Duration,
    inner: Mutex<Inner>,
}

impl PeerConnectionManager {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        connector: Arc<dyn AdminConnector>,
        host: Arc<dyn HostControl>,
        metrics: Arc<Metrics>,
        retry_delay: Duration,
    ) -> Arc<Self> {
        metrics.connection_state.set(ConnectionState::Unknown.gauge_value());
        Arc::new(Self {
            discovery,
            connector,
            host,
            metrics,
            retry_delay,
            inner: Mutex::new(Inner {
                state: ConnectionState::Unknown,
                handle: Arc::new(Deferred::new()),
                discovering: false,
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Initial acquisition. Page forwarding is switched on only if this
    /// ends with an active peer.
    pub async fn start(self: &Arc<Self>) -> ConnectionState {
        match self.acquire().await {
            Ok(peer) if self.state() == ConnectionState::Active => {
                info!("MockRTC interception initialised (peer {})", peer.peer_id());
                self.host.start_forwarding();
            }
            Ok(_) => {}
            Err(e) => info!("WebRTC mocking disabled: {}", e),
        }
        self.state()
    }

    /// Get the current peer, waiting for discovery if necessary.
    pub async fn acquire(self: &Arc<Self>) -> Result<Arc<RemotePeer>> {
        let handle = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Disabled {
                return Err(BridgeError::Disabled);
            }
            if let Some(peer) = inner.handle.peek() {
                return Ok(peer);
            }
            self.ensure_discovering(&mut inner);
            inner.handle.clone()
        };
        handle.wait().await
    }

    /// Run a validated request, recovering and replaying it after
    /// recoverable failures.
    pub async fn run_method(self: &Arc<Self>, request: &RelayRequest) -> Result<RelayOutcome> {
        loop {
            if self.state() == ConnectionState::Disabled {
                return Err(BridgeError::Disabled);
            }

            let peer = self.acquire().await?;
            match request.invoke(&peer).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_recoverable() => {
                    warn!("{} failed on peer {}: {}", request.describe(), peer.peer_id(), e);
                    self.recover(&peer).await?;
                    debug!("Replaying {}", request.describe());
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn run_peer_method(self: &Arc<Self>, call: PeerCall) -> Result<PeerOutcome> {
        match self.run_method(&RelayRequest::Peer(call)).await? {
            RelayOutcome::Peer(outcome) => Ok(outcome),
            RelayOutcome::Session(_) => Err(BridgeError::invalid_request("peer call produced a session result")),
        }
    }

    pub async fn run_session_method(self: &Arc<Self>, call: SessionCall) -> Result<SessionOutcome> {
        match self.run_method(&RelayRequest::Session(call)).await? {
            RelayOutcome::Session(outcome) => Ok(outcome),
            RelayOutcome::Peer(_) => Err(BridgeError::invalid_request("session call produced a peer result")),
        }
    }

    /// Replace a failed peer. Joins a cycle already in progress instead of
    /// starting another, and returns at once if `failed` was already
    /// replaced.
    pub async fn recover(self: &Arc<Self>, failed: &Arc<RemotePeer>) -> Result<()> {
        let handle = {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Disabled => return Err(BridgeError::Disabled),
                ConnectionState::Unknown => {
                    self.ensure_discovering(&mut inner);
                    inner.handle.clone()
                }
                ConnectionState::Active => {
                    if let Some(current) = inner.handle.peek() {
                        if !Arc::ptr_eq(&current, failed) {
                            return Ok(());
                        }
                    }
                    info!("Peer {} failed, rediscovering", failed.peer_id());
                    self.metrics.recoveries.inc();
                    inner.handle = Arc::new(Deferred::new());
                    self.set_state(&mut inner, ConnectionState::Unknown);
                    self.ensure_discovering(&mut inner);
                    inner.handle.clone()
                }
            }
        };
        handle.wait().await.map(|_| ())
    }

    /// Switch interception off for the rest of the process lifetime.
    pub fn disable(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Disabled {
                return;
            }
            self.set_state(&mut inner, ConnectionState::Disabled);
            inner.discovering = false;
            inner.handle.reject();
            inner.handle = Arc::new(Deferred::rejected());
        }
        info!("MockRTC interception disabled");
        self.host.stop_forwarding();
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        if inner.state != state {
            debug!("Connection state change: {} -> {}", inner.state, state);
            inner.state = state;
            self.metrics.connection_state.set(state.gauge_value());
        }
    }

    fn ensure_discovering(self: &Arc<Self>, inner: &mut Inner) {
        if inner.discovering {
            return;
        }
        inner.discovering = true;
        let manager = self.clone();
        tokio::spawn(async move { manager.discovery_loop().await });
    }

    /// Runs in its own task so callers that go away cannot cancel a cycle
    /// others are waiting on.
    async fn discovery_loop(self: Arc<Self>) {
        while !self.try_discover().await {
            debug!("Retrying discovery in {:?}", self.retry_delay);
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// One attempt. Returns true once the state has left `Unknown`.
    async fn try_discover(&self) -> bool {
        if self.state() == ConnectionState::Disabled {
            return true;
        }

        let found = self.discovery.discover().await.and_then(|found| match found {
            Discovered::Disabled => Ok(None),
            Discovered::Peer(params) => {
                let transport = self.connector.connect(&params.admin_base_url)?;
                Ok(Some(Arc::new(RemotePeer::new(params.peer_id, transport))))
            }
        });

        match found {
            Ok(None) => {
                self.metrics.discovery_attempts.with_label_values(&["disabled"]).inc();
                self.disable();
                true
            }
            Ok(Some(peer)) => {
                self.metrics.discovery_attempts.with_label_values(&["success"]).inc();
                self.activate(peer);
                true
            }
            Err(e) => {
                self.metrics.discovery_attempts.with_label_values(&["failure"]).inc();
                warn!("Peer discovery failed: {}", e);
                self.state() == ConnectionState::Disabled
            }
        }
    }

    fn activate(&self, peer: Arc<RemotePeer>) {
        let mut inner = self.inner.lock();
        inner.discovering = false;
        if inner.state == ConnectionState::Disabled {
            return;
        }
        info!("Connected to MockRTC peer {}", peer.peer_id());
        inner.handle.resolve(peer);
        self.set_state(&mut inner, ConnectionState::Active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::AdminTransport;
    use crate::discovery::PeerParams;
    use crate::peer::testing::{offer_reply, FakeTransport};
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// Replays scripted discovery outcomes; the last one repeats.
    struct ScriptedDiscovery {
        script: Mutex<VecDeque<Result<Discovered>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedDiscovery {
        fn new(script: Vec<Result<Discovered>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    fn replay(result: &Result<Discovered>) -> Result<Discovered> {
        match result {
            Ok(found) => Ok(found.clone()),
            Err(_) => Err(BridgeError::ConfigUnavailable { key: "127_0_0_1.8000".into() }),
        }
    }

    impl Discovery for ScriptedDiscovery {
        fn discover(&self) -> BoxFuture<'_, Result<Discovered>> {
            self.calls.lock().push(Instant::now());
            let mut script = self.script.lock();
            let result = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                replay(script.front().unwrap())
            };
            Box::pin(async move { result })
        }
    }

    /// Hands out scripted transports in order; the last one repeats.
    struct ScriptedConnector {
        transports: Mutex<VecDeque<Arc<FakeTransport>>>,
        urls: Mutex<Vec<String>>,
    }

    impl ScriptedConnector {
        fn new(transports: Vec<Arc<FakeTransport>>) -> Arc<Self> {
            Arc::new(Self {
                transports: Mutex::new(transports.into()),
                urls: Mutex::new(Vec::new()),
            })
        }

        fn connect_count(&self) -> usize {
            self.urls.lock().len()
        }
    }

    impl AdminConnector for ScriptedConnector {
        fn connect(&self, admin_base_url: &str) -> Result<Arc<dyn AdminTransport>> {
            self.urls.lock().push(admin_base_url.to_string());
            let mut transports = self.transports.lock();
            let transport: Arc<dyn AdminTransport> = if transports.len() > 1 {
                transports.pop_front().unwrap()
            } else {
                transports.front().unwrap().clone()
            };
            Ok(transport)
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    impl HostControl for RecordingHost {
        fn start_forwarding(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn stop_forwarding(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn peer_config(peer_id: &str) -> Result<Discovered> {
        Ok(Discovered::Peer(PeerParams {
            peer_id: peer_id.to_string(),
            admin_base_url: "http://x".to_string(),
        }))
    }

    fn unavailable() -> Result<Discovered> {
        Err(BridgeError::ConfigUnavailable { key: "127_0_0_1.8000".into() })
    }

    fn healthy_transport() -> Arc<FakeTransport> {
        FakeTransport::new(|_, _| Ok(json!({ "createOffer": offer_reply("s1") })))
    }

    fn broken_transport() -> Arc<FakeTransport> {
        FakeTransport::new(|_, _| Err(BridgeError::AdminUnavailable("connection refused".into())))
    }

    fn manager(
        discovery: Arc<ScriptedDiscovery>,
        connector: Arc<ScriptedConnector>,
        host: Arc<RecordingHost>,
    ) -> Arc<PeerConnectionManager> {
        PeerConnectionManager::new(
            discovery,
            connector,
            host,
            Arc::new(Metrics::new().unwrap()),
            Duration::from_secs(1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_config_fails_queued_and_later_calls() {
        let discovery = ScriptedDiscovery::new(vec![Ok(Discovered::Disabled)]);
        let host = Arc::new(RecordingHost::default());
        let mgr = manager(discovery.clone(), ScriptedConnector::new(vec![healthy_transport()]), host.clone());

        let queued = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.run_peer_method(PeerCall::CreateOffer(None)).await })
        };
        assert!(matches!(queued.await.unwrap(), Err(BridgeError::Disabled)));
        assert_eq!(mgr.state(), ConnectionState::Disabled);
        assert_eq!(host.stopped.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let later = mgr.run_peer_method(PeerCall::GetAllMessages).await;
        assert!(matches!(later, Err(BridgeError::Disabled)));
        assert_eq!(discovery.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_session_on_discovered_peer() {
        let discovery = ScriptedDiscovery::new(vec![peer_config("p1")]);
        let connector = ScriptedConnector::new(vec![healthy_transport()]);
        let mgr = manager(discovery, connector.clone(), Arc::new(RecordingHost::default()));

        let peer = mgr.acquire().await.unwrap();
        assert_eq!(peer.peer_id(), "p1");
        assert_eq!(*connector.urls.lock(), vec!["http://x".to_string()]);

        match mgr.run_peer_method(PeerCall::GetSession("s1".into())).await.unwrap() {
            PeerOutcome::Session(session) => assert_eq!(session.session_id(), "s1"),
            other => panic!("Expected session, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_method_on_discovered_peer() {
        let transport = FakeTransport::new(|_, variables| {
            assert_eq!(variables["sessionId"], json!("s1"));
            Ok(json!({ "completeOffer": null }))
        });
        let mgr = manager(
            ScriptedDiscovery::new(vec![peer_config("p1")]),
            ScriptedConnector::new(vec![transport.clone()]),
            Arc::new(RecordingHost::default()),
        );

        let call = SessionCall::parse(
            "s1".to_string(),
            "completeOffer",
            vec![json!({ "type": "answer", "sdp": "v=0\r\n" })],
        )
        .unwrap();
        let outcome = mgr.run_session_method(call).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_available_only_after_retry_delay() {
        let discovery = ScriptedDiscovery::new(vec![unavailable(), peer_config("p1")]);
        let mgr = manager(
            discovery.clone(),
            ScriptedConnector::new(vec![healthy_transport()]),
            Arc::new(RecordingHost::default()),
        );

        let started = Instant::now();
        let outcome = mgr.run_peer_method(PeerCall::CreateOffer(None)).await.unwrap();
        assert!(matches!(outcome, PeerOutcome::Offer(_)));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(2));

        let calls = discovery.calls.lock().clone();
        assert_eq!(calls.len(), 2);
        assert!(calls[1] - calls[0] >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_discovery() {
        let discovery = ScriptedDiscovery::new(vec![unavailable(), unavailable(), peer_config("p1")]);
        let mgr = manager(
            discovery.clone(),
            ScriptedConnector::new(vec![healthy_transport()]),
            Arc::new(RecordingHost::default()),
        );

        let callers: Vec<_> = (0..5)
            .map(|_| {
                let mgr = mgr.clone();
                tokio::spawn(async move { mgr.acquire().await })
            })
            .collect();

        let mut peers = Vec::new();
        for caller in callers {
            peers.push(caller.await.unwrap().unwrap());
        }
        assert!(peers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(discovery.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_triggers_one_recovery_and_retry_on_new_peer() {
        let discovery = ScriptedDiscovery::new(vec![peer_config("p1")]);
        let first = broken_transport();
        let second = healthy_transport();
        let connector = ScriptedConnector::new(vec![first.clone(), second.clone()]);
        let mgr = manager(discovery.clone(), connector.clone(), Arc::new(RecordingHost::default()));

        let original = mgr.acquire().await.unwrap();
        let outcome = mgr.run_peer_method(PeerCall::CreateOffer(None)).await.unwrap();
        assert!(matches!(outcome, PeerOutcome::Offer(_)));

        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 1);
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(discovery.call_count(), 2);
        assert_eq!(mgr.metrics().recoveries.get(), 1);

        let current = mgr.acquire().await.unwrap();
        assert!(!Arc::ptr_eq(&original, &current));
        assert_eq!(mgr.state(), ConnectionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failures_share_one_recovery() {
        let discovery = ScriptedDiscovery::new(vec![peer_config("p1")]);
        let connector = ScriptedConnector::new(vec![broken_transport(), healthy_transport()]);
        let mgr = manager(discovery, connector.clone(), Arc::new(RecordingHost::default()));
        mgr.acquire().await.unwrap();

        let calls: Vec<_> = (0..3)
            .map(|_| {
                let mgr = mgr.clone();
                tokio::spawn(async move { mgr.run_peer_method(PeerCall::CreateOffer(None)).await })
            })
            .collect();
        for call in calls {
            assert!(call.await.unwrap().is_ok());
        }
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(mgr.metrics().recoveries.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graphql_errors_are_surfaced_without_recovery() {
        let discovery = ScriptedDiscovery::new(vec![peer_config("p1")]);
        let transport = FakeTransport::new(|_, _| Err(BridgeError::GraphQl(vec![json!({"message": "no"})])));
        let connector = ScriptedConnector::new(vec![transport]);
        let mgr = manager(discovery, connector.clone(), Arc::new(RecordingHost::default()));

        let err = mgr.run_peer_method(PeerCall::CreateOffer(None)).await.unwrap_err();
        assert_eq!(err.to_string(), "Unexpected GraphQL errors");
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(mgr.metrics().recoveries.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_during_recovery_fails_waiters() {
        let discovery = ScriptedDiscovery::new(vec![peer_config("p1"), unavailable()]);
        let connector = ScriptedConnector::new(vec![broken_transport()]);
        let mgr = manager(discovery, connector, Arc::new(RecordingHost::default()));
        mgr.acquire().await.unwrap();

        let call = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.run_peer_method(PeerCall::CreateOffer(None)).await })
        };
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(mgr.state(), ConnectionState::Unknown);

        mgr.disable();
        assert!(matches!(call.await.unwrap(), Err(BridgeError::Disabled)));
        assert!(matches!(mgr.acquire().await, Err(BridgeError::Disabled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_opens_forwarding_only_when_active() {
        let host = Arc::new(RecordingHost::default());
        let mgr = manager(
            ScriptedDiscovery::new(vec![peer_config("p1")]),
            ScriptedConnector::new(vec![healthy_transport()]),
            host.clone(),
        );
        assert_eq!(mgr.start().await, ConnectionState::Active);
        assert_eq!(host.started.load(Ordering::SeqCst), 1);

        let host = Arc::new(RecordingHost::default());
        let mgr = manager(
            ScriptedDiscovery::new(vec![unavailable(), Ok(Discovered::Disabled)]),
            ScriptedConnector::new(vec![healthy_transport()]),
            host.clone(),
        );
        assert_eq!(mgr.start().await, ConnectionState::Disabled);
        assert_eq!(host.started.load(Ordering::SeqCst), 0);
        assert_eq!(host.stopped.load(Ordering::SeqCst), 1);
    }
}
