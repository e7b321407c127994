//! Prometheus metrics for discovery, recovery and relay traffic

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub discovery_attempts: IntCounterVec,
    pub recoveries: IntCounter,
    pub relay_requests: IntCounterVec,
    pub connection_state: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("mockrtc_bridge".to_string()), None)?;

        let discovery_attempts = IntCounterVec::new(
            Opts::new("discovery_attempts_total", "Peer discovery attempts by outcome"),
            &["outcome"],
        )?;
        let recoveries = IntCounter::new("recoveries_total", "Recovery cycles started after a failed call")?;
        let relay_requests = IntCounterVec::new(
            Opts::new("relay_requests_total", "Relayed page requests by target and outcome"),
            &["target", "outcome"],
        )?;
        let connection_state = IntGauge::new(
            "connection_state",
            "Peer connection state (0 unknown, 1 active, 2 disabled)",
        )?;

        registry.register(Box::new(discovery_attempts.clone()))?;
        registry.register(Box::new(recoveries.clone()))?;
        registry.register(Box::new(relay_requests.clone()))?;
        registry.register(Box::new(connection_state.clone()))?;

        Ok(Self {
            registry,
            discovery_attempts,
            recoveries,
            relay_requests,
            connection_state,
        })
    }

    /// Render all metrics in the text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            log::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::Metrics;

    #[test]
    fn test_render_includes_prefixed_names() {
        let metrics = Metrics::new().unwrap();
        metrics.recoveries.inc();
        metrics.relay_requests.with_label_values(&["peer", "ok"]).inc();
        let text = metrics.render();
        assert!(text.contains("mockrtc_bridge_recoveries_total 1"));
        assert!(text.contains("mockrtc_bridge_relay_requests_total{outcome=\"ok\",target=\"peer\"} 1"));
    }
}
