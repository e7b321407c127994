//! mockrtc-bridge - Main entry point

mod args;

use args::Args;
use clap::Parser;
use log::{error, info, warn};
use mockrtc_bridge::admin::HttpAdminConnector;
use mockrtc_bridge::config::Config;
use mockrtc_bridge::discovery::{
    ConfigSource, Discovery, EnvProxy, ExtensionDiscovery, FileConfigSource, HttpConfigSource,
    NoProxy, ProxySource, StaticDiscovery, StaticProxy,
};
use mockrtc_bridge::metrics::Metrics;
use mockrtc_bridge::{run_relay_server, ForwardingGate, PeerConnectionManager};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Config is read before logging so the file can set the level
    let (mut config, load_error) = match args.load_config() {
        Ok(cfg) => (cfg, None),
        Err(e) => (Config::default(), Some(e.to_string())),
    };

    let log_level = if args.verbose { "debug".to_string() } else { config.logging.level.clone() };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("MOCKRTC_BRIDGE_LOG").unwrap_or(log_level))
        .filter_module("hyper", log::LevelFilter::Warn)
        .filter_module("reqwest", log::LevelFilter::Warn)
        .init();

    info!("mockrtc-bridge v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => info!("Loaded configuration from {:?}", args.config),
        Some(e) => warn!("Failed to load config: {}, using defaults", e),
    }

    args.apply_overrides(&mut config)?;
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    let discovery = build_discovery(&config)?;
    let connector = Arc::new(HttpAdminConnector::new(config.admin.request_timeout()));
    let metrics = Arc::new(Metrics::new()?);
    let gate = ForwardingGate::new();
    let manager = PeerConnectionManager::new(
        discovery,
        connector,
        gate.clone(),
        metrics,
        config.discovery.retry_delay(),
    );

    let startup = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let state = manager.start().await;
            info!("Initial acquisition finished: {}", state);
        })
    };

    let relay_config = config.relay.clone();
    let relay_manager = manager.clone();
    let mut server = tokio::spawn(async move {
        run_relay_server(&relay_config, relay_manager, gate).await
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        result = &mut server => {
            match result {
                Ok(Ok(())) => info!("Relay server stopped"),
                Ok(Err(e)) => error!("Relay server error: {}", e),
                Err(e) => error!("Relay server task failed: {}", e),
            }
        }
    }

    manager.disable();
    startup.abort();
    server.abort();
    info!("mockrtc-bridge stopped");
    Ok(())
}

fn build_discovery(config: &Config) -> Result<Arc<dyn Discovery>, Box<dyn std::error::Error>> {
    if let (Some(peer_id), Some(admin_url)) = (&config.peer.peer_id, &config.peer.admin_url) {
        info!("Using static MockRTC peer {} at {}", peer_id, admin_url);
        return Ok(Arc::new(StaticDiscovery::new(peer_id.clone(), admin_url.clone())));
    }

    let proxy: Arc<dyn ProxySource> = match (&config.proxy.host, config.proxy.port) {
        (Some(host), Some(port)) => Arc::new(StaticProxy::new(host.clone(), port)),
        _ if config.proxy.from_env => Arc::new(EnvProxy),
        _ => {
            warn!("No proxy configured; discovery will keep retrying");
            Arc::new(NoProxy)
        }
    };

    let source: Arc<dyn ConfigSource> = match &config.extension.config_base_url {
        Some(url) => {
            info!("Reading peer configuration from {}", url);
            Arc::new(HttpConfigSource::new(url.clone(), config.admin.request_timeout())?)
        }
        None => {
            info!("Reading peer configuration from {:?}", config.extension.dir);
            Arc::new(FileConfigSource::new(config.extension.dir.clone()))
        }
    };

    Ok(Arc::new(ExtensionDiscovery::new(proxy, source)))
}
