use clap::Parser;
use mockrtc_bridge::config::{self, Config};
use mockrtc_bridge::discovery::ProxyAddress;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mockrtc-bridge")]
#[command(version)]
#[command(about = "Relays page WebRTC mocking requests to a MockRTC admin server", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/mockrtc-bridge.toml")]
    pub config: PathBuf,

    /// Extension directory holding `config/<key>` files
    #[arg(long)]
    pub extension_dir: Option<PathBuf>,

    /// Base URL serving `config/<key>` documents instead of the extension directory
    #[arg(long)]
    pub config_url: Option<String>,

    /// Proxy address (host:port or URL) used to derive the config key
    #[arg(long)]
    pub proxy: Option<String>,

    /// Static peer id, bypassing discovery (requires --admin-url)
    #[arg(long)]
    pub peer_id: Option<String>,

    /// Static admin base URL, bypassing discovery (requires --peer-id)
    #[arg(long)]
    pub admin_url: Option<String>,

    /// Relay bind address
    #[arg(long)]
    pub host: Option<String>,

    /// Relay bind port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Delay between failed discovery attempts
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }

    /// Apply command line overrides on top of the file configuration.
    pub fn apply_overrides(&self, config: &mut Config) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(ref dir) = self.extension_dir {
            config.extension.dir = dir.clone();
        }
        if let Some(ref url) = self.config_url {
            config.extension.config_base_url = Some(url.clone());
        }
        if let Some(ref proxy) = self.proxy {
            let address = ProxyAddress::parse(proxy)
                .ok_or_else(|| format!("Invalid proxy address: {}", proxy))?;
            config.proxy.host = Some(address.host);
            config.proxy.port = Some(address.port);
        }
        if let Some(ref peer_id) = self.peer_id {
            config.peer.peer_id = Some(peer_id.clone());
        }
        if let Some(ref url) = self.admin_url {
            config.peer.admin_url = Some(url.clone());
        }
        if let Some(ref host) = self.host {
            config.relay.host = host.clone();
        }
        if let Some(port) = self.port {
            config.relay.port = port;
        }
        if let Some(delay) = self.retry_delay_ms {
            config.discovery.retry_delay_ms = delay;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_file_values() {
        let args = Args::parse_from([
            "mockrtc-bridge",
            "--proxy",
            "http://10.0.0.2:3128",
            "--peer-id",
            "p1",
            "--admin-url",
            "http://localhost:45456",
            "--port",
            "9000",
        ]);
        let mut config = Config::default();
        args.apply_overrides(&mut config).unwrap();

        assert_eq!(config.proxy.host.as_deref(), Some("10.0.0.2"));
        assert_eq!(config.proxy.port, Some(3128));
        assert!(config.peer.is_static());
        assert_eq!(config.relay.port, 9000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_proxy() {
        let args = Args::parse_from(["mockrtc-bridge", "--proxy", "host:notaport"]);
        assert!(args.apply_overrides(&mut Config::default()).is_err());
    }
}
