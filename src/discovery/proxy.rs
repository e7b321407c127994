//! Proxy settings lookup

use super::config_key;
use log::debug;
use std::fmt;

/// The single proxy this instance is intercepted through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAddress {
    pub host: String,
    pub port: u16,
}

impl ProxyAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn config_key(&self) -> String {
        config_key(&self.host, self.port)
    }

    /// Parse `scheme://user@host:port/path`, `host:port` or `[v6]:port`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        let (scheme, rest) = match value.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
            None => (None, value),
        };
        let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
        let authority = match authority.rsplit_once('@') {
            Some((_, host_port)) => host_port,
            None => authority,
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed.split_once(']')?;
            let port = match tail.strip_prefix(':') {
                Some(port) => Some(port),
                None if tail.is_empty() => None,
                None => return None,
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return None;
        }

        let port = match port {
            Some(port) => port.parse::<u16>().ok()?,
            None => match scheme.as_deref() {
                Some("https") => 443,
                Some("http") | None => 80,
                Some(_) => return None,
            },
        };
        if port == 0 {
            return None;
        }

        Some(Self::new(host, port))
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where this instance's proxy settings come from.
pub trait ProxySource: Send + Sync {
    /// Current proxy settings, if any. Called on every discovery attempt.
    fn proxy_address(&self) -> Option<ProxyAddress>;
}

/// A fixed proxy from the config file or command line.
pub struct StaticProxy {
    address: ProxyAddress,
}

impl StaticProxy {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            address: ProxyAddress::new(host, port),
        }
    }
}

impl ProxySource for StaticProxy {
    fn proxy_address(&self) -> Option<ProxyAddress> {
        Some(self.address.clone())
    }
}

/// No proxy at all; discovery fails until restarted with one.
pub struct NoProxy;

impl ProxySource for NoProxy {
    fn proxy_address(&self) -> Option<ProxyAddress> {
        None
    }
}

const PROXY_ENV_VARS: &[&str] = &[
    "https_proxy",
    "HTTPS_PROXY",
    "http_proxy",
    "HTTP_PROXY",
    "all_proxy",
    "ALL_PROXY",
];

/// Reads the proxy from `http_proxy`-style environment variables.
#[derive(Default)]
pub struct EnvProxy;

impl EnvProxy {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<ProxyAddress> {
        PROXY_ENV_VARS.iter().find_map(|name| {
            let value = lookup(name)?;
            let parsed = ProxyAddress::parse(&value);
            if parsed.is_none() {
                debug!("Ignoring unparsable {}={:?}", name, value);
            }
            parsed
        })
    }
}

impl ProxySource for EnvProxy {
    fn proxy_address(&self) -> Option<ProxyAddress> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}
