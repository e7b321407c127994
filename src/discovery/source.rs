//! Config file sources
//!
//! The controller writes one small JSON file per intercepted instance,
//! at `config/<key>` relative to the extension root.

use crate::error::{BridgeError, Result};
use futures::future::BoxFuture;
use log::warn;
use std::path::PathBuf;
use std::time::Duration;

/// Fetches the raw config body for a key.
pub trait ConfigSource: Send + Sync {
    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Reads `<extension_dir>/config/<key>` from disk.
pub struct FileConfigSource {
    extension_dir: PathBuf,
}

impl FileConfigSource {
    pub fn new(extension_dir: impl Into<PathBuf>) -> Self {
        Self {
            extension_dir: extension_dir.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.extension_dir.join("config").join(key)
    }
}

impl ConfigSource for FileConfigSource {
    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let path = self.path_for(key);
            tokio::fs::read(&path).await.map_err(|e| {
                warn!("Failed to read {:?}: {}", path, e);
                BridgeError::ConfigUnavailable { key: key.to_string() }
            })
        })
    }
}

/// Fetches `<base_url>/config/<key>` over HTTP.
pub struct HttpConfigSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConfigSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/config/{}", self.base_url.trim_end_matches('/'), key)
    }

    async fn fetch_url(&self, key: &str) -> std::result::Result<Vec<u8>, reqwest::Error> {
        let response = self
            .client
            .get(self.url_for(key))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

impl ConfigSource for HttpConfigSource {
    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            self.fetch_url(key).await.map_err(|e| {
                warn!("Failed to fetch config for {}: {}", key, e);
                BridgeError::ConfigUnavailable { key: key.to_string() }
            })
        })
    }
}
