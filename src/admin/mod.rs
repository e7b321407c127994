//! Admin transport
//!
//! A minimal GraphQL client for the MockRTC admin API. Queries are fixed
//! documents; the only thing the transport does is POST them, check for a
//! GraphQL error list and hand the `data` object to a response transform.

use crate::error::{BridgeError, Result};
use futures::future::BoxFuture;
use log::{debug, error};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Sends a query document and returns the response's `data`.
pub trait AdminTransport: Send + Sync {
    fn execute<'a>(&'a self, query: &'a str, variables: &'a Value) -> BoxFuture<'a, Result<Value>>;
}

/// Builds a transport for an admin base URL.
pub trait AdminConnector: Send + Sync {
    fn connect(&self, admin_base_url: &str) -> Result<Arc<dyn AdminTransport>>;
}

type Transform<R> = Box<dyn FnOnce(Value) -> Result<R> + Send>;

/// A query document, its variables and a transform over the `data` field.
pub struct AdminQuery<R> {
    pub query: &'static str,
    pub variables: Value,
    transform: Transform<R>,
}

impl AdminQuery<Value> {
    pub fn new(query: &'static str, variables: Value) -> Self {
        Self {
            query,
            variables,
            transform: Box::new(|data: Value| -> Result<Value> { Ok(data) }),
        }
    }
}

impl<R: 'static> AdminQuery<R> {
    pub fn map_response<S: 'static>(
        self,
        f: impl FnOnce(R) -> Result<S> + Send + 'static,
    ) -> AdminQuery<S> {
        let transform = self.transform;
        AdminQuery {
            query: self.query,
            variables: self.variables,
            transform: Box::new(move |data| f(transform(data)?)),
        }
    }

    pub async fn send(self, transport: &dyn AdminTransport) -> Result<R> {
        let data = transport.execute(self.query, &self.variables).await?;
        (self.transform)(data)
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

impl GraphQlResponse {
    fn into_data(self) -> Result<Value> {
        if let Some(errors) = self.errors.filter(|errors| !errors.is_empty()) {
            error!("Admin query returned GraphQL errors: {:?}", errors);
            return Err(BridgeError::GraphQl(errors));
        }
        self.data
            .ok_or_else(|| BridgeError::AdminUnavailable("response without data".to_string()))
    }
}

/// reqwest-backed admin client for one base URL.
pub struct AdminClient {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl AdminClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| BridgeError::AdminUnavailable(format!("invalid admin URL {}: {}", base_url, e)))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    async fn post_query(&self, query: &str, variables: &Value) -> Result<Value> {
        debug!("Admin query to {}", self.base_url);
        let body: GraphQlResponse = self
            .client
            .post(self.base_url.clone())
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        body.into_data()
    }
}

impl AdminTransport for AdminClient {
    fn execute<'a>(&'a self, query: &'a str, variables: &'a Value) -> BoxFuture<'a, Result<Value>> {
        Box::pin(self.post_query(query, variables))
    }
}

/// Connects with [`AdminClient`] over HTTP.
pub struct HttpAdminConnector {
    timeout: Duration,
}

impl HttpAdminConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl AdminConnector for HttpAdminConnector {
    fn connect(&self, admin_base_url: &str) -> Result<Arc<dyn AdminTransport>> {
        Ok(Arc::new(AdminClient::new(admin_base_url, self.timeout)?))
    }
}
