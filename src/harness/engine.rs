//! Query execution facade
//!
//! Statements go to the database node one at a time. Success payloads are
//! returned byte for byte; failures keep the engine's diagnostic verbatim so
//! both kind checks and detail checks stay meaningful.

use super::error::{HarnessError, HarnessResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Transport to a database node
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Execute one statement, returning the textual result set.
    ///
    /// Engine rejections are [`HarnessError::EngineError`]; transport
    /// problems are any other variant.
    async fn execute(&self, statement: &str) -> HarnessResult<String>;

    /// Whether the node currently accepts connections
    async fn ping(&self) -> bool;
}

/// Named database node with a per-statement deadline
#[derive(Clone)]
pub struct QueryNode {
    name: String,
    engine: Arc<dyn QueryEngine>,
    timeout: Duration,
}

impl QueryNode {
    pub fn new(name: &str, engine: Arc<dyn QueryEngine>, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            engine,
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a statement and wait for its result.
    ///
    /// There is no cancellation beyond the deadline: a statement that
    /// outlives it is reported as [`HarnessError::TimeoutError`].
    pub async fn query(&self, statement: &str) -> HarnessResult<String> {
        log::info!("[{}] {}", self.name, statement);

        match tokio::time::timeout(self.timeout, self.engine.execute(statement)).await {
            Ok(Ok(payload)) => {
                log::debug!("[{}] returned {} bytes", self.name, payload.len());
                Ok(payload)
            }
            Ok(Err(e)) => {
                log::debug!("[{}] failed: {}", self.name, e);
                Err(e)
            }
            Err(_) => Err(HarnessError::TimeoutError {
                message: format!("node '{}' did not answer", self.name),
                operation: statement.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Run a statement that is expected to fail and return its error.
    ///
    /// A success is itself an assertion failure carrying the payload.
    /// Errors other than engine rejections are propagated unchanged.
    pub async fn query_and_get_error(&self, statement: &str) -> HarnessResult<HarnessError> {
        match self.query(statement).await {
            Ok(payload) => Err(HarnessError::AssertionFailed {
                assertion_type: "expect_error".to_string(),
                expected: "statement failure".to_string(),
                actual: payload,
                message: format!("Exception have to be thrown for '{}'", statement),
            }),
            Err(e) if e.is_expected_kind() => Ok(e),
            Err(e) => Err(e),
        }
    }

    pub async fn ping(&self) -> bool {
        self.engine.ping().await
    }
}

/// Engine reached through its HTTP interface
///
/// Statements are POSTed as the request body; any non-success status turns
/// the response body into the raw diagnostic.
pub struct HttpQueryEngine {
    client: reqwest::Client,
    base_url: String,
}

impl HttpQueryEngine {
    pub fn new(host: &str, port: u16) -> HarnessResult<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| HarnessError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: format!("http://{}:{}", host, port),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl QueryEngine for HttpQueryEngine {
    async fn execute(&self, statement: &str) -> HarnessResult<String> {
        let response = self
            .client
            .post(format!("{}/", self.base_url))
            .body(statement.to_string())
            .send()
            .await
            .map_err(|e| HarnessError::IoError {
                message: format!("request failed: {}", e),
                path: self.base_url.clone(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| HarnessError::IoError {
            message: format!("failed to read response body: {}", e),
            path: self.base_url.clone(),
        })?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(HarnessError::engine(statement, body))
        }
    }

    async fn ping(&self) -> bool {
        match self.client.get(format!("{}/ping", self.base_url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
