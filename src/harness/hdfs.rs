//! Out-of-band HDFS access
//!
//! The oracle reads and writes files without going through the database
//! node, so scenarios can check what actually landed on the filesystem.
//! Each call is a single attempt; retry policy belongs to the caller.

use super::error::{HarnessError, HarnessResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Raw blob access against the remote filesystem
#[async_trait]
pub trait DataEndpoint: Send + Sync {
    /// Store `data` at `path`, replacing any existing file.
    ///
    /// Fails with [`HarnessError::IoError`] when the endpoint is unreachable.
    async fn write_data(&self, path: &str, data: &[u8]) -> HarnessResult<()>;

    /// Exact bytes stored at `path`; [`HarnessError::NotFound`] if absent.
    async fn read_data(&self, path: &str) -> HarnessResult<Vec<u8>>;
}

/// Text-oriented wrapper used by scenarios
#[derive(Clone)]
pub struct HdfsOracle {
    endpoint: Arc<dyn DataEndpoint>,
}

impl HdfsOracle {
    pub fn new(endpoint: Arc<dyn DataEndpoint>) -> Self {
        Self { endpoint }
    }

    pub async fn write_data(&self, path: &str, data: &str) -> HarnessResult<()> {
        log::debug!("oracle write {} ({} bytes)", path, data.len());
        self.endpoint.write_data(path, data.as_bytes()).await
    }

    pub async fn read_data(&self, path: &str) -> HarnessResult<String> {
        let bytes = self.endpoint.read_data(path).await?;
        log::debug!("oracle read {} ({} bytes)", path, bytes.len());
        String::from_utf8(bytes).map_err(|e| HarnessError::IoError {
            message: format!("remote file is not valid UTF-8: {}", e),
            path: path.to_string(),
        })
    }

    pub async fn read_bytes(&self, path: &str) -> HarnessResult<Vec<u8>> {
        self.endpoint.read_data(path).await
    }

    pub async fn exists(&self, path: &str) -> HarnessResult<bool> {
        match self.endpoint.read_data(path).await {
            Ok(_) => Ok(true),
            Err(HarnessError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
