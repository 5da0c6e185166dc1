//! Storage location URIs
//!
//! Tables and table functions address remote files as
//! `scheme://[principal@]host:port/path`. A `principal@` prefix selects an
//! alternate credential identity for the operation.

use super::error::{HarnessError, HarnessResult};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Parsed storage location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUri {
    pub scheme: String,
    /// User part of the authority, if present
    pub principal: Option<String>,
    pub host: String,
    pub port: u16,
    /// Absolute path, always starting with `/`
    pub path: String,
}

impl StorageUri {
    pub fn parse(input: &str) -> HarnessResult<Self> {
        let invalid = |reason: &str| {
            HarnessError::config(format!("Invalid storage URI '{}': {}", input, reason))
        };

        let url = Url::parse(input).map_err(|e| invalid(&e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(invalid("missing scheme separator '://'"));
        }

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(invalid("empty host")),
        };
        let port = url.port().ok_or_else(|| invalid("missing port"))?;
        if !url.path().starts_with('/') {
            return Err(invalid("missing path"));
        }

        // Url drops an empty userinfo, so `hdfs://@host` needs its own check
        let principal = match url.username() {
            "" if input.contains("://@") => return Err(invalid("empty principal before '@'")),
            "" => None,
            user => Some(user.to_string()),
        };

        Ok(Self {
            scheme: url.scheme().to_string(),
            principal,
            host,
            port,
            path: url.path().to_string(),
        })
    }
}

impl FromStr for StorageUri {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for StorageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if let Some(ref principal) = self.principal {
            write!(f, "{}@", principal)?;
        }
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}
