//! Error types for the test harness
//!
//! Every failure the harness can observe is a [`HarnessError`]. Scenarios
//! branch on [`HarnessError::kind`] rather than on message text; the raw
//! diagnostic is still available through [`HarnessError::detail`].

use std::fmt;
use std::io;

/// Classification of a database engine diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    /// Filesystem refused the operation for the acting principal
    PermissionDenied,
    /// Ticket acquisition failed (KDC unreachable, bad keytab)
    KerberosInitFailure,
    /// An option was set where the engine does not allow it
    ConfigurationConflict,
    /// Remote file does not exist
    FileNotFound,
    /// Statement could not be parsed
    Syntax,
    /// Statement referenced a table that was never created
    UnknownTable,
    /// Anything else
    Other,
}

impl EngineErrorKind {
    /// Classify a raw engine diagnostic.
    ///
    /// Markers are checked most specific first; an authentication failure
    /// that also mentions a path is still an authentication failure.
    pub fn classify(diagnostic: &str) -> Self {
        if diagnostic.contains("kinit failure") {
            EngineErrorKind::KerberosInitFailure
        } else if diagnostic.contains("cannot be set per user") {
            EngineErrorKind::ConfigurationConflict
        } else if diagnostic.contains("Permission denied") {
            EngineErrorKind::PermissionDenied
        } else if diagnostic.contains("File does not exist") {
            EngineErrorKind::FileNotFound
        } else if diagnostic.contains("Syntax error") {
            EngineErrorKind::Syntax
        } else if diagnostic.contains("doesn't exist") {
            EngineErrorKind::UnknownTable
        } else {
            EngineErrorKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineErrorKind::PermissionDenied => "permission_denied",
            EngineErrorKind::KerberosInitFailure => "kerberos_init_failure",
            EngineErrorKind::ConfigurationConflict => "configuration_conflict",
            EngineErrorKind::FileNotFound => "file_not_found",
            EngineErrorKind::Syntax => "syntax",
            EngineErrorKind::UnknownTable => "unknown_table",
            EngineErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured kind of a [`HarnessError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SetupFailure,
    Engine(EngineErrorKind),
    Io,
    NotFound,
    Config,
    UnknownContainer,
    Timeout,
    Assertion,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::SetupFailure => f.write_str("setup_failure"),
            ErrorKind::Engine(kind) => write!(f, "engine:{}", kind),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::NotFound => f.write_str("not_found"),
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::UnknownContainer => f.write_str("unknown_container"),
            ErrorKind::Timeout => f.write_str("timeout"),
            ErrorKind::Assertion => f.write_str("assertion"),
        }
    }
}

/// Main error type for harness operations
#[derive(Debug, Clone)]
pub enum HarnessError {
    /// A container failed to start or become healthy
    SetupFailure {
        message: String,
        container: String,
        source: Option<String>,
    },

    /// The database node rejected a statement
    EngineError {
        kind: EngineErrorKind,
        /// Diagnostic exactly as the engine returned it
        diagnostic: String,
        statement: String,
    },

    /// Oracle endpoint unreachable or failed mid-operation
    IoError { message: String, path: String },

    /// Oracle path absent
    NotFound { path: String },

    /// Invalid configuration or harness misuse
    ConfigError { message: String },

    /// Container name not part of the topology
    UnknownContainer { name: String },

    /// Operation exceeded its deadline
    TimeoutError {
        message: String,
        operation: String,
        timeout_ms: u64,
    },

    /// Assertion failure (test failure, not error)
    AssertionFailed {
        assertion_type: String,
        expected: String,
        actual: String,
        message: String,
    },
}

impl HarnessError {
    /// Build an engine error, classifying the diagnostic.
    pub fn engine(statement: &str, diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        HarnessError::EngineError {
            kind: EngineErrorKind::classify(&diagnostic),
            diagnostic,
            statement: statement.to_string(),
        }
    }

    pub fn setup(container: &str, message: impl Into<String>) -> Self {
        HarnessError::SetupFailure {
            message: message.into(),
            container: container.to_string(),
            source: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        HarnessError::ConfigError {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HarnessError::SetupFailure { .. } => ErrorKind::SetupFailure,
            HarnessError::EngineError { kind, .. } => ErrorKind::Engine(*kind),
            HarnessError::IoError { .. } => ErrorKind::Io,
            HarnessError::NotFound { .. } => ErrorKind::NotFound,
            HarnessError::ConfigError { .. } => ErrorKind::Config,
            HarnessError::UnknownContainer { .. } => ErrorKind::UnknownContainer,
            HarnessError::TimeoutError { .. } => ErrorKind::Timeout,
            HarnessError::AssertionFailed { .. } => ErrorKind::Assertion,
        }
    }

    /// Human-readable detail; for engine errors, the verbatim diagnostic
    pub fn detail(&self) -> String {
        match self {
            HarnessError::EngineError { diagnostic, .. } => diagnostic.clone(),
            other => other.to_string(),
        }
    }

    /// Only engine errors are ever expected by a scenario
    pub fn is_expected_kind(&self) -> bool {
        matches!(self, HarnessError::EngineError { .. })
    }
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessError::SetupFailure {
                message,
                container,
                source,
            } => {
                if let Some(s) = source {
                    write!(
                        f,
                        "Setup failure for container '{}': {} ({})",
                        container, message, s
                    )
                } else {
                    write!(f, "Setup failure for container '{}': {}", container, message)
                }
            }
            HarnessError::EngineError {
                kind,
                diagnostic,
                statement,
            } => {
                write!(
                    f,
                    "Engine error [{}] for statement '{}': {}",
                    kind, statement, diagnostic
                )
            }
            HarnessError::IoError { message, path } => {
                write!(f, "IO error for '{}': {}", path, message)
            }
            HarnessError::NotFound { path } => write!(f, "Remote path not found: {}", path),
            HarnessError::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            HarnessError::UnknownContainer { name } => {
                write!(f, "Unknown container '{}'", name)
            }
            HarnessError::TimeoutError {
                message,
                operation,
                timeout_ms,
            } => {
                write!(
                    f,
                    "Timeout after {}ms during '{}': {}",
                    timeout_ms, operation, message
                )
            }
            HarnessError::AssertionFailed {
                assertion_type,
                expected,
                actual,
                message,
            } => {
                write!(
                    f,
                    "Assertion '{}' failed: {} (expected: {:?}, actual: {:?})",
                    assertion_type, message, expected, actual
                )
            }
        }
    }
}

impl std::error::Error for HarnessError {}

impl From<io::Error> for HarnessError {
    fn from(err: io::Error) -> Self {
        HarnessError::IoError {
            message: err.to_string(),
            path: String::new(),
        }
    }
}

impl From<serde_yaml::Error> for HarnessError {
    fn from(err: serde_yaml::Error) -> Self {
        HarnessError::ConfigError {
            message: err.to_string(),
        }
    }
}

/// Result type alias for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;
