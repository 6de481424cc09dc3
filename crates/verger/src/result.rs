//! Result and error types for Verger.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for Verger operations
pub type VergerResult<T> = Result<T, VergerError>;

/// Why a navigation did not reach the target document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationFailure {
    /// Host name did not resolve
    Dns,
    /// Host resolved but refused or dropped the connection
    Connection,
    /// Server answered with an error status
    HttpStatus(u16),
    /// No committed response within the navigation timeout
    Timeout,
    /// Anything the browser reported that fits none of the above
    Other(String),
}

impl NavigationFailure {
    /// Classify a browser network error string (`net::ERR_*`).
    #[must_use]
    pub fn from_net_error(message: &str) -> Self {
        if message.contains("ERR_NAME_NOT_RESOLVED") || message.contains("ERR_NAME_RESOLUTION") {
            Self::Dns
        } else if message.contains("ERR_CONNECTION")
            || message.contains("ERR_ADDRESS_UNREACHABLE")
            || message.contains("ERR_EMPTY_RESPONSE")
        {
            Self::Connection
        } else if message.contains("ERR_TIMED_OUT") || message.contains("Timeout") {
            Self::Timeout
        } else {
            Self::Other(message.to_string())
        }
    }
}

impl fmt::Display for NavigationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns => write!(f, "DNS resolution failed"),
            Self::Connection => write!(f, "connection failed"),
            Self::HttpStatus(code) => write!(f, "HTTP status {code}"),
            Self::Timeout => write!(f, "timed out"),
            Self::Other(message) => write!(f, "{message}"),
        }
    }
}

/// Errors that can occur in Verger
#[derive(Debug, Error)]
pub enum VergerError {
    /// A supervised service did not pass its readiness probe in time
    #[error("Service {service} not ready after {waited_ms}ms")]
    StartupTimeout {
        /// Service name
        service: String,
        /// How long the supervisor waited
        waited_ms: u64,
    },

    /// A service's port is already bound by a process this run did not start
    #[error("Service {service}: {target} is already in use")]
    PortInUse {
        /// Service name
        service: String,
        /// Host/port or URL that answered
        target: String,
    },

    /// A service process could not be spawned
    #[error("Failed to spawn service {service}: {message}")]
    ProcessSpawn {
        /// Service name
        service: String,
        /// Error message
        message: String,
    },

    /// Role has no fixture mapping
    #[error("Unknown role: {role}")]
    UnknownRole {
        /// Role that was requested
        role: String,
    },

    /// Browser launch error
    #[error("Failed to launch browser: {message}")]
    BrowserLaunchError {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {failure}")]
    NavigationError {
        /// URL that failed
        url: String,
        /// Failure classification
        failure: NavigationFailure,
    },

    /// A wait condition was not met in time
    #[error("Timed out after {elapsed_ms}ms waiting for {condition}")]
    WaitTimeout {
        /// Condition description
        condition: String,
        /// Elapsed time in milliseconds
        elapsed_ms: u64,
    },

    /// No element matched a selector
    #[error("No element matches {selector}")]
    SelectorNotFound {
        /// Selector description
        selector: String,
    },

    /// Assertion failed
    #[error("Assertion failed: {message}")]
    AssertionFailed {
        /// Error message
        message: String,
    },

    /// Artifact could not be persisted
    #[error("Failed to write artifact {path}: {message}")]
    ArtifactWriteError {
        /// Destination path
        path: String,
        /// Error message
        message: String,
    },

    /// Page or protocol error
    #[error("Page error: {message}")]
    PageError {
        /// Error message
        message: String,
    },

    /// Scenario was cancelled before completing
    #[error("Cancelled: {reason}")]
    Cancelled {
        /// Why the scenario was cancelled
        reason: String,
    },

    /// Invalid configuration or scenario definition
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

/// Coarse error classification used in run summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`VergerError::StartupTimeout`]
    StartupTimeout,
    /// See [`VergerError::PortInUse`]
    PortInUse,
    /// See [`VergerError::ProcessSpawn`]
    ProcessSpawn,
    /// See [`VergerError::UnknownRole`]
    UnknownRole,
    /// See [`VergerError::BrowserLaunchError`]
    BrowserLaunch,
    /// See [`VergerError::NavigationError`]
    Navigation,
    /// See [`VergerError::WaitTimeout`]
    WaitTimeout,
    /// See [`VergerError::SelectorNotFound`]
    SelectorNotFound,
    /// See [`VergerError::AssertionFailed`]
    AssertionFailed,
    /// See [`VergerError::ArtifactWriteError`]
    ArtifactWrite,
    /// See [`VergerError::PageError`]
    Page,
    /// See [`VergerError::Cancelled`]
    Cancelled,
    /// Configuration, I/O and (de)serialization
    Config,
}

impl ErrorKind {
    /// Stable name used in summaries and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartupTimeout => "StartupTimeout",
            Self::PortInUse => "PortInUse",
            Self::ProcessSpawn => "ProcessSpawn",
            Self::UnknownRole => "UnknownRole",
            Self::BrowserLaunch => "BrowserLaunch",
            Self::Navigation => "NavigationError",
            Self::WaitTimeout => "WaitTimeout",
            Self::SelectorNotFound => "SelectorNotFound",
            Self::AssertionFailed => "AssertionFailed",
            Self::ArtifactWrite => "ArtifactWriteError",
            Self::Page => "PageError",
            Self::Cancelled => "Cancelled",
            Self::Config => "ConfigError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl VergerError {
    /// Create a page error
    #[must_use]
    pub fn page(message: impl Into<String>) -> Self {
        Self::PageError {
            message: message.into(),
        }
    }

    /// Create an assertion failure
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::AssertionFailed {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a cancellation error
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Classification of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::StartupTimeout { .. } => ErrorKind::StartupTimeout,
            Self::PortInUse { .. } => ErrorKind::PortInUse,
            Self::ProcessSpawn { .. } => ErrorKind::ProcessSpawn,
            Self::UnknownRole { .. } => ErrorKind::UnknownRole,
            Self::BrowserLaunchError { .. } => ErrorKind::BrowserLaunch,
            Self::NavigationError { .. } => ErrorKind::Navigation,
            Self::WaitTimeout { .. } => ErrorKind::WaitTimeout,
            Self::SelectorNotFound { .. } => ErrorKind::SelectorNotFound,
            Self::AssertionFailed { .. } => ErrorKind::AssertionFailed,
            Self::ArtifactWriteError { .. } => ErrorKind::ArtifactWrite,
            Self::PageError { .. } => ErrorKind::Page,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Config { .. } | Self::Io(_) | Self::Json(_) | Self::Yaml(_) => ErrorKind::Config,
        }
    }

    /// Errors no scenario can recover from: the run aborts after cleanup.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::StartupTimeout
                | ErrorKind::PortInUse
                | ErrorKind::ProcessSpawn
                | ErrorKind::UnknownRole
                | ErrorKind::BrowserLaunch
                | ErrorKind::Config
        )
    }
}
