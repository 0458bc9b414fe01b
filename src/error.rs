//! Error types for studysync.

use thiserror::Error;

/// How a failed remote call should be treated by the replay loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The network is unreachable; stop the current pass.
    Connectivity,
    /// The remote is temporarily unable to serve; keep the operation queued.
    Transient,
    /// The remote refused the request; retrying is not expected to help.
    Rejected,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connectivity => "connectivity",
            Self::Transient => "transient",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// Errors produced by studysync.
#[derive(Debug, Error)]
pub enum StudySyncError {
    /// Configuration or argument problem.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Queue store failure (quota, corruption, schema).
    #[error("Database error: {0}")]
    Database(String),

    /// Filesystem or stdio failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or parsing failure.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A queued record or resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller supplied an operation the queue cannot accept.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The remote could not be reached.
    #[error("Network unavailable: {0}")]
    Network(String),

    /// The remote answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The background sync facility refused or is missing.
    #[error("Background sync unavailable: {0}")]
    BackgroundSync(String),
}

impl StudySyncError {
    /// Create an HTTP error from status and message.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Classify this error for replay decisions.
    ///
    /// Local failures (database, parse, invalid input) are rejections: the same
    /// operation will fail the same way on the next pass.
    #[must_use]
    pub const fn failure_class(&self) -> FailureClass {
        match self {
            Self::Network(_) => FailureClass::Connectivity,
            Self::Http { status, .. } => classify_http_status(*status),
            Self::Io(_) | Self::BackgroundSync(_) => FailureClass::Transient,
            Self::Config(_)
            | Self::Database(_)
            | Self::Parse(_)
            | Self::NotFound(_)
            | Self::InvalidInput(_) => FailureClass::Rejected,
        }
    }

    /// Whether this error means the network is unreachable.
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(self.failure_class(), FailureClass::Connectivity)
    }
}

impl From<rusqlite::Error> for StudySyncError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<reqwest::Error> for StudySyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            return Self::Network(e.to_string());
        }
        match e.status() {
            Some(status) => Self::http(status.as_u16(), e.to_string()),
            None if e.is_request() => Self::Network(e.to_string()),
            None => Self::Config(format!("HTTP client error: {e}")),
        }
    }
}

/// Classify an HTTP status into replay behaviour.
#[must_use]
pub const fn classify_http_status(status: u16) -> FailureClass {
    match status {
        408 | 425 | 429 | 500..=599 => FailureClass::Transient,
        _ => FailureClass::Rejected,
    }
}
