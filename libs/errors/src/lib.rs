//! Unified error handling for the syncsrv workspace
//!
//! Every component of the mirror (flattener, reflector, statement builder,
//! reconciler, collector, source adapters) reports failures through
//! [`SyncError`]. The run-level policy (skip, count, abort) is derived from
//! [`SyncErrorTrait::category`] and [`SyncError::is_fatal`] rather than from
//! the call site.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// ErrorInfo - serializable error summary
// ============================================================================

/// Serializable error summary, used in run reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (see [`SyncErrorTrait::error_code`])
    pub code: String,
    /// Error message
    pub message: String,
    /// Detailed error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Field-specific errors for validation
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub field_errors: HashMap<String, Vec<String>>,
}

impl ErrorInfo {
    /// Create a new ErrorInfo with just a message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            field_errors: HashMap::new(),
        }
    }

    /// Add details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Add a field error
    pub fn add_field_error(mut self, field: impl Into<String>, error: impl Into<String>) -> Self {
        self.field_errors
            .entry(field.into())
            .or_default()
            .push(error.into());
        self
    }
}

// ============================================================================
// SyncError - Main error type
// ============================================================================

/// Main error type for the mirror
#[derive(Debug, Error)]
pub enum SyncError {
    // ======================================
    // Caller & Data Errors
    // ======================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid timestamp: {value} is not a 13-digit millisecond epoch")]
    InvalidTimestamp { value: i64 },

    #[error("Record for {collection} has no value for conflict key {field}")]
    MissingConflictValue { collection: String, field: String },

    // ======================================
    // Schema Errors
    // ======================================
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Update on {collection} matched {rows} rows for a supposedly unique key")]
    MultiRowMutation { collection: String, rows: u64 },

    // ======================================
    // Store Errors
    // ======================================
    #[error("Store transport error: {0}")]
    StoreTransport(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Query failed: {query}: {error}")]
    QueryFailed { query: String, error: String },

    // ======================================
    // Remote Source Errors
    // ======================================
    #[error("Remote source error: {endpoint}: {message}")]
    RemoteSource { endpoint: String, message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    // ======================================
    // Configuration & I/O Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ======================================
    // Catch-all for other errors
    // ======================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Build a remote source error for an endpoint
    pub fn remote(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteSource {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Errors that invalidate the schema invariants the whole run depends on.
    ///
    /// A collection run stops on these instead of skipping the record or device.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MultiRowMutation { .. } | Self::UnknownCollection(_)
        )
    }

    /// Convert to a serializable ErrorInfo
    pub fn to_error_info(&self) -> ErrorInfo {
        let mut info = ErrorInfo::new(self.error_code(), self.to_string());

        match self {
            Self::MissingConflictValue { collection, field } => {
                info = info.add_field_error(field, format!("required by {}", collection));
            },
            Self::QueryFailed { query, error } => {
                info = info.with_details(format!("Query: {}, Error: {}", query, error));
            },
            _ => {},
        }

        info
    }
}

// Conversion traits for common error types
impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::num::ParseFloatError> for SyncError {
    fn from(err: std::num::ParseFloatError) -> Self {
        Self::InvalidInput(format!("Invalid float: {}", err))
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::SyncError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::SyncError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! invalid_input {
    ($msg:expr) => {
        $crate::SyncError::InvalidInput($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::SyncError::InvalidInput(format!($fmt, $($arg)*))
    };
}

// ============================================================================
// SyncError implements SyncErrorTrait
// ============================================================================

impl SyncErrorTrait for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InvalidTimestamp { .. } => "INVALID_TIMESTAMP",
            Self::MissingConflictValue { .. } => "MISSING_CONFLICT_VALUE",
            Self::UnknownCollection(_) => "UNKNOWN_COLLECTION",
            Self::MultiRowMutation { .. } => "MULTI_ROW_MUTATION",
            Self::StoreTransport(_) => "STORE_TRANSPORT",
            Self::Sqlite(_) => "SQLITE_ERROR",
            Self::QueryFailed { .. } => "QUERY_FAILED",
            Self::RemoteSource { .. } => "REMOTE_SOURCE_ERROR",
            Self::HttpClient(_) => "HTTP_CLIENT_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidInput(_) | Self::InvalidTimestamp { .. } => ErrorCategory::Validation,

            // Upstream data bug: the record cannot safely target an update
            Self::MissingConflictValue { .. } => ErrorCategory::Validation,

            Self::UnknownCollection(_) => ErrorCategory::Configuration,

            Self::MultiRowMutation { .. } => ErrorCategory::DataCorruption,

            Self::StoreTransport(_) => ErrorCategory::Connection,
            Self::Sqlite(_) | Self::QueryFailed { .. } => ErrorCategory::Database,

            Self::RemoteSource { .. } | Self::HttpClient(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,

            Self::Configuration(_) | Self::InvalidConfig { .. } => ErrorCategory::Configuration,

            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => ErrorCategory::Internal,

            Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

// ============================================================================
// Error Trait - Architectural layer
// ============================================================================

/// Error category enum - used for classification and run policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    // Infrastructure layer
    Configuration,
    Database,
    Connection,
    Network,
    Timeout,

    // Data layer
    Validation,
    DataCorruption,

    // System level
    Internal,
    Unknown,
}

/// Error capability trait
///
/// Gives every error type in the workspace a common outward-facing
/// interface: stable codes for logs, a category for policy decisions, and a
/// retry hint for callers that wrap single operations.
pub trait SyncErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Get error code (for logs and run reports)
    fn error_code(&self) -> &'static str;

    /// Get error category (for classification)
    fn category(&self) -> ErrorCategory;

    /// Whether the single failed operation may be retried (with backoff)
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Connection
        )
    }

    /// Recommended retry delay in milliseconds
    fn retry_delay_ms(&self) -> u64 {
        match self.category() {
            ErrorCategory::Network => 1000,
            ErrorCategory::Timeout => 500,
            ErrorCategory::Connection => 1500,
            _ => 0,
        }
    }

    /// Get log level
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Database | ErrorCategory::DataCorruption => {
                Level::ERROR
            },
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Connection => {
                Level::WARN
            },
            ErrorCategory::Validation => Level::INFO,
            _ => Level::WARN,
        }
    }
}
