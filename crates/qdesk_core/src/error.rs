//! Error types for the qdesk core.
//!
//! Separates caller mistakes (`InvalidState`, `IndexNotFound`) that surface
//! immediately from transport, remote evaluation and protocol failures that the
//! query engine converts into failed query results.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for the qdesk core.
#[derive(Debug, Error)]
pub enum QdeskError {
    /// Operation not allowed in the current engine state.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Human-readable error message.
        message: String,
    },

    /// Index-addressed element does not exist.
    #[error("Index {index} not found (length {len})")]
    IndexNotFound {
        /// Requested index.
        index: usize,
        /// Length of the collection at the time of the request.
        len: usize,
    },

    /// Connecting to, querying or closing a server failed at the transport level.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The remote evaluator raised an error.
    #[error("{message}")]
    Remote {
        /// Error title reported by the server.
        message: String,
        /// Remote backtrace, if one was captured.
        stack_trace: Option<String>,
    },

    /// The server replied with a shape we do not understand.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Human-readable error message.
        message: String,
    },

    /// Relational server error.
    #[error("{message}")]
    Sql {
        /// Server error message.
        message: String,
        /// SQLSTATE code, when known.
        code: Option<String>,
    },

    /// Query was cancelled.
    #[error("Query cancelled")]
    QueryCancelled {
        /// ID of the cancelled query.
        query_id: Uuid,
    },

    /// Configuration error.
    #[error("Config error: {message}")]
    Config {
        /// Human-readable error message.
        message: String,
    },

    /// Local file error (settings, logs).
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unexpected internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
    },
}

impl QdeskError {
    // ========== Constructors ==========

    /// Create a new invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState { message: message.into() }
    }

    /// Create a new index-not-found error.
    pub fn index_not_found(index: usize, len: usize) -> Self {
        Self::IndexNotFound { index, len }
    }

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Create a new connection error with source.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a remote evaluation error.
    pub fn remote(message: impl Into<String>, stack_trace: Option<String>) -> Self {
        Self::Remote { message: message.into(), stack_trace }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create a relational server error.
    pub fn sql(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Sql { message: message.into(), code }
    }

    /// Create a query cancelled error.
    pub fn query_cancelled(query_id: Uuid) -> Self {
        Self::QueryCancelled { query_id }
    }

    /// Create a new config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a new storage error.
    pub fn storage(message: impl Into<String>, hint: Option<&str>) -> Self {
        Self::Storage { message: message.into(), hint: hint.map(String::from), source: None }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    // ========== Methods ==========

    /// Check if this error represents a cancelled query.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::QueryCancelled { .. })
    }

    /// Check if this error came from the transport rather than the server.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Check if this error was rejected before anything was dispatched.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidState { .. } => "State",
            Self::IndexNotFound { .. } => "Index",
            Self::Connection { .. } => "Connection",
            Self::Remote { .. } => "Query",
            Self::Protocol { .. } => "Protocol",
            Self::Sql { .. } => "SQL",
            Self::QueryCancelled { .. } => "Query",
            Self::Config { .. } => "Config",
            Self::Storage { .. } => "Storage",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get actionable hint for the user.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::InvalidState { .. } => None,
            Self::IndexNotFound { .. } => None,
            Self::Connection { .. } => Some("Check that the server is running and reachable"),
            Self::Remote { .. } => None,
            Self::Protocol { .. } => Some("The server may wrap or filter query replies"),
            Self::Sql { .. } => None,
            Self::QueryCancelled { .. } => None,
            Self::Config { .. } => None,
            Self::Storage { hint, .. } => hint.as_deref(),
            Self::Internal { .. } => Some("Please report this issue"),
        }
    }

    /// Get the remote stack trace (if applicable).
    pub fn stack_trace(&self) -> Option<&str> {
        match self {
            Self::Remote { stack_trace, .. } => stack_trace.as_deref(),
            _ => None,
        }
    }

    /// Convert to user-displayable error info.
    pub fn to_error_info(&self) -> ErrorInfo {
        let error_type = format!("{} Error", self.category());
        let message = self.to_string();
        let hint = self.hint().map(String::from);

        let technical_detail = match self {
            Self::Remote { stack_trace, .. } => stack_trace.clone(),
            Self::Sql { code: Some(code), .. } => Some(format!("Code: {code}")),
            Self::QueryCancelled { query_id } => Some(format!("Query: {query_id}")),
            _ => None,
        };

        ErrorInfo { error_type, message, hint, technical_detail }
    }
}

/// User-displayable error information.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Category name (e.g., "Connection Error").
    pub error_type: String,
    /// User-friendly message.
    pub message: String,
    /// Actionable suggestion.
    pub hint: Option<String>,
    /// Technical detail for "Show Details" expansion.
    pub technical_detail: Option<String>,
}

// ========== Error Conversions ==========

/// Convert from tokio_postgres::Error to QdeskError.
impl From<tokio_postgres::Error> for QdeskError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code = db_err.code().code();
            // Connection exceptions (08xxx)
            if code.starts_with("08") {
                return QdeskError::Connection {
                    message: db_err.message().to_string(),
                    source: Some(Box::new(err)),
                };
            }
            return QdeskError::Sql {
                message: db_err.message().to_string(),
                code: Some(code.to_string()),
            };
        }

        if err.is_closed() {
            return QdeskError::Connection {
                message: "Connection closed".to_string(),
                source: Some(Box::new(err)),
            };
        }

        QdeskError::Connection { message: err.to_string(), source: Some(Box::new(err)) }
    }
}

/// Convert from std::io::Error to QdeskError.
impl From<std::io::Error> for QdeskError {
    fn from(err: std::io::Error) -> Self {
        QdeskError::Storage {
            message: err.to_string(),
            hint: Some("Check file permissions and disk space".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Convert from serde_json::Error to QdeskError.
impl From<serde_json::Error> for QdeskError {
    fn from(err: serde_json::Error) -> Self {
        QdeskError::Storage {
            message: format!("JSON error: {err}"),
            hint: Some("Data may be corrupted".to_string()),
            source: Some(Box::new(err)),
        }
    }
}
