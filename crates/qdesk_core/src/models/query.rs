//! Query execution models.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::value::{Table, Value};

/// Handle for tracking and cancelling a dispatched query.
pub struct QueryHandle {
    /// Unique query identifier
    id: Uuid,
    /// Server the query was sent to
    server: String,
    /// The query text as typed
    text: String,
    /// Display title, defaults to the text
    title: String,
    /// Cancellation token checked after every transport call
    cancel_token: CancellationToken,
    /// Dispatch time
    started_at: DateTime<Utc>,
}

impl QueryHandle {
    /// Create a new query handle. A missing title defaults to the query text.
    pub fn new(server: impl Into<String>, text: impl Into<String>, title: Option<&str>) -> Self {
        let text = text.into();
        let title = title.map(String::from).unwrap_or_else(|| text.clone());
        Self {
            id: Uuid::new_v4(),
            server: server.into(),
            text,
            title,
            cancel_token: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }

    /// Get the unique query identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get the target server name.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Get the query text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Get the display title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Get when the query was dispatched.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }

    /// Request cancellation of the query.
    pub fn cancel(&self) {
        tracing::debug!(query_id = %self.id, "Cancellation requested");
        self.cancel_token.cancel();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a clone of the cancellation token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

impl std::fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("id", &self.id)
            .field("server", &self.server)
            .field("title", &self.title)
            .field("started_at", &self.started_at)
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}

/// The last query sent, kept for resending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousQuery {
    /// Query text.
    pub text: String,
    /// Title supplied by the caller, if any.
    pub title: Option<String>,
}

/// Value carried by a successful result.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    /// The evaluated value.
    Returned(Value),
    /// The value exceeded the configured size limit and was not transmitted.
    Oversized,
    /// No value, e.g. a relational query that only produced rows.
    Absent,
}

/// Outcome of one query, delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// The query ran.
    Success {
        title: String,
        value: ResultValue,
        /// Tabular view of the value, when it has one.
        table: Option<Table>,
        /// Console rendering of the value plus any captured output.
        console_text: String,
    },
    /// The query, the connection or the server failed.
    Failure {
        title: String,
        error_message: String,
        stack_trace: Option<String>,
    },
    /// The user cancelled the query.
    Cancelled { title: String },
}

impl QueryResult {
    /// Successful result; the tabular view is derived from the value.
    pub fn success(title: impl Into<String>, value: ResultValue, console_text: impl Into<String>) -> Self {
        let table = match &value {
            ResultValue::Returned(v) => v.to_table(),
            _ => None,
        };
        Self::Success { title: title.into(), value, table, console_text: console_text.into() }
    }

    /// Successful result that only carries rows.
    pub fn tabular(title: impl Into<String>, table: Table) -> Self {
        Self::Success {
            title: title.into(),
            value: ResultValue::Absent,
            table: Some(table),
            console_text: String::new(),
        }
    }

    /// Failed result.
    pub fn failure(
        title: impl Into<String>,
        error_message: impl Into<String>,
        stack_trace: Option<String>,
    ) -> Self {
        Self::Failure { title: title.into(), error_message: error_message.into(), stack_trace }
    }

    /// Cancelled result.
    pub fn cancelled(title: impl Into<String>) -> Self {
        Self::Cancelled { title: title.into() }
    }

    /// Display title.
    pub fn title(&self) -> &str {
        match self {
            Self::Success { title, .. } | Self::Failure { title, .. } | Self::Cancelled { title } => {
                title
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Error message of a failed result.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Failure { error_message, .. } => Some(error_message),
            _ => None,
        }
    }

    /// Value of a successful result.
    pub fn value(&self) -> Option<&ResultValue> {
        match self {
            Self::Success { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Console text of a successful result.
    pub fn console_text(&self) -> Option<&str> {
        match self {
            Self::Success { console_text, .. } => Some(console_text),
            _ => None,
        }
    }
}
