//! Per-engine session state.
//!
//! Everything the query engine mutates across threads lives in one
//! [`Session`] behind a single mutex: the selected server, the held
//! connection, the in-flight query and the settings. Each engine owns its
//! own session; there is no process-wide state.

use std::sync::Arc;

use crate::models::{EngineSettings, PreviousQuery, QueryHandle};
use crate::services::connection::{close_quietly, Connection};

/// Mutable state of one query engine.
#[derive(Default)]
pub(crate) struct Session {
    /// Server queries are sent to
    pub selected_server: Option<String>,
    /// Server names last reported by the connection manager
    pub server_names: Vec<String>,
    /// Connection held between (or during) queries
    pub connection: Option<Arc<dyn Connection>>,
    /// The query currently in flight
    pub active: Option<Arc<QueryHandle>>,
    /// Last query accepted by `send_query`
    pub previous: Option<PreviousQuery>,
    /// Query execution settings
    pub settings: EngineSettings,
    /// Queries sent to primary servers
    pub query_count: u64,
}

impl Session {
    /// Create a session with the given settings.
    pub fn with_settings(settings: EngineSettings) -> Self {
        Self { settings, ..Self::default() }
    }

    /// Check whether a query is in flight.
    pub fn is_querying(&self) -> bool {
        self.active.is_some()
    }

    /// Check whether `handle` is the query in flight.
    pub fn is_active(&self, handle: &QueryHandle) -> bool {
        self.active.as_ref().is_some_and(|a| a.id() == handle.id())
    }

    /// Check whether `conn` is the held connection.
    pub fn holds(&self, conn: &Arc<dyn Connection>) -> bool {
        self.connection.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn))
    }

    /// Clear the in-flight marker if it still belongs to `handle`.
    pub fn finish(&mut self, handle: &QueryHandle) -> bool {
        if self.is_active(handle) {
            self.active = None;
            true
        } else {
            false
        }
    }

    /// Drop the held connection, closing it unless a query is using it.
    pub fn drop_connection(&mut self) {
        if let Some(conn) = self.connection.take() {
            if !self.is_querying() {
                close_quietly(conn.as_ref());
            }
        }
    }
}
