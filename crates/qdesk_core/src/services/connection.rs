//! Contracts for the collaborators that own servers and connections.
//!
//! The core never opens sockets itself. A [`ConnectionManager`] knows the
//! configured servers and hands out [`Connection`]s to primary servers; a
//! [`RelationalClient`] runs SQL against relational ones.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::QdeskError;
use crate::models::{ServerConfig, Table, Value};

/// A live connection to a primary server.
///
/// `close` must be callable from another thread while a `query` call is
/// blocked, and must make that call return an error.
pub trait Connection: Send + Sync {
    /// Evaluate `text` on the server.
    ///
    /// Errors raised by the server itself are returned as
    /// [`QdeskError::Remote`]; everything else as [`QdeskError::Connection`].
    fn query(&self, text: &str) -> Result<Value, QdeskError>;

    /// Close the connection.
    fn close(&self) -> Result<(), QdeskError>;

    /// Check whether the connection is still open.
    fn is_connected(&self) -> bool;
}

/// Runs queries against relational servers.
pub trait RelationalClient: Send + Sync {
    /// Execute `sql` and return all rows.
    fn execute_query(&self, config: &ServerConfig, sql: &str) -> Result<Table, QdeskError>;

    /// Map of table name to its ordered column names.
    fn meta_info(&self, config: &ServerConfig) -> Result<BTreeMap<String, Vec<String>>, QdeskError>;
}

/// Owner of the configured servers.
pub trait ConnectionManager: Send + Sync {
    /// Look up a server by name.
    fn server(&self, name: &str) -> Option<ServerConfig>;

    /// Open a new connection to the named primary server.
    fn try_connect(&self, name: &str) -> Result<Arc<dyn Connection>, QdeskError>;

    /// All server names, in display order.
    fn server_names(&self) -> Vec<String>;

    /// Whether the manager currently reports the server as reachable.
    fn is_connected(&self, name: &str) -> bool;

    /// Client for relational servers, if one is configured.
    fn relational(&self) -> Option<&dyn RelationalClient> {
        None
    }
}

/// Change notifications published by a connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Servers were added, removed or edited.
    ConfigChanged,
    /// A server became reachable or unreachable.
    StatusChanged {
        /// Server name.
        server: String,
        /// New status.
        connected: bool,
    },
}

/// Close a connection, logging instead of failing.
pub(crate) fn close_quietly(conn: &dyn Connection) {
    if let Err(e) = conn.close() {
        tracing::debug!(error = %e, "Error closing connection");
    }
}
