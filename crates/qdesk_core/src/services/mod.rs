//! Backend services for the qdesk core.
//!
//! This module contains all service layer abstractions:
//! - `connection` - Collaborator contracts for servers and connections
//! - `observer` - Listener registry with per-listener isolation
//! - `postgres` - Relational client with deadpool-postgres
//! - `protocol` - Query wrapping and reply decoding
//! - `query` - Query execution with cancellation support
//! - `tree` - Server object tree cache

pub mod connection;
pub mod observer;
pub mod postgres;
pub mod protocol;
pub mod query;
pub mod tree;

pub use connection::{Connection, ConnectionEvent, ConnectionManager, RelationalClient};
pub use observer::{ObserverRegistry, QueryListener};
pub use postgres::PostgresClient;
pub use query::QueryEngine;
pub use tree::ServerTreeCache;
