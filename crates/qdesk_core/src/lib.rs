//! Core types and services for the qdesk database console.
//!
//! This crate provides the backend of the console:
//!
//! - **error**: Error handling for transport, remote and protocol failures
//! - **models**: Values, server entities, query results and settings
//! - **services**: Query engine, server tree cache and collaborator contracts
//! - **logging**: Structured logging setup

pub mod error;
pub mod logging;
pub mod models;
pub mod services;

mod session;

#[cfg(test)]
mod testing;


pub use error::{ErrorInfo, QdeskError};
pub use models::{
    CannedQuery, EngineSettings, EntityKind, IconRef, NamespaceListing, PreviousQuery,
    QueryHandle, QueryResult, ResultValue, ServerConfig, ServerEntity, ServerKind, Table, Value,
    WatchedExpression,
};
pub use services::{
    Connection, ConnectionEvent, ConnectionManager, PostgresClient, QueryEngine, QueryListener,
    RelationalClient, ServerTreeCache,
};
