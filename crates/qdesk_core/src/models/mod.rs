//! Data models for the qdesk core.
//!
//! This module contains all core data structures:
//! - `value` - Value, Table (decoded server replies)
//! - `entity` - ServerEntity, EntityKind, CannedQuery
//! - `listing` - NamespaceListing
//! - `query` - QueryHandle, QueryResult, ResultValue
//! - `server` - ServerConfig, ServerKind
//! - `settings` - EngineSettings
//! - `watch` - WatchedExpression, WatchList

pub mod entity;
pub mod listing;
pub mod query;
pub mod server;
pub mod settings;
pub mod value;
pub mod watch;

pub use entity::{CannedQuery, EntityKind, EntityRecord, IconRef, ServerEntity};
pub use listing::NamespaceListing;
pub use query::{PreviousQuery, QueryHandle, QueryResult, ResultValue};
pub use server::{ServerConfig, ServerConfigBuilder, ServerKind};
pub use settings::EngineSettings;
pub use value::{Table, Value};
pub use watch::{WatchList, WatchedExpression};
