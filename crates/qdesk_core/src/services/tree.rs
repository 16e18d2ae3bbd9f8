//! Server object tree cache.
//!
//! Reads every namespace and object from a server in one metadata query and
//! keeps the result for read-only browsing. A malformed namespace is dropped
//! and reported by name; its siblings are still listed.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::QdeskError;
use crate::models::entity::TABLE_TYPE_CODE;
use crate::models::{EntityRecord, NamespaceListing, ServerConfig, ServerEntity};
use crate::services::connection::{close_quietly, ConnectionManager};
use crate::services::protocol::{decode_metadata_reply, MetadataReply, TREE_QUERY};

/// Namespaces that always exist on a primary server.
pub const BUILTIN_NAMESPACES: [&str; 5] = [".Q", ".j", ".q", ".h", ".o"];

/// Namespace relational tables are listed under.
const RELATIONAL_NAMESPACE: &str = ".";

const REMOTE_EXCEPTION_MESSAGE: &str =
    "Exception when querying server. Ensure server security settings ok.";

/// Outcome of one refresh. Replaced wholesale on every refresh.
#[derive(Debug, Clone, Default)]
struct RefreshResult {
    listings: BTreeMap<String, NamespaceListing>,
    error_message: String,
    failed_namespaces: Vec<String>,
}

impl RefreshResult {
    fn failed(message: impl Into<String>) -> Self {
        Self { error_message: message.into(), ..Self::default() }
    }
}

/// Cached object tree of one server.
pub struct ServerTreeCache {
    manager: Arc<dyn ConnectionManager>,
    server: ServerConfig,
    state: RwLock<RefreshResult>,
}

impl ServerTreeCache {
    /// Create a cache and populate it immediately.
    pub fn new(manager: Arc<dyn ConnectionManager>, server: ServerConfig) -> Self {
        let cache = Self { manager, server, state: RwLock::new(RefreshResult::default()) };
        cache.refresh();
        cache
    }

    /// The server this tree describes.
    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// Re-read the tree from the server, replacing the cached one.
    ///
    /// Never fails; problems are reported through [`Self::error_message`].
    pub fn refresh(&self) {
        let result = if self.server.is_kdb() {
            self.refresh_primary()
        } else {
            self.refresh_relational()
        };

        if result.error_message.is_empty() {
            tracing::info!(
                server = %self.server.name,
                namespaces = result.listings.len(),
                "Server tree refreshed"
            );
        } else {
            tracing::warn!(
                server = %self.server.name,
                namespaces = result.listings.len(),
                error = %result.error_message,
                "Server tree refreshed with errors"
            );
        }

        *self.state.write() = result;
    }

    fn refresh_primary(&self) -> RefreshResult {
        let conn = match self.manager.try_connect(&self.server.name) {
            Ok(conn) => conn,
            Err(e) => return RefreshResult::failed(transport_message(&e)),
        };
        let reply = conn.query(TREE_QUERY);
        close_quietly(conn.as_ref());

        let reply = match reply {
            Ok(reply) => reply,
            Err(QdeskError::Remote { message, .. }) => {
                tracing::debug!(server = %self.server.name, error = %message, "Tree query raised");
                return RefreshResult::failed(REMOTE_EXCEPTION_MESSAGE);
            }
            Err(e) => return RefreshResult::failed(transport_message(&e)),
        };

        match decode_metadata_reply(reply) {
            Ok(metadata) => self.build_listings(metadata),
            Err(QdeskError::Protocol { message }) => RefreshResult::failed(message),
            Err(e) => RefreshResult::failed(e.to_string()),
        }
    }

    fn build_listings(&self, metadata: MetadataReply) -> RefreshResult {
        let mut listings = BTreeMap::new();
        let mut failed_namespaces = Vec::new();

        for namespace in metadata.namespaces {
            let Some(objects) = namespace.objects else {
                tracing::warn!(namespace = %namespace.name, "Malformed namespace in server tree");
                failed_namespaces.push(namespace.name);
                continue;
            };

            let entities = objects
                .into_iter()
                .filter_map(|object| {
                    let record = match object.record {
                        Ok(record) => record,
                        Err(reason) => {
                            tracing::warn!(
                                namespace = %namespace.name,
                                name = %object.name,
                                reason = %reason,
                                "Skipping malformed object"
                            );
                            return None;
                        }
                    };
                    let type_code = record.type_code;
                    let entity = ServerEntity::from_record(
                        &self.server.name,
                        &namespace.name,
                        &object.name,
                        record,
                    );
                    if entity.is_none() {
                        tracing::warn!(
                            namespace = %namespace.name,
                            name = %object.name,
                            type_code,
                            "Skipping object with unknown type"
                        );
                    }
                    entity
                })
                .collect();

            listings.insert(namespace.name, NamespaceListing::new(entities));
        }

        let error_message = if failed_namespaces.is_empty() {
            String::new()
        } else {
            format!(
                "Could not refresh the server tree namespaces: {}",
                failed_namespaces.join(",")
            )
        };

        RefreshResult { listings, error_message, failed_namespaces }
    }

    fn refresh_relational(&self) -> RefreshResult {
        let Some(client) = self.manager.relational() else {
            return RefreshResult::failed("No relational client is configured");
        };

        let meta = match client.meta_info(&self.server) {
            Ok(meta) => meta,
            Err(e) => return RefreshResult::failed(transport_message(&e)),
        };

        let entities = meta
            .into_iter()
            .filter_map(|(table, columns)| {
                let record = EntityRecord {
                    type_code: TABLE_TYPE_CODE,
                    row_count: -1,
                    is_table: true,
                    is_partitioned: false,
                    names: Some(columns),
                    is_view: false,
                };
                ServerEntity::from_record(&self.server.name, RELATIONAL_NAMESPACE, table, record)
            })
            .collect();

        let mut listings = BTreeMap::new();
        listings.insert(RELATIONAL_NAMESPACE.to_string(), NamespaceListing::new(entities));
        RefreshResult { listings, ..RefreshResult::default() }
    }

    // ========== Projections ==========

    /// Every entity in every namespace.
    ///
    /// Each non-empty namespace also contributes its root pseudo-entity,
    /// listed after its members.
    pub fn all(&self) -> Vec<ServerEntity> {
        let state = self.state.read();
        let mut all = Vec::new();
        for (namespace, listing) in &state.listings {
            if listing.is_empty() {
                continue;
            }
            all.extend_from_slice(listing.all());
            all.push(ServerEntity::namespace_root(&self.server.name, namespace));
        }
        all
    }

    /// Entities in `namespace`; empty if the namespace is unknown.
    pub fn all_in(&self, namespace: &str) -> Vec<ServerEntity> {
        self.project(namespace, NamespaceListing::all)
    }

    /// Entities in each of `namespaces`, in the order given.
    pub fn all_in_namespaces(&self, namespaces: &[&str]) -> Vec<ServerEntity> {
        namespaces.iter().flat_map(|ns| self.all_in(ns)).collect()
    }

    pub fn tables(&self, namespace: &str) -> Vec<ServerEntity> {
        self.project(namespace, NamespaceListing::tables)
    }

    pub fn views(&self, namespace: &str) -> Vec<ServerEntity> {
        self.project(namespace, NamespaceListing::views)
    }

    pub fn variables(&self, namespace: &str) -> Vec<ServerEntity> {
        self.project(namespace, NamespaceListing::variables)
    }

    pub fn functions(&self, namespace: &str) -> Vec<ServerEntity> {
        self.project(namespace, NamespaceListing::functions)
    }

    fn project(
        &self,
        namespace: &str,
        part: fn(&NamespaceListing) -> &[ServerEntity],
    ) -> Vec<ServerEntity> {
        self.state.read().listings.get(namespace).map(|l| part(l).to_vec()).unwrap_or_default()
    }

    /// Check whether `entity` was in `namespace` at the last refresh.
    pub fn element_exists(&self, namespace: &str, entity: &ServerEntity) -> bool {
        self.state.read().listings.get(namespace).is_some_and(|l| l.contains(entity))
    }

    /// Check whether `namespace` was listed at the last refresh.
    ///
    /// Built-in namespaces always exist.
    pub fn namespace_exists(&self, namespace: &str) -> bool {
        BUILTIN_NAMESPACES.contains(&namespace)
            || self.state.read().listings.contains_key(namespace)
    }

    /// Namespaces listed at the last refresh, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        self.state.read().listings.keys().cloned().collect()
    }

    /// Namespaces dropped at the last refresh because they were malformed.
    pub fn failed_namespaces(&self) -> Vec<String> {
        self.state.read().failed_namespaces.clone()
    }

    /// Error from the last refresh; empty on success.
    pub fn error_message(&self) -> String {
        self.state.read().error_message.clone()
    }

    pub fn is_error_retrieving_tree(&self) -> bool {
        !self.state.read().error_message.is_empty()
    }
}

fn transport_message(e: &QdeskError) -> String {
    let detail = match e {
        QdeskError::Connection { message, .. } => message.clone(),
        other => other.to_string(),
    };
    format!("IO error communicating with server: {detail}")
}
