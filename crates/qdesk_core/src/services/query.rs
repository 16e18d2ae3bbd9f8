//! Query execution against the selected server.
//!
//! Provides:
//! - One query in flight per engine; a second `send_query` fails instead of queueing
//! - Cancellation by closing the transport, reported as a cancelled result
//! - Optional query wrapping (size cap, console text, trapped errors)
//! - Watched expressions re-evaluated after every query
//! - Listener fan-out with per-listener isolation

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::QdeskError;
use crate::models::{
    EngineSettings, PreviousQuery, QueryHandle, QueryResult, ResultValue, ServerConfig,
    WatchList, WatchedExpression,
};
use crate::services::connection::{close_quietly, Connection, ConnectionEvent, ConnectionManager};
use crate::services::observer::{ObserverRegistry, QueryListener};
use crate::services::protocol::{
    decode_wrapped_reply, wrap_query, RunOutcome, WrappedReply, IDENTITY_QUERY,
};
use crate::session::Session;

/// Title of the query sent to refresh watched expressions.
pub const REFRESH_WATCHES_TITLE: &str = "Refresh Watched Expressions";

/// Sends queries to the selected server and notifies listeners.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct QueryEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    manager: Arc<dyn ConnectionManager>,
    runtime: Handle,
    session: Mutex<Session>,
    selection: Mutex<()>,
    watches: RwLock<WatchList>,
    listeners: ObserverRegistry<dyn QueryListener>,
}

/// Clears the in-flight marker when the worker finishes, even on unwind.
struct InFlightGuard<'a> {
    session: &'a Mutex<Session>,
    handle: &'a QueryHandle,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.session.lock().finish(self.handle) {
            tracing::trace!(query_id = %self.handle.id(), "Query no longer in flight");
        }
    }
}

impl QueryEngine {
    /// Create an engine with default settings.
    ///
    /// Queries run on `runtime`'s blocking pool. The server list is read
    /// immediately and a server is selected if any exist.
    pub fn new(manager: Arc<dyn ConnectionManager>, runtime: Handle) -> Self {
        Self::with_settings(manager, runtime, EngineSettings::default())
    }

    /// Create an engine with the given settings.
    pub fn with_settings(
        manager: Arc<dyn ConnectionManager>,
        runtime: Handle,
        settings: EngineSettings,
    ) -> Self {
        let engine = Self {
            inner: Arc::new(EngineInner {
                manager,
                runtime,
                session: Mutex::new(Session::with_settings(settings)),
                selection: Mutex::new(()),
                watches: RwLock::new(WatchList::new()),
                listeners: ObserverRegistry::new(),
            }),
        };
        engine.refresh_server_list();
        engine
    }

    // ========== Listeners ==========

    /// Register a listener.
    pub fn add_listener(&self, listener: Arc<dyn QueryListener>) {
        self.inner.listeners.add(listener);
    }

    /// Unregister a listener. Returns true if it was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn QueryListener>) -> bool {
        self.inner.listeners.remove(listener)
    }

    // ========== Server Selection ==========

    /// Select the server queries are sent to.
    ///
    /// Does nothing if `name` is already selected. Otherwise the held
    /// connection is dropped and listeners are told the new selection,
    /// which is `None` when the name is unknown to the manager.
    pub fn select_server(&self, name: Option<&str>) {
        // Selections are serialized so listeners see them in the order they
        // took effect. Listeners may read engine state but must not select.
        let _selecting = self.inner.selection.lock();

        let selected = {
            let mut session = self.inner.session.lock();
            let current = session.selected_server.as_deref();
            let change_to_none = name.is_none() && current.is_some();
            let actual_change = name.is_some() && name != current;
            if !change_to_none && !actual_change {
                tracing::trace!(server = ?name, "Server already selected");
                return;
            }
            session.drop_connection();
            session.selected_server =
                name.filter(|n| self.inner.manager.server(n).is_some()).map(String::from);
            session.selected_server.clone()
        };

        tracing::info!(server = ?selected, "Selected server changed");
        self.inner.listeners.notify("selected_server_changed", |l| {
            l.selected_server_changed(selected.as_deref())
        });
    }

    /// Name of the selected server.
    pub fn selected_server(&self) -> Option<String> {
        self.inner.session.lock().selected_server.clone()
    }

    /// Server names last read from the connection manager.
    pub fn server_names(&self) -> Vec<String> {
        self.inner.session.lock().server_names.clone()
    }

    /// Re-read the server list and keep a valid selection.
    ///
    /// If the selected server is gone, the first connected server is
    /// selected, else the last server, else none.
    pub fn refresh_server_list(&self) {
        let names = self.inner.manager.server_names();
        self.inner.session.lock().server_names = names.clone();
        self.inner
            .listeners
            .notify("server_listing_changed", |l| l.server_listing_changed(&names));

        let selected = self.selected_server();
        if selected.as_ref().is_some_and(|s| names.contains(s)) {
            return;
        }
        let next = names
            .iter()
            .find(|n| self.inner.manager.is_connected(n))
            .or_else(|| names.last())
            .cloned();
        self.select_server(next.as_deref());
    }

    /// React to a connection manager notification.
    pub fn handle_connection_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::ConfigChanged => {
                tracing::debug!("Server configuration changed");
                self.refresh_server_list();
                self.inner.session.lock().drop_connection();
            }
            ConnectionEvent::StatusChanged { server, connected } => {
                tracing::debug!(server = %server, connected, "Server status changed");
            }
        }
    }

    /// Apply connection manager notifications until the sender is dropped.
    pub fn spawn_event_listener(
        &self,
        mut events: broadcast::Receiver<ConnectionEvent>,
    ) -> JoinHandle<()> {
        let engine = self.clone();
        self.inner.runtime.spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => engine.handle_connection_event(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Missed connection events, reloading servers");
                        engine.handle_connection_event(ConnectionEvent::ConfigChanged);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    // ========== Queries ==========

    /// Send a query to the selected server.
    ///
    /// `title` is what listeners are shown; it defaults to the query text.
    /// Blank queries are ignored. Returns the worker task, which completes
    /// after listeners and watched expressions have been updated.
    ///
    /// # Errors
    /// `InvalidState` if no server is selected or a query is in flight.
    pub fn send_query(
        &self,
        text: &str,
        title: Option<&str>,
    ) -> Result<Option<JoinHandle<()>>, QdeskError> {
        let server = self
            .selected_server()
            .ok_or_else(|| QdeskError::invalid_state("Select a server to send queries to"))?;

        if text.trim().is_empty() {
            return Ok(None);
        }

        let config = self.inner.manager.server(&server).ok_or_else(|| {
            QdeskError::invalid_state(format!("Server {server} is no longer configured"))
        })?;

        let handle = {
            let mut session = self.inner.session.lock();
            if session.is_querying() {
                return Err(QdeskError::invalid_state("Only one query at a time"));
            }
            let handle = Arc::new(QueryHandle::new(server, text, title));
            session.active = Some(handle.clone());
            session.previous =
                Some(PreviousQuery { text: text.to_string(), title: title.map(String::from) });
            handle
        };

        tracing::debug!(query_id = %handle.id(), server = %config.name, "Query dispatched");

        let inner = self.inner.clone();
        let task = self.inner.runtime.spawn_blocking(move || inner.run_cycle(&config, &handle));
        Ok(Some(task))
    }

    /// Send the previous query again with its recorded title.
    pub fn resend_last_query(&self) -> Result<Option<JoinHandle<()>>, QdeskError> {
        let previous = self.inner.session.lock().previous.clone();
        match previous {
            Some(p) => self.send_query(&p.text, p.title.as_deref()),
            None => Ok(None),
        }
    }

    /// Cancel the query in flight by closing its connection.
    ///
    /// The server cannot be asked to stop evaluating, so the transport is
    /// torn down instead. The query's result is reported as cancelled.
    /// Returns true if a query was in flight.
    pub fn cancel_query(&self) -> bool {
        let conn = {
            let mut session = self.inner.session.lock();
            let Some(handle) = session.active.take() else {
                return false;
            };
            tracing::warn!(query_id = %handle.id(), "Cancelling query");
            handle.cancel();
            session.connection.take()
        };

        if let Some(conn) = conn {
            close_quietly(conn.as_ref());
            tracing::debug!("Connection closed for cancellation");
        }
        true
    }

    /// Check whether a query is in flight.
    pub fn is_querying(&self) -> bool {
        self.inner.session.lock().is_querying()
    }

    /// The last query accepted by `send_query`.
    pub fn previous_query(&self) -> Option<PreviousQuery> {
        self.inner.session.lock().previous.clone()
    }

    /// Check whether a connection is held.
    pub fn has_connection(&self) -> bool {
        self.inner.session.lock().connection.is_some()
    }

    /// Number of queries evaluated on primary servers.
    pub fn query_count(&self) -> u64 {
        self.inner.session.lock().query_count
    }

    // ========== Settings ==========

    /// Snapshot of the current settings.
    pub fn settings(&self) -> EngineSettings {
        self.inner.session.lock().settings.clone()
    }

    /// Wrap queries to cap reply size, capture console text and trap errors.
    pub fn set_query_wrapped(&self, wrapped: bool) {
        self.inner.session.lock().settings.query_wrapped = wrapped;
    }

    /// Keep the connection open between queries.
    pub fn set_connection_persisted(&self, persisted: bool) {
        self.inner.session.lock().settings.connection_persisted = persisted;
    }

    /// Maximum reply size in bytes; 0 means unbounded.
    pub fn set_max_return_size(&self, bytes: u64) {
        self.inner.session.lock().settings.max_return_size = bytes;
    }

    /// Text prepended to every query.
    pub fn set_query_wrap_prefix(&self, prefix: impl Into<String>) {
        self.inner.session.lock().settings.query_wrap_prefix = prefix.into();
    }

    /// Text appended to every query.
    pub fn set_query_wrap_postfix(&self, postfix: impl Into<String>) {
        self.inner.session.lock().settings.query_wrap_postfix = postfix.into();
    }

    // ========== Watched Expressions ==========

    /// Add an expression evaluated after every query.
    ///
    /// When no query is in flight a refresh is sent right away and its task
    /// is returned; otherwise the running query refreshes it.
    pub fn add_watched_expression(&self, expression: &str) -> Option<JoinHandle<()>> {
        self.inner.watches.write().add(expression);

        let task = if self.is_querying() {
            None
        } else {
            match self.refresh_watched_expressions() {
                Ok(task) => task,
                Err(e) => {
                    tracing::debug!(error = %e, "Watched expression refresh skipped");
                    None
                }
            }
        };

        self.inner.notify_watches_modified();
        task
    }

    /// Replace the expression at `index`.
    pub fn set_watched_expression(&self, index: usize, expression: &str) -> Result<(), QdeskError> {
        self.inner.watches.write().set(index, expression)?;
        self.inner.notify_watches_modified();
        Ok(())
    }

    /// Remove the expression at `index`.
    pub fn remove_watched_expression(&self, index: usize) -> Result<WatchedExpression, QdeskError> {
        let removed = self.inner.watches.write().remove(index)?;
        self.inner.notify_watches_modified();
        Ok(removed)
    }

    /// Remove every watched expression.
    pub fn clear_watched_expressions(&self) {
        self.inner.watches.write().clear();
        self.inner.notify_watches_modified();
    }

    /// Snapshot of the watched expressions and their last results.
    pub fn watched_expressions(&self) -> Vec<WatchedExpression> {
        self.inner.watches.read().to_vec()
    }

    /// Send the identity query so every watched expression is re-evaluated.
    pub fn refresh_watched_expressions(&self) -> Result<Option<JoinHandle<()>>, QdeskError> {
        self.send_query(IDENTITY_QUERY, Some(REFRESH_WATCHES_TITLE))
    }
}

impl EngineInner {
    /// One full query cycle. Runs on the blocking pool.
    fn run_cycle(&self, config: &ServerConfig, handle: &QueryHandle) {
        let _in_flight = InFlightGuard { session: &self.session, handle };

        tracing::info!(
            query_id = %handle.id(),
            server = %config.name,
            title = %handle.title(),
            "Sending query"
        );
        self.listeners.notify("sending_query", |l| l.sending_query(config, handle.title()));

        if !config.is_kdb() {
            let result = self.run_relational(config, handle);
            self.publish(config, handle, &result);
            if !handle.is_cancelled() {
                self.refresh_watched(None);
            }
            return;
        }

        let conn = match self.acquire_connection(handle) {
            Ok(conn) => conn,
            Err(e) => {
                let result = if handle.is_cancelled() {
                    QueryResult::cancelled(handle.title())
                } else {
                    tracing::warn!(query_id = %handle.id(), error = %e, "Could not connect");
                    QueryResult::failure(handle.title(), e.to_string(), None)
                };
                self.publish(config, handle, &result);
                return;
            }
        };

        let result = self.evaluate(conn.as_ref(), handle);
        self.publish(config, handle, &result);

        if !handle.is_cancelled() {
            self.refresh_watched(Some(conn.as_ref()));
        }
        self.release_connection(conn, handle);
    }

    /// Reuse the held connection or open a new one.
    fn acquire_connection(&self, handle: &QueryHandle) -> Result<Arc<dyn Connection>, QdeskError> {
        {
            let mut session = self.session.lock();
            match session.connection.as_ref() {
                Some(conn) if conn.is_connected() => return Ok(conn.clone()),
                Some(_) => session.connection = None,
                None => {}
            }
        }

        if handle.is_cancelled() {
            return Err(QdeskError::query_cancelled(handle.id()));
        }

        tracing::debug!(query_id = %handle.id(), server = %handle.server(), "Connecting");
        let conn = self.manager.try_connect(handle.server())?;

        let mut session = self.session.lock();
        if handle.is_cancelled() {
            drop(session);
            close_quietly(conn.as_ref());
            return Err(QdeskError::query_cancelled(handle.id()));
        }
        session.connection = Some(conn.clone());
        Ok(conn)
    }

    /// Send the query and turn the reply into a result.
    fn evaluate(&self, conn: &dyn Connection, handle: &QueryHandle) -> QueryResult {
        let settings = {
            let mut session = self.session.lock();
            session.query_count += 1;
            session.settings.clone()
        };

        let query = format!(
            "{}{}{}",
            settings.query_wrap_prefix,
            handle.text(),
            settings.query_wrap_postfix
        );
        let text = if settings.query_wrapped {
            wrap_query(&query, settings.max_return_size)
        } else {
            query
        };

        let reply = conn.query(&text);

        if handle.is_cancelled() {
            tracing::debug!(query_id = %handle.id(), "Reply discarded, query was cancelled");
            return QueryResult::cancelled(handle.title());
        }

        let title = handle.title();
        match reply {
            Err(QdeskError::Remote { message, stack_trace }) => {
                QueryResult::failure(title, message, stack_trace)
            }
            Err(e) => {
                tracing::warn!(query_id = %handle.id(), error = %e, "Query failed");
                QueryResult::failure(title, e.to_string(), None)
            }
            Ok(value) if !settings.query_wrapped => {
                let console_text = value.to_string();
                QueryResult::success(title, ResultValue::Returned(value), console_text)
            }
            Ok(value) => match decode_wrapped_reply(value) {
                Ok(WrappedReply { outcome, console_text, .. }) => match outcome {
                    RunOutcome::Ok(value) => {
                        QueryResult::success(title, ResultValue::Returned(value), console_text)
                    }
                    RunOutcome::Oversized => {
                        tracing::debug!(query_id = %handle.id(), "Reply exceeded size limit");
                        QueryResult::success(title, ResultValue::Oversized, console_text)
                    }
                    RunOutcome::Err { message, stack_trace } => {
                        QueryResult::failure(title, message, stack_trace)
                    }
                },
                Err(e) => {
                    tracing::error!(query_id = %handle.id(), error = %e, "Unrecognised reply");
                    QueryResult::failure(title, e.to_string(), None)
                }
            },
        }
    }

    /// Run the query through the relational client.
    fn run_relational(&self, config: &ServerConfig, handle: &QueryHandle) -> QueryResult {
        let Some(client) = self.manager.relational() else {
            return QueryResult::failure(
                handle.title(),
                "No relational client is configured",
                None,
            );
        };

        let result = client.execute_query(config, handle.text());
        if handle.is_cancelled() {
            return QueryResult::cancelled(handle.title());
        }
        match result {
            Ok(table) => QueryResult::tabular(handle.title(), table),
            Err(e) => {
                tracing::warn!(query_id = %handle.id(), error = %e, "SQL query failed");
                QueryResult::failure(handle.title(), e.to_string(), None)
            }
        }
    }

    fn publish(&self, config: &ServerConfig, handle: &QueryHandle, result: &QueryResult) {
        let outcome = match result {
            QueryResult::Success { .. } => "success",
            QueryResult::Failure { .. } => "failure",
            QueryResult::Cancelled { .. } => "cancelled",
        };
        tracing::info!(
            query_id = %handle.id(),
            outcome,
            elapsed_ms = handle.elapsed_ms(),
            "Query result returned"
        );
        self.listeners
            .notify("query_result_returned", |l| l.query_result_returned(config, result));
    }

    /// Re-evaluate every watched expression over `conn`.
    ///
    /// Results are reset first so a failure never leaves a stale value.
    /// Evaluation stops once the connection drops.
    fn refresh_watched(&self, conn: Option<&dyn Connection>) {
        self.watches.write().reset_results();

        if let Some(conn) = conn.filter(|c| c.is_connected()) {
            let expressions: Vec<String> =
                self.watches.read().iter().map(|w| w.expression().to_string()).collect();

            for (index, expression) in expressions.iter().enumerate() {
                if !conn.is_connected() {
                    tracing::debug!(remaining = expressions.len() - index, "Connection dropped");
                    break;
                }
                let result = match conn.query(expression) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::debug!(expression = %expression, error = %e, "Watch failed");
                        None
                    }
                };
                // The list may have been edited while we were querying.
                let mut watches = self.watches.write();
                if let Some(w) = watches.get_mut(index).filter(|w| w.expression() == expression) {
                    w.set_last_result(result);
                }
            }
        }

        tracing::info!("Watched expressions refreshed");
        self.listeners
            .notify("watched_expressions_refreshed", |l| l.watched_expressions_refreshed());
    }

    /// Close the connection unless it is persisted and still held.
    fn release_connection(&self, conn: Arc<dyn Connection>, handle: &QueryHandle) {
        let mut session = self.session.lock();
        let held = session.holds(&conn);
        if held && session.settings.connection_persisted && !handle.is_cancelled() {
            tracing::trace!(query_id = %handle.id(), "Keeping connection open");
            return;
        }
        if held {
            session.connection = None;
        }
        drop(session);
        close_quietly(conn.as_ref());
    }

    fn notify_watches_modified(&self) {
        self.listeners
            .notify("watched_expressions_modified", |l| l.watched_expressions_modified());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Table, Value};
    use crate::testing::{
        kdb_server, postgres_server, wrapped_err, wrapped_ok, Event, MockManager, MockRelational,
        RecordingListener,
    };

    fn engine_with(manager: &Arc<MockManager>) -> (QueryEngine, Arc<RecordingListener>) {
        let engine = QueryEngine::new(manager.clone(), Handle::current());
        let listener = RecordingListener::new();
        engine.add_listener(listener.clone());
        (engine, listener)
    }

    fn ok_manager() -> Arc<MockManager> {
        Arc::new(MockManager::new(vec![kdb_server("local")], |_| {
            Ok(wrapped_ok(Value::Long(4), "4\n"))
        }))
    }

    async fn run(engine: &QueryEngine, text: &str) {
        engine.send_query(text, None).unwrap().unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_without_server_is_invalid_state() {
        let manager = Arc::new(MockManager::new(vec![], |_| Ok(Value::Null)));
        let (engine, _) = engine_with(&manager);

        assert_eq!(engine.selected_server(), None);
        let err = engine.send_query("1+1", None).unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[tokio::test]
    async fn test_blank_query_is_ignored() {
        let manager = ok_manager();
        let (engine, listener) = engine_with(&manager);

        assert!(engine.send_query("  \n\t", None).unwrap().is_none());
        assert!(!engine.is_querying());
        assert!(manager.connections().is_empty());
        assert!(listener.events().is_empty());
    }

    #[tokio::test]
    async fn test_success_result_carries_value_and_console() {
        let manager = ok_manager();
        let (engine, listener) = engine_with(&manager);

        run(&engine, "2+2").await;

        let results = listener.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title(), "2+2");
        assert_eq!(results[0].value(), Some(&ResultValue::Returned(Value::Long(4))));
        assert_eq!(results[0].console_text(), Some("4\n"));
        assert_eq!(engine.query_count(), 1);
        assert!(matches!(listener.events()[0], Event::Sending(ref t) if t == "2+2"));
    }

    #[tokio::test]
    async fn test_remote_error_is_failure() {
        let manager =
            Arc::new(MockManager::new(vec![kdb_server("local")], |_| Ok(wrapped_err("type"))));
        let (engine, listener) = engine_with(&manager);

        run(&engine, "1+`a").await;

        let results = listener.results();
        assert!(results[0].is_failure());
        assert_eq!(results[0].error_message(), Some("type"));
    }

    #[tokio::test]
    async fn test_unwrapped_reply_in_wrapped_mode_is_failure() {
        let manager =
            Arc::new(MockManager::new(vec![kdb_server("local")], |_| Ok(Value::chars("nope"))));
        let (engine, listener) = engine_with(&manager);

        run(&engine, "x").await;

        assert!(listener.results()[0].error_message().unwrap_or("").contains("unwrapped"));
        assert!(!engine.is_querying());
    }

    #[tokio::test]
    async fn test_connect_failure_reports_failure() {
        let manager = ok_manager();
        manager.fail_connections(true);
        let (engine, listener) = engine_with(&manager);

        run(&engine, "1").await;

        let results = listener.results();
        assert_eq!(results.len(), 1);
        assert!(results[0].error_message().unwrap_or("").contains("Connection refused"));
        assert_eq!(listener.count(|e| matches!(e, Event::Refreshed)), 0);
        assert!(!engine.has_connection());
        assert_eq!(engine.query_count(), 0);
    }

    #[tokio::test]
    async fn test_unwrapped_mode_sends_prefix_and_postfix() {
        let manager = Arc::new(MockManager::new(vec![kdb_server("local")], |_| Ok(Value::Long(7))));
        let (engine, listener) = engine_with(&manager);
        engine.set_query_wrapped(false);
        engine.set_query_wrap_prefix("\\t ");
        engine.set_query_wrap_postfix(" / timed");

        run(&engine, "til 10").await;

        assert_eq!(manager.connections()[0].queries()[0], "\\t til 10 / timed");
        let results = listener.results();
        assert_eq!(results[0].value(), Some(&ResultValue::Returned(Value::Long(7))));
        assert_eq!(results[0].console_text(), Some("7"));
    }

    #[tokio::test]
    async fn test_select_server_notifies_only_on_change() {
        let manager = Arc::new(MockManager::new(
            vec![kdb_server("a"), kdb_server("b")],
            |_| Ok(Value::Null),
        ));
        let (engine, listener) = engine_with(&manager);
        assert_eq!(engine.selected_server().as_deref(), Some("b"));

        engine.select_server(Some("b"));
        assert!(listener.events().is_empty());

        engine.select_server(Some("a"));
        engine.select_server(Some("missing"));
        engine.select_server(None);

        let selections: Vec<Option<String>> = listener
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Selected(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(selections, vec![Some("a".to_string()), None]);
        assert_eq!(engine.selected_server(), None);
    }

    #[tokio::test]
    async fn test_concurrent_selections_notify_in_applied_order() {
        let manager = Arc::new(MockManager::new(
            vec![kdb_server("a"), kdb_server("b"), kdb_server("c")],
            |_| Ok(Value::Null),
        ));
        let (engine, listener) = engine_with(&manager);

        std::thread::scope(|scope| {
            for i in 0..6 {
                let engine = engine.clone();
                scope.spawn(move || {
                    for round in 0..50 {
                        let name = ["a", "b", "missing"][(i + round) % 3];
                        engine.select_server(Some(name));
                    }
                });
            }
        });

        let selections: Vec<Option<String>> = listener
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Selected(s) => Some(s),
                _ => None,
            })
            .collect();
        assert!(!selections.is_empty());
        assert_eq!(selections.last().cloned().flatten(), engine.selected_server());
    }

    #[tokio::test]
    async fn test_auto_selects_first_connected_server() {
        let manager = Arc::new(MockManager::new(
            vec![kdb_server("a"), kdb_server("b"), kdb_server("c")],
            |_| Ok(Value::Null),
        ));
        manager.set_connected("b");
        let engine = QueryEngine::new(manager.clone(), Handle::current());
        assert_eq!(engine.selected_server().as_deref(), Some("b"));
        assert_eq!(engine.server_names(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_config_change_reselects_and_drops_connection() {
        let manager = ok_manager();
        let (engine, listener) = engine_with(&manager);
        engine.set_connection_persisted(true);
        run(&engine, "1").await;
        assert!(engine.has_connection());

        manager.set_servers(vec![kdb_server("other")]);
        let (tx, rx) = broadcast::channel(4);
        let task = engine.spawn_event_listener(rx);
        tx.send(ConnectionEvent::ConfigChanged).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(engine.selected_server().as_deref(), Some("other"));
        assert!(!engine.has_connection());
        assert!(!manager.connections()[0].is_connected());
        assert_eq!(listener.count(|e| matches!(e, Event::Listing(names) if names == &["other"])), 1);
    }

    #[tokio::test]
    async fn test_relational_server_returns_table() {
        let table = Table::new(vec!["id".into()], vec![Value::Ints(vec![1, 2])]);
        let manager = Arc::new(
            MockManager::new(vec![postgres_server("pg")], |_| Ok(Value::Null))
                .with_relational(MockRelational { result: table.clone(), ..Default::default() }),
        );
        let (engine, listener) = engine_with(&manager);

        run(&engine, "select id from t").await;

        match &listener.results()[0] {
            QueryResult::Success { table: Some(t), value, .. } => {
                assert_eq!(t, &table);
                assert_eq!(value, &ResultValue::Absent);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(manager.connections().is_empty());
        assert_eq!(listener.count(|e| matches!(e, Event::Refreshed)), 1);
    }

    #[tokio::test]
    async fn test_relational_error_is_failure() {
        let manager = Arc::new(
            MockManager::new(vec![postgres_server("pg")], |_| Ok(Value::Null))
                .with_relational(MockRelational { fail: true, ..Default::default() }),
        );
        let (engine, listener) = engine_with(&manager);

        run(&engine, "selec 1").await;

        assert!(listener.results()[0].error_message().unwrap_or("").contains("syntax error"));
    }

    #[tokio::test]
    async fn test_watch_mutation_out_of_range_does_not_notify() {
        let manager = ok_manager();
        let (engine, listener) = engine_with(&manager);

        assert!(matches!(
            engine.set_watched_expression(0, "x"),
            Err(QdeskError::IndexNotFound { index: 0, len: 0 })
        ));
        assert!(engine.remove_watched_expression(3).is_err());
        assert_eq!(listener.count(|e| matches!(e, Event::Modified)), 0);

        engine.clear_watched_expressions();
        assert_eq!(listener.count(|e| matches!(e, Event::Modified)), 1);
    }

    #[tokio::test]
    async fn test_watch_results_reset_when_evaluation_fails() {
        let manager = Arc::new(MockManager::new(vec![kdb_server("local")], |text| {
            if text == "x" {
                Ok(Value::Long(1))
            } else {
                Ok(wrapped_ok(Value::Null, ""))
            }
        }));
        let (engine, _) = engine_with(&manager);
        engine.add_watched_expression("x").unwrap().await.unwrap();
        assert_eq!(engine.watched_expressions()[0].last_result(), Some(&Value::Long(1)));

        manager.set_responder(|text| {
            if text == "x" {
                Err(QdeskError::remote("x", None))
            } else {
                Ok(wrapped_ok(Value::Null, ""))
            }
        });
        engine.refresh_watched_expressions().unwrap().unwrap().await.unwrap();

        assert_eq!(engine.watched_expressions()[0].last_result(), None);
    }

    #[tokio::test]
    async fn test_set_watched_expression_keeps_position() {
        let manager = ok_manager();
        let (engine, listener) = engine_with(&manager);
        engine.select_server(None);

        assert!(engine.add_watched_expression("a").is_none());
        assert!(engine.add_watched_expression("b").is_none());
        engine.set_watched_expression(0, "c").unwrap();
        let removed = engine.remove_watched_expression(1).unwrap();

        assert_eq!(removed.expression(), "b");
        let watches = engine.watched_expressions();
        assert_eq!(watches.len(), 1);
        assert_eq!(watches[0].expression(), "c");
        assert_eq!(listener.count(|e| matches!(e, Event::Modified)), 4);
    }
}
