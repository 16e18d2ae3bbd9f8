//! Scripted collaborators for engine and tree tests.

use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::QdeskError;
use crate::models::{QueryResult, ServerConfig, ServerKind, Table, Value};
use crate::services::connection::{Connection, ConnectionManager, RelationalClient};
use crate::services::observer::QueryListener;

pub(crate) type Responder = Arc<dyn Fn(&str) -> Result<Value, QdeskError> + Send + Sync>;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct ConnState {
    closed: bool,
    held: bool,
    in_query: bool,
    close_calls: usize,
}

/// Connection whose replies come from a closure.
///
/// While held, `query` blocks until released or closed, which is how tests
/// keep a query in flight.
pub(crate) struct MockConnection {
    responder: Responder,
    state: Mutex<ConnState>,
    changed: Condvar,
    queries: Mutex<Vec<String>>,
}

impl MockConnection {
    pub fn new(responder: Responder) -> Arc<Self> {
        Arc::new(Self {
            responder,
            state: Mutex::new(ConnState::default()),
            changed: Condvar::new(),
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn hold(&self) {
        self.state.lock().held = true;
    }

    pub fn release(&self) {
        self.state.lock().held = false;
        self.changed.notify_all();
    }

    /// Block until a query is parked on the hold.
    pub fn wait_until_in_query(&self) {
        let deadline = Instant::now() + WAIT_LIMIT;
        let mut state = self.state.lock();
        while !state.in_query {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                panic!("no query reached the connection");
            }
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }
}

impl Connection for MockConnection {
    fn query(&self, text: &str) -> Result<Value, QdeskError> {
        self.queries.lock().push(text.to_string());

        let mut state = self.state.lock();
        if state.closed {
            return Err(QdeskError::connection("Connection closed"));
        }
        state.in_query = true;
        self.changed.notify_all();
        while state.held && !state.closed {
            self.changed.wait(&mut state);
        }
        state.in_query = false;
        if state.closed {
            return Err(QdeskError::connection("Connection reset by peer"));
        }
        drop(state);

        (self.responder)(text)
    }

    fn close(&self) -> Result<(), QdeskError> {
        let mut state = self.state.lock();
        state.closed = true;
        state.close_calls += 1;
        self.changed.notify_all();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.state.lock().closed
    }
}

/// Relational client backed by fixed data.
#[derive(Default)]
pub(crate) struct MockRelational {
    pub tables: BTreeMap<String, Vec<String>>,
    pub result: Table,
    pub fail: bool,
}

impl RelationalClient for MockRelational {
    fn execute_query(&self, _config: &ServerConfig, sql: &str) -> Result<Table, QdeskError> {
        if self.fail {
            return Err(QdeskError::sql(format!("syntax error at or near \"{sql}\""), None));
        }
        Ok(self.result.clone())
    }

    fn meta_info(&self, _config: &ServerConfig) -> Result<BTreeMap<String, Vec<String>>, QdeskError> {
        if self.fail {
            return Err(QdeskError::connection("connection refused"));
        }
        Ok(self.tables.clone())
    }
}

#[derive(Default)]
struct ConnectGate {
    blocked: bool,
    waiting: usize,
}

/// Connection manager handing out [`MockConnection`]s.
pub(crate) struct MockManager {
    servers: Mutex<Vec<ServerConfig>>,
    connected: Mutex<HashSet<String>>,
    responder: Mutex<Responder>,
    fail_connect: AtomicBool,
    hold_connections: AtomicBool,
    connect_gate: Mutex<ConnectGate>,
    connect_changed: Condvar,
    created: Mutex<Vec<Arc<MockConnection>>>,
    relational: Option<MockRelational>,
}

impl MockManager {
    pub fn new(
        servers: Vec<ServerConfig>,
        responder: impl Fn(&str) -> Result<Value, QdeskError> + Send + Sync + 'static,
    ) -> Self {
        let responder: Responder = Arc::new(responder);
        Self {
            servers: Mutex::new(servers),
            connected: Mutex::new(HashSet::new()),
            responder: Mutex::new(responder),
            fail_connect: AtomicBool::new(false),
            hold_connections: AtomicBool::new(false),
            connect_gate: Mutex::new(ConnectGate::default()),
            connect_changed: Condvar::new(),
            created: Mutex::new(Vec::new()),
            relational: None,
        }
    }

    pub fn with_relational(mut self, relational: MockRelational) -> Self {
        self.relational = Some(relational);
        self
    }

    pub fn set_servers(&self, servers: Vec<ServerConfig>) {
        *self.servers.lock() = servers;
    }

    pub fn set_connected(&self, name: &str) {
        self.connected.lock().insert(name.to_string());
    }

    pub fn set_responder(
        &self,
        responder: impl Fn(&str) -> Result<Value, QdeskError> + Send + Sync + 'static,
    ) {
        *self.responder.lock() = Arc::new(responder);
    }

    pub fn fail_connections(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// New connections start held.
    pub fn hold_connections(&self, hold: bool) {
        self.hold_connections.store(hold, Ordering::SeqCst);
    }

    /// While blocked, `try_connect` parks before opening a connection.
    pub fn block_connects(&self, blocked: bool) {
        self.connect_gate.lock().blocked = blocked;
        self.connect_changed.notify_all();
    }

    /// Block until a `try_connect` call is parked on the gate.
    pub fn wait_until_connecting(&self) {
        let deadline = Instant::now() + WAIT_LIMIT;
        let mut gate = self.connect_gate.lock();
        while gate.waiting == 0 {
            if self.connect_changed.wait_until(&mut gate, deadline).timed_out() {
                panic!("nobody tried to connect");
            }
        }
    }

    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.created.lock().clone()
    }

    /// Wait for the `index`th connection to be opened.
    pub fn wait_for_connection(&self, index: usize) -> Arc<MockConnection> {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            if let Some(conn) = self.created.lock().get(index) {
                return conn.clone();
            }
            assert!(Instant::now() < deadline, "connection {index} was never opened");
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl ConnectionManager for MockManager {
    fn server(&self, name: &str) -> Option<ServerConfig> {
        self.servers.lock().iter().find(|s| s.name == name).cloned()
    }

    fn try_connect(&self, name: &str) -> Result<Arc<dyn Connection>, QdeskError> {
        {
            let mut gate = self.connect_gate.lock();
            gate.waiting += 1;
            self.connect_changed.notify_all();
            while gate.blocked {
                self.connect_changed.wait(&mut gate);
            }
            gate.waiting -= 1;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(QdeskError::connection(format!("{name}: Connection refused")));
        }
        let conn = MockConnection::new(self.responder.lock().clone());
        if self.hold_connections.load(Ordering::SeqCst) {
            conn.hold();
        }
        self.created.lock().push(conn.clone());
        Ok(conn as Arc<dyn Connection>)
    }

    fn server_names(&self) -> Vec<String> {
        self.servers.lock().iter().map(|s| s.name.clone()).collect()
    }

    fn is_connected(&self, name: &str) -> bool {
        self.connected.lock().contains(name)
    }

    fn relational(&self) -> Option<&dyn RelationalClient> {
        self.relational.as_ref().map(|r| r as &dyn RelationalClient)
    }
}

pub(crate) fn kdb_server(name: &str) -> ServerConfig {
    ServerConfig::new(name, "localhost", 5000)
}

pub(crate) fn postgres_server(name: &str) -> ServerConfig {
    ServerConfig { kind: ServerKind::Postgres, database: Some("app".into()), ..kdb_server(name) }
}

/// Reply to a wrapped query that evaluated to `value`.
pub(crate) fn wrapped_ok(value: Value, console: &str) -> Value {
    Value::List(vec![
        Value::Bool(true),
        Value::List(vec![Value::List(vec![Value::Bool(true), Value::symbol("")]), value]),
        Value::chars(console),
    ])
}

/// Reply to a wrapped query whose value exceeded the size limit.
pub(crate) fn wrapped_oversized(console: &str) -> Value {
    Value::List(vec![Value::Bool(false), Value::Bool(false), Value::chars(console)])
}

/// Reply to a wrapped query that raised `message`.
pub(crate) fn wrapped_err(message: &str) -> Value {
    Value::List(vec![
        Value::Bool(true),
        Value::List(vec![
            Value::List(vec![Value::Bool(false), Value::symbol("")]),
            Value::chars(message),
            Value::chars(""),
        ]),
        Value::chars(""),
    ])
}

#[derive(Debug, Clone)]
pub(crate) enum Event {
    Sending(String),
    Returned(QueryResult),
    Selected(Option<String>),
    Listing(Vec<String>),
    Modified,
    Refreshed,
}

/// Listener that records every notification.
#[derive(Default)]
pub(crate) struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn results(&self) -> Vec<QueryResult> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Returned(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, f: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| f(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl QueryListener for RecordingListener {
    fn sending_query(&self, _server: &ServerConfig, title: &str) {
        self.push(Event::Sending(title.to_string()));
    }

    fn query_result_returned(&self, _server: &ServerConfig, result: &QueryResult) {
        self.push(Event::Returned(result.clone()));
    }

    fn selected_server_changed(&self, server: Option<&str>) {
        self.push(Event::Selected(server.map(String::from)));
    }

    fn server_listing_changed(&self, servers: &[String]) {
        self.push(Event::Listing(servers.to_vec()));
    }

    fn watched_expressions_modified(&self) {
        self.push(Event::Modified);
    }

    fn watched_expressions_refreshed(&self) {
        self.push(Event::Refreshed);
    }
}
