//! PostgreSQL support with deadpool-postgres.
//!
//! One pool per server, created on first use. Calls are synchronous: from a
//! plain or blocking-pool thread the future is driven on the shared runtime,
//! from inside a multi-thread runtime the worker is handed off with
//! `block_in_place`, and from inside a current-thread runtime the call moves
//! to a helper thread with its own runtime.

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Column, NoTls, Row};

use crate::error::QdeskError;
use crate::models::{ServerConfig, Table, Value};
use crate::services::connection::RelationalClient;

/// Lists user columns in table then column order.
const META_INFO_QUERY: &str = r#"
    SELECT table_schema, table_name, column_name
    FROM information_schema.columns
    WHERE table_schema NOT IN ('pg_catalog', 'information_schema')
    ORDER BY table_schema, table_name, ordinal_position
"#;

/// Schema whose tables are listed without a prefix.
const DEFAULT_SCHEMA: &str = "public";

/// [`RelationalClient`] for PostgreSQL servers.
pub struct PostgresClient {
    runtime: Handle,
    pools: Mutex<HashMap<String, Pool>>,
    max_size: usize,
    wait_timeout: Duration,
}

impl PostgresClient {
    /// Create a client whose pools hold up to 4 connections.
    pub fn new(runtime: Handle) -> Self {
        Self::with_pool_config(runtime, 4, Duration::from_secs(30))
    }

    /// Create a client with custom pool settings.
    ///
    /// # Arguments
    /// * `max_size` - Maximum number of connections per server
    /// * `wait_timeout` - How long to wait when a pool is exhausted
    pub fn with_pool_config(runtime: Handle, max_size: usize, wait_timeout: Duration) -> Self {
        Self { runtime, pools: Mutex::new(HashMap::new()), max_size, wait_timeout }
    }

    /// Close and forget the pool for `server`, e.g. after its config changed.
    pub fn close(&self, server: &str) -> bool {
        match self.pools.lock().remove(server) {
            Some(pool) => {
                pool.close();
                tracing::info!(server = %server, "Connection pool closed");
                true
            }
            None => false,
        }
    }

    /// Close every pool.
    pub fn close_all(&self) {
        for (server, pool) in self.pools.lock().drain() {
            pool.close();
            tracing::debug!(server = %server, "Connection pool closed");
        }
    }

    fn pool(&self, config: &ServerConfig) -> Result<Pool, QdeskError> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(&config.name) {
            return Ok(pool.clone());
        }

        config.validate()?;
        let pool = build_pool(config, self.max_size, self.wait_timeout)?;
        tracing::info!(
            server = %config.name,
            host = %config.host,
            database = ?config.database,
            "Connection pool created"
        );
        pools.insert(config.name.clone(), pool.clone());
        Ok(pool)
    }

    /// Drive `future` to completion from synchronous code.
    fn run<F, T>(&self, future: F) -> Result<T, QdeskError>
    where
        F: Future<Output = Result<T, QdeskError>> + Send,
        T: Send,
    {
        let Ok(current) = Handle::try_current() else {
            return self.runtime.block_on(future);
        };

        match current.runtime_flavor() {
            RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.runtime.block_on(future))
            }
            flavor => {
                tracing::trace!(?flavor, "Running relational call on a helper thread");
                std::thread::scope(|scope| {
                    scope
                        .spawn(|| {
                            let runtime = tokio::runtime::Builder::new_current_thread()
                                .enable_all()
                                .build()
                                .map_err(|e| {
                                    QdeskError::internal(format!("Failed to start runtime: {e}"))
                                })?;
                            runtime.block_on(future)
                        })
                        .join()
                        .unwrap_or_else(|_| {
                            Err(QdeskError::internal("Relational call panicked"))
                        })
                })
            }
        }
    }
}

impl RelationalClient for PostgresClient {
    fn execute_query(&self, config: &ServerConfig, sql: &str) -> Result<Table, QdeskError> {
        let pool = self.pool(config)?;
        self.run(async {
            let client = pool.get().await.map_err(|e| {
                QdeskError::connection(format!("Failed to acquire connection: {e}"))
            })?;
            let statement = client.prepare(sql).await?;
            let rows = client.query(&statement, &[]).await?;
            tracing::debug!(server = %config.name, rows = rows.len(), "SQL query completed");
            Ok::<_, QdeskError>(rows_to_table(statement.columns(), &rows))
        })
    }

    fn meta_info(&self, config: &ServerConfig) -> Result<BTreeMap<String, Vec<String>>, QdeskError> {
        let pool = self.pool(config)?;
        self.run(async {
            let client = pool.get().await.map_err(|e| {
                QdeskError::connection(format!("Failed to acquire connection: {e}"))
            })?;
            let rows = client.query(META_INFO_QUERY, &[]).await?;
            let columns = rows.iter().map(|row| {
                (row.get::<_, String>(0), row.get::<_, String>(1), row.get::<_, String>(2))
            });
            Ok::<_, QdeskError>(group_columns(columns))
        })
    }
}

fn build_pool(
    config: &ServerConfig,
    max_size: usize,
    wait_timeout: Duration,
) -> Result<Pool, QdeskError> {
    let connect_timeout = Duration::from_secs(10);

    let mut pg_config = tokio_postgres::Config::new();
    pg_config.host(&config.host);
    pg_config.port(config.port);
    pg_config.dbname(config.database.as_deref().unwrap_or("postgres"));
    pg_config.user(&config.username);
    if let Some(password) = &config.password {
        pg_config.password(password);
    }
    pg_config.application_name("qdesk");
    pg_config.connect_timeout(connect_timeout);
    pg_config.keepalives(true);
    pg_config.keepalives_idle(Duration::from_secs(60));

    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig { recycling_method: RecyclingMethod::Fast },
    );

    Pool::builder(manager)
        .max_size(max_size)
        .wait_timeout(Some(wait_timeout))
        .create_timeout(Some(connect_timeout))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| QdeskError::connection(format!("Failed to create pool: {e}")))
}

/// Map `(schema, table, column)` rows to table name -> ordered columns.
///
/// Tables outside the default schema are qualified with their schema.
fn group_columns(
    rows: impl IntoIterator<Item = (String, String, String)>,
) -> BTreeMap<String, Vec<String>> {
    let mut tables: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (schema, table, column) in rows {
        let name = if schema == DEFAULT_SCHEMA { table } else { format!("{schema}.{table}") };
        tables.entry(name).or_default().push(column);
    }
    tables
}

/// Turn rows into a column-oriented table.
///
/// Numeric and boolean columns become typed vectors with nulls mapped to
/// the primary server's null values. Text columns become lists of strings;
/// types without a text decoding become nulls.
fn rows_to_table(columns: &[Column], rows: &[Row]) -> Table {
    let names = columns.iter().map(|c| c.name().to_string()).collect();
    let data = columns
        .iter()
        .enumerate()
        .map(|(index, column)| column_values(rows, index, column.type_()))
        .collect();
    Table::new(names, data)
}

fn column_values(rows: &[Row], index: usize, ty: &Type) -> Value {
    match *ty {
        Type::BOOL => Value::Bools(cells(rows, index, false)),
        Type::INT2 => Value::Shorts(cells(rows, index, i16::MIN)),
        Type::INT4 => Value::Ints(cells(rows, index, i32::MIN)),
        Type::INT8 => Value::Longs(cells(rows, index, i64::MIN)),
        Type::FLOAT4 => {
            Value::Floats(cells(rows, index, f32::NAN).into_iter().map(f64::from).collect())
        }
        Type::FLOAT8 => Value::Floats(cells(rows, index, f64::NAN)),
        _ => Value::List(
            rows.iter()
                .map(|row| match row.try_get::<_, Option<String>>(index) {
                    Ok(Some(text)) => Value::Chars(text),
                    _ => Value::Null,
                })
                .collect(),
        ),
    }
}

fn cells<T>(rows: &[Row], index: usize, null: T) -> Vec<T>
where
    T: for<'a> FromSql<'a> + Copy,
{
    rows.iter()
        .map(|row| row.try_get::<_, Option<T>>(index).ok().flatten().unwrap_or(null))
        .collect()
}
