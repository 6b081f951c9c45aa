// Pool-oriented PostgreSQL backend. The pool is bound to one catalog at
// creation, so switching databases tears the pool down and rebuilds it
// against the new catalog.
use crate::config::{DatabaseConfig, DatabaseKind};
use crate::error::{Error, Result};
use crate::models::{ColumnSchema, QueryOutput, SchemaSnapshot, TableSchema};
use crate::services::database::connection::DatabaseConnection;
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::NoTls;

enum PoolState {
    Uninitialized,
    Connected(Pool),
    Closed,
}

struct Inner {
    state: PoolState,
    /// Effective catalog; the pool is rebuilt against this on switch.
    database: String,
}

pub struct PostgresConnection {
    config: DatabaseConfig,
    inner: Mutex<Inner>,
}

impl PostgresConnection {
    pub fn new(config: DatabaseConfig) -> Self {
        let database = config.database.clone();
        Self {
            config,
            inner: Mutex::new(Inner {
                state: PoolState::Uninitialized,
                database,
            }),
        }
    }

    /// Build a pool bound to `database` and verify connectivity, so a bad
    /// target fails here rather than on first use.
    async fn build_pool(&self, database: &str) -> Result<Pool> {
        let mut cfg = PoolConfig::new();
        cfg.host = self.config.host.clone();
        cfg.port = self.config.port;
        cfg.user = self.config.username.clone();
        cfg.password = self.config.password.clone();
        cfg.dbname = Some(database.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        if let Some(timeout) = self
            .config
            .options
            .get("connect_timeout_secs")
            .and_then(|v| v.as_u64())
        {
            cfg.connect_timeout = Some(std::time::Duration::from_secs(timeout));
        }

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            Error::Connection(format!(
                "failed to create pool for postgres target {}: {}",
                self.config.id, e
            ))
        })?;

        if let Some(max_size) = self
            .config
            .options
            .get("pool_max_size")
            .and_then(|v| v.as_u64())
        {
            pool.resize(max_size as usize);
        }

        // deadpool creation is lazy; take one client to prove the
        // coordinates are reachable.
        pool.get().await.map_err(|e| {
            Error::Connection(format!(
                "failed to connect postgres target {}: {}",
                self.config.id, e
            ))
        })?;

        Ok(pool)
    }

    fn json_to_pg_param(value: &Value) -> Box<dyn ToSql + Sync + Send> {
        match value {
            Value::Null => Box::new(None::<String>),
            Value::Bool(b) => Box::new(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Box::new(i)
                } else {
                    Box::new(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => Box::new(s.clone()),
            other => Box::new(other.to_string()),
        }
    }

    fn row_to_json(row: &tokio_postgres::Row) -> Value {
        let mut obj = serde_json::Map::new();
        for (idx, column) in row.columns().iter().enumerate() {
            let value: Value = match *column.type_() {
                Type::INT2 => row
                    .try_get::<_, Option<i16>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| json!(v))
                    .unwrap_or(Value::Null),
                Type::INT4 => row
                    .try_get::<_, Option<i32>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| json!(v))
                    .unwrap_or(Value::Null),
                Type::INT8 => row
                    .try_get::<_, Option<i64>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| json!(v))
                    .unwrap_or(Value::Null),
                Type::FLOAT4 => row
                    .try_get::<_, Option<f32>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| json!(v))
                    .unwrap_or(Value::Null),
                Type::FLOAT8 => row
                    .try_get::<_, Option<f64>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| json!(v))
                    .unwrap_or(Value::Null),
                Type::BOOL => row
                    .try_get::<_, Option<bool>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| json!(v))
                    .unwrap_or(Value::Null),
                _ => match row.try_get::<_, Option<String>>(idx) {
                    Ok(Some(v)) => json!(v),
                    Ok(None) => Value::Null,
                    // Types without a text conversion surface as a
                    // placeholder naming the type.
                    Err(_) => json!(format!("<{}>", column.type_().name())),
                },
            };
            obj.insert(column.name().to_string(), value);
        }
        Value::Object(obj)
    }

    /// Light textual check for whether a statement produces rows. Treats
    /// SQL as opaque text, same as the rest of this core. A trailing
    /// RETURNING clause turns any statement row-returning, so it is
    /// checked alongside the leading keywords.
    fn is_row_returning(sql: &str) -> bool {
        let upper = sql.trim_start().to_uppercase();
        ["SELECT", "WITH", "SHOW", "VALUES", "TABLE"]
            .iter()
            .any(|kw| upper.starts_with(kw))
            || upper.contains("RETURNING")
    }
}

#[async_trait::async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn connect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, PoolState::Connected(_)) {
            return Ok(());
        }

        let pool = self.build_pool(&inner.database).await?;
        inner.state = PoolState::Connected(pool);
        tracing::debug!(id = %self.config.id, "postgres pool established");
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput> {
        let inner = self.inner.lock().await;
        let pool = match &inner.state {
            PoolState::Connected(pool) => pool,
            _ => {
                return Err(Error::Connection(format!(
                    "postgres target {} is not connected",
                    self.config.id
                )))
            }
        };

        let client = pool.get().await.map_err(|e| {
            Error::Connection(format!("failed to get postgres client: {}", e))
        })?;

        let boxed: Vec<Box<dyn ToSql + Sync + Send>> =
            params.iter().map(Self::json_to_pg_param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        if Self::is_row_returning(sql) {
            let rows = client
                .query(sql, &refs)
                .await
                .map_err(|e| Error::Query(pg_error_message(e)))?;
            Ok(QueryOutput::Rows(rows.iter().map(Self::row_to_json).collect()))
        } else {
            let affected = client
                .execute(sql, &refs)
                .await
                .map_err(|e| Error::Query(pg_error_message(e)))?;
            Ok(QueryOutput::Affected(affected))
        }
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let PoolState::Connected(pool) = std::mem::replace(&mut inner.state, PoolState::Closed)
        {
            pool.close();
        }
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        if let Some(allowed) = &self.config.databases {
            if !allowed.is_empty() {
                return Ok(allowed.clone());
            }
        }

        let inner = self.inner.lock().await;
        let pool = match &inner.state {
            PoolState::Connected(pool) => pool,
            _ => {
                return Err(Error::Connection(format!(
                    "postgres target {} is not connected",
                    self.config.id
                )))
            }
        };

        let client = pool.get().await.map_err(|e| {
            Error::Connection(format!("failed to get postgres client: {}", e))
        })?;

        let rows = client
            .query(
                "SELECT datname FROM pg_database WHERE datistemplate = false",
                &[],
            )
            .await
            .map_err(|e| Error::Connection(format!("failed to list databases: {}", e)))?;

        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    async fn switch_database(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;

        // Close-then-reconnect: the pool is bound to one catalog. A failure
        // in the reconnect half leaves the handle closed; the error
        // surfaces and is not retried.
        if let PoolState::Connected(pool) = std::mem::replace(&mut inner.state, PoolState::Closed)
        {
            pool.close();
        }
        inner.database = name.to_string();

        let pool = self.build_pool(name).await?;
        inner.state = PoolState::Connected(pool);
        Ok(())
    }

    async fn schema_snapshot(&self, table: Option<&str>) -> Result<SchemaSnapshot> {
        let inner = self.inner.lock().await;
        let pool = match &inner.state {
            PoolState::Connected(pool) => pool,
            _ => {
                return Err(Error::Connection(format!(
                    "postgres target {} is not connected",
                    self.config.id
                )))
            }
        };

        let client = pool.get().await.map_err(|e| {
            Error::Connection(format!("failed to get postgres client: {}", e))
        })?;

        let table_names: Vec<String> = match table {
            Some(name) => vec![name.to_string()],
            None => client
                .query(
                    "SELECT table_name FROM information_schema.tables \
                     WHERE table_schema = 'public' ORDER BY table_name",
                    &[],
                )
                .await
                .map_err(|e| Error::Query(format!("failed to list tables: {}", e)))?
                .iter()
                .map(|row| row.get::<_, String>(0))
                .collect(),
        };

        let mut tables = Vec::with_capacity(table_names.len());
        for name in table_names {
            let rows = client
                .query(
                    "SELECT column_name, data_type, is_nullable \
                     FROM information_schema.columns \
                     WHERE table_name = $1 ORDER BY ordinal_position",
                    &[&name],
                )
                .await
                .map_err(|e| Error::Query(format!("failed to describe {}: {}", name, e)))?;

            let columns = rows
                .iter()
                .map(|row| ColumnSchema {
                    name: row.get(0),
                    data_type: row.get(1),
                    is_nullable: row.get::<_, String>(2) == "YES",
                })
                .collect();
            tables.push(TableSchema::new(name, columns));
        }

        Ok(SchemaSnapshot::new(tables))
    }

    async fn current_database(&self) -> String {
        self.inner.lock().await.database.clone()
    }

    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }
}

/// Prefer the server's own code and message when available.
fn pg_error_message(e: tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db_error) => format!("{}: {}", db_error.code().code(), db_error.message()),
        None => e.to_string(),
    }
}
