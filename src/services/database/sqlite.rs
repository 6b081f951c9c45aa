// Embedded-file backend. `database` is the file path; a handle is bound to
// one file, so switching databases is close-then-reopen against a new path.
// rusqlite is synchronous; calls run briefly under the async mutex, the same
// arrangement the rest of the crate uses for per-handle ordering.
use crate::config::{DatabaseConfig, DatabaseKind};
use crate::error::{Error, Result};
use crate::models::{ColumnSchema, QueryOutput, SchemaSnapshot, TableSchema};
use crate::services::database::connection::{is_safe_identifier, DatabaseConnection};
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::Connection;
use serde_json::{json, Value};
use tokio::sync::Mutex;

enum FileState {
    Uninitialized,
    Connected(Connection),
    Closed,
}

struct Inner {
    state: FileState,
    /// Effective file path; drifts from the config after a switch.
    database: String,
}

pub struct SqliteConnection {
    config: DatabaseConfig,
    inner: Mutex<Inner>,
}

impl SqliteConnection {
    pub fn new(config: DatabaseConfig) -> Self {
        let database = config.database.clone();
        Self {
            config,
            inner: Mutex::new(Inner {
                state: FileState::Uninitialized,
                database,
            }),
        }
    }

    /// Accepts plain paths as well as `sqlite:` / `sqlite://` prefixed ones.
    fn clean_path(path: &str) -> &str {
        path.trim_start_matches("sqlite:").trim_start_matches("//")
    }

    fn open(&self, path: &str) -> Result<Connection> {
        let conn = Connection::open(Self::clean_path(path)).map_err(|e| {
            Error::Connection(format!(
                "failed to open sqlite target {} at {}: {}",
                self.config.id, path, e
            ))
        })?;

        if let Some(timeout) = self
            .config
            .options
            .get("busy_timeout_ms")
            .and_then(|v| v.as_u64())
        {
            conn.busy_timeout(std::time::Duration::from_millis(timeout))
                .map_err(|e| Error::Connection(format!("failed to set busy timeout: {}", e)))?;
        }

        Ok(conn)
    }

    fn json_to_sqlite(value: &Value) -> SqliteValue {
        match value {
            Value::Null => SqliteValue::Null,
            Value::Bool(b) => SqliteValue::Integer(*b as i64),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqliteValue::Integer(i)
                } else {
                    SqliteValue::Real(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => SqliteValue::Text(s.clone()),
            other => SqliteValue::Text(other.to_string()),
        }
    }

    fn value_ref_to_json(value: ValueRef<'_>) -> Value {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => json!(i),
            ValueRef::Real(f) => json!(f),
            ValueRef::Text(bytes) => json!(String::from_utf8_lossy(bytes)),
            ValueRef::Blob(bytes) => json!(format!("<blob {} bytes>", bytes.len())),
        }
    }

    fn run_query(conn: &Connection, sql: &str, params: &[Value]) -> Result<QueryOutput> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::Query(e.to_string()))?;
        let values: Vec<SqliteValue> = params.iter().map(Self::json_to_sqlite).collect();

        if stmt.column_count() == 0 {
            let affected = stmt
                .execute(rusqlite::params_from_iter(values))
                .map_err(|e| Error::Query(e.to_string()))?;
            return Ok(QueryOutput::Affected(affected as u64));
        }

        let column_names: Vec<String> =
            stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(values))
            .map_err(|e| Error::Query(e.to_string()))?;

        let mut json_rows = Vec::new();
        while let Some(row) = rows.next().map_err(|e| Error::Query(e.to_string()))? {
            let mut obj = serde_json::Map::new();
            for (idx, name) in column_names.iter().enumerate() {
                let value = row
                    .get_ref(idx)
                    .map(Self::value_ref_to_json)
                    .unwrap_or(Value::Null);
                obj.insert(name.clone(), value);
            }
            json_rows.push(Value::Object(obj));
        }

        Ok(QueryOutput::Rows(json_rows))
    }

    fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnSchema>> {
        if !is_safe_identifier(table) {
            return Err(Error::Query(format!("invalid table name: {}", table)));
        }

        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .map_err(|e| Error::Query(e.to_string()))?;

        // PRAGMA table_info columns: cid, name, type, notnull, dflt_value, pk
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnSchema {
                    name: row.get::<_, String>(1)?,
                    data_type: row.get::<_, String>(2)?,
                    is_nullable: row.get::<_, i64>(3)? == 0,
                })
            })
            .map_err(|e| Error::Query(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Query(format!("failed to describe {}: {}", table, e)))?;

        Ok(columns)
    }
}

#[async_trait::async_trait]
impl DatabaseConnection for SqliteConnection {
    async fn connect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, FileState::Connected(_)) {
            return Ok(());
        }

        let conn = self.open(&inner.database)?;
        inner.state = FileState::Connected(conn);
        tracing::debug!(id = %self.config.id, path = %inner.database, "sqlite file opened");
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput> {
        let inner = self.inner.lock().await;
        match &inner.state {
            FileState::Connected(conn) => Self::run_query(conn, sql, params),
            _ => Err(Error::Connection(format!(
                "sqlite target {} is not connected",
                self.config.id
            ))),
        }
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match std::mem::replace(&mut inner.state, FileState::Closed) {
            FileState::Connected(conn) => conn.close().map_err(|(_, e)| {
                Error::Connection(format!(
                    "failed to close sqlite target {}: {}",
                    self.config.id, e
                ))
            }),
            _ => Ok(()),
        }
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        if let Some(allowed) = &self.config.databases {
            if !allowed.is_empty() {
                return Ok(allowed.clone());
            }
        }

        // No catalog discovery for a file database: the effective path is
        // the only member.
        Ok(vec![self.inner.lock().await.database.clone()])
    }

    async fn switch_database(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;

        // Close-then-reopen: a file handle is bound to one path. A failed
        // reopen leaves the handle closed and surfaces the error.
        if let FileState::Connected(conn) = std::mem::replace(&mut inner.state, FileState::Closed)
        {
            if let Err((_, e)) = conn.close() {
                tracing::warn!(id = %self.config.id, "error closing sqlite file: {}", e);
            }
        }
        inner.database = name.to_string();

        let conn = self.open(name)?;
        inner.state = FileState::Connected(conn);
        Ok(())
    }

    async fn schema_snapshot(&self, table: Option<&str>) -> Result<SchemaSnapshot> {
        let inner = self.inner.lock().await;
        let conn = match &inner.state {
            FileState::Connected(conn) => conn,
            _ => {
                return Err(Error::Connection(format!(
                    "sqlite target {} is not connected",
                    self.config.id
                )))
            }
        };

        let table_names: Vec<String> = match table {
            Some(name) => vec![name.to_string()],
            None => {
                let mut stmt = conn
                    .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                    .map_err(|e| Error::Query(e.to_string()))?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(|e| Error::Query(e.to_string()))?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| Error::Query(format!("failed to list tables: {}", e)))?;
                names
            }
        };

        let mut tables = Vec::with_capacity(table_names.len());
        for name in table_names {
            let columns = Self::table_columns(conn, &name)?;
            tables.push(TableSchema::new(name, columns));
        }

        Ok(SchemaSnapshot::new(tables))
    }

    async fn current_database(&self) -> String {
        self.inner.lock().await.database.clone()
    }

    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn config(path: &str, databases: Option<Vec<String>>) -> DatabaseConfig {
        DatabaseConfig {
            id: "s1".to_string(),
            name: "SQLite".to_string(),
            kind: DatabaseKind::Sqlite,
            host: None,
            port: None,
            username: None,
            password: None,
            database: path.to_string(),
            databases,
            options: HashMap::new(),
        }
    }

    async fn seeded_connection(dir: &TempDir) -> SqliteConnection {
        let path = dir.path().join("app.db");
        let conn = SqliteConnection::new(config(path.to_str().unwrap(), None));
        conn.connect().await.unwrap();
        conn.query(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
            &[],
        )
        .await
        .unwrap();
        conn
    }

    #[tokio::test]
    async fn test_query_round_trip_with_params() {
        let dir = TempDir::new().unwrap();
        let conn = seeded_connection(&dir).await;

        let inserted = conn
            .query(
                "INSERT INTO users (id, name) VALUES (?1, ?2)",
                &[json!(1), json!("ada")],
            )
            .await
            .unwrap();
        assert!(matches!(inserted, QueryOutput::Affected(1)));

        let output = conn.query("SELECT id, name FROM users", &[]).await.unwrap();
        match output {
            QueryOutput::Rows(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0]["id"], json!(1));
                assert_eq!(rows[0]["name"], json!("ada"));
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_error_carries_native_message() {
        let dir = TempDir::new().unwrap();
        let conn = seeded_connection(&dir).await;
        let err = conn.query("SELECT * FROM missing", &[]).await.unwrap_err();
        match err {
            Error::Query(msg) => assert!(msg.contains("missing")),
            other => panic!("expected query error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_databases_allow_list_verbatim() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.db");
        let conn = SqliteConnection::new(config(
            path.to_str().unwrap(),
            Some(vec!["one.db".to_string(), "two.db".to_string()]),
        ));
        // Allow-list wins without any handle or discovery.
        assert_eq!(
            conn.list_databases().await.unwrap(),
            vec!["one.db", "two.db"]
        );
    }

    #[tokio::test]
    async fn test_list_databases_singleton_without_allow_list() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.db");
        let path = path.to_str().unwrap().to_string();
        let conn = SqliteConnection::new(config(&path, None));
        assert_eq!(conn.list_databases().await.unwrap(), vec![path]);
    }

    #[tokio::test]
    async fn test_switch_database_reopens_against_new_path() {
        let dir = TempDir::new().unwrap();
        let conn = seeded_connection(&dir).await;

        let other = dir.path().join("other.db");
        conn.switch_database(other.to_str().unwrap()).await.unwrap();
        assert_eq!(conn.current_database().await, other.to_str().unwrap());

        // New file: the old table is gone.
        let snapshot = conn.schema_snapshot(None).await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_failed_switch_leaves_handle_closed() {
        let dir = TempDir::new().unwrap();
        let conn = seeded_connection(&dir).await;

        let bad = dir.path().join("no-such-dir").join("x.db");
        let err = conn.switch_database(bad.to_str().unwrap()).await;
        assert!(matches!(err, Err(Error::Connection(_))));

        // A stale handle must not be silently reused.
        assert!(matches!(
            conn.query("SELECT 1", &[]).await,
            Err(Error::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_schema_snapshot_columns() {
        let dir = TempDir::new().unwrap();
        let conn = seeded_connection(&dir).await;

        let snapshot = conn.schema_snapshot(Some("users")).await.unwrap();
        assert_eq!(snapshot.tables.len(), 1);
        let table = &snapshot.tables[0];
        assert_eq!(table.name, "users");
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.columns[0].name, "id");
        let name_col = &table.columns[1];
        assert_eq!(name_col.data_type, "TEXT");
        assert!(!name_col.is_nullable);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let conn = seeded_connection(&dir).await;
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(matches!(
            conn.query("SELECT 1", &[]).await,
            Err(Error::Connection(_))
        ));
    }
}
