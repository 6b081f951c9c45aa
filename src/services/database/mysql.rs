// Session-oriented MySQL backend: one long-lived connection per target,
// catalog switches happen in-session via USE.
use crate::config::{DatabaseConfig, DatabaseKind};
use crate::error::{Error, Result};
use crate::models::{ColumnSchema, QueryOutput, SchemaSnapshot, TableSchema};
use crate::services::database::connection::{is_safe_identifier, DatabaseConnection};
use mysql_async::{prelude::*, Conn, OptsBuilder, Params, Row, Value as MySqlValue};
use serde_json::{json, Value};
use tokio::sync::Mutex;

enum SessionState {
    Uninitialized,
    Connected(Conn),
    Closed,
}

struct Inner {
    state: SessionState,
    /// Effective catalog; drifts from the config after USE.
    database: String,
}

pub struct MySqlConnection {
    config: DatabaseConfig,
    inner: Mutex<Inner>,
}

impl MySqlConnection {
    pub fn new(config: DatabaseConfig) -> Self {
        let database = config.database.clone();
        Self {
            config,
            inner: Mutex::new(Inner {
                state: SessionState::Uninitialized,
                database,
            }),
        }
    }

    fn build_opts(&self, database: &str) -> OptsBuilder {
        let mut opts = OptsBuilder::default()
            .ip_or_hostname(
                self.config
                    .host
                    .clone()
                    .unwrap_or_else(|| "localhost".to_string()),
            )
            .tcp_port(self.config.port.unwrap_or(3306))
            .user(self.config.username.clone())
            .pass(self.config.password.clone())
            .db_name(Some(database.to_string()));

        // Recognized entries of the open options bag; everything else is
        // ignored with a debug note.
        for (key, value) in &self.config.options {
            match key.as_str() {
                "tcp_keepalive_ms" => {
                    opts = opts.tcp_keepalive(value.as_u64().map(|v| v as u32));
                }
                "wait_timeout" => {
                    opts = opts.wait_timeout(value.as_u64().map(|v| v as usize));
                }
                other => {
                    tracing::debug!("ignoring unrecognized mysql option {}", other);
                }
            }
        }

        opts
    }

    fn row_to_json(row: &Row) -> Value {
        let mut obj = serde_json::Map::new();
        for (idx, column) in row.columns_ref().iter().enumerate() {
            let value = match row.get_opt::<MySqlValue, usize>(idx) {
                Some(Ok(mysql_val)) => Self::mysql_value_to_json(mysql_val),
                _ => Value::Null,
            };
            obj.insert(column.name_str().to_string(), value);
        }
        Value::Object(obj)
    }

    fn mysql_value_to_json(mysql_val: MySqlValue) -> Value {
        match mysql_val {
            MySqlValue::NULL => Value::Null,
            MySqlValue::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(s) => json!(s),
                Err(_) => Value::Null,
            },
            MySqlValue::Int(i) => json!(i),
            MySqlValue::UInt(u) => json!(u),
            MySqlValue::Float(f) => json!(f),
            MySqlValue::Double(d) => json!(d),
            MySqlValue::Date(y, m, d, h, min, s, _) => {
                json!(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    y, m, d, h, min, s
                ))
            }
            MySqlValue::Time(is_neg, d, h, m, s, _) => {
                let sign = if is_neg { "-" } else { "" };
                let total_hours = d * 24 + h as u32;
                json!(format!("{}{}:{:02}:{:02}", sign, total_hours, m, s))
            }
        }
    }

    fn json_to_mysql(value: &Value) -> MySqlValue {
        match value {
            Value::Null => MySqlValue::NULL,
            Value::Bool(b) => MySqlValue::from(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    MySqlValue::from(i)
                } else {
                    MySqlValue::from(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => MySqlValue::from(s.as_str()),
            other => MySqlValue::from(other.to_string()),
        }
    }

    async fn describe_table(conn: &mut Conn, table: &str) -> Result<TableSchema> {
        if !is_safe_identifier(table) {
            return Err(Error::Query(format!("invalid table name: {}", table)));
        }

        // DESCRIBE columns: Field, Type, Null, Key, Default, Extra
        let rows: Vec<(String, String, String, String, Option<String>, String)> = conn
            .query(format!("DESCRIBE `{}`", table))
            .await
            .map_err(|e| Error::Query(format!("failed to describe {}: {}", table, e)))?;

        let columns = rows
            .into_iter()
            .map(|(name, data_type, nullable, _, _, _)| ColumnSchema {
                name,
                data_type,
                is_nullable: nullable == "YES",
            })
            .collect();

        Ok(TableSchema::new(table, columns))
    }
}

#[async_trait::async_trait]
impl DatabaseConnection for MySqlConnection {
    async fn connect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, SessionState::Connected(_)) {
            return Ok(());
        }

        let opts = self.build_opts(&inner.database);
        let conn = Conn::new(opts).await.map_err(|e| {
            Error::Connection(format!(
                "failed to connect mysql target {}: {}",
                self.config.id, e
            ))
        })?;

        inner.state = SessionState::Connected(conn);
        tracing::debug!(id = %self.config.id, "mysql session established");
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput> {
        let mut inner = self.inner.lock().await;
        let conn = match &mut inner.state {
            SessionState::Connected(conn) => conn,
            _ => {
                return Err(Error::Connection(format!(
                    "mysql target {} is not connected",
                    self.config.id
                )))
            }
        };

        let rows: Vec<Row> = if params.is_empty() {
            conn.query(sql)
                .await
                .map_err(|e| Error::Query(e.to_string()))?
        } else {
            let values: Vec<MySqlValue> = params.iter().map(Self::json_to_mysql).collect();
            conn.exec(sql, Params::Positional(values))
                .await
                .map_err(|e| Error::Query(e.to_string()))?
        };

        // An empty row set with zero affected rows stays Rows([]): the text
        // protocol does not say whether the statement had a column set.
        if rows.is_empty() {
            let affected = conn.affected_rows();
            if affected > 0 {
                return Ok(QueryOutput::Affected(affected));
            }
        }

        Ok(QueryOutput::Rows(
            rows.iter().map(Self::row_to_json).collect(),
        ))
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match std::mem::replace(&mut inner.state, SessionState::Closed) {
            SessionState::Connected(conn) => conn.disconnect().await.map_err(|e| {
                Error::Connection(format!(
                    "failed to close mysql target {}: {}",
                    self.config.id, e
                ))
            }),
            _ => Ok(()),
        }
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        // Explicit allow-list wins over discovery, even if stale. No query
        // is issued, and no live handle is required.
        if let Some(allowed) = &self.config.databases {
            if !allowed.is_empty() {
                return Ok(allowed.clone());
            }
        }

        let mut inner = self.inner.lock().await;
        let conn = match &mut inner.state {
            SessionState::Connected(conn) => conn,
            _ => {
                return Err(Error::Connection(format!(
                    "mysql target {} is not connected",
                    self.config.id
                )))
            }
        };

        conn.query("SHOW DATABASES")
            .await
            .map_err(|e| Error::Connection(format!("failed to list databases: {}", e)))
    }

    async fn switch_database(&self, name: &str) -> Result<()> {
        if !is_safe_identifier(name) {
            return Err(Error::Connection(format!(
                "invalid database name: {}",
                name
            )));
        }

        let mut inner = self.inner.lock().await;
        let conn = match &mut inner.state {
            SessionState::Connected(conn) => conn,
            _ => {
                return Err(Error::Connection(format!(
                    "mysql target {} is not connected",
                    self.config.id
                )))
            }
        };

        // In-session switch; the handle identity is preserved.
        conn.query_drop(format!("USE `{}`", name))
            .await
            .map_err(|e| Error::Connection(format!("failed to switch to {}: {}", name, e)))?;

        inner.database = name.to_string();
        Ok(())
    }

    async fn schema_snapshot(&self, table: Option<&str>) -> Result<SchemaSnapshot> {
        let mut inner = self.inner.lock().await;
        let conn = match &mut inner.state {
            SessionState::Connected(conn) => conn,
            _ => {
                return Err(Error::Connection(format!(
                    "mysql target {} is not connected",
                    self.config.id
                )))
            }
        };

        let tables = match table {
            Some(name) => vec![Self::describe_table(conn, name).await?],
            None => {
                let names: Vec<String> = conn
                    .query("SHOW TABLES")
                    .await
                    .map_err(|e| Error::Query(format!("failed to list tables: {}", e)))?;

                let mut tables = Vec::with_capacity(names.len());
                for name in names {
                    tables.push(Self::describe_table(conn, &name).await?);
                }
                tables
            }
        };

        Ok(SchemaSnapshot::new(tables))
    }

    async fn current_database(&self) -> String {
        self.inner.lock().await.database.clone()
    }

    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Mysql
    }
}
