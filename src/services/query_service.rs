use crate::config::{Config, DatabaseConfig};
use crate::error::{Error, Result};
use crate::models::{QueryExecution, SchemaSnapshot};
use crate::services::connection_manager::ConnectionManager;
use crate::services::translation::{sanitize_sql, TranslationService};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// One tool invocation against a configured target.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Natural-language request, or a SQL statement when `raw_sql` is set.
    pub query: String,
    /// Target config id; the configured default when absent.
    pub database_id: Option<String>,
    /// Database/catalog to switch to before executing.
    pub target_database: Option<String>,
    pub raw_sql: bool,
}

impl QueryRequest {
    pub fn natural(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            database_id: None,
            target_database: None,
            raw_sql: false,
        }
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            query: sql.into(),
            database_id: None,
            target_database: None,
            raw_sql: true,
        }
    }

    pub fn on_database(mut self, id: impl Into<String>) -> Self {
        self.database_id = Some(id.into());
        self
    }

    pub fn targeting(mut self, database: impl Into<String>) -> Self {
        self.target_database = Some(database.into());
        self
    }
}

/// Listing entry for one configured target. Per-target connection failures
/// are reported inline rather than failing the whole listing.
#[derive(Debug, Serialize)]
pub struct DatabaseListing {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub current_database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_databases: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Orchestration over the core: resolves a config, obtains a live
/// connection, optionally translates natural language to SQL, executes, and
/// caps the result size.
pub struct QueryService {
    config: Config,
    connections: Arc<ConnectionManager>,
    translator: TranslationService,
}

impl QueryService {
    pub fn new(config: Config, connections: Arc<ConnectionManager>) -> Self {
        let translator = TranslationService::new(&config.environment);
        Self {
            config,
            connections,
            translator,
        }
    }

    fn resolve_config(&self, id: Option<&str>) -> Result<&DatabaseConfig> {
        match id {
            Some(id) => self
                .config
                .database_config(id)
                .ok_or_else(|| Error::NotFound(format!("database config {}", id))),
            None => self
                .config
                .default_database_config()
                .ok_or_else(|| Error::NotFound("no database targets configured".to_string())),
        }
    }

    pub async fn run(&self, request: QueryRequest) -> Result<QueryExecution> {
        let db_config = self.resolve_config(request.database_id.as_deref())?;
        let connection = self.connections.get_connection(db_config).await?;

        if let Some(target) = &request.target_database {
            connection.switch_database(target).await?;
        }

        let started = Instant::now();
        let sql = if request.raw_sql {
            // Raw statements pass the same gate as generated ones; this
            // core only ever executes read statements.
            sanitize_sql(&request.query)?
        } else {
            let snapshot = connection.schema_snapshot(None).await?;
            self.translator
                .convert_to_sql(&request.query, &snapshot, db_config.kind)
                .await?
        };

        tracing::info!(id = %db_config.id, sql = %sql, "executing query");
        let mut results = connection.query(&sql, &[]).await?;

        let max = self.config.environment.max_query_results;
        let total_rows = results.row_count();
        let truncated = results.truncate(max);

        Ok(QueryExecution {
            id: Uuid::new_v4().to_string(),
            database: db_config.name.clone(),
            target_database: connection.current_database().await,
            sql,
            results,
            total_rows,
            truncated,
            elapsed_ms: started.elapsed().as_millis() as u64,
            message: truncated.then(|| format!("results limited to {} rows", max)),
        })
    }

    /// Describe one configured target, or all of them when `database_id` is
    /// absent. With an explicit id, failures propagate; in the all-targets
    /// listing they are reported per entry.
    pub async fn list_databases(&self, database_id: Option<&str>) -> Result<Vec<DatabaseListing>> {
        let targets: Vec<&DatabaseConfig> = match database_id {
            Some(id) => vec![self.resolve_config(Some(id))?],
            None => self.config.databases.iter().collect(),
        };
        let fail_fast = database_id.is_some();

        let mut listings = Vec::with_capacity(targets.len());
        for db_config in targets {
            let mut listing = DatabaseListing {
                id: db_config.id.clone(),
                name: db_config.name.clone(),
                kind: db_config.kind.as_str().to_string(),
                current_database: db_config.database.clone(),
                available_databases: None,
                error: None,
            };

            let databases = async {
                let connection = self.connections.get_connection(db_config).await?;
                listing.current_database = connection.current_database().await;
                connection.list_databases().await
            }
            .await;

            match databases {
                Ok(databases) => listing.available_databases = Some(databases),
                Err(e) if fail_fast => return Err(e),
                Err(e) => listing.error = Some(e.to_string()),
            }

            listings.push(listing);
        }

        Ok(listings)
    }

    /// Schema snapshot for a target, optionally scoped to one table.
    pub async fn table_structure(
        &self,
        database_id: Option<&str>,
        target_database: Option<&str>,
        table: Option<&str>,
    ) -> Result<SchemaSnapshot> {
        let db_config = self.resolve_config(database_id)?;
        let connection = self.connections.get_connection(db_config).await?;

        if let Some(target) = target_database {
            connection.switch_database(target).await?;
        }

        connection.schema_snapshot(table).await
    }

    /// Best-effort shutdown of every live connection.
    pub async fn close(&self) {
        self.connections.close_all().await;
    }
}
