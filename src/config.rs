use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::Path;

/// Supported database backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[serde(alias = "mariadb")]
    Mysql,
    #[serde(alias = "postgresql")]
    Postgres,
    Sqlite,
}

impl DatabaseKind {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DatabaseKind::Mysql),
            "postgres" | "postgresql" => Ok(DatabaseKind::Postgres),
            "sqlite" => Ok(DatabaseKind::Sqlite),
            other => Err(Error::UnsupportedBackend(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured database target. Connection coordinates are optional
/// because the sqlite backend ignores them; `database` doubles as the file
/// path there.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub id: String,
    pub name: String,
    pub kind: DatabaseKind,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub database: String,
    /// Explicit allow-list. When present it is authoritative: no discovery
    /// query is ever issued for this target, even if the list is stale.
    #[serde(default)]
    pub databases: Option<Vec<String>>,
    /// Open bag of backend-specific connection options. Each backend
    /// recognizes its own small set of keys and ignores the rest.
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

/// Environment-level policy, applied across all targets.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default = "default_max_query_results")]
    pub max_query_results: usize,
    /// Reserved for the orchestration layer's result cache. Parsed and
    /// exposed, unused inside this core.
    #[serde(default = "default_true")]
    pub enable_cache: bool,
    #[serde(default)]
    pub default_database: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Presence gates whether the translation service attempts the remote
    /// completion path at all.
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_completion_base_url")]
    pub completion_base_url: String,
    #[serde(default = "default_completion_model")]
    pub completion_model: String,
}

fn default_max_query_results() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_completion_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            max_query_results: default_max_query_results(),
            enable_cache: true,
            default_database: None,
            log_level: default_log_level(),
            openai_api_key: None,
            completion_base_url: default_completion_base_url(),
            completion_model: default_completion_model(),
        }
    }
}

/// Fully-resolved typed configuration: environment policy plus the set of
/// database targets.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: EnvironmentConfig::default(),
            databases: vec![DatabaseConfig {
                id: "default".to_string(),
                name: "Default Database".to_string(),
                kind: DatabaseKind::Sqlite,
                host: None,
                port: None,
                username: None,
                password: None,
                database: "default.db".to_string(),
                databases: None,
                options: HashMap::new(),
            }],
        }
    }
}

impl Config {
    /// Load a JSON config document from disk: `.env` first, then
    /// `${VAR}` / `${VAR:-default}` placeholder resolution against the
    /// process environment, then parse, env overrides, and validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let _ = dotenv::dotenv();

        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "failed to read config document {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_document(&raw)
    }

    /// Parse an in-memory JSON config document.
    pub fn from_document(raw: &str) -> Result<Self> {
        let resolved = resolve_env_placeholders(raw);

        let mut config: Config = config::Config::builder()
            .add_source(config::File::from_str(&resolved, config::FileFormat::Json))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(format!("failed to parse config document: {}", e)))?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides recognized at the policy level. Applied after
    /// document parse, last-writer-wins over document values.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            self.environment.openai_api_key = Some(key);
        }
        if let Ok(id) = env::var("DEFAULT_DATABASE") {
            self.environment.default_database = Some(id);
        }
        if let Ok(max) = env::var("MAX_QUERY_RESULTS") {
            match max.parse::<usize>() {
                Ok(n) => self.environment.max_query_results = n,
                Err(_) => tracing::warn!("ignoring non-numeric MAX_QUERY_RESULTS: {}", max),
            }
        }
        if let Ok(flag) = env::var("ENABLE_CACHE") {
            self.environment.enable_cache = flag == "true";
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            if ["debug", "info", "warn", "error"].contains(&level.as_str()) {
                self.environment.log_level = level;
            } else {
                tracing::warn!("ignoring unknown LOG_LEVEL: {}", level);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.environment.max_query_results == 0 {
            return Err(Error::Config(
                "max_query_results must be a positive integer".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for db in &self.databases {
            if db.id.is_empty() {
                return Err(Error::Config("database target with empty id".to_string()));
            }
            if !seen.insert(db.id.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate database target id: {}",
                    db.id
                )));
            }
            if db.database.is_empty() {
                return Err(Error::Config(format!(
                    "database target {} has an empty database",
                    db.id
                )));
            }
        }

        if let Some(default_id) = &self.environment.default_database {
            if !self.databases.iter().any(|db| &db.id == default_id) {
                return Err(Error::Config(format!(
                    "default database id {} does not match any configured target",
                    default_id
                )));
            }
        }

        Ok(())
    }

    pub fn database_config(&self, id: &str) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|db| db.id == id)
    }

    /// The configured default target, falling back to the first entry.
    pub fn default_database_config(&self) -> Option<&DatabaseConfig> {
        match &self.environment.default_database {
            Some(id) => self.database_config(id),
            None => self.databases.first(),
        }
    }
}

/// Resolve `${NAME}` and `${NAME:-default}` placeholders against the
/// process environment. A set variable wins exactly; an unset variable with
/// a default yields the default (trimmed); an unset variable without a
/// default yields an empty string with a warning.
pub fn resolve_env_placeholders(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let expr = &after[..end];
                let (name, default) = match expr.split_once(":-") {
                    Some((name, default)) => (name.trim(), Some(default)),
                    None => (expr.trim(), None),
                };
                match env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => match default {
                        Some(d) => out.push_str(d.trim()),
                        None => {
                            tracing::warn!(
                                "environment variable {} is unset and has no default",
                                name
                            );
                        }
                    },
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated placeholder, keep it verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Process environment is shared across test threads; tests that touch
    // the override variables serialize on this.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_placeholder_set_var_wins_exactly() {
        env::set_var("DBSEARCH_TEST_HOST_A1", "db.internal");
        let resolved = resolve_env_placeholders("${DBSEARCH_TEST_HOST_A1:-localhost}");
        assert_eq!(resolved, "db.internal");
        env::remove_var("DBSEARCH_TEST_HOST_A1");
    }

    #[test]
    fn test_placeholder_unset_var_uses_default_trimmed() {
        env::remove_var("DBSEARCH_TEST_HOST_B2");
        assert_eq!(
            resolve_env_placeholders("${DBSEARCH_TEST_HOST_B2:-localhost}"),
            "localhost"
        );
        assert_eq!(
            resolve_env_placeholders("${DBSEARCH_TEST_HOST_B2:- 3306 }"),
            "3306"
        );
    }

    #[test]
    fn test_placeholder_unset_var_no_default_is_empty() {
        env::remove_var("DBSEARCH_TEST_HOST_C3");
        assert_eq!(resolve_env_placeholders("x${DBSEARCH_TEST_HOST_C3}y"), "xy");
    }

    #[test]
    fn test_placeholder_unterminated_kept_verbatim() {
        assert_eq!(resolve_env_placeholders("a${OOPS"), "a${OOPS");
    }

    #[test]
    fn test_document_round_trip_with_placeholders() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("MAX_QUERY_RESULTS");
        env::remove_var("DBSEARCH_TEST_DB_NAME_D4");
        let doc = r#"{
            "environment": { "max_query_results": 50 },
            "databases": [{
                "id": "main",
                "name": "Main",
                "kind": "sqlite",
                "database": "${DBSEARCH_TEST_DB_NAME_D4:-app.db}"
            }]
        }"#;
        let config = Config::from_document(doc).unwrap();
        assert_eq!(config.databases[0].database, "app.db");
        assert_eq!(config.environment.max_query_results, 50);
        assert!(config.environment.enable_cache);
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let doc = r#"{
            "databases": [
                { "id": "a", "name": "A", "kind": "sqlite", "database": "a.db" },
                { "id": "a", "name": "B", "kind": "sqlite", "database": "b.db" }
            ]
        }"#;
        let err = Config::from_document(doc).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_validate_rejects_empty_database() {
        let doc = r#"{
            "databases": [
                { "id": "a", "name": "A", "kind": "sqlite", "database": "" }
            ]
        }"#;
        assert!(Config::from_document(doc).is_err());
    }

    #[test]
    fn test_validate_rejects_dangling_default_id() {
        let doc = r#"{
            "environment": { "default_database": "missing" },
            "databases": [
                { "id": "a", "name": "A", "kind": "sqlite", "database": "a.db" }
            ]
        }"#;
        let err = Config::from_document(doc).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_unknown_kind_is_rejected_at_parse() {
        let doc = r#"{
            "databases": [
                { "id": "a", "name": "A", "kind": "oracle", "database": "a" }
            ]
        }"#;
        assert!(Config::from_document(doc).is_err());
        assert!(matches!(
            DatabaseKind::from_str("oracle"),
            Err(Error::UnsupportedBackend(_))
        ));
    }

    #[test]
    fn test_default_database_config_falls_back_to_first() {
        let config = Config::default();
        assert_eq!(config.default_database_config().unwrap().id, "default");
    }

    #[test]
    fn test_env_override_is_last_writer() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("MAX_QUERY_RESULTS", "7");
        let doc = r#"{
            "environment": { "max_query_results": 500 },
            "databases": [
                { "id": "a", "name": "A", "kind": "sqlite", "database": "a.db" }
            ]
        }"#;
        let config = Config::from_document(doc).unwrap();
        env::remove_var("MAX_QUERY_RESULTS");
        assert_eq!(config.environment.max_query_results, 7);
    }
}
