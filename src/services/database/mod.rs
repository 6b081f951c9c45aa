// Backend abstraction: one connection implementation per database family,
// all behind the DatabaseConnection capability contract.
pub mod connection;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use connection::DatabaseConnection;
pub use mysql::MySqlConnection;
pub use postgres::PostgresConnection;
pub use sqlite::SqliteConnection;

use crate::config::{DatabaseConfig, DatabaseKind};
use std::sync::Arc;

/// Single dispatch point for backend selection. Everything downstream works
/// against the trait; no backend checks at call sites.
pub fn create_connection(config: DatabaseConfig) -> Arc<dyn DatabaseConnection> {
    match config.kind {
        DatabaseKind::Mysql => Arc::new(MySqlConnection::new(config)),
        DatabaseKind::Postgres => Arc::new(PostgresConnection::new(config)),
        DatabaseKind::Sqlite => Arc::new(SqliteConnection::new(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_factory_dispatches_on_kind() {
        for kind in [DatabaseKind::Mysql, DatabaseKind::Postgres, DatabaseKind::Sqlite] {
            let config = DatabaseConfig {
                id: "t".to_string(),
                name: "T".to_string(),
                kind,
                host: None,
                port: None,
                username: None,
                password: None,
                database: "db".to_string(),
                databases: None,
                options: HashMap::new(),
            };
            assert_eq!(create_connection(config).kind(), kind);
        }
    }
}
