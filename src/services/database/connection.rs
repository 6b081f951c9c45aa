use crate::config::DatabaseKind;
use crate::error::Result;
use crate::models::{QueryOutput, SchemaSnapshot};
use serde_json::Value;

/// Capability contract shared by all backend connections. One implementation
/// per backend kind; all backend-specific behavior (dialect, discovery
/// queries, switch semantics) lives inside the variant.
///
/// Lifecycle per handle: uninitialized -> connected -> closed. The
/// pool-style and file-style backends re-enter the connected state during
/// `switch_database`; callers never observe the intermediate closed state
/// unless the reconnect half fails.
#[async_trait::async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Establish the backend-native handle from the bound config's
    /// coordinates merged with its options bag. On failure no
    /// partially-initialized handle is observable.
    async fn connect(&self) -> Result<()>;

    /// Execute `sql` with optional positional parameters. Row-returning
    /// statements yield an ordered row set keyed by column name; everything
    /// else yields the affected-row count.
    ///
    /// Classification is backend-native and textual, not a parse: on the
    /// session-style backend a non-row statement touching zero rows is
    /// indistinguishable from an empty row set and comes back as empty
    /// rows. The orchestration layer only reaches this method with
    /// statements that pass the mutation gate, so the ambiguity is limited
    /// to direct trait callers.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput>;

    /// Idempotent teardown. Transport errors during teardown are surfaced
    /// but do not keep the handle alive.
    async fn close(&self) -> Result<()>;

    /// Names of reachable databases. An explicit allow-list on the config is
    /// authoritative and returned verbatim without issuing any query;
    /// otherwise a backend-specific discovery query runs.
    async fn list_databases(&self) -> Result<Vec<String>>;

    /// Change the effective target catalog. Session-style backends switch
    /// in-session; pool- and file-style backends close and reconnect with
    /// the effective database mutated first. A failed reconnect leaves the
    /// handle closed and is not retried.
    async fn switch_database(&self, name: &str) -> Result<()>;

    /// Backend-specific structural discovery: all tables with their columns,
    /// or a single table when `table` is given.
    async fn schema_snapshot(&self, table: Option<&str>) -> Result<SchemaSnapshot>;

    /// Effective database/catalog name. Drifts from the config's initial
    /// value after a switch.
    async fn current_database(&self) -> String;

    fn kind(&self) -> DatabaseKind;
}

/// Conservative identifier check for names interpolated into dialect
/// statements (USE, DESCRIBE, PRAGMA). Rejects anything that could break
/// out of the identifier position.
pub(crate) fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' || c == '/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_identifier() {
        assert!(is_safe_identifier("users"));
        assert!(is_safe_identifier("app_v2"));
        assert!(is_safe_identifier("data/app.db"));
        assert!(!is_safe_identifier(""));
        assert!(!is_safe_identifier("users; DROP TABLE x"));
        assert!(!is_safe_identifier("a`b"));
    }
}
