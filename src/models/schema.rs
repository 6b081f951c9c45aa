use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ephemeral structural description of a database, produced on demand by a
/// backend connection and consumed immediately by the translation service.
/// Never persisted or cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableSchema>,
    pub retrieved_at: DateTime<Utc>,
}

impl SchemaSnapshot {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self {
            tables,
            retrieved_at: Utc::now(),
        }
    }

    /// First table in discovery order. The keyword fallback targets this.
    pub fn first_table(&self) -> Option<&str> {
        self.tables.first().map(|t| t.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}
