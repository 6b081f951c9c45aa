use serde::Serialize;
use serde_json::Value;

/// Result of executing one statement: an ordered row set for row-returning
/// statements, or the affected-row count for everything else.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QueryOutput {
    Rows(Vec<Value>),
    Affected(u64),
}

impl QueryOutput {
    pub fn row_count(&self) -> usize {
        match self {
            QueryOutput::Rows(rows) => rows.len(),
            QueryOutput::Affected(_) => 1,
        }
    }

    /// Cap a row set at `max` rows. Returns true when rows were dropped.
    /// Non-row outputs are left untouched.
    pub fn truncate(&mut self, max: usize) -> bool {
        match self {
            QueryOutput::Rows(rows) if rows.len() > max => {
                rows.truncate(max);
                true
            }
            _ => false,
        }
    }
}

/// Report for one orchestrated query run.
#[derive(Debug, Serialize)]
pub struct QueryExecution {
    pub id: String,
    pub database: String,
    pub target_database: String,
    pub sql: String,
    pub results: QueryOutput,
    pub total_rows: usize,
    pub truncated: bool,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truncate_caps_rows_only() {
        let mut output =
            QueryOutput::Rows(vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})]);
        assert!(output.truncate(2));
        assert_eq!(output.row_count(), 2);
        assert!(!output.truncate(2));

        let mut scalar = QueryOutput::Affected(10);
        assert!(!scalar.truncate(2));
        assert_eq!(scalar.row_count(), 1);
    }
}
