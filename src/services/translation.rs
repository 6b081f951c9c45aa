// Natural-language to SQL translation. The remote completion path is best
// effort: any failure there degrades to the keyword fallback instead of
// failing the request. Every produced statement, from either path, goes
// through the sanitization gate before it is returned.
use crate::config::{DatabaseKind, EnvironmentConfig};
use crate::error::{Error, Result};
use crate::models::SchemaSnapshot;
use reqwest::Client as HttpClient;
use serde_json::json;

/// Mutating keywords rejected by the sanitization gate.
const DENIED_KEYWORDS: [&str; 6] = ["DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "CREATE"];

pub struct TranslationService {
    api_key: Option<String>,
    base_url: String,
    model: String,
    http_client: HttpClient,
}

impl TranslationService {
    pub fn new(environment: &EnvironmentConfig) -> Self {
        Self {
            api_key: environment.openai_api_key.clone(),
            base_url: environment.completion_base_url.clone(),
            model: environment.completion_model.clone(),
            http_client: HttpClient::new(),
        }
    }

    /// Convert a natural-language request into SQL. With a configured API
    /// key the remote completion path runs first; without one, or when the
    /// remote call fails for any reason, the deterministic keyword fallback
    /// takes over. Only the sanitization gate can fail the caller.
    pub async fn convert_to_sql(
        &self,
        text: &str,
        snapshot: &SchemaSnapshot,
        kind: DatabaseKind,
    ) -> Result<String> {
        let sql = if self.api_key.is_some() {
            match self.request_completion(text, snapshot, kind).await {
                Ok(sql) => sql,
                Err(e) => {
                    tracing::warn!("completion request failed, using keyword fallback: {}", e);
                    keyword_fallback(text, snapshot)
                }
            }
        } else {
            keyword_fallback(text, snapshot)
        };

        sanitize_sql(&sql)
    }

    async fn request_completion(
        &self,
        text: &str,
        snapshot: &SchemaSnapshot,
        kind: DatabaseKind,
    ) -> Result<String> {
        let prompt = build_prompt(text, snapshot, kind)?;
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(self.api_key.as_deref().unwrap_or_default())
            .json(&json!({
                "model": self.model,
                "messages": [
                    {
                        "role": "system",
                        "content": "You generate SQL from natural-language requests. \
                                    Reply with a single bare SQL statement and nothing else: \
                                    no explanations, no markdown."
                    },
                    { "role": "user", "content": prompt }
                ],
                "temperature": 0.1,
            }))
            .send()
            .await
            .map_err(|e| Error::Translation(format!("completion request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Translation(format!(
                "completion endpoint returned {}: {}",
                status, body
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Translation(format!("malformed completion response: {}", e)))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .unwrap_or_default();
        if content.is_empty() {
            return Err(Error::Translation(
                "completion response contained no SQL".to_string(),
            ));
        }

        // Models occasionally fence the statement despite the system
        // instruction.
        Ok(content
            .trim_start_matches("```sql")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string())
    }
}

fn build_prompt(text: &str, snapshot: &SchemaSnapshot, kind: DatabaseKind) -> Result<String> {
    let schema = serde_json::to_string_pretty(&snapshot.tables)
        .map_err(|e| Error::Translation(format!("failed to serialize schema: {}", e)))?;

    Ok(format!(
        "Database type: {kind}\n\n\
         Schema:\n{schema}\n\n\
         Request: {text}\n\n\
         Generate the matching {kind} SELECT statement. Return only the SQL, \
         use table and column names from the schema, and keep the query \
         read-only."
    ))
}

/// Deterministic keyword fallback. Intentionally crude: it keeps the tool
/// usable without a completion credential, nothing more.
pub fn keyword_fallback(text: &str, snapshot: &SchemaSnapshot) -> String {
    let text = text.to_lowercase();
    let table = snapshot.first_table().unwrap_or("table");

    if text.contains("所有") || text.contains("全部") || text.contains("all") {
        format!("SELECT * FROM {} LIMIT 100", table)
    } else if text.contains("数量") || text.contains("count") {
        format!("SELECT COUNT(*) as count FROM {}", table)
    } else {
        format!("SELECT * FROM {} LIMIT 10", table)
    }
}

/// Sanitization gate: strip comments, then reject any statement whose
/// uppercased text contains a deny-listed mutating keyword.
///
/// This is a deliberate substring check, not a parser. It can false-positive
/// on identifiers or string literals that merely mention a deny-listed word
/// (a literal `'please insert here'` is rejected). That tradeoff is
/// intentional: conservative rejection over permissive execution.
pub fn sanitize_sql(sql: &str) -> Result<String> {
    let stripped = strip_sql_comments(sql);
    let upper = stripped.to_uppercase();

    for keyword in DENIED_KEYWORDS {
        if upper.contains(keyword) {
            return Err(Error::Sanitization {
                keyword: keyword.to_string(),
            });
        }
    }

    Ok(stripped.trim().to_string())
}

/// Remove `/* ... */` block comments, then `-- ...` line comments.
fn strip_sql_comments(sql: &str) -> String {
    let mut without_blocks = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(start) = rest.find("/*") {
        without_blocks.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => {
                // Unterminated block comment swallows the remainder.
                rest = "";
            }
        }
    }
    without_blocks.push_str(rest);

    without_blocks
        .lines()
        .map(|line| line.split("--").next().unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TableSchema;

    fn users_snapshot() -> SchemaSnapshot {
        SchemaSnapshot::new(vec![TableSchema::new("users", vec![])])
    }

    #[test]
    fn test_sanitize_rejects_piggybacked_drop() {
        let err = sanitize_sql("SELECT * FROM t; DROP TABLE t;").unwrap_err();
        match err {
            Error::Sanitization { keyword } => assert_eq!(keyword, "DROP"),
            other => panic!("expected sanitization error, got {:?}", other),
        }
    }

    #[test]
    fn test_sanitize_ignores_keyword_inside_line_comment() {
        let sql = sanitize_sql("SELECT * FROM t -- drop later").unwrap();
        assert_eq!(sql, "SELECT * FROM t");
    }

    #[test]
    fn test_sanitize_ignores_keyword_inside_block_comment() {
        let sql = sanitize_sql("SELECT * FROM t /* delete\nnothing */ WHERE id = 1").unwrap();
        assert!(!sql.to_uppercase().contains("DELETE"));
        assert!(sql.contains("WHERE id = 1"));
    }

    #[test]
    fn test_sanitize_accepts_false_positive_tradeoff() {
        // Substring match by design: a harmless literal mentioning a
        // keyword is rejected.
        assert!(sanitize_sql("SELECT 'please insert here'").is_err());
    }

    #[test]
    fn test_sanitize_rejects_every_denied_keyword() {
        for keyword in DENIED_KEYWORDS {
            let sql = format!("{} something", keyword.to_lowercase());
            assert!(sanitize_sql(&sql).is_err(), "{} must be rejected", keyword);
        }
    }

    #[test]
    fn test_fallback_all_keywords() {
        let snapshot = users_snapshot();
        for text in ["show all rows", "全部数据", "所有用户"] {
            assert_eq!(
                keyword_fallback(text, &snapshot),
                "SELECT * FROM users LIMIT 100"
            );
        }
    }

    #[test]
    fn test_fallback_count_keywords() {
        let snapshot = users_snapshot();
        for text in ["count the users", "用户数量"] {
            assert_eq!(
                keyword_fallback(text, &snapshot),
                "SELECT COUNT(*) as count FROM users"
            );
        }
    }

    #[test]
    fn test_fallback_default_is_small_select() {
        let snapshot = users_snapshot();
        assert_eq!(
            keyword_fallback("show me something", &snapshot),
            "SELECT * FROM users LIMIT 10"
        );
    }

    #[test]
    fn test_fallback_without_tables_uses_placeholder() {
        let snapshot = SchemaSnapshot::new(vec![]);
        assert_eq!(
            keyword_fallback("anything", &snapshot),
            "SELECT * FROM table LIMIT 10"
        );
    }

    #[tokio::test]
    async fn test_convert_without_key_uses_fallback_and_sanitizes() {
        let service = TranslationService::new(&EnvironmentConfig::default());
        let sql = service
            .convert_to_sql("count rows", &users_snapshot(), DatabaseKind::Sqlite)
            .await
            .unwrap();
        assert_eq!(sql, "SELECT COUNT(*) as count FROM users");
    }

    #[tokio::test]
    async fn test_remote_failure_degrades_to_fallback() {
        // A key is configured but the endpoint is unreachable; translation
        // still succeeds through the fallback.
        let environment = EnvironmentConfig {
            openai_api_key: Some("test-key".to_string()),
            completion_base_url: "http://127.0.0.1:1".to_string(),
            ..EnvironmentConfig::default()
        };
        let service = TranslationService::new(&environment);
        let sql = service
            .convert_to_sql("list all users", &users_snapshot(), DatabaseKind::Postgres)
            .await
            .unwrap();
        assert_eq!(sql, "SELECT * FROM users LIMIT 100");
    }
}
