use thiserror::Error;

/// Core error taxonomy. Every variant carries a human-readable message
/// naming the stage that failed and, where applicable, the offending
/// identifier (config id, keyword, target database name).
#[derive(Debug, Error)]
pub enum Error {
    /// Establishing or tearing down a backend handle failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend accepted the handle but rejected or failed the statement.
    /// The driver's native message is surfaced verbatim.
    #[error("query error: {0}")]
    Query(String),

    /// A generated or supplied statement matched the mutating-keyword
    /// deny-list. The statement is never sent to a backend.
    #[error("query contains forbidden keyword: {keyword}")]
    Sanitization { keyword: String },

    /// A config names a backend kind with no registered implementation.
    #[error("unsupported database kind: {0}")]
    UnsupportedBackend(String),

    /// Remote completion path failed. Never escapes the translation
    /// service; callers only ever observe the fallback result.
    #[error("translation error: {0}")]
    Translation(String),

    /// Config document could not be read, parsed, or validated.
    #[error("configuration error: {0}")]
    Config(String),

    /// A referenced config id does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
