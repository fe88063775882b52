use thiserror::Error;

pub type Result<T> = std::result::Result<T, PulseError>;

#[derive(Debug, Error)]
pub enum PulseError {
    #[error("query {0} not found")]
    NotFound(i64),
    #[error("analyzer {analyzer} failed: {message}")]
    Analyzer {
        analyzer: &'static str,
        message: String,
    },
    #[error("diagnostic unavailable: {0}")]
    Diagnostic(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PulseError {
    pub(crate) fn analyzer(analyzer: &'static str, message: impl Into<String>) -> Self {
        PulseError::Analyzer {
            analyzer,
            message: message.into(),
        }
    }
}
