use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}: {source}", path.display())]
    Path {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("invalid document key: {0}")]
    InvalidKey(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("malformed document {key}: {reason}")]
    MalformedDocument { key: String, reason: String },

    /// The external engine refused, dropped or never accepted the connection.
    #[error("search backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("unexpected reply from search backend: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;
