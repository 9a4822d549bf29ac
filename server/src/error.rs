use thiserror::Error;

/// Errors surfaced by the storage layer and the business rules.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("{0}")]
    Validation(String),

    #[error("Cannot exceed limit of {limit} active items")]
    LimitExceeded { limit: u32 },

    #[error("'{name}' already exists among active items")]
    DuplicateName { name: String },

    #[error("Item with id {id} not found")]
    NotFound { id: i64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt data file {path}: {reason}")]
    CorruptFile { path: String, reason: String },

    #[error("invalid stored record: {0}")]
    InvalidRecord(String),
}
