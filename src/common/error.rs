use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed or incomplete record. Recorded on the staging row; never fatal.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Fuzzy match landed in the review band. Surfaced for manual review, not auto-applied.
    #[error("resolution ambiguous for '{candidate}': best match '{matched}' at {similarity:.2}")]
    ReviewRequired {
        candidate: String,
        matched: String,
        similarity: f64,
    },

    /// Connection reset / timeout / query cancellation during a retryable operation.
    #[error("transient infrastructure error: {message}")]
    Transient { message: String },

    /// Database error that is not expected to clear on retry.
    #[error("database error: {message}")]
    Database { message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("environment variable error: {0}")]
    Env(#[from] std::env::VarError),
}

impl PipelineError {
    /// Closed retryability classification. Only transient infrastructure
    /// failures are worth another attempt; everything else either cannot
    /// succeed on retry or must be surfaced as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient { .. })
    }

    /// Classify a libsql driver error once, at the storage boundary, into
    /// transient vs. permanent. Keyed on the structured error kind where the
    /// driver exposes one; the remainder is permanent by default.
    pub fn from_libsql(context: &str, err: libsql::Error) -> Self {
        match err {
            libsql::Error::ConnectionFailed(msg) => PipelineError::Transient {
                message: format!("{context}: connection failed: {msg}"),
            },
            other => PipelineError::Database {
                message: format!("{context}: {other}"),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
