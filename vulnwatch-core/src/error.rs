use thiserror::Error;

/// Per-scan failure raised by a scanner backend.
///
/// The split matters to the reconcilers: retryable failures requeue the
/// target with backoff, fatal failures park it until its image changes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("retryable scan failure: {0}")]
    Retryable(String),

    #[error("fatal scan failure: {0}")]
    Fatal(String),
}

impl ScanError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        ScanError::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        ScanError::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ScanError::Retryable(msg) | ScanError::Fatal(msg) => msg,
        }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid image reference: {0}")]
    InvalidImage(String),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("Execution substrate error: {0}")]
    Substrate(String),

    #[error("Report store error: {0}")]
    Store(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the runtime should requeue the key that produced this error.
    /// Everything except configuration errors is retried; configuration errors
    /// are caught before any reconciler runs.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Config(_) => false,
            CoreError::Scan(err) => err.is_retryable(),
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
