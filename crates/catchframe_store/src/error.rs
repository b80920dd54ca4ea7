use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from store and channel adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Corrupt stored data: {0}")]
    Corrupt(String),

    #[error("Unsupported store URL: {0}")]
    InvalidUrl(String),

    #[error("Lease lost for delivery {0} (redelivered elsewhere or already settled)")]
    LeaseLost(i64),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// True when retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => !matches!(e, sqlx::Error::ColumnDecode { .. }),
            StoreError::Io(e) => e.kind() != std::io::ErrorKind::InvalidInput,
            StoreError::Unavailable(_) | StoreError::LeaseLost(_) => true,
            StoreError::NotFound(_)
            | StoreError::InvalidKey(_)
            | StoreError::Corrupt(_)
            | StoreError::InvalidUrl(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
