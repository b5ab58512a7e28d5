use thiserror::Error;

/// Enumeration of errors for operations against the topology and telemetry stores.
/// Errors originating from sqlx are wrapped to keep track of the failing operation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{operation} query failed with: {error}")]
    QueryError {
        operation: &'static str,
        error: sqlx::Error,
    },
    #[error("{operation} returned a malformed row: {reason}")]
    DecodeError {
        operation: &'static str,
        reason: String,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn query(operation: &'static str, error: sqlx::Error) -> Self {
        StoreError::QueryError { operation, error }
    }
}

/// Coarse classification of failures, used for log fields and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    TransientIo,
    SoftSkip,
    Fusion,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::SoftSkip => "soft_skip",
            ErrorKind::Fusion => "fusion",
        }
    }
}

impl From<&StoreError> for ErrorKind {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::DecodeError { .. } => ErrorKind::Validation,
            StoreError::QueryError { .. } | StoreError::Unavailable(_) => ErrorKind::TransientIo,
        }
    }
}
