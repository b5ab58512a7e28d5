use std::sync::Arc;

use card_common::cache::CacheError;
use card_common::error::{ErrorKind, StoreError};
use card_engine::error::FusionError;
use thiserror::Error;
use uuid::Uuid;

use crate::stats::FailureCategory;

#[derive(Error, Debug, Clone)]
pub enum StreamError {
    #[error("stream read timed out")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for StreamError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StreamError::Timeout
        } else {
            StreamError::Redis(Arc::new(err))
        }
    }
}

/// Why a single stream message could not be handled.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("malformed event: {0}")]
    Parse(String),
    #[error("device {device_id} of tenant {tenant_id} does not resolve to a card")]
    CardNotFound { tenant_id: Uuid, device_id: Uuid },
    #[error("card lookup failed: {0}")]
    Lookup(#[from] StoreError),
    #[error(transparent)]
    Fusion(#[from] FusionError),
    #[error("failed to write realtime view: {0}")]
    Cache(#[from] CacheError),
}

impl ConsumerError {
    pub fn category(&self) -> FailureCategory {
        match self {
            ConsumerError::Parse(_) => FailureCategory::Parse,
            ConsumerError::CardNotFound { .. } | ConsumerError::Lookup(_) => {
                FailureCategory::CardNotFound
            }
            ConsumerError::Fusion(_) => FailureCategory::FusionFailed,
            ConsumerError::Cache(_) => FailureCategory::CacheFailed,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsumerError::Parse(_) => ErrorKind::Validation,
            ConsumerError::CardNotFound { .. } => ErrorKind::NotFound,
            ConsumerError::Lookup(e) => e.into(),
            ConsumerError::Fusion(e) => e.kind(),
            ConsumerError::Cache(e) => e.into(),
        }
    }
}
