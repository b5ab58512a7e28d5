use card_common::cache::CacheError;
use card_common::error::{ErrorKind, StoreError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("unit {unit_id} not found for tenant {tenant_id}")]
    UnitNotFound { tenant_id: Uuid, unit_id: Uuid },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TopologyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TopologyError::UnitNotFound { .. } => ErrorKind::NotFound,
            TopologyError::Store(e) => e.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("card {0} not found")]
    CardNotFound(Uuid),
    #[error("card {0} has no devices")]
    NoDevices(Uuid),
    #[error("card {0} has no devices eligible for fusion")]
    NoFusionCandidates(Uuid),
    #[error("telemetry read failed: {0}")]
    Store(#[from] StoreError),
}

impl FusionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FusionError::CardNotFound(_) => ErrorKind::NotFound,
            FusionError::NoDevices(_) | FusionError::NoFusionCandidates(_) => ErrorKind::Fusion,
            FusionError::Store(e) => e.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ViewError {
    #[error("card {0} not found")]
    CardNotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to cache card view: {0}")]
    Cache(#[from] CacheError),
}

impl ViewError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ViewError::CardNotFound(_) => ErrorKind::NotFound,
            ViewError::Store(e) => e.into(),
            ViewError::Cache(e) => e.into(),
        }
    }
}
