use sketchmeans_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KMeansError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("centers do not belong together: {0}")]
    MismatchedCenters(String),
    #[error("requested {requested} clusters but only {available} distinct weighted points")]
    InsufficientPoints { requested: usize, available: usize },
    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type KMeansResult<T> = Result<T, KMeansError>;
