use thiserror::Error;

/// Violations of the value-model invariants.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("centers must contain at least one point")]
    EmptyCenters,
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("centers sizes differ: {left} vs {right}")]
    SizeMismatch { left: usize, right: usize },
    #[error("invalid sparse vector: {0}")]
    InvalidSparse(String),
    #[error("weight must be finite and non-negative, got {0}")]
    InvalidWeight(f64),
}

pub type CoreResult<T> = Result<T, CoreError>;
