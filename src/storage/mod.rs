pub mod parquet;

#[cfg(test)]
#[cfg(feature = "storage")]
mod test_storage;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Arrow error: {0}")]
    Arrow(String),
    #[error("Serde error: {0}")]
    Serde(String),
    #[error("Invalid: {0}")]
    Invalid(String),
    #[error("Parquet error: {0}")]
    Parquet(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
