//! # sketchmeans
//!
//! k-means|| ("scalable k-means++") over partitioned data, followed by
//! in-memory Lloyd refinement of the resulting weighted sketch and
//! prediction-strength evaluation of candidate cluster counts.
//!
//! ```ignore
//! use sketchmeans::builder::KMeansBuilder;
//! use sketchmeans::dataset::PartitionedDataset;
//!
//! let points = PartitionedDataset::from_vec(vectors, 8);
//! let output = KMeansBuilder::new()
//!     .with_clusters(vec![2, 3, 4])
//!     .with_cross_folds(2)
//!     .with_seed(42)
//!     .run(&points)?;
//! ```
//!
//! Value types (`Vector`, `WeightedPoint`, `Centers`) live in the
//! `sketchmeans-core` crate and are re-exported here.

pub mod builder;
pub mod center_index;
pub mod crossfold;
pub mod dataset;
pub mod errors;
pub mod evaluation;
pub mod kmeans;
pub mod parallel;
pub mod random;
pub mod sampling;

#[cfg(feature = "storage")]
pub mod storage;

pub use sketchmeans_core::{Centers, CoreError, PointKey, Vector, WeightedPoint};

pub use builder::{ClusteringOutput, ConfigValue, KMeansBuilder};
pub use errors::{KMeansError, KMeansResult};

#[cfg(test)]
mod tests;
