//! Value types shared by the sketching and clustering stages.
//!
//! - [`Vector`]: dense or sparse point with an optional string id
//! - [`WeightedPoint`]: a point standing in for `weight` original points
//! - [`Centers`]: ordered, duplicate-free cluster centers with nearest-center queries
//! - [`distance`]: dot products and squared Euclidean distances

pub mod centers;
pub mod distance;
pub mod error;
pub mod vector;
pub mod weighted;

pub use centers::Centers;
pub use error::{CoreError, CoreResult};
pub use vector::{PointKey, Vector};
pub use weighted::WeightedPoint;

#[cfg(test)]
mod tests;

#[cfg(test)]
pub(crate) fn init() {
    tests::init();
}
