use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::vector::Vector;

/// A point together with how many original points it stands in for.
///
/// Raw input points carry weight 1.0; sketch points carry the number of
/// dataset points that were closest to them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightedPoint {
    point: Vector,
    weight: f64,
}

impl WeightedPoint {
    pub fn new(point: Vector, weight: f64) -> CoreResult<Self> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(CoreError::InvalidWeight(weight));
        }
        Ok(Self { point, weight })
    }

    /// Weight 1.0.
    pub fn unit(point: Vector) -> Self {
        Self { point, weight: 1.0 }
    }

    pub fn point(&self) -> &Vector {
        &self.point
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn into_parts(self) -> (Vector, f64) {
        (self.point, self.weight)
    }
}

impl From<Vector> for WeightedPoint {
    fn from(point: Vector) -> Self {
        WeightedPoint::unit(point)
    }
}
