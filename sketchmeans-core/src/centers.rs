//! Ordered, duplicate-free cluster centers.
//!
//! A `Centers` value is never mutated: every seeding step and every Lloyd
//! iteration produces a new one. Construction drops repeated points (by value,
//! keeping the first occurrence) and rejects an empty list, so `len()` is
//! always the candidate cluster count k.

use std::collections::HashSet;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::vector::{PointKey, Vector};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(into = "Vec<Vector>", try_from = "Vec<Vector>")]
pub struct Centers {
    points: Vec<Vector>,
}

impl Centers {
    pub fn new<I>(points: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = Vector>,
    {
        let mut seen: HashSet<PointKey> = HashSet::new();
        let mut unique = Vec::new();
        let mut dimension: Option<usize> = None;
        let mut dropped = 0usize;

        for p in points {
            match dimension {
                None => dimension = Some(p.len()),
                Some(d) if d != p.len() => {
                    return Err(CoreError::DimensionMismatch {
                        expected: d,
                        found: p.len(),
                    });
                }
                Some(_) => {}
            }
            if seen.insert(p.key()) {
                unique.push(p);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            trace!("Centers: dropped {} duplicate points", dropped);
        }

        if unique.is_empty() {
            return Err(CoreError::EmptyCenters);
        }
        Ok(Self { points: unique })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.points[0].len()
    }

    pub fn get(&self, index: usize) -> Option<&Vector> {
        self.points.get(index)
    }

    pub fn points(&self) -> &[Vector] {
        &self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vector> {
        self.points.iter()
    }

    pub fn contains(&self, point: &Vector) -> bool {
        self.points.iter().any(|p| p == point)
    }

    /// Index of the closest center and its squared distance. Ties go to the
    /// lower index.
    pub fn nearest(&self, point: &Vector) -> (usize, f64) {
        let mut best_idx = 0;
        let mut best_dist2 = f64::INFINITY;
        for (i, c) in self.points.iter().enumerate() {
            let d2 = c.distance_squared(point);
            if d2 < best_dist2 {
                best_dist2 = d2;
                best_idx = i;
            }
        }
        (best_idx, best_dist2)
    }

    pub fn index_of_closest(&self, point: &Vector) -> usize {
        self.nearest(point).0
    }

    /// Minimum squared distance from `point` to any center; zero iff `point`
    /// is one of the centers.
    pub fn distance_squared(&self, point: &Vector) -> f64 {
        self.nearest(point).1
    }

    pub fn extend_with(&self, point: Vector) -> CoreResult<Centers> {
        Centers::new(self.points.iter().cloned().chain(std::iter::once(point)))
    }

    pub fn extend_with_all<I>(&self, points: I) -> CoreResult<Centers>
    where
        I: IntoIterator<Item = Vector>,
    {
        Centers::new(self.points.iter().cloned().chain(points))
    }

    /// Sum of squared distances between centers at the same position.
    pub fn sum_of_squared_distances(&self, other: &Centers) -> CoreResult<f64> {
        if self.len() != other.len() {
            return Err(CoreError::SizeMismatch {
                left: self.len(),
                right: other.len(),
            });
        }
        Ok(self
            .points
            .iter()
            .zip(&other.points)
            .map(|(a, b)| a.distance_squared(b))
            .sum())
    }

    pub fn into_points(self) -> Vec<Vector> {
        self.points
    }
}

/// Set equality: same points, any order.
impl PartialEq for Centers {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.points.iter().all(|p| other.contains(p))
    }
}

impl<'a> IntoIterator for &'a Centers {
    type Item = &'a Vector;
    type IntoIter = std::slice::Iter<'a, Vector>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

impl From<Centers> for Vec<Vector> {
    fn from(c: Centers) -> Self {
        c.points
    }
}

impl TryFrom<Vec<Vector>> for Centers {
    type Error = CoreError;

    fn try_from(points: Vec<Vector>) -> CoreResult<Self> {
        Centers::new(points)
    }
}
