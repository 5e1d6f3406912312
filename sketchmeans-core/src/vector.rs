//! Dense and sparse point vectors.
//!
//! A [`Vector`] has a fixed size that never changes after creation. Sparse
//! vectors keep only their non-zero `(index, value)` pairs but report the same
//! `len()` as the equivalent dense vector, so every distance computation sees
//! one logical shape regardless of storage.
//!
//! Equality and hashing are by value: a dense and a sparse vector holding the
//! same numbers are equal, and the optional id is ignored.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use sprs::CsVec;

use crate::distance;
use crate::error::{CoreError, CoreResult};

/// Storage backing a [`Vector`].
#[derive(Clone, Debug)]
pub enum VectorData {
    Dense(Vec<f64>),
    Sparse(CsVec<f64>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(into = "VectorRepr", try_from = "VectorRepr")]
pub struct Vector {
    id: Option<String>,
    data: VectorData,
}

/// Canonical, value-based encoding of a vector: its size plus the bit
/// patterns of its non-zero entries in index order.
///
/// Two vectors map to the same key iff they hold the same values, whatever
/// their storage. Keys own a copy of every non-zero entry, so a map keyed by
/// `PointKey` costs memory proportional to the distinct points it holds.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PointKey {
    size: usize,
    entries: Vec<(usize, u64)>,
}

impl PointKey {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }
}

impl Vector {
    pub fn dense(values: Vec<f64>) -> Self {
        Self {
            id: None,
            data: VectorData::Dense(values),
        }
    }

    /// Build a sparse vector of logical size `size`.
    ///
    /// Indices may arrive unsorted; explicit zeros are dropped. Out-of-range or
    /// duplicated indices are rejected.
    pub fn sparse(size: usize, indices: Vec<usize>, values: Vec<f64>) -> CoreResult<Self> {
        if indices.len() != values.len() {
            return Err(CoreError::InvalidSparse(format!(
                "{} indices but {} values",
                indices.len(),
                values.len()
            )));
        }
        let (indices, values): (Vec<usize>, Vec<f64>) = indices
            .into_iter()
            .zip(values)
            .filter(|(_, v)| *v != 0.0)
            .unzip();

        let sv = CsVec::new_from_unsorted(size, indices, values)
            .map_err(|(_, _, e)| CoreError::InvalidSparse(e.to_string()))?;

        Ok(Self {
            id: None,
            data: VectorData::Sparse(sv),
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn data(&self) -> &VectorData {
        &self.data
    }

    /// Logical size (the dense length, also for sparse storage).
    pub fn len(&self) -> usize {
        match &self.data {
            VectorData::Dense(v) => v.len(),
            VectorData::Sparse(sv) => sv.dim(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.data, VectorData::Sparse(_))
    }

    /// Value at `index`, zero for unstored sparse entries and out-of-range indices.
    pub fn get(&self, index: usize) -> f64 {
        match &self.data {
            VectorData::Dense(v) => v.get(index).copied().unwrap_or(0.0),
            VectorData::Sparse(sv) => sv.get(index).copied().unwrap_or(0.0),
        }
    }

    /// Non-zero entries in increasing index order.
    pub fn nonzeros(&self) -> Box<dyn Iterator<Item = (usize, f64)> + '_> {
        match &self.data {
            VectorData::Dense(v) => Box::new(
                v.iter()
                    .copied()
                    .enumerate()
                    .filter(|(_, x)| *x != 0.0),
            ),
            VectorData::Sparse(sv) => Box::new(sv.iter().map(|(i, x)| (i, *x))),
        }
    }

    pub fn to_dense(&self) -> Vec<f64> {
        match &self.data {
            VectorData::Dense(v) => v.clone(),
            VectorData::Sparse(sv) => {
                let mut out = vec![0.0; sv.dim()];
                for (i, x) in sv.iter() {
                    out[i] = *x;
                }
                out
            }
        }
    }

    pub fn length_squared(&self) -> f64 {
        match &self.data {
            VectorData::Dense(v) => v.iter().map(|x| x * x).sum(),
            VectorData::Sparse(sv) => sv.data().iter().map(|x| x * x).sum(),
        }
    }

    pub fn dot(&self, other: &Vector) -> f64 {
        distance::dot(self, other)
    }

    /// Exact squared Euclidean distance (no cancellation-prone expansion).
    pub fn distance_squared(&self, other: &Vector) -> f64 {
        distance::squared_euclidean(self, other)
    }

    /// Accumulate `scale * self` into a dense buffer of the same size.
    pub fn add_scaled_to(&self, acc: &mut [f64], scale: f64) {
        match &self.data {
            VectorData::Dense(v) => {
                for (a, x) in acc.iter_mut().zip(v) {
                    *a += scale * x;
                }
            }
            VectorData::Sparse(sv) => {
                for (i, x) in sv.iter() {
                    if let Some(a) = acc.get_mut(i) {
                        *a += scale * x;
                    }
                }
            }
        }
    }

    pub fn key(&self) -> PointKey {
        PointKey {
            size: self.len(),
            entries: self.nonzeros().map(|(i, x)| (i, x.to_bits())).collect(),
        }
    }
}

impl PartialEq for Vector {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        match (&self.data, &other.data) {
            (VectorData::Dense(a), VectorData::Dense(b)) => a
                .iter()
                .zip(b)
                .all(|(x, y)| canonical_bits(*x) == canonical_bits(*y)),
            _ => self
                .nonzeros()
                .map(|(i, x)| (i, x.to_bits()))
                .eq(other.nonzeros().map(|(i, x)| (i, x.to_bits()))),
        }
    }
}

impl Eq for Vector {}

impl Hash for Vector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len().hash(state);
        for (i, x) in self.nonzeros() {
            i.hash(state);
            x.to_bits().hash(state);
        }
    }
}

// -0.0 and 0.0 are both "no entry" in the sparse view.
fn canonical_bits(x: f64) -> u64 {
    if x == 0.0 { 0 } else { x.to_bits() }
}

impl From<Vec<f64>> for Vector {
    fn from(values: Vec<f64>) -> Self {
        Vector::dense(values)
    }
}

/// Flat serialized form: dense when `indices` is absent.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct VectorRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    indices: Option<Vec<usize>>,
    values: Vec<f64>,
}

impl From<Vector> for VectorRepr {
    fn from(v: Vector) -> Self {
        let size = v.len();
        match v.data {
            VectorData::Dense(values) => VectorRepr {
                id: v.id,
                size,
                indices: None,
                values,
            },
            VectorData::Sparse(sv) => VectorRepr {
                id: v.id,
                size,
                indices: Some(sv.indices().to_vec()),
                values: sv.data().to_vec(),
            },
        }
    }
}

impl TryFrom<VectorRepr> for Vector {
    type Error = CoreError;

    fn try_from(repr: VectorRepr) -> CoreResult<Self> {
        let vector = match repr.indices {
            None => {
                if repr.values.len() != repr.size {
                    return Err(CoreError::DimensionMismatch {
                        expected: repr.size,
                        found: repr.values.len(),
                    });
                }
                Vector::dense(repr.values)
            }
            Some(indices) => Vector::sparse(repr.size, indices, repr.values)?,
        };
        Ok(match repr.id {
            Some(id) => vector.with_id(id),
            None => vector,
        })
    }
}
