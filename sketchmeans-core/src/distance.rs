//! Distance kernels for dense and sparse vectors
//!
//! Implements:
//! - dot products (dense·dense, sparse·dense, sparse·sparse)
//! - exact squared Euclidean distance
//! - the `|a|² + |b|² − 2·a·b` expansion used with cached squared lengths
//!
//! The expansion is what makes batched nearest-center queries cheap (one dot
//! product per stored point), but floating-point cancellation can push it
//! slightly below zero for near-identical points. [`expanded_squared_distance`]
//! clamps the result at zero.

use sprs::CsVec;

use crate::vector::{Vector, VectorData};

pub fn dot_dense(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn squared_euclidean_dense(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Sparse·dense dot product; sparse indices past the dense length contribute zero.
pub fn dot_sparse_dense(sparse: &CsVec<f64>, dense: &[f64]) -> f64 {
    sparse
        .iter()
        .map(|(i, x)| x * dense.get(i).copied().unwrap_or(0.0))
        .sum()
}

pub fn dot(a: &Vector, b: &Vector) -> f64 {
    match (a.data(), b.data()) {
        (VectorData::Dense(x), VectorData::Dense(y)) => dot_dense(x, y),
        (VectorData::Sparse(s), VectorData::Dense(d))
        | (VectorData::Dense(d), VectorData::Sparse(s)) => dot_sparse_dense(s, d),
        (VectorData::Sparse(_), VectorData::Sparse(_)) => {
            merge_nonzeros(a, b, |x, y| x * y, |_| 0.0)
        }
    }
}

/// Exact squared Euclidean distance between two vectors of the same size.
pub fn squared_euclidean(a: &Vector, b: &Vector) -> f64 {
    match (a.data(), b.data()) {
        (VectorData::Dense(x), VectorData::Dense(y)) if x.len() == y.len() => {
            squared_euclidean_dense(x, y)
        }
        _ => merge_nonzeros(
            a,
            b,
            |x, y| {
                let d = x - y;
                d * d
            },
            |x| x * x,
        ),
    }
}

/// `|a|² + |b|² − 2·a·b`, clamped at zero.
#[inline]
pub fn expanded_squared_distance(length_squared_a: f64, length_squared_b: f64, dot: f64) -> f64 {
    let d = length_squared_a + length_squared_b - 2.0 * dot;
    if d > 0.0 { d } else { 0.0 }
}

/// Merge-join over the non-zero entries of both vectors: `both` is applied
/// where the indices meet, `single` where only one side stores a value.
fn merge_nonzeros<B, S>(a: &Vector, b: &Vector, both: B, single: S) -> f64
where
    B: Fn(f64, f64) -> f64,
    S: Fn(f64) -> f64,
{
    let mut left = a.nonzeros().peekable();
    let mut right = b.nonzeros().peekable();
    let mut acc = 0.0;

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (Some((i, x)), Some((j, y))) => {
                if i == j {
                    acc += both(x, y);
                    left.next();
                    right.next();
                } else if i < j {
                    acc += single(x);
                    left.next();
                } else {
                    acc += single(y);
                    right.next();
                }
            }
            (Some((_, x)), None) => {
                acc += single(x);
                left.next();
            }
            (None, Some((_, y))) => {
                acc += single(y);
                right.next();
            }
            (None, None) => break,
        }
    }
    acc
}
