//! Prediction strength (Tibshirani and Walther, 2005) and train/test costs
//! for choosing the number of clusters.
//!
//! For each candidate `k`, the weighted points of a held-out fold are assigned
//! both to centers fitted on that fold ("test") and to centers fitted on
//! another fold ("train"). Row `i` of the co-occurrence matrix spreads the
//! weight of test cluster `i` over the train clusters; a row scores
//! `Σ a·(a−1) / (total·(total−1))`, the fraction of same-cluster pairs that
//! the train centers keep together. The strength for `k` is the worst row.

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sketchmeans_core::{Centers, WeightedPoint};

use crate::errors::{KMeansError, KMeansResult};

/// Weighted `[test cluster][train cluster]` co-occurrence of `points`.
pub fn co_occurrence(test: &Centers, train: &Centers, points: &[WeightedPoint]) -> Vec<Vec<f64>> {
    let mut matrix = vec![vec![0.0; train.len()]; test.len()];
    for wp in points {
        let test_id = test.index_of_closest(wp.point());
        let train_id = train.index_of_closest(wp.point());
        matrix[test_id][train_id] += wp.weight();
    }
    matrix
}

/// Score of one row, `None` when the row holds one unit of weight or less.
pub fn row_strength(row: &[f64]) -> Option<f64> {
    let total: f64 = row.iter().sum();
    if total <= 1.0 {
        return None;
    }
    let same: f64 = row.iter().map(|a| a * (a - 1.0)).sum();
    Some(same / (total * (total - 1.0)))
}

/// Minimum row score; 0.0 when every row is degenerate.
pub fn prediction_strength(matrix: &[Vec<f64>]) -> f64 {
    let min = matrix
        .iter()
        .filter_map(|row| row_strength(row))
        .fold(f64::INFINITY, f64::min);
    if min.is_finite() { min } else { 0.0 }
}

/// Per-candidate prediction strength and the cost of the test points under
/// the test and train centers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KMeansEvaluation {
    prediction_strengths: Vec<f64>,
    train_costs: Vec<f64>,
    test_costs: Vec<f64>,
}

impl KMeansEvaluation {
    /// `test_centers[i]` and `train_centers[i]` are the two fits for the
    /// `i`-th candidate `k`.
    pub fn new(
        test_centers: &[Centers],
        test_points: &[WeightedPoint],
        train_centers: &[Centers],
    ) -> KMeansResult<Self> {
        if test_centers.len() != train_centers.len() {
            return Err(KMeansError::MismatchedCenters(format!(
                "{} test centers but {} train centers",
                test_centers.len(),
                train_centers.len()
            )));
        }
        for (test, train) in test_centers.iter().zip(train_centers) {
            if test.dimension() != train.dimension() {
                return Err(KMeansError::MismatchedCenters(format!(
                    "test centers have dimension {} but train centers have {}",
                    test.dimension(),
                    train.dimension()
                )));
            }
            if let Some(wp) = test_points.iter().find(|wp| wp.point().len() != test.dimension()) {
                return Err(KMeansError::DimensionMismatch {
                    expected: test.dimension(),
                    found: wp.point().len(),
                });
            }
        }

        let per_candidate: Vec<(f64, f64, f64)> = test_centers
            .par_iter()
            .zip(train_centers)
            .map(|(test, train)| {
                let strength = prediction_strength(&co_occurrence(test, train, test_points));
                let (train_cost, test_cost) = test_points.iter().fold((0.0, 0.0), |(tr, te), wp| {
                    (
                        tr + wp.weight() * train.distance_squared(wp.point()),
                        te + wp.weight() * test.distance_squared(wp.point()),
                    )
                });
                (strength, train_cost, test_cost)
            })
            .collect();

        let mut evaluation = KMeansEvaluation {
            prediction_strengths: Vec::with_capacity(per_candidate.len()),
            train_costs: Vec::with_capacity(per_candidate.len()),
            test_costs: Vec::with_capacity(per_candidate.len()),
        };
        for (strength, train_cost, test_cost) in per_candidate {
            evaluation.prediction_strengths.push(strength);
            evaluation.train_costs.push(train_cost);
            evaluation.test_costs.push(test_cost);
        }
        debug!("KMeansEvaluation: strengths {:?}", evaluation.prediction_strengths);
        Ok(evaluation)
    }

    pub fn prediction_strengths(&self) -> &[f64] {
        &self.prediction_strengths
    }

    pub fn train_costs(&self) -> &[f64] {
        &self.train_costs
    }

    pub fn test_costs(&self) -> &[f64] {
        &self.test_costs
    }

    /// Train costs divided by the first candidate's.
    pub fn normalized_train_costs(&self) -> Vec<f64> {
        normalize_to_first(&self.train_costs)
    }

    /// Test costs divided by the first candidate's.
    pub fn normalized_test_costs(&self) -> Vec<f64> {
        normalize_to_first(&self.test_costs)
    }
}

// a zero base leaves the costs as they are
fn normalize_to_first(costs: &[f64]) -> Vec<f64> {
    match costs.first() {
        Some(&base) if base > 0.0 => costs.iter().map(|c| c / base).collect(),
        _ => costs.to_vec(),
    }
}
