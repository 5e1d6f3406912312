//! In-memory k-means over a weighted sketch.
//!
//! Seeding ([`InitStrategy`]) followed by Lloyd's algorithm with pluggable
//! [`StoppingCriteria`]. Inputs here are small (the k-means|| sketch), so the
//! engine keeps everything in memory; the per-point assignment step is
//! parallelised with rayon while accumulation stays sequential so that results
//! do not depend on the thread count.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use log::{debug, trace, warn};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sketchmeans_core::{Centers, PointKey, Vector, WeightedPoint};

use crate::errors::{KMeansError, KMeansResult};

/// How the initial `Centers` are drawn from the weighted points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitStrategy {
    /// Draw points with probability proportional to weight until `k`
    /// distinct points are chosen.
    Random,
    /// k-means++ (Arthur and Vassilvitskii, 2007) with the D² score scaled by
    /// each point's weight.
    #[default]
    PlusPlus,
}

impl FromStr for InitStrategy {
    type Err = KMeansError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(InitStrategy::Random),
            "plus_plus" | "plusplus" | "kmeans++" | "k-means++" => Ok(InitStrategy::PlusPlus),
            other => Err(KMeansError::InvalidConfig(format!(
                "unsupported init strategy '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for InitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStrategy::Random => write!(f, "random"),
            InitStrategy::PlusPlus => write!(f, "plus_plus"),
        }
    }
}

impl InitStrategy {
    pub fn apply<R: Rng + ?Sized>(
        &self,
        points: &[WeightedPoint],
        num_clusters: usize,
        rng: &mut R,
    ) -> KMeansResult<Centers> {
        if num_clusters == 0 {
            return Err(KMeansError::InvalidConfig(
                "number of clusters must be greater than zero".to_string(),
            ));
        }
        let available = distinct_weighted(points);
        if available < num_clusters {
            return Err(KMeansError::InsufficientPoints {
                requested: num_clusters,
                available,
            });
        }

        match self {
            InitStrategy::Random => random_init(points, num_clusters, rng),
            InitStrategy::PlusPlus => plus_plus_init(points, num_clusters, rng),
        }
    }
}

fn distinct_weighted(points: &[WeightedPoint]) -> usize {
    points
        .iter()
        .filter(|wp| wp.weight() > 0.0)
        .map(|wp| wp.point().key())
        .collect::<HashSet<PointKey>>()
        .len()
}

/// `cumulative[j + 1] - cumulative[j]` is the mass of item `j`.
fn cumulative_sum<I: IntoIterator<Item = f64>>(masses: I, out: &mut Vec<f64>) {
    out.clear();
    out.push(0.0);
    let mut acc = 0.0;
    for m in masses {
        acc += m;
        out.push(acc);
    }
}

/// Item whose cumulative interval `[c_j, c_{j+1})` contains `offset`.
/// Zero-mass items have empty intervals and are never returned.
fn search_cumulative(cumulative: &[f64], offset: f64) -> usize {
    let n = cumulative.len() - 1;
    cumulative
        .partition_point(|&c| c <= offset)
        .saturating_sub(1)
        .min(n.saturating_sub(1))
}

fn random_init<R: Rng + ?Sized>(
    points: &[WeightedPoint],
    num_clusters: usize,
    rng: &mut R,
) -> KMeansResult<Centers> {
    let mut cumulative = Vec::with_capacity(points.len() + 1);
    cumulative_sum(points.iter().map(WeightedPoint::weight), &mut cumulative);
    let total = cumulative[points.len()];

    let mut seen: HashSet<PointKey> = HashSet::new();
    let mut chosen: Vec<Vector> = Vec::with_capacity(num_clusters);
    while chosen.len() < num_clusters {
        let offset = total * rng.random::<f64>();
        let idx = search_cumulative(&cumulative, offset);
        let p = points[idx].point();
        if seen.insert(p.key()) {
            trace!("random init: picked point {} ({} of {})", idx, chosen.len() + 1, num_clusters);
            chosen.push(p.clone());
        }
    }
    Ok(Centers::new(chosen)?)
}

fn plus_plus_init<R: Rng + ?Sized>(
    points: &[WeightedPoint],
    num_clusters: usize,
    rng: &mut R,
) -> KMeansResult<Centers> {
    let mut centers = random_init(points, 1, rng)?;
    let mut min_dist: Vec<f64> = points
        .par_iter()
        .map(|wp| centers.distance_squared(wp.point()))
        .collect();
    let mut cumulative = Vec::with_capacity(points.len() + 1);

    for _ in 1..num_clusters {
        cumulative_sum(
            min_dist.iter().zip(points).map(|(d, wp)| d * wp.weight()),
            &mut cumulative,
        );
        let total = cumulative[points.len()];
        let offset = total * rng.random::<f64>();
        let drawn = search_cumulative(&cumulative, offset);
        let idx = unchosen_near(points, &centers, drawn).ok_or(KMeansError::InsufficientPoints {
            requested: num_clusters,
            available: centers.len(),
        })?;

        let next = points[idx].point().clone();
        min_dist
            .par_iter_mut()
            .zip(points)
            .for_each(|(d, wp)| *d = d.min(next.distance_squared(wp.point())));
        centers = centers.extend_with(next)?;
    }
    Ok(centers)
}

/// `drawn` itself when it is not a center yet, otherwise the nearest
/// positive-weight point below it, then above it, that is not.
fn unchosen_near(points: &[WeightedPoint], centers: &Centers, drawn: usize) -> Option<usize> {
    let usable = |i: usize| points[i].weight() > 0.0 && !centers.contains(points[i].point());
    if usable(drawn) {
        return Some(drawn);
    }
    (0..drawn)
        .rev()
        .find(|&i| usable(i))
        .or_else(|| (drawn + 1..points.len()).find(|&i| usable(i)))
}

/// When Lloyd's algorithm stops. Variants are composed with [`StoppingCriteria::or`];
/// build them through the validating constructors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StoppingCriteria {
    /// Stop once the summed squared movement of the centers drops below the threshold.
    Threshold(f64),
    /// Stop once this many update iterations have run.
    MaxIterations(usize),
    /// Stop as soon as any of the criteria, checked in order, says so.
    Or(Vec<StoppingCriteria>),
}

impl StoppingCriteria {
    pub fn threshold(threshold: f64) -> KMeansResult<Self> {
        let c = StoppingCriteria::Threshold(threshold);
        c.validate()?;
        Ok(c)
    }

    pub fn max_iterations(max_iterations: usize) -> KMeansResult<Self> {
        let c = StoppingCriteria::MaxIterations(max_iterations);
        c.validate()?;
        Ok(c)
    }

    pub fn or(criteria: Vec<StoppingCriteria>) -> KMeansResult<Self> {
        let c = StoppingCriteria::Or(criteria);
        c.validate()?;
        Ok(c)
    }

    pub fn validate(&self) -> KMeansResult<()> {
        match self {
            StoppingCriteria::Threshold(t) if !(t.is_finite() && *t > 0.0) => Err(
                KMeansError::InvalidConfig(format!("stopping threshold must be > 0, got {}", t)),
            ),
            StoppingCriteria::MaxIterations(0) => Err(KMeansError::InvalidConfig(
                "max iterations must be > 0".to_string(),
            )),
            StoppingCriteria::Or(criteria) if criteria.is_empty() => Err(
                KMeansError::InvalidConfig("no stopping criteria given".to_string()),
            ),
            StoppingCriteria::Or(criteria) => criteria.iter().try_for_each(|c| c.validate()),
            _ => Ok(()),
        }
    }

    /// `last` is `None` before the first update.
    pub fn should_stop(&self, iteration: usize, current: &Centers, last: Option<&Centers>) -> bool {
        match self {
            StoppingCriteria::Threshold(threshold) => match last {
                None => false,
                // sizes differ only when two centers collapsed into one
                Some(last) => last
                    .sum_of_squared_distances(current)
                    .map(|moved| moved < *threshold)
                    .unwrap_or(false),
            },
            StoppingCriteria::MaxIterations(max) => iteration >= *max,
            StoppingCriteria::Or(criteria) => criteria
                .iter()
                .any(|c| c.should_stop(iteration, current, last)),
        }
    }
}

impl Default for StoppingCriteria {
    fn default() -> Self {
        StoppingCriteria::Or(vec![
            StoppingCriteria::Threshold(1e-4),
            StoppingCriteria::MaxIterations(100),
        ])
    }
}

/// Seeding plus Lloyd refinement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KMeans {
    init_strategy: InitStrategy,
    stopping_criteria: StoppingCriteria,
}

impl KMeans {
    pub fn new(init_strategy: InitStrategy, stopping_criteria: StoppingCriteria) -> KMeansResult<Self> {
        stopping_criteria.validate()?;
        Ok(Self {
            init_strategy,
            stopping_criteria,
        })
    }

    pub fn init_strategy(&self) -> InitStrategy {
        self.init_strategy
    }

    pub fn stopping_criteria(&self) -> &StoppingCriteria {
        &self.stopping_criteria
    }

    /// Seed `num_clusters` centers from `points`, then run Lloyd's algorithm.
    pub fn compute<R: Rng + ?Sized>(
        &self,
        points: &[WeightedPoint],
        num_clusters: usize,
        rng: &mut R,
    ) -> KMeansResult<Centers> {
        let initial = self.init_strategy.apply(points, num_clusters, rng)?;
        debug!(
            "KMeans: seeded {} centers with {} from {} weighted points",
            initial.len(),
            self.init_strategy,
            points.len()
        );
        self.lloyds_algorithm(points, initial)
    }

    pub fn lloyds_algorithm(&self, points: &[WeightedPoint], centers: Centers) -> KMeansResult<Centers> {
        let mut current = centers;
        let mut last: Option<Centers> = None;
        let mut iteration = 0;

        while !self
            .stopping_criteria
            .should_stop(iteration, &current, last.as_ref())
        {
            let next = self.update_centers(points, &current)?;
            last = Some(std::mem::replace(&mut current, next));
            iteration += 1;
            trace!(
                "Lloyd iteration {}: cost={:.6}",
                iteration,
                weighted_cost(points, &current)
            );
        }
        debug!(
            "Lloyd's algorithm stopped after {} iterations with {} centers",
            iteration,
            current.len()
        );
        Ok(current)
    }

    /// One assign-then-recompute step. A center that attracts no weight keeps
    /// its previous position.
    pub fn update_centers(&self, points: &[WeightedPoint], centers: &Centers) -> KMeansResult<Centers> {
        let assignments: Vec<usize> = points
            .par_iter()
            .map(|wp| centers.index_of_closest(wp.point()))
            .collect();

        let mut members: Vec<Vec<&WeightedPoint>> = vec![Vec::new(); centers.len()];
        for (wp, &c) in points.iter().zip(&assignments) {
            members[c].push(wp);
        }

        let updated: Vec<Vector> = members
            .into_iter()
            .zip(centers.iter())
            .enumerate()
            .map(|(i, (assigned, previous))| {
                centroid(assigned).unwrap_or_else(|| {
                    warn!("Lloyd update: center {} has no weighted points, keeping it", i);
                    previous.clone()
                })
            })
            .collect();

        Ok(Centers::new(updated)?)
    }
}

/// Weight-normalised centroid, `None` when the total weight is zero.
pub fn centroid<'a, I>(points: I) -> Option<Vector>
where
    I: IntoIterator<Item = &'a WeightedPoint>,
{
    let mut iter = points.into_iter().peekable();
    let dim = iter.peek()?.point().len();

    let mut sum = vec![0.0; dim];
    let mut total = 0.0;
    for wp in iter {
        wp.point().add_scaled_to(&mut sum, wp.weight());
        total += wp.weight();
    }
    if total > 0.0 {
        Some(Vector::dense(sum.into_iter().map(|s| s / total).collect()))
    } else {
        None
    }
}

/// Σ weight · (squared distance to the nearest center).
pub fn weighted_cost(points: &[WeightedPoint], centers: &Centers) -> f64 {
    points
        .par_iter()
        .map(|wp| wp.weight() * centers.distance_squared(wp.point()))
        .sum()
}
