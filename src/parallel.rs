//! k-means|| (scalable k-means++) over a partitioned dataset.
//!
//! Bahmani et al., "Scalable K-Means++" (VLDB 2012). Each round scores every
//! point by its squared distance to the points its fold already tracks, draws
//! `L` new points per fold with the A-Res sampler and adds them to the
//! [`CenterIndex`]. A final pass counts how many points are closest to each
//! tracked point; those counts become the weights of the sketch.
//!
//! Every pass reads an immutable snapshot of the index; the index only changes
//! between rounds.

use std::collections::HashMap;

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use sketchmeans_core::{Centers, Vector, WeightedPoint};

use crate::center_index::{CenterIndex, Distances};
use crate::crossfold::Crossfold;
use crate::dataset::PartitionedDataset;
use crate::errors::{KMeansError, KMeansResult};
use crate::random::derive_seed;
use crate::sampling::{ReservoirSampler, sample};

const RECOMMENDED_MIN_ROUNDS: usize = 5;
const COUNT_FLUSH_THRESHOLD: usize = 10_000;

/// Nearest center of one input point for one candidate `Centers`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub vector_id: Option<String>,
    pub group_id: usize,
    pub closest_center_id: usize,
    pub distance: f64,
}

/// Per-group running cost of one partition.
#[derive(Clone, Debug)]
struct CostAccumulator {
    totals: Vec<f64>,
}

impl CostAccumulator {
    fn new(num_groups: usize) -> Self {
        Self {
            totals: vec![0.0; num_groups],
        }
    }

    fn add(&mut self, distances: &Distances) {
        for (t, d) in self.totals.iter_mut().zip(&distances.cluster_distances) {
            *t += d;
        }
    }

    fn flush(self) -> Vec<f64> {
        self.totals
    }
}

/// Per-partition closest-point counts, keyed by `(group, slot)`.
///
/// Pending counts are emitted once `threshold` distinct keys accumulate and
/// again by `flush` at the end of the partition.
#[derive(Debug)]
struct ClosestCounter {
    threshold: usize,
    pending: HashMap<(usize, usize), u64>,
    emitted: Vec<((usize, usize), u64)>,
}

impl ClosestCounter {
    fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            pending: HashMap::new(),
            emitted: Vec::new(),
        }
    }

    fn add(&mut self, group: usize, slot: usize) {
        *self.pending.entry((group, slot)).or_insert(0) += 1;
        if self.pending.len() >= self.threshold {
            self.emit_pending();
        }
    }

    fn emit_pending(&mut self) {
        self.emitted.extend(self.pending.drain());
    }

    fn flush(mut self) -> Vec<((usize, usize), u64)> {
        self.emit_pending();
        self.emitted
    }
}

/// Fails the pass when any point's size differs from `expected`.
fn check_dimension<T, F>(dataset: &PartitionedDataset<T>, expected: usize, point: F) -> KMeansResult<()>
where
    T: Sync,
    F: Fn(&T) -> &Vector + Sync + Send,
{
    dataset.try_aggregate(
        |_, part| match part.iter().map(&point).find(|p| p.len() != expected) {
            Some(p) => Err(KMeansError::DimensionMismatch {
                expected,
                found: p.len(),
            }),
            None => Ok(()),
        },
        |_, _| (),
    )?;
    Ok(())
}

/// Combine keyed counts into `counts[group][slot]`.
fn collect_counts(
    emitted: PartitionedDataset<((usize, usize), u64)>,
    points_per_group: &[usize],
) -> Vec<Vec<u64>> {
    let mut counts: Vec<Vec<u64>> = points_per_group.iter().map(|&n| vec![0; n]).collect();
    for ((group, slot), n) in emitted.combine_values(|a, b| a + b) {
        if let Some(c) = counts.get_mut(group).and_then(|g| g.get_mut(slot)) {
            *c += n;
        }
    }
    counts
}

/// Drives k-means|| initialization and the full-data passes that evaluate
/// candidate `Centers`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KMeansParallel {
    seed: u64,
}

impl KMeansParallel {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Build one weighted sketch per fold.
    ///
    /// Every fold starts from `initial_points` and runs `num_iterations`
    /// rounds drawing `samples_per_iteration` points each. Points already
    /// tracked by their fold (distance 0) are never drawn again. Empty folds
    /// yield sketches holding only the initial points, each with weight 0.
    pub fn initialization(
        &self,
        points: &PartitionedDataset<Vector>,
        num_iterations: usize,
        samples_per_iteration: usize,
        initial_points: &[Vector],
        crossfold: &Crossfold,
    ) -> KMeansResult<Vec<Vec<WeightedPoint>>> {
        if samples_per_iteration == 0 {
            return Err(KMeansError::InvalidConfig(
                "samples per iteration must be greater than zero".to_string(),
            ));
        }
        let first = initial_points.first().ok_or_else(|| {
            KMeansError::InvalidConfig("at least one initial point is required".to_string())
        })?;
        if num_iterations < RECOMMENDED_MIN_ROUNDS {
            warn!(
                "k-means|| with {} rounds; at least {} are recommended",
                num_iterations, RECOMMENDED_MIN_ROUNDS
            );
        }
        check_dimension(points, first.len(), |p| p)?;

        let num_folds = crossfold.num_folds();
        let folded = crossfold.apply(points);

        let mut index = CenterIndex::new(num_folds);
        for p in initial_points {
            index.add(p, 0..num_folds)?;
        }
        info!(
            "k-means|| start: {} points, {} folds, {} rounds x {} samples",
            points.len(),
            num_folds,
            num_iterations,
            samples_per_iteration
        );

        for round in 0..num_iterations {
            let sampler = ReservoirSampler::new(
                vec![samples_per_iteration; num_folds],
                derive_seed(self.seed, round as u64),
            );
            let snapshot = &index;
            let sampled = sampler.grouped_sample(
                &folded,
                |(fold, p)| {
                    let dist = snapshot.distances(p).distance(*fold);
                    if dist > 0.0 { Some((*fold, dist)) } else { None }
                },
                |(_, p)| p.clone(),
            );

            for (fold, fold_points) in sampled.iter().enumerate() {
                for p in fold_points {
                    index.add(p, [fold])?;
                }
            }
            debug!(
                "k-means|| round {}: sampled {:?}, tracking {:?} ({} distinct)",
                round,
                sampled.iter().map(Vec::len).collect::<Vec<_>>(),
                index.points_per_group(),
                index.num_distinct_points()
            );
        }

        let emitted = folded.map_partitions(|partition, part| {
            let mut counter = ClosestCounter::new(COUNT_FLUSH_THRESHOLD);
            for (fold, p) in part {
                counter.add(*fold, index.distances(p).closest(*fold));
            }
            trace!("k-means|| counts: partition {} done", partition);
            counter.flush()
        });
        let counts = collect_counts(emitted, index.points_per_group());
        let sketches = index.weighted_points(&counts)?;

        info!(
            "k-means|| done: sketch sizes {:?}",
            sketches.iter().map(Vec::len).collect::<Vec<_>>()
        );
        Ok(sketches)
    }

    /// `initialization` without folds: a single sketch of the whole dataset.
    pub fn initialization_single(
        &self,
        points: &PartitionedDataset<Vector>,
        num_iterations: usize,
        samples_per_iteration: usize,
        initial_points: &[Vector],
    ) -> KMeansResult<Vec<WeightedPoint>> {
        let mut sketches = self.initialization(
            points,
            num_iterations,
            samples_per_iteration,
            initial_points,
            &Crossfold::single(),
        )?;
        Ok(sketches.pop().unwrap_or_default())
    }

    /// One point drawn uniformly from the dataset, for seeding when the
    /// caller has no initial point.
    pub fn choose_initial_point(&self, points: &PartitionedDataset<Vector>) -> KMeansResult<Vector> {
        sample(points, 1, self.seed)
            .pop()
            .ok_or(KMeansError::InsufficientPoints {
                requested: 1,
                available: 0,
            })
    }

    /// Σ squared distance to the nearest center, one value per `Centers`.
    pub fn costs(&self, points: &PartitionedDataset<Vector>, centers: &[Centers]) -> KMeansResult<Vec<f64>> {
        let index = CenterIndex::from_centers(centers)?;
        let expected = centers[0].dimension();
        let num_groups = centers.len();

        let totals = points.try_aggregate(
            |_, part| {
                let mut acc = CostAccumulator::new(num_groups);
                for p in part {
                    if p.len() != expected {
                        return Err(KMeansError::DimensionMismatch {
                            expected,
                            found: p.len(),
                        });
                    }
                    acc.add(&index.distances(p));
                }
                Ok(acc.flush())
            },
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
                a
            },
        )?;
        Ok(totals.unwrap_or_else(|| vec![0.0; num_groups]))
    }

    /// Nearest center of every point for every `Centers`, keeping the input
    /// partitioning. Each point yields one record per `Centers`.
    pub fn assignments(
        &self,
        points: &PartitionedDataset<Vector>,
        centers: &[Centers],
    ) -> KMeansResult<PartitionedDataset<Assignment>> {
        let index = CenterIndex::from_centers(centers)?;
        check_dimension(points, centers[0].dimension(), |p| p)?;

        Ok(points.map_partitions(|_, part| {
            part.iter()
                .flat_map(|p| {
                    let d = index.distances(p);
                    (0..d.len())
                        .map(|group| Assignment {
                            vector_id: p.id().map(str::to_string),
                            group_id: group,
                            closest_center_id: d.closest(group),
                            distance: d.distance(group),
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        }))
    }

    /// `counts[i][j]`: how many points have center `j` of `centers[i]` as
    /// their nearest.
    pub fn counts_of_closest(
        &self,
        points: &PartitionedDataset<Vector>,
        centers: &[Centers],
    ) -> KMeansResult<Vec<Vec<u64>>> {
        let index = CenterIndex::from_centers(centers)?;
        check_dimension(points, centers[0].dimension(), |p| p)?;

        let emitted = points.map_partitions(|_, part| {
            let mut counter = ClosestCounter::new(COUNT_FLUSH_THRESHOLD);
            for p in part {
                let d = index.distances(p);
                for group in 0..d.len() {
                    counter.add(group, d.closest(group));
                }
            }
            counter.flush()
        });
        Ok(collect_counts(emitted, index.points_per_group()))
    }
}
