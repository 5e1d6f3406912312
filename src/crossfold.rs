//! Random fold assignment.
//!
//! Tags every item with a fold id in `[0, num_folds)` so that independent
//! sketches can be built from disjoint subsets of one dataset (for example a
//! train and a test sketch for prediction strength). Each partition draws from
//! its own stream derived from the seed and the partition index: the same seed
//! on the same partitioning gives the same folds, but repartitioning the data
//! changes the assignment.

use log::{debug, warn};
use rand::Rng;

use crate::dataset::PartitionedDataset;
use crate::errors::{KMeansError, KMeansResult};
use crate::random::partition_rng;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Crossfold {
    num_folds: usize,
    seed: u64,
}

impl Crossfold {
    pub fn new(num_folds: usize, seed: u64) -> KMeansResult<Self> {
        if num_folds == 0 {
            return Err(KMeansError::InvalidConfig(
                "number of folds must be greater than zero".to_string(),
            ));
        }
        Ok(Self { num_folds, seed })
    }

    /// Every item lands in fold 0.
    pub fn single() -> Self {
        Self {
            num_folds: 1,
            seed: 0,
        }
    }

    pub fn num_folds(&self) -> usize {
        self.num_folds
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn apply<T>(&self, items: &PartitionedDataset<T>) -> PartitionedDataset<(usize, T)>
    where
        T: Clone + Send + Sync,
    {
        let num_folds = self.num_folds;
        let seed = self.seed;

        let folded = items.map_partitions(|partition, part| {
            if num_folds == 1 {
                return part.iter().map(|t| (0, t.clone())).collect();
            }
            let mut rng = partition_rng(seed, partition);
            part.iter()
                .map(|t| (rng.random_range(0..num_folds), t.clone()))
                .collect()
        });

        if log::log_enabled!(log::Level::Debug) {
            let sizes = self.fold_sizes(&folded);
            debug!("Crossfold: {} folds, sizes {:?}", num_folds, sizes);
            if sizes.iter().any(|&s| s == 0) {
                warn!("Crossfold produced at least one empty fold: {:?}", sizes);
            }
        }
        folded
    }

    pub fn fold_sizes<T: Sync>(&self, folded: &PartitionedDataset<(usize, T)>) -> Vec<usize> {
        let num_folds = self.num_folds;
        folded
            .aggregate(
                |_, part| {
                    let mut counts = vec![0usize; num_folds];
                    for (fold, _) in part {
                        if let Some(c) = counts.get_mut(*fold) {
                            *c += 1;
                        }
                    }
                    counts
                },
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x += y;
                    }
                    a
                },
            )
            .unwrap_or_else(|| vec![0; num_folds])
    }
}
