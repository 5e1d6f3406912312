//! Pipeline configuration and the end-to-end clustering run.
//!
//! `KMeansBuilder` collects the k-means|| and Lloyd parameters, validates them
//! and runs: sketch (one per fold) → in-memory k-means per candidate `k` on
//! the union of the fold sketches → full-data costs → prediction strength when
//! at least two folds are configured.

use std::collections::HashMap;
use std::fmt;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sketchmeans_core::{Centers, Vector, WeightedPoint};

use crate::crossfold::Crossfold;
use crate::dataset::PartitionedDataset;
use crate::errors::{KMeansError, KMeansResult};
use crate::evaluation::KMeansEvaluation;
use crate::kmeans::{InitStrategy, KMeans, StoppingCriteria};
use crate::parallel::KMeansParallel;
use crate::random::{derive_seed, seeded_rng};

pub const DEFAULT_NUM_ITERATIONS: usize = 5;
pub const DEFAULT_SCALE_FACTOR: usize = 2;
pub const DEFAULT_MAX_LLOYD_ITERATIONS: usize = 100;
pub const DEFAULT_STOPPING_THRESHOLD: f64 = 1e-4;

// stage numbers for seeds derived from the run seed
const CROSSFOLD_STAGE: u64 = 1 << 32;
const KMEANS_STAGE: u64 = 1 << 33;
const EVALUATION_STAGE: u64 = 1 << 34;

#[derive(Clone, Debug, PartialEq)]
pub struct KMeansBuilder {
    clusters: Vec<usize>,
    num_iterations: usize,
    samples_per_iteration: Option<usize>,
    scale_factor: usize,
    cross_folds: usize,
    init_strategy: InitStrategy,
    max_lloyd_iterations: usize,
    stopping_threshold: f64,
    seed: Option<u64>,
    initial_points: Option<Vec<Vector>>,
}

impl Default for KMeansBuilder {
    fn default() -> Self {
        Self {
            clusters: Vec::new(),
            num_iterations: DEFAULT_NUM_ITERATIONS,
            samples_per_iteration: None,
            scale_factor: DEFAULT_SCALE_FACTOR,
            cross_folds: 1,
            init_strategy: InitStrategy::default(),
            max_lloyd_iterations: DEFAULT_MAX_LLOYD_ITERATIONS,
            stopping_threshold: DEFAULT_STOPPING_THRESHOLD,
            seed: None,
            initial_points: None,
        }
    }
}

impl KMeansBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidate cluster counts, clustered and reported in this order.
    pub fn with_clusters(mut self, clusters: Vec<usize>) -> Self {
        self.clusters = clusters;
        self
    }

    /// Number of k-means|| rounds.
    pub fn with_num_iterations(mut self, num_iterations: usize) -> Self {
        self.num_iterations = num_iterations;
        self
    }

    /// Points drawn per fold in each round. Defaults to
    /// `max(clusters) * scale_factor`.
    pub fn with_samples_per_iteration(mut self, samples: usize) -> Self {
        self.samples_per_iteration = Some(samples);
        self
    }

    pub fn with_scale_factor(mut self, scale_factor: usize) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    /// With two or more folds, fold 0 is the test fold and fold 1 the train
    /// fold for prediction strength.
    pub fn with_cross_folds(mut self, cross_folds: usize) -> Self {
        self.cross_folds = cross_folds;
        self
    }

    pub fn with_init_strategy(mut self, init_strategy: InitStrategy) -> Self {
        self.init_strategy = init_strategy;
        self
    }

    pub fn with_max_lloyd_iterations(mut self, max_iterations: usize) -> Self {
        self.max_lloyd_iterations = max_iterations;
        self
    }

    pub fn with_stopping_threshold(mut self, threshold: f64) -> Self {
        self.stopping_threshold = threshold;
        self
    }

    /// Seed for every randomized stage of the run.
    pub fn with_seed(mut self, seed: u64) -> Self {
        info!("Setting k-means seed: {}", seed);
        self.seed = Some(seed);
        self
    }

    /// Starting points shared by every fold. When unset, one point is drawn
    /// uniformly from the dataset.
    pub fn with_initial_points(mut self, points: Vec<Vector>) -> Self {
        self.initial_points = Some(points);
        self
    }

    pub fn clusters(&self) -> &[usize] {
        &self.clusters
    }

    pub fn cross_folds(&self) -> usize {
        self.cross_folds
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn samples_per_iteration(&self) -> usize {
        self.samples_per_iteration.unwrap_or_else(|| {
            self.clusters.iter().copied().max().unwrap_or(0) * self.scale_factor
        })
    }

    pub fn stopping_criteria(&self) -> KMeansResult<StoppingCriteria> {
        StoppingCriteria::or(vec![
            StoppingCriteria::threshold(self.stopping_threshold)?,
            StoppingCriteria::max_iterations(self.max_lloyd_iterations)?,
        ])
    }

    pub fn validate(&self) -> KMeansResult<()> {
        if self.clusters.is_empty() {
            return Err(KMeansError::InvalidConfig(
                "at least one cluster count is required".to_string(),
            ));
        }
        if self.clusters.contains(&0) {
            return Err(KMeansError::InvalidConfig(
                "cluster counts must be greater than zero".to_string(),
            ));
        }
        if self.num_iterations == 0 {
            return Err(KMeansError::InvalidConfig(
                "k-means|| needs at least one round".to_string(),
            ));
        }
        if self.samples_per_iteration() == 0 {
            return Err(KMeansError::InvalidConfig(
                "samples per iteration must be greater than zero".to_string(),
            ));
        }
        if self.cross_folds == 0 {
            return Err(KMeansError::InvalidConfig(
                "number of folds must be greater than zero".to_string(),
            ));
        }
        if self.seed.is_none() {
            return Err(KMeansError::InvalidConfig(
                "a seed is required for reproducible runs".to_string(),
            ));
        }
        if let Some(points) = &self.initial_points {
            let first = points.first().ok_or_else(|| {
                KMeansError::InvalidConfig("initial points list is empty".to_string())
            })?;
            if let Some(p) = points.iter().find(|p| p.len() != first.len()) {
                return Err(KMeansError::DimensionMismatch {
                    expected: first.len(),
                    found: p.len(),
                });
            }
        }
        self.stopping_criteria()?;
        Ok(())
    }

    /// Validate, then run the whole pipeline over `points`.
    pub fn run(&self, points: &PartitionedDataset<Vector>) -> KMeansResult<ClusteringOutput> {
        self.validate()?;
        let seed = self.seed.unwrap_or_default();
        let start = std::time::Instant::now();

        let parallel = KMeansParallel::new(seed);
        let initial_points = match &self.initial_points {
            Some(points) => points.clone(),
            None => vec![parallel.choose_initial_point(points)?],
        };
        let crossfold = Crossfold::new(self.cross_folds, derive_seed(seed, CROSSFOLD_STAGE))?;
        info!(
            "KMeansBuilder: clustering {} points into {:?} clusters with {} folds",
            points.len(),
            self.clusters,
            self.cross_folds
        );

        let sketches = parallel.initialization(
            points,
            self.num_iterations,
            self.samples_per_iteration(),
            &initial_points,
            &crossfold,
        )?;

        let kmeans = KMeans::new(self.init_strategy, self.stopping_criteria()?)?;
        let all_points: Vec<WeightedPoint> = sketches.iter().flatten().cloned().collect();
        let centers = self.fit_all(&kmeans, &all_points, KMEANS_STAGE)?;
        let costs = parallel.costs(points, &centers)?;
        for (k, cost) in self.clusters.iter().zip(&costs) {
            info!("k={}: cost {:.6}", k, cost);
        }

        let evaluation = if sketches.len() >= 2 {
            self.evaluate(&kmeans, &sketches[0], &sketches[1])?
        } else {
            None
        };

        debug!("KMeansBuilder: run finished in {:?}", start.elapsed());
        Ok(ClusteringOutput {
            clusters: self.clusters.clone(),
            sketches,
            centers,
            costs,
            evaluation,
        })
    }

    fn fit_all(&self, kmeans: &KMeans, points: &[WeightedPoint], stage: u64) -> KMeansResult<Vec<Centers>> {
        let seed = self.seed.unwrap_or_default();
        self.clusters
            .iter()
            .enumerate()
            .map(|(i, &k)| {
                let mut rng = seeded_rng(derive_seed(seed, stage + i as u64));
                kmeans.compute(points, k, &mut rng)
            })
            .collect()
    }

    /// Prediction strength of test centers against train centers. Skipped with
    /// a warning when a fold sketch is too small for some `k`.
    fn evaluate(
        &self,
        kmeans: &KMeans,
        test: &[WeightedPoint],
        train: &[WeightedPoint],
    ) -> KMeansResult<Option<KMeansEvaluation>> {
        let fitted = self
            .fit_all(kmeans, test, EVALUATION_STAGE)
            .and_then(|t| Ok((t, self.fit_all(kmeans, train, EVALUATION_STAGE)?)));
        match fitted {
            Ok((test_centers, train_centers)) => {
                let evaluation = KMeansEvaluation::new(&test_centers, test, &train_centers)?;
                for (k, strength) in self.clusters.iter().zip(evaluation.prediction_strengths()) {
                    info!("k={}: prediction strength {:.4}", k, strength);
                }
                Ok(Some(evaluation))
            }
            Err(KMeansError::InsufficientPoints { requested, available }) => {
                warn!(
                    "skipping prediction strength: a fold sketch has {} distinct points, {} clusters requested",
                    available, requested
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Typed snapshot of the configuration, stored alongside persisted results.
    pub fn builder_config_typed(&self) -> HashMap<String, ConfigValue> {
        let mut config = HashMap::new();

        config.insert(
            "clusters".to_string(),
            ConfigValue::UsizeList(self.clusters.clone()),
        );
        config.insert(
            "num_iterations".to_string(),
            ConfigValue::Usize(self.num_iterations),
        );
        config.insert(
            "samples_per_iteration".to_string(),
            ConfigValue::OptionUsize(self.samples_per_iteration),
        );
        config.insert(
            "scale_factor".to_string(),
            ConfigValue::Usize(self.scale_factor),
        );
        config.insert("cross_folds".to_string(), ConfigValue::Usize(self.cross_folds));
        config.insert(
            "init_strategy".to_string(),
            ConfigValue::InitStrategy(self.init_strategy),
        );
        config.insert(
            "max_lloyd_iterations".to_string(),
            ConfigValue::Usize(self.max_lloyd_iterations),
        );
        config.insert(
            "stopping_threshold".to_string(),
            ConfigValue::F64(self.stopping_threshold),
        );
        config.insert("seed".to_string(), ConfigValue::OptionU64(self.seed));
        config.insert(
            "initial_points".to_string(),
            ConfigValue::OptionUsize(self.initial_points.as_ref().map(Vec::len)),
        );

        config
    }
}

/// Everything a pipeline run produces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusteringOutput {
    /// Candidate cluster counts, in run order.
    pub clusters: Vec<usize>,
    /// Weighted sketch of each fold.
    pub sketches: Vec<Vec<WeightedPoint>>,
    /// Final centers per candidate.
    pub centers: Vec<Centers>,
    /// Full-data cost per candidate.
    pub costs: Vec<f64>,
    /// Present when at least two folds were sketched.
    pub evaluation: Option<KMeansEvaluation>,
}

impl ClusteringOutput {
    pub fn centers_for(&self, k: usize) -> Option<&Centers> {
        self.clusters
            .iter()
            .position(|&c| c == k)
            .and_then(|i| self.centers.get(i))
    }
}

/// Configuration value that keeps its type through persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigValue {
    Usize(usize),
    F64(f64),
    UsizeList(Vec<usize>),
    OptionUsize(Option<usize>),
    OptionU64(Option<u64>),
    InitStrategy(InitStrategy),
}

impl ConfigValue {
    pub fn as_usize(&self) -> Option<usize> {
        match self {
            ConfigValue::Usize(v) => Some(*v),
            ConfigValue::OptionUsize(v) => *v,
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ConfigValue::OptionU64(v) => *v,
            _ => None,
        }
    }

    pub fn as_usize_list(&self) -> Option<&[usize]> {
        match self {
            ConfigValue::UsizeList(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_init_strategy(&self) -> Option<InitStrategy> {
        match self {
            ConfigValue::InitStrategy(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Usize(v) => write!(f, "{}", v),
            ConfigValue::F64(v) => write!(f, "{}", v),
            ConfigValue::UsizeList(v) => write!(f, "{:?}", v),

            ConfigValue::OptionUsize(opt) => match opt {
                Some(v) => write!(f, "{}", v),
                None => write!(f, "None"),
            },
            ConfigValue::OptionU64(opt) => match opt {
                Some(v) => write!(f, "{}", v),
                None => write!(f, "None"),
            },

            ConfigValue::InitStrategy(s) => write!(f, "{}", s),
        }
    }
}
