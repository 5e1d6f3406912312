use log::debug;
use serial_test::serial;
use sketchmeans_core::{Vector, WeightedPoint};

use crate::builder::{ConfigValue, KMeansBuilder};
use crate::dataset::PartitionedDataset;
use crate::errors::KMeansError;
use crate::kmeans::InitStrategy;
use crate::tests::init;
use crate::tests::test_data::{sixteen_points_dataset, three_blobs, vec2};

fn invalid(builder: KMeansBuilder) -> bool {
    matches!(builder.validate(), Err(KMeansError::InvalidConfig(_)))
}

#[test]
fn test_defaults() {
    init();
    let b = KMeansBuilder::new().with_clusters(vec![2, 5]).with_seed(1);
    assert!(b.validate().is_ok());
    assert_eq!(b.samples_per_iteration(), 10);
    assert_eq!(b.cross_folds(), 1);

    let config = b.builder_config_typed();
    assert_eq!(config["num_iterations"].as_usize(), Some(5));
    assert_eq!(config["scale_factor"].as_usize(), Some(2));
    assert_eq!(config["max_lloyd_iterations"].as_usize(), Some(100));
    assert_eq!(config["stopping_threshold"].as_f64(), Some(1e-4));
    assert_eq!(
        config["init_strategy"].as_init_strategy(),
        Some(InitStrategy::PlusPlus)
    );
    assert_eq!(config["seed"].as_u64(), Some(1));
    assert_eq!(config["clusters"].as_usize_list(), Some(&[2usize, 5][..]));
    assert_eq!(config["samples_per_iteration"], ConfigValue::OptionUsize(None));
}

#[test]
fn test_config_snapshot_uses_every_value_kind() {
    init();
    let config = KMeansBuilder::new()
        .with_clusters(vec![2])
        .with_seed(9)
        .builder_config_typed();

    let mut seen = [false; 6];
    for value in config.values() {
        let slot = match value {
            ConfigValue::Usize(_) => 0,
            ConfigValue::F64(_) => 1,
            ConfigValue::UsizeList(_) => 2,
            ConfigValue::OptionUsize(_) => 3,
            ConfigValue::OptionU64(_) => 4,
            ConfigValue::InitStrategy(_) => 5,
        };
        seen[slot] = true;
    }
    assert_eq!(seen, [true; 6]);
    assert_eq!(config.len(), 10);
}

#[test]
fn test_explicit_samples_override_scale_factor() {
    init();
    let b = KMeansBuilder::new()
        .with_clusters(vec![3])
        .with_scale_factor(4)
        .with_seed(0);
    assert_eq!(b.samples_per_iteration(), 12);
    assert_eq!(b.with_samples_per_iteration(7).samples_per_iteration(), 7);
}

#[test]
fn test_validation_errors() {
    init();
    let ok = KMeansBuilder::new().with_clusters(vec![2]).with_seed(3);
    assert!(ok.validate().is_ok());

    assert!(invalid(ok.clone().with_clusters(Vec::new())));
    assert!(invalid(ok.clone().with_clusters(vec![2, 0])));
    assert!(invalid(ok.clone().with_num_iterations(0)));
    assert!(invalid(ok.clone().with_samples_per_iteration(0)));
    assert!(invalid(ok.clone().with_scale_factor(0)));
    assert!(invalid(ok.clone().with_cross_folds(0)));
    assert!(invalid(ok.clone().with_stopping_threshold(0.0)));
    assert!(invalid(ok.clone().with_stopping_threshold(-1e-3)));
    assert!(invalid(ok.clone().with_max_lloyd_iterations(0)));
    assert!(invalid(ok.clone().with_initial_points(Vec::new())));
    assert!(invalid(KMeansBuilder::new().with_clusters(vec![2])));
    assert!(matches!(
        ok.with_initial_points(vec![vec2(0.0, 0.0), Vector::dense(vec![1.0])])
            .validate(),
        Err(KMeansError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_run_validates_first() {
    init();
    let points = sixteen_points_dataset(2);
    assert!(KMeansBuilder::new().with_clusters(vec![2]).run(&points).is_err());
}

#[test]
fn test_run_sixteen_points() {
    init();
    let points = sixteen_points_dataset(2);
    let output = KMeansBuilder::new()
        .with_clusters(vec![1, 2])
        .with_samples_per_iteration(4)
        .with_initial_points(vec![vec2(1.0, 1.0)])
        .with_seed(29)
        .run(&points)
        .unwrap();

    assert_eq!(output.clusters, vec![1, 2]);
    assert_eq!(output.sketches.len(), 1);
    assert_eq!(output.centers.len(), 2);
    assert_eq!(output.costs, vec![67.0, 6.0]);
    assert!(output.evaluation.is_none());
    assert_eq!(output.centers_for(2).map(|c| c.len()), Some(2));
    assert!(output.centers_for(7).is_none());

    let weight: f64 = output.sketches[0].iter().map(WeightedPoint::weight).sum();
    assert_eq!(weight, 16.0);
}

#[test]
#[serial]
fn test_run_with_folds_evaluates() {
    init();
    let points = PartitionedDataset::from_vec(three_blobs(21), 4);
    let builder = KMeansBuilder::new()
        .with_clusters(vec![2, 3, 4])
        .with_cross_folds(2)
        .with_seed(42);
    let output = builder.run(&points).unwrap();

    assert_eq!(output.sketches.len(), 2);
    assert_eq!(output.costs.len(), 3);
    // three blobs: k=3 is far cheaper than k=2
    assert!(output.costs[1] < output.costs[0] / 10.0, "costs {:?}", output.costs);

    let eval = output.evaluation.expect("two folds produce an evaluation");
    debug!("prediction strengths: {:?}", eval.prediction_strengths());
    assert_eq!(eval.prediction_strengths().len(), 3);
    assert!(eval.prediction_strengths()[1] > 0.9);
    assert!(
        eval.prediction_strengths()
            .iter()
            .all(|s| (0.0..=1.0).contains(s))
    );
}

#[test]
#[serial]
fn test_run_is_reproducible() {
    init();
    let points = PartitionedDataset::from_vec(three_blobs(4), 3);
    let builder = KMeansBuilder::new()
        .with_clusters(vec![3])
        .with_cross_folds(2)
        .with_init_strategy(InitStrategy::Random)
        .with_seed(9);
    assert_eq!(builder.run(&points).unwrap(), builder.run(&points).unwrap());
}

#[test]
fn test_output_serde_roundtrip() {
    init();
    let points = sixteen_points_dataset(1);
    let output = KMeansBuilder::new()
        .with_clusters(vec![2])
        .with_seed(5)
        .run(&points)
        .unwrap();
    let json = serde_json::to_string(&output).unwrap();
    let back: crate::builder::ClusteringOutput = serde_json::from_str(&json).unwrap();
    assert_eq!(back, output);
}
