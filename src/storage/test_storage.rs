use approx::assert_relative_eq;
use sketchmeans_core::{Centers, Vector, WeightedPoint};
use tempfile::TempDir;

use crate::builder::KMeansBuilder;
use crate::storage::parquet::{
    load_centers, load_metadata, load_sketches, save_centers, save_output, save_sketches,
};
use crate::tests::init;
use crate::tests::test_data::{sixteen_points_dataset, vec2};

#[test]
fn test_centers_roundtrip() {
    init();
    let dir = TempDir::new().unwrap();
    let centers = vec![
        Centers::new(vec![vec2(3.0, 2.25)]).unwrap(),
        Centers::new(vec![vec2(1.5, 1.0), vec2(4.5, 3.5).with_id("right")]).unwrap(),
    ];
    save_centers(&centers, dir.path(), "centers", None).unwrap();

    let loaded = load_centers(dir.path().join("centers.parquet")).unwrap();
    assert_eq!(loaded, centers);
    // order and ids survive too
    assert_eq!(loaded[1].get(1).and_then(Vector::id), Some("right"));
    assert_eq!(loaded[1].get(0), Some(&vec2(1.5, 1.0)));
}

#[test]
fn test_sparse_centers_are_densified() {
    init();
    let dir = TempDir::new().unwrap();
    let sparse = Vector::sparse(5, vec![1, 4], vec![2.0, -1.0]).unwrap();
    let centers = vec![Centers::new(vec![sparse.clone()]).unwrap()];
    save_centers(&centers, dir.path(), "sparse", None).unwrap();

    let loaded = load_centers(dir.path().join("sparse.parquet")).unwrap();
    let p = loaded[0].get(0).unwrap();
    assert!(!p.is_sparse());
    assert_eq!(p, &sparse);
}

#[test]
fn test_sketch_roundtrip_keeps_weights() {
    init();
    let dir = TempDir::new().unwrap();
    let sketches = vec![
        vec![
            WeightedPoint::new(vec2(1.0, 1.0), 4.0).unwrap(),
            WeightedPoint::new(vec2(2.0, 1.0), 0.0).unwrap(),
        ],
        vec![WeightedPoint::new(vec2(5.0, 4.0), 12.5).unwrap()],
    ];
    save_sketches(&sketches, dir.path(), "sketch", None).unwrap();

    let loaded = load_sketches(dir.path().join("sketch.parquet")).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded, sketches);
    assert_relative_eq!(loaded[1][0].weight(), 12.5);
}

#[test]
fn test_empty_sketch_groups_survive_reload() {
    init();
    let dir = TempDir::new().unwrap();
    let sketches = vec![
        Vec::new(),
        vec![WeightedPoint::new(vec2(1.0, 1.0), 3.0).unwrap()],
        Vec::new(),
    ];
    save_sketches(&sketches, dir.path(), "folds", None).unwrap();

    let loaded = load_sketches(dir.path().join("folds.parquet")).unwrap();
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded, sketches);

    save_sketches(&[Vec::new(), Vec::new()], dir.path(), "empty", None).unwrap();
    let loaded = load_sketches(dir.path().join("empty.parquet")).unwrap();
    assert_eq!(loaded, vec![Vec::<WeightedPoint>::new(); 2]);
}

#[test]
fn test_mixed_dimensions_rejected() {
    init();
    let dir = TempDir::new().unwrap();
    let sketches = vec![vec![
        WeightedPoint::unit(vec2(1.0, 1.0)),
        WeightedPoint::unit(Vector::dense(vec![1.0])),
    ]];
    assert!(save_sketches(&sketches, dir.path(), "bad", None).is_err());
}

#[test]
fn test_metadata_written_with_config() {
    init();
    let dir = TempDir::new().unwrap();
    let builder = KMeansBuilder::new().with_clusters(vec![3]).with_seed(11);
    let centers = vec![Centers::new(vec![vec2(0.0, 0.0), vec2(1.0, 1.0)]).unwrap()];
    save_centers(
        &centers,
        dir.path(),
        "with_meta",
        Some(builder.builder_config_typed()),
    )
    .unwrap();

    let meta = load_metadata(dir.path(), "with_meta").unwrap();
    assert_eq!(meta.name_id, "with_meta");
    assert_eq!(meta.dimension, 2);
    assert_eq!(meta.seed(), Some(11));
    assert_eq!(meta.clusters(), Some(&[3usize][..]));
    assert_eq!(meta.files["centers"].rows, 2);
    assert!(meta.config_summary().contains("seed = 11"));
}

#[test]
fn test_save_pipeline_output() {
    init();
    let dir = TempDir::new().unwrap();
    let points = sixteen_points_dataset(2);
    let builder = KMeansBuilder::new()
        .with_clusters(vec![1, 2])
        .with_initial_points(vec![vec2(1.0, 1.0)])
        .with_seed(29);
    let output = builder.run(&points).unwrap();

    save_output(&output, &builder, dir.path(), "run").unwrap();

    let meta = load_metadata(dir.path(), "run").unwrap();
    assert_eq!(meta.costs, output.costs);
    assert_eq!(meta.files.len(), 2);

    let centers = load_centers(dir.path().join("run_centers.parquet")).unwrap();
    assert_eq!(centers, output.centers);
    let sketches = load_sketches(dir.path().join("run_sketch.parquet")).unwrap();
    assert_eq!(sketches, output.sketches);
}

#[test]
fn test_centers_serde_roundtrip() {
    init();
    let centers = Centers::new(vec![
        vec2(0.5, -1.0),
        Vector::sparse(2, vec![1], vec![3.0]).unwrap(),
    ])
    .unwrap();
    let json = serde_json::to_string(&centers).unwrap();
    let back: Centers = serde_json::from_str(&json).unwrap();
    assert_eq!(back, centers);
}
