use arrow::{
    array::{Array, Float64Array, RecordBatch, StringArray, UInt64Array},
    datatypes::{DataType, Field, Schema},
};
use log::{debug, info};
use parquet::{
    arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder},
    basic::Compression,
    file::properties::WriterProperties,
};
use serde::{Deserialize, Serialize};
use sketchmeans_core::{Centers, Vector, WeightedPoint};
use std::{collections::HashMap, fs::File, path::Path, sync::Arc};

use crate::{
    builder::{ClusteringOutput, ConfigValue, KMeansBuilder},
    storage::{StorageError, StorageResult},
};

// ============================================================================
// Metadata
// ============================================================================

/// JSON sidecar describing a saved run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SketchMetadata {
    pub name_id: String,
    pub timestamp: String,

    /// Number of point columns
    pub dimension: usize,

    /// KMeansBuilder configuration (typed values)
    pub builder_config: HashMap<String, ConfigValue>,

    /// Full-data cost per candidate k, when a run was saved
    pub costs: Vec<f64>,

    pub files: HashMap<String, FileInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub file_type: String, // "centers" or "sketch"
    pub groups: usize,
    pub rows: usize,
    pub size_bytes: Option<u64>,
}

impl SketchMetadata {
    pub fn new(name_id: &str) -> Self {
        Self {
            name_id: name_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            dimension: 0,
            builder_config: HashMap::new(),
            costs: Vec::new(),
            files: HashMap::new(),
        }
    }

    pub fn from_builder(name_id: &str, builder: &KMeansBuilder) -> Self {
        Self::new(name_id).with_builder_config(builder.builder_config_typed())
    }

    pub fn with_builder_config(mut self, config: HashMap<String, ConfigValue>) -> Self {
        self.builder_config = config;
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_costs(mut self, costs: Vec<f64>) -> Self {
        self.costs = costs;
        self
    }

    pub fn add_file(mut self, key: &str, info: FileInfo) -> Self {
        self.files.insert(key.to_string(), info);
        self
    }

    pub fn get_config<'a>(&'a self, key: &str) -> Option<&'a ConfigValue> {
        self.builder_config.get(key)
    }

    pub fn clusters(&self) -> Option<&[usize]> {
        self.get_config("clusters").and_then(|v| v.as_usize_list())
    }

    pub fn seed(&self) -> Option<u64> {
        self.get_config("seed").and_then(|v| v.as_u64())
    }

    /// One `key = value` line per config entry, sorted by key.
    pub fn config_summary(&self) -> String {
        let mut lines: Vec<String> = self
            .builder_config
            .iter()
            .map(|(key, value)| format!("  {} = {}", key, value))
            .collect();
        lines.sort();
        lines.join("\n")
    }
}

pub fn save_metadata(
    metadata: &SketchMetadata,
    path: impl AsRef<Path>,
    name_id: &str,
) -> StorageResult<()> {
    let metadata_path = path.as_ref().join(format!("{}_metadata.json", name_id));

    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| StorageError::Serde(format!("Failed to serialize metadata: {}", e)))?;

    std::fs::write(&metadata_path, json)
        .map_err(|e| StorageError::Io(format!("Failed to write metadata: {}", e)))?;

    Ok(())
}

pub fn load_metadata(path: impl AsRef<Path>, name_id: &str) -> StorageResult<SketchMetadata> {
    let metadata_path = path.as_ref().join(format!("{}_metadata.json", name_id));

    info!("loading metadata from {:?}", metadata_path);
    let json = std::fs::read_to_string(&metadata_path)
        .map_err(|e| StorageError::Io(format!("Failed to read metadata: {}", e)))?;

    serde_json::from_str(&json)
        .map_err(|e| StorageError::Serde(format!("Failed to parse metadata: {}", e)))
}

// ============================================================================
// Long table: one row per (group, point)
// ============================================================================

struct Row<'a> {
    group_id: usize,
    point_id: usize,
    weight: f64,
    point: &'a Vector,
}

struct LoadedRow {
    group_id: usize,
    weight: f64,
    point: Vector,
}

const GROUPS_KEY: &str = "sketchmeans.groups";

/// Write rows as `group_id, point_id, weight, vector_id, col_0..col_{d-1}`.
/// The group count goes into the schema metadata so empty groups survive.
/// Sparse points are written densified. Returns the file size when known.
fn write_long_table(
    rows: &[Row<'_>],
    dimension: usize,
    num_groups: usize,
    file_path: &Path,
) -> StorageResult<Option<u64>> {
    if let Some(r) = rows.iter().find(|r| r.point.len() != dimension) {
        return Err(StorageError::Invalid(format!(
            "point {} of group {} has dimension {}, expected {}",
            r.point_id,
            r.group_id,
            r.point.len(),
            dimension
        )));
    }

    let mut fields = vec![
        Field::new("group_id", DataType::UInt64, false),
        Field::new("point_id", DataType::UInt64, false),
        Field::new("weight", DataType::Float64, false),
        Field::new("vector_id", DataType::Utf8, true),
    ];
    for i in 0..dimension {
        fields.push(Field::new(format!("col_{}", i), DataType::Float64, false));
    }
    let schema = Arc::new(Schema::new(fields).with_metadata(HashMap::from([(
        GROUPS_KEY.to_string(),
        num_groups.to_string(),
    )])));

    let dense: Vec<Vec<f64>> = rows.iter().map(|r| r.point.to_dense()).collect();
    let mut columns: Vec<Arc<dyn Array>> = vec![
        Arc::new(UInt64Array::from(
            rows.iter().map(|r| r.group_id as u64).collect::<Vec<_>>(),
        )),
        Arc::new(UInt64Array::from(
            rows.iter().map(|r| r.point_id as u64).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            rows.iter().map(|r| r.weight).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            rows.iter().map(|r| r.point.id()).collect::<Vec<Option<&str>>>(),
        )),
    ];
    for col_idx in 0..dimension {
        let col_data: Vec<f64> = dense.iter().map(|row| row[col_idx]).collect();
        columns.push(Arc::new(Float64Array::from(col_data)));
    }

    let batch = RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| StorageError::Arrow(e.to_string()))?;

    let file = File::create(file_path).map_err(|e| StorageError::Io(e.to_string()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))
        .map_err(|e| StorageError::Parquet(e.to_string()))?;
    writer
        .write(&batch)
        .map_err(|e| StorageError::Parquet(e.to_string()))?;
    writer
        .close()
        .map_err(|e| StorageError::Parquet(e.to_string()))?;

    debug!("wrote {} rows x {} columns to {:?}", rows.len(), dimension, file_path);
    Ok(std::fs::metadata(file_path).map(|m| m.len()).ok())
}

fn u64_column<'a>(batch: &'a RecordBatch, name: &str) -> StorageResult<&'a UInt64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
        .ok_or_else(|| StorageError::Invalid(format!("{} column missing", name)))
}

fn f64_column<'a>(batch: &'a RecordBatch, name: &str) -> StorageResult<&'a Float64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
        .ok_or_else(|| StorageError::Invalid(format!("{} column missing", name)))
}

/// Rows grouped by `group_id` and ordered by `point_id`. Empty groups up to
/// the stored group count come back as empty vectors.
fn read_long_table(file_path: &Path) -> StorageResult<Vec<Vec<LoadedRow>>> {
    let file = File::open(file_path).map_err(|e| StorageError::Io(e.to_string()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| StorageError::Parquet(e.to_string()))?;
    let stored_groups = match builder.schema().metadata().get(GROUPS_KEY) {
        Some(v) => v
            .parse::<usize>()
            .map_err(|e| StorageError::Invalid(format!("{} metadata: {}", GROUPS_KEY, e)))?,
        None => 0,
    };
    let reader = builder
        .build()
        .map_err(|e| StorageError::Parquet(e.to_string()))?;

    let mut keyed: Vec<(usize, usize, LoadedRow)> = Vec::new();
    for batch_result in reader {
        let batch = batch_result.map_err(|e| StorageError::Parquet(e.to_string()))?;
        let dimension = batch
            .schema()
            .fields()
            .iter()
            .filter(|f| f.name().starts_with("col_"))
            .count();

        let group_ids = u64_column(&batch, "group_id")?;
        let point_ids = u64_column(&batch, "point_id")?;
        let weights = f64_column(&batch, "weight")?;
        let vector_ids = batch
            .column_by_name("vector_id")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let cols: Vec<&Float64Array> = (0..dimension)
            .map(|i| f64_column(&batch, &format!("col_{}", i)))
            .collect::<StorageResult<_>>()?;

        for row in 0..batch.num_rows() {
            let mut point = Vector::dense(cols.iter().map(|c| c.value(row)).collect());
            if let Some(ids) = vector_ids.filter(|ids| !ids.is_null(row)) {
                point = point.with_id(ids.value(row));
            }
            keyed.push((
                group_ids.value(row) as usize,
                point_ids.value(row) as usize,
                LoadedRow {
                    group_id: group_ids.value(row) as usize,
                    weight: weights.value(row),
                    point,
                },
            ));
        }
    }

    keyed.sort_by_key(|(group, point, _)| (*group, *point));
    let num_groups = keyed
        .last()
        .map(|(g, _, _)| g + 1)
        .unwrap_or(0)
        .max(stored_groups);
    let mut groups: Vec<Vec<LoadedRow>> = (0..num_groups).map(|_| Vec::new()).collect();
    for (_, _, row) in keyed {
        groups[row.group_id].push(row);
    }
    Ok(groups)
}

// ============================================================================
// Centers and sketches
// ============================================================================

/// Save a list of `Centers` (one group per entry) to `<name_id>.parquet`.
/// Every row is written with weight 1.
pub fn save_centers(
    centers: &[Centers],
    path: impl AsRef<Path>,
    name_id: &str,
    builder_config: Option<HashMap<String, ConfigValue>>,
) -> StorageResult<()> {
    let dimension = centers.first().map(Centers::dimension).unwrap_or(0);
    let rows: Vec<Row<'_>> = centers
        .iter()
        .enumerate()
        .flat_map(|(group_id, c)| {
            c.iter().enumerate().map(move |(point_id, point)| Row {
                group_id,
                point_id,
                weight: 1.0,
                point,
            })
        })
        .collect();

    let filename = format!("{}.parquet", name_id);
    let size_bytes = write_long_table(
        &rows,
        dimension,
        centers.len(),
        &path.as_ref().join(&filename),
    )?;
    info!("saved {} centers groups to {}", centers.len(), filename);

    if let Some(config) = builder_config {
        let metadata = SketchMetadata::new(name_id)
            .with_builder_config(config)
            .with_dimension(dimension)
            .add_file(
                "centers",
                FileInfo {
                    filename,
                    file_type: "centers".to_string(),
                    groups: centers.len(),
                    rows: rows.len(),
                    size_bytes,
                },
            );
        save_metadata(&metadata, path.as_ref(), name_id)?;
    }
    Ok(())
}

/// Load `Centers` saved by [`save_centers`]; duplicates collapse again on load.
pub fn load_centers(path: impl AsRef<Path>) -> StorageResult<Vec<Centers>> {
    read_long_table(path.as_ref())?
        .into_iter()
        .enumerate()
        .map(|(group, rows)| {
            Centers::new(rows.into_iter().map(|r| r.point))
                .map_err(|e| StorageError::Invalid(format!("centers group {}: {}", group, e)))
        })
        .collect()
}

/// Save weighted sketches (one group per fold) to `<name_id>.parquet`.
pub fn save_sketches(
    sketches: &[Vec<WeightedPoint>],
    path: impl AsRef<Path>,
    name_id: &str,
    builder_config: Option<HashMap<String, ConfigValue>>,
) -> StorageResult<()> {
    let dimension = sketches
        .iter()
        .flatten()
        .next()
        .map(|wp| wp.point().len())
        .unwrap_or(0);
    let rows: Vec<Row<'_>> = sketches
        .iter()
        .enumerate()
        .flat_map(|(group_id, sketch)| {
            sketch.iter().enumerate().map(move |(point_id, wp)| Row {
                group_id,
                point_id,
                weight: wp.weight(),
                point: wp.point(),
            })
        })
        .collect();

    let filename = format!("{}.parquet", name_id);
    let size_bytes = write_long_table(
        &rows,
        dimension,
        sketches.len(),
        &path.as_ref().join(&filename),
    )?;
    info!("saved {} sketches to {}", sketches.len(), filename);

    if let Some(config) = builder_config {
        let metadata = SketchMetadata::new(name_id)
            .with_builder_config(config)
            .with_dimension(dimension)
            .add_file(
                "sketch",
                FileInfo {
                    filename,
                    file_type: "sketch".to_string(),
                    groups: sketches.len(),
                    rows: rows.len(),
                    size_bytes,
                },
            );
        save_metadata(&metadata, path.as_ref(), name_id)?;
    }
    Ok(())
}

pub fn load_sketches(path: impl AsRef<Path>) -> StorageResult<Vec<Vec<WeightedPoint>>> {
    read_long_table(path.as_ref())?
        .into_iter()
        .map(|rows| {
            rows.into_iter()
                .map(|r| {
                    WeightedPoint::new(r.point, r.weight)
                        .map_err(|e| StorageError::Invalid(e.to_string()))
                })
                .collect()
        })
        .collect()
}

/// Save a pipeline run: `<name_id>_centers.parquet`,
/// `<name_id>_sketch.parquet` and `<name_id>_metadata.json`.
pub fn save_output(
    output: &ClusteringOutput,
    builder: &KMeansBuilder,
    path: impl AsRef<Path>,
    name_id: &str,
) -> StorageResult<()> {
    let centers_id = format!("{}_centers", name_id);
    let sketch_id = format!("{}_sketch", name_id);
    save_centers(&output.centers, path.as_ref(), &centers_id, None)?;
    save_sketches(&output.sketches, path.as_ref(), &sketch_id, None)?;

    let file_info = |id: &str, file_type: &str, groups: usize, rows: usize| {
        let filename = format!("{}.parquet", id);
        let size_bytes = std::fs::metadata(path.as_ref().join(&filename))
            .map(|m| m.len())
            .ok();
        FileInfo {
            filename,
            file_type: file_type.to_string(),
            groups,
            rows,
            size_bytes,
        }
    };

    let metadata = SketchMetadata::from_builder(name_id, builder)
        .with_dimension(output.centers.first().map(Centers::dimension).unwrap_or(0))
        .with_costs(output.costs.clone())
        .add_file(
            "centers",
            file_info(
                &centers_id,
                "centers",
                output.centers.len(),
                output.centers.iter().map(Centers::len).sum(),
            ),
        )
        .add_file(
            "sketch",
            file_info(
                &sketch_id,
                "sketch",
                output.sketches.len(),
                output.sketches.iter().map(Vec::len).sum(),
            ),
        );
    save_metadata(&metadata, path.as_ref(), name_id)
}
