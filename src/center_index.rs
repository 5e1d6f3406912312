//! Dedup'd index of the points currently tracked as centers, per group.
//!
//! During k-means|| every fold (group) accumulates its own set of sampled
//! points. Many of those points are shared between folds, and raw datasets
//! often repeat values, so the index stores each distinct point once, keyed
//! by its value ([`PointKey`]), together with its cached squared length and
//! the slot it occupies in each group that tracks it.
//!
//! Nearest-point queries run once over the distinct points and fan the
//! distance out to every group that tracks the point, using
//! `|a|² + |b|² − 2·a·b` so only one dot product is needed per stored point.
//!
//! Memory grows with the number of distinct tracked points (each key keeps a
//! copy of the point's non-zero entries). k-means|| only adds sampled points,
//! at most `rounds × samples × folds` of them plus the initial points.

use std::collections::HashMap;

use log::trace;
use sketchmeans_core::distance::expanded_squared_distance;
use sketchmeans_core::{Centers, PointKey, Vector, WeightedPoint};

use crate::errors::{KMeansError, KMeansResult};

/// Per-group nearest tracked point for one query.
#[derive(Clone, Debug, PartialEq)]
pub struct Distances {
    /// Minimum squared distance to any point tracked in each group
    /// (infinite for a group with no points).
    pub cluster_distances: Vec<f64>,
    /// Slot id of that closest point within each group.
    pub closest_points: Vec<usize>,
}

impl Distances {
    pub fn len(&self) -> usize {
        self.cluster_distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cluster_distances.is_empty()
    }

    pub fn distance(&self, group: usize) -> f64 {
        self.cluster_distances[group]
    }

    pub fn closest(&self, group: usize) -> usize {
        self.closest_points[group]
    }
}

#[derive(Clone, Debug)]
struct IndexEntry {
    point: Vector,
    length_squared: f64,
    /// `(group, slot)` pairs in the order the point joined each group.
    slots: Vec<(usize, usize)>,
}

impl IndexEntry {
    fn slot_in(&self, group: usize) -> Option<usize> {
        self.slots
            .iter()
            .find(|(g, _)| *g == group)
            .map(|(_, slot)| *slot)
    }
}

#[derive(Clone, Debug)]
pub struct CenterIndex {
    points_per_group: Vec<usize>,
    entries: Vec<IndexEntry>,
    positions: HashMap<PointKey, usize>,
    dimension: Option<usize>,
}

impl CenterIndex {
    pub fn new(num_groups: usize) -> Self {
        Self {
            points_per_group: vec![0; num_groups],
            entries: Vec::new(),
            positions: HashMap::new(),
            dimension: None,
        }
    }

    /// One group per `Centers`, slot ids following each `Centers`' order.
    ///
    /// All `Centers` must share one dimensionality; mixing centers of
    /// different shapes is rejected here rather than producing meaningless
    /// distances later.
    pub fn from_centers(centers: &[Centers]) -> KMeansResult<Self> {
        let first = centers.first().ok_or_else(|| {
            KMeansError::MismatchedCenters("no centers specified".to_string())
        })?;
        let dimension = first.dimension();
        if let Some((i, c)) = centers
            .iter()
            .enumerate()
            .find(|(_, c)| c.dimension() != dimension)
        {
            return Err(KMeansError::MismatchedCenters(format!(
                "centers 0 have dimension {} but centers {} have dimension {}",
                dimension,
                i,
                c.dimension()
            )));
        }

        let mut index = CenterIndex::new(centers.len());
        for (group, c) in centers.iter().enumerate() {
            for p in c {
                index.add(p, [group])?;
            }
        }
        Ok(index)
    }

    pub fn num_groups(&self) -> usize {
        self.points_per_group.len()
    }

    /// Number of slots currently used in each group.
    pub fn points_per_group(&self) -> &[usize] {
        &self.points_per_group
    }

    pub fn num_distinct_points(&self) -> usize {
        self.entries.len()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Track `point` in each of `groups`. A point already tracked in a group
    /// keeps its slot, so repeated adds are no-ops.
    pub fn add<I>(&mut self, point: &Vector, groups: I) -> KMeansResult<()>
    where
        I: IntoIterator<Item = usize>,
    {
        match self.dimension {
            Some(d) if d != point.len() => {
                return Err(KMeansError::DimensionMismatch {
                    expected: d,
                    found: point.len(),
                });
            }
            Some(_) => {}
            None => self.dimension = Some(point.len()),
        }

        let key = point.key();
        let pos = match self.positions.get(&key) {
            Some(&pos) => pos,
            None => {
                self.entries.push(IndexEntry {
                    point: point.clone(),
                    length_squared: point.length_squared(),
                    slots: Vec::new(),
                });
                let pos = self.entries.len() - 1;
                self.positions.insert(key, pos);
                pos
            }
        };

        for group in groups {
            if group >= self.points_per_group.len() {
                return Err(KMeansError::InvalidConfig(format!(
                    "group {} out of range for index with {} groups",
                    group,
                    self.points_per_group.len()
                )));
            }
            let entry = &mut self.entries[pos];
            if entry.slot_in(group).is_none() {
                let slot = self.points_per_group[group];
                entry.slots.push((group, slot));
                self.points_per_group[group] += 1;
                trace!("CenterIndex: point {} -> group {} slot {}", pos, group, slot);
            }
        }
        Ok(())
    }

    /// Fold every point of `other` into this index under the same groups.
    ///
    /// Slots are reassigned in this index's numbering; points already present
    /// keep their existing slots.
    pub fn merge(&mut self, other: &CenterIndex) -> KMeansResult<()> {
        if other.num_groups() != self.num_groups() {
            return Err(KMeansError::InvalidConfig(format!(
                "cannot merge an index with {} groups into one with {}",
                other.num_groups(),
                self.num_groups()
            )));
        }
        for entry in &other.entries {
            self.add(&entry.point, entry.slots.iter().map(|(g, _)| *g))?;
        }
        Ok(())
    }

    /// Closest tracked point in every group.
    pub fn distances(&self, point: &Vector) -> Distances {
        let n_groups = self.points_per_group.len();
        let mut cluster_distances = vec![f64::INFINITY; n_groups];
        let mut closest_points = vec![0usize; n_groups];
        if n_groups == 0 {
            return Distances {
                cluster_distances,
                closest_points,
            };
        }

        let length_squared = point.length_squared();
        for entry in &self.entries {
            let dist = expanded_squared_distance(
                entry.length_squared,
                length_squared,
                entry.point.dot(point),
            );
            for &(group, slot) in &entry.slots {
                if dist < cluster_distances[group] {
                    cluster_distances[group] = dist;
                    closest_points[group] = slot;
                }
            }
        }

        Distances {
            cluster_distances,
            closest_points,
        }
    }

    /// Points tracked in `group`, in slot order.
    pub fn group_points(&self, group: usize) -> Vec<&Vector> {
        let mut slotted: Vec<(usize, &Vector)> = self
            .entries
            .iter()
            .filter_map(|e| e.slot_in(group).map(|slot| (slot, &e.point)))
            .collect();
        slotted.sort_by_key(|(slot, _)| *slot);
        slotted.into_iter().map(|(_, p)| p).collect()
    }

    /// Materialize the sketch: every tracked point of every group, weighted by
    /// `counts[group][slot]` (how many dataset points were closest to it).
    pub fn weighted_points(&self, counts: &[Vec<u64>]) -> KMeansResult<Vec<Vec<WeightedPoint>>> {
        if counts.len() != self.num_groups() {
            return Err(KMeansError::InvalidConfig(format!(
                "expected counts for {} groups, got {}",
                self.num_groups(),
                counts.len()
            )));
        }
        for (group, (c, &n)) in counts.iter().zip(&self.points_per_group).enumerate() {
            if c.len() != n {
                return Err(KMeansError::InvalidConfig(format!(
                    "group {} tracks {} points but {} counts were given",
                    group,
                    n,
                    c.len()
                )));
            }
        }

        let mut slots: Vec<Vec<Option<WeightedPoint>>> = self
            .points_per_group
            .iter()
            .map(|&n| vec![None; n])
            .collect();

        for entry in &self.entries {
            for &(group, slot) in &entry.slots {
                let weight = counts[group][slot] as f64;
                slots[group][slot] = Some(WeightedPoint::new(entry.point.clone(), weight)?);
            }
        }

        Ok(slots
            .into_iter()
            .map(|group| group.into_iter().flatten().collect())
            .collect())
    }
}
