//! Weighted reservoir sampling (A-Res) as a distributed fold.
//!
//! Every candidate with weight `w > 0` draws `u ~ U(0, 1]` and gets the key
//! `ln(u) / w`; a group's sample is the `K` candidates with the largest keys,
//! which selects items with probability proportional to weight without
//! replacement.
//!
//! Keeping "the top K by key" is what makes the sampler distributable: each
//! partition keeps a local top-K ([`LocalSampler`]), and two partial
//! reservoirs for the same group merge into the top-K of their union
//! ([`Reservoir::merge`]). Keys are ranked by `(key, tag)` where the tag is
//! unique per candidate (partition index and offset), so the ranking is a
//! strict total order and the merge is associative and commutative: any
//! combine tree over any number of partitions yields the same sample.
//!
//! Sequential reservoir algorithms (replace a random slot with probability
//! K/n) have no such merge and are not used here.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use log::{debug, trace};
use rand::Rng;

use crate::dataset::PartitionedDataset;
use crate::random::partition_rng;

const PARTITION_TAG_SHIFT: u32 = 40;

/// A-Res key for `weight`, or `None` when the item can never be selected
/// (zero, negative or non-finite weight).
pub fn ares_key<R: Rng + ?Sized>(rng: &mut R, weight: f64) -> Option<f64> {
    if !(weight > 0.0) || !weight.is_finite() {
        return None;
    }
    // 1 - [0, 1) keeps u away from zero
    let u = 1.0 - rng.random::<f64>();
    Some(u.ln() / weight)
}

/// Candidate rank: key first, tag to break ties.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rank {
    pub key: f64,
    pub tag: u64,
}

impl Eq for Rank {}

impl Ord for Rank {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .total_cmp(&other.key)
            .then_with(|| self.tag.cmp(&other.tag))
    }
}

impl PartialOrd for Rank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Debug)]
struct Ranked<T> {
    rank: Rank,
    item: T,
}

impl<T> PartialEq for Ranked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank
    }
}

impl<T> Eq for Ranked<T> {}

impl<T> Ord for Ranked<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank.cmp(&other.rank)
    }
}

impl<T> PartialOrd for Ranked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Top-`capacity` candidates by rank for one group.
#[derive(Clone, Debug)]
pub struct Reservoir<T> {
    capacity: usize,
    // min-heap: the root is the weakest kept candidate
    heap: BinaryHeap<Reverse<Ranked<T>>>,
}

impl<T> Reservoir<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Whether a candidate with `rank` would currently be kept.
    pub fn accepts(&self, rank: Rank) -> bool {
        if self.capacity == 0 {
            return false;
        }
        match self.heap.peek() {
            _ if self.heap.len() < self.capacity => true,
            Some(Reverse(weakest)) => rank > weakest.rank,
            None => true,
        }
    }

    pub fn offer(&mut self, rank: Rank, item: T) {
        self.offer_with(rank, || item);
    }

    /// Like `offer`, but only builds the item once it is known to be kept.
    pub fn offer_with<F: FnOnce() -> T>(&mut self, rank: Rank, make: F) {
        if !self.accepts(rank) {
            return;
        }
        if self.heap.len() == self.capacity {
            self.heap.pop();
        }
        self.heap.push(Reverse(Ranked { rank, item: make() }));
    }

    /// Top-K of the union of both reservoirs.
    pub fn merge(self, other: Reservoir<T>) -> Reservoir<T> {
        let capacity = self.capacity.max(other.capacity);
        let (mut big, small) = if self.heap.len() >= other.heap.len() {
            (self, other)
        } else {
            (other, self)
        };
        big.capacity = capacity;
        for Reverse(r) in small.heap {
            big.offer(r.rank, r.item);
        }
        big
    }

    /// Ranks of the kept candidates, strongest first.
    pub fn ranks(&self) -> Vec<Rank> {
        let mut ranks: Vec<Rank> = self.heap.iter().map(|Reverse(r)| r.rank).collect();
        ranks.sort_by(|a, b| b.cmp(a));
        ranks
    }

    /// Kept items, strongest first.
    pub fn into_items(self) -> Vec<T> {
        let mut ranked: Vec<Ranked<T>> = self.heap.into_iter().map(|Reverse(r)| r).collect();
        ranked.sort_by(|a, b| b.cmp(a));
        ranked.into_iter().map(|r| r.item).collect()
    }
}

/// One reservoir per group, merged group-wise.
#[derive(Clone, Debug)]
pub struct GroupedReservoirs<T> {
    reservoirs: Vec<Reservoir<T>>,
}

impl<T> GroupedReservoirs<T> {
    pub fn new(sample_sizes: &[usize]) -> Self {
        Self {
            reservoirs: sample_sizes.iter().map(|&k| Reservoir::new(k)).collect(),
        }
    }

    pub fn num_groups(&self) -> usize {
        self.reservoirs.len()
    }

    pub fn group(&self, group: usize) -> Option<&Reservoir<T>> {
        self.reservoirs.get(group)
    }

    pub fn offer_with<F: FnOnce() -> T>(&mut self, group: usize, rank: Rank, make: F) {
        if let Some(r) = self.reservoirs.get_mut(group) {
            r.offer_with(rank, make);
        }
    }

    pub fn merge(self, other: GroupedReservoirs<T>) -> GroupedReservoirs<T> {
        let (mut long, short) = if self.reservoirs.len() >= other.reservoirs.len() {
            (self, other)
        } else {
            (other, self)
        };
        let merged = long
            .reservoirs
            .drain(..)
            .zip(short.reservoirs.into_iter().map(Some).chain(std::iter::repeat_with(|| None)))
            .map(|(a, b)| match b {
                Some(b) => a.merge(b),
                None => a,
            })
            .collect();
        GroupedReservoirs { reservoirs: merged }
    }

    pub fn into_groups(self) -> Vec<Vec<T>> {
        self.reservoirs.into_iter().map(Reservoir::into_items).collect()
    }
}

/// Per-partition sampling state.
///
/// Owns the partition's RNG and partial reservoirs. Candidates are pushed with
/// [`offer`](LocalSampler::offer) and the partial result is handed off with
/// [`flush`](LocalSampler::flush) once the partition's input is exhausted.
pub struct LocalSampler<T, R: Rng> {
    reservoirs: GroupedReservoirs<T>,
    rng: R,
    partition: usize,
    offset: u64,
}

impl<T, R: Rng> LocalSampler<T, R> {
    pub fn new(sample_sizes: &[usize], rng: R, partition: usize) -> Self {
        Self {
            reservoirs: GroupedReservoirs::new(sample_sizes),
            rng,
            partition,
            offset: 0,
        }
    }

    fn next_tag(&mut self) -> u64 {
        let tag = ((self.partition as u64) << PARTITION_TAG_SHIFT) | self.offset;
        self.offset += 1;
        tag
    }

    pub fn offer(&mut self, group: usize, weight: f64, item: T) {
        self.offer_with(group, weight, || item);
    }

    pub fn offer_with<F: FnOnce() -> T>(&mut self, group: usize, weight: f64, make: F) {
        let tag = self.next_tag();
        if let Some(key) = ares_key(&mut self.rng, weight) {
            self.reservoirs.offer_with(group, Rank { key, tag }, make);
        }
    }

    pub fn flush(self) -> GroupedReservoirs<T> {
        trace!(
            "LocalSampler: partition {} flushed after {} candidates",
            self.partition, self.offset
        );
        self.reservoirs
    }
}

/// Grouped weighted sampler with a fixed sample size per group.
#[derive(Clone, Debug)]
pub struct ReservoirSampler {
    sample_sizes: Vec<usize>,
    seed: u64,
}

impl ReservoirSampler {
    pub fn new(sample_sizes: Vec<usize>, seed: u64) -> Self {
        Self { sample_sizes, seed }
    }

    pub fn single(sample_size: usize, seed: u64) -> Self {
        Self::new(vec![sample_size], seed)
    }

    pub fn sample_sizes(&self) -> &[usize] {
        &self.sample_sizes
    }

    /// Single-pass local sampling of `(group, item, weight)` triples.
    pub fn sample_local<T, I>(&self, items: I) -> Vec<Vec<T>>
    where
        I: IntoIterator<Item = (usize, T, f64)>,
    {
        let mut local = LocalSampler::new(&self.sample_sizes, partition_rng(self.seed, 0), 0);
        for (group, item, weight) in items {
            local.offer(group, weight, item);
        }
        local.flush().into_groups()
    }

    /// Distributed grouped sampling.
    ///
    /// `score` maps a record to `(group, weight)` or `None` to skip it;
    /// `extract` builds the sampled item and is only called for records that
    /// enter a reservoir.
    pub fn grouped_sample<S, T, F, E>(
        &self,
        dataset: &PartitionedDataset<S>,
        score: F,
        extract: E,
    ) -> Vec<Vec<T>>
    where
        S: Sync,
        T: Send,
        F: Fn(&S) -> Option<(usize, f64)> + Sync + Send,
        E: Fn(&S) -> T + Sync + Send,
    {
        let sizes = &self.sample_sizes;
        let seed = self.seed;

        let merged = dataset.aggregate(
            |partition, part| {
                let mut local = LocalSampler::new(sizes, partition_rng(seed, partition), partition);
                for record in part {
                    if let Some((group, weight)) = score(record) {
                        local.offer_with(group, weight, || extract(record));
                    }
                }
                local.flush()
            },
            GroupedReservoirs::merge,
        );

        let groups = merged
            .unwrap_or_else(|| GroupedReservoirs::new(sizes))
            .into_groups();
        debug!(
            "ReservoirSampler: sampled {:?} items per group (requested {:?})",
            groups.iter().map(Vec::len).collect::<Vec<_>>(),
            sizes
        );
        groups
    }

    /// Keyed `(group, (item, weight))` input, the shape a scoring pass emits.
    pub fn grouped_weighted_sample<T>(
        &self,
        dataset: &PartitionedDataset<(usize, (T, f64))>,
    ) -> Vec<Vec<T>>
    where
        T: Clone + Send + Sync,
    {
        self.grouped_sample(
            dataset,
            |(group, (_, weight))| Some((*group, *weight)),
            |(_, (item, _))| item.clone(),
        )
    }

    /// Ungrouped weighted sample; uses the first sample size.
    pub fn weighted_sample<T>(&self, dataset: &PartitionedDataset<(T, f64)>) -> Vec<T>
    where
        T: Clone + Send + Sync,
    {
        self.grouped_sample(dataset, |(_, weight)| Some((0, *weight)), |(item, _)| item.clone())
            .into_iter()
            .next()
            .unwrap_or_default()
    }
}

/// Uniform sample of `sample_size` items (every weight 1).
pub fn sample<T>(dataset: &PartitionedDataset<T>, sample_size: usize, seed: u64) -> Vec<T>
where
    T: Clone + Send + Sync,
{
    ReservoirSampler::single(sample_size, seed)
        .grouped_sample(dataset, |_| Some((0, 1.0)), T::clone)
        .into_iter()
        .next()
        .unwrap_or_default()
}
