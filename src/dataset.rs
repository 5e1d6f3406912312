//! Partitioned collection used as the dataflow runtime.
//!
//! The clustering core only needs three things from a distributed runtime:
//! per-item `map`, a per-partition pass that produces a partial result, and an
//! associative merge of partial results (`combine_values` for keyed data,
//! `aggregate` otherwise). `PartitionedDataset` provides exactly that over
//! in-memory partitions, running each partition as one rayon task. Partitions
//! share nothing: a pass only reads the snapshot it is handed. Merges passed
//! in must be associative and commutative; partial results are folded in
//! partition order so floating-point totals do not depend on the thread count.

use std::collections::HashMap;
use std::hash::Hash;

use rayon::prelude::*;

#[derive(Clone, Debug)]
pub struct PartitionedDataset<T> {
    partitions: Vec<Vec<T>>,
}

impl<T> PartitionedDataset<T> {
    pub fn from_partitions(partitions: Vec<Vec<T>>) -> Self {
        Self { partitions }
    }

    /// Split `items` into `num_partitions` contiguous chunks (at least one).
    pub fn from_vec(items: Vec<T>, num_partitions: usize) -> Self {
        let num_partitions = num_partitions.max(1);
        let chunk = items.len().div_ceil(num_partitions).max(1);

        let mut partitions: Vec<Vec<T>> = Vec::with_capacity(num_partitions);
        let mut current = Vec::with_capacity(chunk);
        for item in items {
            current.push(item);
            if current.len() == chunk {
                partitions.push(std::mem::replace(&mut current, Vec::with_capacity(chunk)));
            }
        }
        if !current.is_empty() {
            partitions.push(current);
        }
        while partitions.len() < num_partitions {
            partitions.push(Vec::new());
        }
        Self { partitions }
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(Vec::is_empty)
    }

    pub fn partitions(&self) -> &[Vec<T>] {
        &self.partitions
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.partitions.iter().flatten()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.partitions.into_iter().flatten().collect()
    }
}

impl<T: Sync> PartitionedDataset<T> {
    pub fn map<U, F>(&self, f: F) -> PartitionedDataset<U>
    where
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        let partitions = self
            .partitions
            .par_iter()
            .map(|p| p.iter().map(&f).collect())
            .collect();
        PartitionedDataset { partitions }
    }

    /// Run `f` once per partition with the partition index, keeping the
    /// partitioning of the output aligned with the input.
    pub fn map_partitions<U, F>(&self, f: F) -> PartitionedDataset<U>
    where
        U: Send,
        F: Fn(usize, &[T]) -> Vec<U> + Sync + Send,
    {
        let partitions = self
            .partitions
            .par_iter()
            .enumerate()
            .map(|(i, p)| f(i, p))
            .collect();
        PartitionedDataset { partitions }
    }

    /// Compute one partial result per partition and merge them with `combine`.
    ///
    /// Returns `None` only when there are no partitions.
    pub fn aggregate<A, S, C>(&self, per_partition: S, combine: C) -> Option<A>
    where
        A: Send,
        S: Fn(usize, &[T]) -> A + Sync + Send,
        C: Fn(A, A) -> A + Sync + Send,
    {
        let partials: Vec<A> = self
            .partitions
            .par_iter()
            .enumerate()
            .map(|(i, p)| per_partition(i, p))
            .collect();
        partials.into_iter().reduce(combine)
    }

    /// `aggregate` for passes that can fail; the whole pass fails if any
    /// partition does.
    pub fn try_aggregate<A, E, S, C>(&self, per_partition: S, combine: C) -> Result<Option<A>, E>
    where
        A: Send,
        E: Send,
        S: Fn(usize, &[T]) -> Result<A, E> + Sync + Send,
        C: Fn(A, A) -> A + Sync + Send,
    {
        let partials: Vec<A> = self
            .partitions
            .par_iter()
            .enumerate()
            .map(|(i, p)| per_partition(i, p))
            .collect::<Result<_, E>>()?;
        Ok(partials.into_iter().reduce(combine))
    }
}

impl<K, V> PartitionedDataset<(K, V)>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    /// Group by key and fold each group's values with `combine`.
    pub fn combine_values<F>(&self, combine: F) -> HashMap<K, V>
    where
        F: Fn(V, V) -> V + Sync + Send,
    {
        let merge_into = |acc: &mut HashMap<K, V>, key: K, value: V| match acc.remove(&key) {
            Some(existing) => {
                acc.insert(key, combine(existing, value));
            }
            None => {
                acc.insert(key, value);
            }
        };

        self.aggregate(
            |_, part| {
                let mut local: HashMap<K, V> = HashMap::new();
                for (k, v) in part {
                    merge_into(&mut local, k.clone(), v.clone());
                }
                local
            },
            |a, b| {
                let (mut big, small) = if a.len() >= b.len() { (a, b) } else { (b, a) };
                for (k, v) in small {
                    merge_into(&mut big, k, v);
                }
                big
            },
        )
        .unwrap_or_default()
    }
}
