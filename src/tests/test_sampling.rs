use std::collections::{HashMap, HashSet};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::dataset::PartitionedDataset;
use crate::random::partition_rng;
use crate::sampling::{LocalSampler, Rank, Reservoir, ReservoirSampler, ares_key, sample};
use crate::tests::init;

fn rank(key: f64, tag: u64) -> Rank {
    Rank { key, tag }
}

#[test]
fn test_ares_key_rejects_unusable_weights() {
    init();
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    assert!(ares_key(&mut rng, 0.0).is_none());
    assert!(ares_key(&mut rng, -1.0).is_none());
    assert!(ares_key(&mut rng, f64::NAN).is_none());
    assert!(ares_key(&mut rng, f64::INFINITY).is_none());
    for _ in 0..100 {
        let k = ares_key(&mut rng, 2.5).unwrap();
        assert!(k <= 0.0 && k.is_finite());
    }
}

#[test]
fn test_reservoir_keeps_top_k() {
    init();
    let mut r = Reservoir::new(2);
    r.offer(rank(-3.0, 0), "c");
    r.offer(rank(-1.0, 1), "a");
    r.offer(rank(-2.0, 2), "b");
    r.offer(rank(-5.0, 3), "d");
    assert_eq!(r.len(), 2);
    assert_eq!(r.into_items(), vec!["a", "b"]);
}

#[test]
fn test_reservoir_ties_broken_by_tag() {
    init();
    let mut r = Reservoir::new(1);
    r.offer(rank(-1.0, 4), "low tag");
    r.offer(rank(-1.0, 9), "high tag");
    assert_eq!(r.into_items(), vec!["high tag"]);
}

#[test]
fn test_zero_capacity_keeps_nothing() {
    init();
    let mut r = Reservoir::new(0);
    r.offer(rank(-0.1, 0), 1);
    assert!(r.is_empty());
}

#[test]
fn test_offer_with_builds_only_kept_items() {
    init();
    let mut r = Reservoir::new(1);
    r.offer(rank(-1.0, 0), 1);
    let mut built = false;
    r.offer_with(rank(-2.0, 1), || {
        built = true;
        2
    });
    assert!(!built);
    assert_eq!(r.into_items(), vec![1]);
}

#[test]
fn test_merge_is_associative_and_commutative() {
    init();
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let mut all_ranks = Vec::new();
    let parts: Vec<Reservoir<u64>> = (0..3)
        .map(|p| {
            let mut r = Reservoir::new(5);
            for i in 0..40u64 {
                let weight = 1.0 + (i % 7) as f64;
                let key = ares_key(&mut rng, weight).unwrap();
                let tag = (p << 40) | i;
                all_ranks.push(rank(key, tag));
                r.offer(rank(key, tag), tag);
            }
            r
        })
        .collect();
    assert_eq!(all_ranks.len(), 120);
    all_ranks.sort_by(|a, b| b.cmp(a));
    all_ranks.truncate(5);
    let (a, b, c) = (parts[0].clone(), parts[1].clone(), parts[2].clone());

    let left = a.clone().merge(b.clone()).merge(c.clone());
    let right = a.clone().merge(b.clone().merge(c.clone()));
    let swapped = c.merge(a).merge(b);

    assert_eq!(left.ranks(), right.ranks());
    assert_eq!(left.ranks(), swapped.ranks());
    assert_eq!(left.ranks(), all_ranks);
    let tags: Vec<u64> = all_ranks.iter().map(|r| r.tag).collect();
    assert_eq!(left.into_items(), tags);
}

#[test]
fn test_fewer_items_than_capacity_keeps_all_positive() {
    init();
    let sampler = ReservoirSampler::single(10, 3);
    let items = vec![(0, "a", 1.0), (0, "b", 0.0), (0, "c", 2.0), (0, "d", -4.0)];
    let mut got = sampler.sample_local(items).pop().unwrap();
    got.sort();
    assert_eq!(got, vec!["a", "c"]);
}

#[test]
fn test_local_sampler_flush_hands_off_groups() {
    init();
    let mut local = LocalSampler::new(&[1, 2], partition_rng(5, 0), 0);
    local.offer(0, 1.0, 'x');
    local.offer(1, 1.0, 'y');
    local.offer(1, 1.0, 'z');
    local.offer(7, 1.0, 'w');
    let groups = local.flush();
    assert_eq!(groups.num_groups(), 2);
    assert_eq!(groups.group(0).unwrap().len(), 1);
    assert_eq!(groups.group(1).unwrap().len(), 2);
}

#[test]
fn test_grouped_sample_respects_groups_and_sizes() {
    init();
    let items: Vec<(usize, (u32, f64))> = (0..300u32).map(|i| ((i % 3) as usize, (i, 1.0))).collect();
    let ds = PartitionedDataset::from_vec(items, 6);
    let sampler = ReservoirSampler::new(vec![5, 0, 50], 11);
    let groups = sampler.grouped_weighted_sample(&ds);

    assert_eq!(groups.len(), 3);
    assert_eq!(groups[0].len(), 5);
    assert!(groups[1].is_empty());
    assert_eq!(groups[2].len(), 50);
    assert!(groups[0].iter().all(|i| i % 3 == 0));
    assert!(groups[2].iter().all(|i| i % 3 == 2));
    assert_eq!(groups[2].iter().collect::<HashSet<_>>().len(), 50);
}

#[test]
fn test_same_seed_same_sample() {
    init();
    let items: Vec<(u32, f64)> = (0..500u32).map(|i| (i, 1.0 + (i % 5) as f64)).collect();
    let ds = PartitionedDataset::from_vec(items, 4);
    let a = ReservoirSampler::single(20, 42).weighted_sample(&ds);
    let b = ReservoirSampler::single(20, 42).weighted_sample(&ds);
    assert_eq!(a, b);
    assert_eq!(a.len(), 20);
}

#[test]
fn test_zero_weight_items_never_selected() {
    init();
    let items: Vec<(u32, f64)> = (0..100u32)
        .map(|i| (i, if i < 10 { 1.0 } else { 0.0 }))
        .collect();
    let ds = PartitionedDataset::from_vec(items, 3);
    let mut got = ReservoirSampler::single(20, 8).weighted_sample(&ds);
    got.sort();
    assert_eq!(got, (0..10).collect::<Vec<u32>>());
}

#[test]
fn test_heavier_items_selected_more_often() {
    init();
    // item 0 weighs 9 times as much as each of items 1..=9
    let items: Vec<(u32, f64)> = (0..10u32).map(|i| (i, if i == 0 { 9.0 } else { 1.0 })).collect();
    let ds = PartitionedDataset::from_vec(items, 2);
    let mut hits: HashMap<u32, usize> = HashMap::new();
    for seed in 0..400 {
        for item in ReservoirSampler::single(1, seed).weighted_sample(&ds) {
            *hits.entry(item).or_insert(0) += 1;
        }
    }
    // expected share 0.5
    let heavy = hits.get(&0).copied().unwrap_or(0);
    assert!(heavy > 140 && heavy < 260, "heavy item chosen {} times", heavy);
}

#[test]
fn test_uniform_sample() {
    init();
    let ds = PartitionedDataset::from_vec((0..50u32).collect::<Vec<u32>>(), 5);
    let picked = sample(&ds, 7, 3);
    assert_eq!(picked.len(), 7);
    assert_eq!(picked.iter().collect::<HashSet<_>>().len(), 7);

    let all = sample(&ds, 100, 3);
    assert_eq!(all.len(), 50);

    let empty: PartitionedDataset<u32> = PartitionedDataset::from_vec(Vec::new(), 2);
    assert!(sample(&empty, 3, 1).is_empty());
}
