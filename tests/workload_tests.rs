use rand::rngs::StdRng;
use rand::SeedableRng;

use relaxed_queues::workload::{
    self, ElementDistribution, InsertConfig, InsertPolicy, InsertingStrategy, KeyDistribution,
    ThroughputSettings, WorkMode,
};
use relaxed_queues::MAX_USER_KEY;

fn keys_for(
    distribution: ElementDistribution,
    seed: u64,
    thread_id: usize,
    per_thread: usize,
    num_threads: usize,
) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(workload::thread_seed(seed, thread_id));
    workload::generate_keys(&mut rng, distribution, 1, 1 << 20, thread_id, per_thread, num_threads)
}

#[test]
fn key_streams_are_deterministic() {
    for distribution in [
        ElementDistribution::Uniform,
        ElementDistribution::Ascending,
        ElementDistribution::Descending,
    ] {
        let first = keys_for(distribution, 99, 2, 10_000, 4);
        let second = keys_for(distribution, 99, 2, 10_000, 4);
        assert_eq!(first, second, "{} stream not reproducible", distribution.name());
    }
}

#[test]
fn different_threads_get_different_uniform_streams() {
    let a = keys_for(ElementDistribution::Uniform, 1, 0, 1_000, 4);
    let b = keys_for(ElementDistribution::Uniform, 1, 1, 1_000, 4);
    assert_ne!(a, b);
}

#[test]
fn ascending_stream_is_sorted_and_spans_threads() {
    let per_thread = 5_000;
    let mut all = Vec::new();
    for id in 0..4 {
        all.extend(keys_for(ElementDistribution::Ascending, 5, id, per_thread, 4));
    }
    assert!(all.windows(2).all(|w| w[0] <= w[1]));
    assert!(*all.first().unwrap() >= 1);
    assert!(*all.last().unwrap() <= 1 << 20);
}

#[test]
fn descending_stream_is_reversed_ascending() {
    let per_thread = 5_000;
    let mut ascending = Vec::new();
    let mut descending = Vec::new();
    for id in 0..4 {
        ascending.extend(keys_for(ElementDistribution::Ascending, 5, id, per_thread, 4));
        descending.extend(keys_for(ElementDistribution::Descending, 5, id, per_thread, 4));
    }
    ascending.reverse();
    assert_eq!(ascending, descending);
}

#[test]
fn equal_min_and_max_give_constant_keys() {
    let mut rng = StdRng::seed_from_u64(1);
    for distribution in [
        ElementDistribution::Uniform,
        ElementDistribution::Ascending,
        ElementDistribution::Descending,
    ] {
        let keys = workload::generate_keys(&mut rng, distribution, 7, 7, 0, 1_000, 2);
        assert!(keys.iter().all(|&k| k == 7));
    }
}

#[test]
fn work_mode_and_distribution_codes() {
    assert_eq!(WorkMode::from_code('m'), Some(WorkMode::Mixed));
    assert_eq!(WorkMode::from_code('s'), Some(WorkMode::Split));
    assert_eq!(WorkMode::from_code('x'), None);
    assert_eq!(ElementDistribution::from_code('u'), Some(ElementDistribution::Uniform));
    assert_eq!(ElementDistribution::from_code('a'), Some(ElementDistribution::Ascending));
    assert_eq!(ElementDistribution::from_code('d'), Some(ElementDistribution::Descending));
    assert_eq!(ElementDistribution::from_code('q'), None);
}

fn base_settings() -> ThroughputSettings {
    ThroughputSettings {
        num_threads: 4,
        prefill_per_thread: 1_000,
        elements_per_thread: 1_000,
        work_mode: WorkMode::Mixed,
        num_push_threads: 1,
        element_distribution: ElementDistribution::Uniform,
        min_key: 1,
        max_key: 1 << 30,
        seed: 1,
    }
}

#[test]
fn valid_settings_pass() {
    assert!(base_settings().validate().is_ok());
}

#[test]
fn rejects_zero_threads() {
    let settings = ThroughputSettings {
        num_threads: 0,
        ..base_settings()
    };
    assert!(settings.validate().is_err());
}

#[test]
fn rejects_inverted_key_range() {
    let settings = ThroughputSettings {
        min_key: 10,
        max_key: 5,
        ..base_settings()
    };
    assert!(settings.validate().is_err());
}

#[test]
fn rejects_sentinel_keys() {
    let settings = ThroughputSettings {
        max_key: MAX_USER_KEY + 1,
        ..base_settings()
    };
    assert!(settings.validate().is_err());
}

#[test]
fn rejects_split_mode_without_push_threads() {
    let settings = ThroughputSettings {
        work_mode: WorkMode::Split,
        num_push_threads: 0,
        elements_per_thread: 1_000,
        ..base_settings()
    };
    assert!(settings.validate().is_err());
    // With nothing to push the configuration is fine.
    let settings = ThroughputSettings {
        work_mode: WorkMode::Split,
        num_push_threads: 0,
        elements_per_thread: 0,
        ..base_settings()
    };
    assert!(settings.validate().is_ok());
}

#[test]
fn rejects_more_push_threads_than_threads() {
    let settings = ThroughputSettings {
        work_mode: WorkMode::Split,
        num_push_threads: 5,
        ..base_settings()
    };
    assert!(settings.validate().is_err());
}

fn strategy(id: usize, threads: usize, policy: InsertPolicy, dist: KeyDistribution) -> InsertingStrategy {
    let config = InsertConfig {
        policy,
        key_distribution: dist,
        min_key: 10,
        max_key: 1_000,
        ..InsertConfig::default()
    };
    InsertingStrategy::new(id, threads, config, 1234 + id as u64)
}

#[test]
fn producer_policy_splits_by_thread_id() {
    let mut producer = strategy(0, 4, InsertPolicy::Producer, KeyDistribution::Uniform);
    let mut consumer = strategy(3, 4, InsertPolicy::Producer, KeyDistribution::Uniform);
    for _ in 0..100 {
        assert!(producer.next_is_insert());
        assert!(!consumer.next_is_insert());
    }
}

#[test]
fn split_policy_uses_the_first_half() {
    let mut low = strategy(1, 4, InsertPolicy::Split, KeyDistribution::Uniform);
    let mut high = strategy(2, 4, InsertPolicy::Split, KeyDistribution::Uniform);
    for _ in 0..100 {
        assert!(low.next_is_insert());
        assert!(!high.next_is_insert());
    }
}

#[test]
fn alternating_policy_toggles() {
    let mut s = strategy(0, 2, InsertPolicy::Alternating, KeyDistribution::Uniform);
    let steps: Vec<bool> = (0..6).map(|_| s.next_is_insert()).collect();
    assert_eq!(steps, vec![true, false, true, false, true, false]);
}

#[test]
fn keys_stay_in_range_for_all_distributions() {
    for dist in [
        KeyDistribution::Uniform,
        KeyDistribution::Ascending,
        KeyDistribution::Descending,
        KeyDistribution::Dijkstra,
        KeyDistribution::ThreadId,
    ] {
        let mut s = strategy(2, 4, InsertPolicy::Uniform, dist);
        for _ in 0..10_000 {
            let key = s.next_key();
            assert!((10..=1_000).contains(&key), "{}: key {key}", dist.name());
        }
    }
}

#[test]
fn dijkstra_keys_are_nondecreasing_until_the_cap() {
    let mut s = strategy(0, 2, InsertPolicy::Uniform, KeyDistribution::Dijkstra);
    let mut last = 0;
    for _ in 0..1_000 {
        let key = s.next_key();
        assert!(key >= last);
        last = key;
    }
}

#[test]
fn threadid_keys_are_constant_per_thread() {
    let mut s = strategy(3, 4, InsertPolicy::Uniform, KeyDistribution::ThreadId);
    let first = s.next_key();
    assert_eq!(first, 13);
    for _ in 0..100 {
        assert_eq!(s.next_key(), first);
    }
}

#[test]
fn thread_seeds_differ_between_threads() {
    let seeds: Vec<u64> = (0..16).map(|id| workload::thread_seed(42, id)).collect();
    let mut unique = seeds.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), seeds.len());
}
