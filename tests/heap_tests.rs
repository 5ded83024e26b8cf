use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use relaxed_queues::heap::DaryHeap;

#[test]
fn empty_heap_has_no_minimum() {
    let mut heap: DaryHeap<8> = DaryHeap::new();
    assert!(heap.is_empty());
    assert_eq!(heap.peek(), None);
    assert_eq!(heap.pop_min(), None);
}

#[test]
fn single_element_round_trip() {
    let mut heap: DaryHeap<8> = DaryHeap::new();
    heap.push((42, 7));
    assert_eq!(heap.len(), 1);
    assert_eq!(heap.peek(), Some((42, 7)));
    assert_eq!(heap.pop_min(), Some((42, 7)));
    assert!(heap.is_empty());
}

#[test]
fn pops_come_out_in_nondecreasing_key_order() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut heap: DaryHeap<8> = DaryHeap::new();
    let n = 10_000;
    for i in 0..n {
        heap.push((rng.gen_range(0..1_000_000u64), i));
    }
    let mut last = 0;
    for _ in 0..n {
        let (key, _) = heap.pop_min().expect("heap drained early");
        assert!(key >= last, "pop order violated: {key} after {last}");
        last = key;
    }
    assert!(heap.is_empty());
}

#[test]
fn random_interleaving_preserves_order_and_content() {
    let mut rng = StdRng::seed_from_u64(99);
    let mut heap: DaryHeap<8> = DaryHeap::new();
    let mut mirror = std::collections::BinaryHeap::new();
    for step in 0..50_000u64 {
        if rng.gen_bool(0.6) || heap.is_empty() {
            let key = rng.gen_range(0..10_000u64);
            heap.push((key, step));
            mirror.push(std::cmp::Reverse(key));
        } else {
            let (key, _) = heap.pop_min().unwrap();
            let std::cmp::Reverse(expected) = mirror.pop().unwrap();
            assert_eq!(key, expected);
        }
    }
    while let Some((key, _)) = heap.pop_min() {
        let std::cmp::Reverse(expected) = mirror.pop().unwrap();
        assert_eq!(key, expected);
    }
    assert!(mirror.is_empty());
}

#[test]
fn duplicate_keys_all_come_back() {
    let mut heap: DaryHeap<8> = DaryHeap::new();
    for value in 0..100 {
        heap.push((5, value));
    }
    let mut values: Vec<u64> = (0..100).map(|_| heap.pop_min().unwrap().1).collect();
    values.sort_unstable();
    assert_eq!(values, (0..100).collect::<Vec<u64>>());
}

#[test]
fn low_degree_heap_stays_ordered() {
    // Degree 2 exercises the deepest sift paths.
    let mut rng = StdRng::seed_from_u64(3);
    let mut heap: DaryHeap<2> = DaryHeap::new();
    for i in 0..1_000 {
        heap.push((rng.gen_range(0..500u64), i));
    }
    let mut last = 0;
    while let Some((key, _)) = heap.pop_min() {
        assert!(key >= last);
        last = key;
    }
}
