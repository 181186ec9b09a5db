//! Structural intersection.
//!
//! Count and materializing variants are checked against naive set
//! intersection over randomized inputs and over adversarial shapes: disjoint
//! prefix ranges, depth-mismatched tries, and shared-leaf layouts.

use std::collections::BTreeSet;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use ramus::epoch::Arena;
use ramus::{AdjacencyTrie, ElemId};

fn build(ids: impl IntoIterator<Item = u64>, arena: &mut Arena) -> (AdjacencyTrie, BTreeSet<u64>) {
    let mut trie = AdjacencyTrie::default();
    let mut set = BTreeSet::new();
    for id in ids {
        set.insert(id);
        trie.insert_element(ElemId(id), &[], arena).unwrap();
    }
    (trie, set)
}

fn check_intersection(
    a: &AdjacencyTrie,
    b: &AdjacencyTrie,
    sa: &BTreeSet<u64>,
    sb: &BTreeSet<u64>,
) {
    let expected: Vec<u64> = sa.intersection(sb).copied().collect();
    assert_eq!(a.intersect(b), expected.len());
    assert_eq!(b.intersect(a), expected.len());
    let mut out = Vec::new();
    a.intersect_into(b, &mut out);
    let got: Vec<u64> = out.iter().map(|id| id.0).collect();
    assert_eq!(got, expected);
}

#[test]
fn random_sets_match_naive_reference() {
    let mut rng = ChaCha8Rng::seed_from_u64(41);
    let mut arena = Arena::new();
    for round in 0..6 {
        let domain = 1u64 << (8 + round * 4);
        let (a, sa) = build((0..3_000).map(|_| rng.gen_range(0..domain)), &mut arena);
        let (b, sb) = build((0..3_000).map(|_| rng.gen_range(0..domain)), &mut arena);
        check_intersection(&a, &b, &sa, &sb);
    }
}

#[test]
fn disjoint_prefixes_intersect_empty() {
    let mut arena = Arena::new();
    let (a, sa) = build(0..2_000, &mut arena);
    let (b, sb) = build((0..2_000).map(|i| (1u64 << 40) + i), &mut arena);
    check_intersection(&a, &b, &sa, &sb);
    assert_eq!(a.intersect(&b), 0);
}

#[test]
fn depth_mismatched_tries() {
    let mut arena = Arena::new();
    // A spans a wide range; B sits deep inside one of A's subtrees.
    let (a, sa) = build((0..4_000).map(|i| i * 65_537), &mut arena);
    let (b, sb) = build((0..800).map(|i| i * 65_537 + (i % 2)), &mut arena);
    check_intersection(&a, &b, &sa, &sb);
}

#[test]
fn identical_tries_intersect_fully() {
    let mut arena = Arena::new();
    let ids: Vec<u64> = (0..2_500).map(|i| i * 13).collect();
    let (a, sa) = build(ids.iter().copied(), &mut arena);
    let (b, sb) = build(ids.iter().copied(), &mut arena);
    check_intersection(&a, &b, &sa, &sb);
    assert_eq!(a.intersect(&b), ids.len());
}

#[test]
fn empty_tries_intersect_empty() {
    let mut arena = Arena::new();
    let empty = AdjacencyTrie::default();
    let (full, _) = build(0..100, &mut arena);
    assert_eq!(empty.intersect(&full), 0);
    assert_eq!(full.intersect(&empty), 0);
    assert_eq!(empty.intersect(&empty), 0);
}

#[test]
fn range_intersect_matches_naive_reference() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut arena = Arena::new();
    let (trie, set) = build((0..5_000).map(|_| rng.gen_range(0u64..1 << 24)), &mut arena);

    let mut probe: Vec<u64> = (0..3_000).map(|_| rng.gen_range(0u64..1 << 24)).collect();
    probe.sort_unstable();
    probe.dedup();
    let sorted: Vec<ElemId> = probe.iter().map(|&id| ElemId(id)).collect();

    let expected: Vec<u64> = probe.iter().copied().filter(|id| set.contains(id)).collect();
    assert_eq!(trie.range_intersect(&sorted), expected.len());
    let mut out = Vec::new();
    trie.range_intersect_into(&sorted, &mut out);
    let got: Vec<u64> = out.iter().map(|id| id.0).collect();
    assert_eq!(got, expected);

    assert_eq!(trie.range_intersect(&[]), 0);
    let all: Vec<ElemId> = set.iter().map(|&id| ElemId(id)).collect();
    assert_eq!(trie.range_intersect(&all), set.len());
}
