//! Core trie operations.
//!
//! Round-trip membership, ordered traversal, duplicate handling, removal,
//! properties, and compression-width transitions, all on the in-place
//! single-writer path.

use std::collections::BTreeSet;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use ramus::epoch::Arena;
use ramus::{AdjacencyTrie, ElemId, TrieOptions};

fn ids(raw: &[u64]) -> Vec<ElemId> {
    raw.iter().map(|&id| ElemId(id)).collect()
}

#[test]
fn small_adjacency_scenario() {
    let mut arena = Arena::new();
    let mut trie = AdjacencyTrie::default();
    for id in [5u64, 300, 70_000, 5_000_000] {
        assert!(trie.insert_element(ElemId(id), &[], &mut arena).unwrap());
    }
    assert_eq!(trie.to_vec(), ids(&[5, 300, 70_000, 5_000_000]));
    assert!(trie.has_element(ElemId(300)));
    assert!(!trie.has_element(ElemId(6)));

    let mut other = AdjacencyTrie::default();
    for id in [300u64, 9] {
        other.insert_element(ElemId(id), &[], &mut arena).unwrap();
    }
    let mut out = Vec::new();
    trie.intersect_into(&other, &mut out);
    assert_eq!(out, ids(&[300]));
    trie.verify_invariants().unwrap();
}

#[test]
fn random_round_trip() {
    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let mut arena = Arena::new();
    let mut trie = AdjacencyTrie::default();
    let mut reference = BTreeSet::new();
    while reference.len() < 4_000 {
        let id = rng.gen::<u64>();
        let fresh = reference.insert(id);
        assert_eq!(
            trie.insert_element(ElemId(id), &[], &mut arena).unwrap(),
            fresh
        );
    }
    assert_eq!(trie.len(), reference.len());
    for &id in reference.iter().take(500) {
        assert!(trie.has_element(ElemId(id)));
    }
    for _ in 0..500 {
        let probe = rng.gen::<u64>();
        assert_eq!(trie.has_element(ElemId(probe)), reference.contains(&probe));
    }
    let collected: Vec<u64> = trie.to_vec().into_iter().map(|id| id.0).collect();
    let expected: Vec<u64> = reference.iter().copied().collect();
    assert_eq!(collected, expected);
    trie.verify_invariants().unwrap();
}

#[test]
fn duplicate_insert_is_not_new() {
    let mut arena = Arena::new();
    let mut trie = AdjacencyTrie::default();
    assert!(trie.insert_element(ElemId(42), &[], &mut arena).unwrap());
    assert!(!trie.insert_element(ElemId(42), &[], &mut arena).unwrap());
    assert_eq!(trie.len(), 1);
    assert!(trie.has_element(ElemId(42)));
}

#[test]
fn dense_range_grows_through_tiers() {
    let mut arena = Arena::new();
    let mut trie = AdjacencyTrie::default();
    let n = 3_000u64;
    for id in 0..n {
        assert!(trie.insert_element(ElemId(id), &[], &mut arena).unwrap());
    }
    assert_eq!(trie.len(), n as usize);
    let collected: Vec<u64> = trie.to_vec().into_iter().map(|id| id.0).collect();
    let expected: Vec<u64> = (0..n).collect();
    assert_eq!(collected, expected);

    let stats = trie.stats();
    assert_eq!(stats.elements, n as usize);
    assert!(stats.nodes() > 0);
    assert!(stats.leaves() > 0);
    trie.verify_invariants().unwrap();
}

#[test]
fn unordered_traversal_covers_every_element_once() {
    let mut arena = Arena::new();
    let mut trie = AdjacencyTrie::default();
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let mut reference = BTreeSet::new();
    for _ in 0..2_000 {
        let id = rng.gen_range(0u64..100_000);
        reference.insert(id);
        trie.insert_element(ElemId(id), &[], &mut arena).unwrap();
    }
    let mut seen = Vec::new();
    trie.for_each_unordered(|id| seen.push(id.0));
    seen.sort_unstable();
    let expected: Vec<u64> = reference.iter().copied().collect();
    assert_eq!(seen, expected);
}

#[test]
fn removal_round_trip() {
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let mut arena = Arena::new();
    let mut trie = AdjacencyTrie::default();
    let mut reference = BTreeSet::new();
    for _ in 0..3_000 {
        let id = rng.gen_range(0u64..1 << 20);
        reference.insert(id);
        trie.insert_element(ElemId(id), &[], &mut arena).unwrap();
    }
    let victims: Vec<u64> = reference.iter().copied().step_by(2).collect();
    for id in &victims {
        let outcome = trie.remove_element(ElemId(*id), &mut arena);
        assert!(outcome.removed);
        reference.remove(id);
    }
    let miss = trie.remove_element(ElemId(1 << 40), &mut arena);
    assert!(!miss.removed);
    assert!(!miss.structural_change);

    assert_eq!(trie.len(), reference.len());
    let collected: Vec<u64> = trie.to_vec().into_iter().map(|id| id.0).collect();
    let expected: Vec<u64> = reference.iter().copied().collect();
    assert_eq!(collected, expected);
    trie.verify_invariants().unwrap();
}

#[test]
fn remove_everything_leaves_empty_tree() {
    let mut arena = Arena::new();
    let mut trie = AdjacencyTrie::default();
    let all: Vec<u64> = (0..600).map(|i| i * 37).collect();
    for &id in &all {
        trie.insert_element(ElemId(id), &[], &mut arena).unwrap();
    }
    for &id in &all {
        assert!(trie.remove_element(ElemId(id), &mut arena).removed);
    }
    assert!(trie.is_empty());
    assert_eq!(trie.to_vec(), Vec::<ElemId>::new());
    trie.verify_invariants().unwrap();

    // The tree stays usable after draining.
    assert!(trie.insert_element(ElemId(7), &[], &mut arena).unwrap());
    assert!(trie.has_element(ElemId(7)));
}

#[test]
fn interleaved_insert_remove_matches_reference() {
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let mut arena = Arena::new();
    let mut trie = AdjacencyTrie::default();
    let mut reference = BTreeSet::new();
    for _ in 0..20_000 {
        let id = rng.gen_range(0u64..4_096);
        if rng.gen_bool(0.6) {
            assert_eq!(
                trie.insert_element(ElemId(id), &[], &mut arena).unwrap(),
                reference.insert(id)
            );
        } else {
            assert_eq!(
                trie.remove_element(ElemId(id), &mut arena).removed,
                reference.remove(&id)
            );
        }
    }
    let collected: Vec<u64> = trie.to_vec().into_iter().map(|id| id.0).collect();
    let expected: Vec<u64> = reference.iter().copied().collect();
    assert_eq!(collected, expected);
    trie.verify_invariants().unwrap();
}

#[test]
fn property_side_table_round_trip() {
    let mut arena = Arena::new();
    let mut trie = AdjacencyTrie::new(TrieOptions::with_props(2)).unwrap();
    for id in 0..1_000u64 {
        trie.insert_element(ElemId(id), &[id * 10, id + 1], &mut arena)
            .unwrap();
    }
    for id in (0..1_000u64).step_by(97) {
        assert_eq!(trie.get_property(ElemId(id), 0).unwrap(), Some(id * 10));
        assert_eq!(trie.get_property(ElemId(id), 1).unwrap(), Some(id + 1));
        let entry = trie.search(ElemId(id)).unwrap();
        assert_eq!(entry.id(), ElemId(id));
        assert_eq!(entry.property(1), Some(id + 1));
    }
    assert_eq!(trie.get_property(ElemId(1_000_000), 0).unwrap(), None);
    assert!(trie.get_property(ElemId(1), 2).is_err());
    trie.verify_invariants().unwrap();
}

#[test]
fn property_misuse_is_rejected() {
    let mut arena = Arena::new();
    let mut plain = AdjacencyTrie::default();
    assert!(plain.get_property(ElemId(1), 0).is_err());
    assert!(plain.insert_element(ElemId(1), &[9], &mut arena).is_err());

    let mut with_props = AdjacencyTrie::new(TrieOptions::with_props(1)).unwrap();
    assert!(with_props.insert_element(ElemId(1), &[], &mut arena).is_err());
}

#[test]
fn width_transition_round_trips() {
    // Ids sharing everything but the low byte force the narrowest leaf
    // representation; the outlier then forces wide branching above it.
    let base = 0x0102_0304_0506_0700u64;
    let mut arena = Arena::new();
    let mut trie = AdjacencyTrie::default();
    let mut expected = BTreeSet::new();
    for i in 0..256u64 {
        let id = base | i;
        expected.insert(id);
        assert!(trie.insert_element(ElemId(id), &[], &mut arena).unwrap());
    }
    // A diverging id forces the shared path apart at byte 3.
    let outlier = 0x0102_0399_0000_0001u64;
    expected.insert(outlier);
    assert!(trie.insert_element(ElemId(outlier), &[], &mut arena).unwrap());
    // And a second run one byte above the dense range.
    for i in 0..64u64 {
        let id = base + 0x100 + i;
        expected.insert(id);
        assert!(trie.insert_element(ElemId(id), &[], &mut arena).unwrap());
    }
    let collected: Vec<u64> = trie.to_vec().into_iter().map(|id| id.0).collect();
    let want: Vec<u64> = expected.iter().copied().collect();
    assert_eq!(collected, want);
    for &id in &want {
        assert!(trie.has_element(ElemId(id)));
    }
    assert!(!trie.has_element(ElemId(base ^ 1 << 40)));
    trie.verify_invariants().unwrap();

    let stats = trie.stats();
    // The dense low range must have reached the one-byte suffix tier.
    assert!(stats.leaves8 > 0, "stats: {stats:?}");
}
