//! Property-based suites over the trie.
//!
//! Randomized invariants: membership round-trips, strictly ascending
//! traversal, model-checked insert/remove sequences, batch/incremental
//! equivalence, and intersection against a reference set implementation.

use std::collections::BTreeSet;

use proptest::collection::vec;
use proptest::prelude::*;

use ramus::epoch::Arena;
use ramus::{AdjacencyTrie, ElemId, TrieOptions};

#[derive(Clone, Debug)]
enum Op {
    Insert(u64),
    Remove(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..8_192).prop_map(Op::Insert),
        (0u64..8_192).prop_map(Op::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn membership_round_trip(ids in vec(any::<u64>(), 0..300)) {
        let mut arena = Arena::new();
        let mut trie = AdjacencyTrie::default();
        let mut reference = BTreeSet::new();
        for &id in &ids {
            prop_assert_eq!(
                trie.insert_element(ElemId(id), &[], &mut arena).unwrap(),
                reference.insert(id)
            );
        }
        for &id in &ids {
            prop_assert!(trie.has_element(ElemId(id)));
        }
        let collected: Vec<u64> = trie.to_vec().into_iter().map(|id| id.0).collect();
        let expected: Vec<u64> = reference.iter().copied().collect();
        prop_assert_eq!(collected, expected);
        trie.verify_invariants().unwrap();
    }

    #[test]
    fn traversal_stays_sorted_under_ops(ops in vec(op_strategy(), 0..600)) {
        let mut arena = Arena::new();
        let mut trie = AdjacencyTrie::default();
        let mut reference = BTreeSet::new();
        for op in &ops {
            match *op {
                Op::Insert(id) => {
                    prop_assert_eq!(
                        trie.insert_element(ElemId(id), &[], &mut arena).unwrap(),
                        reference.insert(id)
                    );
                }
                Op::Remove(id) => {
                    prop_assert_eq!(
                        trie.remove_element(ElemId(id), &mut arena).removed,
                        reference.remove(&id)
                    );
                }
            }
        }
        let collected: Vec<u64> = trie.to_vec().into_iter().map(|id| id.0).collect();
        prop_assert!(collected.windows(2).all(|w| w[0] < w[1]));
        let expected: Vec<u64> = reference.iter().copied().collect();
        prop_assert_eq!(collected, expected);
        trie.verify_invariants().unwrap();
    }

    #[test]
    fn batch_build_equals_single_inserts(ids in vec(any::<u64>(), 1..400)) {
        let mut arena = Arena::new();
        let mut sorted: Vec<u64> = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        let elems: Vec<ElemId> = sorted.iter().map(|&id| ElemId(id)).collect();
        let batch =
            AdjacencyTrie::from_sorted(&elems, None, TrieOptions::default(), &mut arena).unwrap();

        let mut incremental = AdjacencyTrie::default();
        for &id in &ids {
            incremental.insert_element(ElemId(id), &[], &mut arena).unwrap();
        }
        prop_assert_eq!(batch.to_vec(), incremental.to_vec());
        batch.verify_invariants().unwrap();
    }

    #[test]
    fn intersection_matches_reference(
        a in vec(0u64..4_096, 0..300),
        b in vec(0u64..4_096, 0..300),
    ) {
        let mut arena = Arena::new();
        let mut ta = AdjacencyTrie::default();
        let mut tb = AdjacencyTrie::default();
        let sa: BTreeSet<u64> = a.iter().copied().collect();
        let sb: BTreeSet<u64> = b.iter().copied().collect();
        for &id in &a {
            ta.insert_element(ElemId(id), &[], &mut arena).unwrap();
        }
        for &id in &b {
            tb.insert_element(ElemId(id), &[], &mut arena).unwrap();
        }
        let expected: Vec<u64> = sa.intersection(&sb).copied().collect();
        prop_assert_eq!(ta.intersect(&tb), expected.len());
        let mut out = Vec::new();
        ta.intersect_into(&tb, &mut out);
        let got: Vec<u64> = out.iter().map(|id| id.0).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn cow_insert_preserves_source(base in vec(any::<u64>(), 1..200), extra in any::<u64>()) {
        let mut arena = Arena::new();
        let mut s0 = AdjacencyTrie::default();
        for &id in &base {
            s0.insert_element(ElemId(id), &[], &mut arena).unwrap();
        }
        let before = s0.to_vec();
        let result = s0.insert_element_copy(ElemId(extra), &[], &mut arena).unwrap();
        prop_assert_eq!(result.is_new, !before.contains(&ElemId(extra)));
        if let Some(s1) = result.tree {
            prop_assert!(s1.has_element(ElemId(extra)));
            prop_assert_eq!(s1.len(), before.len() + 1);
            s1.verify_invariants().unwrap();
            s1.handle_resources_ref(&mut arena);
        }
        prop_assert_eq!(s0.to_vec(), before);
        s0.verify_invariants().unwrap();
    }
}
