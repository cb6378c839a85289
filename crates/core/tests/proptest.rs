//! Property-based tests for keyflow-core using proptest.

use keyflow_core::{Cache, Change, ChangeSet, KeyComparer, KeyedEntry};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
enum Op {
    Put(u8, i32),
    Remove(u8),
    Refresh(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..16, any::<i32>()).prop_map(|(k, v)| Op::Put(k, v)),
        (0u8..16).prop_map(Op::Remove),
        (0u8..16).prop_map(Op::Refresh),
    ]
}

/// Turns raw ops into well-formed change sets against a reference map, then
/// splits them into batches of the given size.
fn build_batches(ops: &[Op], batch: usize) -> (Vec<ChangeSet<u8, i32>>, BTreeMap<u8, i32>) {
    let mut reference = BTreeMap::new();
    let mut changes = Vec::new();
    for op in ops {
        match *op {
            Op::Put(k, v) => match reference.insert(k, v) {
                Some(prev) => changes.push(Change::update(k, v, prev)),
                None => changes.push(Change::add(k, v)),
            },
            Op::Remove(k) => {
                if let Some(prev) = reference.remove(&k) {
                    changes.push(Change::remove(k, prev));
                }
            }
            Op::Refresh(k) => {
                if let Some(v) = reference.get(&k) {
                    changes.push(Change::refresh(k, *v));
                }
            }
        }
    }
    let sets = changes
        .chunks(batch.max(1))
        .map(|chunk| ChangeSet::new(chunk.to_vec()))
        .collect();
    (sets, reference)
}

proptest! {
    /// Final mirror state depends only on the ordered sequence of changes.
    #[test]
    fn mirror_replay_matches_reference(
        ops in prop::collection::vec(op_strategy(), 0..200),
        batch in 1usize..20,
    ) {
        let (sets, reference) = build_batches(&ops, batch);
        let mut cache = Cache::new();
        for set in &sets {
            cache.apply(set).unwrap();
        }
        let mirrored: BTreeMap<u8, i32> = cache.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(mirrored, reference);
    }

    /// Batching does not change the outcome.
    #[test]
    fn mirror_batching_is_irrelevant(
        ops in prop::collection::vec(op_strategy(), 0..120),
        a in 1usize..10,
        b in 10usize..40,
    ) {
        let (small, _) = build_batches(&ops, a);
        let (large, _) = build_batches(&ops, b);
        let mut left = Cache::new();
        let mut right = Cache::new();
        for set in &small {
            left.apply(set).unwrap();
        }
        for set in &large {
            right.apply(set).unwrap();
        }
        let l: BTreeMap<u8, i32> = left.iter().map(|(k, v)| (*k, *v)).collect();
        let r: BTreeMap<u8, i32> = right.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(l, r);
    }

    /// Equal keys are equal entries with equal hashes, whatever the values.
    #[test]
    fn key_comparer_ignores_values(key in any::<u64>(), v1 in any::<i64>(), v2 in any::<i64>()) {
        let comparer = KeyComparer::new();
        prop_assert!(comparer.equals(&(key, v1), &(key, v2)));
        prop_assert_eq!(comparer.hash(&(key, v1)), comparer.hash(&(key, v2)));
        prop_assert_eq!(KeyedEntry::new(key, v1), KeyedEntry::new(key, v2));
    }

    /// Different keys are different entries even when the values match.
    #[test]
    fn key_comparer_distinguishes_keys(k1 in any::<u64>(), k2 in any::<u64>(), v in any::<i64>()) {
        prop_assume!(k1 != k2);
        let comparer = KeyComparer::new();
        prop_assert!(!comparer.equals(&(k1, v), &(k2, v)));
        prop_assert_ne!(KeyedEntry::new(k1, v), KeyedEntry::new(k2, v));
    }
}
