use super::*;

use crate::node::{NodeKind, SizeClass, MAX_DEPTH};
use crate::testing::MappedHasher;
use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

/// Checks every structural invariant of `t` and panics on the first breach.
pub(crate) fn validate_tree<K: Ord + Hash + Debug, V, S: BuildHasher>(t: &HashTree<K, V, S>) {
    let mut path = Vec::with_capacity(MAX_DEPTH);
    let count = validate_node(&t.root, 0, &mut path, &t.hasher);
    assert_eq!(count, t.len, "reachable entry count must match HashTree::len");
    assert_eq!(t.len == 0, t.root.is_empty(), "only an empty tree has an empty root");
}

fn validate_node<K: Ord + Hash + Debug, V, S: BuildHasher>(
    node: &NodeRef<K, V>,
    depth: usize,
    path: &mut Vec<u8>,
    hasher: &S,
) -> usize {
    assert!(depth <= MAX_DEPTH, "node below the last level");

    // Every entry must sit on the path its hash prescribes.
    let check_path = |key: &K| {
        let hash = hash_key(hasher, key);
        for (d, &chunk) in path.iter().enumerate() {
            assert_eq!(hash_chunk(hash, d), chunk, "key {key:?} off its hash path at depth {d}");
        }
        hash
    };

    match node {
        NodeRef::Empty => {
            assert_eq!(depth, 0, "empty child stored in a branch");
            0
        }
        NodeRef::List(list) => {
            assert_eq!(depth, MAX_DEPTH, "list leaf above the last level");
            assert!(!list.is_empty(), "empty list leaf");
            let entries: Vec<_> = list.iter().collect();
            assert_eq!(entries.len(), list.len(), "list length out of sync");
            let first_hash = check_path(&entries[0].key);
            for (i, entry) in entries.iter().enumerate() {
                assert_eq!(check_path(&entry.key), first_hash, "list entries must share a full hash");
                for other in &entries[i + 1..] {
                    assert!(entry.key != other.key, "duplicate key {:?} in list", entry.key);
                }
            }
            entries.len()
        }
        NodeRef::Branch(branch) => {
            assert!(depth < MAX_DEPTH, "branch at the last level");
            assert!(!branch.occupation.is_empty(), "branch without children");
            assert_eq!(
                branch.children.len(),
                branch.occupation.count(),
                "children must match occupancy popcount"
            );
            assert!(branch.children.capacity() >= branch.children.len());
            let mut total = 0;
            for (chunk, child) in branch.occupation.chunks().zip(&branch.children) {
                assert!(!child.is_empty(), "empty child for chunk {chunk}");
                path.push(chunk);
                total += validate_node(child, depth + 1, path, hasher);
                path.pop();
            }
            total
        }
        leaf => {
            assert!(depth < MAX_DEPTH, "array leaf at the last level");
            let Some((occupation, entries)) = leaf.leaf_entries() else {
                unreachable!("non-leaf variants handled above");
            };
            assert!(!entries.is_empty(), "empty array leaf");
            assert_eq!(
                leaf.kind(),
                NodeKind::Leaf(SizeClass::fitting(entries.len())),
                "leaf not in its smallest size class"
            );
            assert!(
                entries.windows(2).all(|w| w[0].key < w[1].key),
                "leaf entries must be strictly sorted"
            );
            let mut expected = Occupation::default();
            for entry in entries {
                expected.set(hash_chunk(check_path(&entry.key), depth));
            }
            assert_eq!(occupation, expected, "leaf occupancy must match its entries");
            entries.len()
        }
    }
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 4)]
    Insert(#[proptest(strategy = "0u32..2048")] u32, u32),
    #[proptest(weight = 2)]
    Upsert(#[proptest(strategy = "0u32..2048")] u32, u32),
    #[proptest(weight = 3)]
    Remove(#[proptest(strategy = "0u32..2048")] u32),
    #[proptest(weight = 1)]
    Get(#[proptest(strategy = "0u32..2048")] u32),
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(any::<Op>(), 0..=2000)
}

fn run_ops<S: BuildHasher>(t: &mut HashTree<u32, u32, S>, ops: Vec<Op>) -> Result<(), TestCaseError> {
    let mut m: BTreeMap<u32, u32> = BTreeMap::new();
    for op in ops {
        match op {
            Op::Insert(key, value) => {
                let fresh = !m.contains_key(&key);
                prop_assert_eq!(t.insert(key, value), fresh);
                m.entry(key).or_insert(value);
            }
            Op::Upsert(key, value) => {
                prop_assert_eq!(t.upsert(key, value), m.insert(key, value));
            }
            Op::Remove(key) => {
                prop_assert_eq!(t.remove(&key), m.remove(&key));
            }
            Op::Get(key) => {
                prop_assert_eq!(t.get(&key), m.get(&key));
            }
        }
        prop_assert_eq!(t.len(), m.len());
    }

    validate_tree(t);
    let mut got: Vec<(u32, u32)> = t.iter().map(|(k, v)| (*k, *v)).collect();
    got.sort_unstable();
    let expected: Vec<(u32, u32)> = m.into_iter().collect();
    prop_assert_eq!(&got, &expected);

    let mut visited: Vec<(u32, u32)> = Vec::with_capacity(t.len());
    let stopped = t.for_each(|k, v| {
        visited.push((*k, *v));
        ControlFlow::Continue(())
    });
    prop_assert!(!stopped);
    visited.sort_unstable();
    prop_assert_eq!(visited, expected);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(ops in ops_strategy()) {
        let mut t: HashTree<u32, u32> = HashTree::new();
        run_ops(&mut t, ops)?;
    }

    #[test]
    fn prop_equivalence_full_collisions(ops in ops_strategy()) {
        // 16 distinct hashes, each shared by many keys.
        let mut t = HashTree::with_hasher(MappedHasher::new(|k| (k % 16).wrapping_mul(0x9E37_79B9_7F4A_7C15)));
        run_ops(&mut t, ops)?;
    }

    #[test]
    fn prop_equivalence_shared_prefix(ops in ops_strategy()) {
        // Only the top chunk varies.
        let mut t = HashTree::with_hasher(MappedHasher::new(|k| (k << 60) | 0x0ABC_DEF0_1234_5678));
        run_ops(&mut t, ops)?;
    }

    #[test]
    fn prop_find_common(
        a in prop::collection::btree_set(0u32..4096, 0..600),
        b in prop::collection::btree_set(0u32..4096, 0..600),
    ) {
        let ta: HashTreeSet<u32> = a.iter().map(|&k| (k, ())).collect();
        let tb: HashTreeSet<u32> = b.iter().map(|&k| (k, ())).collect();
        let disjoint = a.is_disjoint(&b);

        for (x, y, xs, ys) in [(&ta, &tb, &a, &b), (&tb, &ta, &b, &a)] {
            match x.find_common(y) {
                Some((k, _)) => {
                    prop_assert!(xs.contains(k) && ys.contains(k));
                }
                None => prop_assert!(disjoint),
            }
        }
    }

    #[test]
    fn prop_remove_all_reclaims(keys in prop::collection::btree_set(any::<u64>(), 0..3000)) {
        let mut t: HashTreeSet<u64> = keys.iter().map(|&k| (k, ())).collect();
        validate_tree(&t);
        for k in &keys {
            prop_assert_eq!(t.remove(k), Some(()));
        }
        prop_assert!(t.is_empty());
        prop_assert_eq!(t.stats(), TreeStats::default());
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

/// Hashes agree on every chunk but the last, so a few dozen keys already
/// reach the collision lists.
fn deep_tree() -> HashTree<u64, u64, MappedHasher> {
    let mut t = HashTree::with_hasher(MappedHasher::new(|k| (k % 4) << 60));
    for k in PADDING {
        t.insert(k, 0);
    }
    t
}

const PADDING: std::ops::Range<u64> = 100..100 + 2 * LEAF_CAP4 as u64;

#[test]
fn exhaustive_insert_order_small_set() {
    let keys: Vec<u64> = vec![0, 1, 2, 3, 4, 5, 6];

    for_each_permutation(&keys, |perm| {
        let mut t = deep_tree();
        let mut m: BTreeMap<u64, u64> = PADDING.map(|k| (k, 0)).collect();

        for (i, k) in perm.into_iter().enumerate() {
            let v = i as u64;
            assert_eq!(t.upsert(k, v), m.insert(k, v));
        }

        validate_tree(&t);
        let mut got: Vec<(u64, u64)> = t.iter().map(|(k, v)| (*k, *v)).collect();
        got.sort_unstable();
        let expected: Vec<(u64, u64)> = m.into_iter().collect();
        assert_eq!(got, expected);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys: Vec<u64> = vec![0, 1, 2, 3, 4, 5, 6];

    // Insert in a fixed order, then remove in all permutations.
    let mut base_tree = deep_tree();
    let mut base_map: BTreeMap<u64, u64> = PADDING.map(|k| (k, 0)).collect();
    for (i, &k) in keys.iter().enumerate() {
        let v = i as u64;
        assert_eq!(base_tree.insert(k, v), base_map.insert(k, v).is_none());
    }

    for_each_permutation(&keys, |perm| {
        let mut t = base_tree.clone();
        let mut m = base_map.clone();

        for k in perm {
            assert_eq!(t.remove(&k), m.remove(&k));
            assert_eq!(t.len(), m.len());
            validate_tree(&t);
        }
        assert_eq!(t.len(), PADDING.count());
        for k in PADDING {
            assert_eq!(t.remove(&k), Some(0));
        }
        assert!(t.root.is_empty());
    });
}

#[test]
fn burst_and_merge_thresholds_stay_valid() {
    // Cross the burst threshold and walk back below it, validating each step.
    let mut t: HashTree<u64, u64> = HashTree::new();
    let mut live = BTreeSet::new();
    for round in 0..4u64 {
        for k in 0..(LEAF_CAP4 as u64 + 2 + round * 20) {
            if t.insert(k, k) {
                live.insert(k);
            }
            validate_tree(&t);
        }
        for k in (0..LEAF_CAP4 as u64 + 2 + round * 20).step_by(2) {
            assert_eq!(t.remove(&k).is_some(), live.remove(&k));
            validate_tree(&t);
        }
    }
    assert_eq!(t.len(), live.len());
    for k in live {
        assert_eq!(t.get(&k), Some(&k));
    }
}
