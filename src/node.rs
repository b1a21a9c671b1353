//! Node references, occupancy bitmaps and hash chunking.
//!
//! Every subtree is designated by a [`NodeRef`], a closed sum type with one
//! owned handle per node variant:
//!
//! - `Empty`: no entries.
//! - `List`: collision chain, only at [`MAX_DEPTH`] once the hash is exhausted.
//! - `Leaf1`..`Leaf4`: sorted array leaves with capacities 6, 14, 22 and 30.
//! - `Branch`: popcount-addressed child array.
//!
//! Ownership is strictly tree shaped: each handle is a `Box` owned by exactly
//! one parent slot (or the tree root).

use std::hash::{BuildHasher, Hash};

use crate::branch::Branch;
use crate::leaf::{ArrayLeaf, ListLeaf};

// =============================================================================
// Configuration
// =============================================================================

pub(crate) const BITS_PER_LEVEL: u32 = 6;
pub(crate) const BRANCH_FACTOR: usize = 1 << BITS_PER_LEVEL;
/// Number of 6-bit chunks needed to cover a 64-bit hash. Nodes at depths
/// `0..MAX_DEPTH` consume one chunk each; depth `MAX_DEPTH` holds list leaves.
pub(crate) const MAX_DEPTH: usize = (64 + BITS_PER_LEVEL as usize - 1) / BITS_PER_LEVEL as usize;
pub(crate) const MIN_LEAF_SIZE: usize = 6;
pub(crate) const LEAF_BURST_THRESHOLD: usize = 30;

pub(crate) const fn leaf_capacity(size_class: usize) -> usize {
    MIN_LEAF_SIZE + (size_class - 1) * (LEAF_BURST_THRESHOLD - MIN_LEAF_SIZE) / 3
}

pub(crate) const LEAF_CAP1: usize = leaf_capacity(1);
pub(crate) const LEAF_CAP2: usize = leaf_capacity(2);
pub(crate) const LEAF_CAP3: usize = leaf_capacity(3);
pub(crate) const LEAF_CAP4: usize = leaf_capacity(4);

const _: () = assert!(MAX_DEPTH == 11);
const _: () = assert!(LEAF_CAP4 == LEAF_BURST_THRESHOLD);

// =============================================================================
// Hash chunks
// =============================================================================

/// The 6-bit slice of `hash` consumed at `depth`.
#[inline]
pub(crate) fn hash_chunk(hash: u64, depth: usize) -> u8 {
    debug_assert!(depth < MAX_DEPTH);
    ((hash >> (depth as u32 * BITS_PER_LEVEL)) & (BRANCH_FACTOR as u64 - 1)) as u8
}

#[inline]
pub(crate) fn hash_key<K: Hash + ?Sized, S: BuildHasher>(hasher: &S, key: &K) -> u64 {
    hasher.hash_one(key)
}

// =============================================================================
// Occupancy bitmap
// =============================================================================

/// 64-bit occupancy mask: bit `i` set means an entry or child exists for
/// chunk value `i` at this node.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Occupation(pub(crate) u64);

impl Occupation {
    #[inline]
    pub(crate) fn test(self, chunk: u8) -> bool {
        self.0 & (1u64 << chunk) != 0
    }

    #[inline]
    pub(crate) fn set(&mut self, chunk: u8) {
        self.0 |= 1u64 << chunk;
    }

    #[inline]
    pub(crate) fn clear(&mut self, chunk: u8) {
        self.0 &= !(1u64 << chunk);
    }

    /// Number of set bits strictly below `chunk`: the packed-array index of
    /// the child for `chunk`.
    #[inline]
    pub(crate) fn rank(self, chunk: u8) -> usize {
        (self.0 & ((1u64 << chunk) - 1)).count_ones() as usize
    }

    #[inline]
    pub(crate) fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    #[inline]
    pub(crate) fn intersect(self, other: Occupation) -> Occupation {
        Occupation(self.0 & other.0)
    }

    #[inline]
    pub(crate) fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set chunk values in increasing order.
    pub(crate) fn chunks(self) -> impl Iterator<Item = u8> {
        let mut mask = self.0;
        std::iter::from_fn(move || {
            if mask == 0 {
                return None;
            }
            let chunk = mask.trailing_zeros() as u8;
            mask &= mask - 1;
            Some(chunk)
        })
    }
}

impl std::fmt::Debug for Occupation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

// =============================================================================
// Entries and node references
// =============================================================================

#[derive(Clone, Debug)]
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
}

/// What an insert does when the key is already stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Duplicate {
    Keep,
    Replace,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Insertion<V> {
    Inserted,
    Present,
    Replaced(V),
}

impl<K, V> Entry<K, V> {
    /// Applies `incoming` to this stored entry with the same key.
    pub(crate) fn collide(&mut self, incoming: Entry<K, V>, on_duplicate: Duplicate) -> Insertion<V> {
        match on_duplicate {
            Duplicate::Keep => Insertion::Present,
            Duplicate::Replace => Insertion::Replaced(std::mem::replace(&mut self.value, incoming.value)),
        }
    }
}

/// Array leaf size class, `One` being the smallest (capacity 6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum SizeClass {
    One,
    Two,
    Three,
    Four,
}

impl SizeClass {
    /// Smallest size class holding `n` entries.
    pub(crate) fn fitting(n: usize) -> SizeClass {
        debug_assert!(n <= LEAF_CAP4, "{n} entries exceed the largest leaf");
        if n <= LEAF_CAP1 {
            SizeClass::One
        } else if n <= LEAF_CAP2 {
            SizeClass::Two
        } else if n <= LEAF_CAP3 {
            SizeClass::Three
        } else {
            SizeClass::Four
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Variant tag of a [`NodeRef`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NodeKind {
    Empty,
    List,
    Leaf(SizeClass),
    Branch,
}

pub(crate) enum NodeRef<K, V> {
    Empty,
    List(Box<ListLeaf<K, V>>),
    Leaf1(Box<ArrayLeaf<K, V, LEAF_CAP1>>),
    Leaf2(Box<ArrayLeaf<K, V, LEAF_CAP2>>),
    Leaf3(Box<ArrayLeaf<K, V, LEAF_CAP3>>),
    Leaf4(Box<ArrayLeaf<K, V, LEAF_CAP4>>),
    Branch(Box<Branch<K, V>>),
}

impl<K, V> Default for NodeRef<K, V> {
    fn default() -> Self {
        NodeRef::Empty
    }
}

impl<K: Clone, V: Clone> Clone for NodeRef<K, V> {
    fn clone(&self) -> Self {
        match self {
            NodeRef::Empty => NodeRef::Empty,
            NodeRef::List(list) => NodeRef::List(list.clone()),
            NodeRef::Leaf1(leaf) => NodeRef::Leaf1(leaf.clone()),
            NodeRef::Leaf2(leaf) => NodeRef::Leaf2(leaf.clone()),
            NodeRef::Leaf3(leaf) => NodeRef::Leaf3(leaf.clone()),
            NodeRef::Leaf4(leaf) => NodeRef::Leaf4(leaf.clone()),
            NodeRef::Branch(branch) => NodeRef::Branch(branch.clone()),
        }
    }
}

impl<K, V> NodeRef<K, V> {
    #[inline]
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            NodeRef::Empty => NodeKind::Empty,
            NodeRef::List(_) => NodeKind::List,
            NodeRef::Leaf1(_) => NodeKind::Leaf(SizeClass::One),
            NodeRef::Leaf2(_) => NodeKind::Leaf(SizeClass::Two),
            NodeRef::Leaf3(_) => NodeKind::Leaf(SizeClass::Three),
            NodeRef::Leaf4(_) => NodeKind::Leaf(SizeClass::Four),
            NodeRef::Branch(_) => NodeKind::Branch,
        }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, NodeRef::Empty)
    }

    /// Cheap entry count estimate from the variant tag alone, without
    /// touching the pointee. Array leaves report their capacity, lists a
    /// single entry. Branches report [`BRANCH_FACTOR`] so that a parent never
    /// considers merging them.
    pub(crate) fn entries_estimate(&self) -> usize {
        match self.kind() {
            NodeKind::Empty => 0,
            NodeKind::List => 1,
            NodeKind::Leaf(SizeClass::One) => LEAF_CAP1,
            NodeKind::Leaf(SizeClass::Two) => LEAF_CAP2,
            NodeKind::Leaf(SizeClass::Three) => LEAF_CAP3,
            NodeKind::Leaf(SizeClass::Four) => LEAF_CAP4,
            NodeKind::Branch => BRANCH_FACTOR,
        }
    }

    /// Exact entry count for leaves; branches still report [`BRANCH_FACTOR`].
    pub(crate) fn entries(&self) -> usize {
        match self {
            NodeRef::Empty => 0,
            NodeRef::List(list) => list.len(),
            NodeRef::Leaf1(leaf) => leaf.len(),
            NodeRef::Leaf2(leaf) => leaf.len(),
            NodeRef::Leaf3(leaf) => leaf.len(),
            NodeRef::Leaf4(leaf) => leaf.len(),
            NodeRef::Branch(_) => BRANCH_FACTOR,
        }
    }

    /// Occupancy and sorted entries of an array leaf.
    #[inline]
    pub(crate) fn leaf_entries(&self) -> Option<(Occupation, &[Entry<K, V>])> {
        match self {
            NodeRef::Leaf1(leaf) => Some((leaf.occupation, &leaf.entries)),
            NodeRef::Leaf2(leaf) => Some((leaf.occupation, &leaf.entries)),
            NodeRef::Leaf3(leaf) => Some((leaf.occupation, &leaf.entries)),
            NodeRef::Leaf4(leaf) => Some((leaf.occupation, &leaf.entries)),
            _ => None,
        }
    }

    /// An empty node ready to absorb `n` entries at `depth`.
    pub(crate) fn with_room_for(n: usize, depth: usize) -> Self {
        debug_assert!(n > 0);
        if depth == MAX_DEPTH {
            // The first absorbed entry creates the list leaf.
            return NodeRef::Empty;
        }
        match SizeClass::fitting(n) {
            SizeClass::One => NodeRef::Leaf1(Box::new(ArrayLeaf::new())),
            SizeClass::Two => NodeRef::Leaf2(Box::new(ArrayLeaf::new())),
            SizeClass::Three => NodeRef::Leaf3(Box::new(ArrayLeaf::new())),
            SizeClass::Four => NodeRef::Leaf4(Box::new(ArrayLeaf::new())),
        }
    }
}

impl<K: Ord + Hash, V> NodeRef<K, V> {
    /// Stores an entry known to be absent into a leaf with spare room.
    pub(crate) fn absorb(&mut self, hash: u64, depth: usize, entry: Entry<K, V>) {
        match self {
            NodeRef::Empty if depth == MAX_DEPTH => {
                trace_log!(depth, "list leaf created at hash exhaustion");
                *self = NodeRef::List(Box::new(ListLeaf::new(entry)));
            }
            NodeRef::Empty => {
                let mut leaf = ArrayLeaf::new();
                leaf.insert_unique(hash_chunk(hash, depth), entry);
                *self = NodeRef::Leaf1(Box::new(leaf));
            }
            NodeRef::List(list) => list.push(entry),
            NodeRef::Leaf1(leaf) => leaf.insert_unique(hash_chunk(hash, depth), entry),
            NodeRef::Leaf2(leaf) => leaf.insert_unique(hash_chunk(hash, depth), entry),
            NodeRef::Leaf3(leaf) => leaf.insert_unique(hash_chunk(hash, depth), entry),
            NodeRef::Leaf4(leaf) => leaf.insert_unique(hash_chunk(hash, depth), entry),
            NodeRef::Branch(_) => unreachable!("entries are only absorbed into leaves"),
        }
    }

    /// Moves every entry of this subtree into `target`, which consumes chunk
    /// `depth` of each entry's hash.
    pub(crate) fn drain_into<S: BuildHasher>(self, target: &mut NodeRef<K, V>, depth: usize, hasher: &S) {
        match self {
            NodeRef::Empty => {}
            NodeRef::List(list) => absorb_all(target, depth, hasher, list.into_entries()),
            NodeRef::Leaf1(leaf) => absorb_all(target, depth, hasher, leaf.entries),
            NodeRef::Leaf2(leaf) => absorb_all(target, depth, hasher, leaf.entries),
            NodeRef::Leaf3(leaf) => absorb_all(target, depth, hasher, leaf.entries),
            NodeRef::Leaf4(leaf) => absorb_all(target, depth, hasher, leaf.entries),
            NodeRef::Branch(branch) => {
                for child in branch.children {
                    child.drain_into(target, depth, hasher);
                }
            }
        }
    }
}

fn absorb_all<K, V, S, I>(target: &mut NodeRef<K, V>, depth: usize, hasher: &S, entries: I)
where
    K: Ord + Hash,
    S: BuildHasher,
    I: IntoIterator<Item = Entry<K, V>>,
{
    for entry in entries {
        let hash = hash_key(hasher, &entry.key);
        target.absorb(hash, depth, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacities() {
        assert_eq!(
            [LEAF_CAP1, LEAF_CAP2, LEAF_CAP3, LEAF_CAP4],
            [6, 14, 22, 30]
        );
    }

    #[test]
    fn test_size_class_fitting() {
        assert_eq!(SizeClass::fitting(1), SizeClass::One);
        assert_eq!(SizeClass::fitting(6), SizeClass::One);
        assert_eq!(SizeClass::fitting(7), SizeClass::Two);
        assert_eq!(SizeClass::fitting(14), SizeClass::Two);
        assert_eq!(SizeClass::fitting(15), SizeClass::Three);
        assert_eq!(SizeClass::fitting(22), SizeClass::Three);
        assert_eq!(SizeClass::fitting(23), SizeClass::Four);
        assert_eq!(SizeClass::fitting(30), SizeClass::Four);
    }

    #[test]
    fn test_hash_chunk() {
        let hash = 0xFEDC_BA98_7654_3210u64;
        assert_eq!(hash_chunk(hash, 0), (hash & 63) as u8);
        assert_eq!(hash_chunk(hash, 1), ((hash >> 6) & 63) as u8);
        // The last chunk only has the top 4 bits.
        assert_eq!(hash_chunk(hash, 10), (hash >> 60) as u8);
        assert_eq!(hash_chunk(u64::MAX, 10), 15);
    }

    #[test]
    fn test_occupation_rank() {
        let mut occ = Occupation::default();
        for chunk in [3u8, 9, 40, 63] {
            occ.set(chunk);
        }
        assert_eq!(occ.count(), 4);
        assert_eq!(occ.rank(0), 0);
        assert_eq!(occ.rank(3), 0);
        assert_eq!(occ.rank(4), 1);
        assert_eq!(occ.rank(40), 2);
        assert_eq!(occ.rank(63), 3);
        assert_eq!(occ.chunks().collect::<Vec<_>>(), vec![3, 9, 40, 63]);

        occ.clear(9);
        assert!(!occ.test(9));
        assert_eq!(occ.rank(40), 1);
    }

    #[test]
    fn test_estimate_bounds_exact() {
        let mut node: NodeRef<u32, ()> = NodeRef::with_room_for(10, 0);
        assert_eq!(node.kind(), NodeKind::Leaf(SizeClass::Two));
        node.absorb(5, 0, Entry { key: 5, value: () });
        node.absorb(9, 0, Entry { key: 9, value: () });
        assert_eq!(node.entries(), 2);
        assert_eq!(node.entries_estimate(), LEAF_CAP2);
        assert!(NodeRef::<u32, ()>::Empty.entries_estimate() == 0);
    }
}
