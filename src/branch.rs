//! Branch nodes.
//!
//! A branch stores exactly `popcount(occupation)` children, ordered by chunk
//! value and addressed by popcount rank. A clear bit means "no child"; an
//! empty child is never stored.

use std::hash::{BuildHasher, Hash};

use crate::leaf::ArrayLeaf;
use crate::node::{
    hash_chunk, hash_key, NodeRef, Occupation, BRANCH_FACTOR, LEAF_BURST_THRESHOLD, LEAF_CAP1,
    LEAF_CAP4,
};

/// Child-array allocation granularity in slots (64 bytes of references).
pub(crate) const CHILD_BLOCK: usize = 4;

/// Capacity reserved for `len` children. Rounding to [`CHILD_BLOCK`] keeps
/// the number of distinct allocation sizes small and lets most single-child
/// insertions and removals reuse the existing buffer.
#[inline]
pub(crate) fn child_capacity(len: usize) -> usize {
    len.div_ceil(CHILD_BLOCK) * CHILD_BLOCK
}

pub(crate) struct Branch<K, V> {
    pub(crate) occupation: Occupation,
    pub(crate) children: Vec<NodeRef<K, V>>,
}

impl<K, V> Branch<K, V> {
    fn with_occupation(occupation: Occupation) -> Self {
        Self {
            occupation,
            children: Vec::with_capacity(child_capacity(occupation.count())),
        }
    }

    /// Packed-array index for `chunk` when its bit is set.
    #[inline]
    pub(crate) fn locate(&self, chunk: u8) -> Option<usize> {
        self.occupation
            .test(chunk)
            .then(|| self.occupation.rank(chunk))
    }

    #[inline]
    pub(crate) fn child(&self, chunk: u8) -> Option<&NodeRef<K, V>> {
        self.locate(chunk).map(|idx| &self.children[idx])
    }

    #[inline]
    pub(crate) fn child_mut(&mut self, chunk: u8) -> Option<&mut NodeRef<K, V>> {
        let idx = self.locate(chunk)?;
        Some(&mut self.children[idx])
    }

    /// The child slot for `chunk`, inserting an empty one at its rank when
    /// the bit is clear. The caller must fill a new slot before returning.
    pub(crate) fn slot_for_insert(&mut self, chunk: u8) -> &mut NodeRef<K, V> {
        let idx = self.occupation.rank(chunk);
        if !self.occupation.test(chunk) {
            let len = self.children.len();
            if len == self.children.capacity() {
                self.children.reserve_exact(child_capacity(len + 1) - len);
            }
            self.children.insert(idx, NodeRef::Empty);
            self.occupation.set(chunk);
        }
        &mut self.children[idx]
    }

    /// Drops the (emptied) child slot for `chunk` and compacts the array.
    pub(crate) fn remove_child(&mut self, chunk: u8, idx: usize) {
        debug_assert!(self.children[idx].is_empty());
        self.children.remove(idx);
        self.occupation.clear(chunk);
        let wanted = child_capacity(self.children.len());
        if wanted < self.children.capacity() {
            self.children.shrink_to(wanted);
        }
    }

    pub(crate) fn heap_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.children.capacity() * std::mem::size_of::<NodeRef<K, V>>()
    }
}

impl<K: Ord + Hash, V> Branch<K, V> {
    /// Splits a full top-size-class leaf at `depth` into a branch whose
    /// children sit at `depth + 1`, each sized to the entries it receives.
    pub(crate) fn burst<S: BuildHasher>(
        leaf: &mut ArrayLeaf<K, V, LEAF_CAP4>,
        depth: usize,
        hasher: &S,
    ) -> Self {
        let occupation = leaf.occupation;
        let mut branch = Self::with_occupation(occupation);

        let hashes: Vec<u64> = leaf
            .entries
            .iter()
            .map(|entry| hash_key(hasher, &entry.key))
            .collect();
        let mut sizes = [0u8; BRANCH_FACTOR];
        for &hash in &hashes {
            sizes[occupation.rank(hash_chunk(hash, depth))] += 1;
        }
        for &n in &sizes[..occupation.count()] {
            branch
                .children
                .push(NodeRef::with_room_for(n as usize, depth + 1));
        }

        // Source entries are sorted, so each child receives a sorted run.
        for (entry, hash) in leaf.entries.drain(..).zip(hashes) {
            let idx = occupation.rank(hash_chunk(hash, depth));
            branch.children[idx].absorb(hash, depth + 1, entry);
        }
        leaf.occupation = Occupation::default();

        debug_log!(
            depth,
            children = branch.children.len(),
            "leaf burst into branch"
        );
        branch
    }

    /// After a child was removed, folds the remaining children into a single
    /// leaf at `depth` when they hold fewer than [`LEAF_BURST_THRESHOLD`]
    /// entries together. Returns the replacement node, or `None` when the
    /// branch stays.
    pub(crate) fn merge_down<S: BuildHasher>(&mut self, depth: usize, hasher: &S) -> Option<NodeRef<K, V>> {
        let num_children = self.children.len();
        if num_children == 0 {
            return Some(NodeRef::Empty);
        }

        // Assume every child is in the smallest size class.
        if num_children * LEAF_CAP1 > LEAF_BURST_THRESHOLD {
            return None;
        }

        // Bound from the variant tags only, without visiting the children.
        let mut estimate = 0;
        for child in &self.children {
            estimate += child.entries_estimate();
            if estimate >= LEAF_BURST_THRESHOLD {
                break;
            }
        }
        if estimate >= LEAF_BURST_THRESHOLD {
            return None;
        }

        // List leaves are estimated as a single entry, so recount exactly.
        let exact: usize = self.children.iter().map(NodeRef::entries).sum();
        if exact >= LEAF_BURST_THRESHOLD {
            return None;
        }

        let mut merged = NodeRef::with_room_for(exact, depth);
        for child in self.children.drain(..) {
            child.drain_into(&mut merged, depth, hasher);
        }
        self.occupation = Occupation::default();

        debug_log!(depth, entries = exact, "branch merged into leaf");
        Some(merged)
    }
}

impl<K: Clone, V: Clone> Clone for Branch<K, V> {
    fn clone(&self) -> Self {
        let mut children = Vec::with_capacity(child_capacity(self.children.len()));
        children.extend(self.children.iter().cloned());
        Self {
            occupation: self.occupation,
            children,
        }
    }
}
