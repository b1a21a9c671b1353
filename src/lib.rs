//! # hash-tree
//!
//! An adaptive hash trie used as an unordered set or map.
//!
//! Keys are hashed once to 64 bits and the hash is consumed six bits per
//! level. Small populations live in sorted array leaves that grow through
//! four size classes (6, 14, 22 and 30 entries); a full top-class leaf bursts
//! into a 64-way branch whose children are packed by popcount rank. Removal
//! shrinks leaves again and folds sparse branches back into a single leaf.
//! Keys whose full hashes collide end up in a collision list at the bottom
//! level.
//!
//! ## Example
//!
//! ```rust
//! use hash_tree::{HashTree, HashTreeSet};
//!
//! let mut a: HashTreeSet<u32> = HashTreeSet::new();
//! let mut b: HashTreeSet<u32> = HashTreeSet::new();
//! for k in [1, 2, 3] {
//!     a.insert_key(k);
//! }
//! for k in [3, 4, 5] {
//!     b.insert_key(k);
//! }
//! assert_eq!(a.find_common(&b).map(|(k, _)| *k), Some(3));
//!
//! let mut m: HashTree<&str, u64> = HashTree::new();
//! assert!(m.insert("one", 1));
//! assert!(!m.insert("one", 100));
//! assert_eq!(m.upsert("one", 11), Some(1));
//! assert_eq!(m.get(&"one"), Some(&11));
//! ```

#![forbid(unsafe_code)]

#[macro_use]
mod trace;

mod branch;
mod leaf;
mod node;
mod stats;

#[cfg(test)]
mod proptests;
#[cfg(test)]
mod testing;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::iter::FusedIterator;
use std::ops::ControlFlow;

pub use rustc_hash::FxBuildHasher;
pub use stats::TreeStats;

use branch::Branch;
use leaf::ListNode;
use node::{
    hash_chunk, hash_key, Duplicate, Entry, Insertion, NodeRef, Occupation, LEAF_CAP1, LEAF_CAP2,
    LEAF_CAP3, LEAF_CAP4,
};

// =============================================================================
// HashTree
// =============================================================================

/// Unordered map from `K` to `V`, stored as an adaptive hash trie.
///
/// `S` builds the 64-bit hash of each key. [`HashTree::find_common`] is
/// fastest when both trees hash identically, which is always the case for
/// the default [`FxBuildHasher`].
pub struct HashTree<K, V = (), S = FxBuildHasher> {
    root: NodeRef<K, V>,
    len: usize,
    hasher: S,
}

/// A [`HashTree`] carrying no values.
pub type HashTreeSet<K, S = FxBuildHasher> = HashTree<K, (), S>;

impl<K, V> HashTree<K, V, FxBuildHasher> {
    pub fn new() -> Self {
        Self::with_hasher(FxBuildHasher)
    }
}

impl<K, V, S> HashTree<K, V, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            root: NodeRef::Empty,
            len: 0,
            hasher,
        }
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Removes every entry and releases all nodes.
    pub fn clear(&mut self) {
        self.root = NodeRef::Empty;
        self.len = 0;
    }

    /// Calls `visitor` on every entry until it returns `Break`.
    ///
    /// Returns `true` when the visitor stopped the traversal early. The visit
    /// order is deterministic for a given tree shape but otherwise unspecified.
    pub fn for_each<F>(&self, mut visitor: F) -> bool
    where
        F: FnMut(&K, &V) -> ControlFlow<()>,
    {
        for_each_recurse(&self.root, &mut visitor).is_break()
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut stack = Vec::new();
        if !self.root.is_empty() {
            stack.push(&self.root);
        }
        Iter {
            stack,
            leaf: <&[Entry<K, V>]>::default().iter(),
            list: None,
            remaining: self.len,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, value)| value)
    }
}

impl<K: Ord + Hash, V, S: BuildHasher> HashTree<K, V, S> {
    /// Inserts `key` unless it is already present.
    ///
    /// Returns `true` when the entry was added. An existing entry keeps its
    /// value and the tree is left untouched.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        match self.insert_with(Entry { key, value }, Duplicate::Keep) {
            Insertion::Inserted => true,
            Insertion::Present | Insertion::Replaced(_) => false,
        }
    }

    /// Inserts `key` or overwrites the value of an existing entry, returning
    /// the previous value.
    pub fn upsert(&mut self, key: K, value: V) -> Option<V> {
        match self.insert_with(Entry { key, value }, Duplicate::Replace) {
            Insertion::Replaced(old) => Some(old),
            Insertion::Inserted | Insertion::Present => None,
        }
    }

    fn insert_with(&mut self, entry: Entry<K, V>, on_duplicate: Duplicate) -> Insertion<V> {
        let hash = hash_key(&self.hasher, &entry.key);
        let outcome = insert_recurse(&mut self.root, hash, 0, entry, on_duplicate, &self.hasher);
        if matches!(outcome, Insertion::Inserted) {
            self.len += 1;
        }
        outcome
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.get_key_value(key).map(|(_, value)| value)
    }

    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        let hash = hash_key(&self.hasher, key);
        find_entry(&self.root, hash, 0, key).map(|entry| (&entry.key, &entry.value))
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let hash = hash_key(&self.hasher, key);
        find_entry_mut(&mut self.root, hash, 0, key).map(|entry| &mut entry.value)
    }

    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.get_key_value(key).is_some()
    }

    /// Removes `key`, returning its value when it was present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let hash = hash_key(&self.hasher, key);
        let removed = remove_recurse(&mut self.root, hash, 0, key, &self.hasher)?;
        self.len -= 1;
        debug_assert_eq!(self.len == 0, self.root.is_empty());
        Some(removed.value)
    }

    /// Some entry of `self` whose key is also stored in `other`, or `None`
    /// when the key sets are disjoint.
    ///
    /// When both trees hash alike the two structures are intersected level
    /// by level. Otherwise, e.g. with two independently seeded hashers, every
    /// entry of `self` is looked up in `other` through its own hasher.
    pub fn find_common<'a, W>(&'a self, other: &HashTree<K, W, S>) -> Option<(&'a K, &'a V)> {
        let (sample, _) = self.iter().next()?;
        if other.is_empty() {
            return None;
        }
        if hash_key(&self.hasher, sample) != hash_key(&other.hasher, sample) {
            debug_log!("hashers disagree, looking up entries one by one");
            return self.iter().find(|(key, _)| other.contains(key));
        }
        find_common_recurse(&self.root, &other.root, 0, &self.hasher)
            .map(|entry| (&entry.key, &entry.value))
    }
}

impl<K: Ord + Hash, S: BuildHasher> HashTree<K, (), S> {
    /// Set insertion. Returns `true` when `key` was not yet present.
    pub fn insert_key(&mut self, key: K) -> bool {
        self.insert(key, ())
    }
}

impl<K, V, S: Default> Default for HashTree<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K: Clone, V: Clone, S: Clone> Clone for HashTree<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            len: self.len,
            hasher: self.hasher.clone(),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for HashTree<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Ord + Hash, V, S: BuildHasher + Default> FromIterator<(K, V)> for HashTree<K, V, S> {
    /// Keeps the first value seen for each key.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tree = Self::default();
        tree.extend(iter);
        tree
    }
}

impl<K: Ord + Hash, V, S: BuildHasher> Extend<(K, V)> for HashTree<K, V, S> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a HashTree<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// =============================================================================
// Recursive operations
// =============================================================================

fn insert_recurse<K, V, S>(
    node: &mut NodeRef<K, V>,
    hash: u64,
    depth: usize,
    entry: Entry<K, V>,
    on_duplicate: Duplicate,
    hasher: &S,
) -> Insertion<V>
where
    K: Ord + Hash,
    S: BuildHasher,
{
    match node {
        NodeRef::Empty => {
            node.absorb(hash, depth, entry);
            Insertion::Inserted
        }
        NodeRef::List(list) => list.insert(entry, on_duplicate),
        NodeRef::Leaf1(leaf) => {
            let chunk = hash_chunk(hash, depth);
            match leaf.try_insert(chunk, entry, on_duplicate) {
                Ok(outcome) => outcome,
                Err(entry) => {
                    let mut grown = leaf.resize::<LEAF_CAP2>();
                    grown.insert_unique(chunk, entry);
                    trace_log!(depth, "leaf promoted to size class 2");
                    *node = NodeRef::Leaf2(Box::new(grown));
                    Insertion::Inserted
                }
            }
        }
        NodeRef::Leaf2(leaf) => {
            let chunk = hash_chunk(hash, depth);
            match leaf.try_insert(chunk, entry, on_duplicate) {
                Ok(outcome) => outcome,
                Err(entry) => {
                    let mut grown = leaf.resize::<LEAF_CAP3>();
                    grown.insert_unique(chunk, entry);
                    trace_log!(depth, "leaf promoted to size class 3");
                    *node = NodeRef::Leaf3(Box::new(grown));
                    Insertion::Inserted
                }
            }
        }
        NodeRef::Leaf3(leaf) => {
            let chunk = hash_chunk(hash, depth);
            match leaf.try_insert(chunk, entry, on_duplicate) {
                Ok(outcome) => outcome,
                Err(entry) => {
                    let mut grown = leaf.resize::<LEAF_CAP4>();
                    grown.insert_unique(chunk, entry);
                    trace_log!(depth, "leaf promoted to size class 4");
                    *node = NodeRef::Leaf4(Box::new(grown));
                    Insertion::Inserted
                }
            }
        }
        NodeRef::Leaf4(leaf) => match leaf.try_insert(hash_chunk(hash, depth), entry, on_duplicate) {
            Ok(outcome) => outcome,
            Err(entry) => {
                let branch = Branch::burst(leaf, depth, hasher);
                *node = NodeRef::Branch(Box::new(branch));
                // The new key takes the ordinary branch path, which may
                // burst a child again when every entry shares this chunk.
                insert_recurse(node, hash, depth, entry, on_duplicate, hasher)
            }
        },
        NodeRef::Branch(branch) => {
            let slot = branch.slot_for_insert(hash_chunk(hash, depth));
            insert_recurse(slot, hash, depth + 1, entry, on_duplicate, hasher)
        }
    }
}

fn remove_recurse<K, V, S>(
    node: &mut NodeRef<K, V>,
    hash: u64,
    depth: usize,
    key: &K,
    hasher: &S,
) -> Option<Entry<K, V>>
where
    K: Ord + Hash,
    S: BuildHasher,
{
    match node {
        NodeRef::Empty => None,
        NodeRef::List(list) => {
            let removed = list.remove(key)?;
            if list.is_empty() {
                *node = NodeRef::Empty;
            }
            Some(removed)
        }
        NodeRef::Leaf1(leaf) => {
            let removed = leaf.remove(hash_chunk(hash, depth), depth, key, hasher)?;
            if leaf.len() == 0 {
                *node = NodeRef::Empty;
            }
            Some(removed)
        }
        NodeRef::Leaf2(leaf) => {
            let removed = leaf.remove(hash_chunk(hash, depth), depth, key, hasher)?;
            if leaf.len() == LEAF_CAP1 {
                let shrunk = leaf.resize();
                trace_log!(depth, "leaf demoted to size class 1");
                *node = NodeRef::Leaf1(Box::new(shrunk));
            }
            Some(removed)
        }
        NodeRef::Leaf3(leaf) => {
            let removed = leaf.remove(hash_chunk(hash, depth), depth, key, hasher)?;
            if leaf.len() == LEAF_CAP2 {
                let shrunk = leaf.resize();
                trace_log!(depth, "leaf demoted to size class 2");
                *node = NodeRef::Leaf2(Box::new(shrunk));
            }
            Some(removed)
        }
        NodeRef::Leaf4(leaf) => {
            let removed = leaf.remove(hash_chunk(hash, depth), depth, key, hasher)?;
            if leaf.len() == LEAF_CAP3 {
                let shrunk = leaf.resize();
                trace_log!(depth, "leaf demoted to size class 3");
                *node = NodeRef::Leaf3(Box::new(shrunk));
            }
            Some(removed)
        }
        NodeRef::Branch(branch) => {
            let chunk = hash_chunk(hash, depth);
            let idx = branch.locate(chunk)?;
            let removed = remove_recurse(&mut branch.children[idx], hash, depth + 1, key, hasher)?;
            if branch.children[idx].is_empty() {
                branch.remove_child(chunk, idx);
                if let Some(replacement) = branch.merge_down(depth, hasher) {
                    *node = replacement;
                }
            }
            Some(removed)
        }
    }
}

/// Looks `key` up in the subtree `node`, which consumes chunk `depth`.
fn find_entry<'a, K: Ord, V>(
    mut node: &'a NodeRef<K, V>,
    hash: u64,
    mut depth: usize,
    key: &K,
) -> Option<&'a Entry<K, V>> {
    loop {
        return match node {
            NodeRef::Empty => None,
            NodeRef::List(list) => list.find(key),
            NodeRef::Leaf1(leaf) => leaf.find(hash_chunk(hash, depth), key),
            NodeRef::Leaf2(leaf) => leaf.find(hash_chunk(hash, depth), key),
            NodeRef::Leaf3(leaf) => leaf.find(hash_chunk(hash, depth), key),
            NodeRef::Leaf4(leaf) => leaf.find(hash_chunk(hash, depth), key),
            NodeRef::Branch(branch) => {
                node = branch.child(hash_chunk(hash, depth))?;
                depth += 1;
                continue;
            }
        };
    }
}

fn find_entry_mut<'a, K: Ord, V>(
    node: &'a mut NodeRef<K, V>,
    hash: u64,
    depth: usize,
    key: &K,
) -> Option<&'a mut Entry<K, V>> {
    match node {
        NodeRef::Empty => None,
        NodeRef::List(list) => list.find_mut(key),
        NodeRef::Leaf1(leaf) => leaf.find_mut(hash_chunk(hash, depth), key),
        NodeRef::Leaf2(leaf) => leaf.find_mut(hash_chunk(hash, depth), key),
        NodeRef::Leaf3(leaf) => leaf.find_mut(hash_chunk(hash, depth), key),
        NodeRef::Leaf4(leaf) => leaf.find_mut(hash_chunk(hash, depth), key),
        NodeRef::Branch(branch) => {
            let child = branch.child_mut(hash_chunk(hash, depth))?;
            find_entry_mut(child, hash, depth + 1, key)
        }
    }
}

/// An entry of `a` whose key is also in `b`. Both subtrees sit at `depth`
/// along the same hash path.
fn find_common_recurse<'a, K, V, W, S>(
    a: &'a NodeRef<K, V>,
    b: &NodeRef<K, W>,
    depth: usize,
    hasher: &S,
) -> Option<&'a Entry<K, V>>
where
    K: Ord + Hash,
    S: BuildHasher,
{
    match (a, b) {
        (NodeRef::Empty, _) | (_, NodeRef::Empty) => None,
        (NodeRef::List(list), _) => list
            .iter()
            .find(|entry| find_entry(b, hash_key(hasher, &entry.key), depth, &entry.key).is_some()),
        (_, NodeRef::List(list)) => list
            .iter()
            .find_map(|entry| find_entry(a, hash_key(hasher, &entry.key), depth, &entry.key)),
        (NodeRef::Branch(x), NodeRef::Branch(y)) => x
            .occupation
            .intersect(y.occupation)
            .chunks()
            .find_map(|chunk| {
                let (x_child, y_child) = (x.child(chunk)?, y.child(chunk)?);
                find_common_recurse(x_child, y_child, depth + 1, hasher)
            }),
        (NodeRef::Branch(_), _) => {
            let (_, entries) = b.leaf_entries()?;
            entries
                .iter()
                .find_map(|entry| find_entry(a, hash_key(hasher, &entry.key), depth, &entry.key))
        }
        (_, NodeRef::Branch(_)) => {
            let (_, entries) = a.leaf_entries()?;
            entries
                .iter()
                .find(|entry| find_entry(b, hash_key(hasher, &entry.key), depth, &entry.key).is_some())
        }
        _ => {
            let (a_occupation, a_entries) = a.leaf_entries()?;
            let (b_occupation, b_entries) = b.leaf_entries()?;
            common_in_leaves(a_occupation, a_entries, b_occupation, b_entries)
        }
    }
}

/// Merge scan of two sorted leaves at the same depth.
fn common_in_leaves<'a, K: Ord, V, W>(
    a_occupation: Occupation,
    a: &'a [Entry<K, V>],
    b_occupation: Occupation,
    b: &[Entry<K, W>],
) -> Option<&'a Entry<K, V>> {
    if a_occupation.intersect(b_occupation).is_empty() {
        return None;
    }
    let (a_first, a_last) = (a.first()?, a.last()?);
    let (b_first, b_last) = (b.first()?, b.last()?);
    if a_last.key < b_first.key || b_last.key < a_first.key {
        return None;
    }

    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].key.cmp(&b[j].key) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => return Some(&a[i]),
        }
    }
    None
}

fn for_each_recurse<K, V, F>(node: &NodeRef<K, V>, visitor: &mut F) -> ControlFlow<()>
where
    F: FnMut(&K, &V) -> ControlFlow<()>,
{
    match node {
        NodeRef::Empty => {}
        NodeRef::List(list) => {
            for entry in list.iter() {
                visitor(&entry.key, &entry.value)?;
            }
        }
        NodeRef::Branch(branch) => {
            for child in &branch.children {
                for_each_recurse(child, visitor)?;
            }
        }
        leaf => {
            if let Some((_, entries)) = leaf.leaf_entries() {
                for entry in entries {
                    visitor(&entry.key, &entry.value)?;
                }
            }
        }
    }
    ControlFlow::Continue(())
}

// =============================================================================
// Iterator
// =============================================================================

/// Borrowing iterator over the entries of a [`HashTree`], in the same order
/// as [`HashTree::for_each`].
pub struct Iter<'a, K, V> {
    stack: Vec<&'a NodeRef<K, V>>,
    leaf: std::slice::Iter<'a, Entry<K, V>>,
    list: Option<&'a ListNode<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.leaf.next() {
                self.remaining = self.remaining.saturating_sub(1);
                return Some((&entry.key, &entry.value));
            }
            if let Some(node) = self.list {
                self.list = node.next.as_deref();
                self.remaining = self.remaining.saturating_sub(1);
                return Some((&node.entry.key, &node.entry.value));
            }
            match self.stack.pop()? {
                NodeRef::Empty => {}
                NodeRef::List(list) => self.list = list.head(),
                NodeRef::Branch(branch) => self.stack.extend(branch.children.iter().rev()),
                leaf => {
                    if let Some((_, entries)) = leaf.leaf_entries() {
                        self.leaf = entries.iter();
                    }
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> FusedIterator for Iter<'_, K, V> {}
