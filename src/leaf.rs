//! Leaf nodes.
//!
//! [`ArrayLeaf`] keeps up to `CAP` entries sorted by key together with an
//! occupancy bitmap over the hash chunks of its entries at the leaf's depth.
//! A clear bit answers a miss without comparing any keys. Entries sharing a
//! chunk are not bucketed separately; they are told apart by key order.
//!
//! [`ListLeaf`] is the collision chain used once all hash chunks have been
//! consumed.

use std::hash::{BuildHasher, Hash};

use arrayvec::ArrayVec;

use crate::node::{hash_chunk, hash_key, Duplicate, Entry, Insertion, Occupation};

// =============================================================================
// Array leaf
// =============================================================================

#[derive(Clone)]
pub(crate) struct ArrayLeaf<K, V, const CAP: usize> {
    pub(crate) occupation: Occupation,
    pub(crate) entries: ArrayVec<Entry<K, V>, CAP>,
}

impl<K, V, const CAP: usize> ArrayLeaf<K, V, CAP> {
    pub(crate) fn new() -> Self {
        Self {
            occupation: Occupation::default(),
            entries: ArrayVec::new(),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Moves all entries into a leaf of another size class at the same depth.
    /// Order and occupancy carry over unchanged.
    pub(crate) fn resize<const TO: usize>(&mut self) -> ArrayLeaf<K, V, TO> {
        debug_assert!(self.len() <= TO);
        let mut resized = ArrayLeaf {
            occupation: self.occupation,
            entries: ArrayVec::new(),
        };
        for entry in self.entries.drain(..) {
            resized.entries.push(entry);
        }
        self.occupation = Occupation::default();
        resized
    }
}

impl<K: Ord, V, const CAP: usize> ArrayLeaf<K, V, CAP> {
    #[inline]
    fn search(&self, key: &K) -> Result<usize, usize> {
        self.entries.binary_search_by(|entry| entry.key.cmp(key))
    }

    pub(crate) fn find(&self, chunk: u8, key: &K) -> Option<&Entry<K, V>> {
        if !self.occupation.test(chunk) {
            return None;
        }
        self.search(key).ok().map(|idx| &self.entries[idx])
    }

    pub(crate) fn find_mut(&mut self, chunk: u8, key: &K) -> Option<&mut Entry<K, V>> {
        if !self.occupation.test(chunk) {
            return None;
        }
        let idx = self.search(key).ok()?;
        Some(&mut self.entries[idx])
    }

    /// Inserts `entry` at its sorted position.
    ///
    /// A present key is resolved per `on_duplicate` without changing the
    /// leaf's shape. A new key that does not fit is handed back as `Err`.
    pub(crate) fn try_insert(
        &mut self,
        chunk: u8,
        entry: Entry<K, V>,
        on_duplicate: Duplicate,
    ) -> Result<Insertion<V>, Entry<K, V>> {
        let idx = match self.search(&entry.key) {
            Ok(idx) => {
                debug_assert!(self.occupation.test(chunk));
                return Ok(self.entries[idx].collide(entry, on_duplicate));
            }
            Err(idx) => idx,
        };
        if self.entries.is_full() {
            return Err(entry);
        }
        self.entries.insert(idx, entry);
        self.occupation.set(chunk);
        Ok(Insertion::Inserted)
    }

    /// Inserts an entry whose key is known to be absent into a leaf with room.
    pub(crate) fn insert_unique(&mut self, chunk: u8, entry: Entry<K, V>) {
        let idx = match self.search(&entry.key) {
            Ok(idx) => {
                debug_assert!(false, "duplicate key absorbed into leaf");
                idx
            }
            Err(idx) => idx,
        };
        self.entries.insert(idx, entry);
        self.occupation.set(chunk);
    }

    /// Removes `key`, clearing its occupancy bit only when no remaining entry
    /// shares the chunk.
    pub(crate) fn remove<S>(&mut self, chunk: u8, depth: usize, key: &K, hasher: &S) -> Option<Entry<K, V>>
    where
        K: Hash,
        S: BuildHasher,
    {
        if !self.occupation.test(chunk) {
            return None;
        }
        let idx = self.search(key).ok()?;
        let removed = self.entries.remove(idx);
        let shared = self
            .entries
            .iter()
            .any(|entry| hash_chunk(hash_key(hasher, &entry.key), depth) == chunk);
        if !shared {
            self.occupation.clear(chunk);
        }
        Some(removed)
    }
}

// =============================================================================
// List leaf
// =============================================================================

pub(crate) struct ListNode<K, V> {
    pub(crate) entry: Entry<K, V>,
    pub(crate) next: Option<Box<ListNode<K, V>>>,
}

/// Singly linked chain of entries whose hashes are fully identical.
pub(crate) struct ListLeaf<K, V> {
    head: Option<Box<ListNode<K, V>>>,
    len: usize,
}

impl<K, V> ListLeaf<K, V> {
    pub(crate) fn new(entry: Entry<K, V>) -> Self {
        Self {
            head: Some(Box::new(ListNode { entry, next: None })),
            len: 1,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn head(&self) -> Option<&ListNode<K, V>> {
        self.head.as_deref()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Entry<K, V>> {
        let mut cursor = self.head.as_deref();
        std::iter::from_fn(move || {
            let node = cursor?;
            cursor = node.next.as_deref();
            Some(&node.entry)
        })
    }

    /// Prepends an entry known to be absent.
    pub(crate) fn push(&mut self, entry: Entry<K, V>) {
        let next = self.head.take();
        self.head = Some(Box::new(ListNode { entry, next }));
        self.len += 1;
    }

    pub(crate) fn into_entries(mut self: Box<Self>) -> impl Iterator<Item = Entry<K, V>> {
        let mut cursor = self.head.take();
        self.len = 0;
        std::iter::from_fn(move || {
            let mut node = cursor.take()?;
            cursor = node.next.take();
            Some(node.entry)
        })
    }
}

impl<K: Eq, V> ListLeaf<K, V> {
    pub(crate) fn find(&self, key: &K) -> Option<&Entry<K, V>> {
        self.iter().find(|entry| entry.key == *key)
    }

    pub(crate) fn find_mut(&mut self, key: &K) -> Option<&mut Entry<K, V>> {
        let mut cursor = self.head.as_deref_mut();
        while let Some(node) = cursor {
            if node.entry.key == *key {
                return Some(&mut node.entry);
            }
            cursor = node.next.as_deref_mut();
        }
        None
    }

    /// Appends `entry` unless its key is already linked.
    pub(crate) fn insert(&mut self, entry: Entry<K, V>, on_duplicate: Duplicate) -> Insertion<V> {
        let mut cursor = &mut self.head;
        loop {
            match cursor {
                Some(node) => {
                    if node.entry.key == entry.key {
                        return node.entry.collide(entry, on_duplicate);
                    }
                    cursor = &mut node.next;
                }
                None => break,
            }
        }
        *cursor = Some(Box::new(ListNode { entry, next: None }));
        self.len += 1;
        Insertion::Inserted
    }

    /// Unlinks the entry for `key`. The caller drops the leaf once it is empty.
    pub(crate) fn remove(&mut self, key: &K) -> Option<Entry<K, V>> {
        let mut cursor = &mut self.head;
        while cursor.as_ref().is_some_and(|node| node.entry.key != *key) {
            cursor = &mut cursor.as_mut()?.next;
        }
        let mut node = cursor.take()?;
        *cursor = node.next.take();
        self.len -= 1;
        Some(node.entry)
    }
}

impl<K: Clone, V: Clone> Clone for ListLeaf<K, V> {
    fn clone(&self) -> Self {
        let entries: Vec<Entry<K, V>> = self.iter().cloned().collect();
        let head = entries
            .into_iter()
            .rev()
            .fold(None, |next, entry| Some(Box::new(ListNode { entry, next })));
        Self { head, len: self.len }
    }
}

impl<K, V> Drop for ListLeaf<K, V> {
    fn drop(&mut self) {
        // Unlink iteratively so long chains do not recurse in `Box` drop.
        let mut cursor = self.head.take();
        while let Some(mut node) = cursor {
            cursor = node.next.take();
        }
    }
}
