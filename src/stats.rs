//! Structure statistics and debug dumps.

use std::fmt::{self, Write};

use crate::leaf::{ArrayLeaf, ListLeaf, ListNode};
use crate::node::{NodeKind, NodeRef, SizeClass};
use crate::HashTree;

/// Node census of a [`HashTree`], gathered by a full traversal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Stored entries, counted in the leaves.
    pub entries: usize,
    pub branches: usize,
    /// Array leaves per size class, smallest class first.
    pub array_leaves: [usize; 4],
    pub list_leaves: usize,
    /// Depth of the deepest node; the root is at depth 0.
    pub max_depth: usize,
    /// Bytes allocated for nodes, excluding heap data owned by keys and values.
    pub heap_bytes: usize,
}

impl TreeStats {
    fn visit<K, V>(&mut self, node: &NodeRef<K, V>, depth: usize) {
        if node.is_empty() {
            return;
        }
        self.max_depth = self.max_depth.max(depth);
        match node {
            NodeRef::Empty => {}
            NodeRef::List(list) => {
                self.list_leaves += 1;
                self.entries += list.len();
                self.heap_bytes += std::mem::size_of::<ListLeaf<K, V>>()
                    + list.len() * std::mem::size_of::<ListNode<K, V>>();
            }
            NodeRef::Leaf1(leaf) => self.add_leaf(SizeClass::One, leaf.len(), std::mem::size_of_val(&**leaf)),
            NodeRef::Leaf2(leaf) => self.add_leaf(SizeClass::Two, leaf.len(), std::mem::size_of_val(&**leaf)),
            NodeRef::Leaf3(leaf) => self.add_leaf(SizeClass::Three, leaf.len(), std::mem::size_of_val(&**leaf)),
            NodeRef::Leaf4(leaf) => self.add_leaf(SizeClass::Four, leaf.len(), std::mem::size_of_val(&**leaf)),
            NodeRef::Branch(branch) => {
                self.branches += 1;
                self.heap_bytes += branch.heap_bytes();
                for child in &branch.children {
                    self.visit(child, depth + 1);
                }
            }
        }
    }

    fn add_leaf(&mut self, class: SizeClass, len: usize, bytes: usize) {
        self.array_leaves[class.index()] += 1;
        self.entries += len;
        self.heap_bytes += bytes;
    }
}

impl<K, V, S> HashTree<K, V, S> {
    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats::default();
        stats.visit(&self.root, 0);
        stats
    }

    /// Approximate heap footprint of the node structure.
    pub fn memory_usage(&self) -> usize {
        self.stats().heap_bytes
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> HashTree<K, V, S> {
    /// Indented rendering of the node structure, one node per line.
    pub fn dump(&self) -> String {
        Dump(self).to_string()
    }
}

struct Dump<'a, K, V, S>(&'a HashTree<K, V, S>);

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Display for Dump<'_, K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "HashTree (len={})", self.0.len)?;
        dump_node(f, &self.0.root, 1, None)
    }
}

fn dump_node<K: fmt::Debug, V: fmt::Debug, W: Write>(
    out: &mut W,
    node: &NodeRef<K, V>,
    depth: usize,
    chunk: Option<u8>,
) -> fmt::Result {
    let indent = "  ".repeat(depth);
    let label = match chunk {
        Some(chunk) => format!("[{chunk:2}] "),
        None => String::new(),
    };
    match node {
        NodeRef::Empty => writeln!(out, "{indent}{label}(empty)"),
        NodeRef::List(list) => {
            write!(out, "{indent}{label}List len={}:", list.len())?;
            for entry in list.iter() {
                write!(out, " {:?}={:?}", entry.key, entry.value)?;
            }
            writeln!(out)
        }
        NodeRef::Leaf1(leaf) => dump_leaf(out, &indent, &label, node.kind(), &**leaf),
        NodeRef::Leaf2(leaf) => dump_leaf(out, &indent, &label, node.kind(), &**leaf),
        NodeRef::Leaf3(leaf) => dump_leaf(out, &indent, &label, node.kind(), &**leaf),
        NodeRef::Leaf4(leaf) => dump_leaf(out, &indent, &label, node.kind(), &**leaf),
        NodeRef::Branch(branch) => {
            writeln!(
                out,
                "{indent}{label}Branch occ={:?} children={}",
                branch.occupation,
                branch.children.len()
            )?;
            for (chunk, child) in branch.occupation.chunks().zip(&branch.children) {
                dump_node(out, child, depth + 1, Some(chunk))?;
            }
            Ok(())
        }
    }
}

fn dump_leaf<K: fmt::Debug, V: fmt::Debug, W: Write, const CAP: usize>(
    out: &mut W,
    indent: &str,
    label: &str,
    kind: NodeKind,
    leaf: &ArrayLeaf<K, V, CAP>,
) -> fmt::Result {
    write!(
        out,
        "{indent}{label}{kind:?} {}/{CAP} occ={:?}:",
        leaf.len(),
        leaf.occupation
    )?;
    for entry in &leaf.entries {
        write!(out, " {:?}={:?}", entry.key, entry.value)?;
    }
    writeln!(out)
}
