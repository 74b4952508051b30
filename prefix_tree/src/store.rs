//! Per-level sparse node storage.
//!
//! Each level maps a node's 32-byte local index to its record; an index with
//! no entry is the empty subtree. `OrderMap` keeps entries in a dense slab
//! whose capacity the caller can steer, which matters when one experimental
//! batch materializes `O(leaves * height)` nodes. Iteration order over a
//! level is unspecified and nothing may depend on it.

use ordermap::OrderMap;
use serde::{Deserialize, Serialize};

use crate::index::Index;

/// A 32-byte Merkle hash.
pub type Hash = [u8; 32];

/// The sentinel hash of an absent subtree.
pub const EMPTY_HASH: Hash = [0u8; 32];

/// A materialized tree node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub hash: Hash,
    /// Set when the node was first materialized during the batch in
    /// progress; cleared by the post-batch reset.
    pub fresh: bool,
}

pub type Level = OrderMap<Index, Node>;

/// A fixed-height stack of sparse levels, root first.
#[derive(Debug, Default)]
pub struct LevelStore {
    levels: Vec<Level>,
}

impl LevelStore {
    pub fn new(height: usize) -> Self {
        LevelStore {
            levels: vec![Level::new(); height],
        }
    }

    pub fn height(&self) -> usize {
        self.levels.len()
    }

    pub fn get(&self, level: usize, index: &Index) -> Option<&Node> {
        self.levels[level].get(index)
    }

    pub fn get_mut(&mut self, level: usize, index: &Index) -> Option<&mut Node> {
        self.levels[level].get_mut(index)
    }

    /// Inserts or overwrites the record at `(level, index)`.
    pub fn put(&mut self, level: usize, index: Index, node: Node) {
        self.levels[level].insert(index, node);
    }

    pub fn remove(&mut self, level: usize, index: &Index) -> Option<Node> {
        self.levels[level].swap_remove(index)
    }

    pub fn len(&self, level: usize) -> usize {
        self.levels[level].len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(Level::is_empty)
    }

    /// Total entry count across all levels.
    pub fn total(&self) -> usize {
        self.levels.iter().map(Level::len).sum()
    }

    pub fn iter_level(&self, level: usize) -> impl Iterator<Item = (&Index, &Node)> {
        self.levels[level].iter()
    }

    /// Grows a level's capacity ahead of a batch of known size.
    pub fn reserve(&mut self, level: usize, additional: usize) {
        self.levels[level].reserve(additional);
    }
}
