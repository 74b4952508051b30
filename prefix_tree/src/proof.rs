//! Append-only proof construction and verification.
//!
//! A proof tree is a second sparse tree with the same geometry as the main
//! tree. It holds exactly the nodes a verifier needs to recompute two root
//! hashes from one structure: folded with appended nodes blanked out it
//! yields the pre-batch root, folded verbatim it yields the post-batch
//! root. Nodes are copies; the proof tree never aliases main-tree records.
//!
//! Construction piggybacks on the insertion walk. For each inserted leaf
//! the walk ascends until it meets the *intersection*: the lowest ancestor
//! whose sibling already existed before the batch. The old sibling and the
//! appended ancestor are recorded there, and above it every sibling is
//! recorded unconditionally, with an absent sibling materialized as an
//! empty-hash node so the later passes can see it. Because successive
//! insertions overcount, a final compression pass deletes every proof node
//! that lies strictly above another, leaving an antichain.

use anyhow::{bail, Result};

use crate::index::{self, Index, ROOT};
use crate::smt::{NodeHasher, Tree, TreeError, TREE_HEIGHT};
use crate::store::{Hash, LevelStore, Node, EMPTY_HASH};

/// The partial tree backing one batch's append-only proof.
#[derive(Debug)]
pub struct ProofTree {
    store: LevelStore,
}

impl ProofTree {
    /// Creates an empty proof tree for a main tree of the same `height`.
    pub fn new(height: usize) -> Self {
        assert!(
            (2..=TREE_HEIGHT).contains(&height),
            "tree height out of range"
        );
        ProofTree {
            store: LevelStore::new(height),
        }
    }

    pub fn height(&self) -> usize {
        self.store.height()
    }

    fn leaf_level(&self) -> usize {
        self.store.height() - 1
    }

    pub fn get(&self, level: usize, index: &Index) -> Option<&Node> {
        self.store.get(level, index)
    }

    /// Total count of proof nodes.
    pub fn node_count(&self) -> usize {
        self.store.total()
    }

    /// Count of proof nodes standing in for absent siblings.
    pub fn empty_sibling_count(&self) -> usize {
        self.entries().filter(|(_, _, n)| n.hash == EMPTY_HASH).count()
    }

    /// All proof nodes as `(level, index, node)`, root level first.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &Index, &Node)> {
        (0..self.store.height())
            .flat_map(move |level| self.store.iter_level(level).map(move |(ix, n)| (level, ix, n)))
    }

    /// Rebuilds a proof tree from flattened entries, e.g. received over the
    /// wire. Entries must respect the construction rules; a fresh node with
    /// the empty hash or an out-of-range level is rejected.
    pub fn from_entries<I>(height: usize, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, Index, Node)>,
    {
        let mut proof = ProofTree::new(height);
        for (level, index, node) in entries {
            if level >= height {
                bail!(TreeError::InvariantViolation("proof entry above the root"));
            }
            if node.fresh && node.hash == EMPTY_HASH {
                bail!(TreeError::InvariantViolation(
                    "appended proof node with the empty hash"
                ));
            }
            proof.store.put(level, index, node);
        }
        Ok(proof)
    }

    /// Records the proof-relevant nodes for a leaf just inserted into
    /// `main`. Must run after the insertion has updated every ancestor
    /// hash, because recorded hashes are the main tree's current values.
    pub(crate) fn observe_insertion<H: NodeHasher>(
        &mut self,
        main: &Tree<H>,
        leaf_index: &Index,
    ) -> Result<()> {
        assert_eq!(self.store.height(), main.height(), "tree geometry mismatch");
        let mut found_intersection = false;
        let mut node_index = *leaf_index;
        for level in (1..=self.leaf_level()).rev() {
            let sibling_index = index::sibling(&node_index);
            let sibling = main.get(level, &sibling_index);
            if !found_intersection {
                // An absent sibling is no intersection: the intersection is
                // the lowest ancestor whose sibling exists in the main tree
                // and predates the batch.
                if let Some(sibling_node) = sibling {
                    if !sibling_node.fresh {
                        self.add(level, sibling_index, sibling_node.hash, false)?;
                        let Some(ancestor) = main.get(level, &node_index) else {
                            bail!(TreeError::InvariantViolation(
                                "path node missing right after insertion"
                            ));
                        };
                        self.add(level, node_index, ancestor.hash, true)?;
                        found_intersection = true;
                    }
                }
            } else {
                match sibling {
                    Some(sibling_node) => {
                        if sibling_node.hash == EMPTY_HASH {
                            bail!(TreeError::InvariantViolation(
                                "main tree holds a node with the empty hash"
                            ));
                        }
                        self.add(level, sibling_index, sibling_node.hash, sibling_node.fresh)?;
                    }
                    None => self.add(level, sibling_index, EMPTY_HASH, false)?,
                }
            }
            node_index = index::parent(&node_index);
        }
        Ok(())
    }

    /// Inserts or updates one proof node. Re-adds refresh the stored hash
    /// (ancestor hashes move as the batch grows); the fresh flag may only
    /// ever be promoted.
    fn add(&mut self, level: usize, index: Index, hash: Hash, fresh: bool) -> Result<()> {
        if fresh && hash == EMPTY_HASH {
            bail!(TreeError::InvariantViolation(
                "appended proof node with the empty hash"
            ));
        }
        match self.store.get_mut(level, &index) {
            Some(node) => {
                if node.fresh && !fresh {
                    bail!(TreeError::InvariantViolation("proof node demoted to old"));
                }
                node.hash = hash;
                node.fresh = fresh;
            }
            None => self.store.put(level, index, Node { hash, fresh }),
        }
        Ok(())
    }

    /// Deletes every proof node lying strictly above another proof node,
    /// leaving an antichain under the ancestor relation. Idempotent.
    pub fn compress(&mut self) {
        let mut present: Vec<(usize, Index)> = Vec::with_capacity(self.node_count());
        for level in (0..self.store.height()).rev() {
            present.extend(self.store.iter_level(level).map(|(ix, _)| (level, *ix)));
        }
        for (level, ix) in present {
            let mut node_index = ix;
            for ancestor_level in (0..level).rev() {
                node_index = index::parent(&node_index);
                self.store.remove(ancestor_level, &node_index);
            }
        }
    }

    /// Reduces the proof tree to a root hash. With `old` set, appended
    /// nodes read as the empty hash, reproducing the pre-batch value of
    /// their location; otherwise every node contributes its recorded hash.
    /// The descent must bottom out on proof nodes: reaching an absent leaf
    /// slot means the proof does not cover the subtree it claims to.
    fn fold<H: NodeHasher>(
        &self,
        hasher: &H,
        level: usize,
        index: &Index,
        old: bool,
    ) -> Result<Hash> {
        if let Some(node) = self.store.get(level, index) {
            if old && node.fresh {
                return Ok(EMPTY_HASH);
            }
            return Ok(node.hash);
        }
        if level == self.leaf_level() {
            bail!(TreeError::InvariantViolation(
                "proof descent reached an absent leaf"
            ));
        }
        let left = self.fold(hasher, level + 1, &index::left_child(index), old)?;
        let right = self.fold(hasher, level + 1, &index::right_child(index), old)?;
        Ok(hasher.combine(&left, &right))
    }
}

/// Checks an append-only proof against the root hashes captured before and
/// after the batch. A mismatch on either fold is a verification failure;
/// structural damage to the proof tree is an error.
pub fn verify_append_only_proof<H: NodeHasher>(
    hasher: &H,
    proof: &ProofTree,
    old_root: &Hash,
    new_root: &Hash,
) -> Result<bool> {
    let recomputed_old = proof.fold(hasher, 0, &ROOT, true)?;
    if recomputed_old != *old_root {
        return Ok(false);
    }
    let recomputed_new = proof.fold(hasher, 0, &ROOT, false)?;
    Ok(recomputed_new == *new_root)
}
