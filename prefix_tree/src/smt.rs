//! The main append-only tree.
//!
//! A fixed-height binary prefix tree whose leaves live at level 256 and
//! whose 2^256 leaf slots are addressed by 256-bit local indices. Only
//! materialized nodes are stored; every absent subtree contributes the
//! all-zero empty hash when its parent is combined. Interior hashes are
//! SHA-256 over the raw 64-byte concatenation of the two child hashes,
//! with no domain separation, so a run of absent siblings still yields a
//! deterministic non-empty chain as one ascends.
//!
//! Insertion walks from the leaf to the root in strict order, materializing
//! missing ancestors and recomputing each ancestor from its two children.
//! When a batch participates in proof construction, newly materialized
//! nodes are flagged and the proof tree is fed after each hash update (see
//! [`crate::proof`]).

use std::marker::PhantomData;

use anyhow::{bail, Result};
use digest::Digest;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::index::{self, Index, ROOT};
use crate::proof::ProofTree;
use crate::store::{Hash, LevelStore, Node, EMPTY_HASH};

/// Levels of the full tree: the root at 0, leaves at 256.
pub const TREE_HEIGHT: usize = 257;

/// Longest possible leaf-to-root sibling path.
pub const MAX_PATH_LEN: usize = TREE_HEIGHT - 1;

/// Error enum for the append-only tree.
#[derive(Debug)]
pub enum TreeError {
    /// Thrown when inserting a leaf index that is already occupied.
    DuplicateLeaf,
    /// Thrown when the root hash of a tree with no nodes is requested.
    EmptyTree,
    /// Thrown when the given leaf is not in the path.
    InvalidLeaf,
    /// Thrown when the merkle path is invalid.
    InvalidPathNodes,
    /// Thrown when a structural invariant does not hold.
    InvariantViolation(&'static str),
}

impl core::fmt::Display for TreeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            TreeError::DuplicateLeaf => "Leaf index is already occupied".to_owned(),
            TreeError::EmptyTree => "Tree has no root".to_owned(),
            TreeError::InvalidLeaf => "Invalid leaf".to_owned(),
            TreeError::InvalidPathNodes => "Path nodes are not consistent".to_owned(),
            TreeError::InvariantViolation(what) => format!("Invariant violated: {}", what),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for TreeError {}

/// Combines two child hashes into their parent's hash.
pub trait NodeHasher {
    fn combine(&self, left: &Hash, right: &Hash) -> Hash;
}

impl NodeHasher for Sha256 {
    fn combine(&self, left: &Hash, right: &Hash) -> Hash {
        let mut h = Sha256::new();
        Digest::update(&mut h, left);
        Digest::update(&mut h, right);
        h.finalize().into()
    }
}

/// The main tree: 257 sparse levels plus the hasher marker.
pub struct Tree<H: NodeHasher> {
    store: LevelStore,
    marker: PhantomData<H>,
}

impl<H: NodeHasher> Tree<H> {
    /// Creates a tree of `height` levels, all empty. The experiments run at
    /// [`TREE_HEIGHT`]; shallower trees are accepted for exercising the
    /// algorithms on hand-checkable sizes.
    pub fn new(height: usize) -> Self {
        assert!(
            (2..=TREE_HEIGHT).contains(&height),
            "tree height out of range"
        );
        Tree {
            store: LevelStore::new(height),
            marker: PhantomData,
        }
    }

    pub fn height(&self) -> usize {
        self.store.height()
    }

    fn leaf_level(&self) -> usize {
        self.store.height() - 1
    }

    /// Grows each level's map for an expected number of additional leaves.
    pub fn reserve(&mut self, expected_leaves: usize) {
        for level in 0..self.store.height() {
            let slots = 1usize.checked_shl(level as u32).unwrap_or(usize::MAX);
            self.store.reserve(level, expected_leaves.min(slots));
        }
    }

    pub fn get(&self, level: usize, index: &Index) -> Option<&Node> {
        self.store.get(level, index)
    }

    /// Inserts or overwrites a record. Storing the empty hash anywhere above
    /// the leaf level is a programming error, not a representable state.
    pub fn put(&mut self, level: usize, index: Index, node: Node) {
        assert!(
            level == self.leaf_level() || node.hash != EMPTY_HASH,
            "empty hash stored at an interior level"
        );
        self.store.put(level, index, node);
    }

    /// Total count of materialized nodes across all levels.
    pub fn node_count(&self) -> usize {
        self.store.total()
    }

    pub fn iter_level(&self, level: usize) -> impl Iterator<Item = (&Index, &Node)> {
        self.store.iter_level(level)
    }

    pub fn contains_leaf(&self, leaf_index: &Index) -> bool {
        self.store.get(self.leaf_level(), leaf_index).is_some()
    }

    pub fn root_hash(&self) -> Result<Hash> {
        match self.store.get(0, &ROOT) {
            Some(node) => Ok(node.hash),
            None => Err(TreeError::EmptyTree.into()),
        }
    }

    /// Inserts `data_hash` at `leaf_index` and recomputes every ancestor up
    /// to the root.
    ///
    /// With a proof tree supplied, the batch is being proven: nodes
    /// materialized by this insertion are flagged fresh and the proof tree
    /// records the insertion once all ancestor hashes are current.
    pub fn insert(
        &mut self,
        hasher: &H,
        leaf_index: Index,
        data_hash: Hash,
        proof: Option<&mut ProofTree>,
    ) -> Result<()> {
        let leaf_level = self.leaf_level();
        if self.store.get(leaf_level, &leaf_index).is_some() {
            return Err(TreeError::DuplicateLeaf.into());
        }
        let tracking = proof.is_some();

        self.store.put(
            leaf_level,
            leaf_index,
            Node {
                hash: data_hash,
                fresh: tracking,
            },
        );

        let mut node_index = leaf_index;
        let mut node_hash = data_hash;
        for level in (1..=leaf_level).rev() {
            let sibling_index = index::sibling(&node_index);
            let sibling_hash = self
                .store
                .get(level, &sibling_index)
                .map_or(EMPTY_HASH, |n| n.hash);
            let (left, right) = if index::is_left_child(&node_index) {
                (node_hash, sibling_hash)
            } else {
                (sibling_hash, node_hash)
            };
            let parent_hash = hasher.combine(&left, &right);
            let parent_index = index::parent(&node_index);
            match self.store.get_mut(level - 1, &parent_index) {
                Some(node) => node.hash = parent_hash,
                None => self.store.put(
                    level - 1,
                    parent_index,
                    Node {
                        hash: parent_hash,
                        fresh: tracking,
                    },
                ),
            }
            node_index = parent_index;
            node_hash = parent_hash;
        }

        if let Some(proof) = proof {
            proof.observe_insertion(self, &leaf_index)?;
        }
        Ok(())
    }

    /// Clears the fresh flag on every materialized node by re-walking each
    /// leaf's path to the root. Run once per batch, after its proof has been
    /// compressed and verified.
    pub fn clear_new_flags(&mut self) -> Result<()> {
        let leaf_level = self.leaf_level();
        let leaves: Vec<Index> = self
            .store
            .iter_level(leaf_level)
            .map(|(index, _)| *index)
            .collect();
        for leaf in leaves {
            let mut node_index = leaf;
            for level in (0..=leaf_level).rev() {
                match self.store.get_mut(level, &node_index) {
                    Some(node) => node.fresh = false,
                    None => bail!(TreeError::InvariantViolation(
                        "ancestor missing on a materialized leaf's path"
                    )),
                }
                node_index = index::parent(&node_index);
            }
        }
        Ok(())
    }

    /// Gives the path leading from the leaf at `leaf_index` up to the root.
    /// Absent nodes contribute the empty hash, so the path is well defined
    /// for any leaf slot.
    pub fn membership_path(&self, leaf_index: &Index) -> Path {
        let mut path = heapless::Vec::new();
        let mut node_index = *leaf_index;
        for level in (1..=self.leaf_level()).rev() {
            let sibling_index = index::sibling(&node_index);
            let node_hash = self
                .store
                .get(level, &node_index)
                .map_or(EMPTY_HASH, |n| n.hash);
            let sibling_hash = self
                .store
                .get(level, &sibling_index)
                .map_or(EMPTY_HASH, |n| n.hash);
            let pair = if index::is_left_child(&node_index) {
                (node_hash, sibling_hash)
            } else {
                (sibling_hash, node_hash)
            };
            let _ = path.push(pair);
            node_index = index::parent(&node_index);
        }
        Path { path }
    }

    pub fn membership_proof(&self, leaf_index: &Index) -> Result<MembershipProof> {
        let leaf = self
            .store
            .get(self.leaf_level(), leaf_index)
            .map_or(EMPTY_HASH, |n| n.hash);
        Ok(MembershipProof {
            path: self.membership_path(leaf_index),
            root: self.root_hash()?,
            leaf,
        })
    }
}

/// The sibling path from a leaf to the root.
///
/// Each pair holds the two children feeding one step of the ascent, ordered
/// left then right. Consecutive pairs must chain: the hash combined out of
/// one pair appears in the next.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Path {
    pub path: heapless::Vec<(Hash, Hash), MAX_PATH_LEN>,
}

impl Path {
    /// Takes in an expected `root_hash` and leaf-level data for a leaf and
    /// checks that the leaf belongs to a tree having the expected root.
    pub fn check_membership<H: NodeHasher>(
        &self,
        root_hash: &Hash,
        leaf: &Hash,
        hasher: &H,
    ) -> Result<bool> {
        let root = self.calculate_root(leaf, hasher)?;
        Ok(root == *root_hash)
    }

    pub fn calculate_root<H: NodeHasher>(&self, leaf: &Hash, hasher: &H) -> Result<Hash> {
        if self.path.is_empty() || (*leaf != self.path[0].0 && *leaf != self.path[0].1) {
            return Err(TreeError::InvalidLeaf.into());
        }

        let mut prev = *leaf;
        for (left_hash, right_hash) in &self.path {
            if prev != *left_hash && prev != *right_hash {
                return Err(TreeError::InvalidPathNodes.into());
            }
            prev = hasher.combine(left_hash, right_hash);
        }
        Ok(prev)
    }
}

/// A membership path bundled with the root and leaf it commits to.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct MembershipProof {
    pub path: Path,
    pub root: Hash,
    pub leaf: Hash,
}

impl MembershipProof {
    pub fn verify<H: NodeHasher>(&self, hasher: &H) -> Result<bool> {
        self.path.check_membership(&self.root, &self.leaf, hasher)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::index::from_u64;
    use testresult::TestResult;

    fn sha256(data: &[u8]) -> Hash {
        Sha256::digest(data).into()
    }

    fn data_hash(n: u64) -> Hash {
        sha256(format!("leaf {}", n).as_bytes())
    }

    #[test]
    fn combine_matches_known_vector() {
        // SHA-256 over 64 zero bytes.
        let hasher = Sha256::new();
        let out = hasher.combine(&EMPTY_HASH, &EMPTY_HASH);
        assert_eq!(
            hex::encode(out),
            "f5a5fd42d16a20302798ef6ed309979b43003d2320d9f0e8ea9831a92759fb4b"
        );
        assert_ne!(out, EMPTY_HASH);
    }

    #[test]
    fn first_insert_materializes_every_level() -> TestResult {
        let hasher = Sha256::new();
        let mut tree: Tree<Sha256> = Tree::new(TREE_HEIGHT);
        let dummy = sha256(b"Dummy leaf");
        tree.insert(&hasher, ROOT, dummy, None)?;

        assert_eq!(tree.node_count(), TREE_HEIGHT);

        // The all-zero leaf is a left child the whole way up, so the root is
        // the 256-fold chain of combining with the empty hash on the right.
        let mut expected = dummy;
        for _ in 0..TREE_HEIGHT - 1 {
            expected = hasher.combine(&expected, &EMPTY_HASH);
        }
        assert_eq!(tree.root_hash()?, expected);
        Ok(())
    }

    #[test]
    fn empty_tree_has_no_root() {
        let tree: Tree<Sha256> = Tree::new(8);
        let err = tree.root_hash().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TreeError>(),
            Some(TreeError::EmptyTree)
        ));
    }

    #[test]
    fn duplicate_leaf_is_rejected_without_mutation() -> TestResult {
        let hasher = Sha256::new();
        let mut tree: Tree<Sha256> = Tree::new(16);
        tree.insert(&hasher, from_u64(11), data_hash(11), None)?;
        assert!(tree.contains_leaf(&from_u64(11)));
        assert!(!tree.contains_leaf(&from_u64(12)));
        let root = tree.root_hash()?;
        let count = tree.node_count();

        let err = tree
            .insert(&hasher, from_u64(11), data_hash(99), None)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TreeError>(),
            Some(TreeError::DuplicateLeaf)
        ));
        assert_eq!(tree.root_hash()?, root);
        assert_eq!(tree.node_count(), count);
        Ok(())
    }

    #[test]
    fn every_interior_hash_combines_its_children() -> TestResult {
        let hasher = Sha256::new();
        let mut tree: Tree<Sha256> = Tree::new(9);
        for n in [0u64, 3, 7, 200, 255] {
            tree.insert(&hasher, from_u64(n), data_hash(n), None)?;
        }
        for level in 0..tree.height() - 1 {
            let entries: Vec<(Index, Node)> =
                tree.iter_level(level).map(|(ix, n)| (*ix, *n)).collect();
            for (ix, node) in entries {
                let left = tree
                    .get(level + 1, &crate::index::left_child(&ix))
                    .map_or(EMPTY_HASH, |n| n.hash);
                let right = tree
                    .get(level + 1, &crate::index::right_child(&ix))
                    .map_or(EMPTY_HASH, |n| n.hash);
                assert_eq!(node.hash, hasher.combine(&left, &right));
                assert_ne!(node.hash, EMPTY_HASH);
            }
        }
        Ok(())
    }

    #[test]
    fn insertion_order_does_not_matter() -> TestResult {
        let hasher = Sha256::new();
        let leaves: Vec<(Index, Hash)> = (0..500u64)
            .map(|n| (sha256(format!("index {}", n).as_bytes()), data_hash(n)))
            .collect();

        let mut forward: Tree<Sha256> = Tree::new(TREE_HEIGHT);
        for (ix, data) in &leaves {
            forward.insert(&hasher, *ix, *data, None)?;
        }
        let mut backward: Tree<Sha256> = Tree::new(TREE_HEIGHT);
        for (ix, data) in leaves.iter().rev() {
            backward.insert(&hasher, *ix, *data, None)?;
        }

        assert_eq!(forward.root_hash()?, backward.root_hash()?);
        assert_eq!(forward.node_count(), backward.node_count());
        for level in 0..forward.height() {
            let mut a: Vec<Index> = forward.iter_level(level).map(|(ix, _)| *ix).collect();
            let mut b: Vec<Index> = backward.iter_level(level).map(|(ix, _)| *ix).collect();
            a.sort_unstable();
            b.sort_unstable();
            assert_eq!(a, b);
        }
        Ok(())
    }

    #[test]
    fn clear_new_flags_resets_the_whole_tree() -> TestResult {
        let hasher = Sha256::new();
        let mut tree: Tree<Sha256> = Tree::new(TREE_HEIGHT);
        tree.insert(&hasher, ROOT, sha256(b"Dummy leaf"), None)?;

        let mut proof = ProofTree::new(TREE_HEIGHT);
        for n in 1..20u64 {
            tree.insert(
                &hasher,
                sha256(format!("index {}", n).as_bytes()),
                data_hash(n),
                Some(&mut proof),
            )?;
        }
        let flagged: usize = (0..tree.height())
            .map(|l| tree.iter_level(l).filter(|(_, n)| n.fresh).count())
            .sum();
        assert!(flagged > 0);

        tree.clear_new_flags()?;
        for level in 0..tree.height() {
            assert!(tree.iter_level(level).all(|(_, n)| !n.fresh));
        }
        Ok(())
    }

    #[test]
    #[should_panic(expected = "empty hash stored at an interior level")]
    fn empty_hash_cannot_be_stored_above_the_leaves() {
        let mut tree: Tree<Sha256> = Tree::new(8);
        tree.put(
            3,
            from_u64(1),
            Node {
                hash: EMPTY_HASH,
                fresh: false,
            },
        );
    }

    #[test]
    fn membership_path_checks_out() -> TestResult {
        let hasher = Sha256::new();
        let mut tree: Tree<Sha256> = Tree::new(12);
        for n in [1u64, 5, 1000, 2047] {
            tree.insert(&hasher, from_u64(n), data_hash(n), None)?;
        }

        let proof = tree.membership_proof(&from_u64(5))?;
        assert_eq!(proof.leaf, data_hash(5));
        assert!(proof.verify(&hasher)?);

        // A path for one leaf does not admit another's data.
        let path = tree.membership_path(&from_u64(5));
        assert!(path.calculate_root(&data_hash(1), &hasher).is_err());
        Ok(())
    }

    #[test]
    fn membership_path_rejects_tampered_root() -> TestResult {
        let hasher = Sha256::new();
        let mut tree: Tree<Sha256> = Tree::new(12);
        tree.insert(&hasher, from_u64(77), data_hash(77), None)?;

        let mut proof = tree.membership_proof(&from_u64(77))?;
        assert!(proof.verify(&hasher)?);
        proof.root[0] ^= 1;
        assert!(!proof.verify(&hasher)?);
        Ok(())
    }
}
