//! Append-only sparse Merkle prefix tree over a 256-bit leaf address space.
//!
//! The dense form of the tree would hold `2^257 - 1` nodes; here each of the
//! 257 levels is a sparse map from a node's local index to its record, and
//! absence stands for the all-zero *empty* subtree hash. On top of the tree,
//! [`proof`] builds and verifies append-only (consistency) proofs: compact
//! partial trees from which a verifier who only knows the old and new root
//! hashes can confirm that a batch of insertions added leaves and changed
//! nothing else.

pub mod index;
pub mod proof;
pub mod protocol;
pub mod smt;
pub mod store;
