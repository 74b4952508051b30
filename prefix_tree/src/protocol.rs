//! Wire form of an append-only proof.
//!
//! A proof tree flattens to a list of `(level, index, hash, fresh)` entries
//! plus the two root hashes it commits to, so a prover process can hand the
//! whole obligation to a remote verifier.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::index::Index;
use crate::proof::ProofTree;
use crate::store::{Hash, Node};

/// The root hashes an append-only proof commits to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RootClaims {
    pub old_root: Hash,
    pub new_root: Hash,
}

/// One proof-tree node in wire form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProofEntry {
    pub level: u16,
    pub index: Index,
    pub hash: Hash,
    pub fresh: bool,
}

/// A flattened proof tree plus its root claims, ready for transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofTranscript {
    pub height: u16,
    pub entries: Vec<ProofEntry>,
    pub claims: RootClaims,
}

impl ProofTranscript {
    pub fn from_proof(proof: &ProofTree, claims: RootClaims) -> Self {
        let entries = proof
            .entries()
            .map(|(level, index, node)| ProofEntry {
                level: level as u16,
                index: *index,
                hash: node.hash,
                fresh: node.fresh,
            })
            .collect();
        ProofTranscript {
            height: proof.height() as u16,
            entries,
            claims,
        }
    }

    /// Rebuilds the proof tree on the receiving side.
    pub fn into_proof(self) -> Result<(ProofTree, RootClaims)> {
        let proof = ProofTree::from_entries(
            self.height as usize,
            self.entries.into_iter().map(|e| {
                (
                    e.level as usize,
                    e.index,
                    Node {
                        hash: e.hash,
                        fresh: e.fresh,
                    },
                )
            }),
        )?;
        Ok((proof, self.claims))
    }
}
