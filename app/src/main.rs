//! Measures append-only proof sizes for the sparse Merkle prefix tree.
//!
//! Seeds the tree with one dummy leaf, then appends batches of leaves with
//! proof construction switched on. For every batch it compresses and
//! verifies the proof, prints one CSV row on stdout with node counts and
//! timings, and clears the batch flags before the next round.

use std::time::Instant;

use anyhow::{ensure, Result};
use clap::Parser;
use prefix_tree::index::{Index, ROOT};
use prefix_tree::proof::{verify_append_only_proof, ProofTree};
use prefix_tree::protocol::{ProofTranscript, RootClaims};
use prefix_tree::smt::{Tree, TREE_HEIGHT};
use prefix_tree::store::Hash;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "append-bench",
    about = "Append-only proof size experiment over a 257-level SHA-256 prefix tree"
)]
struct Args {
    /// Number of batches to append.
    #[arg(long, default_value_t = 8)]
    batches: usize,

    /// Leaves inserted per batch.
    #[arg(long, default_value_t = 1024)]
    batch_size: usize,

    /// Seed for the workload generator.
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Draw leaf indices from a seeded RNG instead of the SHA-256 chain.
    #[arg(long)]
    random: bool,
}

/// Produces batches of (leaf index, data hash) pairs.
enum Workload {
    /// Iterated SHA-256 starting from `sha256("seed=<n>")`.
    Chain { state: Hash },
    Rng(StdRng),
}

impl Workload {
    fn new(args: &Args) -> Self {
        if args.random {
            Workload::Rng(StdRng::seed_from_u64(args.seed))
        } else {
            Workload::Chain {
                state: sha256(format!("seed={}", args.seed).as_bytes()),
            }
        }
    }

    fn next_leaf(&mut self) -> (Index, Hash) {
        let index = match self {
            Workload::Chain { state } => {
                *state = sha256(&state[..]);
                *state
            }
            Workload::Rng(rng) => rng.gen(),
        };
        let data = sha256(format!("Data for leaf {}", hex::encode(index)).as_bytes());
        (index, data)
    }
}

fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let hasher = Sha256::new();
    let mut tree: Tree<Sha256> = Tree::new(TREE_HEIGHT);
    tree.reserve(args.batches * args.batch_size + 1);

    // Seed so the first batch extends a non-empty tree.
    tree.insert(&hasher, ROOT, sha256(b"Dummy leaf"), None)?;
    info!(root = %hex::encode(tree.root_hash()?), "seeded tree with the dummy leaf");

    let mut workload = Workload::new(&args);
    println!(
        "batch,leaves,tree_nodes,proof_nodes_raw,proof_nodes,empty_siblings,transcript_bytes,insert_ms,verify_ms,ok"
    );

    for batch in 0..args.batches {
        let leaves: Vec<(Index, Hash)> =
            (0..args.batch_size).map(|_| workload.next_leaf()).collect();
        let old_root = tree.root_hash()?;
        let mut proof = ProofTree::new(TREE_HEIGHT);

        let inserting = Instant::now();
        for (index, data) in &leaves {
            tree.insert(&hasher, *index, *data, Some(&mut proof))?;
        }
        let insert_ms = inserting.elapsed().as_secs_f64() * 1e3;

        let new_root = tree.root_hash()?;
        let raw_nodes = proof.node_count();
        proof.compress();

        let verifying = Instant::now();
        let ok = verify_append_only_proof(&hasher, &proof, &old_root, &new_root)?;
        let verify_ms = verifying.elapsed().as_secs_f64() * 1e3;

        let transcript =
            ProofTranscript::from_proof(&proof, RootClaims { old_root, new_root });
        let transcript_bytes = serde_json::to_vec(&transcript)?.len();

        println!(
            "{},{},{},{},{},{},{},{:.3},{:.3},{}",
            batch,
            leaves.len(),
            tree.node_count(),
            raw_nodes,
            proof.node_count(),
            proof.empty_sibling_count(),
            transcript_bytes,
            insert_ms,
            verify_ms,
            ok
        );
        ensure!(ok, "append-only proof for batch {} did not verify", batch);

        tree.clear_new_flags()?;
    }

    info!(
        nodes = tree.node_count(),
        root = %hex::encode(tree.root_hash()?),
        "experiment finished"
    );
    Ok(())
}
