//! # Merkle Tree Construction
//!
//! Builds the tree the on-chain verifier expects, bit for bit:
//!
//! - **Leaf**: `keccak256(keccak256(abi_encode(address, amountWei)))` — the
//!   double hash over the 64-byte ABI encoding of the `(address, uint256)`
//!   tuple, matching the contract's
//!   `keccak256(bytes.concat(keccak256(abi.encode(addr, amount))))`.
//! - **Internal node**: `keccak256(min || max)` — child hashes ordered by
//!   unsigned big-endian byte comparison before concatenation. Sorted-pair
//!   hashing lets the verifier walk a proof without position bits.
//! - **Odd levels**: a lone trailing node is promoted unchanged to the next
//!   level. It contributes no sibling at that level, so its proof is one
//!   element shorter there.
//!
//! A single-leaf tree has root equal to the leaf and an empty proof.
//!
//! Proofs are emitted per leaf as the ordered sibling list from leaf level
//! up to (but excluding) the root, serialized as comma-joined
//! `0x`-prefixed 32-byte hex strings.

use alloy_primitives::U256;
use sha3::{Digest, Keccak256};

use crate::address::EthAddress;
use crate::whitelist::WhitelistEntry;

/// A 32-byte keccak digest.
pub type Hash32 = [u8; 32];

/// Per-leaf output of a build: everything the proofs table stores except
/// the whitelist name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProofRecord {
    /// EIP-55 checksummed address, the proofs-table sort key.
    pub address: String,
    /// Exact wei amount as a base-10 string.
    pub amount_wei: String,
    /// Comma-joined hex siblings; empty for a single-leaf tree.
    pub proof: String,
}

/// The result of building a tree over a validated whitelist.
#[derive(Debug, Clone)]
pub struct MerkleOutput {
    /// `0x`-prefixed 32-byte root hash.
    pub root: String,
    /// One record per input entry, in input order.
    pub records: Vec<MerkleProofRecord>,
}

/// Plain keccak256.
pub fn keccak256(data: &[u8]) -> Hash32 {
    Keccak256::digest(data).into()
}

/// ABI-encodes an `(address, uint256)` tuple: the address left-padded to
/// 32 bytes, followed by the amount as a 32-byte big-endian integer.
fn abi_encode_entry(address: &EthAddress, amount_wei: &U256) -> [u8; 64] {
    let mut out = [0u8; 64];
    out[12..32].copy_from_slice(address.as_bytes());
    out[32..64].copy_from_slice(&amount_wei.to_be_bytes::<32>());
    out
}

/// The double-keccak leaf hash for one whitelist entry.
pub fn leaf_hash(address: &EthAddress, amount_wei: &U256) -> Hash32 {
    let inner = keccak256(&abi_encode_entry(address, amount_wei));
    keccak256(&inner)
}

/// Hashes an ordered pair: smaller hash first by unsigned byte comparison.
fn parent_hash(a: &Hash32, b: &Hash32) -> Hash32 {
    let mut hasher = Keccak256::new();
    if a <= b {
        hasher.update(a);
        hasher.update(b);
    } else {
        hasher.update(b);
        hasher.update(a);
    }
    hasher.finalize().into()
}

/// A fully materialized tree: every level, leaves first.
struct Levels(Vec<Vec<Hash32>>);

impl Levels {
    /// Builds all levels bottom-up. `leaves` must be non-empty.
    fn build(leaves: Vec<Hash32>) -> Self {
        let mut levels = vec![leaves];
        while levels.last().expect("at least one level").len() > 1 {
            let current = levels.last().expect("at least one level");
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                match pair {
                    [left, right] => next.push(parent_hash(left, right)),
                    // Lone trailing node: promoted unchanged.
                    [lone] => next.push(*lone),
                    _ => unreachable!("chunks(2) yields 1 or 2 elements"),
                }
            }
            levels.push(next);
        }
        Self(levels)
    }

    fn root(&self) -> Hash32 {
        self.0.last().expect("at least one level")[0]
    }

    /// Sibling path for the leaf at `index`, bottom-up, excluding the root.
    /// A promoted node has no sibling at that level and contributes nothing.
    fn proof_for(&self, index: usize) -> Vec<Hash32> {
        let mut proof = Vec::new();
        let mut i = index;
        for level in &self.0[..self.0.len() - 1] {
            let sibling = i ^ 1;
            if sibling < level.len() {
                proof.push(level[sibling]);
            }
            i /= 2;
        }
        proof
    }
}

/// Builds the tree over validated entries and emits the root plus one proof
/// record per entry.
///
/// The caller (the CSV input gate) guarantees at least one entry; an empty
/// slice yields an all-zero root and no records.
pub fn build_whitelist_tree(entries: &[WhitelistEntry]) -> MerkleOutput {
    if entries.is_empty() {
        return MerkleOutput {
            root: hex32(&[0u8; 32]),
            records: Vec::new(),
        };
    }

    let leaves: Vec<Hash32> = entries
        .iter()
        .map(|e| leaf_hash(&e.address, &e.amount_wei))
        .collect();
    let levels = Levels::build(leaves);

    let records = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| MerkleProofRecord {
            address: entry.address.checksummed(),
            amount_wei: entry.amount_wei.to_string(),
            proof: format_proof(&levels.proof_for(i)),
        })
        .collect();

    MerkleOutput {
        root: hex32(&levels.root()),
        records,
    }
}

/// `0x` + 64 lowercase hex chars.
pub fn hex32(hash: &Hash32) -> String {
    format!("0x{}", hex::encode(hash))
}

/// Serializes a sibling path as a comma-joined hex string.
pub fn format_proof(siblings: &[Hash32]) -> String {
    siblings
        .iter()
        .map(hex32)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parses a comma-joined proof string back into sibling hashes. The empty
/// string is the empty proof.
pub fn parse_proof(proof: &str) -> Option<Vec<Hash32>> {
    if proof.is_empty() {
        return Some(Vec::new());
    }
    proof.split(',').map(parse_hex32).collect()
}

/// Parses a `0x`-prefixed 32-byte hex string.
pub fn parse_hex32(s: &str) -> Option<Hash32> {
    let body = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if body.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(body, &mut out).ok()?;
    Some(out)
}

/// Verifies a sibling path against a root — the same fold the on-chain
/// verifier performs. Used by tests and operator tooling.
pub fn verify_proof(root: &Hash32, leaf: &Hash32, siblings: &[Hash32]) -> bool {
    let mut current = *leaf;
    for sibling in siblings {
        current = parent_hash(&current, sibling);
    }
    current == *root
}
