// Copyright (c) 2026 Claimtree Labs. MIT License.
// See LICENSE for details.

//! # Claimtree — Core Library
//!
//! Claimtree turns operator-uploaded whitelists (CSV files of
//! `address -> token amount`) into keccak256 Merkle trees whose roots and
//! proofs are consumed by an on-chain verifier contract. End users fetch the
//! published root, their own membership proof, or page through the catalog of
//! trees.
//!
//! The interesting part is not the hashing — it is keeping two stores honest
//! with each other. Whitelist CSVs live in an object store; roots and proofs
//! live in a key-value store. No transaction spans both, and a tree's proof
//! rows do not fit in a single KV transaction, so every tree carries a status
//! (`CREATING -> COMPLETED / FAILED -> DELETING -> gone`) and every status
//! change is a conditional write pinned to the previously observed state.
//! Partial failures roll forward into `FAILED`, never into silence.
//!
//! ## Architecture
//!
//! - **address / amount** — EIP-55 address handling and decimal-to-wei
//!   parsing. Everything downstream assumes these already said yes.
//! - **whitelist** — the CSV input gate: header, row cap, per-row
//!   validation, duplicate detection.
//! - **merkle** — double-keccak leaves over abi-encoded `(address, uint256)`
//!   tuples, sorted-pair internal nodes, per-leaf proof emission.
//! - **store** — the two adapters and their backends. The KV adapter owns
//!   chunking, the unprocessed-items retry loop, and conditional writes; the
//!   object adapter owns naming rules and overwrite preconditions.
//! - **lifecycle** — the orchestrator. The only writer of the roots table,
//!   and the only module allowed to reason about status transitions.
//! - **query** — the read path. Only `COMPLETED` trees are readable.
//! - **config / error** — process-wide configuration and the error taxonomy
//!   the HTTP layer serializes.

pub mod address;
pub mod amount;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod merkle;
pub mod query;
pub mod store;
pub mod types;
pub mod whitelist;
