//! # Account Addresses
//!
//! A 20-byte account address with EIP-55 handling. Three representations of
//! the same address are accepted on input — all-lowercase, all-uppercase, or
//! the mixed-case checksum form — and exactly one leaves this module: the
//! checksummed string. Every key in the proofs table and every leaf in a
//! tree uses that canonical form, so a caller may query with any casing that
//! validates and still hit the stored record.

use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Length of the textual form: `0x` + 40 hex chars.
const ADDRESS_STR_LEN: usize = 42;

/// Why an address string was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// Not `^(0x|0X)[0-9A-Fa-f]{40}$`.
    #[error("address must be 0x followed by 40 hexadecimal characters")]
    Syntax,

    /// The zero address never belongs on a whitelist.
    #[error("the zero address is not allowed")]
    Zero,

    /// Mixed-case input that does not match its EIP-55 checksum.
    #[error("address failed EIP-55 checksum validation")]
    Checksum,
}

/// A validated 20-byte account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EthAddress([u8; 20]);

impl EthAddress {
    /// Parses and fully validates an address string: syntax, non-zero, and
    /// EIP-55 casing rules (mixed case must match the checksum; uniform
    /// case is accepted as checksum-agnostic).
    pub fn parse_checked(s: &str) -> Result<Self, AddressError> {
        if s.len() != ADDRESS_STR_LEN {
            return Err(AddressError::Syntax);
        }
        let (prefix, body) = s.split_at(2);
        if prefix != "0x" && prefix != "0X" {
            return Err(AddressError::Syntax);
        }
        if !body.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AddressError::Syntax);
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(body.to_ascii_lowercase(), &mut bytes)
            .map_err(|_| AddressError::Syntax)?;

        if bytes == [0u8; 20] {
            return Err(AddressError::Zero);
        }

        let has_lower = body.bytes().any(|b| b.is_ascii_lowercase());
        let has_upper = body.bytes().any(|b| b.is_ascii_uppercase());
        if has_lower && has_upper {
            // Mixed case is a checksum claim; hold it to that claim.
            let expected = checksum_body(&bytes);
            if body != expected {
                return Err(AddressError::Checksum);
            }
        }

        Ok(Self(bytes))
    }

    /// The canonical EIP-55 mixed-case string, `0x`-prefixed.
    pub fn checksummed(&self) -> String {
        format!("0x{}", checksum_body(&self.0))
    }

    /// Raw address bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Display for EthAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.checksummed())
    }
}

/// Computes the EIP-55 body (40 chars, no prefix): each hex letter is
/// uppercased when the corresponding nibble of
/// `keccak256(lowercase_hex_body)` is >= 8.
fn checksum_body(bytes: &[u8; 20]) -> String {
    let lower = hex::encode(bytes);
    let digest = Keccak256::digest(lower.as_bytes());

    let mut out = String::with_capacity(40);
    for (i, ch) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            digest[i / 2] >> 4
        } else {
            digest[i / 2] & 0x0f
        };
        if ch.is_ascii_alphabetic() && nibble >= 8 {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
    }
    out
}
