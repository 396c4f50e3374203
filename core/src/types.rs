//! # Records & Status Model
//!
//! The two persisted row types and the tree status machine. The roots row
//! is the authoritative existence witness for a tree: exactly one row per
//! whitelist name while a tree exists, and its `MerkleRoot` value never
//! changes after the initial insert — later writes only move the status.

use serde::{Deserialize, Serialize};

use crate::config::MAX_WHITELIST_NAME_LEN;
use crate::error::ServiceError;
use crate::store::{Attrs, KvError, KvRecord};

// Attribute names shared by both tables. These are wire-visible (they key
// the stored rows and the JSON the read path returns), so they are spelled
// once here.
pub const ATTR_WHITELIST_NAME: &str = "WhitelistName";
pub const ATTR_MERKLE_ROOT: &str = "MerkleRoot";
pub const ATTR_WHITELIST_STATUS: &str = "WhitelistStatus";
pub const ATTR_WHITELIST_ADDRESS: &str = "WhitelistAddress";
pub const ATTR_WHITELIST_AMOUNT_WEI: &str = "WhitelistAmountWei";
pub const ATTR_MERKLE_PROOF: &str = "MerkleProof";

// ---------------------------------------------------------------------------
// Tree Status
// ---------------------------------------------------------------------------

/// The lifecycle state of a tree, owned exclusively by the orchestrator.
///
/// Legal transitions:
///
/// ```text
/// absent -> CREATING -> COMPLETED -+
///              |                   +-> DELETING -> absent
///              +------> FAILED ----+       |
///                         ^                |
///                         +----------------+   (rollback on purge failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeStatus {
    /// Root row inserted; proof rows are being written.
    #[serde(rename = "CREATING")]
    Creating,
    /// All proof rows landed; the tree is readable.
    #[serde(rename = "COMPLETED")]
    Completed,
    /// Proof writes failed partway, or a delete was rolled back. The only
    /// way out is DeleteTree.
    #[serde(rename = "FAILED")]
    Failed,
    /// Proof rows are being removed; the root row goes last.
    #[serde(rename = "DELETING")]
    Deleting,
}

impl TreeStatus {
    /// The stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            TreeStatus::Creating => "CREATING",
            TreeStatus::Completed => "COMPLETED",
            TreeStatus::Failed => "FAILED",
            TreeStatus::Deleting => "DELETING",
        }
    }

    /// Parses the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATING" => Some(TreeStatus::Creating),
            "COMPLETED" => Some(TreeStatus::Completed),
            "FAILED" => Some(TreeStatus::Failed),
            "DELETING" => Some(TreeStatus::Deleting),
            _ => None,
        }
    }
}

impl std::fmt::Display for TreeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Root Record
// ---------------------------------------------------------------------------

/// One row of the roots table, keyed by whitelist name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRecord {
    #[serde(rename = "WhitelistName")]
    pub whitelist_name: String,
    /// `0x`-prefixed 32-byte hex. Immutable once inserted.
    #[serde(rename = "MerkleRoot")]
    pub merkle_root: String,
    #[serde(rename = "WhitelistStatus")]
    pub status: TreeStatus,
}

impl RootRecord {
    /// The same record with a different status — the only mutation the
    /// state machine permits.
    pub fn with_status(&self, status: TreeStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

impl KvRecord for RootRecord {
    const PARTITION_ATTR: &'static str = ATTR_WHITELIST_NAME;
    const SORT_ATTR: Option<&'static str> = None;

    fn partition_key(&self) -> &str {
        &self.whitelist_name
    }

    fn sort_key(&self) -> Option<&str> {
        None
    }

    fn to_attrs(&self) -> Attrs {
        Attrs::from([
            (ATTR_WHITELIST_NAME.to_string(), self.whitelist_name.clone()),
            (ATTR_MERKLE_ROOT.to_string(), self.merkle_root.clone()),
            (
                ATTR_WHITELIST_STATUS.to_string(),
                self.status.as_str().to_string(),
            ),
        ])
    }

    fn from_attrs(attrs: &Attrs) -> Result<Self, KvError> {
        let status_raw = required_attr(attrs, ATTR_WHITELIST_STATUS)?;
        let status = TreeStatus::parse(status_raw)
            .ok_or_else(|| KvError::Malformed(format!("unknown status {status_raw:?}")))?;
        Ok(Self {
            whitelist_name: required_attr(attrs, ATTR_WHITELIST_NAME)?.to_string(),
            merkle_root: required_attr(attrs, ATTR_MERKLE_ROOT)?.to_string(),
            status,
        })
    }
}

// ---------------------------------------------------------------------------
// Proof Record
// ---------------------------------------------------------------------------

/// One row of the proofs table, keyed by (whitelist name, address).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRecord {
    #[serde(rename = "WhitelistName")]
    pub whitelist_name: String,
    /// EIP-55 checksummed address — the sort key.
    #[serde(rename = "WhitelistAddress")]
    pub address: String,
    /// Exact wei amount as a base-10 string.
    #[serde(rename = "WhitelistAmountWei")]
    pub amount_wei: String,
    /// Comma-joined hex sibling hashes; empty for a single-leaf tree.
    #[serde(rename = "MerkleProof")]
    pub proof: String,
}

impl KvRecord for ProofRecord {
    const PARTITION_ATTR: &'static str = ATTR_WHITELIST_NAME;
    const SORT_ATTR: Option<&'static str> = Some(ATTR_WHITELIST_ADDRESS);

    fn partition_key(&self) -> &str {
        &self.whitelist_name
    }

    fn sort_key(&self) -> Option<&str> {
        Some(&self.address)
    }

    fn to_attrs(&self) -> Attrs {
        Attrs::from([
            (ATTR_WHITELIST_NAME.to_string(), self.whitelist_name.clone()),
            (ATTR_WHITELIST_ADDRESS.to_string(), self.address.clone()),
            (
                ATTR_WHITELIST_AMOUNT_WEI.to_string(),
                self.amount_wei.clone(),
            ),
            (ATTR_MERKLE_PROOF.to_string(), self.proof.clone()),
        ])
    }

    fn from_attrs(attrs: &Attrs) -> Result<Self, KvError> {
        Ok(Self {
            whitelist_name: required_attr(attrs, ATTR_WHITELIST_NAME)?.to_string(),
            address: required_attr(attrs, ATTR_WHITELIST_ADDRESS)?.to_string(),
            amount_wei: required_attr(attrs, ATTR_WHITELIST_AMOUNT_WEI)?.to_string(),
            proof: required_attr(attrs, ATTR_MERKLE_PROOF)?.to_string(),
        })
    }
}

fn required_attr<'a>(attrs: &'a Attrs, name: &str) -> Result<&'a str, KvError> {
    attrs
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| KvError::Malformed(format!("missing attribute {name}")))
}

// ---------------------------------------------------------------------------
// Name Validation
// ---------------------------------------------------------------------------

/// Validates a whitelist name: `^[A-Za-z][0-9A-Za-z_-]*$`, 1..=1024 chars.
/// Pagination tokens share this syntax, since a token is just the last
/// whitelist name of the previous page.
pub fn validate_whitelist_name(name: &str) -> Result<(), ServiceError> {
    if name.is_empty() || name.len() > MAX_WHITELIST_NAME_LEN {
        return Err(ServiceError::validation(
            "whitelist name must be between 1 and 1024 characters",
        ));
    }
    let mut bytes = name.bytes();
    let first = bytes.next().expect("non-empty");
    if !first.is_ascii_alphabetic() {
        return Err(ServiceError::validation(
            "whitelist name must start with a letter",
        ));
    }
    if !bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
        return Err(ServiceError::validation(
            "whitelist name may only contain letters, digits, '_' and '-'",
        ));
    }
    Ok(())
}
