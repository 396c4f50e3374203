//! # Service Configuration & Constants
//!
//! Every limit and tuning knob in claimtree lives here, alongside the
//! immutable [`ServiceConfig`] record built from the environment once at
//! startup. Nothing in this struct is ever mutated after construction; if a
//! required variable is missing, the process refuses to start rather than
//! limping along with half a configuration.

use std::env;
use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Whitelist Limits
// ---------------------------------------------------------------------------

/// Maximum number of entries in a single whitelist. A tree over 100k leaves
/// is ~200k keccak invocations — still fine to build synchronously within
/// one request, which is the whole operating model here.
pub const MAX_WHITELIST_ROWS: usize = 100_000;

/// Whitelist names are `^[A-Za-z][0-9A-Za-z_-]*$`, 1..=1024 chars.
pub const MAX_WHITELIST_NAME_LEN: usize = 1024;

/// Token amounts are decimal strings of 1..=30 characters.
pub const MAX_AMOUNT_LEN: usize = 30;

/// The native token carries 18 decimal places; amounts scale by 10^18.
pub const TOKEN_DECIMALS: usize = 18;

/// Upload payloads are base64 of 4..=10,485,760 chars, so the decoded CSV
/// is bounded by 3/4 of that.
pub const MIN_UPLOAD_BASE64_LEN: usize = 4;
pub const MAX_UPLOAD_BASE64_LEN: usize = 10_485_760;
pub const MAX_WHITELIST_BYTES: usize = MAX_UPLOAD_BASE64_LEN / 4 * 3;

/// Whitelist CSVs are stored with this content type.
pub const CSV_CONTENT_TYPE: &str = "text/csv";

// ---------------------------------------------------------------------------
// KV Batching & Retry Schedule
// ---------------------------------------------------------------------------

/// Items per batch write. The provider caps batch writes at 25.
pub const BATCH_WRITE_CHUNK: usize = 25;

/// Statements per batch statement execution. Also capped at 25.
pub const BATCH_STATEMENT_CHUNK: usize = 25;

/// Items per transactional write. The provider caps transactions at 100,
/// which is why a 100k-proof tree cannot be written transactionally and the
/// status machine exists at all.
pub const TRANSACT_WRITE_CHUNK: usize = 100;

/// Default retry budget for the unprocessed-items loop.
pub const DEFAULT_BATCH_RETRIES: u32 = 3;

/// Base delay of the unprocessed-items backoff: after attempt `i` the
/// adapter sleeps `10 ms * 2^i` before resubmitting the leftovers.
pub const BATCH_RETRY_BASE_DELAY: Duration = Duration::from_millis(10);

/// Per-call deadline for a single KV batch round trip. A batch that blows
/// this deadline is a step failure; the orchestrator compensates exactly as
/// it would for an error response.
pub const KV_STEP_DEADLINE: Duration = Duration::from_secs(30);

/// Deadline for fetching a whitelist CSV from the object store.
pub const WHITELIST_FETCH_DEADLINE: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Object Store
// ---------------------------------------------------------------------------

/// Object keys are 1..=1024 chars from a restricted character set.
pub const MAX_OBJECT_KEY_LEN: usize = 1024;

/// After a delete, the adapter polls until the object is observably absent,
/// giving up after this long.
pub const DELETE_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval for the post-delete absence check.
pub const DELETE_WAIT_POLL: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Read Path
// ---------------------------------------------------------------------------

/// Catalog page sizes are integers in 1..=1000.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Internal page size used when draining a partition query.
pub const QUERY_PAGE_LIMIT: usize = 1000;

// ---------------------------------------------------------------------------
// Environment Variables
// ---------------------------------------------------------------------------

pub const ENV_BUCKET: &str = "WHITELIST_S3_BUCKET_NAME";
pub const ENV_ROOTS_TABLE: &str = "WHITELIST_DYNAMODB_ROOTS_TABLE_NAME";
pub const ENV_PROOFS_TABLE: &str = "WHITELIST_DYNAMODB_PROOFS_TABLE_NAME";

pub const ENV_GROUPS_UPLOAD_WHITELIST: &str = "AUTHORIZED_GROUPS_UPLOAD_WHITELIST";
pub const ENV_GROUPS_DELETE_WHITELIST: &str = "AUTHORIZED_GROUPS_DELETE_WHITELIST";
pub const ENV_GROUPS_CREATE_MERKLE_TREE: &str = "AUTHORIZED_GROUPS_CREATE_MERKLE_TREE";
pub const ENV_GROUPS_DELETE_MERKLE_TREE: &str = "AUTHORIZED_GROUPS_DELETE_MERKLE_TREE";
pub const ENV_GROUPS_GET_MERKLE_ROOT: &str = "AUTHORIZED_GROUPS_GET_MERKLE_ROOT";
pub const ENV_GROUPS_GET_MERKLE_ROOTS: &str = "AUTHORIZED_GROUPS_GET_MERKLE_ROOTS";
pub const ENV_GROUPS_GET_MERKLE_PROOFS: &str = "AUTHORIZED_GROUPS_GET_MERKLE_PROOFS";

// ---------------------------------------------------------------------------
// Config Record
// ---------------------------------------------------------------------------

/// Errors raised while assembling [`ServiceConfig`] from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is unset or empty.
    #[error("required environment variable {0} is not set")]
    MissingVariable(&'static str),
}

/// Authorized group lists, one per group-gated route. An empty list means
/// "open to any authenticated caller"; a non-empty list requires the caller
/// to be in at least one named group.
#[derive(Debug, Clone, Default)]
pub struct AuthorizedGroups {
    pub upload_whitelist: Vec<String>,
    pub delete_whitelist: Vec<String>,
    pub create_merkle_tree: Vec<String>,
    pub delete_merkle_tree: Vec<String>,
    pub get_merkle_root: Vec<String>,
    pub get_merkle_roots: Vec<String>,
    pub get_merkle_proofs: Vec<String>,
}

/// Process-wide configuration. Constructed once at startup and shared
/// immutably; there is deliberately no way to change it afterwards.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Object-store bucket holding whitelist CSVs.
    pub bucket: String,
    /// KV table holding one root row per whitelist name.
    pub roots_table: String,
    /// KV table holding one proof row per (whitelist name, address).
    pub proofs_table: String,
    /// Group authorization lists for the gated routes.
    pub auth: AuthorizedGroups,
}

impl ServiceConfig {
    /// Reads the full configuration from the environment.
    ///
    /// Bucket and table names are required; authorization lists default to
    /// empty (any authenticated caller).
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bucket: required(ENV_BUCKET)?,
            roots_table: required(ENV_ROOTS_TABLE)?,
            proofs_table: required(ENV_PROOFS_TABLE)?,
            auth: AuthorizedGroups {
                upload_whitelist: group_list(ENV_GROUPS_UPLOAD_WHITELIST),
                delete_whitelist: group_list(ENV_GROUPS_DELETE_WHITELIST),
                create_merkle_tree: group_list(ENV_GROUPS_CREATE_MERKLE_TREE),
                delete_merkle_tree: group_list(ENV_GROUPS_DELETE_MERKLE_TREE),
                get_merkle_root: group_list(ENV_GROUPS_GET_MERKLE_ROOT),
                get_merkle_roots: group_list(ENV_GROUPS_GET_MERKLE_ROOTS),
                get_merkle_proofs: group_list(ENV_GROUPS_GET_MERKLE_PROOFS),
            },
        })
    }

    /// Fixed configuration for `--dev` runs: temporary storage, no group
    /// gating. Never point this at anything you care about.
    pub fn dev_defaults() -> Self {
        Self {
            bucket: "claimtree-dev-whitelists".to_string(),
            roots_table: "MerkleRoots".to_string(),
            proofs_table: "MerkleProofs".to_string(),
            auth: AuthorizedGroups::default(),
        }
    }
}

/// Reads a required variable, treating empty values as missing.
fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVariable(name)),
    }
}

/// Reads a comma-separated group list; unset or empty means no restriction.
fn group_list(name: &'static str) -> Vec<String> {
    parse_group_list(&env::var(name).unwrap_or_default())
}

/// Splits a comma-separated group list, trimming entries and dropping
/// empty ones.
pub fn parse_group_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_group_list_basics() {
        assert_eq!(parse_group_list(""), Vec::<String>::new());
        assert_eq!(parse_group_list("ops"), vec!["ops"]);
        assert_eq!(parse_group_list("ops, admins"), vec!["ops", "admins"]);
        assert_eq!(parse_group_list(" ,ops,, "), vec!["ops"]);
    }

    #[test]
    fn chunk_sizes_match_provider_caps() {
        assert_eq!(BATCH_WRITE_CHUNK, 25);
        assert_eq!(BATCH_STATEMENT_CHUNK, 25);
        assert_eq!(TRANSACT_WRITE_CHUNK, 100);
    }

    #[test]
    fn decoded_upload_bound_matches_base64_bound() {
        // 10,485,760 base64 chars decode to at most 7,864,320 bytes.
        assert_eq!(MAX_WHITELIST_BYTES, 7_864_320);
    }

    #[test]
    fn dev_defaults_are_open() {
        let cfg = ServiceConfig::dev_defaults();
        assert!(cfg.auth.upload_whitelist.is_empty());
        assert!(!cfg.bucket.is_empty());
    }
}
