//! # Store Contracts
//!
//! The two persistence seams of the service. Both are expressed as traits
//! whose contracts mirror the hosted stores this system deploys against:
//!
//! - [`KvBackend`] — a table store with conditional single-item writes,
//!   batch writes that may hand back an unprocessed subset, key-ordered
//!   scans with continuation keys, and bounded atomic transactions. All
//!   reads are strongly consistent.
//! - [`ObjectBackend`] — a blob store with an `if-none-match` put
//!   precondition for overwrite protection.
//!
//! Everything the lifecycle protocol depends on — chunking, the
//! unprocessed-items retry loop, conditional status transitions,
//! compensation — lives *above* these traits in the adapters
//! ([`kv::KvTable`], [`object::ObjectStore`]) and runs identically against
//! the sled-backed [`local::LocalStore`] and the fault-injecting
//! [`memory::MemoryStore`].
//!
//! Rows are flat string-attribute maps. Nothing in this domain needs more:
//! names, addresses, hex hashes, wei strings, and status tags are all text.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

pub mod kv;
pub mod local;
pub mod memory;
pub mod object;

pub use kv::KvTable;
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use object::ObjectStore;

/// A stored row: attribute name to string value.
pub type Attrs = BTreeMap<String, String>;

/// Separator between partition and sort key in composite storage keys.
/// Unit-separator is outside every validated attribute alphabet.
const KEY_SEPARATOR: u8 = 0x1f;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced by the KV backend and adapter.
#[derive(Debug, Error)]
pub enum KvError {
    /// A conditional write found the row in a state the condition rejects.
    #[error("conditional check failed on table {table}")]
    ConditionalCheckFailed { table: String },

    /// Provider-side capacity rejection.
    #[error("request throttled on table {0}")]
    Throttled(String),

    /// A transactional write was canceled.
    #[error("transaction canceled: {0}")]
    Conflict(String),

    /// The named table does not exist.
    #[error("table not found: {0}")]
    ResourceNotFound(String),

    /// The provider denied access. The message is deliberately constant.
    #[error("Access denied")]
    AccessDenied,

    /// A bulk write exhausted its retries with items still unprocessed.
    #[error("{left} items still unprocessed after {attempts} attempts")]
    PartialBatch { left: usize, attempts: u32 },

    /// A batch round trip exceeded its deadline.
    #[error("store call exceeded the {0:?} deadline")]
    Timeout(std::time::Duration),

    /// Storage engine failure.
    #[error("storage engine error: {0}")]
    Internal(String),

    /// A stored row that does not decode into its record type.
    #[error("malformed record: {0}")]
    Malformed(String),

    /// Anything unclassified.
    #[error("{0}")]
    Other(String),
}

/// Failures surfaced by the object backend and adapter.
#[derive(Debug, Error)]
pub enum ObjectError {
    /// No object at the requested key.
    #[error("object not found: {0}")]
    NotFound(String),

    /// An `if-none-match` put found an existing object.
    #[error("object already exists: {0}")]
    Exists(String),

    /// Bucket naming rules violated.
    #[error("invalid bucket name: {0}")]
    InvalidBucket(String),

    /// Key naming rules violated.
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// Payload exceeds the configured bound.
    #[error("object of {size} bytes exceeds the {limit}-byte limit")]
    TooLarge { size: usize, limit: usize },

    /// The provider denied access. The message is deliberately constant.
    #[error("Access denied")]
    AccessDenied,

    /// A deleted object was still observable after the wait window.
    #[error("object still present {0:?} after delete")]
    DeleteTimeout(std::time::Duration),

    /// Storage engine failure.
    #[error("storage engine error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// Table Schema & Records
// ---------------------------------------------------------------------------

/// Describes one table: its name and which attributes form the key.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Table name (from configuration).
    pub table: String,
    /// Partition-key attribute name.
    pub partition_attr: &'static str,
    /// Sort-key attribute name, for tables that have one.
    pub sort_attr: Option<&'static str>,
}

impl TableSchema {
    /// Builds the composite storage key for explicit key parts.
    pub fn storage_key(&self, partition_key: &str, sort_key: Option<&str>) -> Vec<u8> {
        let mut key = partition_key.as_bytes().to_vec();
        if let Some(sk) = sort_key {
            key.push(KEY_SEPARATOR);
            key.extend_from_slice(sk.as_bytes());
        }
        key
    }

    /// Extracts the storage key from a full item, validating that the key
    /// attributes are present.
    pub fn key_of(&self, item: &Attrs) -> Result<Vec<u8>, KvError> {
        let pk = item
            .get(self.partition_attr)
            .ok_or_else(|| KvError::Malformed(format!("missing {}", self.partition_attr)))?;
        let sk = match self.sort_attr {
            Some(attr) => Some(
                item.get(attr)
                    .ok_or_else(|| KvError::Malformed(format!("missing {attr}")))?
                    .as_str(),
            ),
            None => None,
        };
        Ok(self.storage_key(pk, sk))
    }

    /// The prefix under which every row of one partition sorts.
    pub fn partition_prefix(&self, partition_key: &str) -> Vec<u8> {
        let mut prefix = partition_key.as_bytes().to_vec();
        if self.sort_attr.is_some() {
            prefix.push(KEY_SEPARATOR);
        }
        prefix
    }
}

/// A typed row that knows how to cross the attribute-map boundary.
pub trait KvRecord: Sized + Send + Sync + Clone {
    /// Partition-key attribute name.
    const PARTITION_ATTR: &'static str;
    /// Sort-key attribute name, if the table has one.
    const SORT_ATTR: Option<&'static str>;

    /// This record's partition-key value.
    fn partition_key(&self) -> &str;
    /// This record's sort-key value, if any.
    fn sort_key(&self) -> Option<&str>;
    /// Serializes into an attribute map.
    fn to_attrs(&self) -> Attrs;
    /// Deserializes from an attribute map.
    fn from_attrs(attrs: &Attrs) -> Result<Self, KvError>;
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// A condition expression evaluated against the current row (or its
/// absence) atomically with the write it guards.
#[derive(Debug, Clone)]
pub enum Condition {
    /// The row must not exist — insert-only semantics.
    KeyNotExists,
    /// The named attribute must exist and equal the value.
    Eq(&'static str, String),
    /// Both sides must hold.
    And(Box<Condition>, Box<Condition>),
    /// Either side must hold.
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    /// `a AND b`, builder style.
    pub fn and(self, other: Condition) -> Condition {
        Condition::And(Box::new(self), Box::new(other))
    }

    /// `a OR b`, builder style.
    pub fn or(self, other: Condition) -> Condition {
        Condition::Or(Box::new(self), Box::new(other))
    }

    /// Evaluates against the current row. `None` means the row is absent.
    pub fn eval(&self, current: Option<&Attrs>) -> bool {
        match self {
            Condition::KeyNotExists => current.is_none(),
            Condition::Eq(attr, value) => {
                current.and_then(|c| c.get(*attr)).map(String::as_str) == Some(value.as_str())
            }
            Condition::And(a, b) => a.eval(current) && b.eval(current),
            Condition::Or(a, b) => a.eval(current) || b.eval(current),
        }
    }
}

// ---------------------------------------------------------------------------
// Write Operations & Pages
// ---------------------------------------------------------------------------

/// One element of a batch write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Unconditional put of a full item.
    Put(Attrs),
    /// Delete by key.
    Delete {
        partition_key: String,
        sort_key: Option<String>,
    },
}

/// One element of a transactional write.
#[derive(Debug, Clone)]
pub enum TransactOp {
    /// Put that requires the key to be absent.
    InsertNew(Attrs),
    /// Delete by key.
    Delete {
        partition_key: String,
        sort_key: Option<String>,
    },
}

/// One page of a partition query.
#[derive(Debug, Default)]
pub struct QueryPage {
    pub items: Vec<Attrs>,
    /// Sort key to resume after, when more rows remain.
    pub next_key: Option<String>,
}

/// One page of a table scan.
#[derive(Debug, Default)]
pub struct ScanPage {
    pub items: Vec<Attrs>,
    /// Partition key to resume after, when more rows remain.
    pub next_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Backend Traits
// ---------------------------------------------------------------------------

/// Provider contract for the table store.
///
/// Implementations must evaluate put conditions atomically with the write,
/// and must keep reads strongly consistent with completed writes — the
/// whole lifecycle protocol leans on those two properties.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Point read by key.
    async fn get_item(
        &self,
        schema: &TableSchema,
        partition_key: &str,
        sort_key: Option<&str>,
    ) -> Result<Option<Attrs>, KvError>;

    /// Writes one item, optionally guarded by a condition on the current
    /// row. A failed condition is [`KvError::ConditionalCheckFailed`].
    async fn put_item(
        &self,
        schema: &TableSchema,
        item: Attrs,
        condition: Option<Condition>,
    ) -> Result<(), KvError>;

    /// Deletes one item by key. Deleting an absent item succeeds.
    async fn delete_item(
        &self,
        schema: &TableSchema,
        partition_key: &str,
        sort_key: Option<&str>,
    ) -> Result<(), KvError>;

    /// Reads one page of a partition, in sort-key order, resuming after
    /// `start_after` when given.
    async fn query_page(
        &self,
        schema: &TableSchema,
        partition_key: &str,
        start_after: Option<&str>,
    ) -> Result<QueryPage, KvError>;

    /// Reads one page of the whole table in partition-key order.
    async fn scan_page(
        &self,
        schema: &TableSchema,
        limit: usize,
        start_after: Option<&str>,
    ) -> Result<ScanPage, KvError>;

    /// Executes up to 25 unconditional writes, returning the subset the
    /// provider did not process. An empty return means everything landed.
    async fn batch_write(
        &self,
        schema: &TableSchema,
        ops: Vec<WriteOp>,
    ) -> Result<Vec<WriteOp>, KvError>;

    /// Executes up to 25 insert-only statements sequentially; the first
    /// statement that finds its key occupied fails the call.
    async fn execute_batch_insert(
        &self,
        schema: &TableSchema,
        items: Vec<Attrs>,
    ) -> Result<(), KvError>;

    /// Executes up to 100 operations atomically: either all apply or none
    /// do. A violated [`TransactOp::InsertNew`] cancels the transaction
    /// with [`KvError::Conflict`].
    async fn transact_write(
        &self,
        schema: &TableSchema,
        ops: Vec<TransactOp>,
    ) -> Result<(), KvError>;
}

/// Provider contract for the blob store.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Reads an object, `None` when absent.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, ObjectError>;

    /// Writes an object. With `if_none_match`, an existing object fails the
    /// call with [`ObjectError::Exists`] instead of being replaced — the
    /// precondition is the provider's, not a read-then-write. Hosted
    /// bindings upload multipart with an integrity checksum per part.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        if_none_match: bool,
    ) -> Result<(), ObjectError>;

    /// Deletes an object. Deleting an absent object succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ObjectError>;

    /// Whether an object is currently observable.
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, ObjectError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attrs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn condition_key_not_exists() {
        let cond = Condition::KeyNotExists;
        assert!(cond.eval(None));
        assert!(!cond.eval(Some(&attrs(&[("A", "1")]))));
    }

    #[test]
    fn condition_eq_requires_presence_and_equality() {
        let cond = Condition::Eq("Status", "COMPLETED".into());
        assert!(!cond.eval(None));
        assert!(!cond.eval(Some(&attrs(&[("Status", "CREATING")]))));
        assert!(!cond.eval(Some(&attrs(&[("Other", "COMPLETED")]))));
        assert!(cond.eval(Some(&attrs(&[("Status", "COMPLETED")]))));
    }

    #[test]
    fn condition_combinators() {
        let row = attrs(&[("Root", "0xabc"), ("Status", "FAILED")]);
        let cond = Condition::Eq("Root", "0xabc".into()).and(
            Condition::Eq("Status", "COMPLETED".into())
                .or(Condition::Eq("Status", "FAILED".into())),
        );
        assert!(cond.eval(Some(&row)));

        let wrong_root = attrs(&[("Root", "0xdef"), ("Status", "FAILED")]);
        assert!(!cond.eval(Some(&wrong_root)));
    }

    #[test]
    fn composite_keys_sort_within_partition() {
        let schema = TableSchema {
            table: "Proofs".into(),
            partition_attr: "Name",
            sort_attr: Some("Addr"),
        };
        let a = schema.storage_key("w0", Some("0xaa"));
        let b = schema.storage_key("w0", Some("0xbb"));
        let other = schema.storage_key("w1", Some("0x00"));
        assert!(a < b);
        assert!(b < other);
        assert!(a.starts_with(&schema.partition_prefix("w0")));
        assert!(!other.starts_with(&schema.partition_prefix("w0")));
    }

    #[test]
    fn key_of_requires_key_attributes() {
        let schema = TableSchema {
            table: "Proofs".into(),
            partition_attr: "Name",
            sort_attr: Some("Addr"),
        };
        let missing = attrs(&[("Name", "w0")]);
        assert!(matches!(
            schema.key_of(&missing),
            Err(KvError::Malformed(_))
        ));

        let full = attrs(&[("Name", "w0"), ("Addr", "0xaa")]);
        assert_eq!(schema.key_of(&full).unwrap(), schema.storage_key("w0", Some("0xaa")));
    }
}
