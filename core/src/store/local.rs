//! # LocalStore — sled Binding
//!
//! Binds both store contracts to a single embedded sled database. Each KV
//! table maps to a named sled tree; each bucket maps to another. Rows and
//! blobs are bincode-encoded.
//!
//! ## Key layout
//!
//! | Tree              | Key                          | Value                    |
//! |-------------------|------------------------------|--------------------------|
//! | `kv::<table>`     | `pk` or `pk 0x1F sk` (UTF-8) | `bincode(Attrs)`         |
//! | `objects::<bucket>` | object key (UTF-8)         | `bincode(StoredObject)`  |
//!
//! Composite keys concatenate partition and sort key around a unit
//! separator, which sorts below every character the validated attribute
//! alphabets allow — so sled's lexicographic order gives us partition
//! locality and in-partition sort-key order for free.
//!
//! ## Semantics
//!
//! Conditional puts are a compare-and-swap loop: read the current row,
//! evaluate the condition, CAS old-to-new, and re-read on CAS contention.
//! The condition is therefore always judged against the exact bytes the
//! write replaces, which is the linearizable behavior the lifecycle
//! protocol requires. Reads are trivially consistent — sled serves them
//! from the same process that acknowledged the writes.
//!
//! Transactional writes use sled's per-tree transactions. An insert-only
//! violation aborts the whole transaction, surfacing as [`KvError::Conflict`].

use std::ops::Bound;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{BATCH_STATEMENT_CHUNK, BATCH_WRITE_CHUNK, QUERY_PAGE_LIMIT, TRANSACT_WRITE_CHUNK};

use super::{
    Attrs, Condition, KvBackend, KvError, ObjectBackend, ObjectError, QueryPage, ScanPage,
    TableSchema, TransactOp, WriteOp,
};

/// A stored blob plus the content type it was uploaded with.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredObject {
    content_type: String,
    bytes: Vec<u8>,
}

/// Embedded binding of both store contracts over one sled database.
#[derive(Debug, Clone)]
pub struct LocalStore {
    db: sled::Db,
}

impl LocalStore {
    /// Opens (or creates) a store at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, KvError> {
        let db = sled::open(path).map_err(|e| KvError::Internal(e.to_string()))?;
        Ok(Self { db })
    }

    /// Opens a throwaway in-memory store, cleaned up on drop. The test and
    /// `--dev` workhorse.
    pub fn open_temporary() -> Result<Self, KvError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| KvError::Internal(e.to_string()))?;
        Ok(Self { db })
    }

    /// Blocks until all pending writes are durable.
    pub fn flush(&self) -> Result<(), KvError> {
        self.db.flush().map_err(|e| KvError::Internal(e.to_string()))?;
        Ok(())
    }

    fn table_tree(&self, schema: &TableSchema) -> Result<sled::Tree, KvError> {
        self.db
            .open_tree(format!("kv::{}", schema.table))
            .map_err(|e| map_sled(&schema.table, e))
    }

    fn bucket_tree(&self, bucket: &str) -> Result<sled::Tree, ObjectError> {
        self.db
            .open_tree(format!("objects::{bucket}"))
            .map_err(|e| ObjectError::Internal(e.to_string()))
    }
}

/// The provider-error mapping table for the embedded engine.
fn map_sled(table: &str, err: sled::Error) -> KvError {
    match err {
        sled::Error::CollectionNotFound(_) => KvError::ResourceNotFound(table.to_string()),
        sled::Error::Unsupported(msg) => KvError::Other(msg),
        other => KvError::Internal(other.to_string()),
    }
}

fn encode_attrs(attrs: &Attrs) -> Result<Vec<u8>, KvError> {
    bincode::serialize(attrs).map_err(|e| KvError::Internal(e.to_string()))
}

fn decode_attrs(bytes: &[u8]) -> Result<Attrs, KvError> {
    bincode::deserialize(bytes).map_err(|e| KvError::Malformed(e.to_string()))
}

/// Reads the sort-key attribute out of a decoded row.
fn sort_key_of(schema: &TableSchema, attrs: &Attrs) -> Result<String, KvError> {
    let attr = schema
        .sort_attr
        .ok_or_else(|| KvError::Malformed(format!("table {} has no sort key", schema.table)))?;
    attrs
        .get(attr)
        .cloned()
        .ok_or_else(|| KvError::Malformed(format!("missing attribute {attr}")))
}

#[async_trait]
impl KvBackend for LocalStore {
    async fn get_item(
        &self,
        schema: &TableSchema,
        partition_key: &str,
        sort_key: Option<&str>,
    ) -> Result<Option<Attrs>, KvError> {
        let tree = self.table_tree(schema)?;
        let key = schema.storage_key(partition_key, sort_key);
        match tree.get(&key).map_err(|e| map_sled(&schema.table, e))? {
            Some(bytes) => Ok(Some(decode_attrs(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_item(
        &self,
        schema: &TableSchema,
        item: Attrs,
        condition: Option<Condition>,
    ) -> Result<(), KvError> {
        let tree = self.table_tree(schema)?;
        let key = schema.key_of(&item)?;
        let new_bytes = encode_attrs(&item)?;

        loop {
            let current_raw = tree.get(&key).map_err(|e| map_sled(&schema.table, e))?;
            if let Some(cond) = &condition {
                let current = match &current_raw {
                    Some(bytes) => Some(decode_attrs(bytes)?),
                    None => None,
                };
                if !cond.eval(current.as_ref()) {
                    return Err(KvError::ConditionalCheckFailed {
                        table: schema.table.clone(),
                    });
                }
            }
            let swap = tree
                .compare_and_swap(&key, current_raw, Some(new_bytes.clone()))
                .map_err(|e| map_sled(&schema.table, e))?;
            match swap {
                Ok(()) => return Ok(()),
                // Lost a race between read and swap: re-read and re-judge
                // the condition against the row that beat us.
                Err(_) => continue,
            }
        }
    }

    async fn delete_item(
        &self,
        schema: &TableSchema,
        partition_key: &str,
        sort_key: Option<&str>,
    ) -> Result<(), KvError> {
        let tree = self.table_tree(schema)?;
        let key = schema.storage_key(partition_key, sort_key);
        tree.remove(&key).map_err(|e| map_sled(&schema.table, e))?;
        Ok(())
    }

    async fn query_page(
        &self,
        schema: &TableSchema,
        partition_key: &str,
        start_after: Option<&str>,
    ) -> Result<QueryPage, KvError> {
        let tree = self.table_tree(schema)?;
        let prefix = schema.partition_prefix(partition_key);

        let lower: Bound<Vec<u8>> = match start_after {
            Some(sk) => Bound::Excluded(schema.storage_key(partition_key, Some(sk))),
            None => Bound::Included(prefix.clone()),
        };

        let mut items = Vec::new();
        let mut next_key = None;
        for entry in tree.range((lower, Bound::Unbounded)) {
            let (key, value) = entry.map_err(|e| map_sled(&schema.table, e))?;
            if !key.starts_with(&prefix) {
                break;
            }
            if items.len() == QUERY_PAGE_LIMIT {
                // More rows remain; resume after the last one returned.
                let last: &Attrs = items.last().expect("page is full");
                next_key = Some(sort_key_of(schema, last)?);
                break;
            }
            items.push(decode_attrs(&value)?);
        }

        Ok(QueryPage { items, next_key })
    }

    async fn scan_page(
        &self,
        schema: &TableSchema,
        limit: usize,
        start_after: Option<&str>,
    ) -> Result<ScanPage, KvError> {
        let tree = self.table_tree(schema)?;
        let lower: Bound<Vec<u8>> = match start_after {
            Some(pk) => Bound::Excluded(pk.as_bytes().to_vec()),
            None => Bound::Unbounded,
        };

        let mut items = Vec::new();
        let mut next_key = None;
        for entry in tree.range((lower, Bound::<Vec<u8>>::Unbounded)) {
            let (_, value) = entry.map_err(|e| map_sled(&schema.table, e))?;
            if items.len() == limit {
                let last: &Attrs = items.last().expect("page is full");
                next_key = last.get(schema.partition_attr).cloned();
                break;
            }
            items.push(decode_attrs(&value)?);
        }

        Ok(ScanPage { items, next_key })
    }

    async fn batch_write(
        &self,
        schema: &TableSchema,
        ops: Vec<WriteOp>,
    ) -> Result<Vec<WriteOp>, KvError> {
        if ops.len() > BATCH_WRITE_CHUNK {
            return Err(KvError::Other(format!(
                "batch write limited to {BATCH_WRITE_CHUNK} items, got {}",
                ops.len()
            )));
        }
        let tree = self.table_tree(schema)?;
        for op in ops {
            match op {
                WriteOp::Put(item) => {
                    let key = schema.key_of(&item)?;
                    let bytes = encode_attrs(&item)?;
                    tree.insert(key, bytes).map_err(|e| map_sled(&schema.table, e))?;
                }
                WriteOp::Delete {
                    partition_key,
                    sort_key,
                } => {
                    let key = schema.storage_key(&partition_key, sort_key.as_deref());
                    tree.remove(key).map_err(|e| map_sled(&schema.table, e))?;
                }
            }
        }
        // The embedded engine never declines work, so nothing comes back.
        Ok(Vec::new())
    }

    async fn execute_batch_insert(
        &self,
        schema: &TableSchema,
        items: Vec<Attrs>,
    ) -> Result<(), KvError> {
        if items.len() > BATCH_STATEMENT_CHUNK {
            return Err(KvError::Other(format!(
                "batch statement limited to {BATCH_STATEMENT_CHUNK} items, got {}",
                items.len()
            )));
        }
        for item in items {
            self.put_item(schema, item, Some(Condition::KeyNotExists))
                .await?;
        }
        Ok(())
    }

    async fn transact_write(
        &self,
        schema: &TableSchema,
        ops: Vec<TransactOp>,
    ) -> Result<(), KvError> {
        if ops.len() > TRANSACT_WRITE_CHUNK {
            return Err(KvError::Other(format!(
                "transaction limited to {TRANSACT_WRITE_CHUNK} items, got {}",
                ops.len()
            )));
        }
        let tree = self.table_tree(schema)?;

        // Precompute keys and values so the closure only touches sled.
        let mut prepared = Vec::with_capacity(ops.len());
        for op in &ops {
            match op {
                TransactOp::InsertNew(item) => {
                    prepared.push((schema.key_of(item)?, Some(encode_attrs(item)?)));
                }
                TransactOp::Delete {
                    partition_key,
                    sort_key,
                } => {
                    prepared.push((
                        schema.storage_key(partition_key, sort_key.as_deref()),
                        None,
                    ));
                }
            }
        }

        use sled::transaction::{ConflictableTransactionError, TransactionError};
        let result = tree.transaction(|tx| {
            for (key, value) in &prepared {
                match value {
                    Some(bytes) => {
                        if tx.get(key.as_slice())?.is_some() {
                            return Err(ConflictableTransactionError::Abort(()));
                        }
                        tx.insert(key.as_slice(), bytes.as_slice())?;
                    }
                    None => {
                        tx.remove(key.as_slice())?;
                    }
                }
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(())) => Err(KvError::Conflict(format!(
                "insert-only condition violated on table {}",
                schema.table
            ))),
            Err(TransactionError::Storage(e)) => Err(map_sled(&schema.table, e)),
        }
    }
}

#[async_trait]
impl ObjectBackend for LocalStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, ObjectError> {
        let tree = self.bucket_tree(bucket)?;
        match tree
            .get(key.as_bytes())
            .map_err(|e| ObjectError::Internal(e.to_string()))?
        {
            Some(bytes) => {
                let stored: StoredObject = bincode::deserialize(&bytes)
                    .map_err(|e| ObjectError::Internal(e.to_string()))?;
                Ok(Some(stored.bytes))
            }
            None => Ok(None),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        if_none_match: bool,
    ) -> Result<(), ObjectError> {
        let tree = self.bucket_tree(bucket)?;
        let stored = StoredObject {
            content_type: content_type.to_string(),
            bytes,
        };
        let encoded =
            bincode::serialize(&stored).map_err(|e| ObjectError::Internal(e.to_string()))?;

        if if_none_match {
            let swap = tree
                .compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(encoded))
                .map_err(|e| ObjectError::Internal(e.to_string()))?;
            if swap.is_err() {
                return Err(ObjectError::Exists(key.to_string()));
            }
        } else {
            tree.insert(key.as_bytes(), encoded)
                .map_err(|e| ObjectError::Internal(e.to_string()))?;
        }
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ObjectError> {
        let tree = self.bucket_tree(bucket)?;
        tree.remove(key.as_bytes())
            .map_err(|e| ObjectError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, ObjectError> {
        let tree = self.bucket_tree(bucket)?;
        tree.contains_key(key.as_bytes())
            .map_err(|e| ObjectError::Internal(e.to_string()))
    }
}
