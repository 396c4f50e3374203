//! # MemoryStore — In-Memory Binding with Fault Injection
//!
//! A hashmap-backed binding of both store contracts, used to exercise the
//! failure paths the hosted provider exhibits but the embedded engine never
//! does: a batch write that errors outright, and a batch response that
//! hands back an unprocessed tail.
//!
//! One mutex guards the whole store, so every operation — including the
//! read-evaluate-write of a conditional put — is linearizable. That makes
//! this binding the reference model for the concurrency claims in the
//! lifecycle protocol tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::{BATCH_STATEMENT_CHUNK, BATCH_WRITE_CHUNK, QUERY_PAGE_LIMIT, TRANSACT_WRITE_CHUNK};

use super::{
    Attrs, Condition, KvBackend, KvError, ObjectBackend, ObjectError, QueryPage, ScanPage,
    TableSchema, TransactOp, WriteOp,
};

#[derive(Default)]
struct Inner {
    /// table name -> storage key -> row.
    tables: HashMap<String, BTreeMap<Vec<u8>, Attrs>>,
    /// bucket name -> object key -> (content type, bytes).
    buckets: HashMap<String, BTreeMap<String, (String, Vec<u8>)>>,
    /// Number of `batch_write` calls observed so far.
    batch_write_calls: usize,
    faults: FaultPlan,
}

/// Injected misbehavior, keyed off the global `batch_write` call counter.
#[derive(Default)]
struct FaultPlan {
    /// 1-based call numbers that fail outright with an internal error.
    fail_calls: Vec<usize>,
    /// For the first `unprocessed_calls` calls, the final `unprocessed_tail`
    /// operations are returned unprocessed instead of applied.
    unprocessed_calls: usize,
    unprocessed_tail: usize,
}

/// In-memory binding of both store contracts.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `n`-th `batch_write` call (1-based, counted across all
    /// tables) fail with an internal error.
    pub fn fail_batch_write_on_call(&self, n: usize) {
        self.inner.lock().unwrap().faults.fail_calls.push(n);
    }

    /// Makes the first `calls` `batch_write` calls return their final
    /// `tail` operations unprocessed. The rest of each batch still applies,
    /// mirroring the partial-application the hosted provider exhibits.
    pub fn leave_unprocessed(&self, calls: usize, tail: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.faults.unprocessed_calls = calls;
        inner.faults.unprocessed_tail = tail;
    }

    /// Number of `batch_write` calls observed so far.
    pub fn batch_write_calls(&self) -> usize {
        self.inner.lock().unwrap().batch_write_calls
    }

    /// Number of rows currently stored in a table.
    pub fn table_len(&self, table: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map_or(0, BTreeMap::len)
    }
}

fn apply_write(table: &mut BTreeMap<Vec<u8>, Attrs>, schema: &TableSchema, op: WriteOp) -> Result<(), KvError> {
    match op {
        WriteOp::Put(item) => {
            let key = schema.key_of(&item)?;
            table.insert(key, item);
        }
        WriteOp::Delete {
            partition_key,
            sort_key,
        } => {
            table.remove(&schema.storage_key(&partition_key, sort_key.as_deref()));
        }
    }
    Ok(())
}

#[async_trait]
impl KvBackend for MemoryStore {
    async fn get_item(
        &self,
        schema: &TableSchema,
        partition_key: &str,
        sort_key: Option<&str>,
    ) -> Result<Option<Attrs>, KvError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tables
            .get(&schema.table)
            .and_then(|t| t.get(&schema.storage_key(partition_key, sort_key)))
            .cloned())
    }

    async fn put_item(
        &self,
        schema: &TableSchema,
        item: Attrs,
        condition: Option<Condition>,
    ) -> Result<(), KvError> {
        let mut inner = self.inner.lock().unwrap();
        let key = schema.key_of(&item)?;
        let table = inner.tables.entry(schema.table.clone()).or_default();
        if let Some(cond) = condition {
            if !cond.eval(table.get(&key)) {
                return Err(KvError::ConditionalCheckFailed {
                    table: schema.table.clone(),
                });
            }
        }
        table.insert(key, item);
        Ok(())
    }

    async fn delete_item(
        &self,
        schema: &TableSchema,
        partition_key: &str,
        sort_key: Option<&str>,
    ) -> Result<(), KvError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(table) = inner.tables.get_mut(&schema.table) {
            table.remove(&schema.storage_key(partition_key, sort_key));
        }
        Ok(())
    }

    async fn query_page(
        &self,
        schema: &TableSchema,
        partition_key: &str,
        start_after: Option<&str>,
    ) -> Result<QueryPage, KvError> {
        let inner = self.inner.lock().unwrap();
        let Some(table) = inner.tables.get(&schema.table) else {
            return Ok(QueryPage::default());
        };
        let prefix = schema.partition_prefix(partition_key);
        let lower = match start_after {
            Some(sk) => {
                let mut k = schema.storage_key(partition_key, Some(sk));
                k.push(0); // smallest strictly-greater key
                k
            }
            None => prefix.clone(),
        };

        let mut items = Vec::new();
        let mut next_key = None;
        for (key, row) in table.range(lower..) {
            if !key.starts_with(&prefix) {
                break;
            }
            if items.len() == QUERY_PAGE_LIMIT {
                let last: &Attrs = items.last().expect("page is full");
                next_key = schema
                    .sort_attr
                    .and_then(|attr| last.get(attr))
                    .cloned();
                break;
            }
            items.push(row.clone());
        }
        Ok(QueryPage { items, next_key })
    }

    async fn scan_page(
        &self,
        schema: &TableSchema,
        limit: usize,
        start_after: Option<&str>,
    ) -> Result<ScanPage, KvError> {
        let inner = self.inner.lock().unwrap();
        let Some(table) = inner.tables.get(&schema.table) else {
            return Ok(ScanPage::default());
        };
        let lower = match start_after {
            Some(pk) => {
                let mut k = pk.as_bytes().to_vec();
                k.push(0);
                k
            }
            None => Vec::new(),
        };

        let mut items = Vec::new();
        let mut next_key = None;
        for (_, row) in table.range(lower..) {
            if items.len() == limit {
                let last: &Attrs = items.last().expect("page is full");
                next_key = last.get(schema.partition_attr).cloned();
                break;
            }
            items.push(row.clone());
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
        let mut inner = self.inner.lock().unwrap();
        inner.batch_write_calls += 1;
        let call = inner.batch_write_calls;

        if inner.faults.fail_calls.contains(&call) {
            return Err(KvError::Internal(format!(
                "injected failure on batch write call {call}"
            )));
        }

        let keep_unprocessed = if call <= inner.faults.unprocessed_calls {
            inner.faults.unprocessed_tail.min(ops.len())
        } else {
            0
        };

        let split = ops.len() - keep_unprocessed;
        let mut ops = ops;
        let unprocessed = ops.split_off(split);
        let table = inner.tables.entry(schema.table.clone()).or_default();
        for op in ops {
            apply_write(table, schema, op)?;
        }
        Ok(unprocessed)
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
        let mut inner = self.inner.lock().unwrap();
        let table = inner.tables.entry(schema.table.clone()).or_default();
        for item in items {
            let key = schema.key_of(&item)?;
            if table.contains_key(&key) {
                return Err(KvError::ConditionalCheckFailed {
                    table: schema.table.clone(),
                });
            }
            table.insert(key, item);
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
        let mut inner = self.inner.lock().unwrap();
        let table = inner.tables.entry(schema.table.clone()).or_default();

        // Validate every insert-only condition before touching anything.
        for op in &ops {
            if let TransactOp::InsertNew(item) = op {
                if table.contains_key(&schema.key_of(item)?) {
                    return Err(KvError::Conflict(format!(
                        "insert-only condition violated on table {}",
                        schema.table
                    )));
                }
            }
        }
        for op in ops {
            match op {
                TransactOp::InsertNew(item) => {
                    let key = schema.key_of(&item)?;
                    table.insert(key, item);
                }
                TransactOp::Delete {
                    partition_key,
                    sort_key,
                } => {
                    table.remove(&schema.storage_key(&partition_key, sort_key.as_deref()));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectBackend for MemoryStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, ObjectError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|(_, bytes)| bytes.clone()))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        if_none_match: bool,
    ) -> Result<(), ObjectError> {
        let mut inner = self.inner.lock().unwrap();
        let bucket = inner.buckets.entry(bucket.to_string()).or_default();
        if if_none_match && bucket.contains_key(key) {
            return Err(ObjectError::Exists(key.to_string()));
        }
        bucket.insert(key.to_string(), (content_type.to_string(), bytes));
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ObjectError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(bucket) = inner.buckets.get_mut(bucket) {
            bucket.remove(key);
        }
        Ok(())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, ObjectError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .buckets
            .get(bucket)
            .is_some_and(|b| b.contains_key(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KvRecord;
    use crate::types::ProofRecord;

    fn proofs_schema() -> TableSchema {
        TableSchema {
            table: "MerkleProofs".into(),
            partition_attr: ProofRecord::PARTITION_ATTR,
            sort_attr: ProofRecord::SORT_ATTR,
        }
    }

    fn put_op(name: &str, addr: &str) -> WriteOp {
        WriteOp::Put(
            ProofRecord {
                whitelist_name: name.into(),
                address: addr.into(),
                amount_wei: "1".into(),
                proof: String::new(),
            }
            .to_attrs(),
        )
    }

    #[tokio::test]
    async fn injected_failure_hits_the_requested_call() {
        let store = MemoryStore::new();
        let schema = proofs_schema();
        store.fail_batch_write_on_call(2);

        assert!(store
            .batch_write(&schema, vec![put_op("w0", "0xaa")])
            .await
            .is_ok());
        let second = store.batch_write(&schema, vec![put_op("w0", "0xbb")]).await;
        assert!(matches!(second, Err(KvError::Internal(_))));
        // Later calls are healthy again.
        assert!(store
            .batch_write(&schema, vec![put_op("w0", "0xcc")])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn unprocessed_tail_is_returned_not_applied() {
        let store = MemoryStore::new();
        let schema = proofs_schema();
        store.leave_unprocessed(1, 2);

        let ops = vec![
            put_op("w0", "0xaa"),
            put_op("w0", "0xbb"),
            put_op("w0", "0xcc"),
        ];
        let unprocessed = store.batch_write(&schema, ops).await.unwrap();
        assert_eq!(unprocessed.len(), 2);
        assert_eq!(store.table_len("MerkleProofs"), 1);

        // Resubmitting the leftovers (call 2, past the fault window) lands them.
        let retry = store.batch_write(&schema, unprocessed).await.unwrap();
        assert!(retry.is_empty());
        assert_eq!(store.table_len("MerkleProofs"), 3);
    }

    #[tokio::test]
    async fn conditional_puts_are_linearized() {
        use std::sync::Arc;
        let store = Arc::new(MemoryStore::new());
        let schema = Arc::new(proofs_schema());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let schema = Arc::clone(&schema);
            handles.push(tokio::spawn(async move {
                let item = ProofRecord {
                    whitelist_name: "w0".into(),
                    address: "0xaa".into(),
                    amount_wei: "1".into(),
                    proof: String::new(),
                }
                .to_attrs();
                store
                    .put_item(&schema, item, Some(Condition::KeyNotExists))
                    .await
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
