//! # KV Adapter
//!
//! Typed table access over a [`KvBackend`]. [`KvTable<T>`] pairs a record
//! type with its table name and owns every protocol obligation above the
//! provider:
//!
//! - **Chunking** — bulk operations split into provider-sized chunks
//!   (25 for batch writes and statements, 100 for transactions) and execute
//!   the chunks sequentially.
//! - **The unprocessed-items loop** — after each batch write, any items the
//!   provider declined are resubmitted verbatim. Attempt `i` sleeps
//!   `10 ms * 2^i` first; when the retry budget runs out with items still
//!   pending, the call fails with [`KvError::PartialBatch`]. A bulk write
//!   that "succeeds" while quietly dropping rows would poison every tree
//!   built on top of it.
//! - **Deadlines** — each provider round trip runs under
//!   [`KV_STEP_DEADLINE`]; a deadline miss is an error like any other.
//! - **Conditional writes** — passed through to the backend, which
//!   evaluates them atomically with the write.
//!
//! Reads are strongly consistent end to end: the backends serve reads from
//! the same state that acknowledged the writes, and nothing in this layer
//! caches.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio::time::{sleep, timeout};

use crate::config::{
    BATCH_RETRY_BASE_DELAY, BATCH_STATEMENT_CHUNK, BATCH_WRITE_CHUNK, KV_STEP_DEADLINE,
    TRANSACT_WRITE_CHUNK,
};

use super::{Condition, KvBackend, KvError, KvRecord, TableSchema, TransactOp, WriteOp};

/// Typed access to one table.
pub struct KvTable<T: KvRecord> {
    backend: Arc<dyn KvBackend>,
    schema: TableSchema,
    _record: PhantomData<fn() -> T>,
}

impl<T: KvRecord> Clone for KvTable<T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            schema: self.schema.clone(),
            _record: PhantomData,
        }
    }
}

/// Runs a backend call under the per-step deadline.
async fn with_deadline<F, T>(fut: F) -> Result<T, KvError>
where
    F: Future<Output = Result<T, KvError>>,
{
    timeout(KV_STEP_DEADLINE, fut)
        .await
        .map_err(|_| KvError::Timeout(KV_STEP_DEADLINE))?
}

impl<T: KvRecord> KvTable<T> {
    /// Binds the record type to a named table on a backend.
    pub fn new(backend: Arc<dyn KvBackend>, table: impl Into<String>) -> Self {
        Self {
            backend,
            schema: TableSchema {
                table: table.into(),
                partition_attr: T::PARTITION_ATTR,
                sort_attr: T::SORT_ATTR,
            },
            _record: PhantomData,
        }
    }

    /// The table name this adapter is bound to.
    pub fn table(&self) -> &str {
        &self.schema.table
    }

    /// Strongly consistent point read.
    pub async fn get_item(
        &self,
        partition_key: &str,
        sort_key: Option<&str>,
    ) -> Result<Option<T>, KvError> {
        let attrs = with_deadline(self.backend.get_item(&self.schema, partition_key, sort_key))
            .await?;
        attrs.as_ref().map(T::from_attrs).transpose()
    }

    /// Writes one record, optionally guarded by a condition on the current
    /// row. A failed guard surfaces as [`KvError::ConditionalCheckFailed`].
    pub async fn put_item(&self, record: &T, condition: Option<Condition>) -> Result<(), KvError> {
        with_deadline(
            self.backend
                .put_item(&self.schema, record.to_attrs(), condition),
        )
        .await
    }

    /// Deletes one row by key. Absent rows delete successfully.
    pub async fn delete_item(
        &self,
        partition_key: &str,
        sort_key: Option<&str>,
    ) -> Result<(), KvError> {
        with_deadline(self.backend.delete_item(&self.schema, partition_key, sort_key)).await
    }

    /// Drains an entire partition, following continuation keys until the
    /// backend reports no more pages. Strongly consistent.
    pub async fn paginated_query(&self, partition_key: &str) -> Result<Vec<T>, KvError> {
        let mut records = Vec::new();
        let mut start_after: Option<String> = None;
        loop {
            let page = with_deadline(self.backend.query_page(
                &self.schema,
                partition_key,
                start_after.as_deref(),
            ))
            .await?;
            for attrs in &page.items {
                records.push(T::from_attrs(attrs)?);
            }
            match page.next_key {
                Some(key) => start_after = Some(key),
                None => return Ok(records),
            }
        }
    }

    /// Reads one page of the table in partition-key order. Returns the
    /// records and, when more rows remain, the partition key to resume
    /// after — the catalog's opaque continuation token.
    pub async fn scan(
        &self,
        page_size: usize,
        start_token: Option<&str>,
    ) -> Result<(Vec<T>, Option<String>), KvError> {
        let page = with_deadline(self.backend.scan_page(&self.schema, page_size, start_token))
            .await?;
        let mut records = Vec::with_capacity(page.items.len());
        for attrs in &page.items {
            records.push(T::from_attrs(attrs)?);
        }
        Ok((records, page.next_key))
    }

    /// Bulk upsert in chunks of 25 with the unprocessed-items retry loop.
    pub async fn batch_put_write(&self, records: &[T], max_retries: u32) -> Result<(), KvError> {
        let ops: Vec<WriteOp> = records.iter().map(|r| WriteOp::Put(r.to_attrs())).collect();
        self.run_batches(ops, max_retries).await
    }

    /// Bulk delete by sort key in chunks of 25 with the unprocessed-items
    /// retry loop.
    pub async fn batch_delete_write(
        &self,
        partition_key: &str,
        sort_keys: &[String],
        max_retries: u32,
    ) -> Result<(), KvError> {
        let ops: Vec<WriteOp> = sort_keys
            .iter()
            .map(|sk| WriteOp::Delete {
                partition_key: partition_key.to_string(),
                sort_key: Some(sk.clone()),
            })
            .collect();
        self.run_batches(ops, max_retries).await
    }

    /// Chunks operations and runs each chunk through the retry loop.
    async fn run_batches(&self, ops: Vec<WriteOp>, max_retries: u32) -> Result<(), KvError> {
        for chunk in ops.chunks(BATCH_WRITE_CHUNK) {
            let mut pending = chunk.to_vec();
            let mut attempt: u32 = 0;
            loop {
                let unprocessed =
                    with_deadline(self.backend.batch_write(&self.schema, pending)).await?;
                if unprocessed.is_empty() {
                    break;
                }
                if attempt >= max_retries {
                    return Err(KvError::PartialBatch {
                        left: unprocessed.len(),
                        attempts: attempt + 1,
                    });
                }
                sleep(BATCH_RETRY_BASE_DELAY * 2u32.pow(attempt)).await;
                attempt += 1;
                pending = unprocessed;
            }
        }
        Ok(())
    }

    /// Insert-only bulk write in statement chunks of 25. The first record
    /// whose key already exists fails the call with
    /// [`KvError::ConditionalCheckFailed`]; earlier chunks stay written.
    pub async fn batch_insert_via_statement(&self, records: &[T]) -> Result<(), KvError> {
        for chunk in records.chunks(BATCH_STATEMENT_CHUNK) {
            let items = chunk.iter().map(KvRecord::to_attrs).collect();
            with_deadline(self.backend.execute_batch_insert(&self.schema, items)).await?;
        }
        Ok(())
    }

    /// Insert-only writes in atomic chunks of 100. Each chunk either lands
    /// whole or not at all; a key collision cancels its chunk with
    /// [`KvError::Conflict`].
    pub async fn transact_insert_write(&self, records: &[T]) -> Result<(), KvError> {
        for chunk in records.chunks(TRANSACT_WRITE_CHUNK) {
            let ops = chunk
                .iter()
                .map(|r| TransactOp::InsertNew(r.to_attrs()))
                .collect();
            with_deadline(self.backend.transact_write(&self.schema, ops)).await?;
        }
        Ok(())
    }

    /// Deletes by sort key in atomic chunks of 100.
    pub async fn transact_delete_write(
        &self,
        partition_key: &str,
        sort_keys: &[String],
    ) -> Result<(), KvError> {
        for chunk in sort_keys.chunks(TRANSACT_WRITE_CHUNK) {
            let ops = chunk
                .iter()
                .map(|sk| TransactOp::Delete {
                    partition_key: partition_key.to_string(),
                    sort_key: Some(sk.clone()),
                })
                .collect();
            with_deadline(self.backend.transact_write(&self.schema, ops)).await?;
        }
        Ok(())
    }
}
