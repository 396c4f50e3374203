//! # Tree Lifecycle Orchestrator
//!
//! The command side of the service, and the only writer of the roots table.
//! The roots row for a whitelist name is a single-writer state machine:
//!
//! ```text
//! absent -> CREATING -> COMPLETED -+
//!              |                   +-> DELETING -> absent
//!              +------> FAILED ----+       |
//!                         ^                |
//!                         +----------------+   (rollback on purge failure)
//! ```
//!
//! No transaction spans the object store and the KV store, and a tree's
//! proof rows do not fit in one KV transaction, so atomicity is encoded in
//! the status itself. Every transition is a conditional write that pins
//! both the expected status *and* the root hash observed when the protocol
//! began; two racing commands on the same name cannot both win, because the
//! loser's condition no longer holds. There is no client-side locking or
//! caching anywhere in this path — the KV's conditional-write primitive is
//! the entire concurrency story.
//!
//! A process crash mid-protocol leaves a row in CREATING or DELETING.
//! Readers report such trees as not ready and DeleteTree refuses them;
//! recovery is the operator's `force_failed`, which conditionally moves the
//! stuck row to FAILED so DeleteTree can clean up.

use tokio::time::timeout;

use crate::config::{CSV_CONTENT_TYPE, DEFAULT_BATCH_RETRIES, WHITELIST_FETCH_DEADLINE};
use crate::error::ServiceError;
use crate::merkle;
use crate::store::{Condition, KvError, KvTable, ObjectError, ObjectStore};
use crate::types::{
    validate_whitelist_name, ProofRecord, RootRecord, TreeStatus, ATTR_MERKLE_ROOT,
    ATTR_WHITELIST_STATUS,
};
use crate::whitelist::parse_whitelist_csv;

/// Result of a successful CreateTree.
#[derive(Debug, Clone)]
pub struct CreatedTree {
    /// `0x`-prefixed 32-byte root hash.
    pub merkle_root: String,
    /// Number of whitelist entries (= proof rows written).
    pub entry_count: usize,
}

/// The orchestrator. Owns the object-store adapter and both tables.
#[derive(Clone)]
pub struct TreeLifecycle {
    objects: ObjectStore,
    roots: KvTable<RootRecord>,
    proofs: KvTable<ProofRecord>,
}

/// Condition pinning the observed root hash and one of the given statuses.
fn guard(merkle_root: &str, statuses: &[TreeStatus]) -> Condition {
    let root_matches = Condition::Eq(ATTR_MERKLE_ROOT, merkle_root.to_string());
    let mut status_cond = Condition::Eq(ATTR_WHITELIST_STATUS, statuses[0].as_str().to_string());
    for status in &statuses[1..] {
        status_cond = status_cond.or(Condition::Eq(
            ATTR_WHITELIST_STATUS,
            status.as_str().to_string(),
        ));
    }
    root_matches.and(status_cond)
}

impl TreeLifecycle {
    pub fn new(
        objects: ObjectStore,
        roots: KvTable<RootRecord>,
        proofs: KvTable<ProofRecord>,
    ) -> Self {
        Self {
            objects,
            roots,
            proofs,
        }
    }

    /// Object key for a whitelist's CSV.
    fn csv_key(name: &str) -> String {
        format!("{name}.csv")
    }

    /// Upload: run the full input gate over the CSV, then store it.
    ///
    /// The gate runs *before* the write so the bucket only ever holds
    /// whitelists a later CreateTree will accept. Returns the row count.
    pub async fn upload_whitelist(
        &self,
        name: &str,
        csv: &[u8],
        allow_overwrite: bool,
    ) -> Result<usize, ServiceError> {
        validate_whitelist_name(name)?;
        let entries = parse_whitelist_csv(csv)?;

        match self
            .objects
            .put(&Self::csv_key(name), csv.to_vec(), CSV_CONTENT_TYPE, allow_overwrite)
            .await
        {
            Ok(()) => {
                tracing::info!(whitelist = name, rows = entries.len(), "whitelist stored");
                Ok(entries.len())
            }
            Err(ObjectError::Exists(_)) => Err(ServiceError::validation(format!(
                "whitelist {name} already exists"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// CreateTree: read the CSV, build the tree, then run the three-phase
    /// commit — insert CREATING, bulk-write proofs, promote to COMPLETED.
    ///
    /// Any proof-write failure triggers the compensating CREATING -> FAILED
    /// transition before the original error surfaces. The compensation is
    /// itself conditional; if it does not apply (or fails), the row stays
    /// in CREATING for the operator tool.
    pub async fn create_tree(&self, name: &str) -> Result<CreatedTree, ServiceError> {
        validate_whitelist_name(name)?;

        // Phase 0: fetch and gate the whitelist, build root and proofs.
        let csv = match timeout(WHITELIST_FETCH_DEADLINE, self.objects.get(&Self::csv_key(name)))
            .await
        {
            Err(_) => {
                return Err(ServiceError::InternalError(format!(
                    "timed out fetching whitelist {name}"
                )))
            }
            Ok(Err(ObjectError::NotFound(_))) => {
                return Err(ServiceError::validation(format!(
                    "whitelist {name} does not exist"
                )))
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(bytes)) => bytes,
        };
        let entries = parse_whitelist_csv(&csv)?;
        let output = merkle::build_whitelist_tree(&entries);

        // Phase 1: claim the name with an insert-only CREATING row. A
        // pre-existing row — any status — loses here.
        let creating = RootRecord {
            whitelist_name: name.to_string(),
            merkle_root: output.root.clone(),
            status: TreeStatus::Creating,
        };
        self.roots
            .put_item(&creating, Some(Condition::KeyNotExists))
            .await?;

        // Phase 2: bulk-insert the proof rows.
        let proof_rows: Vec<ProofRecord> = output
            .records
            .into_iter()
            .map(|r| ProofRecord {
                whitelist_name: name.to_string(),
                address: r.address,
                amount_wei: r.amount_wei,
                proof: r.proof,
            })
            .collect();

        if let Err(e) = self
            .proofs
            .batch_put_write(&proof_rows, DEFAULT_BATCH_RETRIES)
            .await
        {
            self.compensate(&creating, TreeStatus::Creating, &e).await;
            return Err(e.into());
        }

        // Phase 3: promote. The guard pins both the root we inserted and
        // the CREATING status, so a concurrent repair or delete loses.
        self.roots
            .put_item(
                &creating.with_status(TreeStatus::Completed),
                Some(guard(&output.root, &[TreeStatus::Creating])),
            )
            .await?;

        tracing::info!(
            whitelist = name,
            root = %output.root,
            entries = proof_rows.len(),
            "merkle tree completed"
        );
        Ok(CreatedTree {
            merkle_root: output.root,
            entry_count: proof_rows.len(),
        })
    }

    /// DeleteTree: flip a COMPLETED or FAILED row to DELETING, purge the
    /// proof rows, then remove the root row. A purge failure rolls the row
    /// back to FAILED before the original error surfaces.
    pub async fn delete_tree(&self, name: &str) -> Result<(), ServiceError> {
        validate_whitelist_name(name)?;

        let root = self
            .roots
            .get_item(name, None)
            .await?
            .ok_or_else(|| ServiceError::validation(format!("merkle tree {name} not found")))?;

        match root.status {
            TreeStatus::Completed | TreeStatus::Failed => {}
            TreeStatus::Creating | TreeStatus::Deleting => {
                return Err(ServiceError::validation(format!(
                    "merkle tree {name} is {} and cannot be deleted",
                    root.status
                )))
            }
        }

        // Claim the delete. Pinning root + (COMPLETED | FAILED) means two
        // racing deletes produce exactly one DELETING transition.
        self.roots
            .put_item(
                &root.with_status(TreeStatus::Deleting),
                Some(guard(
                    &root.merkle_root,
                    &[TreeStatus::Completed, TreeStatus::Failed],
                )),
            )
            .await?;

        if let Err(e) = self.purge(name).await {
            self.compensate(&root, TreeStatus::Deleting, &e).await;
            return Err(e.into());
        }

        tracing::info!(whitelist = name, "merkle tree deleted");
        Ok(())
    }

    /// Enumerates and bulk-deletes all proof rows, then the root row.
    async fn purge(&self, name: &str) -> Result<(), KvError> {
        let rows = self.proofs.paginated_query(name).await?;
        let sort_keys: Vec<String> = rows.into_iter().map(|r| r.address).collect();
        self.proofs
            .batch_delete_write(name, &sort_keys, DEFAULT_BATCH_RETRIES)
            .await?;
        self.roots.delete_item(name, None).await
    }

    /// Compensating transition to FAILED, conditional on the row still
    /// holding the root and status this protocol run observed. Its own
    /// failure is logged, never retried, and never masks the original
    /// error — a stuck row is the operator tool's problem.
    async fn compensate(&self, observed: &RootRecord, expected: TreeStatus, original: &KvError) {
        let result = self
            .roots
            .put_item(
                &observed.with_status(TreeStatus::Failed),
                Some(guard(&observed.merkle_root, &[expected])),
            )
            .await;
        match result {
            Ok(()) => tracing::warn!(
                whitelist = %observed.whitelist_name,
                error = %original,
                "bulk write failed; root row marked FAILED"
            ),
            Err(comp) => tracing::error!(
                whitelist = %observed.whitelist_name,
                error = %original,
                compensation_error = %comp,
                "bulk write failed and the FAILED transition did not apply; row left in {}",
                expected
            ),
        }
    }

    /// DeleteWhitelist: refuse while a root row exists in any status, then
    /// delete the CSV. The refusal keeps a live tree's provenance intact.
    pub async fn delete_whitelist(&self, name: &str) -> Result<(), ServiceError> {
        validate_whitelist_name(name)?;

        if self.roots.get_item(name, None).await?.is_some() {
            return Err(ServiceError::validation(format!(
                "a merkle tree exists for whitelist {name}; delete the tree first"
            )));
        }

        self.objects.delete(&Self::csv_key(name)).await?;
        tracing::info!(whitelist = name, "whitelist deleted");
        Ok(())
    }

    /// Operator repair: force a row stuck in CREATING or DELETING (crashed
    /// process, failed compensation) to FAILED so DeleteTree can clean it
    /// up. Returns the status the row was stuck in.
    pub async fn force_failed(&self, name: &str) -> Result<TreeStatus, ServiceError> {
        validate_whitelist_name(name)?;

        let root = self
            .roots
            .get_item(name, None)
            .await?
            .ok_or_else(|| ServiceError::validation(format!("merkle tree {name} not found")))?;

        match root.status {
            TreeStatus::Creating | TreeStatus::Deleting => {}
            other => {
                return Err(ServiceError::validation(format!(
                    "merkle tree {name} is {other}, not stuck"
                )))
            }
        }

        self.roots
            .put_item(
                &root.with_status(TreeStatus::Failed),
                Some(guard(&root.merkle_root, &[root.status])),
            )
            .await?;
        tracing::warn!(whitelist = name, was = %root.status, "root row forced to FAILED");
        Ok(root.status)
    }
}
