//! # Read Path
//!
//! Lookups over the two tables, with one rule enforced everywhere: only a
//! COMPLETED tree is readable. Rows in CREATING, FAILED, or DELETING are
//! reported as "not ready" — their proof rows may be half-written or
//! half-deleted, and serving them would hand out proofs that an on-chain
//! verifier rejects (or worse, accepts against a root that is about to
//! vanish).
//!
//! Addresses are canonicalized to their EIP-55 form *before* the proofs
//! lookup, so any casing that passes checksum validation resolves to the
//! same stored record.

use crate::config::MAX_PAGE_SIZE;
use crate::error::ServiceError;
use crate::address::EthAddress;
use crate::store::KvTable;
use crate::types::{validate_whitelist_name, ProofRecord, RootRecord, TreeStatus};

/// One page of the root catalog.
#[derive(Debug, Clone)]
pub struct RootsPage {
    pub roots: Vec<RootRecord>,
    /// Token for the next page — the last whitelist name of this one.
    pub next_token: Option<String>,
}

/// One page of the tree catalog: names only, safe for anonymous callers.
#[derive(Debug, Clone)]
pub struct TreesPage {
    pub whitelist_names: Vec<String>,
    pub next_token: Option<String>,
}

/// The query side of the service. Never writes.
#[derive(Clone)]
pub struct TreeReader {
    roots: KvTable<RootRecord>,
    proofs: KvTable<ProofRecord>,
}

impl TreeReader {
    pub fn new(roots: KvTable<RootRecord>, proofs: KvTable<ProofRecord>) -> Self {
        Self { roots, proofs }
    }

    /// The root row for a name, in whatever status it currently holds.
    /// Callers decide what non-COMPLETED means to them.
    pub async fn get_merkle_root(&self, name: &str) -> Result<Option<RootRecord>, ServiceError> {
        validate_whitelist_name(name)?;
        Ok(self.roots.get_item(name, None).await?)
    }

    /// The proof row for `(name, address)`, gated on a COMPLETED tree.
    ///
    /// The address is validated (syntax, non-zero, checksum) and normalized
    /// to its checksummed form before the lookup. Returns `None` when the
    /// tree is COMPLETED but the address simply is not in it.
    pub async fn get_merkle_proof(
        &self,
        name: &str,
        address: &str,
    ) -> Result<Option<ProofRecord>, ServiceError> {
        validate_whitelist_name(name)?;
        let address = EthAddress::parse_checked(address)
            .map_err(|e| ServiceError::validation(e.to_string()))?;

        self.require_completed(name).await?;
        Ok(self
            .proofs
            .get_item(name, Some(&address.checksummed()))
            .await?)
    }

    /// Every proof row of a COMPLETED tree, in address order. Unbounded by
    /// design — a full tree is up to 100k rows, and the export endpoint is
    /// the one place that wants all of them.
    pub async fn get_merkle_proofs(&self, name: &str) -> Result<Vec<ProofRecord>, ServiceError> {
        validate_whitelist_name(name)?;
        self.require_completed(name).await?;
        Ok(self.proofs.paginated_query(name).await?)
    }

    /// One page of the root catalog, any status included.
    pub async fn get_merkle_roots(
        &self,
        page_size: u32,
        start_token: Option<&str>,
    ) -> Result<RootsPage, ServiceError> {
        validate_page(page_size, start_token)?;
        let (roots, next_token) = self.roots.scan(page_size as usize, start_token).await?;
        Ok(RootsPage { roots, next_token })
    }

    /// One page of the tree catalog, projected down to names.
    pub async fn get_merkle_trees(
        &self,
        page_size: u32,
        start_token: Option<&str>,
    ) -> Result<TreesPage, ServiceError> {
        validate_page(page_size, start_token)?;
        let (roots, next_token) = self.roots.scan(page_size as usize, start_token).await?;
        Ok(TreesPage {
            whitelist_names: roots.into_iter().map(|r| r.whitelist_name).collect(),
            next_token,
        })
    }

    /// Fails unless the root row exists and is COMPLETED.
    async fn require_completed(&self, name: &str) -> Result<(), ServiceError> {
        let root = self
            .roots
            .get_item(name, None)
            .await?
            .ok_or_else(|| ServiceError::validation(format!("merkle tree {name} not found")))?;
        if root.status != TreeStatus::Completed {
            return Err(ServiceError::validation(format!(
                "merkle tree {name} is not ready"
            )));
        }
        Ok(())
    }
}

/// Page sizes are integers in 1..=1000; tokens share the whitelist-name
/// grammar (a token *is* a whitelist name).
fn validate_page(page_size: u32, start_token: Option<&str>) -> Result<(), ServiceError> {
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(ServiceError::validation(format!(
            "page size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }
    if let Some(token) = start_token {
        validate_whitelist_name(token)
            .map_err(|_| ServiceError::validation("malformed starting token"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{KvBackend, KvError, MemoryStore};

    const ADDRESS: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    fn setup() -> (TreeReader, KvTable<RootRecord>, KvTable<ProofRecord>) {
        let store = Arc::new(MemoryStore::new());
        let roots: KvTable<RootRecord> =
            KvTable::new(Arc::clone(&store) as Arc<dyn KvBackend>, "MerkleRoots");
        let proofs: KvTable<ProofRecord> =
            KvTable::new(Arc::clone(&store) as Arc<dyn KvBackend>, "MerkleProofs");
        (TreeReader::new(roots.clone(), proofs.clone()), roots, proofs)
    }

    async fn seed(
        roots: &KvTable<RootRecord>,
        proofs: &KvTable<ProofRecord>,
        name: &str,
        status: TreeStatus,
    ) -> Result<(), KvError> {
        roots
            .put_item(
                &RootRecord {
                    whitelist_name: name.into(),
                    merkle_root: format!("0x{}", "ab".repeat(32)),
                    status,
                },
                None,
            )
            .await?;
        proofs
            .put_item(
                &ProofRecord {
                    whitelist_name: name.into(),
                    address: ADDRESS.into(),
                    amount_wei: "1250000000000000000000".into(),
                    proof: String::new(),
                },
                None,
            )
            .await
    }

    #[tokio::test]
    async fn proof_lookup_normalizes_caller_casing() {
        let (reader, roots, proofs) = setup();
        seed(&roots, &proofs, "w0", TreeStatus::Completed)
            .await
            .unwrap();

        // Lowercase, uppercase-body, and checksummed input all resolve to
        // the same stored row.
        let lower = ADDRESS.to_ascii_lowercase();
        let upper = format!("0x{}", ADDRESS[2..].to_ascii_uppercase());
        for form in [ADDRESS.to_string(), lower, upper] {
            let record = reader
                .get_merkle_proof("w0", &form)
                .await
                .unwrap()
                .expect("proof should resolve");
            assert_eq!(record.address, ADDRESS);
        }
    }

    #[tokio::test]
    async fn proof_lookup_gates_on_completed() {
        let (reader, roots, proofs) = setup();
        for status in [TreeStatus::Creating, TreeStatus::Failed, TreeStatus::Deleting] {
            seed(&roots, &proofs, "w0", status).await.unwrap();
            match reader.get_merkle_proof("w0", ADDRESS).await {
                Err(ServiceError::Validation(msg)) => assert!(msg.contains("not ready")),
                other => panic!("expected not-ready validation, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn proof_lookup_on_missing_tree_is_not_found_validation() {
        let (reader, _, _) = setup();
        match reader.get_merkle_proof("w0", ADDRESS).await {
            Err(ServiceError::Validation(msg)) => assert!(msg.contains("not found")),
            other => panic!("expected validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn absent_address_in_completed_tree_is_none() {
        let (reader, roots, proofs) = setup();
        seed(&roots, &proofs, "w0", TreeStatus::Completed)
            .await
            .unwrap();
        let other = format!("0x{:040x}", 7);
        assert!(reader
            .get_merkle_proof("w0", &other)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn invalid_address_fails_before_any_lookup() {
        let (reader, _, _) = setup();
        let zero = format!("0x{}", "0".repeat(40));
        assert!(matches!(
            reader.get_merkle_proof("w0", &zero).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            reader.get_merkle_proof("w0", "0x123").await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn reads_are_repeatable() {
        let (reader, roots, proofs) = setup();
        seed(&roots, &proofs, "w0", TreeStatus::Completed)
            .await
            .unwrap();
        let first = reader.get_merkle_proof("w0", ADDRESS).await.unwrap();
        let second = reader.get_merkle_proof("w0", ADDRESS).await.unwrap();
        assert_eq!(first, second);

        let root_a = reader.get_merkle_root("w0").await.unwrap();
        let root_b = reader.get_merkle_root("w0").await.unwrap();
        assert_eq!(root_a, root_b);
    }

    #[tokio::test]
    async fn catalog_pagination_across_three_trees() {
        let (reader, roots, proofs) = setup();
        for name in ["alpha", "beta", "gamma"] {
            seed(&roots, &proofs, name, TreeStatus::Completed)
                .await
                .unwrap();
        }

        let first = reader.get_merkle_roots(2, None).await.unwrap();
        assert_eq!(first.roots.len(), 2);
        let token = first.next_token.expect("token for remaining page");

        let second = reader.get_merkle_roots(2, Some(&token)).await.unwrap();
        assert_eq!(second.roots.len(), 1);
        assert!(second.next_token.is_none());

        // Same walk through the name-only projection.
        let trees = reader.get_merkle_trees(2, None).await.unwrap();
        assert_eq!(trees.whitelist_names, vec!["alpha", "beta"]);
        let trees_rest = reader
            .get_merkle_trees(2, trees.next_token.as_deref())
            .await
            .unwrap();
        assert_eq!(trees_rest.whitelist_names, vec!["gamma"]);
    }

    #[tokio::test]
    async fn page_size_bounds() {
        let (reader, _, _) = setup();
        assert!(matches!(
            reader.get_merkle_roots(0, None).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            reader.get_merkle_roots(1001, None).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(reader.get_merkle_roots(1000, None).await.is_ok());
    }

    #[tokio::test]
    async fn malformed_token_is_rejected() {
        let (reader, _, _) = setup();
        assert!(matches!(
            reader.get_merkle_roots(10, Some("0bad token")).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn proofs_export_requires_completed() {
        let (reader, roots, proofs) = setup();
        seed(&roots, &proofs, "w0", TreeStatus::Failed).await.unwrap();
        assert!(matches!(
            reader.get_merkle_proofs("w0").await,
            Err(ServiceError::Validation(_))
        ));

        seed(&roots, &proofs, "w0", TreeStatus::Completed)
            .await
            .unwrap();
        assert_eq!(reader.get_merkle_proofs("w0").await.unwrap().len(), 1);
    }
}
