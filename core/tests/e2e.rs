//! End-to-end integration tests for the claimtree core.
//!
//! These drive the full lifecycle against the sled-backed store: upload a
//! whitelist, build its tree, read the root and proofs back, verify every
//! proof against the root with the verifier's own fold, and tear the tree
//! down again. Each test stands alone on a temporary store — no shared
//! state, no ordering dependencies.

use std::sync::Arc;

use alloy_primitives::U256;
use claimtree_core::address::EthAddress;
use claimtree_core::amount::parse_token_amount;
use claimtree_core::error::ServiceError;
use claimtree_core::lifecycle::TreeLifecycle;
use claimtree_core::merkle;
use claimtree_core::query::TreeReader;
use claimtree_core::store::{KvBackend, KvTable, LocalStore, ObjectBackend, ObjectStore};
use claimtree_core::types::{ProofRecord, RootRecord, TreeStatus};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

/// Spins up the full stack on a temporary store.
fn setup() -> (TreeLifecycle, TreeReader) {
    let store = Arc::new(LocalStore::open_temporary().expect("temp store"));
    let objects = ObjectStore::new(
        Arc::clone(&store) as Arc<dyn ObjectBackend>,
        "whitelist-bucket",
    )
    .expect("valid bucket name");
    let roots: KvTable<RootRecord> =
        KvTable::new(Arc::clone(&store) as Arc<dyn KvBackend>, "MerkleRoots");
    let proofs: KvTable<ProofRecord> =
        KvTable::new(Arc::clone(&store) as Arc<dyn KvBackend>, "MerkleProofs");
    (
        TreeLifecycle::new(objects, roots.clone(), proofs.clone()),
        TreeReader::new(roots, proofs),
    )
}

/// A five-entry whitelist with fractional, whole, and 18-decimal amounts.
fn sample_csv() -> String {
    let amounts = [
        "6666.67",
        "1250",
        "53228.051486152399030389",
        "1250.00",
        "16023.916666666666666667",
    ];
    let mut csv = String::from("WhitelistAddress,WhitelistAmount\n");
    for (i, amount) in amounts.iter().enumerate() {
        csv.push_str(&format!("0x{:040x},{amount}\n", i + 1));
    }
    csv
}

/// CSV with `n` rows of identical amounts.
fn csv_with_rows(n: usize) -> String {
    let mut csv = String::from("WhitelistAddress,WhitelistAmount\n");
    for i in 1..=n {
        csv.push_str(&format!("0x{i:040x},42\n"));
    }
    csv
}

// ---------------------------------------------------------------------------
// 1. Full Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_lifecycle_upload_create_read_delete() {
    let (lifecycle, reader) = setup();

    // Upload and build.
    let rows = lifecycle
        .upload_whitelist("w0", sample_csv().as_bytes(), false)
        .await
        .unwrap();
    assert_eq!(rows, 5);
    let created = lifecycle.create_tree("w0").await.unwrap();
    assert_eq!(created.entry_count, 5);

    // Root is published and COMPLETED.
    let root = reader.get_merkle_root("w0").await.unwrap().unwrap();
    assert_eq!(root.status, TreeStatus::Completed);
    assert_eq!(root.merkle_root, created.merkle_root);

    // All five proofs are served.
    let proofs = reader.get_merkle_proofs("w0").await.unwrap();
    assert_eq!(proofs.len(), 5);

    // Tear down.
    lifecycle.delete_tree("w0").await.unwrap();
    assert!(reader.get_merkle_root("w0").await.unwrap().is_none());
    assert!(matches!(
        reader.get_merkle_proofs("w0").await,
        Err(ServiceError::Validation(_))
    ));

    // With the tree gone, the whitelist itself can go.
    lifecycle.delete_whitelist("w0").await.unwrap();
}

// ---------------------------------------------------------------------------
// 2. Every Served Proof Verifies Against the Served Root
// ---------------------------------------------------------------------------

#[tokio::test]
async fn served_proofs_verify_against_served_root() {
    let (lifecycle, reader) = setup();
    lifecycle
        .upload_whitelist("w0", csv_with_rows(37).as_bytes(), false)
        .await
        .unwrap();
    lifecycle.create_tree("w0").await.unwrap();

    let root_record = reader.get_merkle_root("w0").await.unwrap().unwrap();
    let root = merkle::parse_hex32(&root_record.merkle_root).expect("root is 32-byte hex");

    let proofs = reader.get_merkle_proofs("w0").await.unwrap();
    assert_eq!(proofs.len(), 37);
    for record in proofs {
        // Recompute the leaf exactly as the builder did.
        let address = EthAddress::parse_checked(&record.address).expect("stored checksummed");
        let amount =
            U256::from_str_radix(&record.amount_wei, 10).expect("stored amount is decimal");
        let leaf = merkle::leaf_hash(&address, &amount);
        let siblings = merkle::parse_proof(&record.proof).expect("well-formed proof");
        assert!(
            merkle::verify_proof(&root, &leaf, &siblings),
            "proof for {} must verify",
            record.address
        );
    }
}

// ---------------------------------------------------------------------------
// 3. Single-Entry Tree
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_entry_tree_root_equals_leaf_and_proof_is_empty() {
    let (lifecycle, reader) = setup();
    let csv = "WhitelistAddress,WhitelistAmount\n\
               0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed,1250\n";
    lifecycle
        .upload_whitelist("solo", csv.as_bytes(), false)
        .await
        .unwrap();
    lifecycle.create_tree("solo").await.unwrap();

    let root = reader.get_merkle_root("solo").await.unwrap().unwrap();
    let record = reader
        .get_merkle_proof("solo", "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.proof, "");

    let address = EthAddress::parse_checked(&record.address).unwrap();
    let amount = parse_token_amount("1250").unwrap();
    let leaf = merkle::leaf_hash(&address, &amount);
    assert_eq!(root.merkle_root, merkle::hex32(&leaf));
}

// ---------------------------------------------------------------------------
// 4. Casing Normalization at the Read Boundary
// ---------------------------------------------------------------------------

#[tokio::test]
async fn any_valid_casing_resolves_to_the_same_proof() {
    let (lifecycle, reader) = setup();
    let checksummed = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    // Upload in lowercase; storage must still be checksummed.
    let csv = format!(
        "WhitelistAddress,WhitelistAmount\n{},7\n",
        checksummed.to_ascii_lowercase()
    );
    lifecycle
        .upload_whitelist("w0", csv.as_bytes(), false)
        .await
        .unwrap();
    lifecycle.create_tree("w0").await.unwrap();

    let by_lower = reader
        .get_merkle_proof("w0", &checksummed.to_ascii_lowercase())
        .await
        .unwrap()
        .unwrap();
    let by_checksum = reader
        .get_merkle_proof("w0", checksummed)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_lower, by_checksum);
    assert_eq!(by_lower.address, checksummed);
}

// ---------------------------------------------------------------------------
// 5. Status Gating While a Tree Is Not COMPLETED
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tree_stuck_in_creating_reads_as_not_ready() {
    // Build a stack by hand so a CREATING row can be planted directly —
    // the state a crashed create leaves behind.
    let store = Arc::new(LocalStore::open_temporary().unwrap());
    let roots: KvTable<RootRecord> =
        KvTable::new(Arc::clone(&store) as Arc<dyn KvBackend>, "MerkleRoots");
    let proofs: KvTable<ProofRecord> =
        KvTable::new(Arc::clone(&store) as Arc<dyn KvBackend>, "MerkleProofs");
    let reader = TreeReader::new(roots.clone(), proofs.clone());

    roots
        .put_item(
            &RootRecord {
                whitelist_name: "w0".into(),
                merkle_root: format!("0x{}", "cd".repeat(32)),
                status: TreeStatus::Creating,
            },
            None,
        )
        .await
        .unwrap();
    proofs
        .put_item(
            &ProofRecord {
                whitelist_name: "w0".into(),
                address: format!("0x{:040x}", 1),
                amount_wei: "1".into(),
                proof: String::new(),
            },
            None,
        )
        .await
        .unwrap();

    // The proof row exists, but the status gate hides it.
    match reader
        .get_merkle_proof("w0", &format!("0x{:040x}", 1))
        .await
    {
        Err(ServiceError::Validation(msg)) => assert!(msg.contains("not ready")),
        other => panic!("expected not-ready validation, got {other:?}"),
    }

    // The root row itself is still visible — callers see the status.
    let root = reader.get_merkle_root("w0").await.unwrap().unwrap();
    assert_eq!(root.status, TreeStatus::Creating);

    // A name with no tree at all reads as not found.
    match reader
        .get_merkle_proof("missing", &format!("0x{:040x}", 1))
        .await
    {
        Err(ServiceError::Validation(msg)) => assert!(msg.contains("not found")),
        other => panic!("expected validation, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 6. Catalog Pagination
// ---------------------------------------------------------------------------

#[tokio::test]
async fn catalog_pages_with_continuation_tokens() {
    let (lifecycle, reader) = setup();
    for name in ["w-alpha", "w-beta", "w-gamma"] {
        lifecycle
            .upload_whitelist(name, csv_with_rows(2).as_bytes(), false)
            .await
            .unwrap();
        lifecycle.create_tree(name).await.unwrap();
    }

    let first = reader.get_merkle_roots(2, None).await.unwrap();
    assert_eq!(first.roots.len(), 2);
    let token = first.next_token.clone().expect("a third tree remains");

    let second = reader.get_merkle_roots(2, Some(&token)).await.unwrap();
    assert_eq!(second.roots.len(), 1);
    assert!(second.next_token.is_none());

    // No overlap, no gaps.
    let mut names: Vec<String> = first
        .roots
        .iter()
        .chain(second.roots.iter())
        .map(|r| r.whitelist_name.clone())
        .collect();
    names.sort();
    assert_eq!(names, vec!["w-alpha", "w-beta", "w-gamma"]);
}

// ---------------------------------------------------------------------------
// 7. Duplicate-Casing Rejection Through the Full Stack
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_addresses_differing_only_in_casing_fail_upload() {
    let (lifecycle, _) = setup();
    let checksummed = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    let csv = format!(
        "WhitelistAddress,WhitelistAmount\n{},1\n{},2\n",
        checksummed,
        checksummed.to_ascii_lowercase()
    );
    match lifecycle.upload_whitelist("w0", csv.as_bytes(), false).await {
        Err(ServiceError::Validation(msg)) => assert!(msg.contains("duplicate")),
        other => panic!("expected validation, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 8. Recreate After Delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tree_can_be_rebuilt_after_delete() {
    let (lifecycle, reader) = setup();
    lifecycle
        .upload_whitelist("w0", csv_with_rows(10).as_bytes(), false)
        .await
        .unwrap();

    let first = lifecycle.create_tree("w0").await.unwrap();
    lifecycle.delete_tree("w0").await.unwrap();
    let second = lifecycle.create_tree("w0").await.unwrap();

    // Same whitelist, same deterministic root.
    assert_eq!(first.merkle_root, second.merkle_root);
    assert_eq!(
        reader.get_merkle_root("w0").await.unwrap().unwrap().status,
        TreeStatus::Completed
    );
}
