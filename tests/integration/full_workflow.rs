//! Integration test: full end-to-end workflow.
//!
//! Tests the complete lifecycle through the `SecureState` facade:
//! 1. Initialize a store
//! 2. Save, load and re-save documents
//! 3. Check backup retention
//! 4. Store, load and rotate certificates
//! 5. Restart in persistent key mode
//! 6. Clean up

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;

use dtm_state::{metadata_from_pairs, KeyMode, SecureState, StateError, StoreConfig};

fn config(root: &Path) -> StoreConfig {
    let mut config = StoreConfig::with_root(root);
    config.pin_memory = false;
    config
}

fn persistent(root: &Path) -> StoreConfig {
    let mut config = config(root);
    config.key_mode = KeyMode::Persistent;
    config
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TunnelState {
    name: String,
    local_port: u16,
    peers: Vec<String>,
    active: bool,
}

#[tokio::test]
async fn full_workflow_documents_and_certificates() {
    let tmp = tempfile::tempdir().unwrap();
    let state = SecureState::initialize(config(tmp.path())).await.unwrap();

    // ── Step 1: Round-trip a typed document ─────────────────────────────
    let tunnel = TunnelState {
        name: "edge".into(),
        local_port: 8443,
        peers: vec!["10.0.0.2".into(), "10.0.0.3".into()],
        active: true,
    };
    state.save("tunnel", &tunnel).await.unwrap();
    let loaded: TunnelState = state.load("tunnel").await.unwrap().unwrap();
    assert_eq!(loaded, tunnel);

    // ── Step 2: Absent documents are not errors ─────────────────────────
    let missing: Option<TunnelState> = state.load("nope").await.unwrap();
    assert!(missing.is_none());

    // ── Step 3: Certificates ────────────────────────────────────────────
    let cert_v1 = b"-----BEGIN CERTIFICATE-----\nMIIBv1\n-----END CERTIFICATE-----\n";
    let cert_v2 = b"-----BEGIN CERTIFICATE-----\nMIIBv2\n-----END CERTIFICATE-----\n";
    let meta = metadata_from_pairs([("cn", "edge.dtm.local")]);
    state.store_certificate("edge", cert_v1, meta).await.unwrap();

    let (cert, meta) = state.load_certificate("edge").await.unwrap();
    assert_eq!(cert, cert_v1);
    assert_eq!(meta["cn"], "edge.dtm.local");
    let record = state.certificate_record("edge").await.unwrap();
    assert_eq!(record.hash, dtm_state::crypto::sha256_hex(&cert));

    state.rotate_certificate("edge", cert_v2).await.unwrap();
    assert_eq!(state.load_certificate("edge").await.unwrap().0, cert_v2);
    assert_eq!(
        state.previous_certificate("edge").await.unwrap().as_deref(),
        Some(&cert_v1[..])
    );

    // ── Step 4: Listings exclude bookkeeping ────────────────────────────
    assert_eq!(state.list_documents().await.unwrap(), vec!["tunnel"]);
    assert_eq!(state.list_certificates().await, vec!["edge"]);

    // ── Step 5: Cleanup destroys key material ───────────────────────────
    state.cleanup().await;
    assert!(matches!(
        state.load::<TunnelState>("tunnel").await,
        Err(StateError::MissingKeyMaterial)
    ));
}

#[tokio::test]
async fn session_scenario_four_saves_four_backups() {
    let tmp = tempfile::tempdir().unwrap();
    let state = SecureState::initialize(config(tmp.path())).await.unwrap();

    state.save("session", &json!({"a": 1})).await.unwrap();
    assert_eq!(
        state.load::<serde_json::Value>("session").await.unwrap(),
        Some(json!({"a": 1}))
    );
    for _ in 0..3 {
        state.save("session", &json!({"a": 2})).await.unwrap();
    }

    let backups = state.backups("session").await.unwrap();
    assert_eq!(backups.len(), 4);

    // Newest first: three {"a":2} then the original {"a":1}.
    let mut contents = Vec::new();
    for backup in &backups {
        contents.push(state.open_backup(backup).await.unwrap());
    }
    assert_eq!(
        contents,
        vec![json!({"a": 2}), json!({"a": 2}), json!({"a": 2}), json!({"a": 1})]
    );
}

#[tokio::test]
async fn retention_keeps_five_most_recent() {
    let tmp = tempfile::tempdir().unwrap();
    let state = SecureState::initialize(config(tmp.path())).await.unwrap();

    for i in 0..9 {
        state.save("counter", &json!({"n": i})).await.unwrap();
    }
    let backups = state.backups("counter").await.unwrap();
    assert_eq!(backups.len(), 5);

    let mut kept = Vec::new();
    for backup in &backups {
        kept.push(state.open_backup(backup).await.unwrap()["n"].as_i64().unwrap());
    }
    assert_eq!(kept, vec![8, 7, 6, 5, 4]);
}

#[tokio::test]
async fn tampered_document_heals_or_faults() {
    let tmp = tempfile::tempdir().unwrap();
    let state = SecureState::initialize(config(tmp.path())).await.unwrap();
    state.save("session", &json!({"token": "abc"})).await.unwrap();

    let live = tmp.path().join("state").join("session");
    let original = std::fs::read(&live).unwrap();

    // Sample the armored file rather than flipping every byte.
    for i in (0..original.len()).step_by(13) {
        let mut bytes = original.clone();
        bytes[i] ^= 0x20;
        std::fs::write(&live, &bytes).unwrap();
        match state.load::<serde_json::Value>("session").await {
            Ok(value) => assert_eq!(value, Some(json!({"token": "abc"}))),
            Err(e) => assert!(e.is_security_fault(), "byte {i}: unexpected {e:?}"),
        }
    }
}

#[tokio::test]
async fn delete_then_load_is_absent() {
    let tmp = tempfile::tempdir().unwrap();
    let state = SecureState::initialize(config(tmp.path())).await.unwrap();
    state.save("session", &json!({"a": 1})).await.unwrap();

    assert!(state.delete("session").await.unwrap());
    assert!(state.load::<serde_json::Value>("session").await.unwrap().is_none());
    assert_eq!(state.backups("session").await.unwrap().len(), 1);

    state.save("session", &json!({"a": 3})).await.unwrap();
    assert_eq!(
        state.load::<serde_json::Value>("session").await.unwrap(),
        Some(json!({"a": 3}))
    );
}

#[tokio::test]
async fn persistent_mode_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let state = SecureState::builder(persistent(tmp.path()))
            .passphrase("operator secret")
            .initialize()
            .await
            .unwrap();
        state.save("session", &json!({"a": 1})).await.unwrap();
        state
            .store_certificate("edge", b"cert bytes", Default::default())
            .await
            .unwrap();
        state.cleanup().await;
    }
    assert!(tmp.path().join("custodian.key").exists());

    let state = SecureState::builder(persistent(tmp.path()))
        .passphrase("operator secret")
        .initialize()
        .await
        .unwrap();
    assert_eq!(
        state.load::<serde_json::Value>("session").await.unwrap(),
        Some(json!({"a": 1}))
    );
    assert_eq!(state.load_certificate("edge").await.unwrap().0, b"cert bytes");

    let wrong = SecureState::builder(persistent(tmp.path()))
        .passphrase("not it")
        .initialize()
        .await;
    assert!(matches!(wrong, Err(StateError::InvalidPassphrase)));
}

#[tokio::test]
async fn ephemeral_mode_restart_starts_empty() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let state = SecureState::initialize(config(tmp.path())).await.unwrap();
        state.save("session", &json!({"a": 1})).await.unwrap();
        state
            .store_certificate("edge", b"cert", Default::default())
            .await
            .unwrap();
    }

    // A new process has a new key: old state is opaque but startup succeeds.
    let state = SecureState::initialize(config(tmp.path())).await.unwrap();
    assert!(state.list_certificates().await.is_empty());
    assert!(matches!(
        state.load::<serde_json::Value>("session").await,
        Err(StateError::IntegrityMismatch(_))
    ));

    // Saving again replaces the opaque document.
    state.save("session", &json!({"a": 2})).await.unwrap();
    assert_eq!(
        state.load::<serde_json::Value>("session").await.unwrap(),
        Some(json!({"a": 2}))
    );
}
