//! Resilience tests: torn writes, corrupted files, wrong passphrases,
//! tampered indexes.

use std::path::Path;

use serde_json::json;

use dtm_state::custody::key_file::{load_key_file, save_key_file};
use dtm_state::crypto::keys::X25519KeyPair;
use dtm_state::{KeyMode, SecureState, StateError, StoreConfig};

fn config(root: &Path) -> StoreConfig {
    let mut config = StoreConfig::with_root(root);
    config.pin_memory = false;
    config
}

#[tokio::test]
async fn resilience_interrupted_save_keeps_previous_value() {
    let tmp = tempfile::tempdir().unwrap();
    let state = SecureState::initialize(config(tmp.path())).await.unwrap();
    state.save("session", &json!({"a": 1})).await.unwrap();

    // A crash between the temp write and the rename leaves only a temp file.
    let torn = tmp.path().join("state").join("session.0123456789abcdef.tmp");
    std::fs::write(&torn, b"-----BEGIN DTM SEALED STATE-----\nAAAA").unwrap();

    assert_eq!(
        state.load::<serde_json::Value>("session").await.unwrap(),
        Some(json!({"a": 1}))
    );
    assert_eq!(state.list_documents().await.unwrap(), vec!["session"]);
}

#[tokio::test]
async fn resilience_interrupted_first_save_is_absent() {
    let tmp = tempfile::tempdir().unwrap();
    let state = SecureState::initialize(config(tmp.path())).await.unwrap();

    let torn = tmp.path().join("state").join("fresh.00000000deadbeef.tmp");
    std::fs::write(&torn, b"partial").unwrap();
    assert!(state.load::<serde_json::Value>("fresh").await.unwrap().is_none());
}

#[tokio::test]
async fn resilience_restart_sweeps_orphans() {
    let tmp = tempfile::tempdir().unwrap();
    {
        SecureState::initialize(config(tmp.path())).await.unwrap();
    }
    let orphan_tmp = tmp.path().join("certificates").join("edge.cert.00ff00ff00ff00ff.tmp");
    let stray_bak = tmp.path().join("state").join("session.20240101000000000000.bak");
    std::fs::write(&orphan_tmp, b"x").unwrap();
    std::fs::write(&stray_bak, b"x").unwrap();

    SecureState::initialize(config(tmp.path())).await.unwrap();
    assert!(!orphan_tmp.exists());
    assert!(!stray_bak.exists());
}

#[tokio::test]
async fn resilience_truncated_live_copy_heals() {
    let tmp = tempfile::tempdir().unwrap();
    let state = SecureState::initialize(config(tmp.path())).await.unwrap();
    state.save("session", &json!({"peers": [1, 2, 3]})).await.unwrap();

    let live = tmp.path().join("state").join("session");
    let bytes = std::fs::read(&live).unwrap();
    std::fs::write(&live, &bytes[..bytes.len() / 2]).unwrap();

    assert_eq!(
        state.load::<serde_json::Value>("session").await.unwrap(),
        Some(json!({"peers": [1, 2, 3]}))
    );
    assert_eq!(std::fs::read(&live).unwrap(), bytes);
}

#[tokio::test]
async fn resilience_corrupted_hash_index_recovers_from_backup() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(tmp.path());
    config.key_mode = KeyMode::Persistent;
    {
        let state = SecureState::builder(config.clone())
            .passphrase("pass")
            .initialize()
            .await
            .unwrap();
        state.save("session", &json!({"a": 1})).await.unwrap();
    }
    std::fs::write(tmp.path().join("state").join("state_hashes.json"), b"junk").unwrap();

    let state = SecureState::builder(config)
        .passphrase("pass")
        .initialize()
        .await
        .unwrap();
    assert_eq!(
        state.load::<serde_json::Value>("session").await.unwrap(),
        Some(json!({"a": 1}))
    );
}

#[test]
fn resilience_wrong_passphrase_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("custodian.key");
    save_key_file(&X25519KeyPair::generate(), &path, "correct_password").unwrap();

    let result = load_key_file(&path, "wrong_password");
    assert!(matches!(result, Err(StateError::InvalidPassphrase)));
}

#[test]
fn resilience_corrupted_key_file_detected() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("custodian.key");
    save_key_file(&X25519KeyPair::generate(), &path, "pass").unwrap();

    let mut data = std::fs::read(&path).unwrap();
    for item in data.iter_mut().take(50).skip(40) {
        *item ^= 0xFF;
    }
    std::fs::write(&path, data).unwrap();

    assert!(load_key_file(&path, "pass").is_err());
}

#[tokio::test]
async fn resilience_certificate_swap_detected() {
    let tmp = tempfile::tempdir().unwrap();
    let state = SecureState::initialize(config(tmp.path())).await.unwrap();
    state
        .store_certificate("a", b"cert a", Default::default())
        .await
        .unwrap();
    state
        .store_certificate("b", b"cert b", Default::default())
        .await
        .unwrap();

    let certs = tmp.path().join("certificates");
    std::fs::copy(certs.join("b.cert"), certs.join("a.cert")).unwrap();

    let err = state.load_certificate("a").await.unwrap_err();
    assert!(matches!(err, StateError::FingerprintMismatch(ref id) if id == "a"));
    assert!(err.is_security_fault());
}

#[tokio::test]
async fn resilience_missing_certificate_file() {
    let tmp = tempfile::tempdir().unwrap();
    let state = SecureState::initialize(config(tmp.path())).await.unwrap();
    state
        .store_certificate("edge", b"cert", Default::default())
        .await
        .unwrap();
    std::fs::remove_file(tmp.path().join("certificates").join("edge.cert")).unwrap();

    assert!(matches!(
        state.load_certificate("edge").await,
        Err(StateError::CertificateNotFound(_))
    ));
}

#[tokio::test]
async fn resilience_path_traversal_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let state = SecureState::initialize(config(tmp.path())).await.unwrap();
    for name in ["../outside", "a/b", "", ".."] {
        assert!(matches!(
            state.save(name, &json!(1)).await,
            Err(StateError::InvalidName(_))
        ));
        assert!(matches!(
            state.store_certificate(name, b"x", Default::default()).await,
            Err(StateError::InvalidName(_))
        ));
    }
    assert!(!tmp.path().join("outside").exists());
}
