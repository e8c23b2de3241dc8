//! Stress test: many tasks sharing one `SecureState`.
//!
//! Crypto is serialized by the custodian, so these check that interleaved
//! saves and loads never lose an index entry, tear a file, produce
//! duplicate backups or report a mismatch on an untouched store.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use dtm_state::{SecureState, StoreConfig};

fn config(root: &Path) -> StoreConfig {
    let mut config = StoreConfig::with_root(root);
    config.pin_memory = false;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_concurrent_saves_distinct_names() {
    let tmp = tempfile::tempdir().unwrap();
    let state = Arc::new(SecureState::initialize(config(tmp.path())).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..16 {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            state
                .save(&format!("tunnel-{i:02}"), &json!({"id": i, "port": 9000 + i}))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let names = state.list_documents().await.unwrap();
    assert_eq!(names.len(), 16);
    for i in 0..16 {
        let value: serde_json::Value = state
            .load(&format!("tunnel-{i:02}"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, json!({"id": i, "port": 9000 + i}));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_concurrent_saves_same_name() {
    let tmp = tempfile::tempdir().unwrap();
    let state = Arc::new(SecureState::initialize(config(tmp.path())).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..12 {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            state.save("session", &json!({"writer": i})).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Some writer won; whichever it was, the live copy verifies and is also
    // the newest backup.
    let value: serde_json::Value = state.load("session").await.unwrap().unwrap();
    let writer = value["writer"].as_i64().unwrap();
    assert!((0..12).contains(&writer));

    let backups = state.backups("session").await.unwrap();
    assert_eq!(backups.len(), 5);
    assert_eq!(state.open_backup(&backups[0]).await.unwrap(), value);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_interleaved_save_and_load_same_name() {
    let tmp = tempfile::tempdir().unwrap();
    let state = Arc::new(SecureState::initialize(config(tmp.path())).await.unwrap());
    state.save("session", &json!({"n": 0})).await.unwrap();

    for i in 1..8 {
        let writer = {
            let state = state.clone();
            tokio::spawn(async move { state.save("session", &json!({"n": i})).await })
        };
        let reader = {
            let state = state.clone();
            tokio::spawn(async move { state.load::<serde_json::Value>("session").await })
        };
        writer.await.unwrap().unwrap();
        let loaded = reader
            .await
            .unwrap()
            .unwrap_or_else(|e| panic!("round {i}: load failed: {e:?}"))
            .unwrap();
        let n = loaded["n"].as_i64().unwrap();
        assert!(n == i || n == i - 1, "round {i}: loaded {loaded}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_concurrent_certificates_and_documents() {
    let tmp = tempfile::tempdir().unwrap();
    let state = Arc::new(SecureState::initialize(config(tmp.path())).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..8 {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            let cert = format!("certificate {i}").into_bytes();
            state
                .store_certificate(&format!("cert-{i}"), &cert, Default::default())
                .await?;
            state.save(&format!("doc-{i}"), &json!({"cert": i})).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(state.list_certificates().await.len(), 8);
    assert_eq!(state.list_documents().await.unwrap().len(), 8);
    for i in 0..8 {
        let (cert, _) = state.load_certificate(&format!("cert-{i}")).await.unwrap();
        assert_eq!(cert, format!("certificate {i}").into_bytes());
    }
}
