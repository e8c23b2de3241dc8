//! Basic State: save tunnel state, watch it heal, store a certificate.
//!
//! Run with:
//!   cargo run --example basic_state -p dtm-state

use serde::{Deserialize, Serialize};

use dtm_state::{metadata_from_pairs, SecureState, StoreConfig};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Tunnel {
    name: String,
    local_port: u16,
    peers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    // ── 1. Bring the store up ───────────────────────────────────────────────
    //
    // Ephemeral mode: a fresh X25519 key pair lives only for this process,
    // wrapped in memory under a random runtime passphrase.
    let state = SecureState::initialize(StoreConfig::with_root(dir.path())).await?;
    println!("Secure state initialized");
    println!("  Root:       {}", state.root().display());
    println!("  Public key: {}", state.public_fingerprint());
    println!("  Memory:     {}", state.pin_status());
    println!();

    // ── 2. Save and load a typed document ───────────────────────────────────
    //
    // Every save writes the sealed document atomically, records its
    // canonical hash, and keeps a backup copy.
    let tunnel = Tunnel {
        name: "edge".into(),
        local_port: 8443,
        peers: vec!["10.0.0.2".into(), "10.0.0.3".into()],
    };
    state.save("tunnel", &tunnel).await?;
    let loaded: Option<Tunnel> = state.load("tunnel").await?;
    assert_eq!(loaded.as_ref(), Some(&tunnel));
    println!("Saved and reloaded 'tunnel'");
    println!("  Backups: {}", state.backups("tunnel").await?.len());
    println!();

    // ── 3. Corrupt the live copy and let it heal ────────────────────────────
    //
    // The live file fails to open, so the newest backup that still
    // verifies is written back in its place.
    let live = dir.path().join("state").join("tunnel");
    std::fs::write(&live, b"not a sealed document")?;
    let healed: Option<Tunnel> = state.load("tunnel").await?;
    assert_eq!(healed.as_ref(), Some(&tunnel));
    println!("Live copy corrupted on disk, recovered from backup");
    println!();

    // ── 4. Store and rotate a certificate ───────────────────────────────────
    //
    // Certificates are encrypted twice: once under a sealed content key,
    // then the whole envelope again.
    let v1 = b"-----BEGIN CERTIFICATE-----\nMIIBv1\n-----END CERTIFICATE-----\n";
    let v2 = b"-----BEGIN CERTIFICATE-----\nMIIBv2\n-----END CERTIFICATE-----\n";
    state
        .store_certificate("edge", v1, metadata_from_pairs([("cn", "edge.dtm.local")]))
        .await?;
    state.rotate_certificate("edge", v2).await?;

    let (cert, metadata) = state.load_certificate("edge").await?;
    assert_eq!(cert, v2);
    println!("Certificate 'edge' rotated");
    println!("  CN:         {}", metadata["cn"].as_str().unwrap_or("?"));
    println!("  Encryption: {}", metadata["encryption"].as_str().unwrap_or("?"));
    if let Some(record) = state.certificate_record("edge").await {
        println!("  SHA-256:    {}", record.hash);
    }
    println!();

    // ── 5. Clean up ─────────────────────────────────────────────────────────
    let report = state.cleanup().await;
    println!(
        "Cleanup: {} temp files, {} backups pruned, key material destroyed",
        report.sweep.temp_files, report.pruned_backups
    );
    Ok(())
}
