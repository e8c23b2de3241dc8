//! Long-term key file for persistent key mode.
//!
//! Stores the custodian's X25519 secret encrypted with ChaCha20-Poly1305
//! under a key derived from an operator passphrase (Argon2id, then HKDF),
//! alongside the public key in plaintext for inspection.
//!
//! File format (JSON):
//! ```json
//! {
//!     "version": 1,
//!     "format": "dtm-key-v1",
//!     "encryption": {
//!         "algorithm": "chacha20-poly1305",
//!         "kdf": "argon2id",
//!         "salt": "<base64-16-bytes>",
//!         "nonce": "<base64-12-bytes>"
//!     },
//!     "encrypted_key": "<base64-ciphertext>",
//!     "public_key": "<base64-32-bytes>"
//! }
//! ```

use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::keys::X25519KeyPair;
use crate::crypto::random::random_salt_16;
use crate::crypto::{derivation, encryption};
use crate::error::{Result, StateError};
use crate::storage::atomic::write_atomic;

// ── File format constants ─────────────────────────────────────────────────────

const KEY_FILE_VERSION: u32 = 1;
const KEY_FILE_FORMAT: &str = "dtm-key-v1";
const KEY_FILE_ALGORITHM: &str = "chacha20-poly1305";
const KEY_FILE_KDF: &str = "argon2id";

// ── On-disk structures ────────────────────────────────────────────────────────

/// Top-level structure written to disk.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyFile {
    pub version: u32,
    pub format: String,
    pub encryption: EncryptionMetadata,
    /// Base64 ciphertext of the 32-byte X25519 secret.
    pub encrypted_key: String,
    /// Base64 public key.
    pub public_key: String,
}

/// Encryption metadata stored alongside the ciphertext.
#[derive(Debug, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    pub algorithm: String,
    pub kdf: String,
    /// Base64-encoded Argon2id salt (16 bytes).
    pub salt: String,
    /// Base64-encoded ChaCha20-Poly1305 nonce (12 bytes).
    pub nonce: String,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encrypt `keypair` under `passphrase` and write it atomically to `path`.
pub fn save_key_file(keypair: &X25519KeyPair, path: &Path, passphrase: &str) -> Result<()> {
    let b64 = base64::engine::general_purpose::STANDARD;

    let salt = random_salt_16();
    let mut encryption_key = file_key(passphrase, &salt)?;
    let secret = keypair.secret_bytes();
    let sealed = encryption::encrypt(&encryption_key, secret.as_slice());
    encryption_key.zeroize();
    let (nonce, ciphertext) = sealed?;

    let file = KeyFile {
        version: KEY_FILE_VERSION,
        format: KEY_FILE_FORMAT.to_string(),
        encryption: EncryptionMetadata {
            algorithm: KEY_FILE_ALGORITHM.to_string(),
            kdf: KEY_FILE_KDF.to_string(),
            salt: b64.encode(salt),
            nonce: b64.encode(&nonce),
        },
        encrypted_key: b64.encode(&ciphertext),
        public_key: b64.encode(keypair.public_key_bytes()),
    };

    let json = serde_json::to_string_pretty(&file)?;
    write_atomic(path, json.as_bytes())?;
    Ok(())
}

/// Load and decrypt the key pair stored at `path`.
///
/// # Errors
///
/// Returns `StateError::InvalidPassphrase` if the passphrase is wrong,
/// `StateError::MalformedDocument` for malformed files, or
/// `StateError::Io` for filesystem errors.
pub fn load_key_file(path: &Path, passphrase: &str) -> Result<X25519KeyPair> {
    let bytes = std::fs::read(path)?;
    let file: KeyFile = serde_json::from_slice(&bytes)
        .map_err(|e| StateError::MalformedDocument(format!("key file: {e}")))?;

    if file.version != KEY_FILE_VERSION || file.format != KEY_FILE_FORMAT {
        return Err(StateError::MalformedDocument(format!(
            "unsupported key file version={} format={}",
            file.version, file.format
        )));
    }

    let salt: [u8; 16] = decode_field(&file.encryption.salt, "salt")?
        .try_into()
        .map_err(|_| StateError::MalformedDocument("salt must be 16 bytes".into()))?;
    let nonce = decode_field(&file.encryption.nonce, "nonce")?;
    let ciphertext = decode_field(&file.encrypted_key, "encrypted_key")?;
    let public = decode_field(&file.public_key, "public_key")?;

    let mut encryption_key = file_key(passphrase, &salt)?;
    let plaintext = encryption::decrypt(&encryption_key, &nonce, &ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| StateError::InvalidPassphrase);
    encryption_key.zeroize();
    let plaintext = plaintext?;

    let secret: [u8; 32] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| StateError::MalformedDocument("secret key must be 32 bytes".into()))?;
    let keypair = X25519KeyPair::from_secret_bytes(secret);

    if keypair.public_key_bytes().as_slice() != public.as_slice() {
        return Err(StateError::MalformedDocument(
            "public key does not match secret key".into(),
        ));
    }
    Ok(keypair)
}

/// Load the key pair at `path`, creating a new one if the file is absent.
///
/// Returns the key pair and whether it was freshly created.
pub fn load_or_create(path: &Path, passphrase: &str) -> Result<(X25519KeyPair, bool)> {
    if path.exists() {
        return Ok((load_key_file(path, passphrase)?, false));
    }
    let keypair = X25519KeyPair::generate();
    save_key_file(&keypair, path, passphrase)?;
    log::info!("created key file {}", path.display());
    Ok((keypair, true))
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// passphrase → Argon2id(passphrase, salt) → master → HKDF(master, context).
fn file_key(passphrase: &str, salt: &[u8; 16]) -> Result<[u8; 32]> {
    let mut master = encryption::derive_passphrase_key(passphrase.as_bytes(), salt)?;
    let key = derivation::derive_key(&master, &derivation::key_file_context());
    master.zeroize();
    key
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| StateError::MalformedDocument(format!("invalid {field} base64: {e}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
