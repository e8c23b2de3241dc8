//! Cryptographic primitives for dtm-state.
//!
//! This module provides:
//! - X25519 key generation and ephemeral-static sealing
//! - HKDF-SHA256 key derivation
//! - PBKDF2-HMAC-SHA256 and Argon2id passphrase-based key derivation
//! - ChaCha20-Poly1305 authenticated encryption
//! - SHA-256 digests for fingerprints and integrity hashes
//! - Cryptographically secure random number generation

pub mod derivation;
pub mod encryption;
pub mod keys;
pub mod random;
pub mod seal;

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
