//! Key derivation using HKDF-SHA256.
//!
//! Derives purpose-scoped keys from shared secrets and master keys using
//! context strings, so one secret never keys two different constructions.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{Result, StateError};

/// Derive a 32-byte key from input key material and a context string.
///
/// Uses HKDF-SHA256 (RFC 5869) with no salt and the context as info.
pub fn derive_key(ikm: &[u8; 32], context: &str) -> Result<[u8; 32]> {
    derive_key_salted(None, ikm, context)
}

/// Derive a 32-byte key with an explicit HKDF salt.
pub fn derive_key_salted(salt: Option<&[u8]>, ikm: &[u8], context: &str) -> Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut output = [0u8; 32];
    hk.expand(context.as_bytes(), &mut output)
        .map_err(|e| StateError::DerivationFailed(format!("HKDF expand failed: {e}")))?;
    Ok(output)
}

/// Context for the sealing key derived from an X25519 shared secret.
pub fn seal_context() -> String {
    "dtm-state/seal/v1".to_string()
}

/// Context for the key-file encryption key derived from the Argon2id master key.
pub fn key_file_context() -> String {
    "dtm-state/key-file".to_string()
}
