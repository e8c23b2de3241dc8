//! Symmetric encryption using ChaCha20-Poly1305, plus the two
//! passphrase-based key derivations used by the custodian.
//!
//! - PBKDF2-HMAC-SHA256 derives the runtime wrapping key that protects the
//!   private key inside the secret cell.
//! - Argon2id derives the key protecting the long-term key file on disk.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::random::{random_nonce_12, random_salt_16};
use crate::error::{Result, StateError};

/// Minimum PBKDF2 rounds accepted for the runtime wrapping key.
pub const MIN_PBKDF2_ROUNDS: u32 = 480_000;

/// Argon2id parameters for passphrase-based key derivation.
const ARGON2_M_COST: u32 = 65536; // 64 MiB
const ARGON2_T_COST: u32 = 3; // 3 iterations
const ARGON2_P_COST: u32 = 4; // 4 parallel lanes

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Derive a 32-byte encryption key from a passphrase and salt using Argon2id.
pub fn derive_passphrase_key(passphrase: &[u8], salt: &[u8; 16]) -> Result<[u8; 32]> {
    let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(32))
        .map_err(|e| StateError::DerivationFailed(format!("Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0u8; 32];
    argon2
        .hash_password_into(passphrase, salt, &mut output)
        .map_err(|e| StateError::DerivationFailed(format!("Argon2 hash: {e}")))?;

    Ok(output)
}

/// Derive a 32-byte wrapping key with PBKDF2-HMAC-SHA256.
pub fn derive_wrapping_key(passphrase: &[u8], salt: &[u8; 16], rounds: u32) -> [u8; 32] {
    let mut output = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase, salt, rounds, &mut output);
    output
}

/// Encrypt plaintext with ChaCha20-Poly1305.
///
/// Returns `(nonce, ciphertext)`. The nonce must be stored alongside
/// the ciphertext for decryption.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let nonce_bytes = random_nonce_12();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| StateError::EncryptionFailed(format!("cipher init: {e}")))?;
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| StateError::EncryptionFailed(format!("encrypt: {e}")))?;
    Ok((nonce_bytes.to_vec(), ciphertext))
}

/// Decrypt ciphertext with ChaCha20-Poly1305.
pub fn decrypt(key: &[u8; 32], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(StateError::DecryptionFailed("bad nonce length".into()));
    }
    let nonce = Nonce::from_slice(nonce);
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| StateError::DecryptionFailed(format!("cipher init: {e}")))?;
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| StateError::DecryptionFailed("authentication failed".into()))
}

/// Encrypt into a single `nonce || ciphertext` buffer.
pub fn encrypt_combined(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let (mut out, ciphertext) = encrypt(key, plaintext)?;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Reverse of [`encrypt_combined`].
pub fn decrypt_combined(key: &[u8; 32], combined: &[u8]) -> Result<Vec<u8>> {
    if combined.len() < NONCE_LEN {
        return Err(StateError::DecryptionFailed("ciphertext truncated".into()));
    }
    let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
    decrypt(key, nonce, ciphertext)
}

/// Wrap `plaintext` under a passphrase: `salt || nonce || ciphertext`.
pub fn wrap_with_passphrase(passphrase: &[u8], rounds: u32, plaintext: &[u8]) -> Result<Vec<u8>> {
    let salt = random_salt_16();
    let mut key = derive_wrapping_key(passphrase, &salt, rounds);
    let sealed = encrypt_combined(&key, plaintext);
    key.zeroize();

    let mut out = salt.to_vec();
    out.extend_from_slice(&sealed?);
    Ok(out)
}

/// Unwrap a blob produced by [`wrap_with_passphrase`].
pub fn unwrap_with_passphrase(
    passphrase: &[u8],
    rounds: u32,
    wrapped: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if wrapped.len() < SALT_LEN + NONCE_LEN {
        return Err(StateError::DecryptionFailed("wrapped key truncated".into()));
    }
    let (salt, rest) = wrapped.split_at(SALT_LEN);
    let salt: [u8; 16] = salt
        .try_into()
        .map_err(|_| StateError::DecryptionFailed("salt must be 16 bytes".into()))?;
    let mut key = derive_wrapping_key(passphrase, &salt, rounds);
    let result = decrypt_combined(&key, rest).map(Zeroizing::new);
    key.zeroize();
    result
}
