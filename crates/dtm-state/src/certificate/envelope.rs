//! Certificate envelope: the inner, content-level encryption layer.
//!
//! The certificate bytes are encrypted with a fresh ChaCha20-Poly1305
//! content key. The content key is sealed to the custodian and carried in
//! the envelope, so the envelope is self-contained. The whole envelope is
//! then sealed again as an ordinary document (the outer layer).
//!
//! Envelope format (JSON, before the outer seal):
//! ```json
//! {
//!     "data": "<base64 nonce || ciphertext>",
//!     "hash": "<hex SHA-256 of the plaintext certificate>",
//!     "encrypted": true,
//!     "key": "<base64 sealed content key>"
//! }
//! ```
//!
//! `encrypted: false` envelopes carry the plaintext certificate in `data`
//! and no `key`. They are still fingerprint-checked on open.

use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::encryption::{decrypt_combined, encrypt_combined};
use crate::crypto::random::random_bytes;
use crate::crypto::sha256_hex;
use crate::custody::KeyCustodian;
use crate::error::{Result, StateError};

/// Inner layer of a stored certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateEnvelope {
    /// Base64 content-layer ciphertext, or plaintext when `encrypted` is false.
    pub data: String,
    /// Hex SHA-256 fingerprint of the plaintext certificate.
    pub hash: String,
    pub encrypted: bool,
    /// Base64 content key sealed to the custodian.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl CertificateEnvelope {
    /// Encrypt `cert` under a fresh content key sealed to `custodian`.
    pub async fn seal(custodian: &KeyCustodian, cert: &[u8]) -> Result<Self> {
        let b64 = base64::engine::general_purpose::STANDARD;

        let content_key = Zeroizing::new(random_bytes::<32>());
        let data = encrypt_combined(&content_key, cert)?;
        let sealed_key = custodian.encrypt(content_key.as_slice()).await?;

        Ok(Self {
            data: b64.encode(data),
            hash: sha256_hex(cert),
            encrypted: true,
            key: Some(b64.encode(sealed_key)),
        })
    }

    /// Recover the certificate bytes and check them against `hash`.
    ///
    /// # Errors
    ///
    /// - `StateError::MalformedDocument` for bad base64 or a missing key.
    /// - `StateError::DecryptionFailed` if either layer fails to decrypt.
    /// - `StateError::FingerprintMismatch` if the plaintext does not hash to
    ///   the envelope's own fingerprint.
    pub async fn open(&self, custodian: &KeyCustodian, cert_id: &str) -> Result<Vec<u8>> {
        let data = decode(&self.data, "data")?;
        let cert = if self.encrypted {
            let sealed_key = self
                .key
                .as_deref()
                .ok_or_else(|| StateError::MalformedDocument("envelope has no content key".into()))?;
            let key_bytes = Zeroizing::new(custodian.decrypt(decode(sealed_key, "key")?).await?);
            let content_key: Zeroizing<[u8; 32]> = Zeroizing::new(
                key_bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StateError::MalformedDocument("content key must be 32 bytes".into()))?,
            );
            decrypt_combined(&content_key, &data)?
        } else {
            data
        };

        if sha256_hex(&cert) != self.hash {
            return Err(StateError::FingerprintMismatch(cert_id.to_string()));
        }
        Ok(cert)
    }
}

fn decode(value: &str, field: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| StateError::MalformedDocument(format!("invalid envelope {field}: {e}")))
}
