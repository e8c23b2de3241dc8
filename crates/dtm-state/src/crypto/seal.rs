//! Public-key sealing and ASCII armor.
//!
//! A sealed message is readable only by the holder of the recipient's
//! static X25519 secret:
//!
//! ```text
//! version (1) || ephemeral_pub (32) || nonce (12) || ciphertext+tag
//! ```
//!
//! The ChaCha20-Poly1305 key is HKDF-SHA256 over the ephemeral-static shared
//! secret, salted with `ephemeral_pub || recipient_pub`. Sealed bytes are
//! stored on disk armored as base64 between BEGIN/END lines.

use base64::Engine;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::crypto::derivation::{derive_key_salted, seal_context};
use crate::crypto::encryption::{decrypt_combined, encrypt_combined};
use crate::crypto::keys::ephemeral_x25519;
use crate::error::{Result, StateError};

const SEAL_VERSION: u8 = 1;
const PUBLIC_LEN: usize = 32;

const ARMOR_BEGIN: &str = "-----BEGIN DTM SEALED STATE-----";
const ARMOR_END: &str = "-----END DTM SEALED STATE-----";
const ARMOR_WIDTH: usize = 64;

/// Seal `plaintext` to `recipient`.
pub fn seal(recipient: &X25519PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let (eph_secret, eph_public) = ephemeral_x25519();
    let shared = eph_secret.diffie_hellman(recipient);

    let mut salt = [0u8; PUBLIC_LEN * 2];
    salt[..PUBLIC_LEN].copy_from_slice(eph_public.as_bytes());
    salt[PUBLIC_LEN..].copy_from_slice(recipient.as_bytes());

    let mut key = derive_key_salted(Some(&salt), shared.as_bytes(), &seal_context())?;
    let body = encrypt_combined(&key, plaintext);
    key.zeroize();

    let mut out = Vec::with_capacity(1 + PUBLIC_LEN + plaintext.len() + 28);
    out.push(SEAL_VERSION);
    out.extend_from_slice(eph_public.as_bytes());
    out.extend_from_slice(&body?);
    Ok(out)
}

/// Open a message produced by [`seal`] with the recipient's secret.
pub fn open(secret: &StaticSecret, sealed: &[u8]) -> Result<Vec<u8>> {
    let (&version, rest) = sealed
        .split_first()
        .ok_or_else(|| StateError::DecryptionFailed("empty sealed message".into()))?;
    if version != SEAL_VERSION {
        return Err(StateError::DecryptionFailed(format!(
            "unsupported seal version {version}"
        )));
    }
    if rest.len() < PUBLIC_LEN {
        return Err(StateError::DecryptionFailed("sealed message truncated".into()));
    }
    let (eph_bytes, body) = rest.split_at(PUBLIC_LEN);
    let mut eph = [0u8; PUBLIC_LEN];
    eph.copy_from_slice(eph_bytes);
    let eph_public = X25519PublicKey::from(eph);
    let recipient = X25519PublicKey::from(secret);

    let shared = secret.diffie_hellman(&eph_public);
    let mut salt = [0u8; PUBLIC_LEN * 2];
    salt[..PUBLIC_LEN].copy_from_slice(eph_public.as_bytes());
    salt[PUBLIC_LEN..].copy_from_slice(recipient.as_bytes());

    let mut key = derive_key_salted(Some(&salt), shared.as_bytes(), &seal_context())?;
    let result = decrypt_combined(&key, body);
    key.zeroize();
    result
}

/// Armor sealed bytes as text.
pub fn armor(sealed: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(sealed);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / ARMOR_WIDTH + 80);
    out.push_str(ARMOR_BEGIN);
    out.push('\n');
    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        let (line, tail) = rest.split_at(rest.len().min(ARMOR_WIDTH));
        out.push_str(line);
        out.push('\n');
        rest = tail;
    }
    out.push_str(ARMOR_END);
    out.push('\n');
    out
}

/// Strip armor and decode. Any framing or base64 defect is a malformed document.
pub fn dearmor(text: &[u8]) -> Result<Vec<u8>> {
    let text = std::str::from_utf8(text)
        .map_err(|_| StateError::MalformedDocument("armor is not UTF-8".into()))?;
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    if lines.next() != Some(ARMOR_BEGIN) {
        return Err(StateError::MalformedDocument("missing armor header".into()));
    }
    let mut body = String::new();
    let mut closed = false;
    for line in lines.by_ref() {
        if line == ARMOR_END {
            closed = true;
            break;
        }
        body.push_str(line);
    }
    if !closed || lines.next().is_some() {
        return Err(StateError::MalformedDocument("bad armor footer".into()));
    }

    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| StateError::MalformedDocument(format!("invalid armor base64: {e}")))
}
