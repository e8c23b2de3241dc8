//! Last-known-good content hashes.
//!
//! Each document name maps to the SHA-256 of its canonical JSON form. The
//! first hash observed for a name is trusted and pinned; after that it only
//! changes through [`IntegrityIndex::update`]. The map itself is a
//! bookkeeping document persisted through the raw tier, so recording a
//! hash never triggers another verification.

use std::collections::BTreeMap;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::crypto::sha256_hex;
use crate::error::{Result, StateError};
use crate::storage::RawStore;

/// Name of the persisted hash index under `state/`.
pub const HASH_INDEX_DOC: &str = "state_hashes.json";

/// Outcome of [`IntegrityIndex::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// No hash was pinned; this one is now.
    FirstUse,
    Match,
    Mismatch,
}

/// Serialize `value` with object keys sorted at every depth and no
/// insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hex SHA-256 of the canonical form.
pub fn document_hash(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// Name → pinned hash map, persisted as [`HASH_INDEX_DOC`].
#[derive(Debug, Default)]
pub struct IntegrityIndex {
    hashes: Mutex<BTreeMap<String, String>>,
}

impl IntegrityIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the persisted index, falling back to its backups.
    ///
    /// An index that exists but cannot be opened is an error when `strict`
    /// and an empty index (with a warning) otherwise.
    pub async fn load(raw: &RawStore, strict: bool) -> Result<Self> {
        let value = match raw.get_raw_with_fallback(HASH_INDEX_DOC).await {
            Ok(value) => value,
            Err(e) if !strict => {
                log::warn!("hash index unreadable, starting empty: {e}");
                None
            }
            Err(e) => return Err(e),
        };

        let hashes: BTreeMap<String, String> = match value {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| StateError::MalformedDocument(format!("hash index: {e}")))?,
            None => BTreeMap::new(),
        };
        log::debug!("hash index loaded with {} entries", hashes.len());
        Ok(Self {
            hashes: Mutex::new(hashes),
        })
    }

    /// Compare `value` against the pinned hash of `name`, pinning it if
    /// none exists yet.
    pub async fn verify(&self, raw: &RawStore, name: &str, value: &Value) -> Result<Verification> {
        let hash = document_hash(value);
        let mut hashes = self.hashes.lock().await;
        match hashes.get(name) {
            Some(pinned) if *pinned == hash => Ok(Verification::Match),
            Some(_) => Ok(Verification::Mismatch),
            None => {
                hashes.insert(name.to_string(), hash);
                persist(raw, &hashes).await?;
                log::debug!("pinned first hash for {name}");
                Ok(Verification::FirstUse)
            }
        }
    }

    /// Pin the hash of `value` for `name`, returning the previous hash.
    pub async fn update(&self, raw: &RawStore, name: &str, value: &Value) -> Result<Option<String>> {
        let hash = document_hash(value);
        let mut hashes = self.hashes.lock().await;
        let previous = hashes.insert(name.to_string(), hash);
        if let Err(e) = persist(raw, &hashes).await {
            restore_entry(&mut hashes, name, previous);
            return Err(e);
        }
        Ok(previous)
    }

    /// Put back a hash returned by [`update`](Self::update).
    pub async fn revert(&self, raw: &RawStore, name: &str, previous: Option<String>) -> Result<()> {
        let mut hashes = self.hashes.lock().await;
        restore_entry(&mut hashes, name, previous);
        persist(raw, &hashes).await
    }

    /// Drop the pinned hash of `name`. Returns whether one existed.
    pub async fn forget(&self, raw: &RawStore, name: &str) -> Result<bool> {
        let mut hashes = self.hashes.lock().await;
        if hashes.remove(name).is_none() {
            return Ok(false);
        }
        persist(raw, &hashes).await?;
        Ok(true)
    }

    pub async fn recorded(&self, name: &str) -> Option<String> {
        self.hashes.lock().await.get(name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.hashes.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn restore_entry(hashes: &mut BTreeMap<String, String>, name: &str, previous: Option<String>) {
    match previous {
        Some(hash) => {
            hashes.insert(name.to_string(), hash);
        }
        None => {
            hashes.remove(name);
        }
    }
}

async fn persist(raw: &RawStore, hashes: &BTreeMap<String, String>) -> Result<()> {
    raw.put_raw(HASH_INDEX_DOC, &serde_json::to_value(hashes)?)
        .await
}
