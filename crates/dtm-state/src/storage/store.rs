//! Encrypted document persistence.
//!
//! Two tiers share one directory tree:
//!
//! - [`RawStore`] seals a JSON value to the custodian, writes it atomically
//!   and snapshots it into `backups/`. Nothing is verified. Bookkeeping
//!   documents (the hash index and the certificate index) live here.
//! - [`PersistentStore`] layers the [`IntegrityIndex`] on top: every save
//!   pins the document's hash first, every load verifies it and falls back
//!   to the newest backup that still verifies.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::crypto::seal;
use crate::custody::KeyCustodian;
use crate::error::{Result, StateError};
use crate::integrity::{IntegrityIndex, Verification, HASH_INDEX_DOC};
use crate::progress::{Progress, ProgressTask};
use crate::storage::atomic::write_atomic_async;
use crate::storage::backup::{create_backup, list_backups, prune_backups};
use crate::storage::layout::{validate_name, Layout, CERT_EXTENSION, TEMP_SUFFIX};

/// Certificate index document, kept in `state/` next to the hash index.
pub const CERT_INDEX_DOC: &str = "cert_index.json";

// ── Raw tier ──────────────────────────────────────────────────────────────────

/// Seal, write and back up documents without any verification.
pub struct RawStore {
    custodian: Arc<KeyCustodian>,
    layout: Layout,
    retention: usize,
    progress: Progress,
}

impl RawStore {
    pub fn new(
        custodian: Arc<KeyCustodian>,
        layout: Layout,
        retention: usize,
        progress: Progress,
    ) -> Self {
        Self {
            custodian,
            layout,
            retention,
            progress,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn custodian(&self) -> &Arc<KeyCustodian> {
        &self.custodian
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Seal arbitrary bytes and return the armored text.
    pub async fn seal_bytes(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let sealed = self.custodian.encrypt(plaintext).await?;
        Ok(seal::armor(&sealed).into_bytes())
    }

    /// Reverse of [`seal_bytes`](Self::seal_bytes).
    pub async fn open_bytes(&self, armored: &[u8]) -> Result<Vec<u8>> {
        let sealed = seal::dearmor(armored)?;
        self.custodian.decrypt(sealed).await
    }

    /// Compact JSON, sealed and armored.
    pub async fn seal_value(&self, value: &Value) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(value)?;
        self.seal_bytes(&json).await
    }

    pub async fn open_value(&self, armored: &[u8]) -> Result<Value> {
        let plaintext = self.open_bytes(armored).await?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| StateError::MalformedDocument(format!("sealed payload is not JSON: {e}")))
    }

    /// Atomically replace `path` with `armored`, then snapshot the same bytes
    /// as a backup of `backup_name` and prune that name to retention.
    ///
    /// If the write fails the previous file is untouched and no backup is
    /// taken.
    pub async fn write_document(&self, path: &Path, backup_name: &str, armored: &[u8]) -> Result<()> {
        write_atomic_async(path, armored).await?;
        create_backup(self.layout.backups_dir(), backup_name, armored).await?;
        prune_backups(self.layout.backups_dir(), backup_name, self.retention).await;
        Ok(())
    }

    /// Seal `value` and store it as `state/<name>`.
    pub async fn put_raw(&self, name: &str, value: &Value) -> Result<()> {
        validate_name(name)?;
        let task = ProgressTask::start(&self.progress, &format!("write {name}"));
        let armored = self.seal_value(value).await?;
        task.advance();
        self.write_document(&self.layout.state_path(name), name, &armored)
            .await?;
        log::debug!("wrote {name}");
        Ok(())
    }

    /// Read and open `state/<name>`. `None` if it does not exist.
    pub async fn get_raw(&self, name: &str) -> Result<Option<Value>> {
        validate_name(name)?;
        match read_optional(&self.layout.state_path(name)).await? {
            Some(bytes) => Ok(Some(self.open_value(&bytes).await?)),
            None => Ok(None),
        }
    }

    /// Like [`get_raw`](Self::get_raw), but falls back to the newest backup
    /// that opens when the live copy does not, and writes it back as the
    /// live copy.
    ///
    /// A name with neither a live copy nor backups is `None`. A name whose
    /// every copy fails to open returns the live copy's error.
    pub async fn get_raw_with_fallback(&self, name: &str) -> Result<Option<Value>> {
        let live_error = match self.get_raw(name).await {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => None,
            Err(e) => Some(e),
        };

        for backup in list_backups(self.layout.backups_dir(), name).await? {
            let bytes = match tokio::fs::read(&backup.path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("unreadable backup {}: {e}", backup.path.display());
                    continue;
                }
            };
            if let Ok(value) = self.open_value(&bytes).await {
                self.restore_live(&self.layout.state_path(name), &bytes)
                    .await;
                log::warn!("{name} recovered from backup {}", backup.path.display());
                return Ok(Some(value));
            }
        }

        match live_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Backup paths of `name`, newest first.
    pub async fn backups(&self, name: &str) -> Result<Vec<PathBuf>> {
        validate_name(name)?;
        Ok(list_backups(self.layout.backups_dir(), name)
            .await?
            .into_iter()
            .map(|b| b.path)
            .collect())
    }

    /// Write recovered bytes back as the live copy. Best effort, no backup.
    pub(crate) async fn restore_live(&self, path: &Path, bytes: &[u8]) {
        if let Err(e) = write_atomic_async(path, bytes).await {
            log::warn!("could not restore live copy {}: {e}", path.display());
        }
    }
}

/// Read a file, mapping "not found" to `None`.
pub(crate) async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ── Verified tier ─────────────────────────────────────────────────────────────

/// Verified, self-healing document store.
pub struct PersistentStore {
    raw: Arc<RawStore>,
    integrity: IntegrityIndex,
    // Held by save, load and delete, so a pinned hash is never observed
    // without the file written with it.
    doc_lock: Mutex<()>,
}

impl PersistentStore {
    /// Build the verified tier, loading the hash index through `raw`.
    ///
    /// With `strict`, an index that exists but cannot be opened is an
    /// error. Without it the index starts empty, which is the expected
    /// outcome after a restart with a fresh ephemeral key.
    pub async fn open(raw: Arc<RawStore>, strict: bool) -> Result<Self> {
        let integrity = IntegrityIndex::load(&raw, strict).await?;
        Ok(Self {
            raw,
            integrity,
            doc_lock: Mutex::new(()),
        })
    }

    pub fn raw(&self) -> &Arc<RawStore> {
        &self.raw
    }

    pub fn integrity(&self) -> &IntegrityIndex {
        &self.integrity
    }

    /// Save `document` under `name`.
    ///
    /// The hash is pinned first. If sealing or writing then fails, the
    /// previous hash is put back and the previous file is untouched.
    pub async fn save<T: Serialize + ?Sized>(&self, name: &str, document: &T) -> Result<()> {
        let value = serde_json::to_value(document)?;
        self.save_value(name, &value).await
    }

    pub async fn save_value(&self, name: &str, value: &Value) -> Result<()> {
        validate_document_name(name)?;
        let _guard = self.doc_lock.lock().await;
        let previous = self.integrity.update(&self.raw, name, value).await?;
        if let Err(e) = self.raw.put_raw(name, value).await {
            if let Err(revert) = self.integrity.revert(&self.raw, name, previous).await {
                log::warn!("could not revert hash of {name}: {revert}");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Load and deserialize `name`. `None` if it was never saved.
    pub async fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.load_value(name).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StateError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Load `name`, verifying it against its pinned hash.
    ///
    /// If the live copy is unreadable, undecryptable or fails verification,
    /// backups are tried newest first. The first one that verifies is
    /// written back as the live copy and returned. If none does, the load
    /// fails with `IntegrityMismatch`.
    ///
    /// Runs under the same lock as [`save_value`](Self::save_value), so a
    /// concurrent save is seen either entirely or not at all.
    pub async fn load_value(&self, name: &str) -> Result<Option<Value>> {
        validate_document_name(name)?;
        let path = self.raw.layout().state_path(name);
        let _guard = self.doc_lock.lock().await;
        let _task = ProgressTask::start(self.raw.progress(), &format!("load {name}"));

        let live = match read_optional(&path).await {
            Ok(None) => return Ok(None),
            Ok(Some(bytes)) => Some(bytes),
            Err(e) => {
                log::warn!("{name}: live copy unreadable: {e}");
                None
            }
        };

        if let Some(bytes) = live {
            match self.open_verified(name, &bytes).await {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => log::warn!("{name}: live copy failed verification"),
                Err(StateError::MissingKeyMaterial) => return Err(StateError::MissingKeyMaterial),
                Err(e) => log::warn!("{name}: live copy could not be opened: {e}"),
            }
        }

        let backups = list_backups(self.raw.layout().backups_dir(), name).await?;
        for backup in backups {
            let bytes = match tokio::fs::read(&backup.path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("unreadable backup {}: {e}", backup.path.display());
                    continue;
                }
            };
            match self.open_verified(name, &bytes).await {
                Ok(Some(value)) => {
                    self.raw.restore_live(&path, &bytes).await;
                    log::warn!("{name} restored from backup {}", backup.path.display());
                    return Ok(Some(value));
                }
                Ok(None) => log::debug!("backup {} failed verification", backup.path.display()),
                Err(e) => log::debug!("backup {} could not be opened: {e}", backup.path.display()),
            }
        }

        Err(StateError::IntegrityMismatch(name.to_string()))
    }

    /// Open and verify one candidate. `Ok(None)` means it opened but its
    /// hash does not match the pinned one.
    async fn open_verified(&self, name: &str, bytes: &[u8]) -> Result<Option<Value>> {
        let value = self.raw.open_value(bytes).await?;
        match self.integrity.verify(&self.raw, name, &value).await? {
            Verification::FirstUse | Verification::Match => Ok(Some(value)),
            Verification::Mismatch => Ok(None),
        }
    }

    /// Remove the live copy of `name` and its pinned hash.
    ///
    /// Backups are kept. Returns whether a live copy existed.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        validate_document_name(name)?;
        let _guard = self.doc_lock.lock().await;
        let existed = match tokio::fs::remove_file(self.raw.layout().state_path(name)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        self.integrity.forget(&self.raw, name).await?;
        log::debug!("deleted {name} (existed: {existed})");
        Ok(existed)
    }

    /// Names of live documents, sorted. Bookkeeping documents are excluded.
    pub async fn list_documents(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(self.raw.layout().state_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TEMP_SUFFIX) || is_bookkeeping(&name) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    pub async fn backups(&self, name: &str) -> Result<Vec<PathBuf>> {
        self.raw.backups(name).await
    }

    /// Open one backup file without verifying it, for inspection.
    pub async fn open_backup(&self, path: &Path) -> Result<Value> {
        let bytes = tokio::fs::read(path).await?;
        self.raw.open_value(&bytes).await
    }
}

fn is_bookkeeping(name: &str) -> bool {
    name == HASH_INDEX_DOC || name == CERT_INDEX_DOC
}

/// Names usable by callers of the verified tier.
///
/// On top of [`validate_name`], bookkeeping names and names ending in
/// `.cert` (the certificate backup namespace) are reserved.
pub fn validate_document_name(name: &str) -> Result<()> {
    validate_name(name)?;
    let cert_suffix = format!(".{CERT_EXTENSION}");
    if is_bookkeeping(name) || name.ends_with(&cert_suffix) {
        return Err(StateError::InvalidName(name.to_string()));
    }
    Ok(())
}
