//! Certificate storage with double encryption and fingerprint checks.
//!
//! Certificates live at `certificates/<id>.cert` as sealed
//! [`CertificateEnvelope`]s. The vault keeps an in-memory
//! `id → {hash, metadata}` index, persisted through the raw tier as
//! `cert_index.json`. Rotation and deletion snapshot the current file into
//! `backups/` as `<id>.cert.<stamp>.bak` first.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::certificate::envelope::CertificateEnvelope;
use crate::error::{Result, StateError};
use crate::progress::ProgressTask;
use crate::storage::atomic::write_atomic_async;
use crate::storage::backup::{copy_to_backup, list_backups, prune_backups};
use crate::storage::layout::{certificate_backup_name, validate_name};
use crate::storage::store::read_optional;
use crate::storage::{RawStore, CERT_INDEX_DOC};
use crate::time::now_rfc3339;

/// Metadata value recorded under `"encryption"` for every stored certificate.
pub const ENCRYPTION_LABEL: &str = "x25519+chacha20poly1305";

/// Free-form certificate metadata.
pub type Metadata = Map<String, Value>;

/// Index entry for one certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Hex SHA-256 of the plaintext certificate.
    pub hash: String,
    pub metadata: Metadata,
}

type Index = BTreeMap<String, CertificateRecord>;

/// Double-encrypted certificate store.
pub struct CertificateVault {
    raw: Arc<RawStore>,
    index: Mutex<Index>,
}

impl CertificateVault {
    /// Load the certificate index through `raw`.
    ///
    /// `strict` has the same meaning as for
    /// [`PersistentStore::open`](crate::storage::PersistentStore::open).
    pub async fn open(raw: Arc<RawStore>, strict: bool) -> Result<Self> {
        let _task = ProgressTask::start(raw.progress(), "load certificate index");
        let value = match raw.get_raw_with_fallback(CERT_INDEX_DOC).await {
            Ok(value) => value,
            Err(e) if !strict => {
                log::warn!("certificate index unreadable, starting empty: {e}");
                None
            }
            Err(e) => return Err(e),
        };
        let index: Index = match value {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| StateError::MalformedDocument(format!("certificate index: {e}")))?,
            None => Index::new(),
        };
        log::debug!("certificate index loaded with {} entries", index.len());
        Ok(Self {
            raw,
            index: Mutex::new(index),
        })
    }

    /// Encrypt and store `cert` under `cert_id`, replacing any previous one.
    ///
    /// `metadata` is recorded with `"encryption"` and `"timestamp"` added.
    pub async fn store_certificate(&self, cert_id: &str, cert: &[u8], metadata: Metadata) -> Result<()> {
        validate_name(cert_id)?;
        let mut index = self.index.lock().await;
        self.store_locked(&mut index, cert_id, cert, metadata).await
    }

    async fn store_locked(
        &self,
        index: &mut Index,
        cert_id: &str,
        cert: &[u8],
        mut metadata: Metadata,
    ) -> Result<()> {
        let task = ProgressTask::start(self.raw.progress(), &format!("store certificate {cert_id}"));

        let envelope = CertificateEnvelope::seal(self.raw.custodian(), cert).await?;
        task.advance();
        let armored = self.raw.seal_value(&serde_json::to_value(&envelope)?).await?;
        let path = self.raw.layout().certificate_path(cert_id);
        let previous_file = read_optional(&path).await?;
        write_atomic_async(&path, &armored).await?;

        metadata.insert("encryption".into(), Value::from(ENCRYPTION_LABEL));
        metadata.insert("timestamp".into(), Value::from(now_rfc3339()));
        let previous = index.insert(
            cert_id.to_string(),
            CertificateRecord {
                hash: envelope.hash,
                metadata,
            },
        );
        if let Err(e) = self.persist(index).await {
            match previous {
                Some(record) => index.insert(cert_id.to_string(), record),
                None => index.remove(cert_id),
            };
            restore_file(&path, previous_file.as_deref()).await;
            return Err(e);
        }
        log::debug!("stored certificate {cert_id}");
        Ok(())
    }

    /// Decrypt `cert_id` and check it against the indexed fingerprint.
    ///
    /// # Errors
    ///
    /// - `StateError::CertificateNotFound` if the id is not indexed or its
    ///   file is missing.
    /// - `StateError::FingerprintMismatch` if the decrypted bytes do not
    ///   hash to the indexed fingerprint.
    pub async fn load_certificate(&self, cert_id: &str) -> Result<(Vec<u8>, Metadata)> {
        validate_name(cert_id)?;
        let index = self.index.lock().await;
        let record = index
            .get(cert_id)
            .ok_or_else(|| StateError::CertificateNotFound(cert_id.to_string()))?;

        let path = self.raw.layout().certificate_path(cert_id);
        let bytes = read_optional(&path)
            .await?
            .ok_or_else(|| StateError::CertificateNotFound(cert_id.to_string()))?;
        let cert = self.open_file(cert_id, &bytes).await?;

        if crate::crypto::sha256_hex(&cert) != record.hash {
            return Err(StateError::FingerprintMismatch(cert_id.to_string()));
        }
        Ok((cert, record.metadata.clone()))
    }

    /// Snapshot the current certificate into `backups/`, then store
    /// `new_cert` with the previous metadata.
    pub async fn rotate_certificate(&self, cert_id: &str, new_cert: &[u8]) -> Result<()> {
        validate_name(cert_id)?;
        let mut index = self.index.lock().await;
        let metadata = index
            .get(cert_id)
            .map(|record| record.metadata.clone())
            .ok_or_else(|| StateError::CertificateNotFound(cert_id.to_string()))?;

        self.snapshot(cert_id).await?;
        self.store_locked(&mut index, cert_id, new_cert, metadata)
            .await?;
        log::info!("rotated certificate {cert_id}");
        Ok(())
    }

    /// Snapshot and remove `cert_id`. Returns whether anything existed.
    pub async fn delete_certificate(&self, cert_id: &str) -> Result<bool> {
        validate_name(cert_id)?;
        let mut index = self.index.lock().await;
        let had_file = self.snapshot(cert_id).await?;
        if had_file {
            tokio::fs::remove_file(self.raw.layout().certificate_path(cert_id)).await?;
        }

        let had_entry = match index.remove(cert_id) {
            Some(record) => {
                if let Err(e) = self.persist(&index).await {
                    index.insert(cert_id.to_string(), record);
                    return Err(e);
                }
                true
            }
            None => false,
        };
        log::debug!("deleted certificate {cert_id}");
        Ok(had_file || had_entry)
    }

    /// The certificate as it was before the last rotation or deletion.
    ///
    /// Opens the newest backup and checks it against the fingerprint
    /// carried in its own envelope. `None` if there is no backup.
    pub async fn previous_certificate(&self, cert_id: &str) -> Result<Option<Vec<u8>>> {
        validate_name(cert_id)?;
        let backup_name = certificate_backup_name(cert_id);
        let backups = list_backups(self.raw.layout().backups_dir(), &backup_name).await?;
        let Some(newest) = backups.first() else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(&newest.path).await?;
        Ok(Some(self.open_file(cert_id, &bytes).await?))
    }

    /// Indexed certificate ids, sorted.
    pub async fn list_certificates(&self) -> Vec<String> {
        self.index.lock().await.keys().cloned().collect()
    }

    pub async fn record(&self, cert_id: &str) -> Option<CertificateRecord> {
        self.index.lock().await.get(cert_id).cloned()
    }

    /// Copy the live certificate file into `backups/` and prune.
    /// Returns whether a live file existed.
    async fn snapshot(&self, cert_id: &str) -> Result<bool> {
        let path = self.raw.layout().certificate_path(cert_id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(false);
        }
        let backups_dir = self.raw.layout().backups_dir();
        let backup_name = certificate_backup_name(cert_id);
        copy_to_backup(backups_dir, &backup_name, &path).await?;
        prune_backups(backups_dir, &backup_name, self.raw.retention()).await;
        Ok(true)
    }

    /// Outer layer then inner layer.
    async fn open_file(&self, cert_id: &str, bytes: &[u8]) -> Result<Vec<u8>> {
        let value = self.raw.open_value(bytes).await?;
        let envelope: CertificateEnvelope = serde_json::from_value(value)
            .map_err(|e| StateError::MalformedDocument(format!("certificate {cert_id}: {e}")))?;
        envelope.open(self.raw.custodian(), cert_id).await
    }

    async fn persist(&self, index: &Index) -> Result<()> {
        self.raw
            .put_raw(CERT_INDEX_DOC, &serde_json::to_value(index)?)
            .await
    }
}

/// Put a certificate file back the way it was before a failed store:
/// the old bytes if there were any, otherwise no file. Best effort.
async fn restore_file(path: &Path, previous: Option<&[u8]>) {
    let result = match previous {
        Some(bytes) => write_atomic_async(path, bytes).await,
        None => match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        },
    };
    if let Err(e) = result {
        log::warn!("could not restore certificate file {}: {e}", path.display());
    }
}

/// Read a metadata map from `k=v` pairs.
pub fn metadata_from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Metadata {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::from(v)))
        .collect()
}
