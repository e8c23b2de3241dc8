//! `SecureState`: the single entry point tying the core together.
//!
//! Construction order is fixed: validate the configuration, create the
//! directory tree, sweep orphans left by a crash, take custody of the key
//! pair, then load the hash index and the certificate index.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::certificate::{CertificateRecord, CertificateVault, Metadata};
use crate::config::{KeyMode, StoreConfig};
use crate::custody::key_file::load_or_create;
use crate::custody::{KeyCustodian, PinStatus};
use crate::error::{Result, StateError};
use crate::progress::{Progress, ProgressSink, ProgressTask};
use crate::storage::{prune_all, sweep_orphans, Layout, PersistentStore, RawStore, SweepReport};

/// What [`SecureState::cleanup`] removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub sweep: SweepReport,
    pub pruned_backups: usize,
}

/// Builder for [`SecureState`].
pub struct SecureStateBuilder {
    config: StoreConfig,
    passphrase: Option<Zeroizing<String>>,
    progress: Progress,
}

impl SecureStateBuilder {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            passphrase: None,
            progress: None,
        }
    }

    /// Operator passphrase protecting the key file. Required in
    /// [`KeyMode::Persistent`], ignored otherwise.
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(Zeroizing::new(passphrase.into()));
        self
    }

    pub fn progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Bring the store up.
    ///
    /// # Errors
    ///
    /// - `StateError::InvalidConfig` for a bad configuration, or persistent
    ///   mode without a passphrase.
    /// - `StateError::InvalidPassphrase` if the key file does not open.
    /// - In persistent mode, any fault opening an existing index.
    pub async fn initialize(self) -> Result<SecureState> {
        let Self {
            config,
            passphrase,
            progress,
        } = self;
        config.validate()?;
        let _task = ProgressTask::start(&progress, "initialize secure state");

        let layout = Layout::new(&config.root_dir);
        layout.create()?;
        let swept = sweep_orphans(&layout).await;
        if swept != SweepReport::default() {
            log::info!(
                "removed {} orphaned temp files and {} stray backups",
                swept.temp_files,
                swept.stray_backups
            );
        }

        let custodian = Arc::new(take_custody(&config, &layout, passphrase).await?);
        let strict = config.key_mode == KeyMode::Persistent;

        let raw = Arc::new(RawStore::new(
            custodian.clone(),
            layout.clone(),
            config.backup_retention,
            progress.clone(),
        ));
        let store = PersistentStore::open(raw.clone(), strict).await?;
        let vault = CertificateVault::open(raw, strict).await?;

        log::info!(
            "secure state ready at {} ({:?} keys, public key {})",
            layout.root().display(),
            config.key_mode,
            custodian.public_fingerprint()
        );
        Ok(SecureState {
            config,
            layout,
            custodian,
            store,
            vault,
        })
    }
}

/// Build the custodian off the async runtime: both modes run at least one
/// slow key derivation.
async fn take_custody(
    config: &StoreConfig,
    layout: &Layout,
    passphrase: Option<Zeroizing<String>>,
) -> Result<KeyCustodian> {
    let pin_memory = config.pin_memory;
    let rounds = config.kdf_iterations;

    let task = match config.key_mode {
        KeyMode::Ephemeral => {
            tokio::task::spawn_blocking(move || KeyCustodian::generate(pin_memory, rounds))
        }
        KeyMode::Persistent => {
            let passphrase = passphrase.ok_or_else(|| {
                StateError::InvalidConfig("persistent key mode needs an operator passphrase".into())
            })?;
            let key_path = layout.key_file_path();
            tokio::task::spawn_blocking(move || {
                let (keypair, created) = load_or_create(&key_path, &passphrase)?;
                if !created {
                    log::debug!("loaded key file {}", key_path.display());
                }
                KeyCustodian::from_keypair(keypair, pin_memory, rounds)
            })
        }
    };
    task.await.map_err(|e| StateError::Worker(e.to_string()))?
}

/// Encrypted, tamper-evident state and certificate storage.
pub struct SecureState {
    config: StoreConfig,
    layout: Layout,
    custodian: Arc<KeyCustodian>,
    store: PersistentStore,
    vault: CertificateVault,
}

impl SecureState {
    pub fn builder(config: StoreConfig) -> SecureStateBuilder {
        SecureStateBuilder::new(config)
    }

    /// Initialize with `config` and no progress sink.
    pub async fn initialize(config: StoreConfig) -> Result<Self> {
        SecureStateBuilder::new(config).initialize().await
    }

    // ── Documents ────────────────────────────────────────────────────────────

    pub async fn save<T: Serialize + ?Sized>(&self, name: &str, document: &T) -> Result<()> {
        self.store.save(name, document).await
    }

    pub async fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.store.load(name).await
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        self.store.delete(name).await
    }

    pub async fn list_documents(&self) -> Result<Vec<String>> {
        self.store.list_documents().await
    }

    /// Backup paths of document `name`, newest first.
    pub async fn backups(&self, name: &str) -> Result<Vec<PathBuf>> {
        self.store.backups(name).await
    }

    /// Decrypt one backup file without verification.
    pub async fn open_backup(&self, path: &Path) -> Result<serde_json::Value> {
        self.store.open_backup(path).await
    }

    // ── Certificates ─────────────────────────────────────────────────────────

    pub async fn store_certificate(&self, cert_id: &str, cert: &[u8], metadata: Metadata) -> Result<()> {
        self.vault.store_certificate(cert_id, cert, metadata).await
    }

    pub async fn load_certificate(&self, cert_id: &str) -> Result<(Vec<u8>, Metadata)> {
        self.vault.load_certificate(cert_id).await
    }

    pub async fn rotate_certificate(&self, cert_id: &str, new_cert: &[u8]) -> Result<()> {
        self.vault.rotate_certificate(cert_id, new_cert).await
    }

    pub async fn delete_certificate(&self, cert_id: &str) -> Result<bool> {
        self.vault.delete_certificate(cert_id).await
    }

    pub async fn previous_certificate(&self, cert_id: &str) -> Result<Option<Vec<u8>>> {
        self.vault.previous_certificate(cert_id).await
    }

    pub async fn list_certificates(&self) -> Vec<String> {
        self.vault.list_certificates().await
    }

    pub async fn certificate_record(&self, cert_id: &str) -> Option<CertificateRecord> {
        self.vault.record(cert_id).await
    }

    // ── Housekeeping ─────────────────────────────────────────────────────────

    /// Sweep orphans, prune every backup set to retention, then destroy the
    /// key material. Best effort throughout; never fails.
    ///
    /// Afterwards every operation that needs the key fails with
    /// `MissingKeyMaterial`.
    pub async fn cleanup(&self) -> CleanupReport {
        let sweep = sweep_orphans(&self.layout).await;
        let pruned_backups = prune_all(self.layout.backups_dir(), self.config.backup_retention).await;
        self.custodian.destroy().await;
        log::info!("secure state cleaned up");
        CleanupReport {
            sweep,
            pruned_backups,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn key_mode(&self) -> KeyMode {
        self.config.key_mode
    }

    pub fn public_fingerprint(&self) -> String {
        self.custodian.public_fingerprint()
    }

    pub fn pin_status(&self) -> &PinStatus {
        self.custodian.pin_status()
    }

    pub fn is_active(&self) -> bool {
        self.custodian.is_active()
    }
}

impl std::fmt::Debug for SecureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureState")
            .field("root", &self.layout.root())
            .field("key_mode", &self.config.key_mode)
            .field("custodian", &self.custodian)
            .finish()
    }
}
