//! Store configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration. The root directory can be overridden with the
//! `DTM_STATE_DIR` environment variable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::encryption::MIN_PBKDF2_ROUNDS;
use crate::error::{Result, StateError};

/// Hard upper bound on retained backups per document.
pub const MAX_BACKUPS: usize = 5;

/// Environment variable overriding [`StoreConfig::root_dir`].
pub const ROOT_ENV: &str = "DTM_STATE_DIR";

const DEFAULT_ROOT_NAME: &str = ".dtm";

/// Lifetime of the custodian's key pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// New key pair every process start; nothing key-related touches disk.
    #[default]
    Ephemeral,
    /// Key pair kept in a passphrase-protected key file under the root.
    Persistent,
}

/// Configuration for a [`SecureState`](crate::SecureState).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root of the `state/`, `backups/`, `certificates/` tree.
    pub root_dir: PathBuf,
    /// Backups retained per document name (1..=5).
    pub backup_retention: usize,
    /// PBKDF2 rounds for the runtime wrapping key.
    pub kdf_iterations: u32,
    /// Try to lock the secret cell's pages in RAM.
    pub pin_memory: bool,
    pub key_mode: KeyMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root(),
            backup_retention: MAX_BACKUPS,
            kdf_iterations: MIN_PBKDF2_ROUNDS,
            pin_memory: true,
            key_mode: KeyMode::Ephemeral,
        }
    }
}

impl StoreConfig {
    /// Defaults, rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root.into(),
            ..Self::default()
        }
    }

    /// Read a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StateError::InvalidConfig(format!("{}: {e}", path.display())))
    }

    /// Apply `DTM_STATE_DIR` if it is set and non-empty.
    pub fn apply_env(mut self) -> Self {
        if let Some(dir) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
            self.root_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(StateError::InvalidConfig("root_dir is empty".into()));
        }
        if !(1..=MAX_BACKUPS).contains(&self.backup_retention) {
            return Err(StateError::InvalidConfig(format!(
                "backup_retention must be between 1 and {MAX_BACKUPS}, got {}",
                self.backup_retention
            )));
        }
        if self.kdf_iterations < MIN_PBKDF2_ROUNDS {
            return Err(StateError::InvalidConfig(format!(
                "kdf_iterations must be at least {MIN_PBKDF2_ROUNDS}, got {}",
                self.kdf_iterations
            )));
        }
        Ok(())
    }
}

fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_ROOT_NAME)
}
