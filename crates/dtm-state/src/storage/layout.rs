//! On-disk directory layout and name rules.

use std::path::{Path, PathBuf};

use crate::error::{Result, StateError};

const STATE_DIR: &str = "state";
const BACKUPS_DIR: &str = "backups";
const CERTIFICATES_DIR: &str = "certificates";
const KEY_FILE_NAME: &str = "custodian.key";

/// Extension of certificate blobs under `certificates/`.
pub const CERT_EXTENSION: &str = "cert";
/// Suffix of in-flight temp files. Anything carrying it is swept at startup.
pub const TEMP_SUFFIX: &str = ".tmp";
/// Suffix of backup files.
pub const BACKUP_SUFFIX: &str = ".bak";

/// The three subtrees of one store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
    state: PathBuf,
    backups: PathBuf,
    certificates: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            state: root.join(STATE_DIR),
            backups: root.join(BACKUPS_DIR),
            certificates: root.join(CERTIFICATES_DIR),
            root,
        }
    }

    /// Create every subtree (and the root) if missing.
    pub fn create(&self) -> Result<()> {
        for dir in [&self.state, &self.backups, &self.certificates] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> &Path {
        &self.state
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups
    }

    pub fn certificates_dir(&self) -> &Path {
        &self.certificates
    }

    /// `(name, dir)` pairs for the sweep.
    pub fn subtrees(&self) -> [(&'static str, &Path); 3] {
        [
            (STATE_DIR, &self.state),
            (BACKUPS_DIR, &self.backups),
            (CERTIFICATES_DIR, &self.certificates),
        ]
    }

    pub fn state_path(&self, name: &str) -> PathBuf {
        self.state.join(name)
    }

    pub fn certificate_path(&self, cert_id: &str) -> PathBuf {
        self.certificates.join(format!("{cert_id}.{CERT_EXTENSION}"))
    }

    pub fn key_file_path(&self) -> PathBuf {
        self.root.join(KEY_FILE_NAME)
    }
}

/// Backup-namespace name of a certificate: `<certId>.cert`.
pub fn certificate_backup_name(cert_id: &str) -> String {
    format!("{cert_id}.{CERT_EXTENSION}")
}

/// Check that `name` is usable as a single file name inside a subtree.
///
/// Rejects empty names, `.`/`..`, path separators, NUL, and the suffixes
/// reserved for temp and backup files.
pub fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.ends_with(TEMP_SUFFIX)
        || name.ends_with(BACKUP_SUFFIX);
    if bad {
        return Err(StateError::InvalidName(name.to_string()));
    }
    Ok(())
}
