//! Timestamped backups under `backups/`.
//!
//! A backup of document `name` is the file `<name>.<stamp>.bak`, where
//! `stamp` is a 20-digit UTC timestamp (see [`crate::time`]). Stamps are
//! strictly increasing per name, so newest-first order is stamp order and
//! K writes always leave K distinct files before pruning.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::storage::layout::BACKUP_SUFFIX;
use crate::time::{backup_stamp, format_stamp, parse_stamp};

/// One backup file of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub name: String,
    pub stamp: u128,
    pub path: PathBuf,
}

/// Split a backup file name into `(document name, stamp)`.
///
/// Returns `None` for anything that is not `<name>.<20 digits>.bak`.
pub fn parse_backup_file_name(file_name: &str) -> Option<(&str, u128)> {
    let stem = file_name.strip_suffix(BACKUP_SUFFIX)?;
    let (name, stamp) = stem.rsplit_once('.')?;
    if name.is_empty() {
        return None;
    }
    Some((name, parse_stamp(stamp)?))
}

fn backup_file_name(name: &str, stamp: u128) -> String {
    format!("{name}.{}{BACKUP_SUFFIX}", format_stamp(stamp))
}

/// Every backup in `dir`, in directory order.
async fn scan(dir: &Path) -> Result<Vec<BackupEntry>> {
    let mut found = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if let Some((name, stamp)) = parse_backup_file_name(&file_name) {
            found.push(BackupEntry {
                name: name.to_string(),
                stamp,
                path: entry.path(),
            });
        }
    }
    Ok(found)
}

/// Backups of exactly `name`, newest first.
pub async fn list_backups(dir: &Path, name: &str) -> Result<Vec<BackupEntry>> {
    let mut found: Vec<BackupEntry> = scan(dir)
        .await?
        .into_iter()
        .filter(|b| b.name == name)
        .collect();
    found.sort_by(|a, b| b.stamp.cmp(&a.stamp));
    Ok(found)
}

/// Write `data` as a new backup of `name` and return its path.
pub async fn create_backup(dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf> {
    let latest = list_backups(dir, name).await?.first().map(|b| b.stamp);
    let mut stamp = backup_stamp();
    if let Some(latest) = latest {
        stamp = stamp.max(latest + 1);
    }

    let path = dir.join(backup_file_name(name, stamp));
    tokio::fs::write(&path, data).await?;
    log::debug!("backup written: {}", path.display());
    Ok(path)
}

/// Copy an existing file into a new backup of `name`.
pub async fn copy_to_backup(dir: &Path, name: &str, source: &Path) -> Result<PathBuf> {
    let data = tokio::fs::read(source).await?;
    create_backup(dir, name, &data).await
}

/// Keep the `keep` newest backups of `name`, deleting the rest.
///
/// Best effort: failures are logged, never returned. Returns how many
/// files were deleted.
pub async fn prune_backups(dir: &Path, name: &str, keep: usize) -> usize {
    match list_backups(dir, name).await {
        Ok(backups) => remove_all(backups.into_iter().skip(keep)).await,
        Err(e) => {
            log::warn!("could not list backups of {name}: {e}");
            0
        }
    }
}

/// Apply [`prune_backups`] to every document that has backups.
pub async fn prune_all(dir: &Path, keep: usize) -> usize {
    let all = match scan(dir).await {
        Ok(all) => all,
        Err(e) => {
            log::warn!("could not scan backups: {e}");
            return 0;
        }
    };

    let mut by_name: std::collections::BTreeMap<String, Vec<BackupEntry>> = Default::default();
    for entry in all {
        by_name.entry(entry.name.clone()).or_default().push(entry);
    }

    let mut removed = 0;
    for (_, mut entries) in by_name {
        entries.sort_by(|a, b| b.stamp.cmp(&a.stamp));
        removed += remove_all(entries.into_iter().skip(keep)).await;
    }
    removed
}

async fn remove_all(entries: impl Iterator<Item = BackupEntry>) -> usize {
    let mut removed = 0;
    for entry in entries {
        match tokio::fs::remove_file(&entry.path).await {
            Ok(()) => removed += 1,
            Err(e) => log::warn!("could not prune {}: {e}", entry.path.display()),
        }
    }
    removed
}
