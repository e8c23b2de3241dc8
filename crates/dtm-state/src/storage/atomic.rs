//! Atomic replace and orphan sweeping.
//!
//! Every write goes to a randomly suffixed sibling temp file which is
//! flushed to disk and then renamed over the target. Readers see the old
//! file or the new file, never a partial one. A crash between the write and
//! the rename leaves a `*.tmp` orphan that [`sweep_orphans`] removes on the
//! next start.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::crypto::random::random_hex;
use crate::error::{Result, StateError};
use crate::storage::layout::{Layout, BACKUP_SUFFIX, TEMP_SUFFIX};

/// Temp sibling for `path`: `<file>.<16 hex>.tmp`.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{file_name}.{}{TEMP_SUFFIX}", random_hex(8)))
}

/// Write `data` to `path` atomically (blocking).
///
/// Creates the parent directory if it does not exist.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_path_for(path);
    let result = (|| {
        std::fs::write(&tmp_path, data)?;
        std::fs::File::open(&tmp_path)?.sync_all()?;
        replace(&tmp_path, path)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

/// Write `data` to `path` atomically.
///
/// On failure the temp file is removed and the previous target, if any, is
/// left untouched.
pub async fn write_atomic_async(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = temp_path_for(path);
    let result = async {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        replace_async(&tmp_path, path).await?;
        Ok::<(), StateError>(())
    }
    .await;

    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("could not remove temp file {}: {e}", tmp_path.display());
            }
        }
    }
    result
}

async fn replace_async(from: &Path, to: &Path) -> Result<()> {
    // rename does not overwrite on every non-unix platform
    if cfg!(not(unix)) && tokio::fs::try_exists(to).await? {
        tokio::fs::remove_file(to).await?;
    }
    tokio::fs::rename(from, to).await?;
    Ok(())
}

#[cfg(unix)]
fn replace(from: &Path, to: &Path) -> Result<()> {
    std::fs::rename(from, to)?;
    Ok(())
}

#[cfg(not(unix))]
fn replace(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        std::fs::remove_file(to)?;
    }
    std::fs::rename(from, to)?;
    Ok(())
}

/// Files removed by one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub temp_files: usize,
    pub stray_backups: usize,
}

/// Delete `*.tmp` files in every subtree and `*.bak` files outside `backups/`.
///
/// Best effort: unreadable directories and undeletable files are logged and
/// skipped.
pub async fn sweep_orphans(layout: &Layout) -> SweepReport {
    let mut report = SweepReport::default();
    for (dir_name, dir) in layout.subtrees() {
        let in_backups = dir == layout.backups_dir();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("sweep skipped {dir_name}: {e}");
                continue;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_temp = name.ends_with(TEMP_SUFFIX);
            let is_stray_backup = !in_backups && name.ends_with(BACKUP_SUFFIX);
            if !is_temp && !is_stray_backup {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) if is_temp => report.temp_files += 1,
                Ok(()) => report.stray_backups += 1,
                Err(e) => log::warn!("sweep could not remove {dir_name}/{name}: {e}"),
            }
        }
    }
    if report != SweepReport::default() {
        log::debug!(
            "sweep removed {} temp files and {} stray backups",
            report.temp_files,
            report.stray_backups
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_path_is_sibling() {
        let tmp = temp_path_for(Path::new("/r/state/session"));
        assert_eq!(tmp.parent(), Some(Path::new("/r/state")));
        let name = tmp.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("session."));
        assert!(name.ends_with(".tmp"));
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep").join("file");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_write_atomic_async_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session");
        write_atomic_async(&path, b"old").await.unwrap();
        write_atomic_async(&path, b"new").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, b"previous").unwrap();
        // A target inside a missing directory cannot be written.
        let bad = dir.path().join("missing").join("target");
        assert!(write_atomic_async(&bad, b"new").await.is_err());
        assert_eq!(std::fs::read(&target).unwrap(), b"previous");
    }

    #[tokio::test]
    async fn test_sweep_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.create().unwrap();

        std::fs::write(layout.state_dir().join("session.abcd.tmp"), b"x").unwrap();
        std::fs::write(layout.state_dir().join("session.20240101000000000000.bak"), b"x").unwrap();
        std::fs::write(layout.certificates_dir().join("tls.cert.1234.tmp"), b"x").unwrap();
        std::fs::write(layout.backups_dir().join("half.written.tmp"), b"x").unwrap();
        std::fs::write(layout.backups_dir().join("session.20240101000000000000.bak"), b"x").unwrap();
        std::fs::write(layout.state_dir().join("session"), b"live").unwrap();

        let report = sweep_orphans(&layout).await;
        assert_eq!(report.temp_files, 3);
        assert_eq!(report.stray_backups, 1);
        assert!(layout.state_dir().join("session").exists());
        assert!(layout
            .backups_dir()
            .join("session.20240101000000000000.bak")
            .exists());
    }
}
