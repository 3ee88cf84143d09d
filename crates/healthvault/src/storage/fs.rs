//! File-writing helpers shared by the stores.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Result, VaultError};

// Dot-prefixed so directory scans never mistake it for a record.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()))
}

fn write_temp(path: &Path, data: &[u8]) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = temp_path(path);
    std::fs::write(&tmp_path, data)?;
    Ok(tmp_path)
}

/// Write `data` to `path` so a concurrent reader never sees a partial file.
///
/// Any existing file is replaced.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = write_temp(path, data)?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(VaultError::Io(e));
    }
    Ok(())
}

/// Like [`write_atomic`] but fails with `AlreadyExists` instead of replacing.
pub fn write_new(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = write_temp(path, data)?;
    let linked = std::fs::hard_link(&tmp_path, path);
    let _ = std::fs::remove_file(&tmp_path);
    match linked {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(VaultError::AlreadyExists(path.display().to_string()))
        }
        Err(e) => Err(VaultError::Io(e)),
    }
}
