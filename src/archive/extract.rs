//! Entry materialization shared by the tar and zip extractors.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

use super::path::validate_link_target;

#[cfg(unix)]
fn set_unix_permissions(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| AppError::io(format!("failed to set permissions on {}: {}", path.display(), e)))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_unix_permissions(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

/// Write one regular entry (file or directory) to disk. File sizes are
/// checked against the archive's declared size so a truncated stream is an
/// error, not a silently short file.
pub(super) fn write_entry<R>(
    out_path: &Path,
    is_dir: bool,
    reader: &mut R,
    unix_mode: Option<u32>,
    declared_size: Option<u64>,
) -> Result<()>
where
    R: io::Read,
{
    if is_dir {
        fs::create_dir_all(out_path)
            .map_err(|e| AppError::io(format!("failed to create {}: {}", out_path.display(), e)))?;
        return Ok(());
    }

    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io(format!("failed to create {}: {}", parent.display(), e)))?;
    }

    let mut outfile = fs::File::create(out_path)
        .map_err(|e| AppError::io(format!("failed to create {}: {}", out_path.display(), e)))?;
    let written = io::copy(reader, &mut outfile)
        .map_err(|e| AppError::io(format!("failed to write {}: {}", out_path.display(), e)))?;
    if let Some(expected) = declared_size {
        if written != expected {
            return Err(AppError::io(format!(
                "{}: entry size mismatch, expected {} bytes, wrote {}",
                out_path.display(),
                expected,
                written
            )));
        }
    }
    set_unix_permissions(out_path, unix_mode)
}

/// Symlink deferred until every regular entry exists, so links cannot be
/// used to redirect later writes.
pub(super) struct QueuedSymlink {
    pub link_path: PathBuf,
    pub target: PathBuf,
}

pub(super) fn queue_symlink(link_path: &Path, target: &Path) -> Result<QueuedSymlink> {
    validate_link_target(target)?;
    Ok(QueuedSymlink {
        link_path: link_path.to_path_buf(),
        target: target.to_path_buf(),
    })
}

#[cfg(unix)]
pub(super) fn create_queued_symlinks(pending: Vec<QueuedSymlink>) -> Result<()> {
    for link in pending {
        if let Some(parent) = link.link_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::io(format!("failed to create {}: {}", parent.display(), e)))?;
        }
        if link.link_path.exists() || link.link_path.is_symlink() {
            fs::remove_file(&link.link_path).map_err(|e| {
                AppError::io(format!("failed to replace {}: {}", link.link_path.display(), e))
            })?;
        }
        std::os::unix::fs::symlink(&link.target, &link.link_path).map_err(|e| {
            AppError::io(format!(
                "failed to create symlink {} -> {}: {}",
                link.link_path.display(),
                link.target.display(),
                e
            ))
        })?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub(super) fn create_queued_symlinks(pending: Vec<QueuedSymlink>) -> Result<()> {
    if let Some(link) = pending.first() {
        log::warn!("Skipping {} archive symlink(s), first: {}", pending.len(), link.link_path.display());
    }
    Ok(())
}
