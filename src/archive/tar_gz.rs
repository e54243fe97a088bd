//! Gzipped tar extraction.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

use super::extract::{create_queued_symlinks, queue_symlink, write_entry, QueuedSymlink};
use super::path::{detect_top_dir, ensure_within_dir, entry_rel_path, strip_top_dir};

/// Extract tar.gz entries using a caller-provided destination resolver.
/// Returning `None` from `destination_for` skips the entry.
pub fn extract_tar_gz_mapped<F>(
    archive_path: &Path,
    dest_dir: &Path,
    mut destination_for: F,
) -> Result<()>
where
    F: FnMut(&str) -> Option<PathBuf>,
{
    fs::create_dir_all(dest_dir)
        .map_err(|e| AppError::io(format!("failed to create {}: {}", dest_dir.display(), e)))?;
    let file = fs::File::open(archive_path)
        .map_err(|e| AppError::io(format!("failed to open {}: {}", archive_path.display(), e)))?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    let mut pending_symlinks: Vec<QueuedSymlink> = Vec::new();

    for entry in archive.entries().map_err(|e| AppError::io(e.to_string()))? {
        let mut entry = entry.map_err(|e| AppError::io(e.to_string()))?;

        let raw_path = {
            let entry_path = entry.path().map_err(|e| AppError::io(e.to_string()))?;
            let s = entry_path.as_ref().to_str().ok_or_else(|| {
                AppError::io(format!("archive entry path is not valid UTF-8: {:?}", entry_path))
            })?;
            s.to_string()
        };

        if entry_rel_path(&raw_path).is_none() {
            return Err(AppError::io(format!(
                "archive contains unsafe entry path: {:?}",
                raw_path
            )));
        }

        let Some(out_path) = destination_for(&raw_path) else {
            continue;
        };
        ensure_within_dir(dest_dir, &out_path)?;

        let entry_type = entry.header().entry_type();
        match entry_type {
            tar::EntryType::Symlink => {
                let target = entry
                    .link_name()
                    .map_err(|e| AppError::io(e.to_string()))?
                    .ok_or_else(|| AppError::io("symlink entry missing link target"))?;
                pending_symlinks.push(queue_symlink(&out_path, target.as_ref())?);
            }
            _ if entry_type.is_dir() || entry_type.is_file() => {
                let unix_mode = entry.header().mode().ok();
                let declared_size = if entry_type.is_file() {
                    Some(entry.header().size().map_err(|e| AppError::io(e.to_string()))?)
                } else {
                    None
                };
                write_entry(
                    &out_path,
                    entry_type.is_dir(),
                    &mut entry,
                    unix_mode,
                    declared_size,
                )?;
            }
            _ => {
                return Err(AppError::io(format!(
                    "unsupported tar entry type at {:?}: {:?}",
                    raw_path, entry_type
                )));
            }
        }
    }

    create_queued_symlinks(pending_symlinks)
}

/// Extract a tar.gz archive into `dest_dir`, optionally stripping the
/// single wrapping top-level directory release archives usually carry.
pub fn extract_tar_gz(archive_path: &Path, dest_dir: &Path, strip_top: bool) -> Result<()> {
    let top_dir = if strip_top {
        let file = fs::File::open(archive_path)
            .map_err(|e| AppError::io(format!("failed to open {}: {}", archive_path.display(), e)))?;
        let decoder = flate2::read::GzDecoder::new(file);
        let mut archive = tar::Archive::new(decoder);

        let mut names = Vec::new();
        for entry in archive.entries().map_err(|e| AppError::io(e.to_string()))? {
            let entry = entry.map_err(|e| AppError::io(e.to_string()))?;
            let entry_path = entry.path().map_err(|e| AppError::io(e.to_string()))?;
            if let Some(s) = entry_path.as_ref().to_str() {
                names.push(s.to_string());
            }
        }
        detect_top_dir(names.iter().map(String::as_str))
    } else {
        None
    };

    extract_tar_gz_mapped(archive_path, dest_dir, |raw_path| {
        let relative = entry_rel_path(raw_path)?;
        let stripped = strip_top_dir(&relative, top_dir.as_deref())?;
        Some(dest_dir.join(stripped))
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::{extract_tar_gz, extract_tar_gz_mapped};

    pub(crate) fn build_tar_gz(dest: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(dest).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            // Write the entry name directly into the GNU header so fixtures can
            // carry traversal names (e.g. `../escape.txt`) that the safe
            // `append_data` path refuses to set.
            let name_bytes = name.as_bytes();
            let gnu = header.as_gnu_mut().unwrap();
            gnu.name[..name_bytes.len()].copy_from_slice(name_bytes);
            header.set_cksum();
            builder.append(&header, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn strips_the_wrapping_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let archive = dir.path().join("release.tar.gz");
        build_tar_gz(
            &archive,
            &[
                ("game-1.0/server.bin", b"bin".as_slice()),
                ("game-1.0/data/map.dat", b"map".as_slice()),
            ],
        );

        let dest = dir.path().join("out");
        extract_tar_gz(&archive, &dest, true).unwrap();
        assert_eq!(fs::read(dest.join("server.bin")).unwrap(), b"bin");
        assert_eq!(fs::read(dest.join("data/map.dat")).unwrap(), b"map");
        assert!(!dest.join("game-1.0").exists());
    }

    #[test]
    fn traversal_entries_abort_extraction() {
        let dir = tempfile::TempDir::new().unwrap();
        let archive = dir.path().join("evil.tar.gz");
        build_tar_gz(&archive, &[("../escape.txt", b"x".as_slice())]);

        let dest = dir.path().join("out");
        assert!(extract_tar_gz(&archive, &dest, false).is_err());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn mapped_extraction_can_skip_entries() {
        let dir = tempfile::TempDir::new().unwrap();
        let archive = dir.path().join("a.tar.gz");
        build_tar_gz(
            &archive,
            &[
                ("keep.txt", b"keep".as_slice()),
                ("skip.txt", b"skip".as_slice()),
            ],
        );

        let dest = dir.path().join("out");
        extract_tar_gz_mapped(&archive, &dest, |raw| {
            if raw.contains("skip") {
                None
            } else {
                Some(dest.join(raw))
            }
        })
        .unwrap();
        assert!(dest.join("keep.txt").exists());
        assert!(!dest.join("skip.txt").exists());
    }
}
