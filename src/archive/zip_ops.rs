//! Zip extraction.

use std::fs;
use std::io::Read as _;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

use super::extract::{create_queued_symlinks, queue_symlink, write_entry, QueuedSymlink};
use super::path::{detect_top_dir, ensure_within_dir, entry_rel_path, strip_top_dir};

/// Extract zip entries using a caller-provided destination resolver.
/// Returning `None` from `destination_for` skips the entry.
pub fn extract_zip_mapped<F>(
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
    let mut archive = zip::ZipArchive::new(file).map_err(|e| AppError::io(e.to_string()))?;
    let mut pending_symlinks: Vec<QueuedSymlink> = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| AppError::io(e.to_string()))?;

        let raw_name = entry.name().to_string();
        if entry_rel_path(&raw_name).is_none() {
            return Err(AppError::io(format!(
                "archive contains unsafe zip path: {:?}",
                raw_name
            )));
        }

        let Some(out_path) = destination_for(&raw_name) else {
            continue;
        };
        ensure_within_dir(dest_dir, &out_path)?;

        if entry.is_symlink() {
            let mut target = String::new();
            entry
                .read_to_string(&mut target)
                .map_err(|e| AppError::io(e.to_string()))?;
            pending_symlinks.push(queue_symlink(&out_path, Path::new(&target))?);
        } else {
            let is_dir = entry.is_dir();
            let unix_mode = entry.unix_mode();
            let declared_size = if is_dir { None } else { Some(entry.size()) };
            write_entry(&out_path, is_dir, &mut entry, unix_mode, declared_size)?;
        }
    }

    create_queued_symlinks(pending_symlinks)
}

/// Extract a zip archive into `dest_dir`, optionally stripping the single
/// wrapping top-level directory.
pub fn extract_zip(archive_path: &Path, dest_dir: &Path, strip_top: bool) -> Result<()> {
    let top_dir = if strip_top {
        let file = fs::File::open(archive_path)
            .map_err(|e| AppError::io(format!("failed to open {}: {}", archive_path.display(), e)))?;
        let archive = zip::ZipArchive::new(file).map_err(|e| AppError::io(e.to_string()))?;
        detect_top_dir(archive.file_names())
    } else {
        None
    };

    extract_zip_mapped(archive_path, dest_dir, |raw_path| {
        let relative = entry_rel_path(raw_path)?;
        let stripped = strip_top_dir(&relative, top_dir.as_deref())?;
        Some(dest_dir.join(stripped))
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write as _;
    use std::path::Path;

    use super::extract_zip;

    pub(crate) fn build_zip(dest: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(dest).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn extracts_flat_archives_as_is() {
        let dir = tempfile::TempDir::new().unwrap();
        let archive = dir.path().join("a.zip");
        build_zip(&archive, &[("server.bin", b"bin".as_slice())]);

        let dest = dir.path().join("out");
        extract_zip(&archive, &dest, true).unwrap();
        assert_eq!(fs::read(dest.join("server.bin")).unwrap(), b"bin");
    }

    #[test]
    fn strips_the_wrapping_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let archive = dir.path().join("a.zip");
        build_zip(
            &archive,
            &[
                ("pkg-2.1/server.bin", b"bin".as_slice()),
                ("pkg-2.1/Linux/data.dat", b"d".as_slice()),
            ],
        );

        let dest = dir.path().join("out");
        extract_zip(&archive, &dest, true).unwrap();
        assert!(dest.join("server.bin").exists());
        assert!(dest.join("Linux/data.dat").exists());
        assert!(!dest.join("pkg-2.1").exists());
    }

    #[test]
    fn traversal_entries_abort_extraction() {
        let dir = tempfile::TempDir::new().unwrap();
        let archive = dir.path().join("evil.zip");
        build_zip(&archive, &[("../escape.txt", b"x".as_slice())]);

        let dest = dir.path().join("out");
        assert!(extract_zip(&archive, &dest, false).is_err());
    }
}
