//! Install-directory backups.
//!
//! A backup is an immutable snapshot of an instance's install directory,
//! either a `.tar.gz` archive or a plain directory copy, named with a
//! timestamp for human identification only. Each backup carries a
//! `backup.toml` metadata document recording which instance and version it
//! was taken from; restore refuses snapshots recorded for another instance.

use std::fs::{self, File};
use std::io::Read as _;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tar::Archive;

use crate::archive::{entry_rel_path, extract_tar_gz_mapped};
use crate::deploy::copy_tree;
use crate::error::{AppError, Result};
use crate::instance::InstanceRecord;
use crate::version::{self, LatestVersion};

const METADATA_FILE: &str = "backup.toml";
const INSTALL_PREFIX: &str = "install";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub created_at: String,
    pub instance: String,
    pub blueprint: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub name: String,
    pub path: PathBuf,
    pub compressed: bool,
    pub metadata: BackupMetadata,
}

/// Snapshot the install directory. Returns the backup path.
pub fn create(record: &InstanceRecord) -> Result<PathBuf> {
    let install_dir = &record.install_dir;
    if !install_dir.is_dir()
        || fs::read_dir(install_dir)
            .map_err(|e| AppError::backup(format!("failed to read {}: {}", install_dir.display(), e)))?
            .next()
            .is_none()
    {
        return Err(AppError::backup(format!(
            "nothing to back up: {} is empty",
            install_dir.display()
        )));
    }

    fs::create_dir_all(&record.backups_dir)
        .map_err(|e| AppError::backup(format!("failed to create backups dir: {}", e)))?;

    let metadata = BackupMetadata {
        created_at: chrono::Utc::now().to_rfc3339(),
        instance: record.name.clone(),
        blueprint: record.blueprint.clone(),
        version: version::installed_version(&record.layout())?,
    };

    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let base_name = format!("{}-{}", record.name, stamp);

    if record.compress_backups {
        create_archive_backup(record, &metadata, &base_name)
    } else {
        create_directory_backup(record, &metadata, &base_name)
    }
}

fn create_archive_backup(
    record: &InstanceRecord,
    metadata: &BackupMetadata,
    base_name: &str,
) -> Result<PathBuf> {
    let backup_path = record.backups_dir.join(format!("{}.tar.gz", base_name));
    let file = File::create(&backup_path)
        .map_err(|e| AppError::backup(format!("failed to create {}: {}", backup_path.display(), e)))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let metadata_toml = toml::to_string_pretty(metadata)
        .map_err(|e| AppError::backup(format!("failed to serialize metadata: {}", e)))?;
    let mut header = tar::Header::new_gnu();
    header.set_size(metadata_toml.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, METADATA_FILE, metadata_toml.as_bytes())
        .map_err(|e| AppError::backup(format!("failed to add metadata: {}", e)))?;

    builder
        .append_dir_all(INSTALL_PREFIX, &record.install_dir)
        .map_err(|e| AppError::backup(format!("failed to archive install dir: {}", e)))?;

    builder
        .into_inner()
        .map_err(|e| AppError::backup(format!("failed to finalize archive: {}", e)))?
        .finish()
        .map_err(|e| AppError::backup(format!("failed to finalize archive: {}", e)))?;

    Ok(backup_path)
}

fn create_directory_backup(
    record: &InstanceRecord,
    metadata: &BackupMetadata,
    base_name: &str,
) -> Result<PathBuf> {
    let backup_path = record.backups_dir.join(base_name);
    copy_tree(&record.install_dir, &backup_path.join(INSTALL_PREFIX))
        .map_err(|e| AppError::backup(format!("failed to copy install dir: {}", e)))?;

    let metadata_toml = toml::to_string_pretty(metadata)
        .map_err(|e| AppError::backup(format!("failed to serialize metadata: {}", e)))?;
    fs::write(backup_path.join(METADATA_FILE), metadata_toml)
        .map_err(|e| AppError::backup(format!("failed to write metadata: {}", e)))?;

    Ok(backup_path)
}

/// All backups of an instance, newest first.
pub fn list(record: &InstanceRecord) -> Result<Vec<BackupInfo>> {
    let backups_dir = &record.backups_dir;
    if !backups_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();
    for entry in fs::read_dir(backups_dir)
        .map_err(|e| AppError::backup(format!("failed to read {}: {}", backups_dir.display(), e)))?
    {
        let entry = entry.map_err(|e| AppError::backup(e.to_string()))?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            log::warn!("Skipping backup with non-UTF-8 name: {}", path.display());
            continue;
        };

        let compressed = name.ends_with(".tar.gz");
        if !compressed && !path.is_dir() {
            continue;
        }

        match read_metadata(&path) {
            Ok(metadata) => backups.push(BackupInfo {
                name,
                path,
                compressed,
                metadata,
            }),
            Err(e) => log::warn!("Skipping unreadable backup {}: {}", path.display(), e),
        }
    }

    backups.sort_by(|a, b| b.metadata.created_at.cmp(&a.metadata.created_at));
    Ok(backups)
}

/// Resolve a backup argument: an existing path, or a name under the
/// instance's backups directory.
pub fn resolve(record: &InstanceRecord, name_or_path: &str) -> Result<PathBuf> {
    let direct = Path::new(name_or_path);
    if direct.exists() {
        return Ok(direct.to_path_buf());
    }
    let candidate = record.backups_dir.join(name_or_path);
    if candidate.exists() {
        return Ok(candidate);
    }
    Err(AppError::backup(format!("backup {} not found", name_or_path)))
}

fn read_metadata(backup_path: &Path) -> Result<BackupMetadata> {
    if backup_path.is_dir() {
        let content = fs::read_to_string(backup_path.join(METADATA_FILE))
            .map_err(|e| AppError::backup(format!("missing {}: {}", METADATA_FILE, e)))?;
        return toml::from_str(&content)
            .map_err(|e| AppError::backup(format!("failed to parse metadata: {}", e)));
    }

    let file = File::open(backup_path)
        .map_err(|e| AppError::backup(format!("failed to open {}: {}", backup_path.display(), e)))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    for entry in archive.entries().map_err(|e| AppError::backup(e.to_string()))? {
        let mut entry = entry.map_err(|e| AppError::backup(e.to_string()))?;
        let path = entry.path().map_err(|e| AppError::backup(e.to_string()))?;
        if path.to_str() == Some(METADATA_FILE) {
            let mut content = String::new();
            entry
                .read_to_string(&mut content)
                .map_err(|e| AppError::backup(e.to_string()))?;
            return toml::from_str(&content)
                .map_err(|e| AppError::backup(format!("failed to parse metadata: {}", e)));
        }
    }

    Err(AppError::backup(format!(
        "{} has no {}",
        backup_path.display(),
        METADATA_FILE
    )))
}

/// Restore a backup onto an emptied install directory and re-record the
/// snapshot's version marker.
pub fn restore(record: &InstanceRecord, backup_path: &Path) -> Result<()> {
    let metadata = read_metadata(backup_path)?;
    if metadata.instance != record.name {
        return Err(AppError::backup(format!(
            "backup belongs to instance {}, not {}",
            metadata.instance, record.name
        )));
    }

    let install_dir = &record.install_dir;
    if install_dir.exists() {
        fs::remove_dir_all(install_dir)
            .map_err(|e| AppError::backup(format!("failed to clear {}: {}", install_dir.display(), e)))?;
    }
    fs::create_dir_all(install_dir)
        .map_err(|e| AppError::backup(format!("failed to create {}: {}", install_dir.display(), e)))?;

    if backup_path.is_dir() {
        copy_tree(&backup_path.join(INSTALL_PREFIX), install_dir)
            .map_err(|e| AppError::backup(format!("failed to restore: {}", e)))?;
    } else {
        extract_tar_gz_mapped(backup_path, install_dir, |raw| {
            let relative = entry_rel_path(raw)?;
            let payload = relative.strip_prefix(INSTALL_PREFIX).ok()?;
            if payload.as_os_str().is_empty() {
                return None;
            }
            Some(install_dir.join(payload))
        })
        .map_err(|e| AppError::backup(format!("failed to restore: {}", e)))?;
    }

    let layout = record.layout();
    match &metadata.version {
        Some(version) => {
            version::save_installed_version(&layout, &LatestVersion::Resolved(version.clone()))?
        }
        None => {
            if layout.version_file().exists() {
                fs::remove_file(layout.version_file()).map_err(|e| AppError::io(e.to_string()))?;
            }
        }
    }

    Ok(())
}

/// Delete a backup snapshot.
pub fn delete(backup_path: &Path) -> Result<()> {
    if backup_path.is_dir() {
        fs::remove_dir_all(backup_path)
            .map_err(|e| AppError::backup(format!("failed to delete {}: {}", backup_path.display(), e)))
    } else if backup_path.exists() {
        fs::remove_file(backup_path)
            .map_err(|e| AppError::backup(format!("failed to delete {}: {}", backup_path.display(), e)))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{create, delete, list, resolve, restore};
    use crate::instance::sample_record;
    use crate::version::installed_version;

    fn seeded_record(dir: &std::path::Path, compress: bool) -> crate::instance::InstanceRecord {
        let mut record = sample_record("factorio-0001", &dir.join("factorio-0001"));
        record.compress_backups = compress;
        record.layout().materialize().unwrap();
        fs::write(record.install_dir.join("server.bin"), b"bin").unwrap();
        fs::create_dir_all(record.install_dir.join("data")).unwrap();
        fs::write(record.install_dir.join("data/map.dat"), b"map").unwrap();
        record
    }

    fn install_snapshot(record: &crate::instance::InstanceRecord) -> Vec<(String, Vec<u8>)> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&record.install_dir).sort_by_file_name() {
            let entry = entry.unwrap();
            if entry.file_type().is_file() {
                let rel = entry.path().strip_prefix(&record.install_dir).unwrap();
                files.push((rel.display().to_string(), fs::read(entry.path()).unwrap()));
            }
        }
        files
    }

    #[test]
    fn archive_backup_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let record = seeded_record(dir.path(), true);
        crate::version::save_installed_version(
            &record.layout(),
            &crate::version::LatestVersion::Resolved("77".to_string()),
        )
        .unwrap();
        let before = install_snapshot(&record);

        let backup_path = create(&record).unwrap();
        assert!(backup_path.to_string_lossy().ends_with(".tar.gz"));

        // Wreck the install dir, then restore onto an emptied one.
        fs::remove_dir_all(&record.install_dir).unwrap();
        restore(&record, &backup_path).unwrap();

        assert_eq!(install_snapshot(&record), before);
        assert_eq!(
            installed_version(&record.layout()).unwrap().as_deref(),
            Some("77")
        );
    }

    #[test]
    fn directory_backup_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let record = seeded_record(dir.path(), false);
        let before = install_snapshot(&record);

        let backup_path = create(&record).unwrap();
        assert!(backup_path.is_dir());

        fs::remove_dir_all(&record.install_dir).unwrap();
        restore(&record, &backup_path).unwrap();
        assert_eq!(install_snapshot(&record), before);
    }

    #[test]
    fn restore_rejects_foreign_backup() {
        let dir = tempfile::TempDir::new().unwrap();
        let record = seeded_record(dir.path(), true);
        let backup_path = create(&record).unwrap();

        let mut other = sample_record("rust-0001", &dir.path().join("rust-0001"));
        other.compress_backups = true;
        other.layout().materialize().unwrap();

        let err = restore(&other, &backup_path).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Backup);
    }

    #[test]
    fn list_is_newest_first_and_resolve_finds_by_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let record = seeded_record(dir.path(), true);

        let first = create(&record).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let second = create(&record).unwrap();

        let backups = list(&record).unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(backups[0].path, second);
        assert_eq!(backups[1].path, first);

        let resolved = resolve(&record, &backups[0].name).unwrap();
        assert_eq!(resolved, second);

        delete(&resolved).unwrap();
        assert_eq!(list(&record).unwrap().len(), 1);
    }

    #[test]
    fn empty_install_dir_cannot_be_backed_up() {
        let dir = tempfile::TempDir::new().unwrap();
        let record = sample_record("factorio-0001", &dir.path().join("w"));
        record.layout().materialize().unwrap();
        let err = create(&record).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Backup);
    }
}
