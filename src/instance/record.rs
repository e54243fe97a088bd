//! Instance records: the persisted configuration of one deployment.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{AppError, Result};
use crate::kv;
use crate::paths::{self, InstanceLayout};
use crate::settings::Settings;

/// How the instance process is supervised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleManager {
    Standalone,
    Systemd,
}

impl LifecycleManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Systemd => "systemd",
        }
    }

    fn parse(raw: &str, source: &Path) -> Result<Self> {
        match raw {
            "standalone" => Ok(Self::Standalone),
            "systemd" => Ok(Self::Systemd),
            _ => Err(AppError::parse(format!(
                "{}: unknown lifecycle_manager {:?}",
                source.display(),
                raw
            ))),
        }
    }
}

/// How the instance process is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    Native,
    Container,
}

impl RuntimeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Container => "container",
        }
    }

    fn parse(raw: &str, source: &Path) -> Result<Self> {
        match raw {
            "native" => Ok(Self::Native),
            "container" => Ok(Self::Container),
            _ => Err(AppError::parse(format!(
                "{}: unknown runtime {:?}",
                source.display(),
                raw
            ))),
        }
    }
}

/// Mutable runtime record derived from exactly one blueprint at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceRecord {
    pub name: String,
    pub blueprint: String,
    pub working_dir: PathBuf,
    pub install_dir: PathBuf,
    pub saves_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub manage_script: PathBuf,
    pub lifecycle_manager: LifecycleManager,
    pub runtime: RuntimeMode,
    pub save_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub auto_update: bool,
    pub compress_backups: bool,
    pub use_upnp: bool,
    pub firewall_managed: bool,
    pub created_at: String,
}

impl InstanceRecord {
    pub fn layout(&self) -> InstanceLayout {
        InstanceLayout::new(&self.working_dir)
    }

    fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("blueprint", self.blueprint.clone()),
            ("working_dir", self.working_dir.display().to_string()),
            ("install_dir", self.install_dir.display().to_string()),
            ("saves_dir", self.saves_dir.display().to_string()),
            ("backups_dir", self.backups_dir.display().to_string()),
            ("temp_dir", self.temp_dir.display().to_string()),
            ("logs_dir", self.logs_dir.display().to_string()),
            ("manage_script", self.manage_script.display().to_string()),
            ("lifecycle_manager", self.lifecycle_manager.as_str().to_string()),
            ("runtime", self.runtime.as_str().to_string()),
            ("save_timeout_secs", self.save_timeout_secs.to_string()),
            ("stop_timeout_secs", self.stop_timeout_secs.to_string()),
            ("auto_update", self.auto_update.to_string()),
            ("compress_backups", self.compress_backups.to_string()),
            ("use_upnp", self.use_upnp.to_string()),
            ("firewall_managed", self.firewall_managed.to_string()),
            ("created_at", self.created_at.clone()),
        ]
    }

    fn from_file(path: &Path) -> Result<Self> {
        let map = kv::load(path)?;

        let path_field = |key: &str| -> Result<PathBuf> {
            Ok(PathBuf::from(kv::require(&map, key, path)?))
        };
        let bool_field = |key: &str| -> Result<bool> {
            kv::parse_bool(kv::require(&map, key, path)?, key, path)
        };
        let u64_field = |key: &str| -> Result<u64> {
            kv::parse_u64(kv::require(&map, key, path)?, key, path)
        };

        Ok(Self {
            name: kv::require(&map, "name", path)?.to_string(),
            blueprint: kv::require(&map, "blueprint", path)?.to_string(),
            working_dir: path_field("working_dir")?,
            install_dir: path_field("install_dir")?,
            saves_dir: path_field("saves_dir")?,
            backups_dir: path_field("backups_dir")?,
            temp_dir: path_field("temp_dir")?,
            logs_dir: path_field("logs_dir")?,
            manage_script: path_field("manage_script")?,
            lifecycle_manager: LifecycleManager::parse(
                kv::require(&map, "lifecycle_manager", path)?,
                path,
            )?,
            runtime: RuntimeMode::parse(kv::require(&map, "runtime", path)?, path)?,
            save_timeout_secs: u64_field("save_timeout_secs")?,
            stop_timeout_secs: u64_field("stop_timeout_secs")?,
            auto_update: bool_field("auto_update")?,
            compress_backups: bool_field("compress_backups")?,
            use_upnp: bool_field("use_upnp")?,
            firewall_managed: bool_field("firewall_managed")?,
            created_at: kv::require(&map, "created_at", path)?.to_string(),
        })
    }
}

/// Creates, looks up, and removes instance records.
pub struct InstanceStore {
    records_dir: PathBuf,
    suffix_length: u8,
}

impl InstanceStore {
    pub fn new(settings: &Settings) -> Self {
        Self {
            records_dir: paths::instances_dir(settings),
            suffix_length: settings.instance_suffix_length,
        }
    }

    pub fn record_path(&self, name: &str) -> PathBuf {
        self.records_dir.join(format!("{}.ini", name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.record_path(name).is_file()
    }

    /// Generate a unique instance name: blueprint name plus a random
    /// numeric suffix, retried until it collides with nothing on disk.
    pub fn generate_id(&self, blueprint_name: &str) -> Result<String> {
        let width = self.suffix_length.max(1) as usize;
        let modulus = 10u128.pow(width.min(38) as u32);

        for _ in 0..128 {
            let suffix = uuid::Uuid::new_v4().as_u128() % modulus;
            let candidate = format!("{}-{:0width$}", blueprint_name, suffix, width = width);
            if !self.exists(&candidate) {
                return Ok(candidate);
            }
        }

        Err(AppError::instance_exists(blueprint_name))
    }

    /// Persist a brand-new record. Fails on duplicate names.
    pub fn create(&self, record: &InstanceRecord) -> Result<()> {
        validate_instance_name(&record.name)?;
        if self.exists(&record.name) {
            return Err(AppError::instance_exists(&record.name));
        }
        self.save(record)
    }

    /// Overwrite an existing record (or write the first copy).
    pub fn save(&self, record: &InstanceRecord) -> Result<()> {
        fs::create_dir_all(&self.records_dir)
            .map_err(|e| AppError::io(format!("failed to create instances dir: {}", e)))?;
        kv::write(&self.record_path(&record.name), &record.to_pairs())
    }

    pub fn find(&self, name: &str) -> Result<InstanceRecord> {
        let path = self.record_path(name);
        if !path.is_file() {
            return Err(AppError::instance_not_found(name));
        }
        InstanceRecord::from_file(&path)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.record_path(name);
        if !path.is_file() {
            return Err(AppError::instance_not_found(name));
        }
        fs::remove_file(&path)
            .map_err(|e| AppError::io(format!("failed to remove {}: {}", path.display(), e)))
    }

    /// Every parseable record, unordered beyond name sort (display only).
    pub fn list(&self) -> Result<Vec<InstanceRecord>> {
        if !self.records_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&self.records_dir)
            .map_err(|e| AppError::io(format!("failed to read instances dir: {}", e)))?
        {
            let entry = entry.map_err(|e| AppError::io(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("ini") {
                continue;
            }
            match InstanceRecord::from_file(&path) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}

/// Instance names become file names and systemd unit fragments; keep the
/// alphabet conservative.
pub fn validate_instance_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(AppError::parse(format!("invalid instance name {:?}", name)))
    }
}
