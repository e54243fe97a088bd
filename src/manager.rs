//! Top-level orchestration: wires the blueprint store, instance store,
//! pipeline, lifecycle controller, and backup manager together, and holds
//! the instance lock across every mutating sequence.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::backup::{self, BackupInfo};
use crate::blueprint::{Blueprint, BlueprintStore};
use crate::deploy::{Pipeline, UpdateOutcome};
use crate::error::{AppError, Result};
use crate::hooks::HookRegistry;
use crate::instance::{
    self, InstanceLock, InstanceRecord, InstanceStore, LifecycleManager, RuntimeMode,
};
use crate::lifecycle::LifecycleController;
use crate::paths::{self, InstanceLayout};
use crate::settings::Settings;
use crate::version;

/// Point-in-time view of an instance for display.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub name: String,
    pub blueprint: String,
    pub running: bool,
    pub installed_version: Option<String>,
    pub lifecycle_manager: LifecycleManager,
    pub runtime: RuntimeMode,
    pub install_dir: PathBuf,
    pub created_at: String,
}

pub struct Manager {
    settings: Settings,
    blueprints: BlueprintStore,
    instances: InstanceStore,
    pipeline: Pipeline,
    lifecycle: LifecycleController,
}

impl Manager {
    pub fn new(settings: Settings, hooks: Arc<HookRegistry>) -> Result<Self> {
        paths::ensure_data_dirs(&settings)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            blueprints: BlueprintStore::new(&settings),
            instances: InstanceStore::new(&settings),
            pipeline: Pipeline::new(&settings, hooks, client),
            lifecycle: LifecycleController::new(&settings),
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn blueprints(&self) -> &BlueprintStore {
        &self.blueprints
    }

    pub fn instances(&self) -> &InstanceStore {
        &self.instances
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    fn load(&self, instance: &str) -> Result<(InstanceRecord, Blueprint)> {
        let record = self.instances.find(instance)?;
        // An instance must always reference a resolvable blueprint.
        let blueprint = self.blueprints.resolve(&record.blueprint)?;
        Ok((record, blueprint))
    }

    /// Create an instance from a blueprint and install the latest version.
    ///
    /// The record survives a failed download/deploy so the install can be
    /// retried with `update`.
    pub async fn install(
        &self,
        blueprint_name: &str,
        instance_name: Option<&str>,
        install_root: Option<&Path>,
    ) -> Result<(InstanceRecord, UpdateOutcome)> {
        let blueprint = self.blueprints.resolve(blueprint_name)?;

        let name = match instance_name {
            Some(name) => {
                instance::validate_instance_name(name)?;
                if self.instances.exists(name) {
                    return Err(AppError::instance_exists(name));
                }
                name.to_string()
            }
            None => self.instances.generate_id(&blueprint.name)?,
        };

        let _lock = InstanceLock::acquire(&self.settings, &name)?;

        let root = install_root.unwrap_or(&self.settings.default_install_dir);
        let working_dir = root.join(&name);
        let layout = InstanceLayout::new(&working_dir);

        let record = InstanceRecord {
            name: name.clone(),
            blueprint: blueprint.name.clone(),
            manage_script: layout.manage_script(),
            working_dir: layout.working_dir,
            install_dir: layout.install_dir,
            saves_dir: layout.saves_dir,
            backups_dir: layout.backups_dir,
            temp_dir: layout.temp_dir,
            logs_dir: layout.logs_dir,
            lifecycle_manager: if self.settings.use_systemd {
                LifecycleManager::Systemd
            } else {
                LifecycleManager::Standalone
            },
            runtime: RuntimeMode::Native,
            save_timeout_secs: self.settings.save_timeout_secs,
            stop_timeout_secs: self.settings.stop_timeout_secs,
            auto_update: false,
            compress_backups: self.settings.compress_backups,
            use_upnp: false,
            firewall_managed: self.settings.use_firewall,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        instance::materialize(&record, &blueprint)?;
        self.instances.create(&record)?;
        log::info!("Created instance {} from blueprint {}", name, blueprint.name);

        let outcome = self
            .pipeline
            .update(&self.settings, &blueprint, &record)
            .await?;

        Ok((record, outcome))
    }

    /// Update a stopped instance to the latest available version, taking an
    /// automatic pre-update backup that is dropped again on success.
    pub async fn update(&self, instance: &str) -> Result<UpdateOutcome> {
        let (record, blueprint) = self.load(instance)?;
        if self.lifecycle.is_active(&record)? {
            return Err(AppError::instance_running(instance));
        }

        let _lock = InstanceLock::acquire(&self.settings, instance)?;

        let had_install = version::installed_version(&record.layout())?.is_some();
        let safety_backup = if had_install {
            match backup::create(&record) {
                Ok(path) => Some(path),
                Err(e) => {
                    // A failed backup must not discard an update run.
                    log::warn!("Pre-update backup of {} failed: {}", instance, e);
                    None
                }
            }
        } else {
            None
        };

        let outcome = self
            .pipeline
            .update(&self.settings, &blueprint, &record)
            .await?;

        if let Some(path) = safety_backup {
            if let Err(e) = backup::delete(&path) {
                log::warn!("Failed to delete pre-update backup {}: {}", path.display(), e);
            }
        }

        Ok(outcome)
    }

    /// Remove a stopped instance: directories, generated files, record.
    pub fn uninstall(&self, instance: &str) -> Result<()> {
        let record = self.instances.find(instance)?;
        if self.lifecycle.is_active(&record)? {
            return Err(AppError::instance_running(instance));
        }

        let lock = InstanceLock::acquire(&self.settings, instance)?;

        if record.working_dir.exists() {
            std::fs::remove_dir_all(&record.working_dir).map_err(|e| {
                AppError::io(format!(
                    "failed to remove {}: {}",
                    record.working_dir.display(),
                    e
                ))
            })?;
        }
        self.instances.remove(instance)?;
        log::info!("Uninstalled instance {}", instance);

        let lock_path = lock.path().to_path_buf();
        drop(lock);
        if let Err(e) = std::fs::remove_file(&lock_path) {
            log::warn!("Failed to remove {}: {}", lock_path.display(), e);
        }

        Ok(())
    }

    pub async fn start(&self, instance: &str) -> Result<()> {
        let (record, blueprint) = self.load(instance)?;

        if record.auto_update && !self.lifecycle.is_active(&record)? {
            let _lock = InstanceLock::acquire(&self.settings, instance)?;
            self.pipeline
                .update(&self.settings, &blueprint, &record)
                .await?;
        }

        self.lifecycle.start(&record, &blueprint).await
    }

    pub async fn stop(&self, instance: &str) -> Result<()> {
        let (record, blueprint) = self.load(instance)?;
        self.lifecycle.stop(&record, &blueprint).await
    }

    pub async fn restart(&self, instance: &str) -> Result<()> {
        let (record, blueprint) = self.load(instance)?;
        if self.lifecycle.is_active(&record)? {
            self.lifecycle.stop(&record, &blueprint).await?;
        }
        self.lifecycle.start(&record, &blueprint).await
    }

    pub fn save(&self, instance: &str) -> Result<()> {
        let (record, blueprint) = self.load(instance)?;
        self.lifecycle.save(&record, &blueprint)
    }

    pub fn send_input(&self, instance: &str, text: &str) -> Result<()> {
        let record = self.instances.find(instance)?;
        self.lifecycle.send_input(&record, text)
    }

    pub fn logs(&self, instance: &str, tail: Option<usize>) -> Result<String> {
        let record = self.instances.find(instance)?;
        self.lifecycle.logs(&record, tail)
    }

    pub fn status(&self, instance: &str) -> Result<InstanceStatus> {
        let record = self.instances.find(instance)?;
        self.status_of(&record)
    }

    fn status_of(&self, record: &InstanceRecord) -> Result<InstanceStatus> {
        Ok(InstanceStatus {
            name: record.name.clone(),
            blueprint: record.blueprint.clone(),
            running: self.lifecycle.is_active(record)?,
            installed_version: version::installed_version(&record.layout())?,
            lifecycle_manager: record.lifecycle_manager,
            runtime: record.runtime,
            install_dir: record.install_dir.clone(),
            created_at: record.created_at.clone(),
        })
    }

    pub fn list(&self) -> Result<Vec<InstanceStatus>> {
        self.instances
            .list()?
            .iter()
            .map(|record| self.status_of(record))
            .collect()
    }

    pub fn backup(&self, instance: &str) -> Result<PathBuf> {
        let record = self.instances.find(instance)?;
        if self.lifecycle.is_active(&record)? {
            return Err(AppError::instance_running(instance));
        }
        let _lock = InstanceLock::acquire(&self.settings, instance)?;
        backup::create(&record)
    }

    pub fn restore(&self, instance: &str, backup_name: &str) -> Result<()> {
        let record = self.instances.find(instance)?;
        if self.lifecycle.is_active(&record)? {
            return Err(AppError::instance_running(instance));
        }
        let _lock = InstanceLock::acquire(&self.settings, instance)?;
        let backup_path = backup::resolve(&record, backup_name)?;
        backup::restore(&record, &backup_path)
    }

    pub fn backups(&self, instance: &str) -> Result<Vec<BackupInfo>> {
        let record = self.instances.find(instance)?;
        backup::list(&record)
    }

    /// Latest available version for a blueprint, without touching any
    /// instance.
    pub async fn latest_version(&self, blueprint_name: &str) -> Result<String> {
        let blueprint = self.blueprints.resolve(blueprint_name)?;
        let latest = self
            .pipeline
            .resolver()
            .latest(&self.settings, &blueprint)
            .await?;
        Ok(latest.marker().to_string())
    }
}
