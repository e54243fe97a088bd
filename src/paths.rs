//! Centralized path layout for the data directory and per-instance trees.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::settings::Settings;

/// Directory of per-instance record files.
pub fn instances_dir(settings: &Settings) -> PathBuf {
    settings.data_dir.join("instances")
}

/// Directory of advisory lock files.
pub fn locks_dir(settings: &Settings) -> PathBuf {
    settings.data_dir.join("locks")
}

/// Default (shipped) blueprint search path.
pub fn default_blueprints_dir(settings: &Settings) -> PathBuf {
    settings.data_dir.join("blueprints").join("default")
}

/// Custom blueprint search path; entries here shadow same-named defaults.
pub fn custom_blueprints_dir(settings: &Settings) -> PathBuf {
    settings.data_dir.join("blueprints").join("custom")
}

/// Ensure all required data directories exist.
pub fn ensure_data_dirs(settings: &Settings) -> Result<()> {
    let dirs = [
        settings.data_dir.clone(),
        instances_dir(settings),
        locks_dir(settings),
        default_blueprints_dir(settings),
        custom_blueprints_dir(settings),
    ];
    for dir in &dirs {
        fs::create_dir_all(dir)
            .map_err(|e| AppError::io(format!("failed to create {}: {}", dir.display(), e)))?;
    }
    Ok(())
}

/// On-disk layout of a single instance, rooted at its working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceLayout {
    pub working_dir: PathBuf,
    pub install_dir: PathBuf,
    pub saves_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl InstanceLayout {
    pub fn new(working_dir: &Path) -> Self {
        Self {
            working_dir: working_dir.to_path_buf(),
            install_dir: working_dir.join("install"),
            saves_dir: working_dir.join("saves"),
            backups_dir: working_dir.join("backups"),
            temp_dir: working_dir.join("temp"),
            logs_dir: working_dir.join("logs"),
        }
    }

    /// Path of the generated management script.
    pub fn manage_script(&self) -> PathBuf {
        self.working_dir.join("manage.sh")
    }

    /// Installed-version marker file.
    pub fn version_file(&self) -> PathBuf {
        self.working_dir.join(".version")
    }

    /// Console FIFO used as the instance control channel.
    pub fn console_pipe(&self) -> PathBuf {
        self.working_dir.join(".console")
    }

    /// Pid file written by the management script on `--start`.
    pub fn pid_file(&self) -> PathBuf {
        self.working_dir.join(".pid")
    }

    /// Scratch directory a new version is staged into before deploy.
    pub fn staging_dir(&self) -> PathBuf {
        self.temp_dir.join("staging")
    }

    /// Create every directory of the layout.
    pub fn materialize(&self) -> Result<()> {
        for dir in [
            &self.working_dir,
            &self.install_dir,
            &self.saves_dir,
            &self.backups_dir,
            &self.temp_dir,
            &self.logs_dir,
        ] {
            fs::create_dir_all(dir)
                .map_err(|e| AppError::io(format!("failed to create {}: {}", dir.display(), e)))?;
        }
        Ok(())
    }
}
