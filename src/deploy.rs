//! The download/deploy pipeline.
//!
//! `download` only ever writes into the staging directory; `deploy` is the
//! single step allowed to mutate the install directory, and it does so by
//! assembling the complete new tree in a sibling scratch directory and
//! swapping it in. A failure at any point before the swap leaves the
//! previous install untouched. Leftover staging content after a failure is
//! a documented manual-cleanup case, never auto-repaired.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Client;

use crate::blueprint::Blueprint;
use crate::error::{AppError, Result};
use crate::hooks::{HookContext, HookRegistry};
use crate::instance::InstanceRecord;
use crate::settings::Settings;
use crate::steam::SteamCmd;
use crate::version::{self, LatestVersion, VersionResolver};

/// Platform payload directories some release archives wrap their files in.
const LINUX_PAYLOAD_DIRS: &[&str] = &["linux", "linux64", "linux32", "lin64"];
const FOREIGN_PAYLOAD_DIRS: &[&str] = &[
    "windows", "win", "win32", "win64", "mac", "macos", "osx", "darwin",
];

/// Result of an update run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Installed version already matches the latest available.
    UpToDate { version: String },
    /// A new version was downloaded and deployed.
    Updated { version: String },
}

pub struct Pipeline {
    client: Client,
    steam: SteamCmd,
    hooks: Arc<HookRegistry>,
    resolver: VersionResolver,
}

impl Pipeline {
    pub fn new(settings: &Settings, hooks: Arc<HookRegistry>, client: Client) -> Self {
        Self {
            steam: SteamCmd::new(settings),
            resolver: VersionResolver::new(settings, Arc::clone(&hooks), client.clone()),
            hooks,
            client,
        }
    }

    pub fn resolver(&self) -> &VersionResolver {
        &self.resolver
    }

    /// Fetch `version` into `staging_dir`, never touching the install dir.
    ///
    /// The staging directory is recreated empty first, so a previous failed
    /// run cannot leak files into this one.
    pub async fn download(
        &self,
        settings: &Settings,
        blueprint: &Blueprint,
        version: &LatestVersion,
        staging_dir: &Path,
    ) -> Result<()> {
        reset_dir(staging_dir)?;

        if let Some(hooks) = self.hooks.get(&blueprint.name) {
            let ctx = HookContext {
                client: &self.client,
                settings,
            };
            if let Some(result) = hooks.download(&ctx, blueprint, version, staging_dir).await {
                return result;
            }
        }

        Err(AppError::download(format!(
            "blueprint {} has no download source: set steam_app_id or register hooks",
            blueprint.name
        )))
    }

    /// Move staged content into the install directory via copy-and-swap.
    pub async fn deploy(
        &self,
        settings: &Settings,
        blueprint: &Blueprint,
        staging_dir: &Path,
        install_dir: &Path,
    ) -> Result<()> {
        if let Some(hooks) = self.hooks.get(&blueprint.name) {
            let ctx = HookContext {
                client: &self.client,
                settings,
            };
            if let Some(result) = hooks.deploy(&ctx, staging_dir, install_dir).await {
                return result;
            }
        }

        deploy_staged(staging_dir, install_dir)
    }

    /// Resolve, download, and deploy the latest version for an instance.
    /// Callers hold the instance lock for the whole sequence.
    pub async fn update(
        &self,
        settings: &Settings,
        blueprint: &Blueprint,
        record: &InstanceRecord,
    ) -> Result<UpdateOutcome> {
        let layout = record.layout();
        let latest = self.resolver.latest(settings, blueprint).await?;
        let installed = version::installed_version(&layout)?;

        if !latest.needs_update(installed.as_deref()) {
            return Ok(UpdateOutcome::UpToDate {
                version: latest.marker().to_string(),
            });
        }

        log::info!(
            "Updating {}: {} -> {}",
            record.name,
            installed.as_deref().unwrap_or("none"),
            latest
        );

        if blueprint.is_steam_backed() && !self.hooks.is_registered(&blueprint.name) {
            // SteamCMD validates against the install dir directly; download
            // and deploy collapse into one step.
            self.steam
                .app_update(
                    blueprint.steam_app_id.unwrap_or_default(),
                    blueprint.steam_account_required,
                    &record.install_dir,
                )
                .await?;
        } else {
            let staging_dir = layout.staging_dir();
            self.download(settings, blueprint, &latest, &staging_dir)
                .await?;
            normalize_platform_payload(&staging_dir)?;
            self.deploy(settings, blueprint, &staging_dir, &record.install_dir)
                .await?;
            if let Err(e) = fs::remove_dir_all(&staging_dir) {
                log::warn!("Failed to clean staging {}: {}", staging_dir.display(), e);
            }
        }

        ensure_executable(&record.install_dir, blueprint);
        version::save_installed_version(&layout, &latest)?;

        Ok(UpdateOutcome::Updated {
            version: latest.marker().to_string(),
        })
    }
}

fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .map_err(|e| AppError::io(format!("failed to clear {}: {}", dir.display(), e)))?;
    }
    fs::create_dir_all(dir)
        .map_err(|e| AppError::io(format!("failed to create {}: {}", dir.display(), e)))
}

/// Collapse platform payload directories left by multi-platform release
/// archives: the Linux payload is hoisted to the staging root, everything
/// else is discarded.
pub fn normalize_platform_payload(staging_dir: &Path) -> Result<()> {
    let mut linux_dirs: Vec<PathBuf> = Vec::new();
    let mut foreign_dirs: Vec<PathBuf> = Vec::new();

    for entry in fs::read_dir(staging_dir)
        .map_err(|e| AppError::io(format!("failed to read {}: {}", staging_dir.display(), e)))?
    {
        let entry = entry.map_err(|e| AppError::io(e.to_string()))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let lowered = name.to_ascii_lowercase();
        if LINUX_PAYLOAD_DIRS.contains(&lowered.as_str()) {
            linux_dirs.push(path);
        } else if FOREIGN_PAYLOAD_DIRS.contains(&lowered.as_str()) {
            foreign_dirs.push(path);
        }
    }

    for dir in &linux_dirs {
        for entry in fs::read_dir(dir).map_err(|e| AppError::io(e.to_string()))? {
            let entry = entry.map_err(|e| AppError::io(e.to_string()))?;
            let from = entry.path();
            let to = staging_dir.join(entry.file_name());
            if to.exists() {
                return Err(AppError::deploy(format!(
                    "cannot hoist {}: {} already exists in staging",
                    from.display(),
                    to.display()
                )));
            }
            fs::rename(&from, &to).map_err(|e| {
                AppError::deploy(format!("failed to move {}: {}", from.display(), e))
            })?;
        }
    }

    for dir in linux_dirs.iter().chain(foreign_dirs.iter()) {
        fs::remove_dir_all(dir)
            .map_err(|e| AppError::io(format!("failed to remove {}: {}", dir.display(), e)))?;
    }

    Ok(())
}

/// Default deploy: copy the staged tree into a sibling scratch directory,
/// then swap it in. The existing install is only touched once the full new
/// tree exists on the same filesystem.
pub fn deploy_staged(staging_dir: &Path, install_dir: &Path) -> Result<()> {
    if !staging_dir.is_dir() || dir_is_empty(staging_dir)? {
        return Err(AppError::deploy(format!(
            "staging directory {} is empty",
            staging_dir.display()
        )));
    }

    let scratch = sibling_path(install_dir, "new")?;
    let previous = sibling_path(install_dir, "prev")?;

    for leftover in [&scratch, &previous] {
        if leftover.exists() {
            fs::remove_dir_all(leftover).map_err(|e| {
                AppError::deploy(format!("failed to clear {}: {}", leftover.display(), e))
            })?;
        }
    }

    if let Err(e) = copy_tree(staging_dir, &scratch) {
        if let Err(cleanup) = fs::remove_dir_all(&scratch) {
            log::warn!("Failed to clean {}: {}", scratch.display(), cleanup);
        }
        return Err(e);
    }

    let had_install = install_dir.exists();
    if had_install {
        fs::rename(install_dir, &previous).map_err(|e| {
            AppError::deploy(format!(
                "failed to move {} aside: {}",
                install_dir.display(),
                e
            ))
        })?;
    }

    if let Err(e) = fs::rename(&scratch, install_dir) {
        // Put the old install back before surfacing the failure.
        if had_install {
            if let Err(rollback) = fs::rename(&previous, install_dir) {
                log::error!(
                    "Rollback failed, previous install left at {}: {}",
                    previous.display(),
                    rollback
                );
            }
        }
        return Err(AppError::deploy(format!(
            "failed to move new tree into {}: {}",
            install_dir.display(),
            e
        )));
    }

    if had_install {
        if let Err(e) = fs::remove_dir_all(&previous) {
            log::warn!("Failed to remove {}: {}", previous.display(), e);
        }
    }

    Ok(())
}

fn dir_is_empty(dir: &Path) -> Result<bool> {
    Ok(fs::read_dir(dir)
        .map_err(|e| AppError::io(format!("failed to read {}: {}", dir.display(), e)))?
        .next()
        .is_none())
}

fn sibling_path(install_dir: &Path, suffix: &str) -> Result<PathBuf> {
    let name = install_dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::deploy(format!("invalid install dir {}", install_dir.display())))?;
    let parent = install_dir
        .parent()
        .ok_or_else(|| AppError::deploy(format!("install dir {} has no parent", install_dir.display())))?;
    Ok(parent.join(format!("{}.{}", name, suffix)))
}

pub(crate) fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| AppError::io(e.to_string()))?;
        if relative.as_os_str().is_empty() {
            fs::create_dir_all(dest).map_err(|e| AppError::io(e.to_string()))?;
            continue;
        }
        let target = dest.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| AppError::io(format!("failed to create {}: {}", target.display(), e)))?;
        } else if file_type.is_symlink() {
            let link_target = fs::read_link(entry.path())
                .map_err(|e| AppError::io(format!("failed to read link {}: {}", entry.path().display(), e)))?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link_target, &target).map_err(|e| {
                AppError::io(format!("failed to create symlink {}: {}", target.display(), e))
            })?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| {
                AppError::io(format!(
                    "failed to copy {} to {}: {}",
                    entry.path().display(),
                    target.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

/// Make sure the blueprint's executable is runnable after a deploy. A
/// missing executable is logged, not fatal: some games create it in a
/// post-install hook or first launch.
fn ensure_executable(install_dir: &Path, blueprint: &Blueprint) {
    let exe = install_dir.join(blueprint.executable_rel_path());
    if !exe.is_file() {
        log::warn!(
            "Executable {} missing after deploy of {}",
            exe.display(),
            blueprint.name
        );
        return;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        if let Ok(meta) = fs::metadata(&exe) {
            let mode = meta.permissions().mode();
            if mode & 0o111 == 0 {
                if let Err(e) = fs::set_permissions(&exe, fs::Permissions::from_mode(mode | 0o755)) {
                    log::warn!("Failed to chmod {}: {}", exe.display(), e);
                }
            }
        }
    }
}
