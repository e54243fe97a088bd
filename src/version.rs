//! Version resolution and the installed-version marker.
//!
//! Versions are opaque strings compared only for equality; there is no
//! ordering, and a "downgrade" is indistinguishable from any other update.
//! Blueprints with no reliable version scheme resolve to the unversioned
//! sentinel, which always reads as "update available".

use std::fmt;
use std::fs;
use std::sync::Arc;

use crate::blueprint::Blueprint;
use crate::error::{AppError, Result};
use crate::hooks::{HookContext, HookRegistry};
use crate::paths::InstanceLayout;
use crate::settings::Settings;
use crate::steam::SteamCmd;

/// Marker value persisted for blueprints with no version scheme.
pub const UNVERSIONED: &str = "unversioned";

/// Latest available version of a blueprint's server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatestVersion {
    Resolved(String),
    /// No reliable version scheme; every update run re-fetches.
    Unversioned,
}

impl LatestVersion {
    /// Equality-only update check (never an ordering comparison).
    pub fn needs_update(&self, installed: Option<&str>) -> bool {
        match self {
            Self::Unversioned => true,
            Self::Resolved(latest) => installed != Some(latest.as_str()),
        }
    }

    /// Value written to the installed-version marker after a deploy.
    pub fn marker(&self) -> &str {
        match self {
            Self::Resolved(v) => v,
            Self::Unversioned => UNVERSIONED,
        }
    }
}

impl fmt::Display for LatestVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Resolves the latest available version for a blueprint.
pub struct VersionResolver {
    steam: SteamCmd,
    hooks: Arc<HookRegistry>,
    client: reqwest::Client,
}

impl VersionResolver {
    pub fn new(settings: &Settings, hooks: Arc<HookRegistry>, client: reqwest::Client) -> Self {
        Self {
            steam: SteamCmd::new(settings),
            hooks,
            client,
        }
    }

    /// Latest available version: a registered hook wins, then the Steam
    /// public branch, then the unversioned sentinel.
    pub async fn latest(&self, settings: &Settings, blueprint: &Blueprint) -> Result<LatestVersion> {
        if let Some(hooks) = self.hooks.get(&blueprint.name) {
            let ctx = HookContext {
                client: &self.client,
                settings,
            };
            if let Some(result) = hooks.latest_version(&ctx, blueprint).await {
                return result.map(LatestVersion::Resolved);
            }
        }

        if let Some(app_id) = blueprint.steam_app_id {
            let build_id = self
                .steam
                .latest_build_id(app_id, blueprint.steam_account_required)
                .await?;
            return Ok(LatestVersion::Resolved(build_id));
        }

        Ok(LatestVersion::Unversioned)
    }
}

/// Read the installed-version marker. Absent marker means never deployed.
pub fn installed_version(layout: &InstanceLayout) -> Result<Option<String>> {
    let path = layout.version_file();
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .map_err(|e| AppError::io(format!("failed to read {}: {}", path.display(), e)))?;
    let version = content.trim().to_string();
    if version.is_empty() {
        Ok(None)
    } else {
        Ok(Some(version))
    }
}

/// Persist the installed-version marker after a successful deploy.
pub fn save_installed_version(layout: &InstanceLayout, version: &LatestVersion) -> Result<()> {
    let path = layout.version_file();
    fs::write(&path, format!("{}\n", version.marker()))
        .map_err(|e| AppError::io(format!("failed to write {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::{installed_version, save_installed_version, LatestVersion, UNVERSIONED};
    use crate::paths::InstanceLayout;

    #[test]
    fn needs_update_is_string_inequality() {
        let latest = LatestVersion::Resolved("100".to_string());
        assert!(latest.needs_update(None));
        assert!(latest.needs_update(Some("99")));
        assert!(!latest.needs_update(Some("100")));
    }

    #[test]
    fn unversioned_always_needs_update() {
        let latest = LatestVersion::Unversioned;
        assert!(latest.needs_update(None));
        assert!(latest.needs_update(Some(UNVERSIONED)));
    }

    #[test]
    fn marker_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let layout = InstanceLayout::new(dir.path());
        layout.materialize().unwrap();

        assert_eq!(installed_version(&layout).unwrap(), None);

        save_installed_version(&layout, &LatestVersion::Resolved("4242".to_string())).unwrap();
        assert_eq!(installed_version(&layout).unwrap().as_deref(), Some("4242"));

        save_installed_version(&layout, &LatestVersion::Unversioned).unwrap();
        assert_eq!(
            installed_version(&layout).unwrap().as_deref(),
            Some(UNVERSIONED)
        );
    }
}
