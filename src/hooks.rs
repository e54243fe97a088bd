//! Per-blueprint override hooks.
//!
//! Some games need bespoke logic at one or more pipeline steps: a release
//! API that is not Steam, an installer archive with an unusual layout, a
//! first-run save bootstrap after deploy. Each blueprint family can register
//! a [`GameHooks`] implementation; every method returns `None` by default,
//! which tells the pipeline to run its built-in behavior for that step, so
//! "which hook exists" is explicit at the call site.
//!
//! Registering hooks for a Steam-backed blueprint replaces the SteamCMD
//! path entirely: such hooks must implement `download`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::blueprint::Blueprint;
use crate::error::Result;
use crate::settings::Settings;
use crate::version::LatestVersion;

/// Shared services passed into every hook invocation.
pub struct HookContext<'a> {
    pub client: &'a reqwest::Client,
    pub settings: &'a Settings,
}

/// Optional per-step overrides for one blueprint family.
#[async_trait]
pub trait GameHooks: Send + Sync {
    /// Resolve the latest available version. `None` defers to the default
    /// resolver (Steam branch lookup, or the unversioned sentinel).
    async fn latest_version(
        &self,
        _ctx: &HookContext<'_>,
        _blueprint: &Blueprint,
    ) -> Option<Result<String>> {
        None
    }

    /// Fetch `version` into `staging_dir`. Must never touch the install
    /// directory. `None` defers to the default download.
    async fn download(
        &self,
        _ctx: &HookContext<'_>,
        _blueprint: &Blueprint,
        _version: &LatestVersion,
        _staging_dir: &Path,
    ) -> Option<Result<()>> {
        None
    }

    /// Move staged content into `install_dir`. `None` defers to the default
    /// copy-and-swap deploy.
    async fn deploy(
        &self,
        _ctx: &HookContext<'_>,
        _staging_dir: &Path,
        _install_dir: &Path,
    ) -> Option<Result<()>> {
        None
    }
}

/// Registry of hook implementations keyed by blueprint name.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn GameHooks>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, blueprint_name: &str, hooks: Arc<dyn GameHooks>) {
        if self
            .hooks
            .insert(blueprint_name.to_string(), hooks)
            .is_some()
        {
            log::warn!("Replacing hooks registered for blueprint {}", blueprint_name);
        }
    }

    pub fn get(&self, blueprint_name: &str) -> Option<Arc<dyn GameHooks>> {
        self.hooks.get(blueprint_name).map(Arc::clone)
    }

    pub fn is_registered(&self, blueprint_name: &str) -> bool {
        self.hooks.contains_key(blueprint_name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{GameHooks, HookContext, HookRegistry};
    use crate::blueprint::Blueprint;
    use crate::error::Result;

    struct PinnedVersion;

    #[async_trait]
    impl GameHooks for PinnedVersion {
        async fn latest_version(
            &self,
            _ctx: &HookContext<'_>,
            _blueprint: &Blueprint,
        ) -> Option<Result<String>> {
            Some(Ok("1.2.3".to_string()))
        }
    }

    #[test]
    fn registry_lookup_is_by_blueprint_name() {
        let mut registry = HookRegistry::new();
        registry.register("factorio", Arc::new(PinnedVersion));

        assert!(registry.is_registered("factorio"));
        assert!(!registry.is_registered("rust"));
        assert!(registry.get("factorio").is_some());
        assert!(registry.get("rust").is_none());
    }
}
