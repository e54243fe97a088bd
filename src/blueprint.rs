//! Blueprint definitions and name resolution.
//!
//! A blueprint is the immutable description of one game server type. It is
//! authored as a flat `key=value` file and resolved by name across two
//! search paths: the custom directory shadows the default one.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::kv;
use crate::paths;
use crate::settings::Settings;

pub const BLUEPRINT_EXTENSION: &str = "bp";

const KNOWN_KEYS: &[&str] = &[
    "name",
    "ports",
    "steam_app_id",
    "is_steam_account_required",
    "platform",
    "level_name",
    "executable_subdirectory",
    "executable_file",
    "executable_arguments",
    "stop_command",
    "save_command",
];

/// Immutable definition of a game server type. Read-only at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blueprint {
    pub name: String,
    /// Raw port specification, e.g. `27015/udp 27016/tcp`. Consumed by
    /// external firewall tooling, never interpreted here.
    pub ports: String,
    pub steam_app_id: Option<u32>,
    pub steam_account_required: bool,
    pub platform: String,
    pub level_name: String,
    pub executable_subdirectory: Option<String>,
    pub executable_file: String,
    pub executable_arguments: String,
    pub stop_command: Option<String>,
    pub save_command: Option<String>,
}

impl Blueprint {
    pub fn load(path: &Path) -> Result<Self> {
        let map = kv::load(path)?;

        for key in map.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                return Err(AppError::parse(format!(
                    "{}: unknown blueprint key {:?}",
                    path.display(),
                    key
                )));
            }
        }

        let name = kv::require(&map, "name", path)?.to_string();
        if name.is_empty() {
            return Err(AppError::parse(format!("{}: empty name", path.display())));
        }
        let executable_file = kv::require(&map, "executable_file", path)?.to_string();
        if executable_file.is_empty() {
            return Err(AppError::parse(format!(
                "{}: empty executable_file",
                path.display()
            )));
        }

        let steam_app_id = match map.get("steam_app_id").map(String::as_str) {
            None | Some("") | Some("0") => None,
            Some(raw) => Some(kv::parse_u64(raw, "steam_app_id", path)? as u32),
        };

        let steam_account_required = match map.get("is_steam_account_required") {
            Some(raw) => kv::parse_bool(raw, "is_steam_account_required", path)?,
            None => false,
        };

        let optional = |key: &str| -> Option<String> {
            map.get(key).filter(|v| !v.is_empty()).cloned()
        };

        Ok(Self {
            name,
            ports: map.get("ports").cloned().unwrap_or_default(),
            steam_app_id,
            steam_account_required,
            platform: map
                .get("platform")
                .cloned()
                .unwrap_or_else(|| "linux".to_string()),
            level_name: map.get("level_name").cloned().unwrap_or_default(),
            executable_subdirectory: optional("executable_subdirectory"),
            executable_file,
            executable_arguments: map.get("executable_arguments").cloned().unwrap_or_default(),
            stop_command: optional("stop_command"),
            save_command: optional("save_command"),
        })
    }

    /// Executable path relative to the install directory.
    pub fn executable_rel_path(&self) -> PathBuf {
        match &self.executable_subdirectory {
            Some(sub) => Path::new(sub).join(&self.executable_file),
            None => PathBuf::from(&self.executable_file),
        }
    }

    /// Whether installs are driven through SteamCMD.
    pub fn is_steam_backed(&self) -> bool {
        self.steam_app_id.is_some()
    }
}

/// Locates blueprints by name or explicit path.
pub struct BlueprintStore {
    default_dir: PathBuf,
    custom_dir: PathBuf,
}

impl BlueprintStore {
    pub fn new(settings: &Settings) -> Self {
        Self {
            default_dir: paths::default_blueprints_dir(settings),
            custom_dir: paths::custom_blueprints_dir(settings),
        }
    }

    /// Resolve a blueprint by name or path. An argument naming an existing
    /// file is loaded directly; otherwise `<custom>/<name>.bp` is tried
    /// before `<default>/<name>.bp`.
    pub fn resolve(&self, name_or_path: &str) -> Result<Blueprint> {
        let as_path = Path::new(name_or_path);
        if as_path.is_file() {
            return Blueprint::load(as_path);
        }

        let file_name = format!("{}.{}", name_or_path, BLUEPRINT_EXTENSION);
        for dir in [&self.custom_dir, &self.default_dir] {
            let candidate = dir.join(&file_name);
            if candidate.is_file() {
                return Blueprint::load(&candidate);
            }
        }

        Err(AppError::blueprint_not_found(name_or_path))
    }

    /// Path a named blueprint resolves to, if any. Custom shadows default.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        let file_name = format!("{}.{}", name, BLUEPRINT_EXTENSION);
        [&self.custom_dir, &self.default_dir]
            .into_iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
    }

    /// All available blueprint names, shadowing applied, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for dir in [&self.custom_dir, &self.default_dir] {
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(dir)
                .map_err(|e| AppError::io(format!("failed to read {}: {}", dir.display(), e)))?
            {
                let entry = entry.map_err(|e| AppError::io(e.to_string()))?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(BLUEPRINT_EXTENSION) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if !names.contains(&stem.to_string()) {
                        names.push(stem.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{Blueprint, BlueprintStore};
    use crate::settings::Settings;

    const FACTORIO_BP: &str = "\
# Factorio headless server
name=factorio
ports=34197/udp
platform=linux
level_name=world
executable_subdirectory=bin/x64
executable_file=factorio
executable_arguments=--start-server {saves_dir}/world.zip
stop_command=/quit
save_command=/save
";

    fn settings_in(dir: &std::path::Path) -> Settings {
        Settings {
            data_dir: dir.to_path_buf(),
            ..Settings::default()
        }
    }

    #[test]
    fn parses_typed_fields() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("factorio.bp");
        fs::write(&path, FACTORIO_BP).unwrap();

        let bp = Blueprint::load(&path).unwrap();
        assert_eq!(bp.name, "factorio");
        assert_eq!(bp.steam_app_id, None);
        assert!(!bp.is_steam_backed());
        assert_eq!(bp.stop_command.as_deref(), Some("/quit"));
        assert_eq!(
            bp.executable_rel_path(),
            std::path::Path::new("bin/x64/factorio")
        );
    }

    #[test]
    fn steam_app_id_zero_means_custom() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("x.bp");
        fs::write(&path, "name=x\nexecutable_file=run.sh\nsteam_app_id=0\n").unwrap();
        assert!(!Blueprint::load(&path).unwrap().is_steam_backed());

        fs::write(&path, "name=x\nexecutable_file=run.sh\nsteam_app_id=258550\n").unwrap();
        let bp = Blueprint::load(&path).unwrap();
        assert_eq!(bp.steam_app_id, Some(258550));
    }

    #[test]
    fn missing_required_key_fails_fast() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.bp");
        fs::write(&path, "name=broken\n").unwrap();
        let err = Blueprint::load(&path).unwrap_err();
        assert!(err.to_string().contains("executable_file"));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.bp");
        fs::write(&path, "name=broken\nexecutable_file=x\ncolour=red\n").unwrap();
        assert!(Blueprint::load(&path).is_err());
    }

    #[test]
    fn custom_dir_shadows_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = settings_in(dir.path());
        crate::paths::ensure_data_dirs(&settings).unwrap();
        let store = BlueprintStore::new(&settings);

        let default_path = crate::paths::default_blueprints_dir(&settings).join("factorio.bp");
        fs::write(&default_path, FACTORIO_BP).unwrap();
        assert_eq!(store.resolve("factorio").unwrap().level_name, "world");

        let custom_path = crate::paths::custom_blueprints_dir(&settings).join("factorio.bp");
        fs::write(&custom_path, FACTORIO_BP.replace("level_name=world", "level_name=mine")).unwrap();
        assert_eq!(store.resolve("factorio").unwrap().level_name, "mine");
        assert_eq!(store.locate("factorio").unwrap(), custom_path);

        assert_eq!(store.list().unwrap(), vec!["factorio".to_string()]);
    }

    #[test]
    fn unresolvable_name_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = settings_in(dir.path());
        crate::paths::ensure_data_dirs(&settings).unwrap();
        let store = BlueprintStore::new(&settings);
        let err = store.resolve("nope").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BlueprintNotFound);
    }
}
