//! Process-wide settings, loaded once at startup.
//!
//! `config.toml` under the data directory seeds the values; environment
//! variables of the same names (prefixed `GAMEWARDEN_`) override individual
//! fields. The resulting struct is passed by reference into every component
//! constructor; nothing reads ambient configuration after startup.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const ENV_PREFIX: &str = "GAMEWARDEN_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root data directory (instances, blueprints, locks).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Where new instances are installed unless `--install-dir` is given.
    #[serde(default = "default_install_root")]
    pub default_install_dir: PathBuf,
    /// Manage instances through systemd units instead of standalone scripts.
    #[serde(default)]
    pub use_systemd: bool,
    /// Record instances as firewall-managed (rule generation is external).
    #[serde(default)]
    pub use_firewall: bool,
    /// Path to the steamcmd executable.
    #[serde(default = "default_steamcmd")]
    pub steamcmd_exe: String,
    #[serde(default)]
    pub steam_username: String,
    #[serde(default)]
    pub steam_password: String,
    /// Digits in generated instance name suffixes.
    #[serde(default = "default_suffix_length")]
    pub instance_suffix_length: u8,
    #[serde(default = "default_true")]
    pub compress_backups: bool,
    #[serde(default = "default_save_timeout")]
    pub save_timeout_secs: u64,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
    /// Publish lifecycle events on the in-process broadcast channel.
    #[serde(default)]
    pub broadcast_events: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gamewarden")
}

fn default_install_root() -> PathBuf {
    default_data_dir().join("servers")
}

fn default_steamcmd() -> String {
    "steamcmd".to_string()
}

fn default_suffix_length() -> u8 {
    4
}

fn default_true() -> bool {
    true
}

fn default_save_timeout() -> u64 {
    5
}

fn default_stop_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_install_dir: default_install_root(),
            use_systemd: false,
            use_firewall: false,
            steamcmd_exe: default_steamcmd(),
            steam_username: String::new(),
            steam_password: String::new(),
            instance_suffix_length: default_suffix_length(),
            compress_backups: true,
            save_timeout_secs: default_save_timeout(),
            stop_timeout_secs: default_stop_timeout(),
            broadcast_events: false,
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings from the given config file (or the default location),
    /// then apply `GAMEWARDEN_*` environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(p) => p.to_path_buf(),
            None => default_data_dir().join("config.toml"),
        };

        let mut settings = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| AppError::config(format!("failed to read {}: {}", path.display(), e)))?;
            toml::from_str(&content)
                .map_err(|e| AppError::config(format!("failed to parse {}: {}", path.display(), e)))?
        } else {
            Self::default()
        };

        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Write the current settings back to `config.toml` under the data dir.
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .map_err(|e| AppError::io(format!("failed to create data dir: {}", e)))?;
        let content = toml::to_string_pretty(self)?;
        fs::write(self.data_dir.join("config.toml"), content)
            .map_err(|e| AppError::config(e.to_string()))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_var("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("DEFAULT_INSTALL_DIR") {
            self.default_install_dir = PathBuf::from(v);
        }
        if let Some(v) = env_bool("USE_SYSTEMD") {
            self.use_systemd = v;
        }
        if let Some(v) = env_bool("USE_FIREWALL") {
            self.use_firewall = v;
        }
        if let Some(v) = env_var("STEAMCMD_EXE") {
            self.steamcmd_exe = v;
        }
        if let Some(v) = env_var("STEAM_USERNAME") {
            self.steam_username = v;
        }
        if let Some(v) = env_var("STEAM_PASSWORD") {
            self.steam_password = v;
        }
        if let Some(v) = env_var("INSTANCE_SUFFIX_LENGTH") {
            match v.parse::<u8>() {
                Ok(n) if n > 0 => self.instance_suffix_length = n,
                _ => log::warn!("Ignoring invalid {}INSTANCE_SUFFIX_LENGTH: {}", ENV_PREFIX, v),
            }
        }
        if let Some(v) = env_bool("COMPRESS_BACKUPS") {
            self.compress_backups = v;
        }
        if let Some(v) = env_secs("SAVE_TIMEOUT_SECS") {
            self.save_timeout_secs = v;
        }
        if let Some(v) = env_secs("STOP_TIMEOUT_SECS") {
            self.stop_timeout_secs = v;
        }
        if let Some(v) = env_bool("BROADCAST_EVENTS") {
            self.broadcast_events = v;
        }
        if let Some(v) = env_var("LOG_LEVEL") {
            self.log_level = v;
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, name)).ok()
}

fn env_bool(name: &str) -> Option<bool> {
    let raw = env_var(name)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            log::warn!("Ignoring invalid boolean {}{}: {}", ENV_PREFIX, name, raw);
            None
        }
    }
}

fn env_secs(name: &str) -> Option<u64> {
    let raw = env_var(name)?;
    match raw.parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Ignoring invalid duration {}{}: {}", ENV_PREFIX, name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Settings;

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = Settings::load(Some(&dir.path().join("nope.toml"))).unwrap();
        assert!(settings.compress_backups);
        assert_eq!(settings.instance_suffix_length, 4);
        assert!(!settings.use_systemd);
    }

    #[test]
    fn load_partial_file_fills_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "use_systemd = true\nsave_timeout_secs = 9\n").unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert!(settings.use_systemd);
        assert_eq!(settings.save_timeout_secs, 9);
        assert_eq!(settings.stop_timeout_secs, 30);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "use_systemd = \"definitely\"\n").unwrap();
        let err = Settings::load(Some(&path)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
