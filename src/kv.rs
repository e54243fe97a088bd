//! Flat `key=value` file codec.
//!
//! Blueprints and instance records are stored as line-oriented `key=value`
//! text; lines starting with `#` are comments. Values are written verbatim
//! (no quoting), so keys and values must not contain newlines.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{AppError, Result};

/// Parsed document: insertion order is irrelevant, duplicate keys rejected.
pub type KvMap = BTreeMap<String, String>;

pub fn parse(content: &str, source: &Path) -> Result<KvMap> {
    let mut map = KvMap::new();

    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(AppError::parse(format!(
                "{}:{}: expected key=value, got {:?}",
                source.display(),
                lineno + 1,
                line
            )));
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(AppError::parse(format!(
                "{}:{}: empty key",
                source.display(),
                lineno + 1
            )));
        }

        if map.insert(key.to_string(), value.trim().to_string()).is_some() {
            return Err(AppError::parse(format!(
                "{}:{}: duplicate key {:?}",
                source.display(),
                lineno + 1,
                key
            )));
        }
    }

    Ok(map)
}

pub fn load(path: &Path) -> Result<KvMap> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("failed to read {}: {}", path.display(), e)))?;
    parse(&content, path)
}

pub fn write(path: &Path, pairs: &[(&str, String)]) -> Result<()> {
    let mut out = String::new();
    for (key, value) in pairs {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    fs::write(path, out)
        .map_err(|e| AppError::io(format!("failed to write {}: {}", path.display(), e)))
}

/// Fetch a required key, failing with the source path in the message.
pub fn require<'a>(map: &'a KvMap, key: &str, source: &Path) -> Result<&'a str> {
    map.get(key).map(String::as_str).ok_or_else(|| {
        AppError::parse(format!("{}: missing required key {:?}", source.display(), key))
    })
}

pub fn parse_bool(raw: &str, key: &str, source: &Path) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(AppError::parse(format!(
            "{}: key {:?} is not a boolean: {:?}",
            source.display(),
            key,
            raw
        ))),
    }
}

pub fn parse_u64(raw: &str, key: &str, source: &Path) -> Result<u64> {
    raw.parse::<u64>().map_err(|_| {
        AppError::parse(format!(
            "{}: key {:?} is not a number: {:?}",
            source.display(),
            key,
            raw
        ))
    })
}
