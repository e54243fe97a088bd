//! Crate-wide error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Error carrying a failure kind plus the operation/target details
/// needed to report exactly what failed.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Blueprint file not found in any search path
    BlueprintNotFound,
    /// Instance record not found
    InstanceNotFound,
    /// Instance name already taken
    InstanceExists,
    /// Instance is currently running
    InstanceRunning,
    /// Instance is not running (no control channel)
    InstanceNotRunning,
    /// Installed-version marker or requested version missing
    VersionNotFound,
    /// Network fetch or query did not complete
    Network,
    /// Expected structured data absent from a file or response
    Parse,
    /// File system operation failed
    Io,
    /// Required setting unset or malformed
    Config,
    /// Child process spawn/signal failure
    Process,
    /// SteamCMD invocation failure
    Steam,
    /// Fetch into the staging directory failed
    Download,
    /// Staged content could not be moved into the install directory
    Deploy,
    /// Backup creation or restore failure
    Backup,
    /// Another operation holds the instance lock
    Locked,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::BlueprintNotFound => 1001,
            Self::InstanceNotFound => 1002,
            Self::InstanceExists => 1003,
            Self::InstanceRunning => 1004,
            Self::InstanceNotRunning => 1005,
            Self::VersionNotFound => 1006,
            Self::Network => 2001,
            Self::Parse => 2002,
            Self::Io => 2003,
            Self::Config => 2004,
            Self::Process => 3001,
            Self::Steam => 3002,
            Self::Download => 3003,
            Self::Deploy => 3004,
            Self::Backup => 4001,
            Self::Locked => 4002,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn blueprint_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::BlueprintNotFound,
            HashMap::from([("blueprint".to_string(), name.to_string())]),
        )
    }

    pub fn instance_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::InstanceNotFound,
            HashMap::from([("instance".to_string(), name.to_string())]),
        )
    }

    pub fn instance_exists(name: &str) -> Self {
        Self::new(
            ErrorKind::InstanceExists,
            HashMap::from([("instance".to_string(), name.to_string())]),
        )
    }

    pub fn instance_running(name: &str) -> Self {
        Self::new(
            ErrorKind::InstanceRunning,
            HashMap::from([("instance".to_string(), name.to_string())]),
        )
    }

    pub fn instance_not_running(name: &str) -> Self {
        Self::new(
            ErrorKind::InstanceNotRunning,
            HashMap::from([("instance".to_string(), name.to_string())]),
        )
    }

    pub fn version_not_found(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::VersionNotFound, detail)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn network_with_url(url: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Network,
            HashMap::from([
                ("url".to_string(), url.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Parse, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Process, message)
    }

    pub fn steam(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Steam, message)
    }

    pub fn download(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Download, message)
    }

    pub fn deploy(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Deploy, message)
    }

    pub fn backup(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Backup, message)
    }

    pub fn locked(instance: &str) -> Self {
        Self::new(
            ErrorKind::Locked,
            HashMap::from([("instance".to_string(), instance.to_string())]),
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::io(err.to_string())
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
