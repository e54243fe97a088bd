//! gamewarden: install, update, and run dedicated game servers on Linux.
//!
//! A [`Blueprint`] describes how to obtain and launch one game server type;
//! an instance is a concrete deployment of a blueprint with its own
//! directory tree, management script, and installed-version marker. The
//! [`Manager`] is the top-level entry point wiring blueprint resolution,
//! version resolution, the download/deploy pipeline, lifecycle control,
//! and backups together.

pub mod archive;
pub mod backup;
pub mod blueprint;
pub mod control;
pub mod deploy;
pub mod download;
pub mod error;
pub mod hooks;
pub mod instance;
pub mod kv;
pub mod lifecycle;
pub mod manager;
pub mod paths;
pub mod process;
pub mod settings;
pub mod steam;
pub mod version;

pub use blueprint::{Blueprint, BlueprintStore};
pub use deploy::{Pipeline, UpdateOutcome};
pub use error::{AppError, ErrorKind, Result};
pub use hooks::{GameHooks, HookContext, HookRegistry};
pub use instance::{InstanceLock, InstanceRecord, InstanceStore, LifecycleManager, RuntimeMode};
pub use lifecycle::{LifecycleController, LifecycleEvent};
pub use manager::{InstanceStatus, Manager};
pub use settings::Settings;
pub use version::LatestVersion;
