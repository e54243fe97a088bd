//! Instance lifecycle control (start/stop/save/input/status/logs).
//!
//! The manager never tracks process state of its own: `is_active` always
//! re-derives it from the OS (pid probe or service manager), because the
//! supervising mechanism is external. The only states are running and
//! stopped; there is no starting/stopping bookkeeping.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::blueprint::Blueprint;
use crate::control::ControlChannel;
use crate::error::{AppError, ErrorKind, Result};
use crate::instance::{InstanceRecord, LifecycleManager, RuntimeMode};
use crate::process::{graceful_shutdown, is_process_alive, terminate};
use crate::settings::Settings;

/// How long `start` waits for the pid file to appear and the process to
/// come up before declaring the launch failed.
const STARTUP_WAIT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum LifecycleEvent {
    Started { instance: String },
    Stopped { instance: String },
    SaveRequested { instance: String },
}

pub struct LifecycleController {
    events: Option<broadcast::Sender<LifecycleEvent>>,
}

impl LifecycleController {
    pub fn new(settings: &Settings) -> Self {
        let events = settings.broadcast_events.then(|| broadcast::channel(128).0);
        Self { events }
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<LifecycleEvent>> {
        self.events.as_ref().map(broadcast::Sender::subscribe)
    }

    fn emit(&self, event: LifecycleEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }

    /// Start an instance. Fails if it is already active or its management
    /// script is missing; with systemd management, delegates to the unit.
    pub async fn start(&self, record: &InstanceRecord, _blueprint: &Blueprint) -> Result<()> {
        if record.runtime == RuntimeMode::Container {
            return Err(AppError::config(format!(
                "instance {} uses the container runtime, which this build does not support",
                record.name
            )));
        }

        if self.is_active(record)? {
            return Err(AppError::instance_running(&record.name));
        }

        if !record.manage_script.is_file() {
            return Err(AppError::new(
                ErrorKind::InstanceNotFound,
                std::collections::HashMap::from([
                    ("instance".to_string(), record.name.clone()),
                    (
                        "manage_script".to_string(),
                        record.manage_script.display().to_string(),
                    ),
                ]),
            ));
        }

        match record.lifecycle_manager {
            LifecycleManager::Systemd => {
                systemctl(&["start", &unit_name(record)])?;
            }
            LifecycleManager::Standalone => {
                self.start_standalone(record).await?;
            }
        }

        log::info!("Instance {} started", record.name);
        self.emit(LifecycleEvent::Started {
            instance: record.name.clone(),
        });
        Ok(())
    }

    async fn start_standalone(&self, record: &InstanceRecord) -> Result<()> {
        let layout = record.layout();
        // A stale pid file would make the new launch look alive before the
        // script rewrites it.
        if layout.pid_file().exists() {
            if let Err(e) = fs::remove_file(layout.pid_file()) {
                log::warn!("Failed to remove stale pid file: {}", e);
            }
        }

        let mut cmd = tokio::process::Command::new(&record.manage_script);
        cmd.arg("--start").current_dir(&record.working_dir);
        cmd.process_group(0);

        let status = cmd
            .status()
            .await
            .map_err(|e| {
                AppError::process(format!(
                    "failed to run {}: {}",
                    record.manage_script.display(),
                    e
                ))
            })?;

        if !status.success() {
            return Err(AppError::process(format!(
                "{} --start exited with {}",
                record.manage_script.display(),
                status
            )));
        }

        // The script backgrounds the server and writes the pid file; wait a
        // bounded delay for the process to materialize.
        let deadline = tokio::time::Instant::now() + STARTUP_WAIT;
        loop {
            if let Some(pid) = read_pid(&layout.pid_file()) {
                if is_process_alive(pid) {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::process(format!(
                    "instance {} did not come up within {}s",
                    record.name,
                    STARTUP_WAIT.as_secs()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Stop an instance: save first (best effort, bounded by the save
    /// timeout), then the stop command, then signal escalation.
    pub async fn stop(&self, record: &InstanceRecord, blueprint: &Blueprint) -> Result<()> {
        if !self.is_active(record)? {
            return Err(AppError::instance_not_running(&record.name));
        }

        let layout = record.layout();
        let channel = ControlChannel::new(&record.name, &layout);

        // Save-before-stop ordering is unconditional; failure to save never
        // aborts the stop.
        if let Some(save_command) = &blueprint.save_command {
            match channel.send_line(save_command) {
                Ok(()) => {
                    tokio::time::sleep(Duration::from_secs(record.save_timeout_secs)).await;
                }
                Err(e) => log::warn!("Save before stop failed for {}: {}", record.name, e),
            }
        }

        match record.lifecycle_manager {
            LifecycleManager::Systemd => {
                systemctl(&["stop", &unit_name(record)])?;
            }
            LifecycleManager::Standalone => {
                self.stop_standalone(record, blueprint, &channel).await?;
            }
        }

        log::info!("Instance {} stopped", record.name);
        self.emit(LifecycleEvent::Stopped {
            instance: record.name.clone(),
        });
        Ok(())
    }

    async fn stop_standalone(
        &self,
        record: &InstanceRecord,
        blueprint: &Blueprint,
        channel: &ControlChannel,
    ) -> Result<()> {
        let layout = record.layout();
        let Some(pid) = read_pid(&layout.pid_file()) else {
            return Err(AppError::instance_not_running(&record.name));
        };

        match &blueprint.stop_command {
            Some(stop_command) => {
                if let Err(e) = channel.send_line(stop_command) {
                    log::warn!(
                        "Stop command failed for {}, falling back to SIGTERM: {}",
                        record.name,
                        e
                    );
                    terminate(pid)?;
                }
            }
            None => terminate(pid)?,
        }

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(record.stop_timeout_secs.max(1));
        while tokio::time::Instant::now() < deadline {
            if !is_process_alive(pid) {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        if is_process_alive(pid) {
            let grace = Duration::from_secs(5);
            tokio::task::spawn_blocking(move || graceful_shutdown(pid, grace))
                .await
                .map_err(|e| AppError::process(format!("shutdown task failed: {}", e)))?;
        }

        for stale in [layout.pid_file(), layout.console_pipe()] {
            if stale.exists() {
                if let Err(e) = fs::remove_file(&stale) {
                    log::warn!("Failed to remove {}: {}", stale.display(), e);
                }
            }
        }

        Ok(())
    }

    /// Send the blueprint's save command to the running instance.
    pub fn save(&self, record: &InstanceRecord, blueprint: &Blueprint) -> Result<()> {
        let Some(save_command) = &blueprint.save_command else {
            log::warn!(
                "Blueprint {} defines no save_command, nothing to send",
                blueprint.name
            );
            return Ok(());
        };

        let channel = ControlChannel::new(&record.name, &record.layout());
        channel.send_line(save_command)?;
        self.emit(LifecycleEvent::SaveRequested {
            instance: record.name.clone(),
        });
        Ok(())
    }

    /// Write caller-supplied text to the instance console. Success means
    /// the line reached the channel, not that the server acted on it.
    pub fn send_input(&self, record: &InstanceRecord, text: &str) -> Result<()> {
        ControlChannel::new(&record.name, &record.layout()).send_line(text)
    }

    /// Re-derive whether the instance is running from the OS.
    pub fn is_active(&self, record: &InstanceRecord) -> Result<bool> {
        match record.lifecycle_manager {
            LifecycleManager::Systemd => {
                Ok(systemctl_query(&["is-active", "--quiet", &unit_name(record)]))
            }
            LifecycleManager::Standalone => {
                Ok(read_pid(&record.layout().pid_file())
                    .map(is_process_alive)
                    .unwrap_or(false))
            }
        }
    }

    /// Content of the newest log file, optionally limited to the last
    /// `tail` lines.
    pub fn logs(&self, record: &InstanceRecord, tail: Option<usize>) -> Result<String> {
        let logs_dir = &record.logs_dir;
        let mut newest: Option<(std::time::SystemTime, std::path::PathBuf)> = None;

        if logs_dir.is_dir() {
            for entry in fs::read_dir(logs_dir)
                .map_err(|e| AppError::io(format!("failed to read {}: {}", logs_dir.display(), e)))?
            {
                let entry = entry.map_err(|e| AppError::io(e.to_string()))?;
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let modified = entry
                    .metadata()
                    .and_then(|meta| meta.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                if newest.as_ref().map(|(ts, _)| modified > *ts).unwrap_or(true) {
                    newest = Some((modified, path));
                }
            }
        }

        let Some((_, path)) = newest else {
            return Err(AppError::io(format!(
                "no log files in {}",
                logs_dir.display()
            )));
        };

        let content = fs::read_to_string(&path)
            .map_err(|e| AppError::io(format!("failed to read {}: {}", path.display(), e)))?;

        Ok(match tail {
            Some(count) => {
                let lines: Vec<&str> = content.lines().collect();
                let start = lines.len().saturating_sub(count);
                lines[start..].join("\n")
            }
            None => content,
        })
    }
}

fn unit_name(record: &InstanceRecord) -> String {
    format!("gamewarden-{}.service", record.name)
}

fn read_pid(pid_file: &Path) -> Option<u32> {
    let content = fs::read_to_string(pid_file).ok()?;
    content.trim().parse::<u32>().ok()
}

fn systemctl(args: &[&str]) -> Result<()> {
    let output = std::process::Command::new("systemctl")
        .args(args)
        .output()
        .map_err(|e| AppError::process(format!("failed to run systemctl: {}", e)))?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(AppError::process(format!(
            "systemctl {} failed: {}",
            args.join(" "),
            stderr.trim()
        )))
    }
}

fn systemctl_query(args: &[&str]) -> bool {
    std::process::Command::new("systemctl")
        .args(args)
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::LifecycleController;
    use crate::instance::sample_record;
    use crate::settings::Settings;

    fn controller() -> LifecycleController {
        LifecycleController::new(&Settings::default())
    }

    #[tokio::test]
    async fn start_without_manage_script_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let record = sample_record("factorio-0001", &dir.path().join("factorio-0001"));
        record.layout().materialize().unwrap();

        let blueprint = crate::blueprint::Blueprint {
            name: "factorio".to_string(),
            ports: String::new(),
            steam_app_id: None,
            steam_account_required: false,
            platform: "linux".to_string(),
            level_name: String::new(),
            executable_subdirectory: None,
            executable_file: "factorio".to_string(),
            executable_arguments: String::new(),
            stop_command: None,
            save_command: None,
        };

        let controller = controller();
        let err = controller.start(&record, &blueprint).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InstanceNotFound);
        assert!(!controller.is_active(&record).unwrap());
    }

    #[test]
    fn is_active_is_false_without_pid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let record = sample_record("factorio-0001", &dir.path().join("w"));
        assert!(!controller().is_active(&record).unwrap());
    }

    #[test]
    fn is_active_is_false_for_stale_pid() {
        let dir = tempfile::TempDir::new().unwrap();
        let record = sample_record("factorio-0001", &dir.path().join("w"));
        record.layout().materialize().unwrap();
        std::fs::write(record.layout().pid_file(), "3999999\n").unwrap();
        assert!(!controller().is_active(&record).unwrap());
    }

    #[test]
    fn events_are_broadcast_when_enabled() {
        let settings = Settings {
            broadcast_events: true,
            ..Settings::default()
        };
        let controller = LifecycleController::new(&settings);
        let mut rx = controller.subscribe().unwrap();
        controller.emit(super::LifecycleEvent::Started {
            instance: "x".to_string(),
        });
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, super::LifecycleEvent::Started { .. }));
    }
}
