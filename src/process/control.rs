//! Signal-based process control.
//!
//! Process state is always re-derived from the OS; nothing here caches
//! liveness. Instances run in their own process group so escalation can
//! take down helper processes spawned by the management script too.

use std::time::{Duration, Instant};

use crate::error::{AppError, Result};

/// Check if a process is alive by PID.
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Ask a process to exit with SIGTERM.
pub fn terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| AppError::process(format!("failed to send SIGTERM to PID {}: {}", pid, e)))
}

/// SIGKILL a process, preferring its whole process group.
pub fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    let target = Pid::from_raw(pid as i32);
    match getpgid(Some(target)) {
        Ok(pgid) => killpg(pgid, Signal::SIGKILL).map_err(|e| {
            AppError::process(format!(
                "failed to kill process group {} (from pid {}): {}",
                pgid.as_raw(),
                pid,
                e
            ))
        }),
        Err(e) => kill(target, Signal::SIGKILL).map_err(|kill_err| {
            AppError::process(format!(
                "failed to kill process {} (getpgid failed: {}): {}",
                pid, e, kill_err
            ))
        }),
    }
}

/// Send SIGTERM, wait up to `timeout` for exit, then SIGKILL whatever is
/// left. Blocking.
pub fn graceful_shutdown(pid: u32, timeout: Duration) {
    if !is_process_alive(pid) {
        return;
    }

    if let Err(e) = terminate(pid) {
        log::warn!("Graceful signal failed for PID {}: {}, force killing", pid, e);
        if let Err(e) = force_kill(pid) {
            log::error!("Failed to force kill PID {}: {}", pid, e);
        }
        return;
    }

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return;
        }
        std::thread::sleep(Duration::from_millis(250));
    }

    log::warn!(
        "PID {} did not exit within {}s, force killing",
        pid,
        timeout.as_secs()
    );
    if let Err(e) = force_kill(pid) {
        log::error!("Failed to force kill PID {}: {}", pid, e);
    }
}
