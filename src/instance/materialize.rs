//! Instance tree creation and management-script rendering.
//!
//! The management script is the on-disk control surface of an instance: a
//! small shell program accepting `--start`, `--stop`, `--save` and
//! `--input <text>`. systemd units (generated elsewhere) and the lifecycle
//! controller both drive the instance through it.

use std::fs;
use std::path::Path;

use crate::blueprint::Blueprint;
use crate::error::{AppError, Result};
use crate::instance::record::InstanceRecord;

const MANAGE_TEMPLATE: &str = r#"#!/usr/bin/env bash
# Management script for instance {instance_name}.
# Generated by gamewarden; regenerated on reinstall, do not edit.

INSTANCE_NAME={instance_name}
INSTALL_DIR={install_dir}
LOGS_DIR={logs_dir}
CONSOLE_PIPE={console_pipe}
PID_FILE={pid_file}
SERVER_EXE={executable}
SERVER_ARGS={arguments}
STOP_COMMAND={stop_command}
SAVE_COMMAND={save_command}
SAVE_TIMEOUT={save_timeout}
STOP_TIMEOUT={stop_timeout}

pid_alive() {
    [ -f "$PID_FILE" ] && kill -0 "$(cat "$PID_FILE")" 2>/dev/null
}

send_line() {
    if [ -p "$CONSOLE_PIPE" ] && pid_alive; then
        printf '%s\n' "$1" > "$CONSOLE_PIPE"
    else
        echo "instance $INSTANCE_NAME is not running" >&2
        return 1
    fi
}

cmd_start() {
    if pid_alive; then
        echo "instance $INSTANCE_NAME is already running" >&2
        return 1
    fi
    cd "$INSTALL_DIR" || return 1
    rm -f "$CONSOLE_PIPE"
    mkfifo "$CONSOLE_PIPE" || return 1
    log_file="$LOGS_DIR/$INSTANCE_NAME-$(date +%Y%m%dT%H%M%S).log"
    # Read-write open keeps the pipe writable while the server is the reader.
    "$SERVER_EXE" $SERVER_ARGS 0<>"$CONSOLE_PIPE" >>"$log_file" 2>&1 &
    echo $! > "$PID_FILE"
}

cmd_save() {
    [ -n "$SAVE_COMMAND" ] && send_line "$SAVE_COMMAND"
}

cmd_stop() {
    if ! pid_alive; then
        rm -f "$PID_FILE" "$CONSOLE_PIPE"
        return 0
    fi
    if [ -n "$SAVE_COMMAND" ]; then
        send_line "$SAVE_COMMAND" && sleep "$SAVE_TIMEOUT"
    fi
    pid="$(cat "$PID_FILE")"
    if [ -n "$STOP_COMMAND" ]; then
        send_line "$STOP_COMMAND"
    else
        kill -TERM "$pid" 2>/dev/null
    fi
    waited=0
    while kill -0 "$pid" 2>/dev/null && [ "$waited" -lt "$STOP_TIMEOUT" ]; do
        sleep 1
        waited=$((waited + 1))
    done
    kill -0 "$pid" 2>/dev/null && kill -KILL "$pid" 2>/dev/null
    rm -f "$PID_FILE" "$CONSOLE_PIPE"
}

case "$1" in
    --start) cmd_start ;;
    --stop) cmd_stop ;;
    --save) cmd_save ;;
    --input) shift; send_line "$*" ;;
    *) echo "usage: $0 --start|--stop|--save|--input <text>" >&2; exit 2 ;;
esac
"#;

/// Single-quote a value for safe interpolation into the shell template.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Substitute `{placeholder}` references in `executable_arguments` with the
/// instance's concrete paths and blueprint fields.
fn substitute_arguments(record: &InstanceRecord, blueprint: &Blueprint) -> String {
    let layout = record.layout();
    let pairs = [
        ("{instance_name}", record.name.clone()),
        ("{working_dir}", record.working_dir.display().to_string()),
        ("{install_dir}", record.install_dir.display().to_string()),
        ("{saves_dir}", record.saves_dir.display().to_string()),
        ("{backups_dir}", record.backups_dir.display().to_string()),
        ("{temp_dir}", record.temp_dir.display().to_string()),
        ("{logs_dir}", record.logs_dir.display().to_string()),
        ("{console_pipe}", layout.console_pipe().display().to_string()),
        ("{level_name}", blueprint.level_name.clone()),
        ("{ports}", blueprint.ports.clone()),
    ];

    let mut args = blueprint.executable_arguments.clone();
    for (placeholder, value) in pairs {
        args = args.replace(placeholder, &value);
    }
    args
}

/// Render the management script text for an instance.
pub fn render_manage_script(record: &InstanceRecord, blueprint: &Blueprint) -> String {
    let layout = record.layout();
    let executable = record.install_dir.join(blueprint.executable_rel_path());

    let substitutions = [
        ("{instance_name}", shell_quote(&record.name)),
        ("{install_dir}", shell_quote(&record.install_dir.display().to_string())),
        ("{logs_dir}", shell_quote(&record.logs_dir.display().to_string())),
        ("{console_pipe}", shell_quote(&layout.console_pipe().display().to_string())),
        ("{pid_file}", shell_quote(&layout.pid_file().display().to_string())),
        ("{executable}", shell_quote(&executable.display().to_string())),
        ("{arguments}", shell_quote(&substitute_arguments(record, blueprint))),
        ("{stop_command}", shell_quote(blueprint.stop_command.as_deref().unwrap_or(""))),
        ("{save_command}", shell_quote(blueprint.save_command.as_deref().unwrap_or(""))),
        ("{save_timeout}", record.save_timeout_secs.to_string()),
        ("{stop_timeout}", record.stop_timeout_secs.to_string()),
    ];

    let mut script = MANAGE_TEMPLATE.to_string();
    for (placeholder, value) in substitutions {
        script = script.replace(placeholder, &value);
    }
    script
}

/// Create the instance directory tree and write its management script.
pub fn materialize(record: &InstanceRecord, blueprint: &Blueprint) -> Result<()> {
    record.layout().materialize()?;
    write_executable(&record.manage_script, &render_manage_script(record, blueprint))
}

fn write_executable(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content)
        .map_err(|e| AppError::io(format!("failed to write {}: {}", path.display(), e)))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .map_err(|e| AppError::io(format!("failed to chmod {}: {}", path.display(), e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{materialize, render_manage_script, substitute_arguments};
    use crate::blueprint::Blueprint;
    use crate::instance::record::tests::sample_record;

    fn sample_blueprint() -> Blueprint {
        Blueprint {
            name: "factorio".to_string(),
            ports: "34197/udp".to_string(),
            steam_app_id: None,
            steam_account_required: false,
            platform: "linux".to_string(),
            level_name: "world".to_string(),
            executable_subdirectory: Some("bin/x64".to_string()),
            executable_file: "factorio".to_string(),
            executable_arguments: "--start-server {saves_dir}/{level_name}.zip".to_string(),
            stop_command: Some("/quit".to_string()),
            save_command: Some("/save".to_string()),
        }
    }

    #[test]
    fn arguments_substitute_instance_paths() {
        let dir = tempfile::TempDir::new().unwrap();
        let record = sample_record("factorio-0001", &dir.path().join("factorio-0001"));
        let args = substitute_arguments(&record, &sample_blueprint());
        assert_eq!(
            args,
            format!("--start-server {}/world.zip", record.saves_dir.display())
        );
    }

    #[test]
    fn script_references_the_executable_inside_install_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let record = sample_record("factorio-0001", &dir.path().join("factorio-0001"));
        let script = render_manage_script(&record, &sample_blueprint());
        assert!(script.contains("bin/x64/factorio"));
        assert!(script.contains("STOP_COMMAND='/quit'"));
        assert!(script.contains("SAVE_TIMEOUT=5"));
        for placeholder in [
            "{instance_name}",
            "{install_dir}",
            "{logs_dir}",
            "{console_pipe}",
            "{pid_file}",
            "{executable}",
            "{arguments}",
            "{stop_command}",
            "{save_command}",
            "{save_timeout}",
            "{stop_timeout}",
        ] {
            assert!(!script.contains(placeholder), "unsubstituted {}", placeholder);
        }
    }

    #[test]
    #[cfg(unix)]
    fn materialize_writes_an_executable_script() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = tempfile::TempDir::new().unwrap();
        let record = sample_record("factorio-0001", &dir.path().join("factorio-0001"));
        materialize(&record, &sample_blueprint()).unwrap();

        let meta = std::fs::metadata(&record.manage_script).unwrap();
        assert_eq!(meta.permissions().mode() & 0o111, 0o111);
        assert!(record.install_dir.is_dir());
    }
}
