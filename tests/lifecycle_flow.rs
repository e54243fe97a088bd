//! Lifecycle control against a real (fake) server process: the generated
//! management script launches a shell loop that reads the console pipe,
//! which is exactly how a console-driven game server behaves.

#![cfg(unix)]

use std::fs;
use std::time::{Duration, Instant};

use gamewarden::blueprint::Blueprint;
use gamewarden::instance::{self, InstanceRecord, LifecycleManager, RuntimeMode};
use gamewarden::lifecycle::LifecycleController;
use gamewarden::paths::InstanceLayout;
use gamewarden::Settings;

/// Stand-in server: consumes console lines, exits on `quit`.
const FAKE_SERVER: &str = "\
#!/bin/sh
while read -r line; do
    echo \"got: $line\"
    [ \"$line\" = quit ] && exit 0
done
";

fn fake_blueprint() -> Blueprint {
    Blueprint {
        name: "fakegame".to_string(),
        ports: String::new(),
        steam_app_id: None,
        steam_account_required: false,
        platform: "linux".to_string(),
        level_name: String::new(),
        executable_subdirectory: None,
        executable_file: "server.sh".to_string(),
        executable_arguments: String::new(),
        stop_command: Some("quit".to_string()),
        save_command: Some("save".to_string()),
    }
}

fn fake_record(working_dir: &std::path::Path) -> InstanceRecord {
    let layout = InstanceLayout::new(working_dir);
    InstanceRecord {
        name: "fakegame-0001".to_string(),
        blueprint: "fakegame".to_string(),
        manage_script: layout.manage_script(),
        working_dir: layout.working_dir,
        install_dir: layout.install_dir,
        saves_dir: layout.saves_dir,
        backups_dir: layout.backups_dir,
        temp_dir: layout.temp_dir,
        logs_dir: layout.logs_dir,
        lifecycle_manager: LifecycleManager::Standalone,
        runtime: RuntimeMode::Native,
        save_timeout_secs: 1,
        stop_timeout_secs: 10,
        auto_update: false,
        compress_backups: true,
        use_upnp: false,
        firewall_managed: false,
        created_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

fn deploy_fake_server(record: &InstanceRecord, blueprint: &Blueprint) {
    use std::os::unix::fs::PermissionsExt as _;

    instance::materialize(record, blueprint).unwrap();
    let exe = record.install_dir.join("server.sh");
    fs::write(&exe, FAKE_SERVER).unwrap();
    fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
}

#[tokio::test]
async fn start_stop_cycle_with_console_protocol() {
    let dir = tempfile::TempDir::new().unwrap();
    let record = fake_record(&dir.path().join("fakegame-0001"));
    let blueprint = fake_blueprint();
    deploy_fake_server(&record, &blueprint);

    let controller = LifecycleController::new(&Settings::default());

    controller.start(&record, &blueprint).await.unwrap();
    assert!(controller.is_active(&record).unwrap());

    // Double start is rejected while running.
    let err = controller.start(&record, &blueprint).await.unwrap_err();
    assert_eq!(err.kind(), gamewarden::ErrorKind::InstanceRunning);

    // Fire-and-forget input reaches the console.
    controller.send_input(&record, "hello world").unwrap();
    controller.save(&record, &blueprint).unwrap();

    // Stop performs save, waits the save timeout, then sends the stop
    // command.
    let stop_started = Instant::now();
    controller.stop(&record, &blueprint).await.unwrap();
    assert!(stop_started.elapsed() >= Duration::from_secs(record.save_timeout_secs));

    // No process leakage: inactive immediately after stop returns.
    assert!(!controller.is_active(&record).unwrap());

    // Console writes now fail fast with a not-running error.
    let err = controller.send_input(&record, "anyone there").unwrap_err();
    assert_eq!(err.kind(), gamewarden::ErrorKind::InstanceNotRunning);

    // Server output landed in the newest log file.
    let logs = controller.logs(&record, None).unwrap();
    assert!(logs.contains("got: hello world"), "logs were: {}", logs);
}

#[tokio::test]
async fn stop_when_not_running_fails_fast() {
    let dir = tempfile::TempDir::new().unwrap();
    let record = fake_record(&dir.path().join("fakegame-0001"));
    let blueprint = fake_blueprint();
    deploy_fake_server(&record, &blueprint);

    let controller = LifecycleController::new(&Settings::default());
    let err = controller.stop(&record, &blueprint).await.unwrap_err();
    assert_eq!(err.kind(), gamewarden::ErrorKind::InstanceNotRunning);
}

#[tokio::test]
async fn restartable_after_stop() {
    let dir = tempfile::TempDir::new().unwrap();
    let record = fake_record(&dir.path().join("fakegame-0001"));
    let blueprint = fake_blueprint();
    deploy_fake_server(&record, &blueprint);

    let controller = LifecycleController::new(&Settings::default());

    controller.start(&record, &blueprint).await.unwrap();
    controller.stop(&record, &blueprint).await.unwrap();
    controller.start(&record, &blueprint).await.unwrap();
    assert!(controller.is_active(&record).unwrap());
    controller.stop(&record, &blueprint).await.unwrap();
    assert!(!controller.is_active(&record).unwrap());
}
