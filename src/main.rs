use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use gamewarden::{HookRegistry, Manager, Settings, UpdateOutcome};

#[derive(Parser)]
#[command(name = "gamewarden")]
#[command(about = "Install, update, and run dedicated game servers on Linux", long_about = None)]
struct Cli {
    /// Path to a config file (default: <data_dir>/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an instance from a blueprint and install the latest version
    Install {
        /// Blueprint name or path to a blueprint file
        blueprint: String,
        /// Instance name (default: generated from the blueprint name)
        #[arg(long)]
        name: Option<String>,
        /// Directory the instance tree is created under
        #[arg(long)]
        install_dir: Option<PathBuf>,
    },
    /// Update an instance to the latest available version
    Update { instance: String },
    /// Stop tracking an instance and delete its directories
    Uninstall { instance: String },
    /// Start an instance
    Start { instance: String },
    /// Stop an instance (saves first)
    Stop { instance: String },
    /// Restart an instance
    Restart { instance: String },
    /// Show instance status
    Status {
        instance: String,
        #[arg(long)]
        json: bool,
    },
    /// Send the blueprint's save command to a running instance
    Save { instance: String },
    /// Send arbitrary console input to a running instance
    Input {
        instance: String,
        #[arg(trailing_var_arg = true, required = true)]
        text: Vec<String>,
    },
    /// Print the newest log file of an instance
    Logs {
        instance: String,
        /// Only the last N lines
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Snapshot an instance's install directory
    Backup { instance: String },
    /// Restore a snapshot onto an instance's install directory
    Restore { instance: String, backup: String },
    /// List snapshots of an instance
    Backups { instance: String },
    /// List all instances
    List {
        #[arg(long)]
        json: bool,
    },
    /// List available blueprints
    Blueprints,
    /// Query the latest available version for a blueprint
    Version { blueprint: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.log_level.clone()),
    )
    .init();

    if let Err(e) = run(cli.command, settings).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands, settings: Settings) -> gamewarden::Result<()> {
    let manager = Manager::new(settings, Arc::new(HookRegistry::new()))?;

    match command {
        Commands::Install {
            blueprint,
            name,
            install_dir,
        } => {
            let (record, outcome) = manager
                .install(&blueprint, name.as_deref(), install_dir.as_deref())
                .await?;
            print_outcome(&record.name, &outcome);
        }
        Commands::Update { instance } => {
            let outcome = manager.update(&instance).await?;
            print_outcome(&instance, &outcome);
        }
        Commands::Uninstall { instance } => {
            manager.uninstall(&instance)?;
            println!("{} uninstalled", instance);
        }
        Commands::Start { instance } => {
            manager.start(&instance).await?;
            println!("{} started", instance);
        }
        Commands::Stop { instance } => {
            manager.stop(&instance).await?;
            println!("{} stopped", instance);
        }
        Commands::Restart { instance } => {
            manager.restart(&instance).await?;
            println!("{} restarted", instance);
        }
        Commands::Status { instance, json } => {
            let status = manager.status(&instance)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!(
                    "{}: {} (blueprint {}, version {}, {})",
                    status.name,
                    if status.running { "running" } else { "stopped" },
                    status.blueprint,
                    status.installed_version.as_deref().unwrap_or("none"),
                    status.lifecycle_manager.as_str(),
                );
            }
        }
        Commands::Save { instance } => {
            manager.save(&instance)?;
            println!("save command sent to {}", instance);
        }
        Commands::Input { instance, text } => {
            manager.send_input(&instance, &text.join(" "))?;
        }
        Commands::Logs { instance, tail } => {
            print!("{}", manager.logs(&instance, tail)?);
        }
        Commands::Backup { instance } => {
            let path = manager.backup(&instance)?;
            println!("{}", path.display());
        }
        Commands::Restore { instance, backup } => {
            manager.restore(&instance, &backup)?;
            println!("{} restored from {}", instance, backup);
        }
        Commands::Backups { instance } => {
            for info in manager.backups(&instance)? {
                println!("{}\t{}", info.name, info.metadata.created_at);
            }
        }
        Commands::List { json } => {
            let statuses = manager.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                for status in statuses {
                    println!(
                        "{}\t{}\t{}\t{}",
                        status.name,
                        status.blueprint,
                        if status.running { "running" } else { "stopped" },
                        status.installed_version.as_deref().unwrap_or("none"),
                    );
                }
            }
        }
        Commands::Blueprints => {
            for name in manager.blueprints().list()? {
                println!("{}", name);
            }
        }
        Commands::Version { blueprint } => {
            println!("{}", manager.latest_version(&blueprint).await?);
        }
    }

    Ok(())
}

fn print_outcome(instance: &str, outcome: &UpdateOutcome) {
    match outcome {
        UpdateOutcome::UpToDate { version } => {
            println!("{} is up to date (version {})", instance, version);
        }
        UpdateOutcome::Updated { version } => {
            println!("{} updated to version {}", instance, version);
        }
    }
}
