//! codenav CLI entry point

use clap::{Parser, Subcommand};
use codenav::{
    commands::{
        cmd_add, cmd_cancel, cmd_health, cmd_init, cmd_list_repositories, cmd_list_tasks,
        cmd_queue, cmd_remove, cmd_run_scheduler, cmd_run_task, cmd_status, cmd_submit,
        print_deletion, print_health, print_queue, print_repositories, print_task_detail,
        print_tasks,
    },
    config::Config,
    console,
    error::Result,
    Orchestrator,
};
use std::path::PathBuf;
use tracing::error;

#[derive(Parser)]
#[command(name = "codenav")]
#[command(version, about = "Repository analysis orchestrator", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Import a repository directory and register it
    Add {
        /// Path to the source tree
        path: PathBuf,

        /// Display name (defaults to the directory name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List registered repositories
    Repos,

    /// Create an analysis task for a repository
    Submit {
        /// Repository id (see 'codenav repos')
        repository_id: i64,
    },

    /// Run the scheduler until interrupted
    Run,

    /// Drive a single task to completion in the foreground
    RunTask {
        /// Task id
        task_id: i64,
    },

    /// Show task detail with derived progress
    Status {
        /// Task id
        task_id: i64,
    },

    /// List tasks
    Tasks {
        /// Only tasks for this repository
        #[arg(long)]
        repository: Option<i64>,
    },

    /// Show the admission queue
    Queue,

    /// Request cancellation of a pending or running task
    Cancel {
        /// Task id
        task_id: i64,
    },

    /// Delete a repository and everything it owns
    Remove {
        /// Repository id
        repository_id: i64,

        /// Keep rows, only mark the repository deleted
        #[arg(long)]
        soft: bool,
    },

    /// Report worker liveness and queue depth
    Health,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    console::init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Init works without an existing config.
    if matches!(cli.command, Commands::Init { .. }) {
        return handle_init(cli).await;
    }

    let config = load_config(cli.config)?;
    let service = Orchestrator::new(config).await?;

    match cli.command {
        Commands::Init { .. } => unreachable!(),

        Commands::Add { path, name } => {
            let repository = cmd_add(&service, &path, name).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&repository)?);
            } else {
                println!(
                    "✓ Registered repository {} as '{}' ({})",
                    repository.id, repository.name, repository.full_name
                );
            }
        }

        Commands::Repos => {
            let repositories = cmd_list_repositories(&service).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&repositories)?);
            } else {
                print_repositories(&repositories);
            }
        }

        Commands::Submit { repository_id } => {
            let task = cmd_submit(&service, repository_id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                println!("✓ Task {} submitted (status: {})", task.id, task.status);
            }
        }

        Commands::Run => {
            cmd_run_scheduler(&service).await?;
        }

        Commands::RunTask { task_id } => {
            let task = cmd_run_task(&service, task_id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                println!("✓ Task {} finished: {}", task.id, task.status);
                if let Some(error) = task.error_message {
                    println!("  Error: {}", error);
                }
            }
        }

        Commands::Status { task_id } => {
            let detail = cmd_status(&service, task_id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                print_task_detail(&detail);
            }
        }

        Commands::Tasks { repository } => {
            let tasks = cmd_list_tasks(&service, repository).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                print_tasks(&tasks);
            }
        }

        Commands::Queue => {
            let snapshot = cmd_queue(&service).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_queue(&snapshot);
            }
        }

        Commands::Cancel { task_id } => {
            let flagged = cmd_cancel(&service, task_id).await?;
            if flagged {
                println!("✓ Cancellation requested for task {}", task_id);
            } else {
                println!("Task {} is already terminal", task_id);
            }
        }

        Commands::Remove {
            repository_id,
            soft,
        } => {
            let report = cmd_remove(&service, repository_id, soft).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_deletion(&report, repository_id);
            }
        }

        Commands::Health => {
            let report = cmd_health(&service).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_health(&report);
            }
        }
    }

    Ok(())
}

async fn handle_init(cli: Cli) -> Result<()> {
    let Commands::Init { force } = cli.command else {
        unreachable!()
    };

    let base_dir = cli.config.and_then(|p| {
        if p.extension().is_some() {
            p.parent().map(PathBuf::from)
        } else {
            Some(p)
        }
    });

    let config = cmd_init(base_dir, force).await?;
    println!("✓ codenav initialized");
    println!("  Config: {}", config.internal.config_file.display());
    println!("  Database: {}", config.database_path().display());
    println!("\nNext steps:");
    println!("  1. Edit the config file to point at your services");
    println!("  2. Import a repository: codenav add /path/to/repo");
    println!("  3. Submit and run: codenav submit 1 && codenav run");
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) if path.extension().is_some() => Config::load(&path),
        Some(dir) => Config::load_from(Some(dir)),
        None => Config::load_from(None),
    }
}
