//! Headless CLI for the switchyard runtime.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "switchyard", version, about = "Multi-agent orchestration runtime")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, env = "SWITCHYARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway.
    Serve {
        /// Override the bind address from the config file.
        #[arg(long)]
        bind: Option<String>,
        /// Override the ledger database path.
        #[arg(long)]
        database: Option<String>,
    },
    /// Run pending ledger migrations and exit.
    Migrate,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match switchyard::config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return std::process::ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Serve { bind, database } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(database) = database {
                config.server.database_path = database;
            }
            if let Err(e) = switchyard::gateway::serve(config).await {
                tracing::error!(error = %e, "gateway exited");
                return std::process::ExitCode::FAILURE;
            }
            std::process::ExitCode::SUCCESS
        }
        Command::Migrate => {
            let path = std::path::Path::new(&config.server.database_path);
            match switchyard::database::init(path) {
                Ok(_) => {
                    tracing::info!(path = %path.display(), "ledger migrated");
                    std::process::ExitCode::SUCCESS
                }
                Err(e) => {
                    tracing::error!(error = %e, "migration failed");
                    std::process::ExitCode::FAILURE
                }
            }
        }
    }
}
