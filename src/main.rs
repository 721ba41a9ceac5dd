use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cmd;

#[derive(Parser)]
#[command(name = "gauntlet")]
#[command(version, about = "Multi-team puzzle event coordinator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Progress database path
    #[arg(long, default_value = "gauntlet.db", global = true)]
    pub db_path: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the event server
    Serve {
        /// Port to serve on
        #[arg(short, long, default_value = "4200")]
        port: u16,

        /// Question bank JSON file (built-in bank if omitted)
        #[arg(long)]
        bank: Option<PathBuf>,

        /// Event configuration TOML file (defaults if omitted)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show team progress
    Status {
        /// Show a single team instead of all
        #[arg(short, long)]
        team: Option<u32>,
    },
    /// Delete a team's progress record
    Reset {
        team: u32,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match &cli.command {
        Commands::Serve { port, bank, config } => {
            cmd::cmd_serve(*port, &cli.db_path, bank.as_deref(), config.as_deref()).await?;
        }
        Commands::Status { team } => {
            cmd::cmd_status(&cli.db_path, *team).await?;
        }
        Commands::Reset { team, force } => {
            cmd::cmd_reset(&cli.db_path, *team, *force).await?;
        }
    }

    Ok(())
}
