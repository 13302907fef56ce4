use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "relay")]
#[command(version, about = "Bounded, phase-gated delivery orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to the config file. Defaults to .relay/relay.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the .relay/ directory structure
    Init,
    /// Run a single phase or the whole workflow
    Run {
        /// Phase name, or "all" for the remaining workflow
        target: String,
    },
    /// Show the fixed phase table
    List,
    /// Show ledger-backed workflow status
    Status,
    /// Reset a phase (and everything after it) to pending
    Reset {
        phase: String,
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => {
            cmd::cmd_init(&project_dir)?;
        }
        Commands::Run { target } => {
            if let Err(e) = cmd::cmd_run(&cli, project_dir, target).await {
                std::process::exit(e.exit_code());
            }
        }
        Commands::List => cmd::cmd_list()?,
        Commands::Status => cmd::cmd_status(&project_dir)?,
        Commands::Reset { phase, force } => {
            if let Err(e) = cmd::cmd_reset(&project_dir, phase, *force, cli.config.clone()) {
                eprintln!("Reset failed: {e}");
                std::process::exit(e.exit_code());
            }
        }
    }

    Ok(())
}
