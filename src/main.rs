use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use muster::config::MusterConfig;
use muster::logging::{self, LogFormat};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "muster")]
#[command(version, about = "Converge groups of nodes to a declared topology")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Configuration file (default: <project>/.muster/muster.toml)
    #[arg(long, global = true, env = "MUSTER_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show what a converge would change, without changing anything
    Plan,
    /// Create and remove nodes to match the declared counts, then run phases
    Converge {
        /// Phase to run after bootstrap (repeatable; default: group defaults)
        #[arg(short, long = "phase")]
        phases: Vec<String>,
        /// Stop waiting after this many seconds (0 waits forever)
        #[arg(long)]
        timeout: Option<u64>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run phases on existing nodes without changing counts
    Lift {
        /// Group name or glob pattern (repeatable; default: all groups)
        #[arg(short, long = "group")]
        groups: Vec<String>,
        #[arg(short, long = "phase")]
        phases: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// List the nodes in the inventory
    Nodes {
        #[arg(long)]
        json: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    Show,
    Validate,
    Init,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    if let Commands::Config { command } = &cli.command {
        cmd::cmd_config(&project_dir, cli.config.as_deref(), command.clone())?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = MusterConfig::load(&project_dir, cli.config.as_deref())?;

    match &cli.command {
        Commands::Plan => cmd::cmd_plan(&config).await,
        Commands::Converge {
            phases,
            timeout,
            json,
        } => cmd::cmd_converge(&config, phases, *timeout, *json).await,
        Commands::Lift {
            groups,
            phases,
            json,
        } => cmd::cmd_lift(&config, groups, phases, *json).await,
        Commands::Nodes { json } => cmd::cmd_nodes(&config, *json).await,
        Commands::Config { .. } => Ok(ExitCode::SUCCESS),
    }
}
