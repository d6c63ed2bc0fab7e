//! Taskforge CLI entry point.
//!
//! Commands:
//! - `run`     Drive one task to completion
//! - `tools`   List the registered tools
//! - `config`  Print the effective configuration

use clap::{Parser, Subcommand};
use taskforge_config::{AppConfig, Protocol};

mod commands;

#[derive(Parser)]
#[command(
    name = "taskforge",
    about = "Taskforge: an autonomous task agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task until it is answered or a limit is hit
    Run {
        /// The task, in plain language
        task: String,

        /// Reasoning protocol: react or functions
        #[arg(long)]
        protocol: Option<Protocol>,

        /// Override agent.max_iterations
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Override agent.token_budget
        #[arg(long)]
        token_budget: Option<u64>,

        /// Approve every tool call without asking
        #[arg(long, conflicts_with = "ask")]
        yes: bool,

        /// Ask before every tool call
        #[arg(long)]
        ask: bool,

        /// Do not consult or update run memory
        #[arg(long)]
        no_memory: bool,
    },

    /// List registered tools
    Tools,

    /// Print the effective configuration (API key redacted)
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    match cli.command {
        Commands::Run {
            task,
            protocol,
            max_iterations,
            token_budget,
            yes,
            ask,
            no_memory,
        } => {
            let options = commands::run::RunOptions {
                task,
                protocol,
                max_iterations,
                token_budget,
                yes,
                ask,
                no_memory,
                verbose: cli.verbose,
            };
            commands::run::run(config, options).await?
        }
        Commands::Tools => commands::tools::run(&config)?,
        Commands::Config => commands::config_cmd::run(&config),
    }

    Ok(())
}
