//! `taskforge run <task>`: drive one task to completion.

use std::sync::Arc;
use taskforge_agent::{LoopRuntime, RunOutcome, build_agent};
use taskforge_config::{AppConfig, ConfirmationMode, Protocol};
use taskforge_memory::InMemoryRetriever;
use taskforge_providers::{BackendClient, RateWindow};
use taskforge_security::{ConfirmationGate, StdinPrompt};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct RunOptions {
    pub task: String,
    pub protocol: Option<Protocol>,
    pub max_iterations: Option<u32>,
    pub token_budget: Option<u64>,
    pub yes: bool,
    pub ask: bool,
    pub no_memory: bool,
    pub verbose: bool,
}

/// Fold command-line flags into the loaded config.
fn apply_overrides(config: &mut AppConfig, options: &RunOptions) {
    if let Some(protocol) = options.protocol {
        config.agent.protocol = protocol;
    }
    if let Some(max) = options.max_iterations {
        config.agent.max_iterations = max;
    }
    if let Some(budget) = options.token_budget {
        config.agent.token_budget = budget;
    }
    if options.yes {
        config.confirmation.mode = ConfirmationMode::AlwaysYes;
    } else if options.ask {
        config.confirmation.mode = ConfirmationMode::AlwaysAsk;
    }
}

pub async fn run(mut config: AppConfig, options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    apply_overrides(&mut config, &options);
    config.validate()?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set TASKFORGE_API_KEY or OPENAI_API_KEY, or add api_key to");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the run");
            on_interrupt.cancel();
        }
    });

    let rate_window = Arc::new(RateWindow::from_config(&config.rate_limit));
    let client = BackendClient::from_config(&config, rate_window)?.with_cancellation(cancel.clone());
    let registry = taskforge_tools::default_registry(&config)?;

    let prompt = Arc::new(StdinPrompt::stdio().with_cancellation(cancel));
    let gate = ConfirmationGate::from_config(&config.confirmation, prompt).with_workspace_root(config.sandbox.root());

    let mut runtime = LoopRuntime::new(Arc::new(client), Arc::new(registry), Arc::new(gate)).configured(&config);
    if !options.no_memory {
        runtime = runtime.with_memory(Arc::new(InMemoryRetriever::new()));
    }

    let agent = build_agent(config.agent.protocol, runtime);
    let outcome = agent.run(&options.task).await;
    report(&outcome, options.verbose);
    Ok(())
}

fn report(outcome: &RunOutcome, verbose: bool) {
    println!("{}", outcome.answer);
    if verbose {
        eprintln!();
        eprintln!("  Stop reason: {}", outcome.stop_reason);
        eprintln!("  Iterations:  {}", outcome.iterations);
        eprintln!("  Tokens used: {}", outcome.tokens_used);
        if !outcome.actions.is_empty() {
            eprintln!("  Actions:     {}", outcome.actions.join(" -> "));
        }
    }
}
