//! docflow CLI and REST API entry point.
//!
//! Binary name: `docflow`
//!
//! Parses CLI arguments, initializes the database and services, then
//! dispatches to the appropriate command handler or long-running process.

mod cli;
mod drivers;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use docflow_infra::config::default_data_dir;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    docflow_observe::init_tracing(cli::log_directives(cli.verbose, cli.quiet), cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    docflow_observe::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Commands that need no application state
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(*shell, &mut cmd, "docflow", &mut std::io::stdout());
            return Ok(());
        }
        Commands::MockServices {
            ocr_port,
            ner_port,
            host,
        } => {
            return cli::process::mock_services(host, *ocr_port, *ner_port).await;
        }
        _ => {}
    }

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let state = AppState::init(data_dir).await?;

    match cli.command {
        Commands::Serve { port, host } => {
            cli::process::serve(state, &host, port).await?;
        }
        Commands::Worker { queues } => {
            cli::process::worker(state, queues).await?;
        }
        Commands::Submit { file, wait } => {
            cli::run::submit(&state, &file, wait, cli.json).await?;
        }
        Commands::Status { run_id } => {
            cli::run::status(&state, run_id, cli.json).await?;
        }
        Commands::Tasks { run_id } => {
            cli::run::tasks(&state, run_id, cli.json).await?;
        }
        Commands::Recover => {
            cli::run::recover(&state, cli.json).await?;
        }
        Commands::Completions { .. } | Commands::MockServices { .. } => {
            unreachable!("handled above")
        }
    }

    Ok(())
}
