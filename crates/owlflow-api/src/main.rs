//! owlflow CLI entry point.
//!
//! Binary name: `owlflow`
//!
//! Parses CLI arguments, initializes tracing and (for `run`) the engine, then
//! dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;

use cli::workflow::Output;
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "info,owlflow_core=debug,owlflow_infra=debug",
        _ => "trace",
    };
    owlflow_observe::tracing_setup::init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let out = Output {
        json: cli.json,
        quiet: cli.quiet,
    };

    let result = match cli.command {
        Commands::Run {
            file,
            input,
            trigger,
            user,
            watch,
        } => {
            let state = AppState::init(cli.config.as_deref()).await?;
            cli::workflow::handle_run(&state, &file, input.as_deref(), &trigger, &user, watch, out)
                .await
        }
        Commands::Validate { file } => cli::workflow::handle_validate(&file, out).map(|()| true),
        Commands::Convert { file, to } => cli::workflow::handle_convert(&file, to).map(|()| true),
    };

    owlflow_observe::tracing_setup::shutdown_tracing();

    match result {
        Ok(true) => Ok(()),
        // Run ended FAILED or CANCELED; the report is already printed.
        Ok(false) => std::process::exit(1),
        Err(err) => Err(err),
    }
}
