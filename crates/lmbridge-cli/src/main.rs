//! CLI entry point - the composition root.
//!
//! Settings and the upstream backend are wired in `bootstrap`; command
//! dispatch routes to handlers.

use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use lmbridge_cli::{Cli, CliError, Commands, bootstrap, handlers, init_logging};

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        // No command provided - show help
        Cli::command().print_help()?;
        return Ok(());
    };

    let ctx = bootstrap(&cli)?;
    match command {
        Commands::Serve => handlers::serve::execute(ctx).await?,
        Commands::Models { json } => handlers::models::execute(&ctx, json).await?,
        Commands::Check => handlers::check::execute(&ctx).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables before clap reads LMBRIDGE_*
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            let code = e.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
