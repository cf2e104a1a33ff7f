use clap::Parser;
use siem_query_utils::{cli::Cli, config, run_command};
use std::process;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run() -> siem_query_utils::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    cli.init_logging();

    // Load configuration, then let flags and environment override it
    let mut config = config::load_config(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);

    run_command(cli.command, config).await
}
