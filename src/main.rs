use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use sitesnap::{run_archiver, Cli, RunOutcome};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let controls = cli.build_controls();
    match run_archiver(&controls, cli.once)? {
        Some(RunOutcome::Created(dir)) => info!(dir = %dir.display(), "snapshot created"),
        Some(RunOutcome::Unchanged) => info!("no changes detected; no snapshot created"),
        None => {}
    }
    Ok(())
}
