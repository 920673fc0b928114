mod auth;
mod cli;
mod config;
mod credentials;
mod engine;
mod error;
mod manifest;
mod output;
mod platforms;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use engine::CancelFlag;
use log::{info, warn};
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting acs-provision");

    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime.block_on(run(cli));
    // A prompt abandoned on interrupt still holds a blocking thread.
    runtime.shutdown_background();
    outcome
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let cancel = CancelFlag::default();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current step");
            on_interrupt.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    cli.execute(cancel).await
}
