//! `fastdl-upload`: uploads maps to a FastDL server and follows their
//! server-side processing.

mod app;
mod cli;
mod config;
mod csrf;
mod terminal;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr; stdout carries the upload cards.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fastdl=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting fastdl-upload");

    let config = match &args.config {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load()?,
    };
    let settings = config::Settings::resolve(config, &args)?;
    tracing::info!(url = %settings.url, files = args.files.len(), "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(app::run(settings, args.files))?;

    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "all uploads finished"
    );
    Ok(if summary.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
