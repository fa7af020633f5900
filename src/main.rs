//! Pacgen - Entry Point
//!
//! Runs one generation pass and exits non-zero on hard failure.

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pacgen::config::LogConfig;
use pacgen::{Config, Pipeline, Result, RunReport};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing(&LogConfig::from_env());

    info!("Starting pacgen {}", env!("CARGO_PKG_VERSION"));

    match run().await {
        Ok(report) => {
            info!(
                sources = report.sources,
                fetched = report.fetched,
                unique = report.unique,
                live = report.live,
                published = report.published,
                "Pacgen finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(fatal = e.is_fatal(), "Pacgen failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<RunReport> {
    let config = Config::from_env()?;
    info!(
        sources = config.source_count(),
        probe_url = %config.probe.url,
        output = %config.output.path,
        "Configuration loaded"
    );

    let pipeline = Pipeline::from_config(&config)?;
    pipeline.run().await
}

/// Logs go to stderr so a PAC written to stdout stays clean
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pacgen={}", log.level)));

    let registry = tracing_subscriber::registry().with(filter);

    if log.is_json() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
