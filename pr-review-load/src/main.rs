use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use pr_review_load::{scenario, stages, BASE_URL};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use surge::prelude::*;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_LOG_FILTER: &str = "surge=info,pr_review_load=info";

const EXIT_THRESHOLDS_FAILED: u8 = 99;
const EXIT_INVALID_CONFIG: u8 = 104;
const EXIT_SETUP_ABORTED: u8 = 107;

#[derive(Parser, Debug)]
#[command(version, about = "Ramping load test for the pull-request review-assignment service")]
struct Cli {
    /// Service under test.
    #[arg(long, default_value = BASE_URL)]
    base_url: String,

    /// Replace the built-in ramp, e.g. `--stage 10s:5 --stage 30s:5 --stage 10s:0`.
    #[arg(long = "stage", value_name = "DUR:TARGET")]
    stages: Vec<Stage>,

    /// Write the end-of-test statistics as JSON.
    #[arg(long, value_name = "PATH")]
    summary_export: Option<PathBuf>,

    /// Serve Prometheus metrics on this address while the test runs.
    #[arg(long, value_name = "ADDR")]
    prometheus: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> ExitCode {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if let Some(addr) = cli.prometheus {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install the Prometheus exporter")?;
        info!("Serving Prometheus metrics on {addr}");
    }

    let stages = if cli.stages.is_empty() {
        stages()
    } else {
        cli.stages
    };

    let stats = match scenario(&cli.base_url, &stages).await {
        Ok(stats) => stats,
        Err(err @ ScenarioError::Setup(_)) => {
            error!("{err}");
            return Ok(ExitCode::from(EXIT_SETUP_ABORTED));
        }
        Err(err) => {
            error!("{err}");
            return Ok(ExitCode::from(EXIT_INVALID_CONFIG));
        }
    };

    println!("{stats}");

    if let Some(path) = cli.summary_export {
        let json = serde_json::to_string_pretty(&stats)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
        info!("Summary written to {}", path.display());
    }

    if stats.passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_THRESHOLDS_FAILED))
    }
}
