//! Gatewire CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse arguments and configuration** from flags, environment and an
//!    optional JSON config file.
//! 2. **Wire observability**: `tracing-subscriber` with an `EnvFilter`, text
//!    or JSON output, and an OpenTelemetry OTLP exporter when
//!    `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! 3. **Construct infrastructure**: AWS SDK providers, or the in-memory
//!    providers under `--dry-run`, injected into the orchestrator.
//! 4. **Run the batch** and print one summary per request. The process exits
//!    non-zero if any request failed.
//!
//! Ctrl-C cancels the batch cooperatively: runs stop before their next step
//! and are reported with whatever they created.

mod args;
mod report;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use memory::MemoryCloud;
use provisioning::ProvisioningConfig;
use tracing::{info, warn};
use workflow::{CancellationToken, ProvisioningOrchestrator};

use crate::args::{Cli, OutputFormat};
use crate::report::{render_text, RequestReport};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let telemetry = telemetry::init(cli.log_format)?;
    let outcome = run(&cli).await;
    telemetry.shutdown();
    outcome
}

async fn run(cli: &Cli) -> Result<ExitCode> {
    let config = cli.load_config()?;
    let requests = cli.collect_requests()?;
    let orchestrator = build_orchestrator(config, cli.dry_run).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling remaining steps");
            on_interrupt.cancel();
        }
    });

    let reports: Vec<RequestReport> = orchestrator
        .run_batch_with_cancellation(&requests, &cancel)
        .await
        .into_iter()
        .map(RequestReport::from)
        .collect();

    match cli.output {
        OutputFormat::Text => print!("{}", render_text(&reports)),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("serializing report")?
        ),
    }

    if reports.iter().any(RequestReport::is_failure) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn build_orchestrator(
    config: ProvisioningConfig,
    dry_run: bool,
) -> Result<ProvisioningOrchestrator> {
    let orchestrator = if dry_run {
        info!(region = %config.region, "Dry run: using in-memory providers");
        let cloud = MemoryCloud::new(config.region.clone());
        ProvisioningOrchestrator::new(
            config,
            Arc::new(cloud.clone()),
            Arc::new(cloud.clone()),
            Arc::new(cloud),
        )
    } else {
        let providers = aws::AwsProviders::from_env(&config.region).await;
        ProvisioningOrchestrator::new(
            config,
            providers.queues,
            providers.apis,
            providers.permissions,
        )
    };
    orchestrator.context("building orchestrator")
}
