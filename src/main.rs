// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! AIPerf binary entrypoint: config load, tracing setup, and the system
//! controller bootstrap.

use aiperf_config::{ServiceConfig, TransportConfig, UserConfig};
use aiperf_controller::{RunSummary, SystemController};
use aiperf_messages::MetricResult;
use aiperf_metrics::{MetricFlags, MetricRegistry};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Distributed load generator and measurement harness for inference
/// serving endpoints.
#[derive(Debug, Parser)]
#[command(name = "aiperf", version, about)]
struct Cli {
    /// Path to the run configuration (JSON).
    #[arg(long, short)]
    config: PathBuf,

    /// Override the artifact output directory.
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Use IPC sockets under this run directory instead of TCP.
    #[arg(long)]
    ipc_dir: Option<PathBuf>,

    /// First port of the TCP address block.
    #[arg(long)]
    base_port: Option<u16>,

    /// Number of workers; defaults to the CPU count.
    #[arg(long)]
    workers: Option<usize>,

    /// Number of record processors.
    #[arg(long)]
    record_processors: Option<usize>,
}

fn main() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut user_config = UserConfig::from_json_file(&cli.config)?;
    if let Some(artifact_dir) = cli.artifact_dir {
        user_config.output.artifact_directory = artifact_dir;
    }

    let mut service_config = ServiceConfig::default();
    if let Some(run_dir) = cli.ipc_dir {
        service_config.transport = TransportConfig::Ipc { run_dir };
    } else if let Some(base_port) = cli.base_port {
        if let TransportConfig::Tcp { base_port: port, .. } = &mut service_config.transport {
            *port = base_port;
        }
    }
    if cli.workers.is_some() {
        service_config.workers = cli.workers;
    }
    if let Some(record_processors) = cli.record_processors {
        service_config.record_processors = record_processors;
    }

    let registry = MetricRegistry::builtin(&user_config.goodput_slos)
        .map_err(|e| miette::miette!("metric registry error: {e}"))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| miette::miette!("failed to build runtime: {e}"))?;

    let summary = runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let signal_cancel = cancel.clone();
        let _ = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; shutting down");
                signal_cancel.cancel();
            }
        });
        let mut controller = SystemController::new(user_config, service_config);
        controller.run(cancel).await
    });

    match summary {
        Ok(summary) => {
            print_summary(&summary, &registry);
            if summary.exit_errors.is_empty() {
                Ok(ExitCode::SUCCESS)
            } else {
                for exit_error in &summary.exit_errors {
                    error!(%exit_error, "service exited with error");
                }
                Ok(ExitCode::FAILURE)
            }
        }
        Err(e) => {
            error!(error = %e, "run failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_summary(summary: &RunSummary, registry: &MetricRegistry) {
    let visible: Vec<&MetricResult> = summary
        .results
        .iter()
        .filter(|row| {
            registry
                .spec(&row.tag)
                .map(|spec| {
                    spec.flags.missing_flags(
                        MetricFlags::NO_CONSOLE | MetricFlags::HIDDEN | MetricFlags::INTERNAL,
                    )
                })
                .unwrap_or(true)
        })
        .collect();

    println!();
    println!("{:<38} {:>12} {:>12} {:>12} {:>12} {:>8}", "Metric", "avg", "min", "p50", "p99", "count");
    for row in visible {
        let fmt = |v: Option<f64>| v.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:>12.2} {:>12} {:>12} {:>12} {:>8}",
            format!("{} ({})", row.header, row.unit),
            row.avg,
            fmt(row.min),
            fmt(row.p50),
            fmt(row.p99),
            row.count,
        );
    }
    println!();
    println!(
        "records processed: {}  errors: {}",
        summary.processing.processed, summary.processing.errors
    );
}
