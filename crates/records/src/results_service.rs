// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The results processor service: the pipeline's single accumulator, the
//! realtime stats streamer, and artifact export.

use crate::error::Error;
use crate::export::{RecordsJsonlWriter, SummaryWriter};
use crate::results::ResultsAccumulator;
use aiperf_config::{ExportLevel, ServiceConfig, UserConfig};
use aiperf_messages::{
    CommandOutcome, CommandResponseMessage, CommandType, Message, RealtimeMetricsMessage,
    ServiceType,
};
use aiperf_metrics::MetricRegistry;
use aiperf_service::ServiceHarness;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs the results processor service until stopped.
///
/// Accumulates stage-1 batches, publishes periodic realtime snapshots, and
/// on `process_records` computes the final summary and writes artifacts.
pub async fn run_results_processor(
    user_config: UserConfig,
    service_config: ServiceConfig,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let mut harness = ServiceHarness::new(ServiceType::ResultsProcessor, service_config.clone());
    harness.initialize().await.map_err(Error::from)?;
    let service_id = harness.service_id().to_string();

    let result = run_inner(&mut harness, &user_config, &service_config, &cancel).await;
    let outcome = result.map_err(|e| aiperf_service::Error::lifecycle(&service_id, "run", e));
    harness.shutdown(outcome).await?;
    Ok(())
}

async fn run_inner(
    harness: &mut ServiceHarness,
    user_config: &UserConfig,
    service_config: &ServiceConfig,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let registry = Arc::new(MetricRegistry::builtin(&user_config.goodput_slos)?);
    let mut accumulator = ResultsAccumulator::new(Arc::clone(&registry), user_config)?;

    let mut jsonl_writer = match user_config.output.export_level {
        ExportLevel::Summary => None,
        ExportLevel::Records | ExportLevel::Raw => Some(RecordsJsonlWriter::create(
            &user_config.output.artifact_directory,
            Arc::clone(&registry),
        )?),
    };
    let mut timeslices = match crate::timeslice::TimesliceProcessor::new(user_config) {
        Ok(processor) => Some(processor),
        Err(Error::PostProcessorDisabled { details }) => {
            debug!(%details, "timeslice processing skipped");
            None
        }
        Err(e) => return Err(e),
    };

    let mut batches = harness.fabric().records_consumer(harness.child_token()).await?;
    let (commands_sub, mut commands) = harness.command_stream().await.map_err(Error::from)?;
    harness.set_running().await.map_err(Error::from)?;

    let mut realtime_tick = tokio::time::interval(service_config.realtime_stats_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => {
                let Some(command) = command else { break };
                debug!(command = %command.command, "results processor received command");
                match command.command {
                    CommandType::ProcessRecords => {
                        let summary_result = summarize_and_export(
                            harness,
                            user_config,
                            &accumulator,
                            jsonl_writer.as_mut(),
                            timeslices.as_ref(),
                        )
                        .await;
                        let (outcome, error) = match summary_result {
                            Ok(()) => (CommandOutcome::Ok, None),
                            Err(e) => (CommandOutcome::Error, Some(e.to_string())),
                        };
                        let _ = harness
                            .publish(&Message::CommandResponse(CommandResponseMessage {
                                header: harness.header(),
                                command_id: command.command_id,
                                outcome,
                                error,
                            }))
                            .await;
                    }
                    CommandType::Shutdown => {
                        let _ = harness
                            .publish(&Message::CommandResponse(CommandResponseMessage {
                                header: harness.header(),
                                command_id: command.command_id,
                                outcome: CommandOutcome::Ok,
                                error: None,
                            }))
                            .await;
                        break;
                    }
                    _ => {
                        let _ = harness
                            .publish(&Message::CommandResponse(CommandResponseMessage {
                                header: harness.header(),
                                command_id: command.command_id,
                                outcome: CommandOutcome::Ok,
                                error: None,
                            }))
                            .await;
                    }
                }
            }
            _ = realtime_tick.tick() => {
                let message = Message::RealtimeMetrics(RealtimeMetricsMessage {
                    header: harness.header(),
                    results: accumulator.summarize(),
                    processing: accumulator.processing_stats(),
                });
                if let Err(e) = harness.publish(&message).await {
                    warn!(error = %e, "failed to publish realtime metrics");
                }
            }
            message = batches.recv() => {
                let Some(message) = message else { break };
                let Message::MetricRecords(batch) = message else { continue };
                for entry in &batch.records {
                    accumulator.process_entry(entry);
                    if let Some(timeslices) = timeslices.as_mut() {
                        timeslices.observe_entry(entry);
                    }
                    if let Some(writer) = jsonl_writer.as_mut()
                        && let Err(e) = writer.write_entry(entry)
                    {
                        warn!(error = %e, "failed to write record export line");
                    }
                }
            }
        }
    }

    if let Some(writer) = jsonl_writer.as_mut() {
        let _ = writer.flush();
    }
    batches.stop().await;
    commands_sub.stop().await;
    Ok(())
}

async fn summarize_and_export(
    harness: &ServiceHarness,
    user_config: &UserConfig,
    accumulator: &ResultsAccumulator,
    jsonl_writer: Option<&mut RecordsJsonlWriter>,
    timeslices: Option<&crate::timeslice::TimesliceProcessor>,
) -> Result<(), Error> {
    let results = accumulator.summarize();
    info!(metrics = results.len(), "summarized run results");

    if let Some(writer) = jsonl_writer {
        writer.flush()?;
    }
    if let Some(timeslices) = timeslices {
        timeslices.export(&user_config.output.artifact_directory)?;
    }
    SummaryWriter::write(&user_config.output.artifact_directory, &results)?;

    // The final snapshot doubles as the summary handoff to the controller.
    harness
        .publish(&Message::RealtimeMetrics(RealtimeMetricsMessage {
            header: harness.header(),
            results,
            processing: accumulator.processing_stats(),
        }))
        .await
        .map_err(Error::from)
}
