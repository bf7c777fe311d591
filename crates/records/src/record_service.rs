// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The record processor service: consumes raw records, computes stage-1
//! metrics, and flushes batches to the results processor.

use crate::error::Error;
use crate::processor::StageOneProcessor;
use aiperf_config::{ServiceConfig, UserConfig};
use aiperf_messages::{
    CommandOutcome, CommandResponseMessage, CommandType, Message, MessageHeader,
    MetricRecordEntry, MetricRecordsMessage, ServiceType,
};
use aiperf_metrics::MetricRegistry;
use aiperf_service::ServiceHarness;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs one record processor service until stopped.
pub async fn run_record_processor(
    user_config: UserConfig,
    service_config: ServiceConfig,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let mut harness = ServiceHarness::new(ServiceType::RecordProcessor, service_config.clone());
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
    let processor =
        StageOneProcessor::new(&registry, user_config, harness.service_id().to_string())?;

    let mut raw_records = harness.fabric().raw_inference_consumer(harness.child_token()).await?;
    let batches = harness.fabric().records_producer(harness.child_token()).await?;
    let (commands_sub, mut commands) = harness.command_stream().await.map_err(Error::from)?;
    harness.set_running().await.map_err(Error::from)?;

    let mut pending: Vec<MetricRecordEntry> = Vec::with_capacity(service_config.record_batch_size);
    let mut flush_tick = tokio::time::interval(service_config.record_batch_max_age);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => {
                let Some(command) = command else { break };
                debug!(command = %command.command, "record processor received command");
                // profile_stop only forces a flush; the processor keeps
                // draining raw records until shutdown.
                if matches!(command.command, CommandType::ProfileStop) {
                    flush(&batches, harness.service_id(), &mut pending).await;
                }
                let stop = matches!(command.command, CommandType::Shutdown);
                let _ = harness
                    .publish(&Message::CommandResponse(CommandResponseMessage {
                        header: harness.header(),
                        command_id: command.command_id,
                        outcome: CommandOutcome::Ok,
                        error: None,
                    }))
                    .await;
                if stop {
                    break;
                }
            }
            _ = flush_tick.tick() => {
                flush(&batches, harness.service_id(), &mut pending).await;
            }
            message = raw_records.recv() => {
                let Some(message) = message else { break };
                let Message::ParsedInferenceResults(results) = message else { continue };
                let metrics = processor.process_record(&results.record);
                pending.push(processor.to_entry(&results.record, metrics));
                if pending.len() >= service_config.record_batch_size {
                    flush(&batches, harness.service_id(), &mut pending).await;
                }
            }
        }
    }

    // Final flush so the results processor sees every record.
    flush(&batches, harness.service_id(), &mut pending).await;
    raw_records.stop().await;
    batches.stop().await;
    commands_sub.stop().await;
    Ok(())
}

async fn flush(
    batches: &aiperf_fabric::PushClient,
    service_id: &str,
    pending: &mut Vec<MetricRecordEntry>,
) {
    if pending.is_empty() {
        return;
    }
    let records = std::mem::take(pending);
    let message = Message::MetricRecords(MetricRecordsMessage {
        header: MessageHeader::new(service_id),
        records,
    });
    if let Err(e) = batches.push(&message).await {
        warn!(error = %e, "failed to flush metric record batch");
    }
}
