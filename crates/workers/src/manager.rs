// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The worker manager service: spawns the worker pool and ties its
//! lifetime to the service lifecycle.

use crate::error::Error;
use crate::worker::Worker;
use aiperf_config::{ServiceConfig, UserConfig};
use aiperf_messages::{
    CommandOutcome, CommandResponseMessage, CommandType, Message, ServiceType,
};
use aiperf_service::ServiceHarness;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

fn default_worker_count() -> usize {
    std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(4)
}

/// Runs the worker manager service until stopped.
///
/// Workers are created and destroyed together with the manager; each owns
/// its sockets and HTTP transport and shares nothing with its siblings.
pub async fn run_worker_manager(
    user_config: UserConfig,
    service_config: ServiceConfig,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let mut harness = ServiceHarness::new(ServiceType::WorkerManager, service_config.clone());
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
    let worker_count = service_config.workers.unwrap_or_else(default_worker_count);
    let worker_cancel = harness.child_token();
    // Workers report worker-level errors through the manager's event bus
    // socket; they own everything else themselves.
    let events = harness.publisher().map_err(Error::from)?;

    let mut workers = Vec::with_capacity(worker_count);
    for index in 0..worker_count {
        let worker_id = format!("{}-worker-{index}", harness.service_id());
        let worker = Worker::connect(
            worker_id,
            user_config.clone(),
            harness.fabric(),
            events.clone(),
            worker_cancel.clone(),
        )
        .await?;
        workers.push(tokio::spawn(worker.run(worker_cancel.clone())));
    }
    info!(workers = worker_count, "worker pool started");

    let (commands_sub, mut commands) = harness.command_stream().await.map_err(Error::from)?;
    harness.set_running().await.map_err(Error::from)?;

    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => command,
        };
        let Some(command) = command else { break };
        debug!(command = %command.command, "worker manager received command");
        let stop = matches!(command.command, CommandType::ProfileStop | CommandType::Shutdown);
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

    // Workers drain their in-flight request before observing cancellation
    // at the next credit pull; past the graceful timeout they are abandoned.
    worker_cancel.cancel();
    let drained = tokio::time::timeout(service_config.graceful_shutdown_timeout, async {
        for worker in workers {
            let _ = worker.await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("workers did not drain within the graceful shutdown timeout");
    }
    commands_sub.stop().await;
    Ok(())
}
