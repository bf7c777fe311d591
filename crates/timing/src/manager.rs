// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The timing manager service: owns the phase engine, the credit drop
//! socket, and the credit return subscription.

use crate::config::TimingManagerConfig;
use crate::error::Error;
use crate::schedule::FixedSchedule;
use crate::strategy::{CreditDrop, CreditManager, PhaseEngine};
use aiperf_config::{ServiceConfig, TimingMode, UserConfig};
use aiperf_fabric::{PubHandle, PushClient, SubClientBuilder};
use aiperf_messages::{
    CommandOutcome, CommandResponseMessage, CommandType, CreditDropMessage,
    CreditPhase, CreditPhaseCompleteMessage, CreditPhaseProgressMessage,
    CreditPhaseSendingCompleteMessage, CreditPhaseStartMessage, CreditsCompleteMessage, Message,
    MessageHeader, ServiceType,
};
use aiperf_service::ServiceHarness;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fabric-backed [`CreditManager`]: phase messages go to the event bus,
/// credits go down the bound credit-drop socket.
struct FabricCreditManager {
    service_id: String,
    event_bus: PubHandle,
    credit_drops: PushClient,
}

impl FabricCreditManager {
    fn header(&self) -> MessageHeader {
        MessageHeader::new(&self.service_id)
    }
}

#[async_trait]
impl CreditManager for FabricCreditManager {
    async fn publish_phase_start(
        &self,
        phase: CreditPhase,
        start_ns: u64,
        total_expected_requests: Option<u64>,
        expected_duration_sec: Option<f64>,
    ) -> Result<(), Error> {
        self.event_bus
            .publish(&Message::CreditPhaseStart(CreditPhaseStartMessage {
                header: self.header(),
                phase,
                start_ns,
                total_expected_requests,
                expected_duration_sec,
            }))
            .await
            .map_err(Error::from)
    }

    async fn publish_phase_sending_complete(
        &self,
        phase: CreditPhase,
        sent_end_ns: u64,
        sent: u64,
    ) -> Result<(), Error> {
        self.event_bus
            .publish(&Message::CreditPhaseSendingComplete(CreditPhaseSendingCompleteMessage {
                header: self.header(),
                phase,
                sent_end_ns,
                sent,
            }))
            .await
            .map_err(Error::from)
    }

    async fn publish_phase_complete(
        &self,
        phase: CreditPhase,
        completed: u64,
        end_ns: u64,
    ) -> Result<(), Error> {
        self.event_bus
            .publish(&Message::CreditPhaseComplete(CreditPhaseCompleteMessage {
                header: self.header(),
                phase,
                completed,
                end_ns,
            }))
            .await
            .map_err(Error::from)
    }

    async fn publish_phase_progress(
        &self,
        phase: CreditPhase,
        sent: u64,
        completed: u64,
    ) -> Result<(), Error> {
        self.event_bus
            .publish(&Message::CreditPhaseProgress(CreditPhaseProgressMessage {
                header: self.header(),
                phase,
                sent,
                completed,
            }))
            .await
            .map_err(Error::from)
    }

    async fn publish_credits_complete(&self) -> Result<(), Error> {
        self.event_bus
            .publish(&Message::CreditsComplete(CreditsCompleteMessage { header: self.header() }))
            .await
            .map_err(Error::from)
    }

    async fn drop_credit(&self, credit: CreditDrop) -> Result<(), Error> {
        self.credit_drops
            .push(&Message::CreditDrop(CreditDropMessage {
                header: self.header(),
                phase: credit.phase,
                conversation_id: credit.conversation_id,
                credit_drop_ns: credit.credit_drop_ns,
                should_cancel: credit.should_cancel,
                cancel_after_ns: credit.cancel_after_ns,
            }))
            .await
            .map_err(Error::from)
    }
}

/// Runs the timing manager service until stopped.
///
/// Lifecycle: initialize and register, wait for `profile_configure` /
/// `profile_start`, execute the phase engine, then wait for
/// `profile_stop` or `shutdown`.
pub async fn run_timing_manager(
    user_config: UserConfig,
    service_config: ServiceConfig,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let mut harness = ServiceHarness::new(ServiceType::TimingManager, service_config.clone());
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
    let timing_config = TimingManagerConfig::from_user_config(user_config, service_config);

    let credit_drops = harness.fabric().credit_drop_producer(harness.child_token()).await?;
    let manager = Arc::new(FabricCreditManager {
        service_id: harness.service_id().to_string(),
        event_bus: harness.publisher().map_err(Error::from)?,
        credit_drops,
    });

    let (engine, return_handle) = match timing_config.timing_mode {
        TimingMode::FixedSchedule => {
            let path = user_config.input.file.clone().ok_or_else(|| Error::Configuration {
                details: "fixed_schedule mode requires input.file".to_string(),
            })?;
            let entries = FixedSchedule::load_entries(&path)?;
            let schedule = FixedSchedule::build(entries, &timing_config)?;
            info!(requests = schedule.total_requests, "fixed schedule loaded");
            PhaseEngine::new_fixed_schedule(
                timing_config,
                Arc::clone(&manager) as Arc<dyn CreditManager>,
                schedule,
            )?
        }
        TimingMode::RequestRate => {
            PhaseEngine::new(timing_config, Arc::clone(&manager) as Arc<dyn CreditManager>)?
        }
    };

    // Credit returns arrive on the bound credit-return socket.
    let returns = {
        let handle = return_handle.clone();
        let builder = SubClientBuilder::new().subscribe(
            aiperf_messages::Topic::CreditReturn.as_str(),
            Box::new(move |message| {
                let handle = handle.clone();
                Box::pin(async move {
                    if let Message::CreditReturn(credit_return) = message {
                        handle.credit_returned(credit_return.phase);
                    }
                })
            }),
        );
        harness.fabric().credit_return_subscriber(builder, harness.child_token()).await?
    };

    let (commands_sub, mut commands) = harness.command_stream().await.map_err(Error::from)?;
    harness.set_running().await.map_err(Error::from)?;

    let mut engine = Some(engine);
    let mut engine_task: Option<tokio::task::JoinHandle<Result<(), Error>>> = None;
    let run_cancel = harness.child_token();

    let outcome = loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            command = commands.recv() => command,
        };
        let Some(command) = command else { break Ok(()) };
        debug!(command = %command.command, "timing manager received command");
        let outcome = match command.command {
            CommandType::ProfileConfigure => CommandOutcome::Ok,
            CommandType::ProfileStart => match engine.take() {
                Some(engine) => {
                    let engine_cancel = run_cancel.clone();
                    engine_task = Some(tokio::spawn(async move {
                        let mut engine = engine;
                        engine.run(&engine_cancel).await
                    }));
                    CommandOutcome::Ok
                }
                None => {
                    warn!("profile_start received twice; ignoring");
                    CommandOutcome::Error
                }
            },
            CommandType::ProfileStop | CommandType::Shutdown => {
                run_cancel.cancel();
                let _ = harness
                    .publish(&Message::CommandResponse(CommandResponseMessage {
                        header: harness.header(),
                        command_id: command.command_id.clone(),
                        outcome: CommandOutcome::Ok,
                        error: None,
                    }))
                    .await;
                break Ok(());
            }
            CommandType::ProcessRecords => CommandOutcome::Ok,
        };
        let _ = harness
            .publish(&Message::CommandResponse(CommandResponseMessage {
                header: harness.header(),
                command_id: command.command_id,
                outcome,
                error: None,
            }))
            .await;
    };

    // The engine observes this token; cancelling here covers exits taken
    // without an explicit profile_stop (external cancellation, bus close).
    run_cancel.cancel();
    if let Some(task) = engine_task {
        match task.await {
            Ok(engine_result) => {
                if let Err(e) = engine_result {
                    warn!(error = %e, "phase engine exited with error");
                }
            }
            Err(e) => warn!(error = %e, "phase engine task panicked"),
        }
    }
    returns.stop().await;
    commands_sub.stop().await;
    outcome
}
