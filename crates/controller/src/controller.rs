// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The system controller: spawns the fleet, sequences the profile run, and
//! aggregates exit errors.

use crate::dataset::run_dataset_provider;
use crate::error::Error;
use aiperf_config::{ServiceConfig, UserConfig};
use aiperf_fabric::{Fabric, PubClient, SubClient, SubClientBuilder};
use aiperf_messages::{
    CommandMessage, CommandType, ExitErrorInfo, Message, MessageHeader, MetricResult,
    PhaseProcessingStats, ServiceState, ServiceType, Topic,
};
use aiperf_records::{run_record_processor, run_results_processor};
use aiperf_service::{ServiceThreadHandle, spawn_service_thread};
use aiperf_timing::run_timing_manager;
use aiperf_workers::run_worker_manager;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Settle time between observing fleet readiness and the first command, so
/// late event bus joiners do not miss it.
const COMMAND_SETTLE_DELAY: Duration = Duration::from_millis(250);

/// State of the system as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    /// Spawning services and proxies.
    Initializing,
    /// Delivering the profiling configuration.
    Configuring,
    /// Every required service is running.
    Ready,
    /// Credits are being issued and requests executed.
    Profiling,
    /// Summarizing accumulated records.
    Processing,
    /// Orderly shutdown in progress.
    Stopping,
    /// The run is over.
    Shutdown,
}

/// The outcome of a completed run.
#[derive(Debug)]
pub struct RunSummary {
    /// Final metric rows, in display order.
    pub results: Vec<MetricResult>,
    /// Record processing counters.
    pub processing: PhaseProcessingStats,
    /// Errors collected from services during the run and at exit.
    pub exit_errors: Vec<ExitErrorInfo>,
}

#[derive(Default)]
struct ObservedEvents {
    registered: HashMap<ServiceType, HashSet<String>>,
    running: HashMap<ServiceType, HashSet<String>>,
    command_responses: HashMap<String, u64>,
    errors: Vec<ExitErrorInfo>,
    credits_complete: bool,
    last_snapshot: Option<(Vec<MetricResult>, PhaseProcessingStats)>,
}

#[derive(Clone, Default)]
struct EventCollector {
    observed: Arc<Mutex<ObservedEvents>>,
    changed: Arc<Notify>,
}

impl EventCollector {
    fn record(&self, message: Message) {
        {
            let mut observed = self.observed.lock();
            match message {
                Message::Registration(m) => {
                    let _ = observed
                        .registered
                        .entry(m.service_type)
                        .or_default()
                        .insert(m.header.service_id);
                }
                Message::Status(m) => {
                    if m.state == ServiceState::Running {
                        let _ = observed
                            .running
                            .entry(m.service_type)
                            .or_default()
                            .insert(m.header.service_id.clone());
                    }
                    if m.state == ServiceState::Failed {
                        observed.errors.push(ExitErrorInfo {
                            service_id: m.header.service_id,
                            service_type: m.service_type,
                            message: "service entered failed state".to_string(),
                        });
                    }
                }
                Message::CommandResponse(m) => {
                    *observed.command_responses.entry(m.command_id).or_insert(0) += 1;
                }
                Message::Error(m) => {
                    observed.errors.push(ExitErrorInfo {
                        service_id: m.header.service_id,
                        service_type: m.service_type,
                        message: m.error.message,
                    });
                }
                Message::CreditsComplete(_) => observed.credits_complete = true,
                Message::RealtimeMetrics(m) => {
                    observed.last_snapshot = Some((m.results, m.processing));
                }
                _ => {}
            }
        }
        self.changed.notify_waiters();
    }
}

type ServiceHandle = ServiceThreadHandle<(), aiperf_service::Error>;

/// Orchestrates one profiling run end to end.
pub struct SystemController {
    user_config: UserConfig,
    service_config: ServiceConfig,
    state: SystemState,
}

impl SystemController {
    /// Controller for one run.
    #[must_use]
    pub fn new(user_config: UserConfig, service_config: ServiceConfig) -> Self {
        Self { user_config, service_config, state: SystemState::Initializing }
    }

    /// The controller's current state.
    #[must_use]
    pub fn state(&self) -> SystemState {
        self.state
    }

    /// Runs the fleet to completion and returns the summary.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<RunSummary, Error> {
        let fabric = Fabric::new("system_controller", self.service_config.clone());
        let proxy_cancel = cancel.child_token();
        let proxies = vec![
            fabric.start_event_bus_proxy(proxy_cancel.clone()).await?,
            fabric.start_dataset_proxy(proxy_cancel.clone()).await?,
            fabric.start_raw_inference_proxy(proxy_cancel.clone()).await?,
        ];

        let collector = EventCollector::default();
        let events = self.subscribe_events(&fabric, &collector, cancel.child_token()).await?;
        let commands = fabric.event_bus_publisher(cancel.child_token()).await?;

        let mut handles = self.spawn_services()?;
        let result = self
            .sequence_run(&commands, &collector, &mut handles, &cancel)
            .await;

        // Orderly shutdown regardless of how the run ended.
        self.state = SystemState::Stopping;
        let _ = self
            .broadcast(&commands, &collector, CommandType::Shutdown, 0)
            .await;
        tokio::time::sleep(COMMAND_SETTLE_DELAY).await;

        let mut exit_errors: Vec<ExitErrorInfo> =
            collector.observed.lock().errors.clone();
        for (service_type, handle) in handles {
            if let Err(e) = handle.shutdown_and_join() {
                exit_errors.push(ExitErrorInfo {
                    service_id: service_type.as_str().to_string(),
                    service_type,
                    message: e.to_string(),
                });
            }
        }

        commands.stop().await;
        events.stop().await;
        proxy_cancel.cancel();
        for proxy in proxies {
            proxy.stop().await;
        }
        fabric.cleanup();
        self.state = SystemState::Shutdown;

        match result {
            Ok((results, processing)) => Ok(RunSummary { results, processing, exit_errors }),
            Err(e) => {
                if !exit_errors.is_empty() {
                    warn!(errors = exit_errors.len(), "run ended with service errors");
                }
                Err(e)
            }
        }
    }

    async fn sequence_run(
        &mut self,
        commands: &PubClient,
        collector: &EventCollector,
        handles: &mut Vec<(ServiceType, ServiceHandle)>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<MetricResult>, PhaseProcessingStats), Error> {
        let expected_services = self.expected_services();
        self.await_fleet_ready(collector, handles, &expected_services).await?;
        self.state = SystemState::Ready;
        info!("all required services are running");
        tokio::time::sleep(COMMAND_SETTLE_DELAY).await;

        self.state = SystemState::Configuring;
        let total: u64 = expected_services.iter().map(|(_, count)| *count as u64).sum();
        self.broadcast(commands, collector, CommandType::ProfileConfigure, total).await?;

        self.state = SystemState::Profiling;
        self.broadcast(commands, collector, CommandType::ProfileStart, total).await?;

        // Wait for the profiling phase to finish, watching for failures.
        loop {
            let (complete, first_error) = {
                let observed = collector.observed.lock();
                (observed.credits_complete, observed.errors.first().cloned())
            };
            if let Some(error) = first_error {
                return Err(Error::RunAborted(error));
            }
            if complete {
                break;
            }
            if cancel.is_cancelled() {
                return Err(Error::RunAborted(ExitErrorInfo {
                    service_id: "system_controller".to_string(),
                    service_type: ServiceType::SystemController,
                    message: "run cancelled".to_string(),
                }));
            }
            let notified = collector.changed.notified();
            let _ = tokio::time::timeout(Duration::from_millis(200), notified).await;
        }
        info!("credits complete; draining record pipeline");
        self.broadcast(commands, collector, CommandType::ProfileStop, total).await?;

        // Let stage-1 batches flush through before summarizing.
        tokio::time::sleep(self.service_config.record_batch_max_age * 3 + COMMAND_SETTLE_DELAY)
            .await;

        self.state = SystemState::Processing;
        self.broadcast(commands, collector, CommandType::ProcessRecords, 1).await?;

        let snapshot = collector.observed.lock().last_snapshot.clone();
        let (results, processing) = snapshot.ok_or(Error::MissingSummary)?;
        Ok((results, processing))
    }

    fn expected_services(&self) -> Vec<(ServiceType, usize)> {
        vec![
            (ServiceType::DatasetProvider, 1),
            (ServiceType::TimingManager, 1),
            (ServiceType::WorkerManager, 1),
            (ServiceType::RecordProcessor, self.service_config.record_processors.max(1)),
            (ServiceType::ResultsProcessor, 1),
        ]
    }

    fn spawn_services(&self) -> Result<Vec<(ServiceType, ServiceHandle)>, Error> {
        let mut handles = Vec::new();
        let record_processors = self.service_config.record_processors.max(1);

        handles.push((
            ServiceType::DatasetProvider,
            self.spawn("dataset_provider", |user, service, token| async move {
                run_dataset_provider(user, service, token)
                    .await
                    .map_err(|e| aiperf_service::Error::lifecycle("dataset_provider", "run", e))
            })?,
        ));
        handles.push((
            ServiceType::ResultsProcessor,
            self.spawn("results_processor", |user, service, token| async move {
                run_results_processor(user, service, token)
                    .await
                    .map_err(|e| aiperf_service::Error::lifecycle("results_processor", "run", e))
            })?,
        ));
        for index in 0..record_processors {
            handles.push((
                ServiceType::RecordProcessor,
                self.spawn(&format!("record_processor-{index}"), |user, service, token| {
                    async move {
                        run_record_processor(user, service, token).await.map_err(|e| {
                            aiperf_service::Error::lifecycle("record_processor", "run", e)
                        })
                    }
                })?,
            ));
        }
        handles.push((
            ServiceType::WorkerManager,
            self.spawn("worker_manager", |user, service, token| async move {
                run_worker_manager(user, service, token)
                    .await
                    .map_err(|e| aiperf_service::Error::lifecycle("worker_manager", "run", e))
            })?,
        ));
        handles.push((
            ServiceType::TimingManager,
            self.spawn("timing_manager", |user, service, token| async move {
                run_timing_manager(user, service, token)
                    .await
                    .map_err(|e| aiperf_service::Error::lifecycle("timing_manager", "run", e))
            })?,
        ));
        Ok(handles)
    }

    fn spawn<F, Fut>(&self, name: &str, factory: F) -> Result<ServiceHandle, Error>
    where
        F: FnOnce(UserConfig, ServiceConfig, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), aiperf_service::Error>> + 'static,
    {
        let user_config = self.user_config.clone();
        let service_config = self.service_config.clone();
        Ok(spawn_service_thread(name, move |token| {
            factory(user_config, service_config, token)
        })?)
    }

    async fn subscribe_events(
        &self,
        fabric: &Fabric,
        collector: &EventCollector,
        cancel: CancellationToken,
    ) -> Result<SubClient, Error> {
        let mut builder = SubClientBuilder::new();
        for topic in [
            Topic::Registration,
            Topic::Status,
            Topic::Error,
            Topic::CommandResponse,
            Topic::CreditsComplete,
            Topic::RealtimeMetrics,
        ] {
            let collector = collector.clone();
            builder = builder.subscribe(
                topic.as_str(),
                Box::new(move |message| {
                    let collector = collector.clone();
                    Box::pin(async move {
                        collector.record(message);
                    })
                }),
            );
        }
        Ok(fabric.event_bus_subscriber(builder, cancel).await?)
    }

    async fn await_fleet_ready(
        &self,
        collector: &EventCollector,
        handles: &mut [(ServiceType, ServiceHandle)],
        expected: &[(ServiceType, usize)],
    ) -> Result<(), Error> {
        let deadline = tokio::time::Instant::now() + self.service_config.registration_timeout;
        loop {
            let missing: Vec<ServiceType> = {
                let observed = collector.observed.lock();
                expected
                    .iter()
                    .filter(|(service_type, count)| {
                        let registered =
                            observed.registered.get(service_type).map(HashSet::len).unwrap_or(0);
                        let running =
                            observed.running.get(service_type).map(HashSet::len).unwrap_or(0);
                        registered < *count || running < *count
                    })
                    .map(|(service_type, _)| *service_type)
                    .collect()
            };
            if missing.is_empty() {
                return Ok(());
            }

            // Fail fast when a spawned service dies before it registers.
            for (service_type, handle) in handles.iter_mut() {
                if missing.contains(service_type) && handle.is_finished() {
                    return Err(Error::ServiceStartup {
                        service_type: *service_type,
                        details: format!(
                            "service thread `{}` exited before registering",
                            handle.name()
                        ),
                    });
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(Error::RegistrationTimeout {
                    timeout_sec: self.service_config.registration_timeout.as_secs(),
                    missing,
                });
            }
            let notified = collector.changed.notified();
            let _ = tokio::time::timeout(Duration::from_millis(100), notified).await;
        }
    }

    /// Broadcasts a command and waits for `expected` responses (zero means
    /// fire-and-forget). Missing responses are logged, not fatal.
    async fn broadcast(
        &self,
        commands: &PubClient,
        collector: &EventCollector,
        command: CommandType,
        expected: u64,
    ) -> Result<(), Error> {
        let command_id = uuid::Uuid::new_v4().simple().to_string();
        let message = Message::Command(CommandMessage {
            header: MessageHeader::new("system_controller"),
            command,
            command_id: command_id.clone(),
            target_service_id: None,
            config: None,
        });
        commands.publish(&message).await?;
        debug!(%command, %command_id, "command broadcast");
        if expected == 0 {
            return Ok(());
        }

        let deadline = tokio::time::Instant::now() + self.service_config.request_reply_timeout;
        loop {
            let responses = collector
                .observed
                .lock()
                .command_responses
                .get(&command_id)
                .copied()
                .unwrap_or(0);
            if responses >= expected {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(%command, responses, expected, "command responses incomplete");
                return Ok(());
            }
            let notified = collector.changed.notified();
            let _ = tokio::time::timeout(Duration::from_millis(100), notified).await;
        }
    }
}

