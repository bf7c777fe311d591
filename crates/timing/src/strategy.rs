// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The credit-issuance engine: phase protocol, issuing strategies, credit
//! return accounting, and grace-period force-completion.
//!
//! The engine is the only authority on when a request may be sent. The
//! strategy <-> manager cycle is broken by the [`CreditManager`] trait: the
//! engine consumes it for phase publications and credit drops, and the
//! owning service injects the fabric-backed implementation.

use crate::cancellation::RequestCancellationStrategy;
use crate::config::TimingManagerConfig;
use crate::error::Error;
use crate::rate::RateGenerator;
use crate::schedule::FixedSchedule;
use aiperf_config::TimingMode;
use aiperf_messages::{CreditPhase, CreditPhaseConfig, CreditPhaseStats};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A credit authorization to be dropped to the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditDrop {
    /// Phase the credit belongs to.
    pub phase: CreditPhase,
    /// Conversation to execute, for fixed-schedule credits.
    pub conversation_id: Option<String>,
    /// Wall-clock target send time, for pre-scheduling strategies.
    pub credit_drop_ns: Option<u64>,
    /// Whether the worker should abort this request mid-flight.
    pub should_cancel: bool,
    /// Delay after request start at which to abort, in nanoseconds.
    pub cancel_after_ns: Option<u64>,
}

/// The engine's view of the outside world: phase publications and credit
/// drops. Injected by the timing manager service.
#[async_trait]
pub trait CreditManager: Send + Sync {
    /// Announces a phase start on the event bus.
    async fn publish_phase_start(
        &self,
        phase: CreditPhase,
        start_ns: u64,
        total_expected_requests: Option<u64>,
        expected_duration_sec: Option<f64>,
    ) -> Result<(), Error>;

    /// Announces that every credit of a phase has been dropped.
    async fn publish_phase_sending_complete(
        &self,
        phase: CreditPhase,
        sent_end_ns: u64,
        sent: u64,
    ) -> Result<(), Error>;

    /// Announces phase completion.
    async fn publish_phase_complete(
        &self,
        phase: CreditPhase,
        completed: u64,
        end_ns: u64,
    ) -> Result<(), Error>;

    /// Publishes a periodic progress report for a live phase.
    async fn publish_phase_progress(
        &self,
        phase: CreditPhase,
        sent: u64,
        completed: u64,
    ) -> Result<(), Error>;

    /// Announces that all credit phases are complete.
    async fn publish_credits_complete(&self) -> Result<(), Error>;

    /// Drops one credit to the worker pool.
    async fn drop_credit(&self, credit: CreditDrop) -> Result<(), Error>;
}

struct SharedPhaseState {
    stats: Mutex<HashMap<CreditPhase, CreditPhaseStats>>,
    returns: Notify,
    semaphore: Option<Arc<Semaphore>>,
}

/// Feeds credit returns back into the engine. Held by the credit return
/// subscription; cheap to clone.
#[derive(Clone)]
pub struct CreditReturnHandle {
    shared: Arc<SharedPhaseState>,
}

impl CreditReturnHandle {
    /// Records one returned credit for `phase` and releases the concurrency
    /// token, if a concurrency cap is configured.
    pub fn credit_returned(&self, phase: CreditPhase) {
        {
            let mut stats = self.shared.stats.lock();
            match stats.get_mut(&phase) {
                Some(stats) => stats.completed += 1,
                None => {
                    debug!(%phase, "credit return for unknown or completed phase");
                    return;
                }
            }
        }
        if let Some(semaphore) = &self.shared.semaphore {
            semaphore.add_permits(1);
        }
        self.shared.returns.notify_waiters();
    }
}

enum CreditIssuer {
    Rate { generator: RateGenerator },
    Schedule { schedule: FixedSchedule },
}

/// Drives the ordered credit phases to completion.
pub struct PhaseEngine {
    config: TimingManagerConfig,
    manager: Arc<dyn CreditManager>,
    issuer: CreditIssuer,
    cancellation: RequestCancellationStrategy,
    phases: Vec<CreditPhaseConfig>,
    shared: Arc<SharedPhaseState>,
}

impl PhaseEngine {
    /// Engine for request-rate timing modes.
    pub fn new(
        config: TimingManagerConfig,
        manager: Arc<dyn CreditManager>,
    ) -> Result<(Self, CreditReturnHandle), Error> {
        if config.timing_mode == TimingMode::FixedSchedule {
            return Err(Error::Configuration {
                details: "fixed_schedule mode requires a schedule; use new_fixed_schedule"
                    .to_string(),
            });
        }
        let generator = RateGenerator::from_config(&config)?;
        let mut phases = Vec::new();
        if config.warmup_request_count > 0 {
            phases.push(CreditPhaseConfig::count_based(
                CreditPhase::Warmup,
                config.warmup_request_count,
            ));
        }
        phases.push(match config.benchmark_duration {
            Some(duration) => CreditPhaseConfig::time_based(CreditPhase::Profiling, duration),
            None => CreditPhaseConfig::count_based(CreditPhase::Profiling, config.request_count),
        });
        Self::build(config, manager, CreditIssuer::Rate { generator }, phases)
    }

    /// Engine replaying a fixed schedule. The profiling phase expects
    /// exactly the schedule's (possibly truncated) request count.
    pub fn new_fixed_schedule(
        config: TimingManagerConfig,
        manager: Arc<dyn CreditManager>,
        schedule: FixedSchedule,
    ) -> Result<(Self, CreditReturnHandle), Error> {
        let phases = vec![CreditPhaseConfig::count_based(
            CreditPhase::Profiling,
            schedule.total_requests,
        )];
        Self::build(config, manager, CreditIssuer::Schedule { schedule }, phases)
    }

    fn build(
        config: TimingManagerConfig,
        manager: Arc<dyn CreditManager>,
        issuer: CreditIssuer,
        phases: Vec<CreditPhaseConfig>,
    ) -> Result<(Self, CreditReturnHandle), Error> {
        for phase in &phases {
            phase.validate()?;
        }
        let semaphore =
            config.concurrency.map(|permits| Arc::new(Semaphore::new(permits as usize)));
        let shared = Arc::new(SharedPhaseState {
            stats: Mutex::new(HashMap::new()),
            returns: Notify::new(),
            semaphore,
        });
        let cancellation = RequestCancellationStrategy::from_config(&config);
        let handle = CreditReturnHandle { shared: Arc::clone(&shared) };
        Ok((Self { config, manager, issuer, cancellation, phases, shared }, handle))
    }

    /// The ordered phase configurations this engine will execute.
    #[must_use]
    pub fn phase_configs(&self) -> &[CreditPhaseConfig] {
        &self.phases
    }

    /// Executes every phase in order, then publishes `credits_complete`
    /// after the profiling phase completes.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), Error> {
        let progress_cancel = cancel.child_token();
        let progress = tokio::spawn(progress_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.manager),
            self.config.progress_report_interval,
            progress_cancel.clone(),
        ));

        let mut result = Ok(());
        for index in 0..self.phases.len() {
            if cancel.is_cancelled() {
                break;
            }
            let phase_config = self.phases[index].clone();
            result = self.execute_phase(&phase_config, cancel).await;
            if result.is_err() {
                break;
            }
        }

        progress_cancel.cancel();
        let _ = progress.await;
        result
    }

    async fn execute_phase(
        &mut self,
        phase_config: &CreditPhaseConfig,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let phase = phase_config.phase;
        let stats = CreditPhaseStats::from_config(phase_config);
        let start_ns = stats.start_ns;
        let phase_start = Instant::now();
        {
            let _ = self.shared.stats.lock().insert(phase, stats);
        }
        self.manager
            .publish_phase_start(
                phase,
                start_ns,
                phase_config.total_expected_requests,
                phase_config.expected_duration_sec,
            )
            .await?;
        info!(%phase, "credit phase started");

        let window_deadline = phase_config
            .expected_duration_sec
            .map(|duration| phase_start + Duration::from_secs_f64(duration));
        self.issue_credits(phase, window_deadline, cancel).await?;
        if cancel.is_cancelled() {
            return Ok(());
        }

        let sent_end_ns = aiperf_messages::time::wall_clock_ns();
        let sent = {
            let mut stats = self.shared.stats.lock();
            let Some(stats) = stats.get_mut(&phase) else { return Ok(()) };
            stats.sent_end_ns = Some(sent_end_ns);
            stats.sent
        };
        self.manager.publish_phase_sending_complete(phase, sent_end_ns, sent).await?;
        debug!(%phase, sent, "credit phase sending complete");

        // Wait for in-flight credits. Time-based phases wait at most the
        // grace period past the window; count-based phases wait forever.
        let grace_deadline = window_deadline
            .map(|deadline| deadline + Duration::from_secs_f64(self.config.benchmark_grace_period));
        let mut forced = false;
        loop {
            let notified = self.shared.returns.notified();
            let completed_all = {
                let stats = self.shared.stats.lock();
                stats.get(&phase).map(|s| s.completed >= s.sent).unwrap_or(true)
            };
            if completed_all {
                break;
            }
            match grace_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = notified => {}
                        _ = tokio::time::sleep_until(deadline) => {
                            forced = true;
                            break;
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = notified => {}
                    }
                }
            }
        }

        let end_ns = aiperf_messages::time::wall_clock_ns();
        let completed = {
            let mut stats = self.shared.stats.lock();
            match stats.remove(&phase) {
                Some(mut stats) => {
                    stats.end_ns = Some(end_ns);
                    stats.completed
                }
                None => 0,
            }
        };
        if forced {
            warn!(%phase, completed, "grace period expired; abandoning unreturned credits");
        }
        self.manager.publish_phase_complete(phase, completed, end_ns).await?;
        info!(%phase, completed, "credit phase complete");

        if phase == CreditPhase::Profiling {
            self.manager.publish_credits_complete().await?;
        }
        Ok(())
    }

    async fn issue_credits(
        &mut self,
        phase: CreditPhase,
        window_deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        match &mut self.issuer {
            CreditIssuer::Rate { generator } => {
                issue_at_rate(
                    generator,
                    &mut self.cancellation,
                    &self.shared,
                    &*self.manager,
                    phase,
                    window_deadline,
                    cancel,
                )
                .await
            }
            CreditIssuer::Schedule { schedule } => {
                issue_on_schedule(
                    schedule,
                    &mut self.cancellation,
                    &self.shared,
                    &*self.manager,
                    phase,
                    cancel,
                )
                .await
            }
        }
    }
}

fn should_send(shared: &SharedPhaseState, phase: CreditPhase) -> bool {
    shared
        .stats
        .lock()
        .get(&phase)
        .map(CreditPhaseStats::should_send_now)
        .unwrap_or(false)
}

fn cancellation_fields(
    cancellation: &mut RequestCancellationStrategy,
) -> (bool, Option<u64>) {
    if cancellation.is_enabled() && cancellation.should_cancel_request() {
        (true, Some(cancellation.cancellation_delay_ns()))
    } else {
        (false, None)
    }
}

async fn issue_at_rate(
    generator: &mut RateGenerator,
    cancellation: &mut RequestCancellationStrategy,
    shared: &SharedPhaseState,
    manager: &dyn CreditManager,
    phase: CreditPhase,
    window_deadline: Option<Instant>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    // Anchor the scheduling cursor at phase start so sleep granularity
    // does not accumulate drift across drops.
    let mut next_drop_at = Instant::now();
    let anchored = generator.uses_anchored_cursor();

    while should_send(shared, phase) {
        if let Some(semaphore) = &shared.semaphore {
            // The permit is consumed by the drop and released on return.
            let acquired = match window_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        permit = semaphore.acquire() => {
                            permit.map(tokio::sync::SemaphorePermit::forget).is_ok()
                        }
                        _ = tokio::time::sleep_until(deadline) => false,
                    }
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        permit = semaphore.acquire() => {
                            permit.map(tokio::sync::SemaphorePermit::forget).is_ok()
                        }
                    }
                }
            };
            if !acquired {
                // The phase window closed while waiting; no spurious credit.
                break;
            }
            if !should_send(shared, phase) {
                semaphore.add_permits(1);
                break;
            }
        }

        let (should_cancel, cancel_after_ns) = cancellation_fields(cancellation);
        manager
            .drop_credit(CreditDrop {
                phase,
                conversation_id: None,
                credit_drop_ns: None,
                should_cancel,
                cancel_after_ns,
            })
            .await?;
        if let Some(stats) = shared.stats.lock().get_mut(&phase) {
            stats.sent += 1;
        }

        // Check before sleeping so the phase never ends on a trailing sleep.
        if !should_send(shared, phase) {
            break;
        }
        let interval = generator.next_interval();
        if interval.is_zero() {
            continue;
        }
        if anchored {
            next_drop_at += interval;
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep_until(next_drop_at) => {}
            }
        } else {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
    Ok(())
}

async fn issue_on_schedule(
    schedule: &FixedSchedule,
    cancellation: &mut RequestCancellationStrategy,
    shared: &SharedPhaseState,
    manager: &dyn CreditManager,
    phase: CreditPhase,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let start = Instant::now();
    for (timestamp_ms, conversation_ids) in &schedule.groups {
        let offset_ms = timestamp_ms.saturating_sub(schedule.zero_ms);
        let target = start + Duration::from_millis(offset_ms);
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep_until(target) => {}
        }
        for conversation_id in conversation_ids {
            let (should_cancel, cancel_after_ns) = cancellation_fields(cancellation);
            manager
                .drop_credit(CreditDrop {
                    phase,
                    conversation_id: Some(conversation_id.clone()),
                    // Already waited; workers send immediately.
                    credit_drop_ns: None,
                    should_cancel,
                    cancel_after_ns,
                })
                .await?;
            if let Some(stats) = shared.stats.lock().get_mut(&phase) {
                stats.sent += 1;
            }
        }
    }
    Ok(())
}

async fn progress_loop(
    shared: Arc<SharedPhaseState>,
    manager: Arc<dyn CreditManager>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        let live: Vec<(CreditPhase, u64, u64)> = {
            let stats = shared.stats.lock();
            stats
                .values()
                .filter(|s| !s.is_complete())
                .map(|s| (s.phase, s.sent, s.completed))
                .collect()
        };
        for (phase, sent, completed) in live {
            if let Err(e) = manager.publish_phase_progress(phase, sent, completed).await {
                warn!(%phase, error = %e, "failed to publish credit progress");
            }
        }
    }
}
