// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Behavioral tests for the credit-issuance engine: phase protocol order,
//! concurrency limits, window closure, and grace-period force-completion.

use aiperf_config::{RequestRateMode, TimingMode};
use aiperf_messages::CreditPhase;
use aiperf_timing::config::TimingManagerConfig;
use aiperf_timing::schedule::FixedSchedule;
use aiperf_timing::strategy::{CreditDrop, CreditManager, CreditReturnHandle, PhaseEngine};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    PhaseStart(CreditPhase),
    Drop { phase: CreditPhase, conversation_id: Option<String>, should_cancel: bool },
    SendingComplete { phase: CreditPhase, sent: u64 },
    Complete { phase: CreditPhase, completed: u64 },
    CreditsComplete,
}

/// Records engine output; optionally auto-returns up to `return_limit`
/// credits the moment they drop.
struct MockManager {
    events: Mutex<Vec<Event>>,
    drop_instants: Mutex<Vec<Instant>>,
    return_handle: Mutex<Option<CreditReturnHandle>>,
    return_limit: Mutex<u64>,
}

impl MockManager {
    fn new(return_limit: u64) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            drop_instants: Mutex::new(Vec::new()),
            return_handle: Mutex::new(None),
            return_limit: Mutex::new(return_limit),
        })
    }

    fn attach(&self, handle: CreditReturnHandle) {
        *self.return_handle.lock() = Some(handle);
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn drops(&self) -> Vec<Event> {
        self.events().into_iter().filter(|e| matches!(e, Event::Drop { .. })).collect()
    }
}

#[async_trait]
impl CreditManager for MockManager {
    async fn publish_phase_start(
        &self,
        phase: CreditPhase,
        _start_ns: u64,
        _total: Option<u64>,
        _duration: Option<f64>,
    ) -> Result<(), aiperf_timing::Error> {
        self.events.lock().push(Event::PhaseStart(phase));
        Ok(())
    }

    async fn publish_phase_sending_complete(
        &self,
        phase: CreditPhase,
        _sent_end_ns: u64,
        sent: u64,
    ) -> Result<(), aiperf_timing::Error> {
        self.events.lock().push(Event::SendingComplete { phase, sent });
        Ok(())
    }

    async fn publish_phase_complete(
        &self,
        phase: CreditPhase,
        completed: u64,
        _end_ns: u64,
    ) -> Result<(), aiperf_timing::Error> {
        self.events.lock().push(Event::Complete { phase, completed });
        Ok(())
    }

    async fn publish_phase_progress(
        &self,
        _phase: CreditPhase,
        _sent: u64,
        _completed: u64,
    ) -> Result<(), aiperf_timing::Error> {
        Ok(())
    }

    async fn publish_credits_complete(&self) -> Result<(), aiperf_timing::Error> {
        self.events.lock().push(Event::CreditsComplete);
        Ok(())
    }

    async fn drop_credit(&self, credit: CreditDrop) -> Result<(), aiperf_timing::Error> {
        self.events.lock().push(Event::Drop {
            phase: credit.phase,
            conversation_id: credit.conversation_id,
            should_cancel: credit.should_cancel,
        });
        self.drop_instants.lock().push(Instant::now());
        let auto_return = {
            let mut limit = self.return_limit.lock();
            if *limit > 0 {
                *limit -= 1;
                true
            } else {
                false
            }
        };
        if auto_return
            && let Some(handle) = self.return_handle.lock().clone()
        {
            handle.credit_returned(credit.phase);
        }
        Ok(())
    }
}

fn fast_progress() -> Duration {
    Duration::from_millis(50)
}

#[tokio::test(start_paused = true)]
async fn constant_rate_paces_drops_without_trailing_sleep() {
    // 1 req/s, 2 credits: first immediate, second after 1s, no extra sleep.
    let config = TimingManagerConfig {
        request_rate: Some(1.0),
        request_count: 2,
        progress_report_interval: fast_progress(),
        ..TimingManagerConfig::default()
    };
    let manager = MockManager::new(u64::MAX);
    let (mut engine, handle) =
        PhaseEngine::new(config, Arc::clone(&manager) as Arc<dyn CreditManager>)
            .expect("engine");
    manager.attach(handle);

    let started = Instant::now();
    engine.run(&CancellationToken::new()).await.expect("run");
    let elapsed = started.elapsed();

    assert_eq!(manager.drops().len(), 2);
    let instants = manager.drop_instants.lock().clone();
    assert_eq!(instants[0] - started, Duration::ZERO);
    assert_eq!(instants[1] - started, Duration::from_secs(1));
    // Total wall time is one period: no sleep after the final drop.
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1_050), "trailing sleep detected: {elapsed:?}");
}

#[tokio::test]
async fn concurrency_burst_puts_all_credits_in_flight_before_any_return() {
    let k = 4;
    let config = TimingManagerConfig {
        request_rate: None,
        request_rate_mode: RequestRateMode::ConcurrencyBurst,
        concurrency: Some(k),
        request_count: k,
        progress_report_interval: fast_progress(),
        ..TimingManagerConfig::default()
    };
    let manager = MockManager::new(0);
    let (mut engine, handle) =
        PhaseEngine::new(config, Arc::clone(&manager) as Arc<dyn CreditManager>)
            .expect("engine");
    manager.attach(handle.clone());

    let cancel = CancellationToken::new();
    let run = tokio::spawn(async move { engine.run(&cancel).await });

    // All k drops happen without a single return.
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.drops().len() < k as usize {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("all credits dropped");
    assert!(!manager.events().iter().any(|e| matches!(e, Event::Complete { .. })));

    // Returning all k completes the phase and the run.
    for _ in 0..k {
        handle.credit_returned(CreditPhase::Profiling);
    }
    run.await.expect("join").expect("run");

    let events = manager.events();
    let positions: Vec<usize> = [
        events.iter().position(|e| matches!(e, Event::PhaseStart(CreditPhase::Profiling))),
        events.iter().position(|e| matches!(e, Event::SendingComplete { sent: 4, .. })),
        events.iter().position(|e| matches!(e, Event::Complete { completed: 4, .. })),
        events.iter().position(|e| matches!(e, Event::CreditsComplete)),
    ]
    .into_iter()
    .map(|p| p.expect("event present"))
    .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "phase protocol out of order");
}

#[tokio::test]
async fn closing_window_while_waiting_on_the_semaphore_emits_no_spurious_credit() {
    // One permit, never returned: the second acquire blocks until the
    // 300ms window closes, then the phase force-completes (grace 0).
    let config = TimingManagerConfig {
        request_rate: Some(1_000.0),
        concurrency: Some(1),
        benchmark_duration: Some(0.3),
        benchmark_grace_period: 0.0,
        progress_report_interval: fast_progress(),
        ..TimingManagerConfig::default()
    };
    let manager = MockManager::new(0);
    let (mut engine, handle) =
        PhaseEngine::new(config, Arc::clone(&manager) as Arc<dyn CreditManager>)
            .expect("engine");
    manager.attach(handle);

    engine.run(&CancellationToken::new()).await.expect("run");

    assert_eq!(manager.drops().len(), 1, "spurious credit after window close");
    let events = manager.events();
    assert!(events.iter().any(|e| matches!(e, Event::SendingComplete { sent: 1, .. })));
    assert!(events.iter().any(|e| matches!(e, Event::Complete { completed: 0, .. })));
}

#[tokio::test]
async fn grace_period_force_completes_with_partial_returns() {
    // Time-based phase with a short window and zero grace: only 3 of the
    // dropped credits return, the rest are abandoned at force-completion.
    let config = TimingManagerConfig {
        request_rate: Some(50.0),
        benchmark_duration: Some(0.3),
        benchmark_grace_period: 0.0,
        progress_report_interval: fast_progress(),
        ..TimingManagerConfig::default()
    };
    let manager = MockManager::new(3);
    let (mut engine, handle) =
        PhaseEngine::new(config, Arc::clone(&manager) as Arc<dyn CreditManager>)
            .expect("engine");
    manager.attach(handle);

    engine.run(&CancellationToken::new()).await.expect("run");

    let drops = manager.drops().len() as u64;
    assert!(drops > 3, "expected more drops than returns, got {drops}");
    let events = manager.events();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::Complete { phase: CreditPhase::Profiling, completed: 3 })),
        "expected force-completion with completed = 3: {events:?}"
    );
    assert!(events.iter().any(|e| matches!(e, Event::CreditsComplete)));
}

#[tokio::test]
async fn warmup_completes_before_profiling_and_credits_complete_fires_once() {
    let config = TimingManagerConfig {
        request_rate: Some(10_000.0),
        warmup_request_count: 2,
        request_count: 3,
        progress_report_interval: fast_progress(),
        ..TimingManagerConfig::default()
    };
    let manager = MockManager::new(u64::MAX);
    let (mut engine, handle) =
        PhaseEngine::new(config, Arc::clone(&manager) as Arc<dyn CreditManager>)
            .expect("engine");
    manager.attach(handle);

    engine.run(&CancellationToken::new()).await.expect("run");

    let events = manager.events();
    let warmup_complete = events
        .iter()
        .position(|e| matches!(e, Event::Complete { phase: CreditPhase::Warmup, .. }))
        .expect("warmup complete");
    let profiling_start = events
        .iter()
        .position(|e| matches!(e, Event::PhaseStart(CreditPhase::Profiling)))
        .expect("profiling start");
    let credits_complete_count =
        events.iter().filter(|e| matches!(e, Event::CreditsComplete)).count();
    assert!(warmup_complete < profiling_start);
    assert_eq!(credits_complete_count, 1);
    // credits_complete is the profiling-completion trigger, nothing earlier.
    assert!(matches!(events.last(), Some(Event::CreditsComplete)));
}

#[tokio::test(start_paused = true)]
async fn fixed_schedule_drops_same_timestamp_conversations_together() {
    let config = TimingManagerConfig {
        timing_mode: TimingMode::FixedSchedule,
        progress_report_interval: fast_progress(),
        ..TimingManagerConfig::default()
    };
    let schedule = FixedSchedule::build(
        vec![
            (1_000, "conv-a".to_string()),
            (1_000, "conv-b".to_string()),
            (1_150, "conv-c".to_string()),
        ],
        &config,
    )
    .expect("schedule");
    let manager = MockManager::new(u64::MAX);
    let (mut engine, handle) = PhaseEngine::new_fixed_schedule(
        config,
        Arc::clone(&manager) as Arc<dyn CreditManager>,
        schedule,
    )
    .expect("engine");
    manager.attach(handle);

    let started = Instant::now();
    engine.run(&CancellationToken::new()).await.expect("run");

    let drops = manager.drops();
    let ids: Vec<Option<String>> = drops
        .iter()
        .map(|e| match e {
            Event::Drop { conversation_id, .. } => conversation_id.clone(),
            _ => None,
        })
        .collect();
    assert_eq!(
        ids,
        vec![
            Some("conv-a".to_string()),
            Some("conv-b".to_string()),
            Some("conv-c".to_string())
        ]
    );
    let instants = manager.drop_instants.lock().clone();
    // Both conversations at timestamp 1000 drop in the same scheduler tick.
    assert_eq!(instants[0], instants[1]);
    assert_eq!(instants[2] - started, Duration::from_millis(150));
}

#[tokio::test]
async fn seeded_cancellation_marks_credits_for_cancellation() {
    let config = TimingManagerConfig {
        request_rate: Some(10_000.0),
        request_count: 50,
        request_cancellation_rate: 100.0,
        request_cancellation_delay: 0.01,
        random_seed: Some(3),
        progress_report_interval: fast_progress(),
        ..TimingManagerConfig::default()
    };
    let manager = MockManager::new(u64::MAX);
    let (mut engine, handle) =
        PhaseEngine::new(config, Arc::clone(&manager) as Arc<dyn CreditManager>)
            .expect("engine");
    manager.attach(handle);

    engine.run(&CancellationToken::new()).await.expect("run");

    let drops = manager.drops();
    assert_eq!(drops.len(), 50);
    assert!(drops.iter().all(|e| matches!(e, Event::Drop { should_cancel: true, .. })));
}
