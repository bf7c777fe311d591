// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The service lifecycle state machine.
//!
//! `Created -> Initialized -> Running -> Stopping -> Stopped`, with `Failed`
//! reachable from any non-terminal state. Observers await transitions via a
//! watch channel rather than polling.

use crate::error::Error;
use aiperf_messages::ServiceState;
use tokio::sync::watch;

/// Shared, observable lifecycle state for one service.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    service_id: String,
    tx: watch::Sender<ServiceState>,
}

impl Lifecycle {
    /// New lifecycle in `Created`.
    #[must_use]
    pub fn new(service_id: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(ServiceState::Created);
        Self { service_id: service_id.into(), tx }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.tx.borrow()
    }

    /// True once the state is `Stopping` or later.
    #[must_use]
    pub fn is_stopping_or_later(&self) -> bool {
        self.state().is_stopping_or_later()
    }

    /// Attempts a transition, rejecting anything the state machine forbids.
    pub fn transition_to(&self, to: ServiceState) -> Result<(), Error> {
        let from = self.state();
        if !transition_allowed(from, to) {
            return Err(Error::InvalidStateTransition {
                service_id: self.service_id.clone(),
                from,
                to,
            });
        }
        let _ = self.tx.send(to);
        Ok(())
    }

    /// Waits until the state reaches `target` or later.
    pub async fn wait_for(&self, target: ServiceState) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow() >= target {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

fn transition_allowed(from: ServiceState, to: ServiceState) -> bool {
    use ServiceState::*;
    match (from, to) {
        (Created, Initialized) => true,
        (Initialized, Running) => true,
        // A service may stop before it ever ran (startup failure cleanup).
        (Created | Initialized | Running, Stopping) => true,
        (Stopping, Stopped) => true,
        (Created | Initialized | Running | Stopping, Failed) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let lifecycle = Lifecycle::new("svc-1");
        assert_eq!(lifecycle.state(), ServiceState::Created);
        lifecycle.transition_to(ServiceState::Initialized).expect("init");
        lifecycle.transition_to(ServiceState::Running).expect("run");
        lifecycle.transition_to(ServiceState::Stopping).expect("stopping");
        lifecycle.transition_to(ServiceState::Stopped).expect("stopped");
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let lifecycle = Lifecycle::new("svc-1");
        assert!(lifecycle.transition_to(ServiceState::Running).is_err());
        lifecycle.transition_to(ServiceState::Initialized).expect("init");
        assert!(lifecycle.transition_to(ServiceState::Stopped).is_err());
        lifecycle.transition_to(ServiceState::Failed).expect("failed");
        assert!(lifecycle.transition_to(ServiceState::Running).is_err());
    }

    #[tokio::test]
    async fn wait_for_observes_transitions() {
        let lifecycle = Lifecycle::new("svc-1");
        let waiter = lifecycle.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for(ServiceState::Running).await;
        });
        lifecycle.transition_to(ServiceState::Initialized).expect("init");
        lifecycle.transition_to(ServiceState::Running).expect("run");
        handle.await.expect("join");
    }
}
