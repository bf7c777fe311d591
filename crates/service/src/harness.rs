// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The per-service harness: event bus wiring, registration, heartbeats,
//! command delivery, and lifecycle publication.
//!
//! Every service owns one harness. The harness owns the service's root
//! cancellation token; entering `Stopping` cancels it, which tears down
//! every client and long-lived task attached to the service.

use crate::error::Error;
use crate::lifecycle::Lifecycle;
use aiperf_fabric::{Fabric, PubClient, PubHandle, SubClient, SubClientBuilder};
use aiperf_messages::{
    CommandMessage, ErrorMessage, HeartbeatMessage, Message, MessageHeader, RegistrationMessage,
    RequestErrorInfo, ServiceState, ServiceType, StatusMessage, Topic,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Event bus wiring and lifecycle publication for one service.
pub struct ServiceHarness {
    service_type: ServiceType,
    service_id: String,
    fabric: Fabric,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
    event_bus: Option<PubClient>,
    heartbeat_task: Option<JoinHandle<()>>,
}

impl ServiceHarness {
    /// Harness with a generated service id.
    #[must_use]
    pub fn new(service_type: ServiceType, config: aiperf_config::ServiceConfig) -> Self {
        let short = uuid::Uuid::new_v4().simple().to_string();
        let service_id = format!("{}-{}", service_type.as_str(), &short[..8]);
        Self::with_id(service_type, service_id, config)
    }

    /// Harness with an explicit service id.
    #[must_use]
    pub fn with_id(
        service_type: ServiceType,
        service_id: impl Into<String>,
        config: aiperf_config::ServiceConfig,
    ) -> Self {
        let service_id = service_id.into();
        Self {
            service_type,
            fabric: Fabric::new(service_id.clone(), config),
            lifecycle: Lifecycle::new(service_id.clone()),
            service_id,
            cancel: CancellationToken::new(),
            event_bus: None,
            heartbeat_task: None,
        }
    }

    /// The service's id.
    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// The service's type.
    #[must_use]
    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    /// The fabric factory bound to this service.
    #[must_use]
    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    /// The lifecycle state machine.
    #[must_use]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// A child of the service's root cancellation token.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// A message header stamped with this service's id.
    #[must_use]
    pub fn header(&self) -> MessageHeader {
        MessageHeader::new(&self.service_id)
    }

    /// Connects the event bus, registers the service, and starts heartbeats.
    ///
    /// Transitions `Created -> Initialized`.
    pub async fn initialize(&mut self) -> Result<(), Error> {
        let event_bus = self.fabric.event_bus_publisher(self.child_token()).await?;
        self.lifecycle.transition_to(ServiceState::Initialized)?;

        event_bus
            .publish(&Message::Registration(RegistrationMessage {
                header: self.header(),
                service_type: self.service_type,
                state: ServiceState::Initialized,
            }))
            .await?;
        debug!(service_id = %self.service_id, "service registered");

        let heartbeat = HeartbeatLoop {
            publisher: event_bus.handle(),
            lifecycle: self.lifecycle.clone(),
            service_type: self.service_type,
            service_id: self.service_id.clone(),
            interval: self.fabric.config().heartbeat_interval,
            cancel: self.child_token(),
        };
        self.heartbeat_task = Some(tokio::spawn(heartbeat.run()));
        self.event_bus = Some(event_bus);
        Ok(())
    }

    /// Publishes a message on the event bus.
    pub async fn publish(&self, message: &Message) -> Result<(), Error> {
        match &self.event_bus {
            Some(event_bus) => Ok(event_bus.publish(message).await?),
            None => Err(Error::NotInitialized {
                service_id: self.service_id.clone(),
                operation: format!("publish {}", message.message_type()),
            }),
        }
    }

    /// A cloneable publishing handle onto the event bus.
    pub fn publisher(&self) -> Result<PubHandle, Error> {
        match &self.event_bus {
            Some(event_bus) => Ok(event_bus.handle()),
            None => Err(Error::NotInitialized {
                service_id: self.service_id.clone(),
                operation: "publisher".to_string(),
            }),
        }
    }

    /// Subscribes to controller commands, delivered over a channel.
    pub async fn command_stream(
        &self,
    ) -> Result<(SubClient, mpsc::Receiver<CommandMessage>), Error> {
        let (tx, rx) = mpsc::channel(64);
        let service_id = self.service_id.clone();
        let builder = SubClientBuilder::new().subscribe(
            Topic::Command.as_str(),
            Box::new(move |message| {
                let tx = tx.clone();
                let service_id = service_id.clone();
                Box::pin(async move {
                    let Message::Command(command) = message else { return };
                    // Targeted commands are ignored by everyone else.
                    if let Some(target) = &command.target_service_id
                        && target != &service_id
                    {
                        return;
                    }
                    let _ = tx.send(command).await;
                })
            }),
        );
        let client = self.fabric.event_bus_subscriber(builder, self.child_token()).await?;
        Ok((client, rx))
    }

    /// Transitions to `Running` and publishes the status change.
    pub async fn set_running(&self) -> Result<(), Error> {
        self.lifecycle.transition_to(ServiceState::Running)?;
        self.publish_status(ServiceState::Running).await
    }

    /// Publishes the current state on the status topic.
    async fn publish_status(&self, state: ServiceState) -> Result<(), Error> {
        self.publish(&Message::Status(StatusMessage {
            header: self.header(),
            service_type: self.service_type,
            state,
        }))
        .await
    }

    /// Reports a service-level error to the controller.
    pub async fn publish_error(&self, error: &RequestErrorInfo) -> Result<(), Error> {
        self.publish(&Message::Error(ErrorMessage {
            header: self.header(),
            service_type: self.service_type,
            error: error.clone(),
        }))
        .await
    }

    /// Runs the orderly stop: `Stopping` -> cancel everything -> `Stopped`
    /// (or `Failed` when the main loop errored).
    pub async fn shutdown(&mut self, outcome: Result<(), Error>) -> Result<(), Error> {
        if !self.lifecycle.is_stopping_or_later() {
            self.lifecycle.transition_to(ServiceState::Stopping)?;
            let _ = self.publish_status(ServiceState::Stopping).await;
        }

        let final_state = match &outcome {
            Ok(()) => ServiceState::Stopped,
            Err(e) => {
                warn!(service_id = %self.service_id, error = %e, "service failed");
                let _ = self
                    .publish_error(&RequestErrorInfo {
                        error_type: "service".to_string(),
                        code: None,
                        message: e.to_string(),
                    })
                    .await;
                ServiceState::Failed
            }
        };
        // Publish the terminal state before tearing the bus down.
        let _ = self.publish_status(final_state).await;

        self.cancel.cancel();
        if let Some(task) = self.heartbeat_task.take() {
            let _ = task.await;
        }
        if let Some(event_bus) = self.event_bus.take() {
            event_bus.stop().await;
        }
        self.lifecycle.transition_to(final_state)?;
        outcome
    }
}

struct HeartbeatLoop {
    publisher: PubHandle,
    lifecycle: Lifecycle,
    service_type: ServiceType,
    service_id: String,
    interval: std::time::Duration,
    cancel: CancellationToken,
}

impl HeartbeatLoop {
    async fn run(self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            let message = Message::Heartbeat(HeartbeatMessage {
                header: MessageHeader::new(&self.service_id),
                service_type: self.service_type,
                state: self.lifecycle.state(),
            });
            if self.publisher.publish(&message).await.is_err() {
                break;
            }
        }
    }
}
