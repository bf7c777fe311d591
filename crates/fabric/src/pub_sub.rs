// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! PUB and SUB clients.
//!
//! Publishers prefix every frame with the message's topic. Subscribers
//! filter by topic prefix and dispatch to registered async callbacks.
//! Delivery is best-effort: ordered within a single (publisher, topic)
//! pair, unordered across topics and publishers.

use crate::address::{Address, Endpoint};
use crate::error::Error;
use crate::socket::{
    FabricListener, FrameStream, connect_with_retry, decode_frame, encode_frame, frame_stream,
};
use aiperf_messages::Message;
use bytes::{Bytes, BytesMut};
use futures::stream::{SelectAll, StreamExt};
use futures::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Publishing side of a PUB/SUB link.
pub struct PubClient {
    address: Address,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PubClient {
    /// Connects a publisher to `address` (normally a proxy frontend or a
    /// bound single consumer).
    pub async fn connect(
        address: Address,
        endpoint: &Endpoint,
        queue_depth: usize,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let stream = connect_with_retry(endpoint, &cancel).await?;
        let mut sink = frame_stream(stream);
        let (tx, mut rx) = mpsc::channel::<Bytes>(queue_depth.max(1));
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        if let Err(e) = sink.send(frame).await {
                            if !task_cancel.is_cancelled() {
                                warn!(address = %address, error = %e, "publish failed; peer closed");
                            }
                            break;
                        }
                    }
                }
            }
        });
        Ok(Self { address, tx, cancel, task: Some(task) })
    }

    /// Publishes a message under its event bus topic.
    pub async fn publish(&self, message: &Message) -> Result<(), Error> {
        publish_via(&self.tx, self.address, message).await
    }

    /// A lightweight cloneable handle that publishes through this client's
    /// socket task. Valid until the client stops.
    #[must_use]
    pub fn handle(&self) -> PubHandle {
        PubHandle { address: self.address, tx: self.tx.clone() }
    }

    /// Stops the writer task and closes the socket.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Cloneable publishing handle detached from the owning [`PubClient`].
#[derive(Clone)]
pub struct PubHandle {
    address: Address,
    tx: mpsc::Sender<Bytes>,
}

impl PubHandle {
    /// Publishes a message under its event bus topic.
    pub async fn publish(&self, message: &Message) -> Result<(), Error> {
        publish_via(&self.tx, self.address, message).await
    }
}

async fn publish_via(
    tx: &mpsc::Sender<Bytes>,
    address: Address,
    message: &Message,
) -> Result<(), Error> {
    let topic = message.topic().map(|t| t.as_str()).unwrap_or_default();
    let payload = message.encode().map_err(|e| Error::malformed(address.as_str(), e))?;
    let frame = encode_frame(topic, &payload);
    tx.send(frame).await.map_err(|_| Error::SocketClosed { address: address.to_string() })
}

/// Async callback invoked for each message matching a subscription.
pub type SubHandler =
    Box<dyn FnMut(Message) -> futures::future::BoxFuture<'static, ()> + Send + 'static>;

/// Builder collecting topic subscriptions before the socket opens.
#[derive(Default)]
pub struct SubClientBuilder {
    subscriptions: Vec<(String, SubHandler)>,
    strict_decode: bool,
}

impl SubClientBuilder {
    /// New builder with no subscriptions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects messages carrying fields no message type declares.
    #[must_use]
    pub fn strict_decode(mut self) -> Self {
        self.strict_decode = true;
        self
    }

    /// Registers `handler` for every message whose topic starts with `prefix`.
    #[must_use]
    pub fn subscribe(mut self, prefix: impl Into<String>, handler: SubHandler) -> Self {
        self.subscriptions.push((prefix.into(), handler));
        self
    }

    /// Connects to `address` (normally a proxy backend) and starts dispatching.
    pub async fn connect(
        self,
        address: Address,
        endpoint: &Endpoint,
        cancel: CancellationToken,
    ) -> Result<SubClient, Error> {
        let stream = connect_with_retry(endpoint, &cancel).await?;
        let reader = frame_stream(stream);
        Ok(SubClient::start(address, SubSource::Single(reader), self, cancel))
    }

    /// Binds at `address` and accepts publisher connections directly, for
    /// links where the single consumer binds (e.g. credit returns).
    pub async fn bind(
        self,
        address: Address,
        endpoint: &Endpoint,
        cancel: CancellationToken,
    ) -> Result<SubClient, Error> {
        let listener = FabricListener::bind(endpoint).await?;
        Ok(SubClient::start(address, SubSource::Accepting(listener), self, cancel))
    }
}

enum SubSource {
    Single(FrameStream),
    Accepting(FabricListener),
}

/// Subscribing side of a PUB/SUB link.
pub struct SubClient {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubClient {
    fn start(
        address: Address,
        source: SubSource,
        builder: SubClientBuilder,
        cancel: CancellationToken,
    ) -> Self {
        let task_cancel = cancel.clone();
        let task = tokio::spawn(dispatch_loop(address, source, builder, task_cancel));
        Self { cancel, task: Some(task) }
    }

    /// Stops dispatching and closes the socket(s).
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn dispatch_loop(
    address: Address,
    source: SubSource,
    builder: SubClientBuilder,
    cancel: CancellationToken,
) {
    let SubClientBuilder { mut subscriptions, strict_decode } = builder;
    let mut single = None;
    let mut listener = None;
    match source {
        SubSource::Single(stream) => single = Some(stream),
        SubSource::Accepting(l) => listener = Some(l),
    }
    let mut accepted: SelectAll<FrameStream> = SelectAll::new();
    if let Some(stream) = single {
        accepted.push(stream);
    }

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            conn = async {
                match &listener {
                    Some(l) => l.accept().await,
                    // No listener: pend forever, frames come from `accepted`.
                    None => std::future::pending().await,
                }
            } => {
                match conn {
                    Ok(stream) => accepted.push(frame_stream(stream)),
                    Err(e) => {
                        if !cancel.is_cancelled() {
                            warn!(address = %address, error = %e, "accept failed");
                        }
                    }
                }
                continue;
            }
            frame = accepted.next(), if !accepted.is_empty() => frame,
        };
        let Some(frame) = frame else {
            // All publishers disconnected. With a listener more may arrive;
            // without one the link is finished.
            if listener.is_none() {
                break;
            }
            continue;
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                if !cancel.is_cancelled() {
                    warn!(address = %address, error = %e, "subscriber read failed");
                }
                continue;
            }
        };
        dispatch_frame(address, frame, &mut subscriptions, strict_decode).await;
    }
    debug!(address = %address, "subscriber loop exited");
}

async fn dispatch_frame(
    address: Address,
    frame: BytesMut,
    subscriptions: &mut [(String, SubHandler)],
    strict_decode: bool,
) {
    let (topic, payload) = match decode_frame(address.as_str(), frame) {
        Ok(parts) => parts,
        Err(e) => {
            warn!(address = %address, error = %e, "dropping malformed frame");
            return;
        }
    };
    let matches: Vec<usize> = subscriptions
        .iter()
        .enumerate()
        .filter(|(_, (prefix, _))| topic.starts_with(prefix.as_str()))
        .map(|(i, _)| i)
        .collect();
    if matches.is_empty() {
        return;
    }
    let decoded = if strict_decode {
        Message::decode_strict(&payload)
    } else {
        Message::decode(&payload)
    };
    let message = match decoded {
        Ok(message) => message,
        Err(e) => {
            warn!(address = %address, %topic, error = %e, "dropping undecodable message");
            return;
        }
    };
    for index in matches {
        let handler = &mut subscriptions[index].1;
        handler(message.clone()).await;
    }
}
