// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! PUSH and PULL clients.
//!
//! PUSH load-balances frames across connected pullers (bind mode) or feeds a
//! single peer (connect mode). A full outbound queue models ZMQ's `EAGAIN`:
//! sends retry on a bounded linear back-off before surfacing a
//! communication error. PULL merges one or many producers and hands
//! messages to the owning service in arrival order per producer.

use crate::address::{Address, Endpoint};
use crate::error::Error;
use crate::socket::{
    FabricListener, FrameStream, connect_with_retry, decode_frame, encode_frame, frame_stream,
};
use aiperf_messages::Message;
use bytes::Bytes;
use futures::SinkExt;
use futures::stream::{SelectAll, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry schedule for sends that hit a full queue.
#[derive(Debug, Clone, Copy)]
pub struct SendRetryPolicy {
    /// Maximum retry attempts before surfacing an error.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `n * backoff` (linear).
    pub backoff: Duration,
}

impl Default for SendRetryPolicy {
    fn default() -> Self {
        Self { max_retries: 5, backoff: Duration::from_millis(20) }
    }
}

/// Pushing side of a PUSH/PULL link.
pub struct PushClient {
    address: Address,
    tx: mpsc::Sender<Bytes>,
    retry: SendRetryPolicy,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PushClient {
    /// Connects a producer to a bound consumer or proxy frontend.
    pub async fn connect(
        address: Address,
        endpoint: &Endpoint,
        queue_depth: usize,
        retry: SendRetryPolicy,
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
                                warn!(address = %address, error = %e, "push failed; peer closed");
                            }
                            break;
                        }
                    }
                }
            }
        });
        Ok(Self { address, tx, retry, cancel, task: Some(task) })
    }

    /// Binds at `address` and load-balances frames across connecting pullers.
    ///
    /// Used where a single producer binds and consumers connect (credit
    /// drops to the worker pool).
    pub async fn bind(
        address: Address,
        endpoint: &Endpoint,
        queue_depth: usize,
        retry: SendRetryPolicy,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let listener = FabricListener::bind(endpoint).await?;
        let (tx, mut rx) = mpsc::channel::<Bytes>(queue_depth.max(1));
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let mut sinks: Vec<FrameStream> = Vec::new();
            let mut next = 0usize;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    conn = listener.accept() => {
                        match conn {
                            Ok(stream) => sinks.push(frame_stream(stream)),
                            Err(e) => {
                                if !task_cancel.is_cancelled() {
                                    warn!(address = %address, error = %e, "accept failed");
                                }
                            }
                        }
                    }
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        // Block until at least one puller is connected; the
                        // frame must not be dropped.
                        while sinks.is_empty() {
                            tokio::select! {
                                _ = task_cancel.cancelled() => return,
                                conn = listener.accept() => {
                                    if let Ok(stream) = conn {
                                        sinks.push(frame_stream(stream));
                                    }
                                }
                            }
                        }
                        let mut delivered = false;
                        while !delivered && !sinks.is_empty() {
                            let index = next % sinks.len();
                            next = next.wrapping_add(1);
                            match sinks[index].send(frame.clone()).await {
                                Ok(()) => delivered = true,
                                Err(e) => {
                                    debug!(address = %address, error = %e, "dropping dead puller");
                                    let _ = sinks.remove(index);
                                }
                            }
                        }
                        if !delivered && !task_cancel.is_cancelled() {
                            warn!(address = %address, "frame dropped: no pullers reachable");
                        }
                    }
                }
            }
        });
        Ok(Self { address, tx, retry, cancel, task: Some(task) })
    }

    /// Queues a message for delivery, retrying on a bounded back-off when
    /// the outbound queue is full.
    pub async fn push(&self, message: &Message) -> Result<(), Error> {
        let payload = message.encode().map_err(|e| Error::malformed(self.address.as_str(), e))?;
        let mut frame = encode_frame("", &payload);
        for attempt in 1..=self.retry.max_retries {
            match self.tx.try_send(frame) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(returned)) => {
                    frame = returned;
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                }
                Err(TrySendError::Closed(_)) => {
                    return Err(Error::SocketClosed { address: self.address.to_string() });
                }
            }
        }
        Err(Error::SendRetriesExhausted {
            address: self.address.to_string(),
            attempts: self.retry.max_retries,
        })
    }

    /// Stops the socket task after draining queued frames is abandoned.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Pulling side of a PUSH/PULL link.
pub struct PullClient {
    address: Address,
    rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PullClient {
    /// Connects a consumer to a bound producer or proxy backend.
    pub async fn connect(
        address: Address,
        endpoint: &Endpoint,
        queue_depth: usize,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let stream = connect_with_retry(endpoint, &cancel).await?;
        Ok(Self::start(address, PullSource::Single(frame_stream(stream)), queue_depth, cancel))
    }

    /// Binds at `address` and fans in frames from connecting producers.
    pub async fn bind(
        address: Address,
        endpoint: &Endpoint,
        queue_depth: usize,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let listener = FabricListener::bind(endpoint).await?;
        Ok(Self::start(address, PullSource::Accepting(listener), queue_depth, cancel))
    }

    fn start(
        address: Address,
        source: PullSource,
        queue_depth: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let task_cancel = cancel.clone();
        let task = tokio::spawn(pull_loop(address, source, tx, task_cancel));
        Self { address, rx, cancel, task: Some(task) }
    }

    /// Receives the next message, or `None` once the link is closed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Receives with a deadline.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Message, Error> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(Error::SocketClosed { address: self.address.to_string() }),
            Err(_) => Err(Error::RecvTimeout {
                address: self.address.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Stops the socket task.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

enum PullSource {
    Single(FrameStream),
    Accepting(FabricListener),
}

async fn pull_loop(
    address: Address,
    source: PullSource,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    let mut listener = None;
    let mut streams: SelectAll<FrameStream> = SelectAll::new();
    match source {
        PullSource::Single(stream) => streams.push(stream),
        PullSource::Accepting(l) => listener = Some(l),
    }

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            conn = async {
                match &listener {
                    Some(l) => l.accept().await,
                    None => std::future::pending().await,
                }
            } => {
                match conn {
                    Ok(stream) => streams.push(frame_stream(stream)),
                    Err(e) => {
                        if !cancel.is_cancelled() {
                            warn!(address = %address, error = %e, "accept failed");
                        }
                    }
                }
                continue;
            }
            frame = streams.next(), if !streams.is_empty() => frame,
        };
        let Some(frame) = frame else {
            if listener.is_none() {
                break;
            }
            continue;
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                if !cancel.is_cancelled() {
                    warn!(address = %address, error = %e, "pull read failed");
                }
                continue;
            }
        };
        let message = match decode_frame(address.as_str(), frame)
            .and_then(|(_, payload)| {
                Message::decode(&payload).map_err(|e| Error::malformed(address.as_str(), e))
            }) {
            Ok(message) => message,
            Err(e) => {
                warn!(address = %address, error = %e, "dropping malformed frame");
                continue;
            }
        };
        if tx.send(message).await.is_err() {
            break;
        }
    }
    debug!(address = %address, "pull loop exited");
}
