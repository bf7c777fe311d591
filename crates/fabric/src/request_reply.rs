// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! REQUEST (DEALER) and REPLY (ROUTER) clients.
//!
//! Exchanges are correlated by the `request_id` header field. The request
//! client keeps a map from `request_id` to a completion slot; awaiting the
//! returned future is the slot. A missed timeout drops the pending slot, so
//! a late reply is discarded rather than resolving a stale call.

use crate::address::{Address, Endpoint};
use crate::error::Error;
use crate::socket::{
    FabricListener, FrameStream, connect_with_retry, decode_frame, encode_frame, frame_stream,
};
use aiperf_messages::Message;
use bytes::Bytes;
use futures::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>;

/// Requesting side of a REQUEST/REPLY link.
pub struct RequestClient {
    address: Address,
    service_id: String,
    tx: mpsc::Sender<Bytes>,
    pending: PendingMap,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RequestClient {
    /// Connects a requester to a bound replier or proxy frontend.
    pub async fn connect(
        address: Address,
        endpoint: &Endpoint,
        service_id: impl Into<String>,
        queue_depth: usize,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let stream = connect_with_retry(endpoint, &cancel).await?;
        let (mut sink, mut source) = frame_stream(stream).split();
        let (tx, mut rx) = mpsc::channel::<Bytes>(queue_depth.max(1));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let writer_cancel = cancel.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        if sink.send(frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        let reader_cancel = cancel.clone();
        let reader = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    frame = source.next() => frame,
                };
                let Some(Ok(frame)) = frame else { break };
                let message = match decode_frame(address.as_str(), frame).and_then(
                    |(_, payload)| {
                        Message::decode(&payload)
                            .map_err(|e| Error::malformed(address.as_str(), e))
                    },
                ) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(address = %address, error = %e, "dropping malformed reply");
                        continue;
                    }
                };
                let Some(request_id) = message.header().request_id.clone() else {
                    warn!(address = %address, "dropping reply without request_id");
                    continue;
                };
                let slot = reader_pending.lock().remove(&request_id);
                match slot {
                    Some(slot) => {
                        let _ = slot.send(message);
                    }
                    None => {
                        debug!(address = %address, %request_id, "late reply discarded");
                    }
                }
            }
        });

        Ok(Self {
            address,
            service_id: service_id.into(),
            tx,
            pending,
            cancel,
            tasks: vec![writer, reader],
        })
    }

    /// Sends `message` and awaits the correlated reply, or times out.
    ///
    /// A fresh `request_id` is assigned when the header does not carry one.
    pub async fn request(&self, mut message: Message, timeout: Duration) -> Result<Message, Error> {
        let header = message.header_mut();
        if header.service_id.is_empty() {
            header.service_id = self.service_id.clone();
        }
        let request_id = match &header.request_id {
            Some(id) => id.clone(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                header.request_id = Some(id.clone());
                id
            }
        };

        let (slot_tx, slot_rx) = oneshot::channel();
        let _ = self.pending.lock().insert(request_id.clone(), slot_tx);

        let payload = message.encode().map_err(|e| Error::malformed(self.address.as_str(), e))?;
        let frame = encode_frame("", &payload);
        if self.tx.send(frame).await.is_err() {
            let _ = self.pending.lock().remove(&request_id);
            return Err(Error::SocketClosed { address: self.address.to_string() });
        }

        match tokio::time::timeout(timeout, slot_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                let _ = self.pending.lock().remove(&request_id);
                Err(Error::SocketClosed { address: self.address.to_string() })
            }
            Err(_) => {
                let _ = self.pending.lock().remove(&request_id);
                Err(Error::RequestTimeout {
                    address: self.address.to_string(),
                    request_id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Stops both socket tasks; pending slots resolve with errors.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.pending.lock().clear();
    }
}

/// Opaque routing token identifying where a reply must go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyToken {
    conn_id: u64,
    request_id: Option<String>,
}

type ReplySinks = Arc<Mutex<HashMap<u64, mpsc::Sender<Bytes>>>>;

/// Replying side of a REQUEST/REPLY link. Binds and serves many requesters.
pub struct ReplyClient {
    address: Address,
    rx: mpsc::Receiver<(ReplyToken, Message)>,
    sinks: ReplySinks,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReplyClient {
    /// Binds a replier at `address`.
    pub async fn bind(
        address: Address,
        endpoint: &Endpoint,
        queue_depth: usize,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let listener = FabricListener::bind(endpoint).await?;
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let sinks: ReplySinks = Arc::new(Mutex::new(HashMap::new()));
        let task_sinks = Arc::clone(&sinks);
        let task_cancel = cancel.clone();
        let task =
            tokio::spawn(reply_accept_loop(address, listener, tx, task_sinks, task_cancel));
        Ok(Self { address, rx, sinks, cancel, task: Some(task) })
    }

    /// Connects a replier to a proxy backend; requests arrive load-balanced
    /// from the dealer-router proxy over this single stream.
    pub async fn connect(
        address: Address,
        endpoint: &Endpoint,
        queue_depth: usize,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let stream = connect_with_retry(endpoint, &cancel).await?;
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let sinks: ReplySinks = Arc::new(Mutex::new(HashMap::new()));
        let conn_id = 0u64;
        let (sink, source) = frame_stream(stream).split();
        let (sink_tx, sink_rx) = mpsc::channel::<Bytes>(queue_depth.max(1));
        let _ = sinks.lock().insert(conn_id, sink_tx);
        let _ = tokio::spawn(reply_writer(sink, sink_rx));
        let reader_sinks = Arc::clone(&sinks);
        let reader_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            reply_reader(address, conn_id, source, tx, reader_cancel).await;
            let _ = reader_sinks.lock().remove(&conn_id);
        });
        Ok(Self { address, rx, sinks, cancel, task: Some(task) })
    }

    /// Waits for the next request.
    pub async fn wait_for_request(&mut self) -> Option<(ReplyToken, Message)> {
        self.rx.recv().await
    }

    /// Sends `reply` back to the requester identified by `token`.
    pub async fn respond(&self, token: &ReplyToken, mut reply: Message) -> Result<(), Error> {
        reply.header_mut().request_id = token.request_id.clone();
        let payload = reply.encode().map_err(|e| Error::malformed(self.address.as_str(), e))?;
        let frame = encode_frame("", &payload);
        let sink = self.sinks.lock().get(&token.conn_id).cloned();
        match sink {
            Some(sink) => sink
                .send(frame)
                .await
                .map_err(|_| Error::SocketClosed { address: self.address.to_string() }),
            None => Err(Error::SocketClosed { address: self.address.to_string() }),
        }
    }

    /// Stops all connection tasks.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.sinks.lock().clear();
    }
}

async fn reply_accept_loop(
    address: Address,
    listener: FabricListener,
    tx: mpsc::Sender<(ReplyToken, Message)>,
    sinks: ReplySinks,
    cancel: CancellationToken,
) {
    let mut next_conn_id: u64 = 0;
    loop {
        let conn = tokio::select! {
            _ = cancel.cancelled() => break,
            conn = listener.accept() => conn,
        };
        let stream = match conn {
            Ok(stream) => stream,
            Err(e) => {
                if !cancel.is_cancelled() {
                    warn!(address = %address, error = %e, "accept failed");
                }
                continue;
            }
        };
        let conn_id = next_conn_id;
        next_conn_id += 1;
        let (sink, source) = frame_stream(stream).split();
        let (sink_tx, sink_rx) = mpsc::channel::<Bytes>(64);
        let _ = sinks.lock().insert(conn_id, sink_tx);
        let _ = tokio::spawn(reply_writer(sink, sink_rx));
        let conn_tx = tx.clone();
        let conn_sinks = Arc::clone(&sinks);
        let conn_cancel = cancel.clone();
        let _ = tokio::spawn(async move {
            reply_reader(address, conn_id, source, conn_tx, conn_cancel).await;
            let _ = conn_sinks.lock().remove(&conn_id);
        });
    }
}

async fn reply_writer(
    mut sink: SplitSink<FrameStream, Bytes>,
    mut rx: mpsc::Receiver<Bytes>,
) {
    while let Some(frame) = rx.recv().await {
        if sink.send(frame).await.is_err() {
            break;
        }
    }
}

async fn reply_reader(
    address: Address,
    conn_id: u64,
    mut source: futures::stream::SplitStream<FrameStream>,
    tx: mpsc::Sender<(ReplyToken, Message)>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = source.next() => frame,
        };
        let Some(Ok(frame)) = frame else { break };
        let message = match decode_frame(address.as_str(), frame).and_then(|(_, payload)| {
            Message::decode(&payload).map_err(|e| Error::malformed(address.as_str(), e))
        }) {
            Ok(message) => message,
            Err(e) => {
                warn!(address = %address, error = %e, "dropping malformed request");
                continue;
            }
        };
        let token = ReplyToken { conn_id, request_id: message.header().request_id.clone() };
        if tx.send((token, message)).await.is_err() {
            break;
        }
    }
}
