// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Proxy brokers: XPUB/XSUB for the event bus, push-pull for work queues,
//! and dealer-router for dataset requests.
//!
//! Each proxy owns both bound listeners and runs as a single task; peers
//! connect from their own schedulers. Dead peers are pruned lazily when a
//! forward to them fails.

use crate::address::{Address, Endpoint};
use crate::error::Error;
use crate::socket::{FabricListener, FrameStream, decode_frame, frame_stream};
use aiperf_messages::Message;
use bytes::{Bytes, BytesMut};
use futures::SinkExt;
use futures::stream::{BoxStream, SelectAll, SplitSink, StreamExt};
use std::collections::HashMap;
use std::io;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type TaggedReader = BoxStream<'static, (u64, Result<BytesMut, io::Error>)>;
type Sinks = HashMap<u64, SplitSink<FrameStream, Bytes>>;

/// Handle to a running proxy task.
pub struct ProxyHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ProxyHandle {
    /// Stops the proxy and closes both listeners.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

fn tag_reader(conn_id: u64, stream: futures::stream::SplitStream<FrameStream>) -> TaggedReader {
    stream.map(move |item| (conn_id, item)).boxed()
}

/// XPUB/XSUB event bus proxy: every frame from any publisher is fanned out
/// to every subscriber; subscribers filter by topic prefix client-side.
pub struct XpubXsubProxy;

impl XpubXsubProxy {
    /// Binds `frontend` (publishers connect) and `backend` (subscribers
    /// connect) and starts forwarding.
    pub async fn start(
        frontend: (Address, Endpoint),
        backend: (Address, Endpoint),
        cancel: CancellationToken,
    ) -> Result<ProxyHandle, Error> {
        let front_listener = FabricListener::bind(&frontend.1).await?;
        let back_listener = FabricListener::bind(&backend.1).await?;
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let mut readers: SelectAll<TaggedReader> = SelectAll::new();
            let mut subscribers: Sinks = HashMap::new();
            let mut next_conn: u64 = 0;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    conn = front_listener.accept() => {
                        if let Ok(stream) = conn {
                            let (_, source) = frame_stream(stream).split();
                            readers.push(tag_reader(next_conn, source));
                            next_conn += 1;
                        }
                    }
                    conn = back_listener.accept() => {
                        if let Ok(stream) = conn {
                            let (sink, _) = frame_stream(stream).split();
                            let _ = subscribers.insert(next_conn, sink);
                            next_conn += 1;
                        }
                    }
                    item = readers.next(), if !readers.is_empty() => {
                        let Some((_, Ok(frame))) = item else { continue };
                        let frame = frame.freeze();
                        let mut dead = Vec::new();
                        for (id, sink) in subscribers.iter_mut() {
                            if sink.send(frame.clone()).await.is_err() {
                                dead.push(*id);
                            }
                        }
                        for id in dead {
                            debug!(conn = id, "pruning dead subscriber");
                            let _ = subscribers.remove(&id);
                        }
                    }
                }
            }
        });
        Ok(ProxyHandle { cancel, task: Some(task) })
    }
}

/// Push-pull work queue proxy: frames from producers are load-balanced
/// round-robin across consumers.
pub struct PushPullProxy;

impl PushPullProxy {
    /// Binds `frontend` (producers connect) and `backend` (consumers
    /// connect) and starts forwarding.
    pub async fn start(
        frontend: (Address, Endpoint),
        backend: (Address, Endpoint),
        cancel: CancellationToken,
    ) -> Result<ProxyHandle, Error> {
        let front_listener = FabricListener::bind(&frontend.1).await?;
        let back_listener = FabricListener::bind(&backend.1).await?;
        let address = frontend.0;
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let mut readers: SelectAll<TaggedReader> = SelectAll::new();
            let mut consumers: Sinks = HashMap::new();
            let mut order: Vec<u64> = Vec::new();
            let mut next_conn: u64 = 0;
            let mut rr: usize = 0;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    conn = front_listener.accept() => {
                        if let Ok(stream) = conn {
                            let (_, source) = frame_stream(stream).split();
                            readers.push(tag_reader(next_conn, source));
                            next_conn += 1;
                        }
                    }
                    conn = back_listener.accept() => {
                        if let Ok(stream) = conn {
                            let (sink, _) = frame_stream(stream).split();
                            let _ = consumers.insert(next_conn, sink);
                            order.push(next_conn);
                            next_conn += 1;
                        }
                    }
                    item = readers.next(), if !readers.is_empty() => {
                        let Some((_, Ok(frame))) = item else { continue };
                        let frame = frame.freeze();
                        // Hold the frame until a consumer exists; work must
                        // not be dropped while the fleet is starting.
                        while order.is_empty() {
                            tokio::select! {
                                _ = task_cancel.cancelled() => return,
                                conn = back_listener.accept() => {
                                    if let Ok(stream) = conn {
                                        let (sink, _) = frame_stream(stream).split();
                                        let _ = consumers.insert(next_conn, sink);
                                        order.push(next_conn);
                                        next_conn += 1;
                                    }
                                }
                            }
                        }
                        let mut delivered = false;
                        while !delivered && !order.is_empty() {
                            let index = rr % order.len();
                            rr = rr.wrapping_add(1);
                            let id = order[index];
                            let failed = match consumers.get_mut(&id) {
                                Some(sink) => sink.send(frame.clone()).await.is_err(),
                                None => true,
                            };
                            if failed {
                                let _ = consumers.remove(&id);
                                let _ = order.remove(index);
                            } else {
                                delivered = true;
                            }
                        }
                        if !delivered && !task_cancel.is_cancelled() {
                            warn!(address = %address, "frame dropped: no consumers reachable");
                        }
                    }
                }
            }
        });
        Ok(ProxyHandle { cancel, task: Some(task) })
    }
}

/// Dealer-router proxy for request/reply traffic: requests are load-balanced
/// across repliers; replies are routed back by `request_id`.
pub struct DealerRouterProxy;

impl DealerRouterProxy {
    /// Binds `frontend` (requesters connect) and `backend` (repliers
    /// connect) and starts forwarding.
    pub async fn start(
        frontend: (Address, Endpoint),
        backend: (Address, Endpoint),
        cancel: CancellationToken,
    ) -> Result<ProxyHandle, Error> {
        let front_listener = FabricListener::bind(&frontend.1).await?;
        let back_listener = FabricListener::bind(&backend.1).await?;
        let address = frontend.0;
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let mut front_readers: SelectAll<TaggedReader> = SelectAll::new();
            let mut back_readers: SelectAll<TaggedReader> = SelectAll::new();
            let mut requesters: Sinks = HashMap::new();
            let mut repliers: Sinks = HashMap::new();
            let mut replier_order: Vec<u64> = Vec::new();
            let mut routes: HashMap<String, u64> = HashMap::new();
            let mut next_conn: u64 = 0;
            let mut rr: usize = 0;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    conn = front_listener.accept() => {
                        if let Ok(stream) = conn {
                            let (sink, source) = frame_stream(stream).split();
                            let _ = requesters.insert(next_conn, sink);
                            front_readers.push(tag_reader(next_conn, source));
                            next_conn += 1;
                        }
                    }
                    conn = back_listener.accept() => {
                        if let Ok(stream) = conn {
                            let (sink, source) = frame_stream(stream).split();
                            let _ = repliers.insert(next_conn, sink);
                            replier_order.push(next_conn);
                            back_readers.push(tag_reader(next_conn, source));
                            next_conn += 1;
                        }
                    }
                    item = front_readers.next(), if !front_readers.is_empty() => {
                        let Some((conn_id, Ok(frame))) = item else { continue };
                        if let Some(request_id) = peek_request_id(address, &frame) {
                            let _ = routes.insert(request_id, conn_id);
                        }
                        let frame = frame.freeze();
                        // Hold the request until a replier exists; the
                        // requester's timeout bounds the overall wait.
                        while replier_order.is_empty() {
                            tokio::select! {
                                _ = task_cancel.cancelled() => return,
                                conn = back_listener.accept() => {
                                    if let Ok(stream) = conn {
                                        let (sink, source) = frame_stream(stream).split();
                                        let _ = repliers.insert(next_conn, sink);
                                        replier_order.push(next_conn);
                                        back_readers.push(tag_reader(next_conn, source));
                                        next_conn += 1;
                                    }
                                }
                            }
                        }
                        let mut delivered = false;
                        while !delivered && !replier_order.is_empty() {
                            let index = rr % replier_order.len();
                            rr = rr.wrapping_add(1);
                            let id = replier_order[index];
                            let failed = match repliers.get_mut(&id) {
                                Some(sink) => sink.send(frame.clone()).await.is_err(),
                                None => true,
                            };
                            if failed {
                                let _ = repliers.remove(&id);
                                let _ = replier_order.remove(index);
                            } else {
                                delivered = true;
                            }
                        }
                        if !delivered && !task_cancel.is_cancelled() {
                            warn!(address = %address, "request dropped: no repliers reachable");
                        }
                    }
                    item = back_readers.next(), if !back_readers.is_empty() => {
                        let Some((_, Ok(frame))) = item else { continue };
                        let Some(request_id) = peek_request_id(address, &frame) else {
                            warn!(address = %address, "reply without request_id dropped");
                            continue;
                        };
                        let Some(front_id) = routes.remove(&request_id) else {
                            debug!(address = %address, %request_id, "reply with unknown route");
                            continue;
                        };
                        let frame = frame.freeze();
                        let failed = match requesters.get_mut(&front_id) {
                            Some(sink) => sink.send(frame).await.is_err(),
                            None => true,
                        };
                        if failed {
                            let _ = requesters.remove(&front_id);
                        }
                    }
                }
            }
        });
        Ok(ProxyHandle { cancel, task: Some(task) })
    }
}

fn peek_request_id(address: Address, frame: &BytesMut) -> Option<String> {
    let (_, payload) = decode_frame(address.as_str(), frame.clone()).ok()?;
    let message = Message::decode(&payload).ok()?;
    message.header().request_id.clone()
}
