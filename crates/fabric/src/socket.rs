// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Low-level socket plumbing shared by every client type.
//!
//! A fabric socket is a TCP or Unix stream carrying length-delimited frames.
//! Each frame is a topic prefix (one length byte + UTF-8 topic, empty for
//! point-to-point links) followed by a JSON message payload. Sockets are
//! owned by exactly one task; concurrency is provided by channels in front
//! of them, never by sharing.

use crate::address::Endpoint;
use crate::error::Error;
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::either::Either;
use tokio_util::sync::CancellationToken;

/// Frames larger than this are rejected as malformed.
const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Attempts made when connecting to a peer that may not have bound yet.
pub const CONNECT_ATTEMPTS: u32 = 50;

/// Base delay of the linear connect back-off schedule.
pub const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// A connected fabric stream over either transport.
pub type FabricStream = Either<TcpStream, UnixStream>;

/// A framed fabric stream.
pub type FrameStream = Framed<FabricStream, LengthDelimitedCodec>;

/// Wraps a connected stream in the fabric's length-delimited codec.
#[must_use]
pub fn frame_stream(stream: FabricStream) -> FrameStream {
    let mut codec = LengthDelimitedCodec::new();
    codec.set_max_frame_length(MAX_FRAME_LENGTH);
    Framed::new(stream, codec)
}

/// A bound fabric listener over either transport.
#[derive(Debug)]
pub enum FabricListener {
    /// TCP listener.
    Tcp(TcpListener),
    /// Unix domain socket listener.
    Ipc(UnixListener),
}

impl FabricListener {
    /// Binds a listener at `endpoint`, replacing any stale IPC socket file.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, Error> {
        match endpoint {
            Endpoint::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port)).await.map_err(|e| {
                    Error::Transport { address: endpoint.to_string(), source: e }
                })?;
                Ok(FabricListener::Tcp(listener))
            }
            Endpoint::Ipc { path } => {
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| Error::Transport {
                        address: endpoint.to_string(),
                        source: e,
                    })?;
                }
                let listener = UnixListener::bind(path).map_err(|e| Error::Transport {
                    address: endpoint.to_string(),
                    source: e,
                })?;
                Ok(FabricListener::Ipc(listener))
            }
        }
    }

    /// Accepts the next inbound connection.
    pub async fn accept(&self) -> io::Result<FabricStream> {
        match self {
            FabricListener::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok(Either::Left(stream))
            }
            FabricListener::Ipc(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Either::Right(stream))
            }
        }
    }
}

/// Connects to `endpoint`, retrying on a linear back-off until the peer has
/// bound, the attempt budget is exhausted, or `cancel` fires.
///
/// Services start in arbitrary order, so the first connect regularly races
/// the binder.
pub async fn connect_with_retry(
    endpoint: &Endpoint,
    cancel: &CancellationToken,
) -> Result<FabricStream, Error> {
    let mut last_error = String::new();
    for attempt in 1..=CONNECT_ATTEMPTS {
        if cancel.is_cancelled() {
            return Err(Error::SocketClosed { address: endpoint.to_string() });
        }
        match connect_once(endpoint).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = e.to_string(),
        }
        let delay = CONNECT_BACKOFF * attempt;
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::SocketClosed { address: endpoint.to_string() });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
    Err(Error::ConnectFailed {
        address: endpoint.to_string(),
        attempts: CONNECT_ATTEMPTS,
        details: last_error,
    })
}

async fn connect_once(endpoint: &Endpoint) -> io::Result<FabricStream> {
    match endpoint {
        Endpoint::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            stream.set_nodelay(true)?;
            Ok(Either::Left(stream))
        }
        Endpoint::Ipc { path } => {
            let stream = UnixStream::connect(path).await?;
            Ok(Either::Right(stream))
        }
    }
}

/// Encodes a topic-prefixed frame.
///
/// Layout: `[topic_len: u8][topic bytes][payload]`. Point-to-point links use
/// an empty topic.
#[must_use]
pub fn encode_frame(topic: &str, payload: &[u8]) -> Bytes {
    debug_assert!(topic.len() <= u8::MAX as usize, "topic too long: {topic}");
    let mut buf = BytesMut::with_capacity(1 + topic.len() + payload.len());
    buf.put_u8(topic.len() as u8);
    buf.put_slice(topic.as_bytes());
    buf.put_slice(payload);
    buf.freeze()
}

/// Splits a frame into its topic prefix and payload.
pub fn decode_frame(address: &str, mut frame: BytesMut) -> Result<(String, Bytes), Error> {
    if frame.is_empty() {
        return Err(Error::MalformedFrame {
            address: address.to_string(),
            details: "empty frame".to_string(),
        });
    }
    let topic_len = frame[0] as usize;
    if frame.len() < 1 + topic_len {
        return Err(Error::MalformedFrame {
            address: address.to_string(),
            details: format!("truncated topic: want {topic_len} bytes"),
        });
    }
    let _ = frame.split_to(1);
    let topic_bytes = frame.split_to(topic_len);
    let topic = String::from_utf8(topic_bytes.to_vec()).map_err(|_| Error::MalformedFrame {
        address: address.to_string(),
        details: "topic is not UTF-8".to_string(),
    })?;
    Ok((topic, frame.freeze()))
}
