// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound websocket transport.
//!
//! Wraps a `tokio-tungstenite` client: connect with a handshake deadline,
//! one binary websocket message per [`WsTransport::send`], and a reader
//! task that surfaces inbound payloads plus close/error lifecycle events
//! on a channel. Text frames from the remote (should not happen in normal
//! operation) are converted to their UTF-8 bytes so the decoder always
//! sees a uniform byte stream.

mod reassembly;

pub use reassembly::MessageAssembler;

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default deadline for the TCP/HTTP upgrade.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the inbound event channel handed to the receive pump.
const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle events delivered to the receive pump.
#[derive(Debug)]
pub enum TransportEvent {
    /// One complete inbound message.
    Message(Vec<u8>),
    /// The remote closed the connection (or the stream ended).
    Closed { code: Option<u16>, reason: String },
    /// The socket failed.
    Error(String),
}

/// An open websocket to a Core.
pub struct WsTransport {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

impl WsTransport {
    /// Open a websocket to `url`, failing if the handshake does not
    /// complete within `handshake_timeout`. Returns the transport plus the
    /// receiver on which inbound messages and lifecycle events arrive.
    pub async fn connect(
        url: &str,
        handshake_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), Error> {
        let (stream, _response) = tokio::time::timeout(handshake_timeout, connect_async(url))
            .await
            .map_err(|_| Error::ConnectTimeout(handshake_timeout))?
            .map_err(|e| Error::Connect(e.to_string()))?;

        log::debug!("[ws] connected to {url}");

        let (sink, stream) = stream.split();
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let reader = tokio::spawn(read_loop(stream, tx));

        Ok((Self { sink, reader }, rx))
    }

    /// Send one outbound binary websocket message. The transport never
    /// fragments outbound frames.
    pub async fn send(&mut self, bytes: Vec<u8>) -> Result<(), String> {
        self.sink
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| e.to_string())
    }

    /// Graceful close: emit a close frame and flush.
    pub async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }

    /// Immediate teardown: stop the reader without a close handshake.
    pub fn abort(&self) {
        self.reader.abort();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Reader task: reassemble inbound fragments and forward lifecycle events.
async fn read_loop(mut stream: SplitStream<WsStream>, tx: mpsc::Sender<TransportEvent>) {
    let mut assembler = MessageAssembler::new();
    let mut signalled = false;

    while let Some(item) = stream.next().await {
        match item {
            Ok(Message::Binary(data)) => {
                if let Some(buf) = assembler.push(&data, true) {
                    if tx.send(TransportEvent::Message(buf)).await.is_err() {
                        return;
                    }
                }
            }
            Ok(Message::Text(text)) => {
                // Uniform byte stream for the decoder.
                if let Some(buf) = assembler.push(text.as_bytes(), true) {
                    if tx.send(TransportEvent::Message(buf)).await.is_err() {
                        return;
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                let (code, reason) = match frame {
                    Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                    None => (None, String::new()),
                };
                log::debug!("[ws] close frame received code={code:?} reason={reason:?}");
                let _ = tx.send(TransportEvent::Closed { code, reason }).await;
                signalled = true;
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // tungstenite answers pings itself.
            }
            Ok(Message::Frame(_)) => {
                // Raw frames are not surfaced in normal reads.
            }
            Err(err) => {
                log::debug!("[ws] read error: {err}");
                let _ = tx.send(TransportEvent::Error(err.to_string())).await;
                signalled = true;
                break;
            }
        }
    }

    if !signalled {
        // Stream ended without a close frame.
        let _ = tx
            .send(TransportEvent::Closed {
                code: None,
                reason: "connection closed".to_string(),
            })
            .await;
    }
}
