//! Byte transports framing JSON messages to and from the endpoint.
//!
//! A transport is split at construction: the sender half is handed to the
//! [`Connection`](crate::Connection) writer task, the reader half runs as a
//! background task feeding parsed messages into an unbounded channel. Dropping
//! the reader's sender closes that channel, which is how the connection
//! observes endpoint death.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::{Error, Result};

/// Sender half of a split transport.
pub trait Transport: Send {
    /// Sends one JSON message to the endpoint.
    fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>>;
}

/// A split transport: the boxed sender plus the inbound message channel.
pub struct TransportParts {
    /// Sender half, consumed by the connection writer task.
    pub sender: Box<dyn Transport>,
    /// Parsed inbound messages; closes when the endpoint goes away.
    pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// WebSocket transport for a remote debugger URL.
pub struct WsTransport {
    sink: futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>,
}

impl WsTransport {
    /// Connects to a WebSocket endpoint within `timeout` and splits it.
    pub async fn connect(endpoint: &str, timeout: Duration) -> Result<TransportParts> {
        let (stream, _) = tokio::time::timeout(timeout, connect_async(endpoint))
            .await
            .map_err(|_| Error::Timeout(format!("connecting to {endpoint}")))?
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        let (sink, mut read) = stream.split();
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<Value>(&text) {
                        Ok(value) => {
                            if message_tx.send(value).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(target = "underpass.transport", error = %e, "dropping unparseable frame");
                        }
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(target = "underpass.transport", error = %e, "websocket read error");
                        break;
                    }
                }
            }
            // message_tx drops here; the connection sees a closed channel.
        });

        Ok(TransportParts {
            sender: Box::new(Self { sink }),
            message_rx,
        })
    }
}

impl Transport for WsTransport {
    fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let text = serde_json::to_string(&message)?;
            self.sink
                .send(WsMessage::Text(text))
                .await
                .map_err(|e| Error::TransportError(e.to_string()))
        })
    }
}

/// Newline-delimited JSON transport over arbitrary byte streams.
///
/// Used by tests with in-memory duplex pipes; the framing matches what a
/// local automation endpoint speaks over stdio.
pub struct PipeTransport<W> {
    writer: W,
}

impl<W> PipeTransport<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Splits a writer/reader pair into transport parts.
    pub fn split<R>(writer: W, reader: R) -> TransportParts
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(value) => {
                        if message_tx.send(value).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(target = "underpass.transport", error = %e, "dropping unparseable line");
                    }
                }
            }
        });

        TransportParts {
            sender: Box::new(Self { writer }),
            message_rx,
        }
    }
}

impl<W> Transport for PipeTransport<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(&message)?;
            line.push(b'\n');
            self.writer
                .write_all(&line)
                .await
                .map_err(|e| Error::TransportError(e.to_string()))?;
            self.writer
                .flush()
                .await
                .map_err(|e| Error::TransportError(e.to_string()))
        })
    }
}
