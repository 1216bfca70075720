//! Command/response correlation layer on top of the transport.
//!
//! Message flow:
//!
//! 1. A caller invokes [`Connection::send_command`] with method, session and
//!    params.
//! 2. The connection allocates a unique ID and registers a oneshot callback.
//! 3. The command is queued to the writer task and sent over the transport.
//! 4. The dispatch loop receives inbound messages, correlates responses by ID
//!    and broadcasts events to subscribers.
//! 5. When the transport closes, every outstanding callback fails with
//!    [`Error::ChannelClosed`] so callers observe session death promptly.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use underpass_protocol::{Command, Event, Message, RemoteError};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts};

/// Pending command callbacks keyed by command ID.
type CallbackMap = Arc<Mutex<HashMap<u32, oneshot::Sender<Result<Value>>>>>;

/// Capacity of the event broadcast channel.
///
/// Interception traffic is bursty; subscribers that lag past this many events
/// observe a `Lagged` error and resubscribe.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// RAII guard removing a pending callback when a command future is dropped.
struct CancelGuard {
    id: u32,
    callbacks: CallbackMap,
    completed: bool,
}

impl CancelGuard {
    fn new(id: u32, callbacks: CallbackMap) -> Self {
        Self {
            id,
            callbacks,
            completed: false,
        }
    }

    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if self.callbacks.lock().remove(&self.id).is_some() {
            tracing::debug!(target = "underpass.connection", id = self.id, "removed orphaned callback");
        }
    }
}

/// Correlating connection to the automation endpoint.
///
/// Uses sequential command IDs and oneshot channels for correlation; events
/// fan out over a broadcast channel.
pub struct Connection {
    /// Set once the dispatch loop has ended; later commands fail fast.
    closed: AtomicBool,
    /// Sequential command ID counter.
    last_id: AtomicU32,
    /// Pending command callbacks keyed by command ID.
    callbacks: CallbackMap,
    /// Channel for queueing outbound messages to the writer task.
    outbound_tx: mpsc::UnboundedSender<Value>,
    /// Event fan-out to subscribers.
    event_tx: broadcast::Sender<Event>,
    /// Transport sender (taken by `run()` to start the writer task).
    sender: TokioMutex<Option<Box<dyn Transport>>>,
    /// Inbound messages from the transport (taken by `run()`).
    message_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Value>>>,
    /// Outbound queue receiver (taken by `run()`).
    outbound_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Value>>>,
}

impl Connection {
    /// Creates a connection over split transport parts.
    pub fn new(parts: TransportParts) -> Self {
        let TransportParts { sender, message_rx } = parts;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            closed: AtomicBool::new(false),
            last_id: AtomicU32::new(0),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            outbound_tx,
            event_tx,
            sender: TokioMutex::new(Some(sender)),
            message_rx: TokioMutex::new(Some(message_rx)),
            outbound_rx: TokioMutex::new(Some(outbound_rx)),
        }
    }

    /// Returns a new subscription to endpoint events.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Sends a command to the endpoint and awaits its response.
    pub async fn send_command(
        &self,
        method: &str,
        session_id: Option<&str>,
        params: Value,
    ) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ChannelClosed);
        }
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;

        let (tx, rx) = oneshot::channel();
        self.callbacks.lock().insert(id, tx);
        let mut guard = CancelGuard::new(id, Arc::clone(&self.callbacks));

        let command = Command {
            id,
            method: method.to_string(),
            params,
            session_id: session_id.map(str::to_string),
        };

        tracing::trace!(target = "underpass.connection", id, method, "sending command");

        if self.outbound_tx.send(serde_json::to_value(&command)?).is_err() {
            return Err(Error::ChannelClosed);
        }

        let result = rx.await;
        guard.complete();
        result.map_err(|_| Error::ChannelClosed).and_then(|r| r)
    }

    /// Runs the dispatch loop until the transport closes.
    ///
    /// Must be called exactly once, from a spawned task.
    pub async fn run(self: Arc<Self>) {
        let mut sender = self
            .sender
            .lock()
            .await
            .take()
            .expect("run() can only be called once - sender already taken");
        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .await
            .take()
            .expect("run() can only be called once - outbound receiver already taken");
        let mut message_rx = self
            .message_rx
            .lock()
            .await
            .take()
            .expect("run() can only be called once - message receiver already taken");

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sender.send(message).await {
                    tracing::error!(target = "underpass.connection", error = %e, "transport write error");
                    break;
                }
            }
        });

        while let Some(value) = message_rx.recv().await {
            match serde_json::from_value::<Message>(value) {
                Ok(message) => self.dispatch(message),
                Err(e) => {
                    tracing::error!(target = "underpass.connection", error = %e, "failed to parse message");
                }
            }
        }

        self.closed.store(true, Ordering::SeqCst);
        self.fail_pending(Error::ChannelClosed);
        writer.abort();
    }

    fn dispatch(&self, message: Message) {
        match message {
            Message::Response(response) => {
                let Some(callback) = self.callbacks.lock().remove(&response.id) else {
                    tracing::debug!(
                        target = "underpass.connection",
                        id = response.id,
                        "response for unknown command (ignored)"
                    );
                    return;
                };

                let result = match response.error {
                    Some(error) => Err(classify_remote(error)),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                let _ = callback.send(result);
            }
            Message::Event(event) => {
                tracing::trace!(
                    target = "underpass.connection",
                    method = %event.method,
                    session = event.session_id.as_deref().unwrap_or(""),
                    "event"
                );
                // No receivers is fine; events before anyone subscribes are dropped.
                let _ = self.event_tx.send(event);
            }
            Message::Unknown(value) => {
                tracing::debug!(
                    target = "underpass.connection",
                    message = %value,
                    "unknown message shape (ignored)"
                );
            }
        }
    }

    /// Fails every outstanding callback with a clone-equivalent of `template`.
    fn fail_pending(&self, template: Error) {
        let pending: Vec<_> = {
            let mut callbacks = self.callbacks.lock();
            callbacks.drain().collect()
        };
        if pending.is_empty() {
            return;
        }
        tracing::debug!(
            target = "underpass.connection",
            count = pending.len(),
            "failing outstanding commands: transport closed"
        );
        for (_, callback) in pending {
            let err = match &template {
                Error::ChannelClosed => Error::ChannelClosed,
                other => Error::TransportError(other.to_string()),
            };
            let _ = callback.send(Err(err));
        }
    }
}

/// Converts a remote error payload into a typed kind.
///
/// This is the single place where endpoint message text is inspected; all
/// downstream retry decisions branch on the resulting kind.
fn classify_remote(error: RemoteError) -> Error {
    const CLOSED_MARKERS: [&str; 3] = [
        "Session closed",
        "Target closed",
        "Session with given id not found",
    ];
    if CLOSED_MARKERS.iter().any(|m| error.message.contains(m)) {
        Error::TargetClosed {
            context: error.message,
        }
    } else {
        Error::Remote {
            code: error.code,
            message: error.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PipeTransport;
    use tokio::io::duplex;
    use underpass_protocol::Response;

    fn test_connection() -> (Arc<Connection>, tokio::io::DuplexStream, tokio::io::DuplexStream) {
        let (endpoint_read, local_write) = duplex(4096);
        let (local_read, endpoint_write) = duplex(4096);
        let parts = PipeTransport::split(local_write, local_read);
        (Arc::new(Connection::new(parts)), endpoint_read, endpoint_write)
    }

    #[tokio::test]
    async fn command_ids_start_at_one_and_increment() {
        let (connection, _r, _w) = test_connection();
        assert_eq!(connection.last_id.fetch_add(1, Ordering::SeqCst) + 1, 1);
        assert_eq!(connection.last_id.fetch_add(1, Ordering::SeqCst) + 1, 2);
    }

    #[tokio::test]
    async fn responses_resolve_matching_callbacks() {
        let (connection, _r, _w) = test_connection();

        let (tx, rx) = oneshot::channel();
        connection.callbacks.lock().insert(9, tx);
        connection.dispatch(Message::Response(Response {
            id: 9,
            result: Some(serde_json::json!({"ok": true})),
            error: None,
        }));

        let value = rx.await.unwrap().unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn error_responses_surface_typed_kinds() {
        let (connection, _r, _w) = test_connection();

        let (tx, rx) = oneshot::channel();
        connection.callbacks.lock().insert(2, tx);
        connection.dispatch(Message::Response(Response {
            id: 2,
            result: None,
            error: Some(RemoteError {
                code: -32001,
                message: "Session with given id not found.".to_string(),
            }),
        }));

        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_target_closed(), "expected target-closed, got {err:?}");
    }

    #[tokio::test]
    async fn events_reach_subscribers() {
        let (connection, _r, _w) = test_connection();
        let mut events = connection.events();

        connection.dispatch(Message::Event(Event {
            method: "Network.responseReceived".to_string(),
            params: serde_json::json!({"requestId": "R7"}),
            session_id: Some("S1".to_string()),
        }));

        let event = events.recv().await.unwrap();
        assert_eq!(event.method, "Network.responseReceived");
        assert_eq!(event.params["requestId"], "R7");
    }

    #[tokio::test]
    async fn transport_close_fails_outstanding_commands() {
        let (connection, endpoint_read, endpoint_write) = test_connection();
        let run = tokio::spawn(Arc::clone(&connection).run());

        let pending = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move {
                connection
                    .send_command("Runtime.evaluate", Some("S1"), serde_json::json!({}))
                    .await
            })
        };

        // Wait until the command has registered, then sever the endpoint.
        while connection.callbacks.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        drop(endpoint_read);
        drop(endpoint_write);

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_session_dead(), "expected session death, got {err:?}");
        run.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_commands_remove_their_callbacks() {
        let (connection, _r, _w) = test_connection();

        let fut = connection.send_command("Page.enable", None, serde_json::json!({}));
        {
            // Poll once so the callback registers, then drop the future.
            use std::future::Future;
            let mut pinned = Box::pin(fut);
            let waker = futures_util::task::noop_waker();
            let mut cx = std::task::Context::from_waker(&waker);
            let _ = pinned.as_mut().poll(&mut cx);
        }
        assert!(connection.callbacks.lock().is_empty());
    }

    #[test]
    fn remote_classification_maps_closed_markers() {
        let closed = classify_remote(RemoteError {
            code: -32000,
            message: "Target closed.".to_string(),
        });
        assert!(closed.is_target_closed());

        let other = classify_remote(RemoteError {
            code: -32000,
            message: "Cannot find node with given id".to_string(),
        });
        assert!(matches!(other, Error::Remote { code: -32000, .. }));
    }
}
