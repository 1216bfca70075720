//! [`Page`] represents an attached page target on the endpoint.

mod eval;
mod input;
mod routing;
mod waiting;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use underpass_runtime::{Connection, Error, Result};

use crate::Route;
use crate::handlers::HandlerMap;

/// Capacity of the per-page response broadcast channel.
const RESPONSE_CHANNEL_CAPACITY: usize = 256;

/// A page target attached over the endpoint connection.
///
/// Cloning is cheap; clones share the same target session, route handlers and
/// interception state.
#[derive(Clone)]
pub struct Page {
	connection: Arc<Connection>,
	session_id: Arc<str>,
	target_id: Arc<str>,
	/// Last URL this handle navigated to (event-driven URL tracking is not
	/// needed; callers that care about the live location use [`Self::location`]).
	url: Arc<RwLock<String>>,
	/// Route handlers for request interception.
	route_handlers: HandlerMap<Route>,
	/// Set once interception domains are enabled; makes reinstall idempotent.
	interception_installed: Arc<AtomicBool>,
	/// Fan-out of responses observed from the page's traffic.
	response_tx: broadcast::Sender<ResponseEvent>,
	/// Monotonic sequence of forwarded responses; route dispatch and response
	/// fan-out are serialized by the pump, so the sequence totally orders
	/// responses against route handler completions.
	response_seq: Arc<AtomicU64>,
	/// Event pump task driving route dispatch and response fan-out.
	pump: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// A response observed on the page's network traffic.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
	/// Position in the page's response stream, starting at 1.
	pub seq: u64,
	/// Endpoint-assigned request identifier, usable with [`Page::response_body`].
	pub request_id: String,
	/// Response URL.
	pub url: String,
	/// HTTP status code.
	pub status: u16,
}

/// When a navigation is considered done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitUntil {
	/// Navigation committed; the document may still be loading.
	Commit,
	/// The load event fired.
	#[default]
	Load,
}

/// Options for [`Page::navigate`].
#[derive(Debug, Clone, Default)]
pub struct NavigateOptions {
	/// Maximum navigation time.
	pub timeout: Option<std::time::Duration>,
	/// When to consider the navigation succeeded.
	pub wait_until: WaitUntil,
}

impl NavigateOptions {
	/// Commit-only navigation with the given timeout.
	pub fn commit(timeout: std::time::Duration) -> Self {
		Self {
			timeout: Some(timeout),
			wait_until: WaitUntil::Commit,
		}
	}
}

impl Page {
	pub(crate) fn attached(connection: Arc<Connection>, session_id: &str, target_id: &str, url: &str) -> Self {
		let (response_tx, _) = broadcast::channel(RESPONSE_CHANNEL_CAPACITY);
		Self {
			connection,
			session_id: Arc::from(session_id),
			target_id: Arc::from(target_id),
			url: Arc::new(RwLock::new(url.to_string())),
			route_handlers: Arc::new(Mutex::new(indexmap::IndexMap::new())),
			interception_installed: Arc::new(AtomicBool::new(false)),
			response_tx,
			response_seq: Arc::new(AtomicU64::new(0)),
			pump: Arc::new(Mutex::new(None)),
		}
	}

	/// Sequence number of the most recently forwarded response.
	///
	/// Read from inside a route handler, this fences off every response that
	/// was observed before the handler ran.
	pub fn response_sequence(&self) -> u64 {
		self.response_seq.load(Ordering::SeqCst)
	}

	pub(crate) fn next_response_sequence(&self) -> u64 {
		self.response_seq.fetch_add(1, Ordering::SeqCst) + 1
	}

	pub(crate) fn connection(&self) -> &Arc<Connection> {
		&self.connection
	}

	pub(crate) fn session_id(&self) -> &Arc<str> {
		&self.session_id
	}

	pub(crate) fn response_sender(&self) -> &broadcast::Sender<ResponseEvent> {
		&self.response_tx
	}

	/// Sends a session-scoped command to the endpoint.
	pub(crate) async fn send(&self, method: &str, params: Value) -> Result<Value> {
		self.connection.send_command(method, Some(&self.session_id), params).await
	}

	/// Returns the URL this handle last navigated to.
	pub fn url(&self) -> String {
		self.url.read().unwrap_or_else(|e| e.into_inner()).clone()
	}

	/// Navigates to `url`.
	pub async fn navigate(&self, url: &str, options: NavigateOptions) -> Result<()> {
		let timeout = options.timeout.unwrap_or(std::time::Duration::from_millis(underpass_protocol::DEFAULT_TIMEOUT_MS));

		// Subscribe before issuing the command so the load event cannot slip
		// between the navigate response and the wait.
		let mut events = self.connection.events();

		let result = tokio::time::timeout(timeout, self.send("Page.navigate", json!({ "url": url })))
			.await
			.map_err(|_| Error::Timeout(format!("navigating to {url}")))??;

		if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
			if !error_text.is_empty() {
				return Err(Error::ProtocolError(format!("navigation to {url} failed: {error_text}")));
			}
		}

		if let Ok(mut current) = self.url.write() {
			*current = url.to_string();
		}

		if options.wait_until == WaitUntil::Commit {
			return Ok(());
		}

		tokio::time::timeout(timeout, async {
			loop {
				match events.recv().await {
					Ok(event) if event.method == "Page.loadEventFired" && event.session_id.as_deref() == Some(self.session_id.as_ref()) => {
						return Ok(());
					}
					Ok(_) => continue,
					Err(broadcast::error::RecvError::Lagged(n)) => {
						tracing::warn!(target = "underpass.page", dropped = n, "event receiver lagged during navigation");
					}
					Err(broadcast::error::RecvError::Closed) => return Err(Error::ChannelClosed),
				}
			}
		})
		.await
		.map_err(|_| Error::Timeout(format!("waiting for load of {url}")))?
	}

	/// Reads the page's live location.
	pub async fn location(&self) -> Result<String> {
		let href: String = self.evaluate_typed("window.location.href").await?;
		if let Ok(mut current) = self.url.write() {
			*current = href.clone();
		}
		Ok(href)
	}

	/// Closes the page target and stops the event pump.
	pub async fn close(&self) -> Result<()> {
		if let Some(pump) = self.pump.lock().take() {
			pump.abort();
		}
		self.connection
			.send_command("Target.closeTarget", None, json!({ "targetId": self.target_id.as_ref() }))
			.await?;
		Ok(())
	}
}

impl std::fmt::Debug for Page {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Page").field("target_id", &self.target_id).field("url", &self.url()).finish()
	}
}
