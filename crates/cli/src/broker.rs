//! Request-interception broker.
//!
//! The protected host rejects requests originating anywhere but the cleared
//! browser session, so the broker never issues its own request. It waits for
//! the application to make one of its own calls to that host, substitutes the
//! caller's payload into the request body before it leaves the browser, and
//! correlates the matching response back by body shape.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, warn};
use underpass::{NavigateOptions, Page, RouteOverrides};
use underpass_protocol::query::{QueryPayload, has_data_payload};
use url::Url;

use crate::config::SiteProfile;
use crate::error::{AppError, Result};

/// Window in which a matching response must be observed.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
/// Bounded commit wait for the traffic-triggering navigation.
const TRIGGER_NAV_TIMEOUT: Duration = Duration::from_secs(15);

/// One caller query waiting for an interceptable request.
#[derive(Debug, Clone)]
pub struct PendingQuery {
	/// Endpoint the swapped request is redirected to.
	pub endpoint: Url,
	/// Body substituted into the intercepted request.
	pub payload: QueryPayload,
	/// When this query gives up.
	pub deadline: Instant,
}

/// Single-slot pending queue.
///
/// The slot doubles as the mutual-exclusion mechanism for query execution:
/// setting an occupied slot fails loudly instead of stomping the in-flight
/// query, so callers must serialize.
#[derive(Clone, Default)]
pub struct PendingSlot {
	inner: Arc<Mutex<Option<PendingQuery>>>,
}

impl PendingSlot {
	pub fn new() -> Self {
		Self::default()
	}

	/// Occupies the slot, failing with [`AppError::QueryInFlight`] when taken.
	pub fn try_set(&self, pending: PendingQuery) -> Result<()> {
		let mut slot = self.inner.lock();
		if slot.is_some() {
			return Err(AppError::QueryInFlight);
		}
		*slot = Some(pending);
		Ok(())
	}

	/// Consumes the pending query, leaving the slot empty.
	pub fn take(&self) -> Option<PendingQuery> {
		self.inner.lock().take()
	}

	/// Empties the slot unconditionally.
	pub fn clear(&self) {
		*self.inner.lock() = None;
	}

	/// Returns whether a query is currently pending.
	pub fn is_occupied(&self) -> bool {
		self.inner.lock().is_some()
	}
}

/// Correlation state for one in-flight query.
///
/// External events drive the transitions: the route rule firing a swap, a
/// response matching, the timer expiring. Illegal transitions keep the
/// current state, which makes late events harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
	Idle,
	AwaitingSwap,
	AwaitingResponse,
	Resolved,
	TimedOut,
}

impl QueryState {
	/// Query dispatched; the slot is set.
	pub fn on_dispatch(self) -> Self {
		match self {
			QueryState::Idle => QueryState::AwaitingSwap,
			other => other,
		}
	}

	/// The route rule swapped a matching request.
	pub fn on_swap(self) -> Self {
		match self {
			QueryState::AwaitingSwap => QueryState::AwaitingResponse,
			other => other,
		}
	}

	/// A response with a data payload matched.
	pub fn on_response(self) -> Self {
		match self {
			QueryState::AwaitingResponse => QueryState::Resolved,
			other => other,
		}
	}

	/// The query window expired.
	pub fn on_timeout(self) -> Self {
		match self {
			QueryState::Resolved => QueryState::Resolved,
			_ => QueryState::TimedOut,
		}
	}

	/// Whether the in-flight query may still make progress.
	pub fn is_terminal(self) -> bool {
		matches!(self, QueryState::Resolved | QueryState::TimedOut)
	}
}

/// Shared per-call state between the route rule and the observer loop.
type StateCell = Arc<Mutex<QueryState>>;

/// Injects caller queries into the application's outgoing traffic.
pub struct InterceptionBroker {
	slot: PendingSlot,
	timeout: Duration,
}

impl Default for InterceptionBroker {
	fn default() -> Self {
		Self::new()
	}
}

impl InterceptionBroker {
	pub fn new() -> Self {
		Self::with_timeout(QUERY_TIMEOUT)
	}

	/// Broker with an explicit query window, for tests and impatient callers.
	pub fn with_timeout(timeout: Duration) -> Self {
		Self {
			slot: PendingSlot::new(),
			timeout,
		}
	}

	/// Returns the pending slot, for instrumentation.
	pub fn slot(&self) -> &PendingSlot {
		&self.slot
	}

	/// Executes one query through the page's own traffic.
	pub async fn execute(&self, page: &Page, profile: &SiteProfile, query: &str, variables: Map<String, Value>) -> Result<Value> {
		let host = profile
			.api_endpoint
			.host_str()
			.ok_or_else(|| AppError::InvalidConfig("api endpoint has no host".to_string()))?
			.to_string();

		let deadline = Instant::now() + self.timeout;
		self.slot.try_set(PendingQuery {
			endpoint: profile.api_endpoint.clone(),
			payload: QueryPayload::new(query, variables),
			deadline,
		})?;

		let state: StateCell = Arc::new(Mutex::new(QueryState::Idle.on_dispatch()));
		// The watch carries the response-stream fence captured at swap time;
		// `None` means no swap has happened yet.
		let (swap_tx, swap_rx) = watch::channel(None::<u64>);

		let result = self.exchange(page, profile, &host, Arc::clone(&state), swap_tx, swap_rx).await;

		// Single cleanup point: slot emptied (normally consumed by the swap),
		// route subscription and observer dropped with this scope.
		self.slot.clear();
		if result.is_err() {
			let mut state = state.lock();
			*state = state.on_timeout();
		}
		result
	}

	async fn exchange(
		&self,
		page: &Page,
		profile: &SiteProfile,
		host: &str,
		state: StateCell,
		swap_tx: watch::Sender<Option<u64>>,
		mut swap_rx: watch::Receiver<Option<u64>>,
	) -> Result<Value> {
		// One-shot swap rule for requests targeting the protected host; all
		// other traffic passes through untouched.
		let pattern = format!("*://{host}/*");
		let slot = self.slot.clone();
		let route_state = Arc::clone(&state);
		let route_host = host.to_string();
		let route_page = page.clone();
		let _route_sub = page
			.route(&pattern, move |route| {
				let slot = slot.clone();
				let state = Arc::clone(&route_state);
				let swap_tx = swap_tx.clone();
				let host = route_host.clone();
				let page = route_page.clone();
				async move {
					let pending = if host_matches(route.url(), &host) { slot.take() } else { None };
					match pending {
						Some(pending) => {
							debug!(target = "underpass.broker", url = route.url(), "swapping intercepted request body");
							// Fence: every response already forwarded is not
							// ours; dispatch and fan-out share one pump, so
							// the genuine response must sequence after this.
							let fence = page.response_sequence();
							let body = pending.payload.to_body()?;
							route
								.continue_with(RouteOverrides {
									url: Some(pending.endpoint.to_string()),
									post_data: Some(body),
								})
								.await?;
							{
								let mut state = state.lock();
								*state = state.on_swap();
							}
							let _ = swap_tx.send(Some(fence));
							Ok(())
						}
						None => route.resume().await,
					}
				}
			})
			.await?;

		// Observe before triggering so the first response cannot be missed.
		let mut responses = page.responses();

		// Navigation only has to commit; the view's own requests follow.
		page.navigate(&profile.trigger_url, NavigateOptions::commit(TRIGGER_NAV_TIMEOUT)).await?;
		debug!(target = "underpass.broker", url = %profile.trigger_url, "trigger navigation committed");

		let outcome = tokio::time::timeout(
			self.timeout,
			correlate(page, host, &state, &mut responses, &mut swap_rx),
		)
		.await;

		match outcome {
			Ok(result) => result,
			Err(_elapsed) => {
				let swapped = swap_rx.borrow().is_some();
				{
					let mut state = state.lock();
					*state = state.on_timeout();
				}
				if swapped {
					Err(AppError::QueryTimeout {
						ms: self.timeout.as_millis() as u64,
					})
				} else {
					Err(AppError::NoInterceptableCall)
				}
			}
		}
	}
}

/// Matches responses from the protected host by body shape.
///
/// The observer ignores everything until the swap is confirmed; the swap
/// therefore happens-before correlation for this call.
async fn correlate(
	page: &Page,
	host: &str,
	state: &StateCell,
	responses: &mut broadcast::Receiver<underpass::ResponseEvent>,
	swap_rx: &mut watch::Receiver<Option<u64>>,
) -> Result<Value> {
	loop {
		let event = match responses.recv().await {
			Ok(event) => event,
			Err(broadcast::error::RecvError::Lagged(n)) => {
				warn!(target = "underpass.broker", dropped = n, "response observer lagged");
				continue;
			}
			Err(broadcast::error::RecvError::Closed) => {
				return Err(AppError::SessionDead("response observer channel closed".to_string()));
			}
		};

		// Everything at or before the fence predates the swap.
		match *swap_rx.borrow() {
			None => continue,
			Some(fence) if event.seq <= fence => continue,
			Some(_) => {}
		}
		if !host_matches(&event.url, host) {
			continue;
		}

		// Intercepted and background requests share the destination host,
		// so identity is useless; only the body shape distinguishes them.
		let body = match page.response_body(&event.request_id).await {
			Ok(body) => body,
			Err(e) => {
				debug!(target = "underpass.broker", error = %e, "response body unavailable; skipping");
				continue;
			}
		};
		if has_data_payload(&body) {
			let mut state = state.lock();
			*state = state.on_response();
			return Ok(body);
		}
	}
}

/// Compares a URL's host against the protected host.
fn host_matches(url: &str, host: &str) -> bool {
	Url::parse(url).ok().and_then(|u| u.host_str().map(|h| h == host)).unwrap_or(false)
}
