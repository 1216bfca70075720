//! Request interception and response observation for [`Page`].

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use underpass_runtime::Result;

use super::{Page, ResponseEvent};
use crate::Route;
use crate::handlers::{HandlerEntry, HandlerFn, HandlerFuture, Subscription, UrlMatcher, next_handler_id};

impl Page {
	/// Registers a route handler for request interception.
	///
	/// When an outgoing request URL matches the glob `pattern`, the handler
	/// receives a [`Route`] that can resume the request untouched or continue
	/// it with replaced fields. Returns a [`Subscription`] that unregisters
	/// the handler when dropped. The first registration installs the
	/// interception domains on the endpoint; reinstallation is a no-op.
	pub async fn route<F, Fut>(&self, pattern: &str, handler: F) -> Result<Subscription>
	where
		F: Fn(Route) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		let id = next_handler_id();
		let handler: HandlerFn<Route> = Arc::new(move |route: Route| -> HandlerFuture { Box::pin(handler(route)) });
		let matcher = UrlMatcher::new(pattern);

		self.route_handlers.lock().insert(id, HandlerEntry { id, matcher, handler });

		self.enable_network_interception().await?;
		Ok(Subscription::from_handler_map(id, &self.route_handlers))
	}

	/// Returns whether interception domains are installed for this page.
	pub fn interception_installed(&self) -> bool {
		self.interception_installed.load(Ordering::SeqCst)
	}

	/// Enables request pausing and response observation on the endpoint.
	///
	/// Idempotent: the installed flag ensures the domains are enabled and the
	/// event pump spawned exactly once per page.
	pub async fn enable_network_interception(&self) -> Result<()> {
		if self.interception_installed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}

		self.send("Network.enable", json!({})).await?;
		self.send(
			"Fetch.enable",
			json!({ "patterns": [{ "urlPattern": "*", "requestStage": "Request" }] }),
		)
		.await?;

		// Subscribe before returning so no event can slip past the pump.
		let events = self.connection().events();
		let pump = tokio::spawn(event_pump(self.clone(), events));
		*self.pump.lock() = Some(pump);
		Ok(())
	}

	/// Returns a new subscription to responses observed on this page.
	pub fn responses(&self) -> broadcast::Receiver<ResponseEvent> {
		self.response_tx.subscribe()
	}

	/// Fetches and parses the body of an observed response.
	pub async fn response_body(&self, request_id: &str) -> Result<Value> {
		let result = self.send("Network.getResponseBody", json!({ "requestId": request_id })).await?;
		let body = result.get("body").and_then(Value::as_str).unwrap_or_default();
		let decoded;
		let text = if result.get("base64Encoded").and_then(Value::as_bool).unwrap_or(false) {
			decoded = BASE64
				.decode(body)
				.map_err(|e| underpass_runtime::Error::ProtocolError(format!("undecodable response body: {e}")))?;
			String::from_utf8_lossy(&decoded).into_owned()
		} else {
			body.to_string()
		};
		serde_json::from_str(&text).map_err(Into::into)
	}

	/// Dispatches a paused request to the matching handler (last registered
	/// wins); unmatched requests are resumed untouched.
	async fn on_route_event(&self, route: Route) {
		let handler = {
			let handlers = self.route_handlers.lock();
			handlers.values().rev().find(|entry| entry.matcher.is_match(route.url())).map(|entry| entry.handler.clone())
		};

		match handler {
			Some(handler) => {
				if let Err(e) = handler(route).await {
					tracing::error!(target = "underpass.page", error = %e, "route handler error");
				}
			}
			None => {
				if let Err(e) = route.resume().await {
					tracing::debug!(target = "underpass.page", error = %e, "failed to resume unmatched request");
				}
			}
		}
	}
}

/// Drives route dispatch and response fan-out from the connection's events.
async fn event_pump(page: Page, mut events: broadcast::Receiver<underpass_protocol::Event>) {
	let session_id = Arc::clone(page.session_id());

	loop {
		let event = match events.recv().await {
			Ok(event) => event,
			Err(broadcast::error::RecvError::Lagged(n)) => {
				tracing::warn!(target = "underpass.page", dropped = n, "event pump lagged");
				continue;
			}
			Err(broadcast::error::RecvError::Closed) => break,
		};

		if event.session_id.as_deref() != Some(session_id.as_ref()) {
			continue;
		}

		match event.method.as_str() {
			"Fetch.requestPaused" => {
				let params = &event.params;
				let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
					continue;
				};
				let route = Route::new(
					Arc::clone(page.connection()),
					Arc::clone(&session_id),
					request_id.to_string(),
					params.pointer("/request/url").and_then(Value::as_str).unwrap_or_default().to_string(),
					params.pointer("/request/method").and_then(Value::as_str).unwrap_or("GET").to_string(),
					params.pointer("/request/postData").and_then(Value::as_str).map(str::to_string),
				);
				page.on_route_event(route).await;
			}
			"Network.responseReceived" => {
				let params = &event.params;
				let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
					continue;
				};
				let response = ResponseEvent {
					seq: page.next_response_sequence(),
					request_id: request_id.to_string(),
					url: params.pointer("/response/url").and_then(Value::as_str).unwrap_or_default().to_string(),
					status: params.pointer("/response/status").and_then(Value::as_u64).unwrap_or(0) as u16,
				};
				// No receivers is fine; observation is opt-in.
				let _ = page.response_sender().send(response);
			}
			_ => {}
		}
	}
}
