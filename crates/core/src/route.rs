//! [`Route`] represents one paused outgoing request awaiting a verdict.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use underpass_runtime::{Connection, Result};

/// A paused outgoing request.
///
/// The request stays stalled at the endpoint until [`resume`](Self::resume)
/// or [`continue_with`](Self::continue_with) is called; dropping a route
/// without either leaves the request hanging until the page times it out.
#[derive(Clone)]
pub struct Route {
	connection: Arc<Connection>,
	session_id: Arc<str>,
	request_id: String,
	url: String,
	method: String,
	post_data: Option<String>,
}

/// Replacement fields applied when continuing a paused request.
#[derive(Debug, Clone, Default)]
pub struct RouteOverrides {
	/// Redirect the request to this URL.
	pub url: Option<String>,
	/// Replace the request body with this payload.
	pub post_data: Option<String>,
}

impl Route {
	pub(crate) fn new(
		connection: Arc<Connection>,
		session_id: Arc<str>,
		request_id: String,
		url: String,
		method: String,
		post_data: Option<String>,
	) -> Self {
		Self {
			connection,
			session_id,
			request_id,
			url,
			method,
			post_data,
		}
	}

	/// Returns the request URL.
	pub fn url(&self) -> &str {
		&self.url
	}

	/// Returns the request method.
	pub fn method(&self) -> &str {
		&self.method
	}

	/// Returns the original request body, if any.
	pub fn post_data(&self) -> Option<&str> {
		self.post_data.as_deref()
	}

	/// Continues the request untouched.
	pub async fn resume(self) -> Result<()> {
		self.connection
			.send_command(
				"Fetch.continueRequest",
				Some(&self.session_id),
				json!({ "requestId": self.request_id }),
			)
			.await?;
		Ok(())
	}

	/// Continues the request with replaced fields.
	///
	/// Only the URL and body are overridable; headers, cookies and the rest of
	/// the request are forwarded exactly as the page produced them.
	pub async fn continue_with(self, overrides: RouteOverrides) -> Result<()> {
		let mut params = json!({ "requestId": self.request_id });
		if let Some(url) = overrides.url {
			params["url"] = json!(url);
		}
		if let Some(body) = overrides.post_data {
			params["postData"] = json!(BASE64.encode(body.as_bytes()));
		}
		self.connection
			.send_command("Fetch.continueRequest", Some(&self.session_id), params)
			.await?;
		Ok(())
	}
}

impl std::fmt::Debug for Route {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Route").field("request_id", &self.request_id).field("url", &self.url).finish()
	}
}
