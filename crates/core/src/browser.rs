//! [`Browser`] connects by reference to a remote automation endpoint.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::task::JoinHandle;
use underpass_runtime::{Connection, Error, Result, TransportParts, WsTransport};

use crate::Page;

/// A connection to a running browser, addressed by its debugger URL.
///
/// The browser is not launched by this crate; it already exists at the remote
/// endpoint and this handle attaches to it. Dropping the handle leaves the
/// remote browser running; [`close`](Self::close) shuts it down.
pub struct Browser {
	connection: Arc<Connection>,
	endpoint: String,
	run_handle: JoinHandle<()>,
}

impl Browser {
	/// Connects to a WebSocket debugger URL within `timeout`.
	pub async fn connect(endpoint: &str, timeout: Duration) -> Result<Self> {
		let parts = WsTransport::connect(endpoint, timeout).await?;
		Ok(Self::from_parts(parts, endpoint))
	}

	/// Builds a browser over already-split transport parts.
	///
	/// This is how non-WebSocket transports (pipes in tests) attach.
	pub fn from_parts(parts: TransportParts, endpoint: &str) -> Self {
		let connection = Arc::new(Connection::new(parts));
		let run_handle = tokio::spawn(Arc::clone(&connection).run());
		Self {
			connection,
			endpoint: endpoint.to_string(),
			run_handle,
		}
	}

	/// Returns the endpoint reference this browser was connected with.
	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	/// Attaches to a page target, creating one when the browser has none.
	pub async fn page(&self) -> Result<Page> {
		let targets = self.connection.send_command("Target.getTargets", None, json!({})).await?;

		let existing = targets
			.get("targetInfos")
			.and_then(Value::as_array)
			.and_then(|infos| {
				infos.iter().find(|info| {
					info.get("type").and_then(Value::as_str) == Some("page")
						&& !info.get("url").and_then(Value::as_str).unwrap_or_default().starts_with("devtools://")
				})
			})
			.map(|info| {
				(
					info.get("targetId").and_then(Value::as_str).unwrap_or_default().to_string(),
					info.get("url").and_then(Value::as_str).unwrap_or("about:blank").to_string(),
				)
			});

		let (target_id, url) = match existing {
			Some(found) if !found.0.is_empty() => found,
			_ => {
				let created = self
					.connection
					.send_command("Target.createTarget", None, json!({ "url": "about:blank" }))
					.await?;
				let target_id = created
					.get("targetId")
					.and_then(Value::as_str)
					.ok_or_else(|| Error::ProtocolError("createTarget returned no targetId".to_string()))?;
				(target_id.to_string(), "about:blank".to_string())
			}
		};

		let attached = self
			.connection
			.send_command(
				"Target.attachToTarget",
				None,
				json!({ "targetId": target_id, "flatten": true }),
			)
			.await?;
		let session_id = attached
			.get("sessionId")
			.and_then(Value::as_str)
			.ok_or_else(|| Error::ProtocolError("attachToTarget returned no sessionId".to_string()))?;

		let page = Page::attached(Arc::clone(&self.connection), session_id, &target_id, &url);
		page.send("Page.enable", json!({})).await?;
		page.send("Runtime.enable", json!({})).await?;
		Ok(page)
	}

	/// Closes the remote browser and stops the connection.
	///
	/// The close command is best-effort: a dead endpoint is already closed.
	pub async fn close(self) -> Result<()> {
		let _ = self.connection.send_command("Browser.close", None, json!({})).await;
		self.run_handle.abort();
		Ok(())
	}
}

impl std::fmt::Debug for Browser {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Browser").field("endpoint", &self.endpoint).finish()
	}
}
