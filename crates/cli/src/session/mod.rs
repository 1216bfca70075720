//! Session lifecycle: persistence, challenge solving, login, orchestration.

pub mod challenge;
pub mod login;
pub mod manager;
pub mod solver;
pub mod store;

pub use manager::SessionManager;
pub use store::{SESSION_TTL, SessionDescriptor, SessionStore};

use underpass::{Browser, Page};

/// A live authenticated browser-backed session.
///
/// Exactly one instance exists per process, owned by [`SessionManager`]; other
/// components borrow the page for the duration of one call.
pub struct LiveSession {
	browser: Browser,
	page: Page,
}

impl LiveSession {
	pub fn new(browser: Browser, page: Page) -> Self {
		Self { browser, page }
	}

	/// Returns the live page handle.
	pub fn page(&self) -> &Page {
		&self.page
	}

	/// Returns the endpoint reference the session's browser is attached to.
	pub fn endpoint(&self) -> &str {
		self.browser.endpoint()
	}

	/// Returns whether interception routes are installed on the page.
	pub fn interception_installed(&self) -> bool {
		self.page.interception_installed()
	}

	/// Trivial liveness probe against the held page.
	pub async fn probe(&self) -> underpass::Result<()> {
		self.page.probe().await
	}

	/// Tears the session down, closing the remote browser.
	///
	/// Best-effort: a session being torn down is usually already half-dead.
	pub async fn teardown(self) {
		if let Err(e) = self.browser.close().await {
			tracing::debug!(target = "underpass.session", error = %e, "browser close during teardown failed");
		}
	}
}

impl std::fmt::Debug for LiveSession {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LiveSession")
			.field("endpoint", &self.endpoint())
			.field("interception_installed", &self.interception_installed())
			.finish()
	}
}
