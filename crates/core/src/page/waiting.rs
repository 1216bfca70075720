//! Polling waits for [`Page`] state.

use std::time::Duration;

use tokio::time::Instant;
use underpass_runtime::{Error, Result};

use super::Page;
use crate::handlers::UrlMatcher;

/// Poll cadence for selector waits.
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Poll cadence for URL waits.
const URL_POLL_INTERVAL: Duration = Duration::from_millis(250);

impl Page {
	/// Waits until `selector` matches an element, polling the DOM.
	pub async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
		let deadline = Instant::now() + timeout;
		loop {
			if self.exists(selector).await? {
				return Ok(());
			}
			if Instant::now() >= deadline {
				return Err(Error::Timeout(format!("waiting for selector {selector}")));
			}
			tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
		}
	}

	/// Waits until the live location matches the glob `pattern`.
	///
	/// Returns the matching URL.
	pub async fn wait_for_url(&self, pattern: &str, timeout: Duration) -> Result<String> {
		let matcher = UrlMatcher::new(pattern);
		let deadline = Instant::now() + timeout;
		loop {
			let href = self.location().await?;
			if matcher.is_match(&href) {
				return Ok(href);
			}
			if Instant::now() >= deadline {
				return Err(Error::Timeout(format!("waiting for url {pattern}, still at {href}")));
			}
			tokio::time::sleep(URL_POLL_INTERVAL).await;
		}
	}
}
