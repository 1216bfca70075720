//! Session acquisition: reuse, reconnect, or authenticate fresh.

use std::time::Duration;

use tracing::{debug, info, warn};
use underpass::{Browser, Page, UrlMatcher};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::session::login::AuthenticationFlow;
use crate::session::store::{SessionDescriptor, SessionStore};
use crate::session::LiveSession;

/// Fresh-login retry ceiling.
pub const MAX_LOGIN_ATTEMPTS: u32 = 3;
/// Bounded timeout for reconnecting to a persisted endpoint.
const RECONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sole owner of the live session and the persisted descriptor.
///
/// All other components receive the page by reference for the duration of one
/// call; nothing else writes session state.
pub struct SessionManager {
	config: Config,
	store: SessionStore,
	live: Option<LiveSession>,
}

impl SessionManager {
	pub fn new(config: Config) -> Self {
		let store = SessionStore::new(&config.state_file);
		Self {
			config,
			store,
			live: None,
		}
	}

	/// Returns the startup configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns the descriptor store.
	pub fn store(&self) -> &SessionStore {
		&self.store
	}

	/// Acquires a usable session: in-memory reuse, then reconnect, then fresh
	/// login. First success wins.
	///
	/// A liveness failure at any step tears the dead session down and
	/// invalidates the persisted descriptor before the next step runs, so no
	/// half-alive session is ever observable.
	pub async fn acquire(&mut self) -> Result<&LiveSession> {
		if let Some(live) = self.live.take() {
			match live.probe().await {
				Ok(()) => {
					debug!(target = "underpass.session", "reusing in-memory session");
					return Ok(self.live.insert(live));
				}
				Err(e) => {
					warn!(target = "underpass.session", error = %e, "in-memory session failed probe; tearing down");
					live.teardown().await;
					self.store.clear()?;
				}
			}
		}

		if let Some(descriptor) = self.store.load() {
			match self.reconnect(&descriptor).await {
				Ok(live) => {
					info!(target = "underpass.session", endpoint = %descriptor.endpoint, "reconnected to persisted session");
					return Ok(self.live.insert(live));
				}
				Err(e) => {
					warn!(target = "underpass.session", error = %e, "reconnect failed; invalidating descriptor");
					self.store.clear()?;
				}
			}
		}

		let credentials = self.config.credentials.complete()?;
		let flow = AuthenticationFlow::new(&self.config.profile, &self.store);
		let credentials = &credentials;

		let live = login_with_retries(MAX_LOGIN_ATTEMPTS, || flow.login(credentials)).await?;
		Ok(self.live.insert(live))
	}

	/// Reconnects to the remote endpoint named by a persisted descriptor.
	async fn reconnect(&self, descriptor: &SessionDescriptor) -> Result<LiveSession> {
		let browser = Browser::connect(&descriptor.endpoint, RECONNECT_TIMEOUT).await?;

		match self.validate_reconnected(&browser).await {
			Ok(page) => Ok(LiveSession::new(browser, page)),
			Err(e) => {
				let _ = browser.close().await;
				Err(e)
			}
		}
	}

	/// The reconnected page must still be inside the application and answer a
	/// probe; interception reinstall is idempotent.
	async fn validate_reconnected(&self, browser: &Browser) -> Result<Page> {
		let page = browser.page().await?;
		let location = page.location().await?;

		let matcher = UrlMatcher::new(&self.config.profile.app_url_pattern);
		if !matcher.is_match(&location) {
			return Err(AppError::SessionDead(format!("reconnected page is outside the application: {location}")));
		}

		page.probe().await?;
		page.enable_network_interception().await?;
		Ok(page)
	}

	/// Tears down the live session and invalidates the descriptor.
	pub async fn invalidate(&mut self) -> Result<()> {
		if let Some(live) = self.live.take() {
			warn!(target = "underpass.session", "invalidating live session");
			live.teardown().await;
		}
		self.store.clear()
	}

	/// Returns whether an in-memory session currently exists.
	pub fn has_live_session(&self) -> bool {
		self.live.is_some()
	}
}

/// Runs `attempt` until it yields a session or the ceiling is reached.
///
/// `Ok(None)` attempts are retried; errors propagate immediately as
/// unexpected failures.
pub(crate) async fn login_with_retries<T, F, Fut>(max_attempts: u32, mut attempt: F) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<Option<T>>>,
{
	let mut attempts = 0;
	loop {
		attempts += 1;
		match attempt().await? {
			Some(value) => {
				info!(target = "underpass.session", attempts, "fresh login succeeded");
				return Ok(value);
			}
			None if attempts < max_attempts => {
				warn!(
					target = "underpass.session",
					attempt = attempts,
					max = max_attempts,
					"login attempt failed; retrying"
				);
			}
			None => {
				return Err(AppError::LoginFailed {
					attempts,
					last_error: "every attempt ended without an authenticated session".to_string(),
				});
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicU32, Ordering};

	use super::*;

	#[tokio::test]
	async fn login_ceiling_is_exact() {
		let calls = Arc::new(AtomicU32::new(0));
		let calls_attempt = Arc::clone(&calls);

		let result: Result<()> = login_with_retries(MAX_LOGIN_ATTEMPTS, move || {
			let calls = Arc::clone(&calls_attempt);
			async move {
				calls.fetch_add(1, Ordering::SeqCst);
				Ok(None)
			}
		})
		.await;

		assert_eq!(calls.load(Ordering::SeqCst), MAX_LOGIN_ATTEMPTS);
		match result {
			Err(AppError::LoginFailed { attempts, .. }) => assert_eq!(attempts, MAX_LOGIN_ATTEMPTS),
			other => panic!("expected LoginFailed, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn first_success_stops_retrying() {
		let calls = Arc::new(AtomicU32::new(0));
		let calls_attempt = Arc::clone(&calls);

		let value = login_with_retries(MAX_LOGIN_ATTEMPTS, move || {
			let calls = Arc::clone(&calls_attempt);
			async move {
				let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
				Ok((n == 2).then_some(n))
			}
		})
		.await
		.unwrap();

		assert_eq!(value, 2);
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn unexpected_errors_propagate_without_retry() {
		let calls = Arc::new(AtomicU32::new(0));
		let calls_attempt = Arc::clone(&calls);

		let result: Result<()> = login_with_retries(MAX_LOGIN_ATTEMPTS, move || {
			let calls = Arc::clone(&calls_attempt);
			async move {
				calls.fetch_add(1, Ordering::SeqCst);
				Err(AppError::Io(std::io::Error::other("disk full")))
			}
		})
		.await;

		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}
}
