//! Scripted login against the remote browser page.

use std::time::Duration;

use tracing::{debug, info, warn};
use underpass::{Browser, NavigateOptions, Page, WaitUntil};

use crate::config::{CompleteCredentials, FillOrder, SiteProfile};
use crate::error::{AppError, Result};
use crate::session::LiveSession;
use crate::session::challenge::ChallengeSolver;
use crate::session::solver::SolverClient;
use crate::session::store::SessionStore;

/// Login identifier field.
const IDENTIFIER_SELECTOR: &str = r#"input[type="email"], input[name="email"], input[name="username"]"#;
/// Login secret field.
const SECRET_SELECTOR: &str = r#"input[type="password"]"#;
/// Any submit control, enabled or not.
const SUBMIT_SELECTOR: &str = r#"button[type="submit"], input[type="submit"]"#;
/// Submit controls that are currently activatable. A disabled control means
/// the challenge has not cleared yet.
const ENABLED_SUBMIT_SELECTOR: &str =
	r#"button[type="submit"]:not([disabled]), input[type="submit"]:not([disabled])"#;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const FORM_RENDER_TIMEOUT: Duration = Duration::from_secs(15);
/// Post-submit window for the redirect into the authenticated area.
const REDIRECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives one scripted authentication sequence.
pub struct AuthenticationFlow<'a> {
	profile: &'a SiteProfile,
	store: &'a SessionStore,
}

impl<'a> AuthenticationFlow<'a> {
	pub fn new(profile: &'a SiteProfile, store: &'a SessionStore) -> Self {
		Self { profile, store }
	}

	/// Runs one login attempt.
	///
	/// `Ok(None)` is a recoverable failure the caller may retry; `Err` is
	/// unexpected. Browser resources opened by a failed attempt are torn down
	/// before returning.
	pub async fn login(&self, credentials: &CompleteCredentials) -> Result<Option<LiveSession>> {
		let browser = match Browser::connect(&credentials.automation_endpoint, CONNECT_TIMEOUT).await {
			Ok(browser) => browser,
			Err(e) => {
				warn!(target = "underpass.login", error = %e, "could not reach automation endpoint");
				return Ok(None);
			}
		};

		match self.attempt(&browser, credentials).await {
			Ok(Some(page)) => {
				self.store.save(browser.endpoint())?;
				info!(target = "underpass.login", "authenticated; session descriptor persisted");
				Ok(Some(LiveSession::new(browser, page)))
			}
			Ok(None) => {
				let _ = browser.close().await;
				Ok(None)
			}
			Err(e) if is_recoverable(&e) => {
				warn!(target = "underpass.login", error = %e, "login attempt failed");
				let _ = browser.close().await;
				Ok(None)
			}
			Err(e) => {
				let _ = browser.close().await;
				Err(e)
			}
		}
	}

	async fn attempt(&self, browser: &Browser, credentials: &CompleteCredentials) -> Result<Option<Page>> {
		let page = browser.page().await?;

		page.navigate(
			&self.profile.login_url,
			NavigateOptions {
				timeout: Some(NAVIGATION_TIMEOUT),
				wait_until: WaitUntil::Load,
			},
		)
		.await?;
		page.wait_for_selector(SECRET_SELECTOR, FORM_RENDER_TIMEOUT).await?;
		debug!(target = "underpass.login", "login form rendered");

		// The challenge widget wipes some fields when it completes. Whichever
		// field survives the wipe gets filled first; the rest wait.
		if self.profile.fill_order == FillOrder::SecretFirst {
			page.fill(SECRET_SELECTOR, &credentials.secret).await?;
		}

		let solver = credentials.solver_key.as_deref().map(SolverClient::new);
		let challenge = ChallengeSolver::new(solver, ENABLED_SUBMIT_SELECTOR);
		if !challenge.solve(&page).await? {
			return Err(AppError::ChallengeFailed);
		}
		debug!(target = "underpass.login", "challenge cleared");

		page.fill(IDENTIFIER_SELECTOR, &credentials.identifier).await?;
		if self.profile.fill_order == FillOrder::AfterChallenge {
			page.fill(SECRET_SELECTOR, &credentials.secret).await?;
		}

		// Read both fields back from the rendered form; the widget may have
		// reset contents on completion.
		let identifier_value = page.input_value(IDENTIFIER_SELECTOR).await?;
		let secret_value = page.input_value(SECRET_SELECTOR).await?;
		if !fields_survived(&identifier_value, &secret_value, &credentials.identifier) {
			warn!(target = "underpass.login", "form fields did not survive the challenge; abandoning attempt");
			return Ok(None);
		}

		if !page.exists(SUBMIT_SELECTOR).await? {
			warn!(target = "underpass.login", "no submit control on login form");
			return Ok(None);
		}
		page.click(ENABLED_SUBMIT_SELECTOR).await?;
		debug!(target = "underpass.login", "submitted login form");

		match page.wait_for_url(&self.profile.app_url_pattern, REDIRECT_TIMEOUT).await {
			Ok(url) => {
				debug!(target = "underpass.login", %url, "redirected into application");
			}
			Err(e) if e.is_timeout() => {
				warn!(target = "underpass.login", "no redirect into application; abandoning attempt");
				return Ok(None);
			}
			Err(e) => return Err(e.into()),
		}

		page.enable_network_interception().await?;
		Ok(Some(page))
	}
}

/// Read-back validation of the filled form.
fn fields_survived(identifier_value: &str, secret_value: &str, expected_identifier: &str) -> bool {
	!identifier_value.is_empty() && identifier_value.len() >= expected_identifier.len().min(3) && !secret_value.is_empty()
}

/// Transient automation failures become flow-local attempt failures; the
/// retry ceiling in the manager absorbs them.
fn is_recoverable(error: &AppError) -> bool {
	match error {
		AppError::ChallengeFailed => true,
		AppError::Solver(_) => true,
		AppError::Automation(e) => {
			e.is_timeout() || matches!(e, underpass::Error::ElementNotFound(_) | underpass::Error::Evaluation(_))
		}
		_ => false,
	}
}
