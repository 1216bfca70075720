//! Clearing the anti-automation widget that gates login submission.
//!
//! Two tiers: when a solving service is configured, fetch a token and inject
//! it into the widget's response plumbing; regardless of how that goes, fall
//! back to passively polling the submit control, which is the slow but
//! guaranteed-correct path (and the only one without a service key). The
//! token sometimes fails to attach to the widget's internal state even when
//! the service solved correctly, which is why the fallback always runs.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};
use underpass::Page;

use crate::error::Result;
use crate::session::solver::SolverClient;

/// Selector for the widget container carrying the site key.
const SITE_KEY_SELECTOR: &str = "[data-sitekey]";
/// Selector for the embedded challenge iframe, the fallback site-key source.
const CHALLENGE_IFRAME_SELECTOR: &str = r#"iframe[src*="recaptcha"]"#;
/// Last-known site key, used when the page yields none.
const FALLBACK_SITE_KEY: &str = "6LdK1ZkqAAAAAPs4cQbZKqjXwkzBCrsAqFxcCGpS";

/// Fixed cadence for the passive enablement poll.
pub const ENABLE_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Ceiling on the passive wait.
pub const MAX_CHALLENGE_WAIT: Duration = Duration::from_secs(60);
/// Short settle poll after a token injection.
const TOKEN_SETTLE_WAIT: Duration = Duration::from_secs(6);

/// Solves or waits out the widget blocking form submission.
pub struct ChallengeSolver {
	solver: Option<SolverClient>,
	/// Selector that matches an enabled submit control.
	enabled_submit_selector: String,
}

impl ChallengeSolver {
	pub fn new(solver: Option<SolverClient>, enabled_submit_selector: impl Into<String>) -> Self {
		Self {
			solver,
			enabled_submit_selector: enabled_submit_selector.into(),
		}
	}

	/// Returns `true` once the submit control is enabled, `false` when every
	/// strategy is exhausted.
	pub async fn solve(&self, page: &Page) -> Result<bool> {
		if let Some(client) = &self.solver {
			match self.token_path(page, client).await {
				Ok(true) => return Ok(true),
				Ok(false) => {
					debug!(target = "underpass.challenge", "token injected but control still disabled; falling back to polling");
				}
				Err(e) => {
					warn!(target = "underpass.challenge", error = %e, "solver service path failed; falling back to polling");
				}
			}
		}

		let probe_page = page.clone();
		let selector = self.enabled_submit_selector.clone();
		poll_until(ENABLE_POLL_INTERVAL, MAX_CHALLENGE_WAIT, move || {
			let page = probe_page.clone();
			let selector = selector.clone();
			async move { page.exists(&selector).await }
		})
		.await
	}

	/// Token tier: extract the site key, solve remotely, inject, settle.
	async fn token_path(&self, page: &Page, client: &SolverClient) -> Result<bool> {
		let site_key = self.site_key(page).await?;
		let page_url = page.location().await?;
		let token = client.solve(&page_url, &site_key).await?;
		debug!(target = "underpass.challenge", "received solver token");

		self.inject_token(page, &token).await?;

		let probe_page = page.clone();
		let selector = self.enabled_submit_selector.clone();
		poll_until(ENABLE_POLL_INTERVAL, TOKEN_SETTLE_WAIT, move || {
			let page = probe_page.clone();
			let selector = selector.clone();
			async move { page.exists(&selector).await }
		})
		.await
	}

	/// Site-key extraction chain: widget attribute, iframe URL, known key.
	async fn site_key(&self, page: &Page) -> Result<String> {
		if let Some(key) = page.attribute(SITE_KEY_SELECTOR, "data-sitekey").await? {
			if !key.is_empty() {
				return Ok(key);
			}
		}

		if let Some(src) = page.attribute(CHALLENGE_IFRAME_SELECTOR, "src").await? {
			if let Some(key) = site_key_from_frame_src(&src) {
				return Ok(key);
			}
		}

		warn!(target = "underpass.challenge", "no site key found on page; using last-known key");
		Ok(FALLBACK_SITE_KEY.to_string())
	}

	/// Writes the token into every plausible response field and widget hook,
	/// then notifies the form.
	async fn inject_token(&self, page: &Page, token: &str) -> Result<()> {
		let script = format!(
			r#"(() => {{
				const token = {token};
				for (const sel of ['textarea[name="g-recaptcha-response"]', '#g-recaptcha-response', 'input[name="captcha-response"]']) {{
					for (const el of document.querySelectorAll(sel)) {{
						el.value = token;
						el.innerHTML = token;
					}}
				}}
				if (window.___grecaptcha_cfg) {{
					for (const cfg of Object.values(window.___grecaptcha_cfg.clients || {{}})) {{
						for (const maybe of Object.values(cfg)) {{
							if (maybe && typeof maybe === 'object' && typeof maybe.callback === 'function') {{
								try {{ maybe.callback(token); }} catch (_) {{}}
							}}
						}}
					}}
				}}
				for (const form of document.forms) {{
					form.dispatchEvent(new Event('change', {{ bubbles: true }}));
				}}
			}})()"#,
			token = json!(token),
		);
		page.evaluate(&script).await?;
		Ok(())
	}
}

/// Polls `probe` on a fixed cadence until it returns true or `ceiling` is
/// reached; the first probe runs after one full interval.
pub(crate) async fn poll_until<F, Fut>(interval: Duration, ceiling: Duration, mut probe: F) -> Result<bool>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = underpass::Result<bool>>,
{
	let mut waited = Duration::ZERO;
	while waited < ceiling {
		tokio::time::sleep(interval).await;
		waited += interval;
		if probe().await? {
			return Ok(true);
		}
	}
	Ok(false)
}

/// Pulls the site key out of an embedded challenge iframe URL (`k` query
/// parameter).
fn site_key_from_frame_src(src: &str) -> Option<String> {
	let url = url::Url::parse(src).ok()?;
	url.query_pairs().find(|(name, _)| name == "k").map(|(_, value)| value.into_owned()).filter(|v| !v.is_empty())
}
