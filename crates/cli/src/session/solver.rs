//! HTTP client for the external challenge-solving service.
//!
//! The service takes the page URL and widget site key, farms the challenge
//! out, and eventually hands back a response token. Both calls are the
//! classic submit/poll pair.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{AppError, Result};

/// Base URL of the solving service.
const SOLVER_BASE_URL: &str = "https://2captcha.com";
/// How often the pending task is polled.
const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Give up on the service after this long.
const SOLVE_DEADLINE: Duration = Duration::from_secs(120);
/// Per-request HTTP timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Service reply envelope: `status` 1 = `request` is the payload,
/// `status` 0 = `request` is an error code or `CAPCHA_NOT_READY`.
#[derive(Debug, Deserialize)]
struct SolverReply {
	status: u8,
	request: String,
}

/// Outcome of interpreting one poll reply.
#[derive(Debug, PartialEq, Eq)]
enum PollOutcome {
	Ready(String),
	Pending,
	Failed(String),
}

fn interpret_poll(reply: &SolverReply) -> PollOutcome {
	if reply.status == 1 {
		PollOutcome::Ready(reply.request.clone())
	} else if reply.request == "CAPCHA_NOT_READY" {
		PollOutcome::Pending
	} else {
		PollOutcome::Failed(reply.request.clone())
	}
}

/// Client for the solving service.
pub struct SolverClient {
	http: reqwest::Client,
	base_url: String,
	api_key: String,
}

impl SolverClient {
	pub fn new(api_key: impl Into<String>) -> Self {
		Self::with_base_url(api_key, SOLVER_BASE_URL)
	}

	pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
		let http = reqwest::Client::builder()
			.timeout(HTTP_TIMEOUT)
			.build()
			.expect("reqwest client construction cannot fail with static options");
		Self {
			http,
			base_url: base_url.into(),
			api_key: api_key.into(),
		}
	}

	/// Solves the challenge on `page_url` for `site_key`, returning the token.
	pub async fn solve(&self, page_url: &str, site_key: &str) -> Result<String> {
		let task_id = self.submit(page_url, site_key).await?;
		debug!(target = "underpass.solver", task_id = %task_id, "challenge submitted to solver");

		let deadline = tokio::time::Instant::now() + SOLVE_DEADLINE;
		loop {
			tokio::time::sleep(POLL_INTERVAL).await;
			match interpret_poll(&self.poll(&task_id).await?) {
				PollOutcome::Ready(token) => return Ok(token),
				PollOutcome::Pending => {
					if tokio::time::Instant::now() >= deadline {
						return Err(AppError::Solver("solver did not finish before deadline".to_string()));
					}
				}
				PollOutcome::Failed(code) => return Err(AppError::Solver(code)),
			}
		}
	}

	async fn submit(&self, page_url: &str, site_key: &str) -> Result<String> {
		let reply: SolverReply = self
			.http
			.get(format!("{}/in.php", self.base_url))
			.query(&[
				("key", self.api_key.as_str()),
				("method", "userrecaptcha"),
				("googlekey", site_key),
				("pageurl", page_url),
				("json", "1"),
			])
			.send()
			.await
			.map_err(|e| AppError::Solver(format!("submit request failed: {e}")))?
			.json()
			.await
			.map_err(|e| AppError::Solver(format!("submit reply unreadable: {e}")))?;

		if reply.status != 1 {
			return Err(AppError::Solver(reply.request));
		}
		Ok(reply.request)
	}

	async fn poll(&self, task_id: &str) -> Result<SolverReply> {
		self.http
			.get(format!("{}/res.php", self.base_url))
			.query(&[
				("key", self.api_key.as_str()),
				("action", "get"),
				("id", task_id),
				("json", "1"),
			])
			.send()
			.await
			.map_err(|e| AppError::Solver(format!("poll request failed: {e}")))?
			.json()
			.await
			.map_err(|e| AppError::Solver(format!("poll reply unreadable: {e}")))
	}
}
