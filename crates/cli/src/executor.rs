//! Public entry point: execute a query, replacing the session at most once.

use serde_json::{Map, Value};
use tracing::warn;

use crate::broker::InterceptionBroker;
use crate::config::Config;
use crate::error::Result;
use crate::session::SessionManager;

/// Runs caller queries against the protected API.
pub struct QueryExecutor {
	manager: SessionManager,
	broker: InterceptionBroker,
}

impl QueryExecutor {
	pub fn new(config: Config) -> Self {
		Self {
			manager: SessionManager::new(config),
			broker: InterceptionBroker::new(),
		}
	}

	/// Executes one query, retrying exactly once after a session replacement
	/// when the failure indicates the target died underneath the call.
	pub async fn run(&mut self, query: &str, variables: Map<String, Value>) -> Result<Value> {
		run_with_replacement(self, query, &variables).await
	}

	/// Returns the session manager, for status inspection.
	pub fn manager(&self) -> &SessionManager {
		&self.manager
	}

	/// Returns a mutable session manager handle.
	pub fn manager_mut(&mut self) -> &mut SessionManager {
		&mut self.manager
	}
}

/// The seam between the retry policy and the session it drives.
pub(crate) trait QuerySession {
	async fn attempt(&mut self, query: &str, variables: &Map<String, Value>, is_retry: bool) -> Result<Value>;
	async fn invalidate(&mut self) -> Result<()>;
}

impl QuerySession for QueryExecutor {
	async fn attempt(&mut self, query: &str, variables: &Map<String, Value>, _is_retry: bool) -> Result<Value> {
		let profile = self.manager.config().profile.clone();
		let live = self.manager.acquire().await?;
		self.broker.execute(live.page(), &profile, query, variables.clone()).await
	}

	async fn invalidate(&mut self) -> Result<()> {
		self.manager.invalidate().await
	}
}

/// One attempt plus at most one full session replacement.
///
/// Bounding the retry to a single replacement prevents unbounded reconnect
/// loops; the second failure surfaces to the caller as-is.
pub(crate) async fn run_with_replacement<S: QuerySession>(
	session: &mut S,
	query: &str,
	variables: &Map<String, Value>,
) -> Result<Value> {
	match session.attempt(query, variables, false).await {
		Err(e) if e.should_replace_session() => {
			warn!(target = "underpass.executor", error = %e, "session died mid-call; replacing and retrying once");
			session.invalidate().await?;
			session.attempt(query, variables, true).await
		}
		other => other,
	}
}
