//! Single-slot persistence for the reconnectable session descriptor.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Age past which a persisted descriptor is never reused.
pub const SESSION_TTL: Duration = Duration::from_secs(8 * 60 * 60);

/// Reconnect metadata for a previously authenticated remote browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptor {
	/// WebSocket debugger URL of the authenticated browser.
	pub endpoint: String,
	/// Unix epoch milliseconds when the descriptor was written.
	#[serde(rename = "savedAt")]
	pub saved_at: u64,
}

impl SessionDescriptor {
	/// Descriptor age relative to `now_ms`.
	pub fn age(&self, now_ms: u64) -> Duration {
		Duration::from_millis(now_ms.saturating_sub(self.saved_at))
	}
}

/// Single-record descriptor file.
///
/// Writes overwrite the whole record; clearing writes an empty record rather
/// than deleting the file, which sidesteps permission edge cases on some
/// filesystems.
pub struct SessionStore {
	path: PathBuf,
	ttl: Duration,
}

impl SessionStore {
	/// Creates a store at `path` with the default TTL.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self::with_ttl(path, SESSION_TTL)
	}

	/// Creates a store with an explicit TTL.
	pub fn with_ttl(path: impl Into<PathBuf>, ttl: Duration) -> Self {
		Self { path: path.into(), ttl }
	}

	/// Returns the descriptor file path.
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Loads the descriptor; `None` when absent, malformed or expired.
	pub fn load(&self) -> Option<SessionDescriptor> {
		self.load_at(now_ms())
	}

	/// Loads relative to an explicit clock, for TTL boundary checks.
	pub(crate) fn load_at(&self, now_ms: u64) -> Option<SessionDescriptor> {
		let content = fs::read_to_string(&self.path).ok()?;
		let descriptor: SessionDescriptor = match serde_json::from_str(&content) {
			Ok(d) => d,
			Err(e) => {
				debug!(target = "underpass.store", path = %self.path.display(), error = %e, "ignoring malformed descriptor");
				return None;
			}
		};

		if descriptor.age(now_ms) > self.ttl {
			debug!(
				target = "underpass.store",
				age_secs = descriptor.age(now_ms).as_secs(),
				"descriptor past ttl; ignoring"
			);
			return None;
		}

		Some(descriptor)
	}

	/// Persists a descriptor for `endpoint`, stamped with the current time.
	pub fn save(&self, endpoint: &str) -> Result<SessionDescriptor> {
		let descriptor = SessionDescriptor {
			endpoint: endpoint.to_string(),
			saved_at: now_ms(),
		};
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(&self.path, serde_json::to_string_pretty(&descriptor)?)?;
		debug!(target = "underpass.store", path = %self.path.display(), "saved session descriptor");
		Ok(descriptor)
	}

	/// Invalidates the record by overwriting it with an empty object.
	pub fn clear(&self) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(&self.path, "{}")?;
		debug!(target = "underpass.store", path = %self.path.display(), "cleared session descriptor");
		Ok(())
	}
}

/// Current Unix timestamp in milliseconds.
pub fn now_ms() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap_or_default()
		.as_millis() as u64
}
