//! Event handler infrastructure for page-level interception.
//!
//! Route handlers live in an [`IndexMap`] keyed by handler ID so removal is
//! O(1) while dispatch order stays stable. [`Subscription`] unregisters its
//! handler on drop.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

/// Unique identifier for event handlers.
pub type HandlerId = u64;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a new globally-unique handler ID.
pub fn next_handler_id() -> HandlerId {
	NEXT_HANDLER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Boxed async handler future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = underpass_runtime::Result<()>> + Send>>;

/// Handler function: event value to async `Result<()>`.
pub type HandlerFn<E> = Arc<dyn Fn(E) -> HandlerFuture + Send + Sync>;

/// Registered handler with its compiled URL matcher.
pub struct HandlerEntry<E> {
	pub id: HandlerId,
	pub matcher: UrlMatcher,
	pub handler: HandlerFn<E>,
}

/// Handler storage shared between a page and its event pump.
pub type HandlerMap<E> = Arc<Mutex<IndexMap<HandlerId, HandlerEntry<E>>>>;

/// Compiled glob pattern for URL matching.
///
/// Compiles once at registration; invalid patterns fall back to literal
/// matching.
#[derive(Clone)]
pub struct UrlMatcher {
	pattern: glob::Pattern,
}

impl UrlMatcher {
	/// Compiles a glob pattern, falling back to literal matching when invalid.
	pub fn new(pattern: &str) -> Self {
		let pattern = glob::Pattern::new(pattern).unwrap_or_else(|_| {
			glob::Pattern::new(&glob::Pattern::escape(pattern)).expect("escaped pattern is always valid")
		});
		Self { pattern }
	}

	/// Returns `true` if the URL matches this pattern.
	pub fn is_match(&self, url: &str) -> bool {
		self.pattern.matches(url)
	}

	/// Returns the pattern string.
	pub fn as_str(&self) -> &str {
		self.pattern.as_str()
	}
}

/// RAII handle that unregisters an event handler on drop.
///
/// Holds a weak reference to the handler map, so dropping after the owning
/// [`Page`](crate::Page) is gone is a no-op.
pub struct Subscription {
	id: HandlerId,
	dropper: Option<Arc<dyn Fn(HandlerId) + Send + Sync>>,
}

impl Subscription {
	/// Creates a subscription from a handler map using a weak reference.
	pub(crate) fn from_handler_map<E>(id: HandlerId, handlers: &HandlerMap<E>) -> Self
	where
		E: Send + Sync + 'static,
	{
		let weak: Weak<Mutex<IndexMap<HandlerId, HandlerEntry<E>>>> = Arc::downgrade(handlers);
		let dropper = Arc::new(move |id: HandlerId| {
			if let Some(map) = weak.upgrade() {
				map.lock().shift_remove(&id);
			}
		});
		Self {
			id,
			dropper: Some(dropper),
		}
	}

	/// Returns this subscription's handler ID.
	pub fn id(&self) -> HandlerId {
		self.id
	}

	/// Explicitly unsubscribes. Equivalent to dropping.
	pub fn unsubscribe(mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription").field("id", &self.id).field("active", &self.dropper.is_some()).finish()
	}
}
