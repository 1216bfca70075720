//! Client objects for driving a remote browser automation endpoint.
//!
//! [`Browser`] connects by reference to a WebSocket debugger URL and attaches
//! to a page target; [`Page`] exposes the narrow operation set the rest of
//! the workspace consumes: navigation, script evaluation, form input, waits,
//! request interception routes and response observation.

mod browser;
mod handlers;
mod page;
mod route;

pub use browser::Browser;
pub use handlers::{Subscription, UrlMatcher};
pub use page::{NavigateOptions, Page, ResponseEvent, WaitUntil};
pub use route::{Route, RouteOverrides};
pub use underpass_runtime::{Error, Result};
