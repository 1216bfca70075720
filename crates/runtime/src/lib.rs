//! Connection runtime for a remote browser automation endpoint.
//!
//! Layers, bottom up:
//!
//! - [`transport`] — byte transports (WebSocket for real endpoints, pipes for
//!   tests) that frame JSON messages in both directions.
//! - [`connection`] — command/response correlation and event broadcast on top
//!   of a transport.
//! - [`error`] — the typed error kinds the rest of the workspace branches on.

pub mod connection;
pub mod error;
pub mod transport;

pub use connection::Connection;
pub use error::{Error, Result};
pub use transport::{PipeTransport, Transport, TransportParts, WsTransport};
