//! Transport module - platform-specific pipe/socket handling.
//!
//! Provides abstraction over:
//! - Unix Domain Sockets (Linux/macOS)
//! - Named Pipes (Windows)
//!
//! and a [`Connector`] seam so the session can run over any duplex stream.

mod pipe;
mod stream;

pub use pipe::{default_base_dir, ConnectOptions, LocalSocketConnector, ENDPOINT_PREFIX, MAX_SLOT};
pub use stream::{open, AsyncStream, BoxFuture, Connector, IpcStream};
