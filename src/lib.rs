//! # discord-ipc-client
//!
//! Async client for the local IPC protocol of the Discord desktop app.
//!
//! The peer listens on a Unix domain socket (`$XDG_RUNTIME_DIR/discord-ipc-N`)
//! or a Windows named pipe (`\\?\pipe\discord-ipc-N`) for slots 0-9. This
//! crate connects to the first slot that accepts, performs the handshake,
//! correlates commands with their replies and routes events to listeners.
//!
//! ## Architecture
//!
//! - **Transport**: slot probing over a pluggable [`transport::Connector`]
//! - **Protocol**: 8-byte little-endian header (`opcode`, `length`) + JSON
//! - **Session**: state machine, reader task and single writer task
//! - **Dispatcher**: nonce correlation and event routing
//! - **Supervisor**: optional reconnection with backoff
//!
//! ## Example
//!
//! ```no_run
//! use discord_ipc_client::handler::Event;
//! use discord_ipc_client::model::{Activity, Command};
//! use discord_ipc_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> discord_ipc_client::Result<()> {
//!     let client = Client::builder("945428344806183003").connect().await?;
//!
//!     client.on_event("ACTIVITY_JOIN", |event: &Event| {
//!         println!("join requested: {}", event.data);
//!     });
//!     client.send(&Command::subscribe("ACTIVITY_JOIN")).await?;
//!
//!     client
//!         .set_activity(Some(Activity::builder().details("Exploring").build()))
//!         .await?;
//!
//!     client.wait_for_shutdown().await
//! }
//! ```

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod model;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod transport;
pub mod writer;

mod client;
mod presence;

pub use client::{Client, ClientBuilder};
pub use dispatcher::ResponseHandle;
pub use error::{IpcError, Result};
pub use handler::{Event, Subscription};
pub use presence::PresenceManager;
pub use reconnect::{Backoff, ReconnectPolicy};
pub use session::{ConnectionState, DisconnectReason, Session, SessionConfig, SessionStatus};
