//! Handler module - event listeners.
//!
//! Provides:
//! - [`EventRegistry`] - maps event names to listeners
//! - [`Event`] - an inbound `evt`/`data` payload
//! - [`Subscription`] - handle for removing one listener
//!
//! # Example
//!
//! ```
//! use discord_ipc_client::handler::{Event, EventRegistry};
//! use discord_ipc_client::model::ReadyEvent;
//!
//! let registry = EventRegistry::new();
//!
//! // Raw listener
//! registry.register("ACTIVITY_JOIN", |event: &Event| {
//!     println!("{}", event.data);
//! });
//!
//! // Typed listener
//! registry.register_typed("READY", |ready: ReadyEvent| {
//!     println!("connected to {}", ready.config.environment);
//! });
//! ```

mod registry;

pub use registry::{Event, EventHandler, EventRegistry, Subscription, TypedHandler};
