//! Event listener registry.
//!
//! Maps event names to listeners in registration order. Every
//! [`Subscription`] carries a unique ID so one listener can be removed
//! without disturbing others registered for the same event.
//!
//! # Example
//!
//! ```
//! use discord_ipc_client::handler::{Event, EventRegistry};
//! use serde_json::json;
//!
//! let registry = EventRegistry::new();
//! let sub = registry.register("ACTIVITY_JOIN", |event: &Event| {
//!     println!("join secret: {}", event.data["secret"]);
//! });
//!
//! let event = Event::from_payload(json!({
//!     "cmd": "DISPATCH",
//!     "evt": "ACTIVITY_JOIN",
//!     "data": { "secret": "s3cr3t" }
//! }))
//! .unwrap();
//! assert_eq!(registry.dispatch(&event), 1);
//!
//! assert!(registry.remove(&sub));
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// An inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event name (`evt`).
    pub name: String,
    /// Event data (`data`, or `null` if absent).
    pub data: Value,
    /// The full payload object.
    pub raw: Value,
}

impl Event {
    /// Build an event from a decoded payload. Returns `None` if the payload
    /// has no string `evt` field.
    pub fn from_payload(raw: Value) -> Option<Self> {
        let name = raw.get("evt")?.as_str()?.to_owned();
        let data = raw.get("data").cloned().unwrap_or(Value::Null);
        Some(Self { name, data, raw })
    }

    /// Deserialize `data` into a typed value.
    pub fn parse_data<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.data)
    }
}

/// Trait for event listeners.
///
/// Listeners run on the reader task and must not block.
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event.
    fn call(&self, event: &Event);
}

impl<F> EventHandler for F
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    fn call(&self, event: &Event) {
        self(event)
    }
}

/// Wrapper that deserializes `data` before calling the listener.
///
/// Events whose data does not fit `T` are logged and skipped.
pub struct TypedHandler<F, T>
where
    F: Fn(T) + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> TypedHandler<F, T>
where
    F: Fn(T) + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T> EventHandler for TypedHandler<F, T>
where
    F: Fn(T) + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    fn call(&self, event: &Event) {
        match event.parse_data::<T>() {
            Ok(data) => (self.handler)(data),
            Err(e) => {
                tracing::warn!(event = %event.name, error = %e, "event data did not match listener type");
            }
        }
    }
}

/// Handle returned by registration, used to remove the listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    event: String,
}

impl Subscription {
    /// Name of the event this listener is attached to.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Registry-unique listener ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct ListenerEntry {
    id: u64,
    handler: Arc<dyn EventHandler>,
}

/// Registry mapping event names to listeners.
pub struct EventRegistry {
    listeners: RwLock<HashMap<String, Vec<ListenerEntry>>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener for `event`.
    pub fn register<H: EventHandler>(&self, event: &str, handler: H) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .entry(event.to_string())
            .or_default()
            .push(ListenerEntry {
                id,
                handler: Arc::new(handler),
            });

        Subscription {
            id,
            event: event.to_string(),
        }
    }

    /// Register a listener that receives `data` deserialized as `T`.
    pub fn register_typed<F, T>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
    {
        self.register(event, TypedHandler::new(handler))
    }

    /// Remove a listener. Returns `false` if it was already removed.
    pub fn remove(&self, subscription: &Subscription) -> bool {
        let mut listeners = self.listeners.write();
        let Some(entries) = listeners.get_mut(&subscription.event) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|entry| entry.id != subscription.id);
        let removed = entries.len() != before;

        if entries.is_empty() {
            listeners.remove(&subscription.event);
        }
        removed
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.read().get(event).map_or(0, Vec::len)
    }

    /// Call every listener for `event.name` once, in registration order.
    ///
    /// The lock is released before listeners run, so a listener may register
    /// or remove listeners. A listener that panics is logged and skipped; the
    /// remaining listeners still run. Returns the number of listeners called.
    pub fn dispatch(&self, event: &Event) -> usize {
        let handlers: Vec<Arc<dyn EventHandler>> = match self.listeners.read().get(&event.name) {
            Some(entries) => entries.iter().map(|e| e.handler.clone()).collect(),
            None => Vec::new(),
        };

        if handlers.is_empty() {
            tracing::debug!(event = %event.name, "no listener for event");
            return 0;
        }

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler.call(event))).is_err() {
                tracing::error!(event = %event.name, "event listener panicked");
            }
        }
        handlers.len()
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        f.debug_struct("EventRegistry")
            .field("events", &listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}
