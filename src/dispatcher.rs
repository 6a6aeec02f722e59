//! Request/reply correlation and inbound routing.
//!
//! Every outbound command carries a `nonce`. The pending table maps each
//! in-flight nonce to a oneshot sender; the reader task looks up the nonce of
//! every inbound payload and either completes the matching request or hands
//! the payload to the event registry.
//!
//! ```text
//!                 ┌─────────────────────────────┐
//!  inbound JSON ─►│ nonce in pending table?     │
//!                 └──────┬───────────────┬──────┘
//!                     yes│               │no
//!                        ▼               ▼
//!              complete oneshot   EventRegistry::dispatch(evt)
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::time::Sleep;

use crate::error::{IpcError, Result};
use crate::handler::{Event, EventRegistry};
use crate::model::ErrorData;

/// Event name the peer uses for command failures.
pub const ERROR_EVENT: &str = "ERROR";

/// Outcome delivered to a waiting caller.
type Completion = oneshot::Sender<Result<Value>>;

struct PendingRequest {
    completion: Completion,
    submitted_at: Instant,
}

/// In-flight requests keyed by nonce.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `nonce`.
    ///
    /// # Errors
    ///
    /// `InvalidCommand` if the nonce is already in flight.
    pub fn register(&self, nonce: &str) -> Result<oneshot::Receiver<Result<Value>>> {
        let mut entries = self.entries.lock();
        if entries.contains_key(nonce) {
            return Err(IpcError::InvalidCommand(format!(
                "nonce {nonce:?} is already in flight"
            )));
        }

        let (tx, rx) = oneshot::channel();
        entries.insert(
            nonce.to_string(),
            PendingRequest {
                completion: tx,
                submitted_at: Instant::now(),
            },
        );
        tracing::trace!(nonce, pending = entries.len(), "registered pending request");
        Ok(rx)
    }

    /// Complete the request for `nonce`. Returns `false` if none is pending.
    pub fn complete(&self, nonce: &str, result: Result<Value>) -> bool {
        let Some(request) = self.entries.lock().remove(nonce) else {
            return false;
        };

        tracing::debug!(
            nonce,
            elapsed_ms = request.submitted_at.elapsed().as_millis() as u64,
            "request completed"
        );
        // The caller may have dropped its handle in the meantime
        let _ = request.completion.send(result);
        true
    }

    /// Remove `nonce` without completing it.
    pub fn remove(&self, nonce: &str) -> bool {
        self.entries.lock().remove(nonce).is_some()
    }

    /// Check whether `nonce` is pending.
    pub fn contains(&self, nonce: &str) -> bool {
        self.entries.lock().contains_key(nonce)
    }

    /// Fail every pending request with the error produced by `error`.
    ///
    /// Returns the number of requests failed.
    pub fn fail_all(&self, error: impl Fn() -> IpcError) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (_, request) in drained {
            let _ = request.completion.send(Err(error()));
        }
        if count > 0 {
            tracing::debug!(count, "failed pending requests");
        }
        count
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTable")
            .field("len", &self.len())
            .finish()
    }
}

/// A command serialized to a JSON object with its nonce filled in.
#[derive(Debug, Clone)]
pub struct PreparedCommand {
    /// Correlation nonce.
    pub nonce: String,
    /// Payload to send.
    pub payload: Map<String, Value>,
}

impl PreparedCommand {
    /// Serialize `command` and make sure it carries a string nonce.
    ///
    /// An existing string `nonce` is kept; a missing or `null` one is
    /// replaced by a fresh UUID.
    ///
    /// # Errors
    ///
    /// `InvalidCommand` if the command is not a JSON object or its nonce is
    /// not a string.
    pub fn new<T: Serialize + ?Sized>(command: &T) -> Result<Self> {
        let Value::Object(mut payload) = serde_json::to_value(command)? else {
            return Err(IpcError::InvalidCommand(
                "command must serialize to a JSON object".into(),
            ));
        };

        let nonce = match payload.get("nonce") {
            Some(Value::String(nonce)) => nonce.clone(),
            None | Some(Value::Null) => {
                let nonce = uuid::Uuid::new_v4().to_string();
                payload.insert("nonce".into(), Value::String(nonce.clone()));
                nonce
            }
            Some(other) => {
                return Err(IpcError::InvalidCommand(format!(
                    "nonce must be a string, got {other}"
                )))
            }
        };

        Ok(Self { nonce, payload })
    }
}

/// Handle for a submitted command.
///
/// Resolves to the reply object (with `nonce` removed), `Timeout`,
/// `ConnectionLost`, or `CommandFailed`. Dropping the handle before it
/// resolves removes the pending entry; a late reply is then discarded.
#[must_use = "a response handle does nothing unless awaited"]
pub struct ResponseHandle {
    nonce: String,
    rx: oneshot::Receiver<Result<Value>>,
    deadline: Pin<Box<Sleep>>,
    table: Arc<PendingTable>,
    finished: bool,
}

impl ResponseHandle {
    pub(crate) fn new(
        nonce: String,
        rx: oneshot::Receiver<Result<Value>>,
        timeout: Duration,
        table: Arc<PendingTable>,
    ) -> Self {
        Self {
            nonce,
            rx,
            deadline: Box::pin(tokio::time::sleep(timeout)),
            table,
            finished: false,
        }
    }

    /// Nonce the reply is correlated by.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Stop waiting. Bytes already written are not recalled.
    pub fn cancel(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            if self.table.remove(&self.nonce) {
                tracing::debug!(nonce = %self.nonce, "pending request removed");
            }
        }
    }
}

impl Future for ResponseHandle {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if let Poll::Ready(result) = Pin::new(&mut this.rx).poll(cx) {
            this.finished = true;
            return Poll::Ready(result.unwrap_or(Err(IpcError::ConnectionLost)));
        }

        if this.deadline.as_mut().poll(cx).is_ready() {
            this.finish();
            tracing::debug!(nonce = %this.nonce, "request timed out");
            return Poll::Ready(Err(IpcError::Timeout));
        }

        Poll::Pending
    }
}

impl Drop for ResponseHandle {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("nonce", &self.nonce)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Where an inbound payload ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Completed the pending request with this nonce.
    Reply(String),
    /// Delivered to this many listeners of the named event.
    Event(String, usize),
    /// Neither a pending reply nor a named event.
    Dropped,
}

/// Route one inbound payload to its waiter or to event listeners.
pub fn route(pending: &PendingTable, events: &EventRegistry, payload: Value) -> Routed {
    if let Some(nonce) = payload.get("nonce").and_then(Value::as_str) {
        if pending.contains(nonce) {
            let nonce = nonce.to_string();
            let result = reply_result(payload);
            return if pending.complete(&nonce, result) {
                Routed::Reply(nonce)
            } else {
                // Removed between the check and the completion
                tracing::debug!(nonce = %nonce, "reply for request that is no longer pending");
                Routed::Dropped
            };
        }
    }

    match Event::from_payload(payload) {
        Some(event) => {
            let delivered = events.dispatch(&event);
            Routed::Event(event.name, delivered)
        }
        None => {
            tracing::debug!("dropping payload with no pending nonce and no event name");
            Routed::Dropped
        }
    }
}

/// Turn a correlated reply into the caller's result.
fn reply_result(payload: Value) -> Result<Value> {
    let Value::Object(mut object) = payload else {
        return Ok(payload);
    };

    if object.get("evt").and_then(Value::as_str) == Some(ERROR_EVENT) {
        let data: ErrorData = object
            .get("data")
            .and_then(|data| ErrorData::deserialize(data).ok())
            .unwrap_or_default();
        return Err(IpcError::CommandFailed {
            code: data.code,
            message: data.message,
        });
    }

    object.remove("nonce");
    Ok(Value::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle_for(table: &Arc<PendingTable>, nonce: &str, timeout: Duration) -> ResponseHandle {
        let rx = table.register(nonce).unwrap();
        ResponseHandle::new(nonce.to_string(), rx, timeout, table.clone())
    }

    #[test]
    fn test_prepare_keeps_existing_nonce() {
        let prepared = PreparedCommand::new(&json!({ "op": "ping", "nonce": "abc" })).unwrap();
        assert_eq!(prepared.nonce, "abc");
        assert_eq!(prepared.payload["op"], "ping");
    }

    #[test]
    fn test_prepare_generates_nonce() {
        let prepared = PreparedCommand::new(&json!({ "cmd": "GET_GUILDS" })).unwrap();
        assert!(uuid::Uuid::parse_str(&prepared.nonce).is_ok());
        assert_eq!(prepared.payload["nonce"], prepared.nonce.as_str());

        let other = PreparedCommand::new(&json!({ "cmd": "GET_GUILDS", "nonce": null })).unwrap();
        assert_ne!(other.nonce, prepared.nonce);
    }

    #[test]
    fn test_prepare_rejects_non_object() {
        assert!(matches!(
            PreparedCommand::new(&json!(["cmd"])),
            Err(IpcError::InvalidCommand(_))
        ));
        assert!(matches!(
            PreparedCommand::new(&json!({ "nonce": 5 })),
            Err(IpcError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_duplicate_nonce_rejected() {
        let table = PendingTable::new();
        let _rx = table.register("n1").unwrap();
        assert!(matches!(table.register("n1"), Err(IpcError::InvalidCommand(_))));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_reply_resolves_without_nonce() {
        let table = Arc::new(PendingTable::new());
        let events = EventRegistry::new();
        let handle = handle_for(&table, "abc", Duration::from_secs(5));

        let routed = route(&table, &events, json!({ "nonce": "abc", "ok": true }));
        assert_eq!(routed, Routed::Reply("abc".into()));

        assert_eq!(handle.await.unwrap(), json!({ "ok": true }));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_error_reply_becomes_command_failed() {
        let table = Arc::new(PendingTable::new());
        let events = EventRegistry::new();
        let handle = handle_for(&table, "n", Duration::from_secs(5));

        route(
            &table,
            &events,
            json!({
                "cmd": "SET_ACTIVITY",
                "evt": "ERROR",
                "nonce": "n",
                "data": { "code": 4000, "message": "child \"activity\" fails" }
            }),
        );

        match handle.await {
            Err(IpcError::CommandFailed { code, message }) => {
                assert_eq!(code, 4000);
                assert!(message.contains("activity"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_reply_goes_to_events_not_waiter() {
        let table = Arc::new(PendingTable::new());
        let events = EventRegistry::new();
        let handle = handle_for(&table, "n", Duration::from_secs(5));

        route(&table, &events, json!({ "nonce": "n", "first": true }));
        let second = route(&table, &events, json!({ "nonce": "n", "first": false }));

        assert_eq!(second, Routed::Dropped);
        assert_eq!(handle.await.unwrap()["first"], true);
    }

    #[tokio::test]
    async fn test_event_routing() {
        let table = PendingTable::new();
        let events = EventRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        events.register("ACTIVITY_JOIN", move |_: &Event| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let routed = route(
            &table,
            &events,
            json!({ "cmd": "DISPATCH", "evt": "ACTIVITY_JOIN", "data": {}, "nonce": null }),
        );

        assert_eq!(routed, Routed::Event("ACTIVITY_JOIN".into(), 1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let table = Arc::new(PendingTable::new());
        let handle = handle_for(&table, "slow", Duration::from_millis(100));

        assert!(matches!(handle.await, Err(IpcError::Timeout)));
        assert!(table.is_empty());

        // Late reply is not delivered anywhere
        let routed = route(&table, &EventRegistry::new(), json!({ "nonce": "slow" }));
        assert_eq!(routed, Routed::Dropped);
    }

    #[tokio::test]
    async fn test_cancel_and_drop_remove_entry() {
        let table = Arc::new(PendingTable::new());

        let handle = handle_for(&table, "a", Duration::from_secs(5));
        handle.cancel();
        assert!(!table.contains("a"));

        let handle = handle_for(&table, "b", Duration::from_secs(5));
        drop(handle);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_fail_all() {
        let table = Arc::new(PendingTable::new());
        let first = handle_for(&table, "1", Duration::from_secs(5));
        let second = handle_for(&table, "2", Duration::from_secs(5));

        assert_eq!(table.fail_all(|| IpcError::ConnectionLost), 2);
        assert!(table.is_empty());
        assert!(matches!(first.await, Err(IpcError::ConnectionLost)));
        assert!(matches!(second.await, Err(IpcError::ConnectionLost)));
    }
}
