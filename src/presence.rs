//! Rich presence that survives reconnects.
//!
//! The latest activity is cached and re-sent every time the peer
//! acknowledges a handshake, so a presence set once stays visible across
//! connection losses.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::Result;
use crate::handler::{Event, Subscription};
use crate::handshake::READY_EVENT;
use crate::model::{Activity, Command};
use crate::session::{ConnectionState, Session};

/// Cached activity for one process.
#[derive(Debug)]
pub struct PresenceManager {
    pid: u32,
    current: Mutex<Option<Activity>>,
}

impl PresenceManager {
    /// Manager for the current process.
    pub fn new() -> Self {
        Self::with_pid(std::process::id())
    }

    /// Manager reporting activities for `pid`.
    pub fn with_pid(pid: u32) -> Self {
        Self {
            pid,
            current: Mutex::new(None),
        }
    }

    /// Process ID sent with every update.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The cached activity.
    pub fn current(&self) -> Option<Activity> {
        self.current.lock().clone()
    }

    /// Replace the cached activity and return the command announcing it.
    pub fn update(&self, activity: Option<Activity>) -> Command {
        let command = Command::set_activity(self.pid, activity.as_ref());
        *self.current.lock() = activity;
        command
    }

    /// Command restoring the cached activity, if one is set.
    pub fn restore_command(&self) -> Option<Command> {
        self.current
            .lock()
            .as_ref()
            .map(|activity| Command::set_activity(self.pid, Some(activity)))
    }

    /// Store `activity` and send it if `session` is connected.
    ///
    /// Returns the peer's reply, or `None` if the update was only cached.
    pub async fn apply(&self, session: &Session, activity: Option<Activity>) -> Result<Option<Value>> {
        let command = self.update(activity);
        if session.state() != ConnectionState::Connected {
            tracing::debug!("not connected, activity cached for next READY");
            return Ok(None);
        }
        session.send(&command).await.map(Some)
    }

    /// Re-send the cached activity on every READY from `session`.
    pub fn attach(self: &Arc<Self>, session: &Arc<Session>) -> Subscription {
        let presence = Arc::downgrade(self);
        let session_ref: Weak<Session> = Arc::downgrade(session);

        session.events().register(READY_EVENT, move |_: &Event| {
            let (Some(presence), Some(session)) = (presence.upgrade(), session_ref.upgrade()) else {
                return;
            };
            let Some(command) = presence.restore_command() else {
                return;
            };

            tokio::spawn(async move {
                match session.send(&command).await {
                    Ok(_) => tracing::debug!("restored activity after READY"),
                    Err(e) => tracing::warn!(error = %e, "failed to restore activity"),
                }
            });
        })
    }
}

impl Default for PresenceManager {
    fn default() -> Self {
        Self::new()
    }
}
