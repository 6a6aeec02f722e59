//! Automatic reconnection after an unexpected disconnect.
//!
//! The supervisor is a separate task that only talks to the [`Session`]
//! through its public surface: it watches the status channel, sleeps for the
//! policy's backoff delay and calls [`Session::reconnect`]. Attempts stop when
//! one succeeds, when `close()` disables reconnection, or when the policy's
//! attempt limit is reached.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::IpcError;
use crate::session::{ConnectionState, Session};

/// Default first delay for exponential backoff.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Default delay cap for exponential backoff.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default growth factor for exponential backoff.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Delay schedule between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Backoff {
    /// Never reconnect.
    #[default]
    Never,
    /// Same delay before every attempt.
    Fixed {
        /// Delay before each attempt.
        delay: Duration,
    },
    /// Delay grows by `multiplier` per attempt, capped at `max_delay`.
    Exponential {
        /// Delay before the first attempt.
        initial: Duration,
        /// Growth factor.
        multiplier: f64,
        /// Upper bound.
        max_delay: Duration,
    },
}

/// When and how often to reconnect.
///
/// ```
/// use std::time::Duration;
/// use discord_ipc_client::ReconnectPolicy;
///
/// let policy = ReconnectPolicy::exponential().with_max_attempts(5);
/// assert_eq!(policy.delay_for(1), Some(Duration::from_millis(500)));
/// assert_eq!(policy.delay_for(6), None);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReconnectPolicy {
    /// Delay schedule.
    pub backoff: Backoff,
    /// Give up after this many failed attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Never reconnect.
    pub fn never() -> Self {
        Self::default()
    }

    /// Retry every `delay`.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            backoff: Backoff::Fixed { delay },
            max_attempts: None,
        }
    }

    /// Exponential backoff with the default parameters.
    pub fn exponential() -> Self {
        Self {
            backoff: Backoff::Exponential {
                initial: DEFAULT_INITIAL_DELAY,
                multiplier: DEFAULT_MULTIPLIER,
                max_delay: DEFAULT_MAX_DELAY,
            },
            max_attempts: None,
        }
    }

    /// Limit the number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Whether the policy ever reconnects.
    pub fn is_enabled(&self) -> bool {
        !matches!(self.backoff, Backoff::Never) && self.max_attempts != Some(0)
    }

    /// Delay before attempt number `attempt` (1-based), or `None` once the
    /// policy gives up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }

        match &self.backoff {
            Backoff::Never => None,
            Backoff::Fixed { delay } => Some(*delay),
            Backoff::Exponential {
                initial,
                multiplier,
                max_delay,
            } => {
                let factor = multiplier.max(1.0).powi((attempt - 1).min(i32::MAX as u32) as i32);
                let nanos = (initial.as_nanos() as f64 * factor).min(max_delay.as_nanos() as f64);
                Some(Duration::from_nanos(nanos as u64))
            }
        }
    }
}

/// Start supervising `session`, whose connection `generation` is live.
///
/// The task ends when the session is dropped, `close()` is called, or the
/// policy gives up.
pub(crate) fn spawn_supervisor(
    session: Weak<Session>,
    policy: ReconnectPolicy,
    generation: u64,
) -> JoinHandle<()> {
    tokio::spawn(supervise(session, policy, generation))
}

async fn supervise(session: Weak<Session>, policy: ReconnectPolicy, mut handled: u64) {
    let Some(mut status) = session.upgrade().map(|s| s.subscribe()) else {
        return;
    };

    loop {
        let lost = {
            let current = status.borrow_and_update();
            let lost = current.state == ConnectionState::Disconnected
                && current.generation > handled
                && current.reason.as_ref().is_some_and(|r| r.is_unexpected());
            if lost {
                handled = current.generation;
            }
            lost
        };

        if lost {
            match retry(&session, &policy).await {
                RetryOutcome::Reconnected(generation) => handled = handled.max(generation),
                // The competing attempt starts a newer generation; its own loss is
                // picked up on the next pass.
                RetryOutcome::Superseded => {}
                RetryOutcome::Stop => return,
            }
        }

        if status.changed().await.is_err() {
            return;
        }
    }
}

enum RetryOutcome {
    Reconnected(u64),
    Superseded,
    Stop,
}

async fn retry(session: &Weak<Session>, policy: &ReconnectPolicy) -> RetryOutcome {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let Some(delay) = policy.delay_for(attempt) else {
            if let Some(session) = session.upgrade() {
                session.report_unrecoverable(attempt - 1);
            }
            return RetryOutcome::Stop;
        };

        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after delay");
        tokio::time::sleep(delay).await;

        let Some(session) = session.upgrade() else {
            return RetryOutcome::Stop;
        };
        match session.reconnect().await {
            Ok(generation) => {
                tracing::info!(attempt, generation, "reconnected");
                return RetryOutcome::Reconnected(generation);
            }
            Err(IpcError::ReconnectDisabled) => {
                tracing::debug!("reconnection disabled by close()");
                return RetryOutcome::Stop;
            }
            Err(IpcError::AlreadyConnecting) => {
                tracing::debug!("another connect attempt is in flight");
                return RetryOutcome::Superseded;
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "reconnect attempt failed");
            }
        }
    }
}
