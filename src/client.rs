//! Client builder and caller-facing API.
//!
//! The [`ClientBuilder`] collects configuration; the [`Client`] wraps a
//! [`Session`] with:
//! 1. Command submission and reply correlation
//! 2. Event listeners
//! 3. Rich presence that is restored after every reconnect
//! 4. An optional reconnection supervisor
//!
//! # Example
//!
//! ```no_run
//! use discord_ipc_client::model::Activity;
//! use discord_ipc_client::{Client, ReconnectPolicy};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::builder("945428344806183003")
//!     .reconnect(ReconnectPolicy::exponential())
//!     .connect()
//!     .await?;
//!
//! client
//!     .set_activity(Some(Activity::builder().state("In the menus").build()))
//!     .await?;
//!
//! client.wait_for_shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::dispatcher::ResponseHandle;
use crate::error::{IpcError, Result};
use crate::handler::{EventHandler, Subscription};
use crate::model::Activity;
use crate::presence::PresenceManager;
use crate::reconnect::{spawn_supervisor, ReconnectPolicy};
use crate::session::{ConnectionState, DisconnectReason, Session, SessionConfig, SessionStatus};
use crate::transport::{Connector, LocalSocketConnector};

/// Builder for configuring and creating a client.
pub struct ClientBuilder {
    config: SessionConfig,
    policy: ReconnectPolicy,
    connector: Option<Arc<dyn Connector>>,
}

impl ClientBuilder {
    /// Start a builder for the application `client_id`.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            config: SessionConfig::new(client_id),
            policy: ReconnectPolicy::default(),
            connector: None,
        }
    }

    /// Only try endpoint slot `slot` (0-9).
    pub fn slot(mut self, slot: u8) -> Self {
        self.config.connect.slot = Some(slot);
        self
    }

    /// Look for socket files in `dir` instead of the environment default.
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.connect.base_dir = Some(dir.into());
        self
    }

    /// Time allowed for the READY acknowledgment.
    ///
    /// Default: 5 seconds
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Time each command waits for its reply.
    ///
    /// Default: 10 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Largest payload accepted in either direction.
    ///
    /// Default: 1 MiB
    pub fn max_payload_size(mut self, bytes: u32) -> Self {
        self.config.max_payload_size = bytes;
        self
    }

    /// Capacity of the outbound frame queue.
    ///
    /// Default: 256
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    /// Reconnection policy.
    ///
    /// Default: never reconnect
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use a custom connector instead of the platform socket/pipe.
    pub fn connector<C: Connector>(mut self, connector: C) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Build a disconnected client.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for an empty client ID, zero timeouts or an
    /// out-of-range slot.
    pub fn build(self) -> Result<Client> {
        self.config.validate()?;

        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(LocalSocketConnector::new(&self.config.connect)),
        };
        let session = Session::new(self.config, connector);
        let presence = Arc::new(PresenceManager::new());
        let presence_subscription = presence.attach(&session);

        Ok(Client {
            session,
            presence,
            policy: self.policy,
            supervisor: Mutex::new(None),
            _presence_subscription: presence_subscription,
        })
    }

    /// Build the client and connect it.
    pub async fn connect(self) -> Result<Client> {
        let client = self.build()?;
        client.connect().await?;
        Ok(client)
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("custom_connector", &self.connector.is_some())
            .finish()
    }
}

/// A client for the local IPC peer.
///
/// Dropping the client closes the connection.
pub struct Client {
    session: Arc<Session>,
    presence: Arc<PresenceManager>,
    policy: ReconnectPolicy,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    _presence_subscription: Subscription,
}

impl Client {
    /// Create a new client builder.
    pub fn builder(client_id: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(client_id)
    }

    /// Connect and complete the handshake.
    ///
    /// Also re-enables automatic reconnection after [`close`](Self::close).
    pub async fn connect(&self) -> Result<()> {
        let generation = self.session.connect().await?;
        self.arm_supervisor(generation);
        Ok(())
    }

    fn arm_supervisor(&self, generation: u64) {
        if !self.policy.is_enabled() {
            return;
        }
        let mut supervisor = self.supervisor.lock();
        if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        *supervisor = Some(spawn_supervisor(
            Arc::downgrade(&self.session),
            self.policy.clone(),
            generation,
        ));
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Pending commands fail with `ConnectionLost`.
    pub fn close(&self) {
        if let Some(task) = self.supervisor.lock().take() {
            task.abort();
        }
        self.session.close();
    }

    /// Send a command and wait for its reply.
    ///
    /// The command must serialize to a JSON object. A string `nonce` field is
    /// used as-is; otherwise one is generated.
    ///
    /// # Errors
    ///
    /// `NotConnected`, `Timeout`, `ConnectionLost`, `CommandFailed` or
    /// `InvalidCommand`.
    pub async fn send<T: Serialize + ?Sized>(&self, command: &T) -> Result<Value> {
        self.session.send(command).await
    }

    /// Write a command and return a handle for its reply.
    ///
    /// Dropping the handle abandons the reply.
    pub async fn submit<T: Serialize + ?Sized>(&self, command: &T) -> Result<ResponseHandle> {
        self.session.submit(command).await
    }

    /// Listen for `event`. Listeners run on the reader task, in registration
    /// order, and must not block.
    pub fn on_event<H: EventHandler>(&self, event: &str, handler: H) -> Subscription {
        self.session.events().register(event, handler)
    }

    /// Listen for `event` with `data` deserialized as `T`.
    pub fn on_event_data<T, F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
    {
        self.session.events().register_typed(event, handler)
    }

    /// Remove a listener. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.session.events().remove(subscription)
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionStatus> {
        self.session.subscribe()
    }

    /// Set (or with `None`, clear) the rich presence activity.
    ///
    /// The activity is remembered and re-sent after every reconnect. Returns
    /// the peer's reply when connected, `None` if it was only cached.
    pub async fn set_activity(&self, activity: Option<Activity>) -> Result<Option<Value>> {
        self.presence.apply(&self.session, activity).await
    }

    /// Clear the rich presence activity.
    pub async fn clear_activity(&self) -> Result<Option<Value>> {
        self.set_activity(None).await
    }

    /// The activity that will be restored on reconnect.
    pub fn activity(&self) -> Option<Activity> {
        self.presence.current()
    }

    /// Wait until the client stops for good.
    ///
    /// Resolves with `Ok(())` after [`close`](Self::close), with
    /// `ConnectionLost` if the connection drops and reconnection is disabled,
    /// and with `Unrecoverable` once reconnection gives up.
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        let mut status = self.session.subscribe();
        let reconnecting = self.policy.is_enabled();

        loop {
            {
                let current = status.borrow_and_update();
                if let Some(attempts) = current.unrecoverable {
                    return Err(IpcError::Unrecoverable { attempts });
                }
                if current.state == ConnectionState::Disconnected {
                    match &current.reason {
                        Some(DisconnectReason::Closed) => return Ok(()),
                        Some(reason) if reason.is_unexpected() && !reconnecting => {
                            return Err(IpcError::ConnectionLost)
                        }
                        _ => {}
                    }
                }
            }

            if status.changed().await.is_err() {
                return Err(IpcError::ConnectionLost);
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("session", &self.session)
            .field("policy", &self.policy)
            .finish()
    }
}
