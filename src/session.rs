//! Connection lifecycle.
//!
//! A [`Session`] owns one connection at a time and walks it through
//!
//! ```text
//! Disconnected ─connect()─► Connecting ─transport open─► Handshaking
//!      ▲                        │                            │
//!      │                        └──────── failure ───────────┤
//!      │                                                     │ READY
//!      └─── Closing ◄── close() / transport error ◄─── Connected
//! ```
//!
//! All mutable fields live behind one lock. Every transition out of
//! `Connected` bumps the generation counter, stops the connection's tasks and
//! fails every pending request inside the same critical section, so a reply
//! can never be delivered across connections. Tasks carry the generation they
//! were spawned for; a report from a stale task is ignored.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::dispatcher::{route, PendingTable, PreparedCommand, ResponseHandle};
use crate::error::{IpcError, Result};
use crate::handler::EventRegistry;
use crate::handshake::{check_acknowledgment, HandshakeMessage};
use crate::model::ClosePayload;
use crate::protocol::{Frame, FrameBuffer, Opcode, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::transport::{self, ConnectOptions, Connector};
use crate::writer::{writer_channel, writer_loop, OutboundFrame, WriterConfig, WriterHandle};

/// Default time allowed for the peer to answer the handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time a command waits for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Read buffer size for the reader task.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// Probing endpoint slots.
    Connecting,
    /// Handshake sent, waiting for READY.
    Handshaking,
    /// Ready for commands.
    Connected,
    /// Tearing the connection down.
    Closing,
}

/// Why the session last left `Connected` (or failed to reach it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `close()` was called.
    Closed,
    /// The peer sent a `Close` frame.
    PeerClosed {
        /// Close code.
        code: i64,
        /// Close message.
        message: String,
    },
    /// The peer closed the stream.
    EndOfStream,
    /// Read or write failure.
    Transport(String),
    /// The peer sent a frame that could not be decoded.
    Malformed(String),
    /// A connect attempt failed before reaching `Connected`.
    ConnectFailed(String),
}

impl DisconnectReason {
    /// Whether this was a loss of an established connection the caller did
    /// not ask for.
    pub fn is_unexpected(&self) -> bool {
        matches!(
            self,
            Self::PeerClosed { .. } | Self::EndOfStream | Self::Transport(_) | Self::Malformed(_)
        )
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed by caller"),
            Self::PeerClosed { code, message } => write!(f, "peer closed ({code}): {message}"),
            Self::EndOfStream => write!(f, "end of stream"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Malformed(e) => write!(f, "malformed frame: {e}"),
            Self::ConnectFailed(e) => write!(f, "connect failed: {e}"),
        }
    }
}

/// Snapshot published on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Reason for the last disconnect, cleared when a new attempt starts.
    pub reason: Option<DisconnectReason>,
    /// Connection generation; changes on every transition in or out of a
    /// connection.
    pub generation: u64,
    /// Slot of the live connection.
    pub slot: Option<u8>,
    /// Set when automatic reconnection gave up after this many attempts.
    pub unrecoverable: Option<u32>,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Application (client) ID sent in the handshake.
    pub client_id: String,
    /// Where to look for the peer.
    pub connect: ConnectOptions,
    /// Time allowed for the READY acknowledgment.
    pub handshake_timeout: Duration,
    /// Time each command waits for its reply.
    pub request_timeout: Duration,
    /// Largest inbound or outbound payload accepted.
    pub max_payload_size: u32,
    /// Writer task settings.
    pub writer: WriterConfig,
}

impl SessionConfig {
    /// Configuration with defaults for `client_id`.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            connect: ConnectOptions::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            writer: WriterConfig::default(),
        }
    }

    /// Reject unusable settings.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(IpcError::InvalidConfig("client_id must not be empty".into()));
        }
        if self.handshake_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(IpcError::InvalidConfig("timeouts must be non-zero".into()));
        }
        if self.max_payload_size == 0 {
            return Err(IpcError::InvalidConfig("max_payload_size must be non-zero".into()));
        }
        self.connect.validate()
    }
}

struct Inner {
    state: ConnectionState,
    generation: u64,
    reason: Option<DisconnectReason>,
    slot: Option<u8>,
    unrecoverable: Option<u32>,
    closed_by_caller: bool,
    writer: Option<WriterHandle>,
    writer_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
}

impl Inner {
    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            reason: self.reason.clone(),
            generation: self.generation,
            slot: self.slot,
            unrecoverable: self.unrecoverable,
        }
    }

    fn stop_tasks(&mut self, abort_writer: bool) {
        self.writer = None;
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.take() {
            if abort_writer {
                task.abort();
            }
        }
    }
}

/// Who asked for a connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectMode {
    Caller,
    Reconnect,
}

/// One logical connection to the peer, reusable across reconnects.
pub struct Session {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    inner: Mutex<Inner>,
    pending: Arc<PendingTable>,
    events: Arc<EventRegistry>,
    status_tx: watch::Sender<SessionStatus>,
}

impl Session {
    /// Create a disconnected session.
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        let inner = Inner {
            state: ConnectionState::Disconnected,
            generation: 0,
            reason: None,
            slot: None,
            unrecoverable: None,
            closed_by_caller: false,
            writer: None,
            writer_task: None,
            reader_task: None,
        };
        let (status_tx, _) = watch::channel(inner.status());

        Arc::new(Self {
            config,
            connector,
            inner: Mutex::new(inner),
            pending: Arc::new(PendingTable::new()),
            events: Arc::new(EventRegistry::new()),
            status_tx,
        })
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Event listeners fed by this session.
    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Current status snapshot.
    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Number of commands awaiting replies.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Connect and complete the handshake.
    ///
    /// Returns immediately if already connected. Re-arms reconnection after a
    /// previous `close()`. Resolves to the generation of the live connection.
    ///
    /// # Errors
    ///
    /// `AlreadyConnecting` if another attempt is in flight, `NoEndpointFound`,
    /// `HandshakeRejected` or `Timeout` if the attempt fails.
    pub async fn connect(self: &Arc<Self>) -> Result<u64> {
        self.connect_with(ConnectMode::Caller).await
    }

    /// Connect on behalf of the reconnection supervisor.
    ///
    /// # Errors
    ///
    /// `ReconnectDisabled` once `close()` has been called; otherwise as
    /// [`connect`](Self::connect).
    pub async fn reconnect(self: &Arc<Self>) -> Result<u64> {
        self.connect_with(ConnectMode::Reconnect).await
    }

    async fn connect_with(self: &Arc<Self>, mode: ConnectMode) -> Result<u64> {
        let generation = {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Connected => return Ok(inner.generation),
                ConnectionState::Connecting
                | ConnectionState::Handshaking
                | ConnectionState::Closing => return Err(IpcError::AlreadyConnecting),
                ConnectionState::Disconnected => {}
            }
            match mode {
                ConnectMode::Reconnect if inner.closed_by_caller => {
                    return Err(IpcError::ReconnectDisabled)
                }
                ConnectMode::Caller => {
                    inner.closed_by_caller = false;
                    inner.unrecoverable = None;
                }
                ConnectMode::Reconnect => {}
            }

            inner.state = ConnectionState::Connecting;
            inner.generation += 1;
            inner.reason = None;
            self.status_tx.send_replace(inner.status());
            inner.generation
        };
        tracing::debug!(generation, ?mode, "connecting");

        let mut guard = AttemptGuard {
            session: self,
            generation,
            failure: None,
        };
        match self.establish(generation).await {
            Ok(()) => {
                guard.disarm();
                Ok(generation)
            }
            Err(e) => {
                guard.failure = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn establish(self: &Arc<Self>, generation: u64) -> Result<()> {
        // Any later transition (close, writer failure) moves the generation on
        let mut status = self.status_tx.subscribe();
        let (slot, stream) = transport::open(&*self.connector, self.config.connect.slots()).await?;
        let (mut read_half, write_half) = stream.into_split();

        let (writer, rx) = writer_channel(&self.config.writer);
        let weak = Arc::downgrade(self);
        let writer_task = tokio::spawn(async move {
            if let Err(e) = writer_loop(rx, write_half).await {
                tracing::warn!(generation, error = %e, "writer task failed");
                if let Some(session) = weak.upgrade() {
                    session.connection_lost(generation, DisconnectReason::Transport(e.to_string()));
                }
            }
        });

        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                writer_task.abort();
                return Err(IpcError::ConnectionLost);
            }
            inner.state = ConnectionState::Handshaking;
            inner.slot = Some(slot);
            inner.writer = Some(writer.clone());
            inner.writer_task = Some(writer_task);
            self.status_tx.send_replace(inner.status());
        }

        let handshake = HandshakeMessage::new(self.config.client_id.as_str()).to_frame()?;
        writer.send(handshake.into()).await?;

        let mut buffer = FrameBuffer::with_max_payload(self.config.max_payload_size);
        let acknowledged = tokio::time::timeout(
            self.config.handshake_timeout,
            read_frames(&mut read_half, &mut buffer),
        );
        let mut frames = tokio::select! {
            result = acknowledged => result.map_err(|_| IpcError::Timeout)??,
            _ = status.wait_for(|s| s.generation != generation) => {
                tracing::debug!(generation, "handshake abandoned");
                return Err(IpcError::ConnectionLost);
            }
        };

        let acknowledgment = frames.remove(0);
        let ready = check_acknowledgment(&acknowledgment)?;

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return Err(IpcError::ConnectionLost);
        }

        let reader = Reader {
            session: Arc::downgrade(self),
            generation,
            pending: self.pending.clone(),
            events: self.events.clone(),
            writer,
        };
        inner.reader_task = Some(tokio::spawn(reader.run(read_half, buffer, ready, frames)));
        inner.state = ConnectionState::Connected;
        self.status_tx.send_replace(inner.status());
        tracing::info!(slot, generation, "connected to IPC peer");
        Ok(())
    }

    /// Close the connection and disable automatic reconnection.
    ///
    /// Pending requests fail with `ConnectionLost`. Frames already queued
    /// are still flushed.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed_by_caller = true;
        if inner.state == ConnectionState::Disconnected {
            inner.reason = Some(DisconnectReason::Closed);
            self.status_tx.send_replace(inner.status());
            return;
        }

        inner.state = ConnectionState::Closing;
        inner.generation += 1;
        inner.stop_tasks(false);
        self.pending.fail_all(|| IpcError::ConnectionLost);
        inner.state = ConnectionState::Disconnected;
        inner.slot = None;
        inner.reason = Some(DisconnectReason::Closed);
        self.status_tx.send_replace(inner.status());
        tracing::info!(generation = inner.generation, "session closed");
    }

    /// Tear down the connection of `generation` after a failure.
    ///
    /// Ignored if that connection is already gone.
    pub(crate) fn connection_lost(&self, generation: u64, reason: DisconnectReason) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            tracing::trace!(generation, current = inner.generation, "stale failure report ignored");
            return;
        }

        let reason = match inner.state {
            ConnectionState::Connected => reason,
            ConnectionState::Handshaking => DisconnectReason::ConnectFailed(reason.to_string()),
            _ => return,
        };

        inner.state = ConnectionState::Closing;
        inner.generation += 1;
        inner.stop_tasks(true);
        let failed = self.pending.fail_all(|| IpcError::ConnectionLost);
        inner.state = ConnectionState::Disconnected;
        inner.slot = None;
        tracing::warn!(%reason, failed_requests = failed, "connection lost");
        inner.reason = Some(reason);
        self.status_tx.send_replace(inner.status());
    }

    fn abandon_attempt(&self, generation: u64, failure: String) {
        let mut inner = self.inner.lock();
        if inner.generation != generation
            || !matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Handshaking
            )
        {
            return;
        }

        inner.generation += 1;
        inner.stop_tasks(true);
        inner.state = ConnectionState::Disconnected;
        inner.slot = None;
        tracing::debug!(error = %failure, "connect attempt failed");
        inner.reason = Some(DisconnectReason::ConnectFailed(failure));
        self.status_tx.send_replace(inner.status());
    }

    /// Record that automatic reconnection gave up.
    pub fn report_unrecoverable(&self, attempts: u32) {
        let mut inner = self.inner.lock();
        inner.unrecoverable = Some(attempts);
        tracing::error!(attempts, "reconnection attempts exhausted");
        self.status_tx.send_replace(inner.status());
    }

    /// Serialize `command`, register it and write it.
    ///
    /// The returned handle resolves with the reply.
    ///
    /// # Errors
    ///
    /// `NotConnected` (no I/O performed) unless `Connected`;
    /// `InvalidCommand` for non-object commands, non-string or duplicate
    /// nonces and oversized payloads.
    pub async fn submit<T: Serialize + ?Sized>(&self, command: &T) -> Result<ResponseHandle> {
        let prepared = PreparedCommand::new(command)?;
        let payload = Bytes::from(serde_json::to_vec(&prepared.payload)?);
        if payload.len() > self.config.max_payload_size as usize {
            return Err(IpcError::InvalidCommand(format!(
                "payload of {} bytes exceeds maximum of {}",
                payload.len(),
                self.config.max_payload_size
            )));
        }

        let (writer, rx) = {
            let inner = self.inner.lock();
            let writer = match (&inner.state, &inner.writer) {
                (ConnectionState::Connected, Some(writer)) => writer.clone(),
                _ => return Err(IpcError::NotConnected),
            };
            let rx = self.pending.register(&prepared.nonce)?;
            (writer, rx)
        };

        let handle = ResponseHandle::new(
            prepared.nonce,
            rx,
            self.config.request_timeout,
            self.pending.clone(),
        );
        writer.send(OutboundFrame::new(Opcode::Frame, payload)).await?;
        tracing::debug!(nonce = handle.nonce(), "command sent");
        Ok(handle)
    }

    /// Send `command` and wait for its reply.
    pub async fn send<T: Serialize + ?Sized>(&self, command: &T) -> Result<Value> {
        self.submit(command).await?.await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        inner.stop_tasks(true);
        self.pending.fail_all(|| IpcError::ConnectionLost);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.config.client_id)
            .field("status", &self.status())
            .finish()
    }
}

/// Resets the session if a connect attempt fails or is cancelled.
struct AttemptGuard<'a> {
    session: &'a Session,
    generation: u64,
    failure: Option<String>,
}

impl AttemptGuard<'_> {
    fn disarm(&mut self) {
        self.generation = 0;
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.generation != 0 {
            let failure = self
                .failure
                .take()
                .unwrap_or_else(|| "connect cancelled".to_string());
            self.session.abandon_attempt(self.generation, failure);
        }
    }
}

/// Read until at least one complete frame is buffered.
async fn read_frames<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer: &mut FrameBuffer,
) -> Result<Vec<Frame>> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(IpcError::ConnectionLost);
        }
        let frames = buffer.push(&buf[..n])?;
        if !frames.is_empty() {
            return Ok(frames);
        }
    }
}

/// State owned by the reader task of one connection.
struct Reader {
    session: Weak<Session>,
    generation: u64,
    pending: Arc<PendingTable>,
    events: Arc<EventRegistry>,
    writer: WriterHandle,
}

impl Reader {
    async fn run<R: AsyncRead + Unpin>(
        self,
        mut reader: R,
        mut buffer: FrameBuffer,
        ready: Value,
        pipelined: Vec<Frame>,
    ) {
        route(&self.pending, &self.events, ready);

        let reason = match self.handle_all(pipelined) {
            Some(reason) => reason,
            None => self.read_loop(&mut reader, &mut buffer).await,
        };

        if let Some(session) = self.session.upgrade() {
            session.connection_lost(self.generation, reason);
        }
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        buffer: &mut FrameBuffer,
    ) -> DisconnectReason {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => return DisconnectReason::EndOfStream,
                Ok(n) => n,
                Err(e) => return DisconnectReason::Transport(e.to_string()),
            };

            let frames = match buffer.push(&buf[..n]) {
                Ok(frames) => frames,
                Err(e) => return DisconnectReason::Malformed(e.to_string()),
            };

            if let Some(reason) = self.handle_all(frames) {
                return reason;
            }
        }
    }

    fn handle_all(&self, frames: Vec<Frame>) -> Option<DisconnectReason> {
        frames.into_iter().find_map(|frame| self.handle_frame(frame))
    }

    /// Process one inbound frame. Returns a reason if the connection must end.
    fn handle_frame(&self, frame: Frame) -> Option<DisconnectReason> {
        match frame.opcode {
            Opcode::Frame => match frame.parse_json::<Value>() {
                Ok(payload) => {
                    route(&self.pending, &self.events, payload);
                }
                Err(e) => {
                    tracing::warn!(error = %e, bytes = frame.payload_len(), "skipping non-JSON payload");
                }
            },
            Opcode::Ping => {
                let pong = OutboundFrame::new(Opcode::Pong, frame.payload);
                if let Err(e) = self.writer.try_send(pong) {
                    tracing::warn!(error = %e, "failed to queue pong");
                }
            }
            Opcode::Pong => {
                tracing::trace!("pong received");
            }
            Opcode::Close => {
                let close = ClosePayload::from_frame(&frame);
                return Some(DisconnectReason::PeerClosed {
                    code: close.code,
                    message: close.message,
                });
            }
            Opcode::Handshake => {
                tracing::warn!("ignoring handshake frame from peer");
            }
        }
        None
    }
}
