//! Error types for discord-ipc-client.

use thiserror::Error;

/// Main error type for all IPC operations.
#[derive(Debug, Error)]
pub enum IpcError {
    /// I/O error during pipe/socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Every candidate endpoint slot refused the connection.
    #[error("No IPC endpoint found (is the Discord client running?)")]
    NoEndpointFound,

    /// The peer answered the handshake with something other than READY.
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Protocol-level decode violation (unknown kind, oversized frame).
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Operation requires a connected session.
    #[error("Not connected")]
    NotConnected,

    /// Another connect attempt is already in flight.
    #[error("Connection attempt already in progress")]
    AlreadyConnecting,

    /// Request or handshake did not complete in time.
    #[error("Operation timed out")]
    Timeout,

    /// The connection dropped while the operation was outstanding.
    #[error("Connection lost")]
    ConnectionLost,

    /// Reconnection attempts were exhausted.
    #[error("Reconnection failed after {attempts} attempts")]
    Unrecoverable {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// The peer replied to a command with an ERROR event.
    #[error("Command failed ({code}): {message}")]
    CommandFailed {
        /// Peer error code.
        code: i64,
        /// Peer error message.
        message: String,
    },

    /// The command could not be turned into a request frame.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Automatic reconnection was disabled by an explicit close.
    #[error("Reconnection disabled by close()")]
    ReconnectDisabled,

    /// Rejected builder/connect option.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias using IpcError.
pub type Result<T> = std::result::Result<T, IpcError>;
