//! Platform-specific endpoint discovery.
//!
//! - Unix: Unix Domain Socket at `{base_dir}/discord-ipc-{slot}`
//! - Windows: Named Pipe at `\\?\pipe\discord-ipc-{slot}`
//!
//! # Example
//!
//! ```ignore
//! use discord_ipc_client::transport::{open, ConnectOptions, LocalSocketConnector};
//!
//! let options = ConnectOptions::default();
//! let connector = LocalSocketConnector::new(&options);
//! let (slot, stream) = open(&connector, options.slots()).await?;
//! ```

use std::io;
use std::ops::RangeInclusive;
use std::path::PathBuf;

use super::stream::{BoxFuture, Connector, IpcStream};
use crate::error::{IpcError, Result};

/// Highest endpoint slot the peer may listen on.
pub const MAX_SLOT: u8 = 9;

/// Endpoint file/pipe name prefix.
pub const ENDPOINT_PREFIX: &str = "discord-ipc-";

/// Environment variables consulted, in order, for the socket directory.
const BASE_DIR_ENV_VARS: [&str; 4] = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"];

/// Options controlling where `connect()` looks for the peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Only try this slot (0-9) instead of scanning all of them.
    pub slot: Option<u8>,
    /// Directory holding the socket files (Unix only). Defaults to the
    /// first of `XDG_RUNTIME_DIR`, `TMPDIR`, `TMP`, `TEMP`, then `/tmp`.
    pub base_dir: Option<PathBuf>,
}

impl ConnectOptions {
    /// Check that a pinned slot is in range.
    pub fn validate(&self) -> Result<()> {
        match self.slot {
            Some(slot) if slot > MAX_SLOT => Err(IpcError::InvalidConfig(format!(
                "slot must be between 0 and {MAX_SLOT}, got {slot}"
            ))),
            _ => Ok(()),
        }
    }

    /// Slots to probe, in order.
    pub fn slots(&self) -> RangeInclusive<u8> {
        match self.slot {
            Some(slot) => slot..=slot,
            None => 0..=MAX_SLOT,
        }
    }

    /// Base directory after applying the environment fallbacks.
    pub fn resolved_base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(default_base_dir)
    }
}

/// Socket directory from the environment, falling back to `/tmp`.
pub fn default_base_dir() -> PathBuf {
    BASE_DIR_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Connector for the real peer: Unix domain sockets or Windows named pipes.
#[derive(Debug, Clone)]
pub struct LocalSocketConnector {
    #[cfg_attr(windows, allow(dead_code))]
    base_dir: PathBuf,
}

impl LocalSocketConnector {
    /// Build a connector from connect options.
    pub fn new(options: &ConnectOptions) -> Self {
        Self {
            base_dir: options.resolved_base_dir(),
        }
    }

    /// Address of the endpoint for `slot`.
    pub fn endpoint_path(&self, slot: u8) -> PathBuf {
        #[cfg(unix)]
        {
            self.base_dir.join(format!("{ENDPOINT_PREFIX}{slot}"))
        }

        #[cfg(windows)]
        {
            PathBuf::from(format!(r"\\?\pipe\{ENDPOINT_PREFIX}{slot}"))
        }
    }
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
impl Connector for LocalSocketConnector {
    fn connect(&self, slot: u8) -> BoxFuture<'_, io::Result<IpcStream>> {
        let path = self.endpoint_path(slot);
        Box::pin(async move {
            let stream = tokio::net::UnixStream::connect(&path).await?;
            Ok(IpcStream::new(stream))
        })
    }

    fn describe(&self, slot: u8) -> String {
        self.endpoint_path(slot).display().to_string()
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
impl Connector for LocalSocketConnector {
    fn connect(&self, slot: u8) -> BoxFuture<'_, io::Result<IpcStream>> {
        use tokio::net::windows::named_pipe::ClientOptions;

        let path = self.endpoint_path(slot);
        Box::pin(async move {
            let pipe = ClientOptions::new().open(&path)?;
            Ok(IpcStream::new(pipe))
        })
    }

    fn describe(&self, slot: u8) -> String {
        self.endpoint_path(slot).display().to_string()
    }
}
