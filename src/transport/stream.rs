//! Type-erased duplex stream and the slot-probing connector seam.

use std::future::Future;
use std::io;
use std::ops::RangeInclusive;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};

use crate::error::{IpcError, Result};

/// Boxed future returned by [`Connector::connect`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Anything usable as the raw byte channel to the peer.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Connected duplex byte channel (socket, named pipe, or in-memory stream).
pub struct IpcStream {
    inner: Box<dyn AsyncStream>,
}

impl IpcStream {
    /// Wrap any async duplex stream.
    pub fn new<S: AsyncStream + 'static>(stream: S) -> Self {
        Self {
            inner: Box::new(stream),
        }
    }

    /// Split into read and write halves.
    pub fn into_split(self) -> (ReadHalf<IpcStream>, WriteHalf<IpcStream>) {
        tokio::io::split(self)
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream").finish_non_exhaustive()
    }
}

impl AsyncRead for IpcStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for IpcStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Opens the channel for one endpoint slot.
///
/// [`LocalSocketConnector`](super::LocalSocketConnector) is the platform
/// implementation; tests plug in in-memory connectors.
pub trait Connector: Send + Sync + 'static {
    /// Connect to `slot`. A refused or missing endpoint is an `Err`.
    fn connect(&self, slot: u8) -> BoxFuture<'_, io::Result<IpcStream>>;

    /// Human-readable address of `slot`, for logs.
    fn describe(&self, slot: u8) -> String {
        format!("slot {slot}")
    }
}

/// Try every slot in `slots` in increasing order and return the first that
/// accepts a connection.
///
/// # Errors
///
/// `NoEndpointFound` if every slot refused.
pub async fn open(connector: &dyn Connector, slots: RangeInclusive<u8>) -> Result<(u8, IpcStream)> {
    for slot in slots {
        match connector.connect(slot).await {
            Ok(stream) => {
                tracing::debug!(slot, address = %connector.describe(slot), "IPC endpoint accepted");
                return Ok((slot, stream));
            }
            Err(e) => {
                tracing::trace!(slot, address = %connector.describe(slot), error = %e, "IPC endpoint refused");
            }
        }
    }

    Err(IpcError::NoEndpointFound)
}
