//! In-memory stand-in for the desktop app's IPC endpoint.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use discord_ipc_client::protocol::{Frame, FrameBuffer, Opcode};
use discord_ipc_client::transport::{BoxFuture, Connector, IpcStream};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

/// Upper bound for any single wait in these tests.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Connector that accepts only chosen slots and hands the peer side of
/// every accepted connection to the test.
pub struct TestConnector {
    accepting: HashSet<u8>,
    enabled: Arc<AtomicBool>,
    attempts: Arc<Mutex<Vec<u8>>>,
    peers: mpsc::UnboundedSender<(u8, DuplexStream)>,
}

/// Test-side view of a [`TestConnector`].
pub struct Endpoint {
    pub enabled: Arc<AtomicBool>,
    pub attempts: Arc<Mutex<Vec<u8>>>,
    peers: mpsc::UnboundedReceiver<(u8, DuplexStream)>,
}

impl Endpoint {
    /// Wait for the next accepted connection.
    pub async fn next_peer(&mut self) -> (u8, FakePeer) {
        let (slot, stream) = tokio::time::timeout(STEP_TIMEOUT, self.peers.recv())
            .await
            .expect("no connection within timeout")
            .expect("connector dropped");
        (slot, FakePeer::new(stream))
    }

    /// Refuse (or accept again) every slot.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

/// The `READY` dispatch acknowledging a handshake.
pub fn ready_frame() -> Frame {
    Frame::json(
        Opcode::Frame,
        &json!({
            "cmd": "DISPATCH",
            "evt": "READY",
            "data": {
                "v": 1,
                "config": { "cdn_host": "cdn.discordapp.com", "environment": "production" },
                "user": { "id": "42", "username": "tester" }
            },
            "nonce": null
        }),
    )
    .unwrap()
}

/// Connector accepting `slots`.
pub fn connector(slots: &[u8]) -> (TestConnector, Endpoint) {
    let enabled = Arc::new(AtomicBool::new(true));
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::unbounded_channel();

    let connector = TestConnector {
        accepting: slots.iter().copied().collect(),
        enabled: enabled.clone(),
        attempts: attempts.clone(),
        peers: tx,
    };
    let endpoint = Endpoint {
        enabled,
        attempts,
        peers: rx,
    };
    (connector, endpoint)
}

impl Connector for TestConnector {
    fn connect(&self, slot: u8) -> BoxFuture<'_, io::Result<IpcStream>> {
        self.attempts.lock().push(slot);
        let accept = self.enabled.load(Ordering::SeqCst) && self.accepting.contains(&slot);

        Box::pin(async move {
            if !accept {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            let (client, peer) = duplex(64 * 1024);
            self.peers
                .send((slot, peer))
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "test gone"))?;
            Ok(IpcStream::new(client))
        })
    }
}

/// The peer end of one connection.
pub struct FakePeer {
    stream: DuplexStream,
    buffer: FrameBuffer,
    queued: VecDeque<Frame>,
}

impl FakePeer {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buffer: FrameBuffer::new(),
            queued: VecDeque::new(),
        }
    }

    /// Next frame from the client.
    pub async fn recv(&mut self) -> Frame {
        tokio::time::timeout(STEP_TIMEOUT, self.recv_inner())
            .await
            .expect("no frame within timeout")
    }

    async fn recv_inner(&mut self) -> Frame {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.queued.pop_front() {
                return frame;
            }
            let n = self.stream.read(&mut buf).await.expect("peer read failed");
            assert!(n > 0, "client closed the connection");
            self.queued.extend(self.buffer.push(&buf[..n]).expect("client sent bad frame"));
        }
    }

    /// Next `Frame`-kind payload from the client, as JSON.
    pub async fn recv_json(&mut self) -> Value {
        let frame = self.recv().await;
        assert_eq!(frame.opcode, Opcode::Frame);
        frame.parse_json().expect("client sent non-JSON")
    }

    /// Send a frame to the client.
    pub async fn send(&mut self, frame: Frame) {
        self.stream.write_all(&frame.encode()).await.expect("peer write failed");
    }

    /// Send a JSON `Frame`-kind payload.
    pub async fn send_json(&mut self, value: Value) {
        self.send(Frame::json(Opcode::Frame, &value).unwrap()).await;
    }

    /// Send several frames in a single write.
    pub async fn send_batch(&mut self, frames: &[Frame]) {
        let bytes: Vec<u8> = frames.iter().flat_map(Frame::encode).collect();
        self.stream.write_all(&bytes).await.expect("peer write failed");
    }

    /// Read the client's handshake. Returns its payload.
    pub async fn recv_handshake(&mut self) -> Value {
        let handshake = self.recv().await;
        assert_eq!(handshake.opcode, Opcode::Handshake);
        handshake.parse_json().unwrap()
    }

    /// Read the handshake and acknowledge it. Returns the handshake payload.
    pub async fn accept(&mut self) -> Value {
        let payload = self.recv_handshake().await;
        self.send(ready_frame()).await;
        payload
    }

    /// Answer the next command by echoing its nonce with `body`.
    pub async fn reply_next(&mut self, body: Value) -> Value {
        let request = self.recv_json().await;
        let mut reply = body;
        reply["nonce"] = request["nonce"].clone();
        self.send_json(reply).await;
        request
    }
}
