//! Reconnection supervisor and presence restore across connections.

mod common;

use std::time::Duration;

use common::{connector, ready_frame, STEP_TIMEOUT};
use discord_ipc_client::model::Activity;
use discord_ipc_client::protocol::{Frame, Opcode};
use discord_ipc_client::{Client, ConnectionState, IpcError, ReconnectPolicy};
use serde_json::json;

#[tokio::test]
async fn test_reconnects_after_peer_drop() {
    let (connector, mut endpoint) = connector(&[0]);
    let client = Client::builder("1234")
        .reconnect(ReconnectPolicy::fixed(Duration::from_millis(20)))
        .connector(connector)
        .build()
        .unwrap();

    let first = tokio::spawn(async move {
        let (_, mut peer) = endpoint.next_peer().await;
        peer.accept().await;
        (peer, endpoint)
    });
    client.connect().await.unwrap();
    let (peer, mut endpoint) = first.await.unwrap();
    let first_generation = client.subscribe_state().borrow().generation;

    // Drop the connection; the supervisor dials again
    drop(peer);
    let (_, mut peer) = endpoint.next_peer().await;
    peer.accept().await;

    let mut status = client.subscribe_state();
    let status = tokio::time::timeout(
        STEP_TIMEOUT,
        status.wait_for(|s| s.state == ConnectionState::Connected && s.generation > first_generation),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(status.slot, Some(0));

    let request = tokio::spawn(async move {
        peer.reply_next(json!({ "ok": true })).await;
        peer
    });
    assert_eq!(client.send(&json!({ "cmd": "A" })).await.unwrap(), json!({ "ok": true }));
    let _peer = request.await.unwrap();
}

#[tokio::test]
async fn test_reconnects_when_peer_closes_right_after_ready() {
    let (connector, mut endpoint) = connector(&[0]);
    let client = Client::builder("1234")
        .reconnect(ReconnectPolicy::fixed(Duration::from_millis(20)))
        .connector(connector)
        .build()
        .unwrap();

    let peers = tokio::spawn(async move {
        let (_, mut first) = endpoint.next_peer().await;
        first.recv_handshake().await;
        let close = Frame::json(Opcode::Close, &json!({ "code": 4000, "message": "restarting" })).unwrap();
        first.send_batch(&[ready_frame(), close]).await;

        let (_, mut second) = endpoint.next_peer().await;
        second.accept().await;
        (first, second)
    });

    client.connect().await.unwrap();

    // Only completes once the supervisor has dialled again
    let _peers = tokio::time::timeout(STEP_TIMEOUT, peers).await.unwrap().unwrap();

    let mut status = client.subscribe_state();
    let status = tokio::time::timeout(
        STEP_TIMEOUT,
        status.wait_for(|s| s.state == ConnectionState::Connected),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(status.generation, 3);
}

#[tokio::test]
async fn test_activity_restored_after_reconnect() {
    let (connector, mut endpoint) = connector(&[0]);
    let client = Client::builder("1234")
        .reconnect(ReconnectPolicy::fixed(Duration::from_millis(20)))
        .connector(connector)
        .build()
        .unwrap();

    // Cached before the first connection, sent on READY
    let cached = client
        .set_activity(Some(Activity::builder().details("Restored").build()))
        .await
        .unwrap();
    assert!(cached.is_none());

    let peers = tokio::spawn(async move {
        let mut restored = Vec::new();
        for _ in 0..2 {
            let (_, mut peer) = endpoint.next_peer().await;
            peer.accept().await;
            let request = peer.reply_next(json!({ "cmd": "SET_ACTIVITY", "evt": null })).await;
            restored.push(request);
            // Dropping the peer forces a reconnect
        }
        restored
    });

    client.connect().await.unwrap();
    let restored = peers.await.unwrap();

    assert_eq!(restored.len(), 2);
    for request in restored {
        assert_eq!(request["cmd"], "SET_ACTIVITY");
        assert_eq!(request["args"]["activity"]["details"], "Restored");
    }
}

#[tokio::test]
async fn test_unrecoverable_after_max_attempts() {
    let (connector, mut endpoint) = connector(&[0]);
    let client = Client::builder("1234")
        .reconnect(ReconnectPolicy::fixed(Duration::from_millis(10)).with_max_attempts(3))
        .connector(connector)
        .build()
        .unwrap();

    let first = tokio::spawn(async move {
        let (_, mut peer) = endpoint.next_peer().await;
        peer.accept().await;
        (peer, endpoint)
    });
    client.connect().await.unwrap();
    let (peer, endpoint) = first.await.unwrap();

    endpoint.set_enabled(false);
    drop(peer);

    let result = tokio::time::timeout(STEP_TIMEOUT, client.wait_for_shutdown())
        .await
        .unwrap();
    assert!(matches!(result, Err(IpcError::Unrecoverable { attempts: 3 })));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    // Initial attempt, then three reconnects over all ten slots
    assert_eq!(endpoint.attempts.lock().len(), 1 + 3 * 10);
}

#[tokio::test]
async fn test_close_disables_reconnect() {
    let (connector, mut endpoint) = connector(&[0]);
    let client = Client::builder("1234")
        .reconnect(ReconnectPolicy::fixed(Duration::from_millis(10)))
        .connector(connector)
        .build()
        .unwrap();

    let first = tokio::spawn(async move {
        let (_, mut peer) = endpoint.next_peer().await;
        peer.accept().await;
        (peer, endpoint)
    });
    client.connect().await.unwrap();
    let (_peer, endpoint) = first.await.unwrap();

    client.close();
    client.wait_for_shutdown().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(*endpoint.attempts.lock(), vec![0]);
}

#[tokio::test]
async fn test_never_policy_reports_connection_lost() {
    let (connector, mut endpoint) = connector(&[0]);
    let client = Client::builder("1234").connector(connector).build().unwrap();

    let first = tokio::spawn(async move {
        let (_, mut peer) = endpoint.next_peer().await;
        peer.accept().await;
        (peer, endpoint)
    });
    client.connect().await.unwrap();
    let (peer, endpoint) = first.await.unwrap();
    drop(peer);

    let result = tokio::time::timeout(STEP_TIMEOUT, client.wait_for_shutdown())
        .await
        .unwrap();
    assert!(matches!(result, Err(IpcError::ConnectionLost)));
    assert_eq!(*endpoint.attempts.lock(), vec![0]);
}
