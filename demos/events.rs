//! Events - subscribe to peer events and watch the connection.
//!
//! This example demonstrates:
//! - Typed listeners with `on_event_data`
//! - Sending `SUBSCRIBE` commands
//! - Watching connection state changes
//!
//! # Running
//!
//! ```sh
//! DISCORD_CLIENT_ID=945428344806183003 cargo run --example events
//! ```

use discord_ipc_client::handler::Event;
use discord_ipc_client::model::{Command, ReadyEvent};
use discord_ipc_client::{Client, ReconnectPolicy};
use serde::Deserialize;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Data of `ACTIVITY_JOIN`.
#[derive(Deserialize, Debug)]
struct JoinSecret {
    secret: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client_id = std::env::var("DISCORD_CLIENT_ID")?;
    let client = Client::builder(client_id)
        .reconnect(ReconnectPolicy::fixed(Duration::from_secs(2)))
        .build()?;

    client.on_event_data("READY", |ready: ReadyEvent| {
        tracing::info!(environment = %ready.config.environment, "peer ready");
    });
    client.on_event_data("ACTIVITY_JOIN", |join: JoinSecret| {
        tracing::info!(secret = %join.secret, "join requested");
    });
    client.on_event("ACTIVITY_JOIN_REQUEST", |event: &Event| {
        tracing::info!(user = %event.data["user"]["username"], "someone asked to join");
    });

    let mut state = client.subscribe_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let status = state.borrow_and_update().clone();
            tracing::info!(state = ?status.state, reason = ?status.reason, "connection state changed");
        }
    });

    client.connect().await?;
    for event in ["ACTIVITY_JOIN", "ACTIVITY_JOIN_REQUEST"] {
        client.send(&Command::subscribe(event)).await?;
    }

    tokio::select! {
        result = client.wait_for_shutdown() => result?,
        _ = tokio::signal::ctrl_c() => client.close(),
    }

    Ok(())
}
