//! Presence - keep a rich presence activity visible.
//!
//! This example demonstrates:
//! - Building an [`Activity`] with the fluent builder
//! - Reconnecting with exponential backoff
//! - Restoring the activity after every reconnect
//!
//! # Running
//!
//! With the desktop app open:
//!
//! ```sh
//! DISCORD_CLIENT_ID=945428344806183003 RUST_LOG=debug cargo run --example presence
//! ```

use discord_ipc_client::model::{Activity, ActivityAssets, ActivityTimestamps, PartyPrivacy};
use discord_ipc_client::{Client, ReconnectPolicy};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client_id = std::env::var("DISCORD_CLIENT_ID")?;

    let client = Client::builder(client_id)
        .reconnect(ReconnectPolicy::exponential().with_max_attempts(10))
        .build()?;

    // Cached now, sent as soon as the handshake completes
    let activity = Activity::builder()
        .details("Writing Rust")
        .state("In a pair session")
        .party("demo-party", 1, 2, Some(PartyPrivacy::Public))
        .timestamps(ActivityTimestamps::now())
        .assets(ActivityAssets {
            large_image: Some("logo".into()),
            large_text: Some("discord-ipc-client".into()),
            ..Default::default()
        })
        .build();
    client.set_activity(Some(activity)).await?;

    client.connect().await?;
    tracing::info!("presence set, press Ctrl+C to exit");

    tokio::select! {
        result = client.wait_for_shutdown() => result?,
        _ = tokio::signal::ctrl_c() => {
            client.clear_activity().await?;
            client.close();
        }
    }

    Ok(())
}
