//! Typed JSON payloads exchanged with the peer.
//!
//! - [`Command`] - outbound requests
//! - [`Activity`] - rich presence, with a fluent builder
//! - [`ReadyEvent`] - data of the handshake acknowledgment
//! - [`ClosePayload`] - body of a `Close` frame

mod activity;
mod command;
mod ready;

pub use activity::{
    Activity, ActivityAssets, ActivityBuilder, ActivityParty, ActivityTimestamps, ActivityType,
    PartyPrivacy, StatusDisplayType,
};
pub use command::{ClosePayload, Command, SET_ACTIVITY, SUBSCRIBE, UNSUBSCRIBE};
pub(crate) use command::ErrorData;
pub use ready::{ReadyConfig, ReadyEvent};
