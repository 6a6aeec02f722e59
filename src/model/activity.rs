//! Rich presence activity payload.
//!
//! Only `details` or `state` is required by the peer; everything else is
//! optional and omitted from the JSON when unset.
//!
//! # Example
//!
//! ```
//! use discord_ipc_client::model::{Activity, PartyPrivacy};
//!
//! let activity = Activity::builder()
//!     .details("Selecting a game mode")
//!     .state("In lobby")
//!     .party("party-1", 2, 10, Some(PartyPrivacy::Public))
//!     .build();
//!
//! assert_eq!(activity.state.as_deref(), Some("In lobby"));
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Kind of activity shown on the user's profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ActivityType {
    /// "Playing {name}".
    #[default]
    Playing,
    /// "Listening to {name}".
    Listening,
    /// "Watching {name}".
    Watching,
    /// "Competing in {name}".
    Competing,
}

impl From<ActivityType> for u8 {
    fn from(kind: ActivityType) -> Self {
        match kind {
            ActivityType::Playing => 0,
            ActivityType::Listening => 2,
            ActivityType::Watching => 3,
            ActivityType::Competing => 5,
        }
    }
}

impl TryFrom<u8> for ActivityType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Playing),
            2 => Ok(Self::Listening),
            3 => Ok(Self::Watching),
            5 => Ok(Self::Competing),
            other => Err(format!("unsupported activity type {other}")),
        }
    }
}

/// Which field the user's status text shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StatusDisplayType {
    /// Application name (peer default).
    Name,
    /// The `state` field.
    State,
    /// The `details` field.
    Details,
}

impl From<StatusDisplayType> for u8 {
    fn from(kind: StatusDisplayType) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for StatusDisplayType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Name),
            1 => Ok(Self::State),
            2 => Ok(Self::Details),
            other => Err(format!("unsupported status display type {other}")),
        }
    }
}

/// Party visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PartyPrivacy {
    /// Only visible to party members.
    Private,
    /// Joinable by anyone.
    Public,
}

impl From<PartyPrivacy> for u8 {
    fn from(privacy: PartyPrivacy) -> Self {
        privacy as u8
    }
}

impl TryFrom<u8> for PartyPrivacy {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Private),
            1 => Ok(Self::Public),
            other => Err(format!("unsupported party privacy {other}")),
        }
    }
}

/// Party attached to an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityParty {
    /// Party identifier.
    pub id: String,
    /// `[current_size, max_size]`.
    pub size: [u32; 2],
    /// Visibility.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub privacy: Option<PartyPrivacy>,
}

/// Start/end of the activity, in Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivityTimestamps {
    /// Start time.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub start: Option<u64>,
    /// End time.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end: Option<u64>,
}

impl ActivityTimestamps {
    /// Open-ended activity starting now.
    pub fn now() -> Self {
        Self::from_times(SystemTime::now(), None)
    }

    /// Activity spanning `start` to `end`.
    pub fn from_times(start: SystemTime, end: Option<SystemTime>) -> Self {
        Self {
            start: Some(unix_millis(start)),
            end: end.map(unix_millis),
        }
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Images and hover texts for the activity card.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivityAssets {
    /// Large image key or URL.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub large_image: Option<String>,
    /// Large image hover text.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub large_text: Option<String>,
    /// Small image key or URL.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub small_image: Option<String>,
    /// Small image hover text.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub small_text: Option<String>,
}

/// Activity shown on the user's profile.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Activity {
    /// Activity type.
    #[serde(rename = "type", default)]
    pub kind: ActivityType,
    /// What the user is doing.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<String>,
    /// Link opened when clicking `details`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details_url: Option<String>,
    /// State of the party.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<String>,
    /// Link opened when clicking `state`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state_url: Option<String>,
    /// Field shown in the status text.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status_display_type: Option<StatusDisplayType>,
    /// Party information.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub party: Option<ActivityParty>,
    /// Elapsed/remaining time.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamps: Option<ActivityTimestamps>,
    /// Card images.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub assets: Option<ActivityAssets>,
}

impl Activity {
    /// Start building an activity.
    pub fn builder() -> ActivityBuilder {
        ActivityBuilder::default()
    }
}

/// Fluent builder for [`Activity`].
#[derive(Debug, Clone, Default)]
pub struct ActivityBuilder {
    activity: Activity,
}

impl ActivityBuilder {
    /// Set the activity type (default `Playing`).
    pub fn kind(mut self, kind: ActivityType) -> Self {
        self.activity.kind = kind;
        self
    }

    /// Set what the user is doing.
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.activity.details = Some(details.into());
        self
    }

    /// Set the link behind `details`.
    pub fn details_url(mut self, url: impl Into<String>) -> Self {
        self.activity.details_url = Some(url.into());
        self
    }

    /// Set the party state.
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.activity.state = Some(state.into());
        self
    }

    /// Set the link behind `state`.
    pub fn state_url(mut self, url: impl Into<String>) -> Self {
        self.activity.state_url = Some(url.into());
        self
    }

    /// Choose which field the status text shows.
    pub fn status_display_type(mut self, kind: StatusDisplayType) -> Self {
        self.activity.status_display_type = Some(kind);
        self
    }

    /// Attach a party.
    pub fn party(
        mut self,
        id: impl Into<String>,
        current_size: u32,
        max_size: u32,
        privacy: Option<PartyPrivacy>,
    ) -> Self {
        self.activity.party = Some(ActivityParty {
            id: id.into(),
            size: [current_size, max_size],
            privacy,
        });
        self
    }

    /// Set start/end timestamps.
    pub fn timestamps(mut self, timestamps: ActivityTimestamps) -> Self {
        self.activity.timestamps = Some(timestamps);
        self
    }

    /// Set card images.
    pub fn assets(mut self, assets: ActivityAssets) -> Self {
        self.activity.assets = Some(assets);
        self
    }

    /// Finish building.
    pub fn build(self) -> Activity {
        self.activity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_activity_json() {
        let activity = Activity::builder().state("In lobby").build();
        let value = serde_json::to_value(&activity).unwrap();

        assert_eq!(value, json!({ "type": 0, "state": "In lobby" }));
    }

    #[test]
    fn test_full_activity_json() {
        let activity = Activity::builder()
            .kind(ActivityType::Competing)
            .details("Ranked")
            .state("In queue")
            .status_display_type(StatusDisplayType::Details)
            .party("party-1", 2, 10, Some(PartyPrivacy::Public))
            .timestamps(ActivityTimestamps {
                start: Some(1_000),
                end: None,
            })
            .assets(ActivityAssets {
                large_image: Some("map".into()),
                ..Default::default()
            })
            .build();
        let value = serde_json::to_value(&activity).unwrap();

        assert_eq!(value["type"], 5);
        assert_eq!(value["status_display_type"], 2);
        assert_eq!(value["party"], json!({ "id": "party-1", "size": [2, 10], "privacy": 1 }));
        assert_eq!(value["timestamps"], json!({ "start": 1000 }));
        assert_eq!(value["assets"], json!({ "large_image": "map" }));
    }

    #[test]
    fn test_activity_type_values() {
        let pairs = [
            (ActivityType::Playing, 0u8),
            (ActivityType::Listening, 2),
            (ActivityType::Watching, 3),
            (ActivityType::Competing, 5),
        ];
        for (kind, value) in pairs {
            assert_eq!(u8::from(kind), value);
            assert_eq!(ActivityType::try_from(value).unwrap(), kind);
        }
        assert!(ActivityType::try_from(1).is_err());
    }

    #[test]
    fn test_activity_deserializes_from_peer_echo() {
        let activity: Activity = serde_json::from_value(json!({
            "type": 3,
            "details": "Movie night",
            "party": { "id": "p", "size": [1, 4] }
        }))
        .unwrap();

        assert_eq!(activity.kind, ActivityType::Watching);
        assert_eq!(activity.party.unwrap().privacy, None);
    }

    #[test]
    fn test_timestamps_now_is_open_ended() {
        let timestamps = ActivityTimestamps::now();
        assert!(timestamps.start.unwrap() > 0);
        assert!(timestamps.end.is_none());
    }
}
