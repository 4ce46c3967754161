//! Typed events carried by the realtime channel.
//!
//! Every event has a stable wire name (`location:update`, `betting:placed`,
//! ...) and a JSON-serializable payload. Location events originate inside
//! this subsystem; the business events are relayed for the backing system
//! and only their shape matters here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::geo::VerificationResult;
use crate::location::LocationSample;

/// Event kinds understood by the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LocationUpdate,
    LocationVerified,
    LocationError,
    SessionCompleted,
    ReputationChanged,
    AchievementUnlocked,
    BettingUpdate,
    BettingPlaced,
}

impl EventKind {
    /// The wire name for this event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LocationUpdate => "location:update",
            EventKind::LocationVerified => "location:verified",
            EventKind::LocationError => "location:error",
            EventKind::SessionCompleted => "session:completed",
            EventKind::ReputationChanged => "reputation:changed",
            EventKind::AchievementUnlocked => "achievement:unlocked",
            EventKind::BettingUpdate => "betting:update",
            EventKind::BettingPlaced => "betting:placed",
        }
    }

    /// Parses a wire name back into an event kind.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "location:update" => Some(EventKind::LocationUpdate),
            "location:verified" => Some(EventKind::LocationVerified),
            "location:error" => Some(EventKind::LocationError),
            "session:completed" => Some(EventKind::SessionCompleted),
            "reputation:changed" => Some(EventKind::ReputationChanged),
            "achievement:unlocked" => Some(EventKind::AchievementUnlocked),
            "betting:update" => Some(EventKind::BettingUpdate),
            "betting:placed" => Some(EventKind::BettingPlaced),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `location:update`: the fresh sample plus tracking metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdateEvent {
    pub sample: LocationSample,
    /// Elapsed time since tracking started, in milliseconds.
    pub tracking_duration_ms: u64,
    /// Ground track derived from recent history, if reliable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived_track_deg: Option<f64>,
}

/// Payload of `location:error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationErrorEvent {
    pub code: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Payload of `session:completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCompletedEvent {
    pub session_id: String,
    pub subject_id: String,
    pub arrived: bool,
    pub timestamp: DateTime<Utc>,
}

/// Payload of `reputation:changed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationChangedEvent {
    pub subject_id: String,
    pub delta: i64,
    pub total: i64,
    pub timestamp: DateTime<Utc>,
}

/// Payload of `achievement:unlocked`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementUnlockedEvent {
    pub subject_id: String,
    pub achievement_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Payload of `betting:update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BettingUpdateEvent {
    pub commitment_id: String,
    pub bet_id: String,
    pub amount: f64,
    /// True when the bettor predicts an on-time arrival.
    pub prediction: bool,
    pub odds: f64,
    pub timestamp: DateTime<Utc>,
}

/// Payload of `betting:placed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BettingPlacedEvent {
    pub commitment_id: String,
    pub bet_id: String,
    pub bettor_id: String,
    pub amount: f64,
    pub prediction: bool,
    pub timestamp: DateTime<Utc>,
}

/// A typed channel event: kind plus payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    LocationUpdate(LocationUpdateEvent),
    LocationVerified(VerificationResult),
    LocationError(LocationErrorEvent),
    SessionCompleted(SessionCompletedEvent),
    ReputationChanged(ReputationChangedEvent),
    AchievementUnlocked(AchievementUnlockedEvent),
    BettingUpdate(BettingUpdateEvent),
    BettingPlaced(BettingPlacedEvent),
}

/// Wire form of an event: name plus JSON payload.
///
/// No framing is assumed beyond "event name + JSON-serializable payload".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub event: String,
    pub payload: Value,
}

/// Errors translating between wire messages and typed events.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    /// The wire name is not one this channel understands.
    #[error("unknown event kind: {0}")]
    UnknownKind(String),

    /// The payload did not match the expected shape for its kind.
    #[error("malformed payload for {kind}: {source}")]
    MalformedPayload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

impl ChannelEvent {
    /// The kind tag of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            ChannelEvent::LocationUpdate(_) => EventKind::LocationUpdate,
            ChannelEvent::LocationVerified(_) => EventKind::LocationVerified,
            ChannelEvent::LocationError(_) => EventKind::LocationError,
            ChannelEvent::SessionCompleted(_) => EventKind::SessionCompleted,
            ChannelEvent::ReputationChanged(_) => EventKind::ReputationChanged,
            ChannelEvent::AchievementUnlocked(_) => EventKind::AchievementUnlocked,
            ChannelEvent::BettingUpdate(_) => EventKind::BettingUpdate,
            ChannelEvent::BettingPlaced(_) => EventKind::BettingPlaced,
        }
    }

    /// Serializes the event into its wire form.
    pub fn to_wire(&self) -> Result<WireMessage, serde_json::Error> {
        let payload = match self {
            ChannelEvent::LocationUpdate(p) => serde_json::to_value(p)?,
            ChannelEvent::LocationVerified(p) => serde_json::to_value(p)?,
            ChannelEvent::LocationError(p) => serde_json::to_value(p)?,
            ChannelEvent::SessionCompleted(p) => serde_json::to_value(p)?,
            ChannelEvent::ReputationChanged(p) => serde_json::to_value(p)?,
            ChannelEvent::AchievementUnlocked(p) => serde_json::to_value(p)?,
            ChannelEvent::BettingUpdate(p) => serde_json::to_value(p)?,
            ChannelEvent::BettingPlaced(p) => serde_json::to_value(p)?,
        };

        Ok(WireMessage {
            event: self.kind().as_str().to_string(),
            payload,
        })
    }

    /// Decodes a wire message into a typed event.
    ///
    /// Remote-origin messages decoded here flow through the same dispatch
    /// path as locally emitted events, so consumers cannot tell an
    /// optimistic local update from a server-confirmed one except by
    /// payload content.
    pub fn from_wire(message: &WireMessage) -> Result<Self, EventDecodeError> {
        let kind = EventKind::parse(&message.event)
            .ok_or_else(|| EventDecodeError::UnknownKind(message.event.clone()))?;

        let malformed = |source| EventDecodeError::MalformedPayload { kind, source };
        let payload = message.payload.clone();

        let event = match kind {
            EventKind::LocationUpdate => {
                ChannelEvent::LocationUpdate(serde_json::from_value(payload).map_err(malformed)?)
            }
            EventKind::LocationVerified => {
                ChannelEvent::LocationVerified(serde_json::from_value(payload).map_err(malformed)?)
            }
            EventKind::LocationError => {
                ChannelEvent::LocationError(serde_json::from_value(payload).map_err(malformed)?)
            }
            EventKind::SessionCompleted => {
                ChannelEvent::SessionCompleted(serde_json::from_value(payload).map_err(malformed)?)
            }
            EventKind::ReputationChanged => {
                ChannelEvent::ReputationChanged(serde_json::from_value(payload).map_err(malformed)?)
            }
            EventKind::AchievementUnlocked => ChannelEvent::AchievementUnlocked(
                serde_json::from_value(payload).map_err(malformed)?,
            ),
            EventKind::BettingUpdate => {
                ChannelEvent::BettingUpdate(serde_json::from_value(payload).map_err(malformed)?)
            }
            EventKind::BettingPlaced => {
                ChannelEvent::BettingPlaced(serde_json::from_value(payload).map_err(malformed)?)
            }
        };

        Ok(event)
    }
}
