//! Text wire protocol for the realtime stream endpoint.
//!
//! Every frame is a JSON object carrying a `type` discriminator:
//! ```text
//! { "type": "join", "participant": { "user_id": "u1", "name": "Ada", ... } }
//! ```
//!
//! Inbound kinds the client understands:
//!
//! | kind         | body                         | routed to       |
//! |--------------|------------------------------|-----------------|
//! | `full_state` | `participants: [Participant]`| roster          |
//! | `join`       | `participant: Participant`   | roster          |
//! | `leave`      | `user_id: String`            | roster          |
//! | `update`     | `user: Participant`          | roster          |
//! | `pong`       | (none)                       | consumed        |
//! | anything else| original object              | event relay     |
//!
//! Outbound kinds produced by the client: `resume`, `request_full_state`, `ping`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::roster::Participant;

/// Kinds that are reconciled into the roster rather than relayed.
pub const ROSTER_KINDS: [&str; 4] = ["full_state", "join", "leave", "update"];

/// Parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Wholesale roster replacement.
    FullState { participants: Vec<Participant> },
    /// Participant arrived (or re-announced).
    Join { participant: Participant },
    /// Participant left.
    Leave { user_id: String },
    /// Participant changed display fields.
    Update { user: Participant },
    /// Liveness reply to our `ping`.
    Pong,
    /// Any kind the core has no vocabulary for; carries the full original object.
    Other { kind: String, payload: Value },
}

/// Typed bodies of the kinds the client owns.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownFrame {
    FullState {
        #[serde(default)]
        participants: Vec<Participant>,
    },
    Join {
        participant: Participant,
    },
    Leave {
        user_id: String,
    },
    Update {
        user: Participant,
    },
    Pong,
}

impl InboundMessage {
    /// Parse a text frame.
    ///
    /// Fails on invalid JSON, on a missing/non-string `type`, and on a
    /// roster kind whose body does not match its schema.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;

        let kind = match value.get("type").and_then(Value::as_str) {
            Some(kind) => kind.to_owned(),
            None => return Err(ProtocolError::MissingType),
        };

        if kind != "pong" && !ROSTER_KINDS.contains(&kind.as_str()) {
            return Ok(InboundMessage::Other { kind, payload: value });
        }

        let frame: KnownFrame = serde_json::from_value(value)
            .map_err(|e| ProtocolError::DeserializationError(format!("{kind}: {e}")))?;

        Ok(match frame {
            KnownFrame::FullState { participants } => InboundMessage::FullState { participants },
            KnownFrame::Join { participant } => InboundMessage::Join { participant },
            KnownFrame::Leave { user_id } => InboundMessage::Leave { user_id },
            KnownFrame::Update { user } => InboundMessage::Update { user },
            KnownFrame::Pong => InboundMessage::Pong,
        })
    }

    /// The wire discriminator of this message.
    pub fn kind(&self) -> &str {
        match self {
            InboundMessage::FullState { .. } => "full_state",
            InboundMessage::Join { .. } => "join",
            InboundMessage::Leave { .. } => "leave",
            InboundMessage::Update { .. } => "update",
            InboundMessage::Pong => "pong",
            InboundMessage::Other { kind, .. } => kind,
        }
    }
}

/// Last known local playback, reported to the server on resume.
///
/// Values come from the embedding application; the client only reads them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalSnapshot {
    pub last_known_playback_time: Option<f64>,
    pub last_playback_state: Option<Value>,
    pub identity: Option<Value>,
}

/// Messages the client itself produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// First frame after every successful open.
    Resume {
        /// Client wall clock, milliseconds since the Unix epoch.
        client_time: u64,
        local_snapshot: LocalSnapshot,
    },
    RequestFullState {},
    Ping {},
}

impl OutboundMessage {
    pub fn resume(local_snapshot: LocalSnapshot) -> Self {
        let client_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        OutboundMessage::Resume { client_time, local_snapshot }
    }

    pub fn request_full_state() -> Self {
        OutboundMessage::RequestFullState {}
    }

    pub fn ping() -> Self {
        OutboundMessage::Ping {}
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode(self)
    }
}

/// Serialize any message to a text frame.
pub fn encode<M: Serialize + ?Sized>(message: &M) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    /// Frame is valid JSON but has no string `type` field.
    MissingType,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::MissingType => write!(f, "Frame has no type discriminator"),
        }
    }
}

impl std::error::Error for ProtocolError {}
