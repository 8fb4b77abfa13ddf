//! Rooms, memberships and the events that flow through a room.
//!
//! Board and chat events are a closed tagged variant; the same JSON shape
//! is used on the relay socket, in the persisted logs and in replay output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/* ------------ rooms ------------ */

/// Snapshot of a room as stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub name: String,
    pub capacity: u32,
    pub active: bool,
    /// Arrival order.
    pub participants: Vec<String>,
    /// FIFO.
    pub waitlist: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// The room row without its membership lists.
#[derive(Debug, Clone)]
pub struct RoomHeader {
    pub id: String,
    pub name: String,
    pub capacity: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Participant,
    Waitlisted,
}

impl MemberStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberStatus::Participant => "participant",
            MemberStatus::Waitlisted => "waitlisted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "participant" => Some(MemberStatus::Participant),
            "waitlisted" => Some(MemberStatus::Waitlisted),
            _ => None,
        }
    }
}

/* ------------ events ------------ */

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Draw,
    Erase,
}

/// One step of a stroke. Only the start carries styling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum Stroke {
    Start {
        x: f64,
        y: f64,
        color: String,
        #[serde(alias = "lineWidth")]
        width: f64,
    },
    Point {
        x: f64,
        y: f64,
    },
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardEvent {
    #[serde(default)]
    pub tool: Tool,
    #[serde(flatten)]
    pub stroke: Stroke,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Filled in by the relay from the sending connection.
    #[serde(default)]
    pub identity: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RoomEvent {
    Board(BoardEvent),
    Chat(ChatEvent),
}

/// Which of a room's two append-only logs an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLog {
    Board,
    Chat,
}

impl EventLog {
    pub fn as_str(self) -> &'static str {
        match self {
            EventLog::Board => "board",
            EventLog::Chat => "chat",
        }
    }
}

impl RoomEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RoomEvent::Board(b) => b.timestamp,
            RoomEvent::Chat(c) => c.timestamp,
        }
    }

    pub fn log(&self) -> EventLog {
        match self {
            RoomEvent::Board(_) => EventLog::Board,
            RoomEvent::Chat(_) => EventLog::Chat,
        }
    }
}

/// An event read back from a log, with its global append sequence.
#[derive(Debug, Clone)]
pub struct LoggedEvent {
    pub seq: i64,
    pub event: RoomEvent,
}

/* ------------ relay wire frames ------------ */

/// A frame sent by a relay client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Join { room_id: String, identity: String },
    Publish { room_id: String, event: RoomEvent },
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("frame has no kind")]
    MissingKind,
    #[error("frame has no roomId")]
    MissingRoom,
    #[error("join frame has no identity")]
    MissingIdentity,
    #[error("unknown frame kind '{0}'")]
    UnknownKind(String),
    #[error("invalid {kind} event: {source}")]
    InvalidEvent {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ClientFrame {
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(raw).map_err(FrameError::Json)?;
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingKind)?
            .to_string();
        // older clients still send classId
        let room_id = value
            .get("roomId")
            .or_else(|| value.get("classId"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(FrameError::MissingRoom)?
            .to_string();

        match kind.as_str() {
            "join" => {
                let identity = value
                    .get("identity")
                    .and_then(Value::as_str)
                    .ok_or(FrameError::MissingIdentity)?
                    .to_string();
                Ok(ClientFrame::Join { room_id, identity })
            }
            "board" | "chat" => {
                let event = serde_json::from_value(value)
                    .map_err(|source| FrameError::InvalidEvent { kind, source })?;
                Ok(ClientFrame::Publish { room_id, event })
            }
            _ => Err(FrameError::UnknownKind(kind)),
        }
    }
}

/// Frames the server originates (events are relayed as plain `RoomEvent`s).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ServerFrame {
    Joined {
        #[serde(rename = "roomId")]
        room_id: String,
        identity: String,
    },
    PeerJoined {
        identity: String,
    },
    PeerLeft {
        identity: String,
    },
    Error {
        message: String,
    },
}
