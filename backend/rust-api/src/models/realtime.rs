use serde::{Deserialize, Serialize};
use std::fmt;

use super::live_quiz::{QuizStatus, SessionSnapshot};
use super::participant::{Participant, ParticipantIdentity};
use super::timer::TimerSnapshot;

/// Room key. Quiz rooms carry session traffic; department rooms only
/// announce quizzes going live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum RoomId {
    Quiz(String),
    Department(String),
}

impl RoomId {
    pub fn quiz(id: impl Into<String>) -> Self {
        RoomId::Quiz(id.into())
    }

    pub fn department(id: impl Into<String>) -> Self {
        RoomId::Department(id.into())
    }

    pub fn quiz_id(&self) -> Option<&str> {
        match self {
            RoomId::Quiz(id) => Some(id),
            RoomId::Department(_) => None,
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::Quiz(id) => write!(f, "quiz:{}", id),
            RoomId::Department(id) => write!(f, "department:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Manual,
    TimeUp,
    WindowClosed,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Manual => "manual",
            EndReason::TimeUp => "time_up",
            EndReason::WindowClosed => "window_closed",
        }
    }
}

/// Client → server frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Without an identity the connection observes the room but is not on the roster.
    Join {
        room: RoomId,
        #[serde(default)]
        identity: Option<ParticipantIdentity>,
    },
    Leave {
        room: RoomId,
    },
    Ping,
}

/// Server → client frames. Every payload is a self-sufficient snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Joined {
        room: RoomId,
        session: SessionSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    Status {
        room: RoomId,
        status: QuizStatus,
        is_live: bool,
    },
    Roster {
        room: RoomId,
        participants: Vec<Participant>,
    },
    TimerSnapshot {
        room: RoomId,
        snapshot: TimerSnapshot,
    },
    /// Terminal for the room.
    Ended {
        room: RoomId,
        reason: EndReason,
    },
    ErrorNotice {
        #[serde(default)]
        room: Option<RoomId>,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    QuizWentLive {
        room: RoomId,
        quiz_id: String,
        title: String,
    },
    /// Department rooms: a quiz announced by `quizWentLive` is over.
    #[serde(rename_all = "camelCase")]
    QuizClosed {
        room: RoomId,
        quiz_id: String,
    },
    Pong,
}

impl ServerMessage {
    pub fn status(room: RoomId, status: QuizStatus) -> Self {
        ServerMessage::Status {
            room,
            status,
            is_live: status.is_live(),
        }
    }

    pub fn room(&self) -> Option<&RoomId> {
        match self {
            ServerMessage::Joined { room, .. }
            | ServerMessage::Status { room, .. }
            | ServerMessage::Roster { room, .. }
            | ServerMessage::TimerSnapshot { room, .. }
            | ServerMessage::Ended { room, .. }
            | ServerMessage::QuizWentLive { room, .. }
            | ServerMessage::QuizClosed { room, .. } => Some(room),
            ServerMessage::ErrorNotice { room, .. } => room.as_ref(),
            ServerMessage::Pong => None,
        }
    }

    /// Event label used for metrics and logs.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::Status { .. } => "status",
            ServerMessage::Roster { .. } => "roster",
            ServerMessage::TimerSnapshot { .. } => "timer_snapshot",
            ServerMessage::Ended { .. } => "ended",
            ServerMessage::ErrorNotice { .. } => "error_notice",
            ServerMessage::QuizWentLive { .. } => "quiz_went_live",
            ServerMessage::QuizClosed { .. } => "quiz_closed",
            ServerMessage::Pong => "pong",
        }
    }
}
