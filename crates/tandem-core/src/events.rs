//! Typed realtime event surface.
//!
//! Frames are JSON objects `{"type": ..., "data": {...}}`. Outbound frames
//! additionally carry a server `timestamp`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ChatError;
use crate::ids::{ConnectionId, RequestId, UserId};
use crate::models::{Connection, ConnectionRequest, DisconnectReason, Message};

/// Events a client sends over its transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    Join {
        user_id: UserId,
        username: String,
    },
    SendMessage {
        connection_id: ConnectionId,
        sender_id: UserId,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    TypingStart {
        connection_id: ConnectionId,
    },
    TypingStop {
        connection_id: ConnectionId,
    },
    RequestSent {
        to_username: String,
        from_username: String,
        request_id: RequestId,
    },
    RequestAccepted {
        connection_id: ConnectionId,
        user_a_id: UserId,
        user_b_id: UserId,
    },
    Disconnect {
        connection_id: ConnectionId,
        user_id: UserId,
    },
}

impl ClientEvent {
    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        serde_json::from_str(raw).map_err(|e| ChatError::InvalidEvent(e.to_string()))
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::SendMessage { .. } => "sendMessage",
            Self::TypingStart { .. } => "typingStart",
            Self::TypingStop { .. } => "typingStop",
            Self::RequestSent { .. } => "requestSent",
            Self::RequestAccepted { .. } => "requestAccepted",
            Self::Disconnect { .. } => "disconnect",
        }
    }
}

/// Events the server pushes to sessions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Joined {
        user_id: UserId,
        username: String,
        current_connection: Option<Connection>,
    },
    NewMessage {
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    UserTyping {
        connection_id: ConnectionId,
        user_id: UserId,
        username: String,
        typing: bool,
    },
    NewConnectionRequest {
        request: ConnectionRequest,
    },
    ConnectionEstablished {
        connection: Connection,
    },
    ConnectionEnded {
        connection_id: ConnectionId,
        reason: DisconnectReason,
        ended_by: UserId,
        ended_by_username: String,
    },
    UserOnline {
        user_id: UserId,
        username: String,
    },
    UserOffline {
        user_id: UserId,
        username: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(err: &ChatError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.client_message(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "joined",
            Self::NewMessage { .. } => "newMessage",
            Self::UserTyping { .. } => "userTyping",
            Self::NewConnectionRequest { .. } => "newConnectionRequest",
            Self::ConnectionEstablished { .. } => "connectionEstablished",
            Self::ConnectionEnded { .. } => "connectionEnded",
            Self::UserOnline { .. } => "userOnline",
            Self::UserOffline { .. } => "userOffline",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize into the timestamped wire frame.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&WireFrame {
            event: self,
            timestamp: Utc::now(),
        })
    }
}

#[derive(Serialize)]
struct WireFrame<'a> {
    #[serde(flatten)]
    event: &'a ServerEvent,
    timestamp: DateTime<Utc>,
}
