//! Socket wire protocol. Every frame is `{"event": <name>, "data": <payload>}`.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::rooms::{ChannelId, MediaKind, Message, MessageContent};
use crate::users::{ConnectionId, RosterEntry};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Events a client sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Register(RegisterPayload),
    JoinChannel(JoinPayload),
    LeaveChannel,
    TextMessage(TextPayload),
    VoiceMessage(VoicePayload),
    MediaMessage(MediaPayload),
    Talking(TalkingPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    #[serde(default, alias = "username")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextPayload {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicePayload {
    #[serde(alias = "audio")]
    pub audio_blob_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    #[serde(alias = "mediaType")]
    pub media_kind: MediaKind,
    pub url: String,
    #[serde(default)]
    pub caption: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TalkingPayload {
    pub talking: bool,
}

impl ClientEvent {
    pub fn from_slice(frame: &[u8]) -> Result<Self, ProtocolError> {
        let Envelope { event, data } = serde_json::from_slice(frame)?;
        let event = match event.as_str() {
            "register" => Self::Register(payload(data)?),
            "join-channel" => Self::JoinChannel(payload(data)?),
            "leave-channel" => Self::LeaveChannel,
            "text-message" => Self::TextMessage(payload(data)?),
            "voice-message" => Self::VoiceMessage(payload(data)?),
            "media-message" => Self::MediaMessage(payload(data)?),
            "talking" => Self::Talking(payload(data)?),
            _ => return Err(ProtocolError::UnknownEvent(event)),
        };
        Ok(event)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::JoinChannel(_) => "join-channel",
            Self::LeaveChannel => "leave-channel",
            Self::TextMessage(_) => "text-message",
            Self::VoiceMessage(_) => "voice-message",
            Self::MediaMessage(_) => "media-message",
            Self::Talking(_) => "talking",
        }
    }
}

// A missing `data` means an empty payload, so optional fields still default.
fn payload<T: DeserializeOwned>(data: Value) -> Result<T, ProtocolError> {
    let data = match data {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    Ok(serde_json::from_value(data)?)
}

/// Events the server sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Registered {
        connection_id: ConnectionId,
        display_name: String,
    },
    ChannelHistory {
        channel_id: ChannelId,
        messages: Vec<Arc<Message>>,
    },
    ChannelUsers {
        channel_id: ChannelId,
        users: Vec<RosterEntry>,
    },
    UserJoined {
        connection_id: ConnectionId,
        display_name: String,
    },
    UserLeft {
        connection_id: ConnectionId,
        display_name: String,
    },
    TextMessage(Arc<Message>),
    VoiceMessage(Arc<Message>),
    MediaMessage(Arc<Message>),
    UserTalking {
        sender_id: ConnectionId,
        display_name: String,
        talking: bool,
    },
}

impl ServerEvent {
    /// The relay event carrying `msg`, named after its kind.
    pub fn for_message(msg: Arc<Message>) -> Self {
        match &msg.content {
            MessageContent::Text { .. } => Self::TextMessage(msg),
            MessageContent::Voice { .. } => Self::VoiceMessage(msg),
            MessageContent::Image { .. } | MessageContent::Video { .. } => Self::MediaMessage(msg),
        }
    }
}
