use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::users::{ConnectionId, User};

/// A relayed message. Never mutated once appended to a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Per-channel sequence number, in arrival order.
    pub id: u64,
    pub sender_id: ConnectionId,
    #[serde(rename = "displayName")]
    pub sender_display_name: String,
    #[serde(flatten)]
    pub content: MessageContent,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Message {
    pub(crate) fn new(id: u64, sender: &User, content: MessageContent) -> Self {
        Self {
            id,
            sender_id: sender.connection_id,
            sender_display_name: sender.display_name.clone(),
            content,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MessageContent {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Voice {
        audio_blob_ref: String,
    },
    Image {
        url: String,
        caption: String,
    },
    Video {
        url: String,
        caption: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MessageContent {
    pub fn media(kind: MediaKind, url: String, caption: String) -> Self {
        match kind {
            MediaKind::Image => Self::Image { url, caption },
            MediaKind::Video => Self::Video { url, caption },
        }
    }

    /// Nothing worth relaying: blank text, or a missing blob/url.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text { text } => text.trim().is_empty(),
            Self::Voice { audio_blob_ref } => audio_blob_ref.is_empty(),
            Self::Image { url, .. } | Self::Video { url, .. } => url.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sender() -> User {
        User {
            connection_id: ConnectionId::new(),
            display_name: "alice".into(),
            current_channel: Some("general".into()),
        }
    }

    #[test]
    fn text_message_wire_shape() {
        let user = sender();
        let msg = Message::new(7, &user, MessageContent::Text { text: "hi".into() });
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["id"], 7);
        assert_eq!(value["kind"], "text");
        assert_eq!(value["senderId"], json!(user.connection_id));
        assert_eq!(value["displayName"], "alice");
        assert_eq!(value["text"], "hi");
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn media_and_voice_fields() {
        let user = sender();
        let video = Message::new(
            1,
            &user,
            MessageContent::media(MediaKind::Video, "/uploads/a.mp4".into(), String::new()),
        );
        let value = serde_json::to_value(&video).unwrap();
        assert_eq!(value["kind"], "video");
        assert_eq!(value["url"], "/uploads/a.mp4");
        assert_eq!(value["caption"], "");

        let voice = Message::new(
            2,
            &user,
            MessageContent::Voice {
                audio_blob_ref: "blob:1".into(),
            },
        );
        let value = serde_json::to_value(&voice).unwrap();
        assert_eq!(value["kind"], "voice");
        assert_eq!(value["audioBlobRef"], "blob:1");
    }

    #[test]
    fn empty_content() {
        assert!(MessageContent::Text { text: "  ".into() }.is_empty());
        assert!(
            MessageContent::Voice {
                audio_blob_ref: String::new()
            }
            .is_empty()
        );
        assert!(MessageContent::media(MediaKind::Image, String::new(), "cap".into()).is_empty());
        assert!(!MessageContent::Text { text: "ok".into() }.is_empty());
    }
}
