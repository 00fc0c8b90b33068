//! Domain model for GroupMe entities carried in push payloads.

use core::fmt;

use serde::{Deserialize, Serialize};

/// A GroupMe entity id (user, group, message, …). The API uses opaque
/// decimal strings.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Id(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(id: &str) -> Self {
        Id(id.to_owned())
    }
}

impl From<String> for Id {
    fn from(id: String) -> Self {
        Id(id)
    }
}

/// A chat message, as pushed by the service and as returned by the REST
/// API. Direct messages carry `conversation_id` instead of `group_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    pub id: Id,
    pub source_guid: String,
    pub created_at: i64,
    pub group_id: Id,
    pub conversation_id: Id,
    pub user_id: Id,
    pub sender_id: Id,
    pub name: String,
    pub avatar_url: String,
    pub text: String,
    pub system: bool,
    pub favorited_by: Vec<Id>,
    pub attachments: Vec<Attachment>,
}

impl ChatMessage {
    /// The group this message belongs to, falling back to the DM
    /// conversation id.
    #[must_use]
    pub fn chat_id(&self) -> &Id {
        if self.group_id.as_str().is_empty() {
            &self.conversation_id
        } else {
            &self.group_id
        }
    }
}

/// A message attachment, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attachment {
    Image {
        url: String,
    },
    LinkedImage {
        url: String,
    },
    Video {
        url: String,
        #[serde(default)]
        preview_url: String,
    },
    File {
        file_id: String,
    },
    Location {
        name: String,
        lat: String,
        lng: String,
    },
    Emoji {
        placeholder: String,
        charmap: Vec<Vec<i64>>,
    },
    Reply {
        reply_id: Id,
        #[serde(default)]
        base_reply_id: Id,
    },
    Mentions {
        user_ids: Vec<Id>,
        #[serde(default)]
        loci: Vec<Vec<i64>>,
    },
    /// Attachment kinds this client does not model.
    #[serde(other)]
    Unknown,
}

/// A group member. Membership events deliver only partial members (id and
/// nickname); the REST API fills in the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Member {
    /// Membership id, distinct from the user id.
    pub id: Id,
    pub user_id: Id,
    pub nickname: String,
    pub image_url: String,
    pub muted: bool,
    pub autokicked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_decodes_from_push_subject() {
        let message: ChatMessage = serde_json::from_str(
            r#"{"id":"M1","group_id":"G","sender_id":"U2","text":"hi","attachments":[]}"#,
        )
        .unwrap();
        assert_eq!(message.id, Id::from("M1"));
        assert_eq!(message.group_id, Id::from("G"));
        assert_eq!(message.sender_id, Id::from("U2"));
        assert_eq!(message.text, "hi");
        assert!(message.attachments.is_empty());
        assert_eq!(message.chat_id(), &Id::from("G"));
    }

    #[test]
    fn dm_messages_fall_back_to_the_conversation_id() {
        let message: ChatMessage =
            serde_json::from_str(r#"{"id":"M1","conversation_id":"123_456"}"#).unwrap();
        assert_eq!(message.chat_id(), &Id::from("123_456"));
    }

    #[test]
    fn attachments_decode_by_type_tag() {
        let attachments: Vec<Attachment> = serde_json::from_str(
            r#"[
                {"type":"image","url":"https://i.example/1"},
                {"type":"reply","reply_id":"M9","base_reply_id":"M9"},
                {"type":"mentions","user_ids":["U1","U2"],"loci":[[0,4],[5,3]]},
                {"type":"poll","id":"P1"}
            ]"#,
        )
        .unwrap();
        assert_eq!(
            attachments[0],
            Attachment::Image {
                url: "https://i.example/1".to_owned()
            }
        );
        assert!(matches!(attachments[1], Attachment::Reply { .. }));
        assert!(matches!(attachments[2], Attachment::Mentions { .. }));
        assert_eq!(attachments[3], Attachment::Unknown);
    }
}
