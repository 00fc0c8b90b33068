//! The typed domain events a push consumer receives.

use crate::{
    error::PushError,
    models::{ChatMessage, Id, Member},
};

/// A domain event decoded from a push payload.
///
/// One variant per capability the chat network pushes; a consumer matches
/// on the variants it cares about and ignores the rest.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// A new text message (`line.create`).
    TextMessage(ChatMessage),

    /// A message was liked or unliked (`like.create` / `like.delete`).
    Like(ChatMessage),

    /// The authenticated user joined a group.
    Join(Id),

    /// The group was renamed.
    GroupName { group: Id, name: String },

    /// The group topic changed.
    GroupTopic { group: Id, topic: String },

    /// The group avatar changed.
    GroupAvatar { group: Id, avatar_url: String },

    /// The group's like icon changed.
    LikeIcon {
        group: Id,
        pack_id: i64,
        pack_index: i64,
        kind: String,
    },

    /// A member changed their nickname in a group.
    MemberNickname {
        group: Id,
        user: Id,
        nickname: String,
    },

    /// A member changed their avatar in a group.
    MemberAvatar {
        group: Id,
        user: Id,
        avatar_url: String,
    },

    /// Members were added to or removed from a group. On removal the
    /// member list is the authoritative post-removal roster fetched from
    /// the REST API; on addition it holds the added members.
    Members {
        group: Id,
        members: Vec<Member>,
        added: bool,
    },

    /// Something went wrong while routing a payload. Delivered instead of
    /// silently dropping the frame.
    Error(PushError),
}

/// A push consumer. Registered once via
/// [`PushSubscription::add_handler`](crate::PushSubscription::add_handler)
/// and invoked synchronously from the dispatch loop, so implementations
/// must not block indefinitely.
pub trait PushHandler: Send + Sync {
    /// Receive one decoded domain event.
    fn handle_event(&self, event: PushEvent);
}
