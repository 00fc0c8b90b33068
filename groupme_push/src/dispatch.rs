//! Content-type routing tables for push payloads.
//!
//! Two static tables demultiplex inbound payloads: [`CONTENT_ROUTES`] keys
//! on `data.type`, and [`SYSTEM_ROUTES`] keys on the `event.type` carried
//! inside system `line.create` subjects (group metadata and membership
//! changes arrive that way).

use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::Value;

use crate::{
    error::PushError,
    event::PushEvent,
    models::{ChatMessage, Id, Member},
};

/// What a routing table entry decided about a payload.
#[derive(Debug)]
pub(crate) enum Routed {
    /// A decoded event, ready for handlers.
    Event(PushEvent),

    /// A removal event: the dispatch loop must fetch the authoritative
    /// member list before emitting [`PushEvent::Members`].
    FetchMembers { group: Id },

    /// Recognized and intentionally ignored.
    Drop,
}

pub(crate) type ContentRoute = fn(&str, &Value) -> Result<Routed, PushError>;
pub(crate) type SystemRoute = fn(Id, &Value) -> Result<Routed, PushError>;

/// `data.type` → route.
pub(crate) static CONTENT_ROUTES: LazyLock<HashMap<&'static str, ContentRoute>> =
    LazyLock::new(|| {
        let mut routes: HashMap<&'static str, ContentRoute> = HashMap::new();
        routes.insert("line.create", route_line_create);
        routes.insert("like.create", route_like);
        routes.insert("like.delete", route_like);
        routes.insert("membership.announce", route_join);
        routes.insert("membership.create", route_join);
        routes.insert("ping", |_, _| Ok(Routed::Drop));
        routes
    });

/// System `event.type` → route.
pub(crate) static SYSTEM_ROUTES: LazyLock<HashMap<&'static str, SystemRoute>> =
    LazyLock::new(|| {
        let mut routes: HashMap<&'static str, SystemRoute> = HashMap::new();
        routes.insert("group.name_change", route_group_name);
        routes.insert("group.topic_change", route_group_topic);
        routes.insert("group.avatar_change", route_group_avatar);
        routes.insert("group.like_icon_change", route_like_icon);
        routes.insert("member.nickname_change", route_member_nickname);
        routes.insert("member.avatar_change", route_member_avatar);
        routes.insert("membership.announce.added", route_members_added);
        routes.insert("membership.announce.rejoined", route_member_rejoined);
        routes.insert("membership.notifications.removed", route_members_removed);
        routes.insert("membership.notifications.exited", route_members_removed);
        routes.insert(
            "membership.notifications.autokicked",
            route_members_removed,
        );
        routes
    });

fn parse_subject<T: serde::de::DeserializeOwned>(
    content_type: &str,
    value: &Value,
) -> Result<T, PushError> {
    serde_json::from_value(value.clone()).map_err(|e| PushError::MalformedPayload {
        content_type: content_type.to_owned(),
        detail: e.to_string(),
    })
}

fn str_field(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn id_field(value: &Value, field: &str) -> Id {
    // The API is inconsistent about numeric vs. string ids.
    match value.get(field) {
        Some(Value::String(s)) => Id(s.clone()),
        Some(Value::Number(n)) => Id(n.to_string()),
        _ => Id::default(),
    }
}

fn route_line_create(_channel: &str, subject: &Value) -> Result<Routed, PushError> {
    if let Some(event) = subject.get("event") {
        let kind = str_field(event, "type");
        let group = id_field(subject, "group_id");
        let Some(route) = SYSTEM_ROUTES.get(kind.as_str()) else {
            tracing::warn!(kind = %kind, "unable to handle system event");
            return Ok(Routed::Drop);
        };
        let data = event.get("data").cloned().unwrap_or(Value::Null);
        return route(group, &data);
    }

    let message: ChatMessage = parse_subject("line.create", subject)?;
    Ok(Routed::Event(PushEvent::TextMessage(message)))
}

fn route_like(_channel: &str, subject: &Value) -> Result<Routed, PushError> {
    // Favorite events nest the liked message under `line`.
    let value = subject.get("line").unwrap_or(subject);
    let message: ChatMessage = parse_subject("like", value)?;
    Ok(Routed::Event(PushEvent::Like(message)))
}

fn route_join(_channel: &str, subject: &Value) -> Result<Routed, PushError> {
    let mut group = id_field(subject, "group_id");
    if group.as_str().is_empty() {
        group = id_field(subject, "id");
    }
    Ok(Routed::Event(PushEvent::Join(group)))
}

fn route_group_name(group: Id, data: &Value) -> Result<Routed, PushError> {
    Ok(Routed::Event(PushEvent::GroupName {
        group,
        name: str_field(data, "name"),
    }))
}

fn route_group_topic(group: Id, data: &Value) -> Result<Routed, PushError> {
    Ok(Routed::Event(PushEvent::GroupTopic {
        group,
        topic: str_field(data, "topic"),
    }))
}

fn route_group_avatar(group: Id, data: &Value) -> Result<Routed, PushError> {
    Ok(Routed::Event(PushEvent::GroupAvatar {
        group,
        avatar_url: str_field(data, "avatar_url"),
    }))
}

fn route_like_icon(group: Id, data: &Value) -> Result<Routed, PushError> {
    let icon = data.get("like_icon").ok_or_else(|| PushError::MalformedPayload {
        content_type: "group.like_icon_change".to_owned(),
        detail: "missing like_icon".to_owned(),
    })?;
    Ok(Routed::Event(PushEvent::LikeIcon {
        group,
        pack_id: icon.get("pack_id").and_then(Value::as_i64).unwrap_or_default(),
        pack_index: icon
            .get("pack_index")
            .and_then(Value::as_i64)
            .unwrap_or_default(),
        kind: str_field(icon, "type"),
    }))
}

fn route_member_nickname(group: Id, data: &Value) -> Result<Routed, PushError> {
    let user = data.get("user").cloned().unwrap_or(Value::Null);
    Ok(Routed::Event(PushEvent::MemberNickname {
        group,
        user: id_field(&user, "id"),
        nickname: str_field(data, "name"),
    }))
}

fn route_member_avatar(group: Id, data: &Value) -> Result<Routed, PushError> {
    let user = data.get("user").cloned().unwrap_or(Value::Null);
    Ok(Routed::Event(PushEvent::MemberAvatar {
        group,
        user: id_field(&user, "id"),
        avatar_url: str_field(data, "avatar_url"),
    }))
}

fn event_member(value: &Value) -> Member {
    Member {
        user_id: id_field(value, "id"),
        nickname: str_field(value, "nickname"),
        image_url: str_field(value, "avatar_url"),
        ..Member::default()
    }
}

fn route_members_added(group: Id, data: &Value) -> Result<Routed, PushError> {
    let members = data
        .get("added_users")
        .and_then(Value::as_array)
        .map(|users| users.iter().map(event_member).collect::<Vec<_>>())
        .unwrap_or_default();
    Ok(Routed::Event(PushEvent::Members {
        group,
        members,
        added: true,
    }))
}

fn route_member_rejoined(group: Id, data: &Value) -> Result<Routed, PushError> {
    let members = data.get("user").map(event_member).into_iter().collect();
    Ok(Routed::Event(PushEvent::Members {
        group,
        members,
        added: true,
    }))
}

fn route_members_removed(group: Id, _data: &Value) -> Result<Routed, PushError> {
    Ok(Routed::FetchMembers { group })
}
