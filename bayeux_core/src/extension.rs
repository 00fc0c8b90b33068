//! Message interceptors applied to every envelope in flight.

use crate::message::{
    Message, CONNECT_CHANNEL, HANDSHAKE_CHANNEL, SUBSCRIBE_CHANNEL,
};

/// An interceptor invoked on every inbound and outbound envelope.
///
/// Outbound hooks run in registration order before wire encoding; inbound
/// hooks run after decoding and before dispatch. Hooks may mutate the
/// envelope, typically its `ext` and `data` maps. If an outbound hook sets
/// `error`, the send is aborted and the error surfaced to the caller.
///
/// Extensions are invoked without synchronization and must be internally
/// thread-safe.
pub trait Extension: Send + Sync {
    /// Called on every decoded inbound envelope.
    fn incoming(&self, _message: &mut Message) {}

    /// Called on every outbound envelope before encoding.
    fn outgoing(&self, _message: &mut Message) {}
}

/// Logs a one-line summary of every envelope at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceExt;

impl Extension for TraceExt {
    fn incoming(&self, message: &mut Message) {
        tracing::debug!(target: "bayeux::wire", "{}", summary("←", message));
    }

    fn outgoing(&self, message: &mut Message) {
        tracing::debug!(target: "bayeux::wire", "{}", summary("→", message));
    }
}

fn short_id(client_id: &str) -> &str {
    client_id.get(..4).unwrap_or(client_id)
}

fn summary(arrow: &str, message: &Message) -> String {
    let cid = short_id(&message.client_id);
    let id = &message.id;
    match message.channel.as_str() {
        HANDSHAKE_CHANNEL => format!("{arrow} [{cid}] Handshake ({id})"),
        CONNECT_CHANNEL => format!("{arrow} [{cid}] Connect ({id})"),
        SUBSCRIBE_CHANNEL => format!(
            "{arrow} [{cid}] {} Subscribe ({id})",
            message.subscription
        ),
        channel => match message.data_type() {
            Some(data_type) => format!("{arrow} [{cid}] {channel} - {data_type} ({id})"),
            None if channel.starts_with("/user/") => {
                format!("{arrow} [{cid}] {channel} ({id})")
            }
            None => {
                let dump = serde_json::to_string(message).unwrap_or_default();
                format!("{arrow} {dump}")
            }
        },
    }
}
