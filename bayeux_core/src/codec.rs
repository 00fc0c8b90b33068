//! Encoding and decoding of Bayeux wire payloads.
//!
//! A server payload is either a single JSON object (a direct response) or an
//! array of frames (a response batched with queued push messages, or a pure
//! pushed batch). [`decode_response`] yields both views: the primary
//! response, and the push frames destined for subscriptions.

use serde::Deserialize;
use thiserror::Error;

use crate::message::Message;

/// Problem translating between envelopes and wire bytes.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Failed to serialize an outbound envelope.
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// Failed to parse an inbound payload.
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Serialize an outbound envelope. Empty fields are elided.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(message).map_err(CodecError::Encode)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Frames {
    Many(Vec<Message>),
    One(Message),
}

/// Decode a payload that is either a single frame or an array of frames.
pub fn decode_frames(bytes: &[u8]) -> Result<Vec<Message>, CodecError> {
    match serde_json::from_slice::<Frames>(bytes).map_err(CodecError::Decode)? {
        Frames::Many(frames) => Ok(frames),
        Frames::One(frame) => Ok(vec![frame]),
    }
}

/// Split decoded frames into the primary response and the push messages.
///
/// The primary is the frame whose `id` matches the pending request, falling
/// back to the first `/meta/*` frame, then to the first response-shaped
/// frame (publish acknowledgements echo the request's own channel). Every
/// other non-meta frame is a push message, so a pushed batch is never
/// partially consumed by response matching.
#[must_use]
pub fn split_frames(
    frames: Vec<Message>,
    request_id: Option<&str>,
) -> (Option<Message>, Vec<Message>) {
    let mut primary_index = request_id.and_then(|id| frames.iter().position(|f| f.id == id));
    if primary_index.is_none() {
        primary_index = frames.iter().position(Message::is_meta);
    }
    if primary_index.is_none() {
        primary_index = frames.iter().position(|f| f.successful.is_some());
    }

    let mut primary = None;
    let mut pushes = Vec::new();
    for (index, frame) in frames.into_iter().enumerate() {
        if Some(index) == primary_index {
            primary = Some(frame);
        } else if !frame.is_meta() {
            pushes.push(frame);
        }
    }
    (primary, pushes)
}

/// Decode a payload and split it into `(primary response, push messages)`.
pub fn decode_response(
    bytes: &[u8],
    request_id: Option<&str>,
) -> Result<(Option<Message>, Vec<Message>), CodecError> {
    Ok(split_frames(decode_frames(bytes)?, request_id))
}
