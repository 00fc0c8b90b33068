//! Auth token injection for the push service.

use serde_json::Value;

use bayeux_core::{message::SUBSCRIBE_CHANNEL, Extension, Message};

/// Attaches the API token to the envelopes the push service authenticates:
/// subscribe requests and keepalive pings. No other envelope carries
/// credentials.
pub struct AuthExt {
    token: String,
}

impl AuthExt {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        AuthExt {
            token: token.into(),
        }
    }
}

impl Extension for AuthExt {
    fn outgoing(&self, message: &mut Message) {
        if message.channel == SUBSCRIBE_CHANNEL || message.data_type() == Some("ping") {
            message
                .ext
                .insert("access_token".to_owned(), Value::String(self.token.clone()));
        }
    }
}
