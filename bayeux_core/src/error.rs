//! Error types for the Bayeux client.

use thiserror::Error;

use crate::{codec::CodecError, transport::TransportError};

/// Problem while driving the Bayeux protocol.
#[derive(Debug, Error)]
pub enum FayeError {
    /// The server advised `reconnect: none`; this client will never send
    /// again.
    #[error("client is disconnected: server advised against reconnecting")]
    Disconnected,

    /// No registered transport was usable for the requested connection
    /// types.
    #[error("no usable transports available")]
    NoUsableTransport,

    /// The server advertises only connection types this client cannot
    /// carry.
    #[error("server does not support any available transports: {supported:?}")]
    NoSupportedTransport {
        /// The server's advertised connection types.
        supported: Vec<String>,
    },

    /// The server answered, but marked the response unsuccessful.
    #[error("response was not successful: {error}")]
    Unsuccessful {
        /// The server's `error` field, possibly empty.
        error: String,
    },

    /// An outbound extension flagged the envelope with an error; nothing
    /// was sent.
    #[error("message rejected by outbound extension: {error}")]
    Rejected {
        /// The error the extension set on the envelope.
        error: String,
    },

    /// The payload decoded, but contained no response to our request.
    #[error("missing response to {channel} request")]
    MissingResponse {
        /// The request channel.
        channel: String,
    },

    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Wire encoding/decoding failure.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl FayeError {
    /// Whether this error is terminal for the client ([`Disconnected`]).
    ///
    /// [`Disconnected`]: FayeError::Disconnected
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, FayeError::Disconnected)
    }
}
