//! Error types for the push layer.

use thiserror::Error;

use crate::models::Id;

/// Problem while routing a push payload to handlers.
#[derive(Debug, Clone, Error)]
pub enum PushError {
    /// The subscription must be [`setup`](crate::PushSubscription::setup)
    /// before subscribing to entities.
    #[error("push listener not started")]
    ListenerNotStarted,

    /// A payload's subject did not have the shape its content type
    /// promises.
    #[error("malformed {content_type} payload: {detail}")]
    MalformedPayload {
        /// The `data.type` of the offending payload.
        content_type: String,
        /// What failed to parse.
        detail: String,
    },

    /// The authoritative member list could not be fetched after a removal
    /// event.
    #[error("failed to fetch members of group {group}: {detail}")]
    MemberFetch {
        /// The group whose membership changed.
        group: Id,
        /// The underlying REST failure.
        detail: String,
    },
}
