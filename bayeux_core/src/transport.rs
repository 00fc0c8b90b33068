//! The transport contract and per-client transport selection.

use core::fmt;
use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use thiserror::Error;

use crate::message::ConnectionType;

/// The connection types every Bayeux server must support; handshakes are
/// always carried over one of these.
pub const MANDATORY_CONNECTION_TYPES: &[ConnectionType] = &[ConnectionType::LongPolling];

/// Problem at the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The operation does not exist on this transport. Calling it is a
    /// programming error, not a network condition.
    #[error("{operation} is not supported over {connection_type}")]
    Unsupported {
        /// The offending operation.
        operation: &'static str,
        /// The transport it was called on.
        connection_type: ConnectionType,
    },

    /// The server answered with something other than `200 OK`.
    #[error("unexpected status {status}")]
    UnexpectedStatus {
        /// The HTTP status code.
        status: u16,
    },

    /// The operation did not complete within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// The underlying connection is closed.
    #[error("connection closed")]
    Closed,

    /// Failed to establish the connection.
    #[error("connect error: {0}")]
    Connect(String),

    /// Any other transport-level failure.
    #[error("transport error: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Concrete byte carriage for Bayeux envelopes.
///
/// Implementations hold their own connection state behind `&self`; the
/// client shares a transport across its background tasks as
/// `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    /// Which Bayeux connection type this transport implements.
    fn connection_type(&self) -> ConnectionType;

    /// Whether this transport can reach `host`. WebSocket transports dial
    /// eagerly and retain the connection; HTTP transports validate the URL.
    fn is_usable<'a>(&'a self, host: &'a str) -> BoxFuture<'a, bool>;

    /// Send an encoded envelope and return the raw response payload.
    fn send(&self, payload: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>, TransportError>>;

    /// Send an encoded envelope without awaiting a response.
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::Unsupported`] on request/response
    /// transports.
    fn send_only(&self, payload: Vec<u8>) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Block until the server pushes the next payload.
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::Unsupported`] on request/response
    /// transports.
    fn read(&self) -> BoxFuture<'_, Result<Vec<u8>, TransportError>>;

    /// Close the underlying connection.
    fn close(&self) -> BoxFuture<'_, ()>;

    /// Point the transport at a new host.
    fn set_url(&self, host: &str);

    /// Set the per-operation deadline.
    fn set_timeout(&self, timeout: Duration);
}

/// An ordered, per-client list of transports.
///
/// Selection walks the list in registration order and returns the first
/// transport whose connection type is acceptable and which reports itself
/// usable, so registering WebSocket ahead of long-polling prefers WebSocket
/// whenever the server advertises it.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: Vec<Arc<dyn Transport>>,
}

impl TransportRegistry {
    /// A registry over `transports`, tried in order.
    #[must_use]
    pub fn new(transports: Vec<Arc<dyn Transport>>) -> Self {
        TransportRegistry { transports }
    }

    /// Append a transport with the lowest selection priority.
    pub fn register(&mut self, transport: Arc<dyn Transport>) {
        self.transports.push(transport);
    }

    /// Select the first registered transport that is acceptable and usable.
    pub async fn select(
        &self,
        host: &str,
        acceptable: &[ConnectionType],
    ) -> Option<Arc<dyn Transport>> {
        for transport in &self.transports {
            if !acceptable.contains(&transport.connection_type()) {
                continue;
            }
            if transport.is_usable(host).await {
                return Some(transport.clone());
            }
        }
        None
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field(
                "connection_types",
                &self
                    .transports
                    .iter()
                    .map(|t| t.connection_type())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
