//! # Bayeux core
//!
//! A client for the Bayeux 1.0 publish-subscribe protocol: the envelope
//! codec, the inbound/outbound extension chain, the transport contract, and
//! the handshake → connect → subscribe state machine.
//!
//! Transports are provided by sibling crates (`bayeux_websocket`,
//! `bayeux_http_longpoll`) and registered per client via
//! [`TransportRegistry`].

pub mod client;
pub mod codec;
pub mod error;
pub mod extension;
pub mod message;
pub mod subscription;
pub mod transport;

#[cfg(feature = "test_utils")]
pub mod test_utils;

pub use client::{ClientState, FayeClient};
pub use error::FayeError;
pub use extension::Extension;
pub use message::{Advice, ConnectionType, Message, Reconnect};
pub use subscription::Subscription;
pub use transport::{Transport, TransportError, TransportRegistry};
