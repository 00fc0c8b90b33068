//! # GroupMe push client
//!
//! Subscribes to the GroupMe push service over Bayeux and turns inbound
//! payloads into typed [`PushEvent`]s delivered to registered
//! [`PushHandler`]s.
//!
//! The usual wiring is [`new_push_client`] → [`PushSubscription::new`] →
//! [`PushSubscription::setup`] → `subscribe_to_user`.

pub mod auth;
mod dispatch;
pub mod error;
pub mod event;
pub mod models;
pub mod push;
pub mod rest;

pub use auth::AuthExt;
pub use error::PushError;
pub use event::{PushEvent, PushHandler};
pub use models::{Attachment, ChatMessage, Id, Member};
pub use push::{new_push_client, PushSubscription, PUSH_SERVER};
pub use rest::{GroupMeApi, RelationsClient, RestError};
