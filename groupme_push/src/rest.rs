//! The REST collaborator: the two API calls the push layer needs.

use futures::{future::BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{Id, Member};

/// Problem talking to the REST API.
#[derive(Debug, Error)]
pub enum RestError {
    /// The request could not be made.
    #[error("request error: {0}")]
    Request(String),

    /// The API answered with an unexpected status.
    #[error("unexpected status {status}")]
    UnexpectedStatus {
        /// The HTTP status code.
        status: u16,
    },

    /// The response body did not parse.
    #[error("decode error: {0}")]
    Decode(String),
}

/// The REST capability the push layer depends on: resolving the
/// authenticated user once at startup, and reconstructing a group's member
/// list after a removal event.
pub trait RelationsClient: Send + Sync {
    /// The authenticated user's id.
    fn self_user_id(&self) -> BoxFuture<'_, Result<Id, RestError>>;

    /// The current members of `group`.
    fn group_members<'a>(
        &'a self,
        group: &'a Id,
    ) -> BoxFuture<'a, Result<Vec<Member>, RestError>>;
}

/// Default REST API base.
pub const API_BASE: &str = "https://api.groupme.com/v3";

/// A [`RelationsClient`] over the GroupMe v3 REST API.
pub struct GroupMeApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl GroupMeApi {
    /// A client authenticating with `token` against the production API.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, API_BASE)
    }

    /// A client against a different base URL, for tests and staging.
    #[must_use]
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        GroupMeApi {
            http: reqwest::Client::builder()
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// `GET {base}{path}`, unwrapping the API's `{"response": …}` envelope.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RestError> {
        #[derive(Deserialize)]
        struct Envelope<T> {
            response: T,
        }

        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .header("X-Access-Token", &self.token)
            .send()
            .await
            .map_err(|e| RestError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RestError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| RestError::Request(e.to_string()))?;
        let envelope: Envelope<T> =
            serde_json::from_slice(&body).map_err(|e| RestError::Decode(e.to_string()))?;
        Ok(envelope.response)
    }
}

impl RelationsClient for GroupMeApi {
    fn self_user_id(&self) -> BoxFuture<'_, Result<Id, RestError>> {
        async move {
            #[derive(Deserialize)]
            struct Me {
                id: Id,
            }
            let me: Me = self.get_json("/users/me").await?;
            Ok(me.id)
        }
        .boxed()
    }

    fn group_members<'a>(
        &'a self,
        group: &'a Id,
    ) -> BoxFuture<'a, Result<Vec<Member>, RestError>> {
        async move {
            #[derive(Deserialize)]
            struct Group {
                #[serde(default)]
                members: Vec<Member>,
            }
            let group: Group = self.get_json(&format!("/groups/{group}")).await?;
            Ok(group.members)
        }
        .boxed()
    }
}
