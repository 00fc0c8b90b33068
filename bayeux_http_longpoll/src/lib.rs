//! # Bayeux HTTP long-polling transport
//!
//! The mandatory Bayeux transport: each envelope is `POST`ed as JSON and
//! the response body carries the server's frames. Only request/response is
//! possible here, so `send_only` and `read` report a programming error.

use std::time::Duration;

use futures::{future::BoxFuture, FutureExt};
use parking_lot::RwLock;

use bayeux_core::{ConnectionType, Transport, TransportError};

/// A [`Transport`] over HTTP long-polling.
pub struct HttpTransport {
    http: reqwest::Client,
    url: RwLock<String>,
    timeout: RwLock<Duration>,
}

impl HttpTransport {
    #[must_use]
    pub fn new() -> Self {
        HttpTransport {
            http: reqwest::Client::builder()
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            url: RwLock::new(String::new()),
            timeout: RwLock::new(bayeux_core::client::CONNECTION_TIMEOUT),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::LongPolling
    }

    fn is_usable<'a>(&'a self, host: &'a str) -> BoxFuture<'a, bool> {
        async move { reqwest::Url::parse(&format!("https://{host}")).is_ok() }.boxed()
    }

    fn send(&self, payload: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>, TransportError>> {
        async move {
            let url = self.url.read().clone();
            let timeout = *self.timeout.read();

            let response = self
                .http
                .post(&url)
                .header("content-type", "application/json")
                .timeout(timeout)
                .body(payload)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        TransportError::Timeout
                    } else if e.is_connect() {
                        TransportError::Connect(e.to_string())
                    } else {
                        TransportError::Other(Box::new(e))
                    }
                })?;

            let status = response.status();
            if status != reqwest::StatusCode::OK {
                return Err(TransportError::UnexpectedStatus {
                    status: status.as_u16(),
                });
            }
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::Other(Box::new(e)))?;
            Ok(body.to_vec())
        }
        .boxed()
    }

    fn send_only(&self, _payload: Vec<u8>) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            tracing::error!("sendOnly called on the long-polling transport");
            Err(TransportError::Unsupported {
                operation: "sendOnly",
                connection_type: ConnectionType::LongPolling,
            })
        }
        .boxed()
    }

    fn read(&self) -> BoxFuture<'_, Result<Vec<u8>, TransportError>> {
        async move {
            tracing::error!("read called on the long-polling transport");
            Err(TransportError::Unsupported {
                operation: "read",
                connection_type: ConnectionType::LongPolling,
            })
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {}.boxed()
    }

    fn set_url(&self, host: &str) {
        *self.url.write() = format!("https://{host}");
    }

    fn set_timeout(&self, timeout: Duration) {
        *self.timeout.write() = timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_uses_tls_scheme() {
        let transport = HttpTransport::new();
        transport.set_url("push.example.com/faye");
        assert_eq!(*transport.url.read(), "https://push.example.com/faye");
    }

    #[tokio::test]
    async fn usability_is_url_validation() {
        let transport = HttpTransport::new();
        assert!(transport.is_usable("push.example.com/faye").await);
        assert!(!transport.is_usable("push example com").await);
    }

    #[tokio::test]
    async fn one_way_operations_are_programming_errors() {
        let transport = HttpTransport::new();
        assert!(matches!(
            transport.send_only(b"{}".to_vec()).await,
            Err(TransportError::Unsupported {
                operation: "sendOnly",
                ..
            })
        ));
        assert!(matches!(
            transport.read().await,
            Err(TransportError::Unsupported { operation: "read", .. })
        ));
    }
}
