//! # Bayeux WebSocket transport
//!
//! Carries Bayeux envelopes over a long-lived `wss://` connection.
//! Usability probing dials eagerly and retains the socket; `send` writes a
//! JSON text frame and awaits a single frame in response, `send_only` just
//! writes, and `read` awaits the next server-pushed frame.

use std::time::Duration;

use async_tungstenite::{
    tokio::{connect_async, ConnectStream},
    WebSocketStream,
};
use futures::{
    future::BoxFuture,
    stream::{SplitSink, SplitStream},
    FutureExt, SinkExt, StreamExt,
};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use bayeux_core::{ConnectionType, Transport, TransportError};

/// Bound on the eager dial performed by usability probing.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(60);

type Socket = WebSocketStream<ConnectStream>;
type Writer = SplitSink<Socket, tungstenite::Message>;
type Reader = SplitStream<Socket>;

/// A [`Transport`] over a WebSocket.
///
/// The writer and reader halves are locked independently so keepalive pings
/// can go out while the read poll is parked on the socket.
pub struct WebSocketTransport {
    writer: Mutex<Option<Writer>>,
    reader: Mutex<Option<Reader>>,
    url: RwLock<String>,
    timeout: RwLock<Duration>,
}

impl WebSocketTransport {
    /// A transport with no connection yet; `is_usable` dials.
    #[must_use]
    pub fn new() -> Self {
        WebSocketTransport {
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            url: RwLock::new(String::new()),
            timeout: RwLock::new(bayeux_core::client::CONNECTION_TIMEOUT),
        }
    }

    async fn drop_connection(&self) {
        let mut writer = self.writer.lock().await;
        if let Some(mut sink) = writer.take() {
            let _ = sink.close().await;
        }
        drop(writer);
        *self.reader.lock().await = None;
    }

    async fn write_frame(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let text = String::from_utf8(payload)
            .map_err(|e| TransportError::Other(Box::new(e)))?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        writer
            .send(tungstenite::Message::text(text))
            .await
            .map_err(ws_error)
    }

    async fn next_frame(&self) -> Result<Vec<u8>, TransportError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(TransportError::Closed)?;
        loop {
            match reader.next().await {
                None => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(ws_error(e)),
                Some(Ok(frame)) => match frame {
                    tungstenite::Message::Close(_) => return Err(TransportError::Closed),
                    frame @ (tungstenite::Message::Text(_)
                    | tungstenite::Message::Binary(_)) => {
                        return Ok(frame.into_data().to_vec())
                    }
                    // Ping/pong is handled by the protocol layer underneath.
                    _ => continue,
                },
            }
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn ws_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        other => TransportError::Other(Box::new(other)),
    }
}

impl Transport for WebSocketTransport {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Websocket
    }

    fn is_usable<'a>(&'a self, host: &'a str) -> BoxFuture<'a, bool> {
        async move {
            self.set_url(host);
            self.drop_connection().await;

            let url = self.url.read().clone();
            match tokio::time::timeout(DIAL_TIMEOUT, connect_async(url.as_str())).await {
                Ok(Ok((socket, _response))) => {
                    let (writer, reader) = socket.split();
                    *self.writer.lock().await = Some(writer);
                    *self.reader.lock().await = Some(reader);
                    true
                }
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, url = %url, "websocket dial failed");
                    false
                }
                Err(_) => {
                    tracing::debug!(url = %url, "websocket dial timed out");
                    false
                }
            }
        }
        .boxed()
    }

    fn send(&self, payload: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>, TransportError>> {
        async move {
            let timeout = *self.timeout.read();
            tokio::time::timeout(timeout, async {
                self.write_frame(payload).await?;
                self.next_frame().await
            })
            .await
            .map_err(|_| TransportError::Timeout)?
        }
        .boxed()
    }

    fn send_only(&self, payload: Vec<u8>) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            let timeout = *self.timeout.read();
            tokio::time::timeout(timeout, self.write_frame(payload))
                .await
                .map_err(|_| TransportError::Timeout)?
        }
        .boxed()
    }

    fn read(&self) -> BoxFuture<'_, Result<Vec<u8>, TransportError>> {
        async move {
            let timeout = *self.timeout.read();
            tokio::time::timeout(timeout, self.next_frame())
                .await
                .map_err(|_| TransportError::Timeout)?
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move { self.drop_connection().await }.boxed()
    }

    fn set_url(&self, host: &str) {
        *self.url.write() = format!("wss://{host}");
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
        let transport = WebSocketTransport::new();
        transport.set_url("push.example.com/faye");
        assert_eq!(*transport.url.read(), "wss://push.example.com/faye");
    }

    #[tokio::test]
    async fn operations_fail_cleanly_without_a_connection() {
        let transport = WebSocketTransport::new();
        transport.set_timeout(Duration::from_millis(100));

        assert!(matches!(
            transport.send_only(b"{}".to_vec()).await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            transport.read().await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn dialing_an_unreachable_host_reports_unusable() {
        let transport = WebSocketTransport::new();
        // Nothing listens on the discard port.
        assert!(!transport.is_usable("127.0.0.1:9/faye").await);
    }
}
