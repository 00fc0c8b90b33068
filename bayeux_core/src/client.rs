//! The Bayeux protocol state machine.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{sleep, Instant};

use crate::{
    codec,
    error::FayeError,
    extension::Extension,
    message::{
        Advice, ConnectionType, Message, Reconnect, BAYEUX_VERSION, CONNECT_CHANNEL,
        HANDSHAKE_CHANNEL, SUBSCRIBE_CHANNEL,
    },
    subscription::Subscription,
    transport::{Transport, TransportRegistry, MANDATORY_CONNECTION_TYPES},
};

/// Per-operation transport deadline applied after a successful handshake.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(180);

/// Interval between keepalive pings on a WebSocket subscription.
pub const WEBSOCKET_PING_INTERVAL: Duration = Duration::from_secs(30);

const HANDSHAKE_RETRY: Duration = Duration::from_secs(10);
const SUBSCRIBE_RETRY: Duration = Duration::from_secs(1);

/// Protocol state of a [`FayeClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No session; a handshake is required.
    Unconnected,
    /// Handshake in flight.
    Connecting,
    /// Session established.
    Connected,
    /// Terminal: the server advised `reconnect: none`.
    Disconnected,
}

struct Shared {
    state: ClientState,
    client_id: String,
    transport: Option<Arc<dyn Transport>>,
    subscriptions: Vec<Arc<Subscription>>,
    /// Earliest permitted handshake time, per server advice.
    next_handshake_at: Option<Instant>,
}

struct Inner {
    url: String,
    registry: TransportRegistry,
    shared: RwLock<Shared>,
    extensions: parking_lot::RwLock<Vec<Arc<dyn Extension>>>,
    /// Outbound message ids, assigned as decimal strings starting at 1.
    message_id: AtomicU64,
    /// Serializes subscribe requests across tasks.
    subscribe_gate: Mutex<()>,
    /// Read, keepalive, and resubscribe tasks, joined by `close`.
    tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

/// A Bayeux client: handshake, connect, subscribe, and advice-driven
/// reconnection over a registry of transports.
///
/// The client is cheap to clone; all clones share one session. Background
/// tasks (the WebSocket read poll and per-subscription keepalives) are
/// spawned internally and observe state changes through the shared lock.
#[derive(Clone)]
pub struct FayeClient {
    inner: Arc<Inner>,
}

impl FayeClient {
    /// A client for the Bayeux endpoint at `host` (scheme-less, e.g.
    /// `push.example.com/faye`), selecting transports from `registry`.
    #[must_use]
    pub fn new(host: impl Into<String>, registry: TransportRegistry) -> Self {
        FayeClient {
            inner: Arc::new(Inner {
                url: host.into(),
                registry,
                shared: RwLock::new(Shared {
                    state: ClientState::Unconnected,
                    client_id: String::new(),
                    transport: None,
                    subscriptions: Vec::new(),
                    next_handshake_at: None,
                }),
                extensions: parking_lot::RwLock::new(Vec::new()),
                message_id: AtomicU64::new(1),
                subscribe_gate: Mutex::new(()),
                tasks: parking_lot::Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register an extension; hooks run in registration order.
    pub fn add_extension(&self, extension: Arc<dyn Extension>) {
        self.inner.extensions.write().push(extension);
    }

    /// Whether the client currently holds an established session.
    pub async fn connected(&self) -> bool {
        self.inner.shared.read().await.state == ClientState::Connected
    }

    /// The current protocol state.
    pub async fn state(&self) -> ClientState {
        self.inner.shared.read().await.state
    }

    /// The server-assigned client id, empty before the first handshake.
    pub async fn client_id(&self) -> String {
        self.inner.shared.read().await.client_id.clone()
    }

    /// The connection type of the active transport.
    pub async fn connection_type(&self) -> Option<ConnectionType> {
        self.inner
            .shared
            .read()
            .await
            .transport
            .as_ref()
            .map(|t| t.connection_type())
    }

    /// The channels of all current subscriptions.
    pub async fn subscribed_channels(&self) -> Vec<String> {
        self.inner
            .shared
            .read()
            .await
            .subscriptions
            .iter()
            .map(|s| s.channel().to_owned())
            .collect()
    }

    /// Handshake, connect, and (over WebSocket) start the read poll.
    pub async fn handshake_and_connect(&self) -> Result<(), FayeError> {
        self.handshake().await?;
        self.connect().await?;
        if self.connection_type().await == Some(ConnectionType::Websocket) {
            let client = self.clone();
            self.track_task(tokio::spawn(async move { client.read_poll().await }));
        }
        Ok(())
    }

    /// Subscribe to `channel`, delivering matching inbound frames into
    /// `sender`. Retries every second until the server accepts, then
    /// returns the registered subscription.
    pub async fn wait_subscribe(
        &self,
        channel: &str,
        sender: mpsc::Sender<Message>,
    ) -> Arc<Subscription> {
        let _gate = self.inner.subscribe_gate.lock().await;
        let subscription = Arc::new(Subscription::new(channel, sender));
        loop {
            match self.request_subscription(&subscription).await {
                Ok(()) => {
                    tracing::debug!(channel, "subscription request succeeded");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, channel, "subscription request failed");
                    sleep(SUBSCRIBE_RETRY).await;
                }
            }
        }
        self.inner
            .shared
            .write()
            .await
            .subscriptions
            .push(subscription.clone());
        subscription
    }

    /// Publish `data` on `channel` and await the server's verdict.
    pub async fn publish(
        &self,
        channel: &str,
        data: Map<String, Value>,
    ) -> Result<(), FayeError> {
        let client_id = self.client_id().await;
        let mut msg = Message::new(&client_id, channel);
        msg.data = data;

        let (response, _) = self.send(msg).await?;
        let response = response.ok_or_else(|| FayeError::MissingResponse {
            channel: channel.to_owned(),
        })?;
        self.spawn_handle_advice(response.advice());
        if !response.is_successful() {
            return Err(FayeError::Unsuccessful {
                error: response.error,
            });
        }
        Ok(())
    }

    /// Stop all per-subscription tasks, close the transport, and join the
    /// background tasks, returning the client to
    /// [`ClientState::Unconnected`].
    pub async fn close(&self) {
        let transport = {
            let mut shared = self.inner.shared.write().await;
            for subscription in &shared.subscriptions {
                subscription.stop();
            }
            shared.state = ClientState::Unconnected;
            shared.transport.take()
        };
        if let Some(transport) = transport {
            transport.close().await;
        }

        // The keepalive and resubscribe loops only observe the stop flags
        // at their next iteration, which may be a sleep away.
        let handles: Vec<_> = std::mem::take(&mut *self.inner.tasks.lock());
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
    }

    async fn handshake(&self) -> Result<(), FayeError> {
        let wait = {
            let shared = self.inner.shared.read().await;
            if shared.state == ClientState::Disconnected {
                return Err(FayeError::Disconnected);
            }
            shared
                .next_handshake_at
                .and_then(|at| at.checked_duration_since(Instant::now()))
        };
        if let Some(wait) = wait {
            tracing::debug!(?wait, "waiting before next handshake");
            sleep(wait).await;
        }

        let transport = self
            .inner
            .registry
            .select(&self.inner.url, MANDATORY_CONNECTION_TYPES)
            .await
            .ok_or(FayeError::NoUsableTransport)?;
        transport.set_url(&self.inner.url);
        {
            let mut shared = self.inner.shared.write().await;
            shared.transport = Some(transport);
            shared.state = ClientState::Connecting;
        }

        let response = loop {
            let client_id = self.client_id().await;
            let mut msg = Message::new(&client_id, HANDSHAKE_CHANNEL);
            msg.version = BAYEUX_VERSION.to_owned();
            msg.supported_connection_types =
                vec![ConnectionType::LongPolling.as_str().to_owned()];

            match self.send(msg).await {
                Ok((Some(response), _)) if response.is_successful() => {
                    tracing::debug!("handshake successful");
                    break response;
                }
                Ok((response, _)) => {
                    let error = response.map(|r| r.error).unwrap_or_default();
                    self.inner.shared.write().await.state = ClientState::Unconnected;
                    tracing::warn!(error = %error, "handshake rejected, retrying in 10s");
                }
                Err(e) => {
                    self.inner.shared.write().await.state = ClientState::Unconnected;
                    tracing::warn!(error = %e, "handshake failed, retrying in 10s");
                }
            }
            sleep(HANDSHAKE_RETRY).await;
        };

        let old_client_id;
        let resubscribe;
        {
            let mut shared = self.inner.shared.write().await;
            old_client_id =
                std::mem::replace(&mut shared.client_id, response.client_id.clone());
            shared.state = ClientState::Connected;

            let acceptable: Vec<ConnectionType> = response
                .supported_connection_types
                .iter()
                .filter_map(|name| ConnectionType::from_wire(name))
                .collect();
            let transport = self
                .inner
                .registry
                .select(&self.inner.url, &acceptable)
                .await
                .ok_or_else(|| FayeError::NoSupportedTransport {
                    supported: response.supported_connection_types.clone(),
                })?;
            transport.set_url(&self.inner.url);
            transport.set_timeout(CONNECTION_TIMEOUT);
            shared.transport = Some(transport);

            resubscribe =
                old_client_id != shared.client_id && !shared.subscriptions.is_empty();
        }

        if resubscribe {
            tracing::warn!(
                old = %old_client_id,
                new = %response.client_id,
                "client id changed, resubscribing existing subscriptions"
            );
            self.resubscribe_all().await;
        }
        Ok(())
    }

    /// Issue the connect request. Over WebSocket this is fire-and-forget;
    /// the server pushes to the socket from here on. Over long-polling the
    /// response may carry queued push messages, which are dispatched on a
    /// fresh task.
    async fn connect(&self) -> Result<(), FayeError> {
        let (client_id, connection_type) = {
            let shared = self.inner.shared.read().await;
            let transport = shared
                .transport
                .as_ref()
                .ok_or(FayeError::NoUsableTransport)?;
            (shared.client_id.clone(), transport.connection_type())
        };
        let mut msg = Message::new(&client_id, CONNECT_CHANNEL);
        msg.connection_type = connection_type.as_str().to_owned();

        if connection_type == ConnectionType::Websocket {
            return self.send_only(msg).await;
        }

        let (response, pushes) = self.send(msg).await?;
        let response = response.ok_or_else(|| FayeError::MissingResponse {
            channel: CONNECT_CHANNEL.to_owned(),
        })?;
        self.spawn_handle_advice(response.advice());
        if !response.is_successful() {
            tracing::error!(error = %response.error, "connect request rejected");
            return Err(FayeError::Unsuccessful {
                error: response.error,
            });
        }
        if !pushes.is_empty() {
            let client = self.clone();
            tokio::spawn(async move { client.handle_messages(pushes).await });
        }
        Ok(())
    }

    async fn resubscribe_all(&self) {
        let existing = {
            let mut shared = self.inner.shared.write().await;
            std::mem::take(&mut shared.subscriptions)
        };
        tracing::debug!(count = existing.len(), "resubscribing subscriptions");
        for subscription in existing {
            subscription.reset_stop();
            let client = self.clone();
            self.track_task(tokio::spawn(async move {
                client.resubscribe(subscription).await;
            }));
        }
    }

    async fn resubscribe(&self, subscription: Arc<Subscription>) {
        loop {
            match self.request_subscription(&subscription).await {
                Ok(()) => {
                    self.inner
                        .shared
                        .write()
                        .await
                        .subscriptions
                        .push(subscription.clone());
                    tracing::debug!(channel = subscription.channel(), "resubscribed");
                    return;
                }
                Err(e) => {
                    tracing::debug!(
                        error = %e,
                        channel = subscription.channel(),
                        "resubscribe failed, retrying in 1s"
                    );
                    sleep(SUBSCRIBE_RETRY).await;
                }
            }
        }
    }

    async fn request_subscription(
        &self,
        subscription: &Arc<Subscription>,
    ) -> Result<(), FayeError> {
        let (client_id, websocket) = {
            let shared = self.inner.shared.read().await;
            let websocket = shared
                .transport
                .as_ref()
                .is_some_and(|t| t.connection_type() == ConnectionType::Websocket);
            (shared.client_id.clone(), websocket)
        };
        let mut msg = Message::new(&client_id, SUBSCRIBE_CHANNEL);
        msg.subscription = subscription.channel().to_owned();

        if websocket {
            // No in-band response over WebSocket; success is assumed.
            self.send_only(msg).await?;
            if !subscription.is_polling() {
                tracing::debug!(
                    channel = subscription.channel(),
                    "starting keepalive pings"
                );
                let client = self.clone();
                let subscription = subscription.clone();
                self.track_task(tokio::spawn(async move {
                    client.ping_poll(subscription).await;
                }));
            }
            return Ok(());
        }

        let (response, _) = self.send(msg).await?;
        let response = response.ok_or_else(|| FayeError::MissingResponse {
            channel: SUBSCRIBE_CHANNEL.to_owned(),
        })?;
        self.spawn_handle_advice(response.advice());
        if !response.is_successful() {
            return Err(FayeError::Unsuccessful {
                error: response.error,
            });
        }
        Ok(())
    }

    /// Keepalive task for one WebSocket subscription: ping every 30 s until
    /// the client leaves [`ClientState::Connected`] or the subscription is
    /// stopped.
    async fn ping_poll(&self, subscription: Arc<Subscription>) {
        subscription.set_polling(true);
        loop {
            if !self.connected().await {
                tracing::debug!("client not connected, stopping keepalive pings");
                break;
            }
            if subscription.is_stopped() {
                tracing::debug!("subscription stopped, stopping keepalive pings");
                break;
            }
            if let Err(e) = self.ping(subscription.channel()).await {
                tracing::error!(error = %e, "keepalive ping failed");
                break;
            }
            sleep(WEBSOCKET_PING_INTERVAL).await;
        }
        subscription.set_polling(false);
    }

    async fn ping(&self, channel: &str) -> Result<(), FayeError> {
        let client_id = self.client_id().await;
        let mut msg = Message::new(&client_id, channel);
        msg.data.insert("type".to_owned(), Value::String("ping".to_owned()));
        self.send_only(msg).await
    }

    /// WebSocket read loop. On a read error the socket is torn down, every
    /// subscription's keepalive is stopped, and the client drops back to
    /// [`ClientState::Unconnected`] so a supervisor can re-handshake.
    async fn read_poll(&self) {
        loop {
            if let Err(e) = self.read_once().await {
                tracing::debug!(error = %e, "read loop ending");
                break;
            }
        }

        let transport = { self.inner.shared.read().await.transport.clone() };
        if let Some(transport) = transport {
            transport.close().await;
        }
        let mut shared = self.inner.shared.write().await;
        for subscription in &shared.subscriptions {
            subscription.stop();
        }
        shared.state = ClientState::Unconnected;
    }

    async fn read_once(&self) -> Result<(), FayeError> {
        let transport = self.transport().await?;
        let bytes = transport.read().await?;

        let frames = match codec::decode_frames(&bytes) {
            Ok(frames) => frames,
            Err(e) => {
                // One malformed frame must not kill the read loop.
                tracing::warn!(error = %e, "dropping undecodable payload");
                return Ok(());
            }
        };
        let (primary, pushes) = codec::split_frames(frames, None);
        if let Some(mut primary) = primary {
            self.run_incoming(&mut primary);
            self.spawn_handle_advice(primary.advice());
        }
        if !pushes.is_empty() {
            self.handle_messages(pushes).await;
        }
        Ok(())
    }

    /// Run inbound hooks and forward each frame to the first subscription
    /// whose channel pattern matches, on a fresh task so the reader is
    /// never blocked by a slow consumer. A match does not end the batch:
    /// the remaining frames are still dispatched.
    async fn handle_messages(&self, messages: Vec<Message>) {
        let subscriptions = { self.inner.shared.read().await.subscriptions.clone() };
        for mut message in messages {
            self.run_incoming(&mut message);
            match subscriptions.iter().find(|s| s.matches(&message.channel)) {
                Some(subscription) => {
                    let subscription = subscription.clone();
                    tokio::spawn(async move {
                        let _ = subscription.deliver(message).await;
                    });
                }
                None => {
                    tracing::warn!(
                        channel = %message.channel,
                        "no subscription for channel"
                    );
                }
            }
        }
    }

    fn spawn_handle_advice(&self, advice: Advice) {
        if advice.reconnect.is_none() {
            return;
        }
        let client = self.clone();
        tokio::spawn(async move { client.handle_advice(advice).await });
    }

    async fn handle_advice(&self, advice: Advice) {
        let Some(reconnect) = advice.reconnect else {
            return;
        };
        let retry = {
            let mut shared = self.inner.shared.write().await;
            match reconnect {
                Reconnect::Retry => true,
                Reconnect::Handshake => {
                    // Force a handshake on the next request, honoring the
                    // server's interval.
                    shared.state = ClientState::Unconnected;
                    if let Some(interval) = advice.interval.filter(|i| *i > 0) {
                        shared.next_handshake_at =
                            Some(Instant::now() + Duration::from_millis(interval));
                    }
                    false
                }
                Reconnect::None => {
                    shared.state = ClientState::Disconnected;
                    tracing::error!("server advised against reconnecting");
                    false
                }
            }
        };
        if retry {
            if let Err(e) = self.connect().await {
                tracing::error!(error = %e, "connect failed while handling advice");
            }
        }
    }

    /// Stamp the envelope with the client id and the next message id, then
    /// run the outbound extension chain. An envelope flagged with an error
    /// by an extension never touches the wire.
    async fn setup_send(&self, mut msg: Message) -> Result<Message, FayeError> {
        {
            let shared = self.inner.shared.read().await;
            if shared.state == ClientState::Disconnected {
                return Err(FayeError::Disconnected);
            }
            if msg.client_id.is_empty()
                && msg.channel != HANDSHAKE_CHANNEL
                && !shared.client_id.is_empty()
            {
                msg.client_id = shared.client_id.clone();
            }
        }
        msg.id = self
            .inner
            .message_id
            .fetch_add(1, Ordering::SeqCst)
            .to_string();

        self.run_outgoing(&mut msg);
        if msg.has_error() {
            return Err(FayeError::Rejected {
                error: msg.error,
            });
        }
        Ok(msg)
    }

    async fn send(
        &self,
        msg: Message,
    ) -> Result<(Option<Message>, Vec<Message>), FayeError> {
        let msg = self.setup_send(msg).await?;
        let request_id = msg.id.clone();
        let transport = self.transport().await?;
        let payload = codec::encode(&msg)?;

        let bytes = match transport.send(payload).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, channel = %msg.channel, "transport send failed");
                return Err(e.into());
            }
        };

        let (mut primary, pushes) = codec::decode_response(&bytes, Some(&request_id))?;
        if let Some(primary) = primary.as_mut() {
            self.run_incoming(primary);
        }
        Ok((primary, pushes))
    }

    async fn send_only(&self, msg: Message) -> Result<(), FayeError> {
        let msg = self.setup_send(msg).await?;
        let transport = self.transport().await?;
        let payload = codec::encode(&msg)?;
        transport.send_only(payload).await?;
        Ok(())
    }

    fn track_task(&self, handle: tokio::task::JoinHandle<()>) {
        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    async fn transport(&self) -> Result<Arc<dyn Transport>, FayeError> {
        self.inner
            .shared
            .read()
            .await
            .transport
            .clone()
            .ok_or(FayeError::NoUsableTransport)
    }

    fn run_outgoing(&self, msg: &mut Message) {
        for extension in self.inner.extensions.read().iter() {
            extension.outgoing(msg);
        }
    }

    fn run_incoming(&self, msg: &mut Message) {
        for extension in self.inner.extensions.read().iter() {
            extension.incoming(msg);
        }
    }
}

impl core::fmt::Debug for FayeClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FayeClient")
            .field("url", &self.inner.url)
            .finish_non_exhaustive()
    }
}
