//! The push subscription: connection supervision and event dispatch.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use bayeux_core::{FayeClient, FayeError, Message, Transport, TransportRegistry};
use bayeux_http_longpoll::HttpTransport;
use bayeux_websocket::WebSocketTransport;

use crate::{
    auth::AuthExt,
    dispatch::{Routed, CONTENT_ROUTES},
    error::PushError,
    event::{PushEvent, PushHandler},
    models::Id,
    rest::RelationsClient,
};

/// The push service endpoint, reached as `wss://` and `https://`.
pub const PUSH_SERVER: &str = "push.groupme.com/faye";

const USER_CHANNEL_PREFIX: &str = "/user/";
const GROUP_CHANNEL_PREFIX: &str = "/group/";
const DM_CHANNEL_PREFIX: &str = "/direct_message/";

/// Minutes without an inbound frame before the link counts as stale.
const DEFAULT_TIMEOUT_MINUTES: u64 = 3;

const SUPERVISOR_PERIOD: Duration = Duration::from_secs(5);
const RECONNECT_RETRIES: u32 = 3;
const RECONNECT_WAIT: Duration = Duration::from_secs(5);

/// A Bayeux client wired for the push service: WebSocket preferred over
/// long-polling, token injection on subscribe/ping, and wire tracing.
#[must_use]
pub fn new_push_client(token: &str) -> FayeClient {
    let transports: Vec<Arc<dyn Transport>> = vec![
        Arc::new(WebSocketTransport::new()),
        Arc::new(HttpTransport::new()),
    ];
    let client = FayeClient::new(PUSH_SERVER, TransportRegistry::new(transports));
    client.add_extension(Arc::new(AuthExt::new(token)));
    client.add_extension(Arc::new(bayeux_core::extension::TraceExt));
    client
}

struct PushInner {
    faye: FayeClient,
    rest: Arc<dyn RelationsClient>,
    handlers: parking_lot::RwLock<Vec<Arc<dyn PushHandler>>>,
    inbound_tx: mpsc::Sender<Message>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    /// Wall-clock time by which a new frame must arrive for the link to
    /// count as healthy.
    connection_deadline: parking_lot::Mutex<Instant>,
    timeout_minutes: u64,
    started: AtomicBool,
    cancel: CancellationToken,
    /// Dispatch loop and forwarder tasks; they exit on `cancel` and are
    /// joined by `close`.
    tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    /// The connection supervisor, aborted by `close` (it may be parked
    /// inside the client's handshake retry loop, where the token is not
    /// observed).
    supervisor: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Owns a [`FayeClient`], keeps it connected, and dispatches decoded push
/// payloads to registered handlers.
#[derive(Clone)]
pub struct PushSubscription {
    inner: Arc<PushInner>,
}

impl PushSubscription {
    /// A subscription over `faye`, using `rest` to resolve authoritative
    /// member lists on removal events.
    #[must_use]
    pub fn new(faye: FayeClient, rest: Arc<dyn RelationsClient>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(1);
        PushSubscription {
            inner: Arc::new(PushInner {
                faye,
                rest,
                handlers: parking_lot::RwLock::new(Vec::new()),
                inbound_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                connection_deadline: parking_lot::Mutex::new(Instant::now()),
                timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tasks: parking_lot::Mutex::new(Vec::new()),
                supervisor: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Register a consumer for every decoded event.
    pub fn add_handler(&self, handler: Arc<dyn PushHandler>) {
        self.inner.handlers.write().push(handler);
    }

    /// Handshake and connect, then start the dispatch loop and the
    /// connection supervisor.
    pub async fn setup(&self) -> Result<(), FayeError> {
        self.inner.faye.handshake_and_connect().await?;

        if let Some(receiver) = self.inner.inbound_rx.lock().await.take() {
            let this = self.clone();
            self.inner
                .tasks
                .lock()
                .push(tokio::spawn(async move { this.dispatch_loop(receiver).await }));
            let this = self.clone();
            *self.inner.supervisor.lock() =
                Some(tokio::spawn(async move { this.supervise().await }));
        }
        self.inner.started.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether the underlying client currently holds a session.
    pub async fn connected(&self) -> bool {
        self.inner.faye.connected().await
    }

    /// The current liveness deadline.
    #[must_use]
    pub fn connection_deadline(&self) -> Instant {
        *self.inner.connection_deadline.lock()
    }

    /// Subscribe to the authenticated user's channel.
    pub async fn subscribe_to_user(&self, id: &Id) -> Result<(), PushError> {
        self.subscribe_with_prefix(USER_CHANNEL_PREFIX, id.clone()).await
    }

    /// Subscribe to a group's channel.
    pub async fn subscribe_to_group(&self, id: &Id) -> Result<(), PushError> {
        self.subscribe_with_prefix(GROUP_CHANNEL_PREFIX, id.clone()).await
    }

    /// Subscribe to a direct-message channel. Compound DM ids use `+` in
    /// the REST API but `_` on push channels.
    pub async fn subscribe_to_dm(&self, id: &Id) -> Result<(), PushError> {
        let id = Id(id.as_str().replacen('+', "_", 1));
        self.subscribe_with_prefix(DM_CHANNEL_PREFIX, id).await
    }

    /// Stop the dispatch loop and supervisor, tear down every
    /// subscription, close the transport, and join all background tasks.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.faye.close().await;

        let supervisor = self.inner.supervisor.lock().take();
        if let Some(handle) = supervisor {
            handle.abort();
            let _ = handle.await;
        }
        // Dispatch loop and forwarders observe the token promptly; the
        // loop drains the inbound channel on its way out.
        let handles: Vec<_> = std::mem::take(&mut *self.inner.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn subscribe_with_prefix(&self, prefix: &str, id: Id) -> Result<(), PushError> {
        if !self.inner.started.load(Ordering::Acquire) {
            return Err(PushError::ListenerNotStarted);
        }

        let channel = format!("{prefix}{id}");
        let (delivery_tx, mut delivery_rx) = mpsc::channel(1);
        self.inner.faye.wait_subscribe(&channel, delivery_tx).await;

        // Copy frames from the per-subscription delivery channel into the
        // shared inbound channel the dispatch loop drains.
        let inbound = self.inner.inbound_tx.clone();
        let cancel = self.inner.cancel.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    received = delivery_rx.recv() => match received {
                        Some(message) => {
                            if inbound.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
        self.inner.tasks.lock().push(forwarder);
        Ok(())
    }

    async fn dispatch_loop(&self, mut receiver: mpsc::Receiver<Message>) {
        loop {
            let message = tokio::select! {
                () = self.inner.cancel.cancelled() => break,
                received = receiver.recv() => match received {
                    Some(message) => message,
                    None => break,
                },
            };
            *self.inner.connection_deadline.lock() =
                Instant::now() + Duration::from_secs(60 * self.inner.timeout_minutes);
            self.dispatch(message).await;
        }
        // Unstick any forwarder parked on the inbound channel.
        while receiver.try_recv().is_ok() {}
        tracing::debug!("dispatch loop stopped");
    }

    async fn dispatch(&self, message: Message) {
        let Some(content_type) = message.data_type().map(str::to_owned) else {
            return;
        };
        if content_type.is_empty() || content_type == "ping" {
            return;
        }
        let Some(subject) = message.data.get("subject").cloned() else {
            return;
        };
        let Some(route) = CONTENT_ROUTES.get(content_type.as_str()) else {
            tracing::warn!(content_type = %content_type, "unable to handle message type");
            return;
        };

        let routed = match route(&message.channel, &subject) {
            Ok(routed) => routed,
            Err(e) => {
                tracing::warn!(error = %e, content_type = %content_type, "failed to decode payload");
                self.emit(PushEvent::Error(e));
                return;
            }
        };
        match routed {
            Routed::Drop => {}
            Routed::Event(event) => self.emit(event),
            Routed::FetchMembers { group } => {
                match self.inner.rest.group_members(&group).await {
                    Ok(members) => self.emit(PushEvent::Members {
                        group,
                        members,
                        added: false,
                    }),
                    Err(e) => {
                        tracing::error!(error = %e, %group, "member list fetch failed");
                        self.emit(PushEvent::Error(PushError::MemberFetch {
                            group,
                            detail: e.to_string(),
                        }));
                    }
                }
            }
        }
    }

    fn emit(&self, event: PushEvent) {
        for handler in self.inner.handlers.read().iter() {
            handler.handle_event(event.clone());
        }
    }

    /// Every 5 s, re-handshake a dropped session, giving up after three
    /// failed attempts or immediately on terminal advice.
    async fn supervise(&self) {
        loop {
            tokio::select! {
                () = self.inner.cancel.cancelled() => return,
                () = sleep(SUPERVISOR_PERIOD) => {}
            }
            if self.inner.faye.connected().await {
                continue;
            }

            let mut reconnected = false;
            for attempt in 1..=RECONNECT_RETRIES {
                tracing::info!(attempt, "push subscription reconnecting");
                match self.inner.faye.handshake_and_connect().await {
                    Ok(()) => {
                        reconnected = true;
                        break;
                    }
                    Err(e) if e.is_terminal() => {
                        tracing::error!(
                            "server advised against reconnecting, supervisor exiting"
                        );
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "reconnect attempt failed");
                        tokio::select! {
                            () = self.inner.cancel.cancelled() => return,
                            () = sleep(RECONNECT_WAIT) => {}
                        }
                    }
                }
            }
            if !reconnected {
                tracing::error!(
                    retries = RECONNECT_RETRIES,
                    "push subscription could not reconnect, supervisor exiting"
                );
                return;
            }
        }
    }
}
