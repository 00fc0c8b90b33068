//! Scripted transport for exercising the client without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;

use crate::{
    codec,
    message::{ConnectionType, Message},
    transport::{Transport, TransportError},
};

type ReadQueue = (
    async_channel::Sender<Vec<u8>>,
    async_channel::Receiver<Vec<u8>>,
);

/// A [`Transport`] whose responses are scripted per channel and which
/// records every frame it is asked to carry.
///
/// `send` looks up the request's channel in the script and pops the next
/// response body; an unscripted send fails with [`TransportError::Closed`].
/// `read` blocks on an internal queue fed by [`push_read`]; closing the
/// queue with [`fail_reads`] makes the read loop observe a transport
/// failure.
///
/// [`push_read`]: MockTransport::push_read
/// [`fail_reads`]: MockTransport::fail_reads
pub struct MockTransport {
    connection_type: ConnectionType,
    sent: Mutex<Vec<Message>>,
    scripted: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    read_queue: Mutex<ReadQueue>,
    usable: AtomicBool,
    url: Mutex<String>,
    timeout: Mutex<Duration>,
}

impl MockTransport {
    fn new(connection_type: ConnectionType) -> Self {
        MockTransport {
            connection_type,
            sent: Mutex::new(Vec::new()),
            scripted: Mutex::new(HashMap::new()),
            read_queue: Mutex::new(async_channel::unbounded()),
            usable: AtomicBool::new(true),
            url: Mutex::new(String::new()),
            timeout: Mutex::new(Duration::from_secs(180)),
        }
    }

    /// A scripted long-polling transport.
    #[must_use]
    pub fn long_polling() -> Self {
        Self::new(ConnectionType::LongPolling)
    }

    /// A scripted WebSocket transport.
    #[must_use]
    pub fn websocket() -> Self {
        Self::new(ConnectionType::Websocket)
    }

    /// Queue a response for the next `send` on `channel`.
    pub fn script(&self, channel: &str, frames: &[Message]) {
        let body = serde_json::to_vec(frames).expect("mock frames serialize");
        self.scripted
            .lock()
            .entry(channel.to_owned())
            .or_default()
            .push_back(body);
    }

    /// Queue `count` copies of the same response for `channel`.
    pub fn script_many(&self, channel: &str, frames: &[Message], count: usize) {
        for _ in 0..count {
            self.script(channel, frames);
        }
    }

    /// Push frames to be returned by the next `read`.
    pub fn push_read(&self, frames: &[Message]) {
        let body = serde_json::to_vec(frames).expect("mock frames serialize");
        self.push_read_raw(body);
    }

    /// Push a raw payload (possibly malformed) for the next `read`.
    pub fn push_read_raw(&self, body: Vec<u8>) {
        self.read_queue
            .lock()
            .0
            .try_send(body)
            .expect("mock read queue open");
    }

    /// Close the read queue: once drained, `read` fails with
    /// [`TransportError::Closed`]. Selecting the transport again (as a
    /// reconnecting client does) opens a fresh queue.
    pub fn fail_reads(&self) {
        self.read_queue.lock().0.close();
    }

    /// Mark the transport unusable for selection.
    pub fn set_usable(&self, usable: bool) {
        self.usable.store(usable, Ordering::Release);
    }

    /// Every frame carried so far, decoded, in wire order.
    #[must_use]
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    /// Every frame carried on `channel`, decoded, in wire order.
    #[must_use]
    pub fn sent_on(&self, channel: &str) -> Vec<Message> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.channel == channel)
            .cloned()
            .collect()
    }

    /// The URL the client last pointed this transport at.
    #[must_use]
    pub fn url(&self) -> String {
        self.url.lock().clone()
    }

    /// The per-operation deadline the client last configured.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        *self.timeout.lock()
    }

    fn record(&self, payload: &[u8]) -> Result<Message, TransportError> {
        let mut frames = codec::decode_frames(payload)
            .map_err(|e| TransportError::Other(Box::new(e)))?;
        let frame = frames.pop().ok_or(TransportError::Closed)?;
        self.sent.lock().push(frame.clone());
        Ok(frame)
    }
}

impl Transport for MockTransport {
    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    fn is_usable<'a>(&'a self, _host: &'a str) -> BoxFuture<'a, bool> {
        async move {
            let usable = self.usable.load(Ordering::Acquire);
            if usable && self.connection_type == ConnectionType::Websocket {
                // A real WebSocket transport dials eagerly here; model the
                // fresh connection with a fresh read queue.
                let mut queue = self.read_queue.lock();
                if queue.0.is_closed() {
                    *queue = async_channel::unbounded();
                }
            }
            usable
        }
        .boxed()
    }

    fn send(&self, payload: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>, TransportError>> {
        async move {
            let frame = self.record(&payload)?;
            let body = self
                .scripted
                .lock()
                .get_mut(&frame.channel)
                .and_then(VecDeque::pop_front);
            body.ok_or(TransportError::Closed)
        }
        .boxed()
    }

    fn send_only(&self, payload: Vec<u8>) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            self.record(&payload)?;
            Ok(())
        }
        .boxed()
    }

    fn read(&self) -> BoxFuture<'_, Result<Vec<u8>, TransportError>> {
        let receiver = self.read_queue.lock().1.clone();
        async move { receiver.recv().await.map_err(|_| TransportError::Closed) }.boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            self.read_queue.lock().0.close();
        }
        .boxed()
    }

    fn set_url(&self, host: &str) {
        *self.url.lock() = host.to_owned();
    }

    fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock() = timeout;
    }
}

/// A successful handshake response assigning `client_id` and advertising
/// `supported` connection types.
#[must_use]
pub fn handshake_ok(client_id: &str, supported: &[&str]) -> Message {
    let mut msg = Message::new(client_id, crate::message::HANDSHAKE_CHANNEL);
    msg.successful = Some(true);
    msg.supported_connection_types =
        supported.iter().map(|s| (*s).to_owned()).collect();
    msg
}

/// A successful response on `channel`.
#[must_use]
pub fn response_ok(channel: &str) -> Message {
    let mut msg = Message::new("", channel);
    msg.successful = Some(true);
    msg
}

/// A push frame on `channel` with the given `data.type` and `subject`.
#[must_use]
pub fn push_frame(channel: &str, data_type: &str, subject: serde_json::Value) -> Message {
    let mut msg = Message::new("", channel);
    msg.data
        .insert("type".to_owned(), data_type.to_owned().into());
    msg.data.insert("subject".to_owned(), subject);
    msg
}
