//! Realtime change feeds over the Phoenix websocket protocol

mod channel;
mod message;

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::auth::SessionStore;
use crate::config::RealtimeOptions;
use crate::error::Error;
use crate::profiles::{MechanicPosition, MECHANICS_TABLE};
use crate::request::{RequestId, RequestStatus, ServiceRequest};
use crate::REQUESTS_TABLE;

pub use channel::{Change, Subscription, TypedSubscription};
pub use message::{ChangeEvent, ChangeFilter, ChangeKind, ChannelEvent, PhoenixMessage};

use channel::ChannelEntry;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Websocket endpoint for a project URL: `http` becomes `ws`, `https`
/// becomes `wss`.
pub fn websocket_url(base_url: &str, key: &str) -> Result<Url, Error> {
    let mut url = Url::parse(base_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(Error::realtime(format!("unsupported URL scheme: {}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::realtime(format!("cannot switch {} to {}", base_url, scheme)))?;
    let path = format!("{}/realtime/v1/websocket", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

/// State shared between the client handle, its subscriptions and the
/// connection task
pub(crate) struct Inner {
    url: String,
    key: String,
    session: SessionStore,
    options: RealtimeOptions,
    next_ref: AtomicU64,
    next_channel: AtomicU64,
    /// Schema the typed feeds listen on
    schema: String,
    channels: Mutex<HashMap<String, ChannelEntry>>,
    socket: Mutex<Option<mpsc::Sender<Message>>>,
    state: Mutex<ConnectionState>,
    state_change: broadcast::Sender<ConnectionState>,
    manually_closed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn access_token(&self) -> String {
        self.session.access_token().unwrap_or_else(|| self.key.clone())
    }

    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = lock(&self.state);
        if *current != state {
            info!("realtime connection {:?} -> {:?}", *current, state);
            *current = state;
            let _ = self.state_change.send(state);
        }
    }

    fn encode(frame: &PhoenixMessage) -> Option<Message> {
        match serde_json::to_string(frame) {
            Ok(text) => Some(Message::Text(text)),
            Err(e) => {
                error!("could not encode {:?} frame: {}", frame.event, e);
                None
            }
        }
    }

    /// Queue a frame if a connection is up. Frames for a closed socket are
    /// dropped; joins are replayed on the next connection.
    fn try_send(&self, frame: &PhoenixMessage) {
        let socket = lock(&self.socket);
        if let (Some(socket), Some(message)) = (socket.as_ref(), Self::encode(frame)) {
            if let Err(e) = socket.try_send(message) {
                warn!("could not queue {:?} frame for {}: {}", frame.event, frame.topic, e);
            }
        }
    }

    fn join_frame(&self, topic: &str, filter: &ChangeFilter) -> PhoenixMessage {
        PhoenixMessage::join(topic, filter, &self.access_token(), self.next_ref())
    }

    pub(crate) fn leave(&self, topic: &str) {
        if lock(&self.channels).remove(topic).is_some() {
            self.try_send(&PhoenixMessage::leave(topic, self.next_ref()));
        }
    }

    /// Route one incoming text frame
    fn dispatch(&self, text: &str) {
        let frame: PhoenixMessage = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("unreadable realtime frame: {}", e);
                return;
            }
        };

        match frame.event {
            ChannelEvent::PostgresChanges => {
                let event = match ChangeEvent::from_payload(&frame.payload) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("bad change payload on {}: {}", frame.topic, e);
                        return;
                    }
                };
                let mut channels = lock(&self.channels);
                let alive = match channels.get(&frame.topic) {
                    Some(entry) => entry.deliver(&frame.topic, event),
                    None => {
                        trace!("change for unknown topic {}", frame.topic);
                        true
                    }
                };
                if !alive {
                    channels.remove(&frame.topic);
                }
            }
            ChannelEvent::Reply | ChannelEvent::System => {
                if frame.status() == Some("error") {
                    warn!("realtime error on {}: {}", frame.topic, frame.payload);
                } else {
                    debug!("{:?} on {}: {:?}", frame.event, frame.topic, frame.status());
                }
            }
            ChannelEvent::Error => warn!("channel {} errored: {}", frame.topic, frame.payload),
            ChannelEvent::Close => debug!("channel {} closed", frame.topic),
            _ => trace!("ignoring {:?} on {}", frame.event, frame.topic),
        }
    }

    /// Pump one connection until it drops or the client disconnects
    async fn serve(&self, stream: WsStream) {
        let (mut write, mut read) = stream.split();
        let (socket_tx, mut socket_rx) = mpsc::channel::<Message>(100);
        *lock(&self.socket) = Some(socket_tx);
        self.set_state(ConnectionState::Connected);

        let joins: Vec<PhoenixMessage> = lock(&self.channels)
            .iter()
            .map(|(topic, entry)| self.join_frame(topic, &entry.filter))
            .collect();
        for join in joins {
            debug!("joining {}", join.topic);
            if let Some(message) = Self::encode(&join) {
                if let Err(e) = write.send(message).await {
                    warn!("join for {} failed: {}", join.topic, e);
                }
            }
        }

        let mut heartbeat = interval(self.options.heartbeat_interval.max(Duration::from_millis(10)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                    Some(Ok(Message::Close(frame))) => {
                        debug!("server closed the socket: {:?}", frame);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("realtime read failed: {}", e);
                        break;
                    }
                    None => break,
                },
                outgoing = socket_rx.recv() => match outgoing {
                    Some(message) => {
                        if let Err(e) = write.send(message).await {
                            warn!("realtime write failed: {}", e);
                            break;
                        }
                    }
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    trace!("sending heartbeat");
                    if let Some(message) = Self::encode(&PhoenixMessage::heartbeat(self.next_ref())) {
                        if let Err(e) = write.send(message).await {
                            warn!("heartbeat failed: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        *lock(&self.socket) = None;
        self.set_state(ConnectionState::Disconnected);
    }

    async fn open(&self) -> Result<WsStream, Error> {
        let url = websocket_url(&self.url, &self.key)?;
        debug!("connecting to {}/realtime/v1/websocket", self.url);
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::realtime(format!("websocket connection failed: {}", e)))?;
        Ok(stream)
    }

    /// Reconnect with exponential backoff. `None` when giving up or
    /// disconnected by the caller.
    async fn reconnect(&self) -> Option<WsStream> {
        let mut delay = self.options.reconnect_interval;
        let mut attempts = 0u32;

        loop {
            if self.manually_closed.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(max) = self.options.max_reconnect_attempts {
                if attempts >= max {
                    error!("giving up on realtime after {} reconnect attempts", attempts);
                    return None;
                }
            }
            attempts += 1;
            self.set_state(ConnectionState::Reconnecting);
            sleep(delay).await;
            if self.manually_closed.load(Ordering::SeqCst) {
                return None;
            }

            match self.open().await {
                Ok(stream) => {
                    info!("realtime reconnected after {} attempt(s)", attempts);
                    return Some(stream);
                }
                Err(e) => {
                    warn!("reconnect attempt {} failed: {}", attempts, e);
                    let next = delay.as_secs_f64() * self.options.reconnect_backoff_factor;
                    delay = Duration::from_secs_f64(next).min(self.options.max_reconnect_interval);
                }
            }
        }
    }

    async fn supervise(self: Arc<Self>, mut stream: WsStream) {
        loop {
            self.serve(stream).await;
            if self.manually_closed.load(Ordering::SeqCst) || !self.options.auto_reconnect {
                break;
            }
            match self.reconnect().await {
                Some(next) => stream = next,
                None => break,
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

/// Client for database change feeds
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl RealtimeClient {
    pub(crate) fn new(
        url: &str,
        key: &str,
        schema: &str,
        session: SessionStore,
        options: RealtimeOptions,
    ) -> Self {
        let (state_change, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                url: url.trim_end_matches('/').to_string(),
                key: key.to_string(),
                session,
                options,
                next_ref: AtomicU64::new(1),
                next_channel: AtomicU64::new(1),
                schema: schema.to_string(),
                channels: Mutex::new(HashMap::new()),
                socket: Mutex::new(None),
                state: Mutex::new(ConnectionState::Disconnected),
                state_change,
                manually_closed: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Receiver for connection state changes
    pub fn on_state_change(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.state_change.subscribe()
    }

    /// Open the socket. Existing subscriptions are joined once connected;
    /// lost connections are re-established in the background.
    pub async fn connect(&self) -> Result<(), Error> {
        if matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Connecting | ConnectionState::Reconnecting
        ) {
            return Ok(());
        }
        self.inner.manually_closed.store(false, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Connecting);

        let stream = match self.inner.open().await {
            Ok(stream) => stream,
            Err(e) => {
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        let task = tokio::spawn(Arc::clone(&self.inner).supervise(stream));
        *lock(&self.inner.task) = Some(task);
        Ok(())
    }

    /// Close the socket and stop reconnecting. Subscriptions stay
    /// registered and are re-joined by a later `connect`.
    pub async fn disconnect(&self) {
        info!("realtime disconnect requested");
        self.inner.manually_closed.store(true, Ordering::SeqCst);
        lock(&self.inner.socket).take();
        let task = lock(&self.inner.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("realtime task ended abnormally: {}", e);
            }
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Listen for changes matching `filter` on a new channel
    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        let n = self.inner.next_channel.fetch_add(1, Ordering::SeqCst);
        let topic = format!("realtime:{}-{}", filter.table, n);
        let (events_tx, events_rx) = mpsc::channel(self.inner.options.subscription_buffer.max(1));

        let join = self.inner.join_frame(&topic, &filter);
        lock(&self.inner.channels).insert(
            topic.clone(),
            ChannelEntry {
                filter,
                events: events_tx,
            },
        );
        debug!("subscribing on {}", topic);
        self.inner.try_send(&join);

        Subscription::new(topic, events_rx, Arc::clone(&self.inner))
    }

    /// Push the current session token to every joined channel, after a
    /// sign-in or token refresh
    pub fn refresh_auth(&self) {
        let token = self.inner.access_token();
        let topics: Vec<String> = lock(&self.inner.channels).keys().cloned().collect();
        for topic in topics {
            self.inner
                .try_send(&PhoenixMessage::access_token(&topic, &token, self.inner.next_ref()));
        }
    }

    fn filter(&self, table: &str) -> ChangeFilter {
        ChangeFilter::table(table).schema(&self.inner.schema)
    }

    /// A customer's requests, for status changes on their screens
    pub fn request_updates(&self, customer_id: &str) -> TypedSubscription<ServiceRequest> {
        self.subscribe(self.filter(REQUESTS_TABLE).eq("customer_id", customer_id))
            .typed()
    }

    /// One request, for following the mechanic on the customer's map
    pub fn request_tracking(&self, request_id: &RequestId) -> TypedSubscription<ServiceRequest> {
        self.subscribe(self.filter(REQUESTS_TABLE).eq("id", request_id))
            .typed()
    }

    /// Newly posted and updated pending requests, for the mechanic dashboard
    pub fn open_requests(&self) -> TypedSubscription<ServiceRequest> {
        self.subscribe(self.filter(REQUESTS_TABLE).eq("status", RequestStatus::Pending.as_str()))
            .typed()
    }

    /// Position updates from the mechanics table
    pub fn mechanic_positions(&self) -> TypedSubscription<MechanicPosition> {
        self.subscribe(self.filter(MECHANICS_TABLE).event(ChangeKind::Update))
            .typed()
    }

    #[cfg(test)]
    pub(crate) fn inject(&self, text: &str) {
        self.inner.dispatch(text);
    }

    #[cfg(test)]
    pub(crate) fn channel_count(&self) -> usize {
        lock(&self.inner.channels).len()
    }

    #[cfg(test)]
    pub(crate) fn channel_filter(&self, topic: &str) -> Option<ChangeFilter> {
        lock(&self.inner.channels).get(topic).map(|entry| entry.filter.clone())
    }
}
