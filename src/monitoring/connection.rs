use crate::error::MonitorError;
use crate::monitoring::registry::{
    DeliveryOutcome, SubscriptionRegistry, TopicKey, TopicRoute,
};
use crate::monitoring::stomp::{
    negotiate_heartbeat, parse_heartbeat_header, parse_wire, Command, Frame, WireEvent,
    HEARTBEAT_PAYLOAD,
};
use crate::monitoring::types::{AlarmEvent, ConnectionState, MonitorConfig, TelemetrySample};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

struct EstablishedSession {
    sink: WsSink,
    stream: WsSource,
    /// Negotiated (outgoing, incoming) heartbeat intervals in ms; 0 disables.
    heartbeat: (u64, u64),
}

struct SessionTasks {
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

struct ConnectionInner {
    config: MonitorConfig,
    state: Mutex<ConnectionState>,
    registry: Mutex<SubscriptionRegistry>,
    writer: tokio::sync::Mutex<Option<WsSink>>,
    session: Mutex<Option<SessionTasks>>,
    last_inbound: Mutex<Instant>,
}

/// Owns the one persistent broker connection for a dashboard session.
///
/// Subscriptions registered here survive unsolicited connection loss: after
/// every successful reconnect the registry's known topics are transparently
/// re-subscribed, so consumer channels stay valid across outages. Delivery
/// remains at-most-once; anything published while the link was down is gone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ConnectionInner>,
}

impl ConnectionManager {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                config,
                state: Mutex::new(ConnectionState::Disconnected),
                registry: Mutex::new(SubscriptionRegistry::default()),
                writer: tokio::sync::Mutex::new(None),
                session: Mutex::new(None),
                last_inbound: Mutex::new(Instant::now()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn active_subscriptions(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Connects to the broker if not already connected.
    ///
    /// Returns `true` immediately when Connected. Returns `false` without
    /// side effects when an attempt is already in flight; the state cell is
    /// claimed before the first await point, so overlapping callers cannot
    /// open a second transport.
    pub async fn connect(&self) -> bool {
        {
            let mut state = self.inner.state.lock();
            match *state {
                ConnectionState::Connected => return true,
                ConnectionState::Connecting | ConnectionState::Reconnecting => return false,
                ConnectionState::Disconnected => *state = ConnectionState::Connecting,
            }
        }

        match self.establish().await {
            Ok(()) => true,
            Err(error) => {
                debug!(%error, "broker connect failed");
                let mut state = self.inner.state.lock();
                if *state == ConnectionState::Connecting {
                    *state = ConnectionState::Disconnected;
                }
                false
            }
        }
    }

    /// Tears the session down: cancels the reader, heartbeat and reconnect
    /// tasks, sends a best-effort DISCONNECT, and clears every registry
    /// entry. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        {
            *self.inner.state.lock() = ConnectionState::Disconnected;
        }

        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            session.cancel.cancel();
            for task in session.tasks {
                let _ = task.await;
            }
        }

        {
            let mut writer = self.inner.writer.lock().await;
            if let Some(mut sink) = writer.take() {
                let _ = sink
                    .send(WsMessage::Text(Frame::disconnect().serialize()))
                    .await;
                let _ = sink.close().await;
            }
        }

        self.inner.registry.lock().clear();
    }

    /// Live telemetry feed for one order. Ensures connectivity first and
    /// returns `None` when the connection cannot be established; any earlier
    /// subscription for the same order is retired before the new one is
    /// registered.
    pub async fn subscribe_order_details(
        &self,
        order_number: &str,
    ) -> Option<OrderDetailSubscription> {
        let key = TopicKey::order_detail(order_number);
        let (sender, receiver) = mpsc::unbounded_channel();
        let generation = self
            .register_and_subscribe(key.clone(), TopicRoute::OrderDetail(sender))
            .await?;
        Some(TopicSubscription {
            key,
            generation,
            connection: self.clone(),
            receiver,
        })
    }

    /// The single global temperature-alarm feed.
    pub async fn subscribe_alarms(&self) -> Option<AlarmSubscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let generation = self
            .register_and_subscribe(TopicKey::Alarm, TopicRoute::Alarm(sender))
            .await?;
        Some(TopicSubscription {
            key: TopicKey::Alarm,
            generation,
            connection: self.clone(),
            receiver,
        })
    }

    async fn register_and_subscribe(&self, key: TopicKey, route: TopicRoute) -> Option<u64> {
        if !self.connect().await {
            return None;
        }

        let (generation, stomp_id, replaced) =
            self.inner.registry.lock().register(key.clone(), route);
        if let Some(old) = replaced {
            let _ = self.send_frame(Frame::unsubscribe(&old.stomp_id)).await;
        }

        if let Err(error) = self
            .send_frame(Frame::subscribe(&stomp_id, &key.destination()))
            .await
        {
            // The entry stays registered; the subscribe frame is replayed on
            // the next successful reconnect.
            warn!(%error, destination = %key.destination(), "subscribe frame not sent");
        }
        Some(generation)
    }

    async fn release_subscription(&self, key: &TopicKey, generation: u64) {
        let removed = self.inner.registry.lock().remove_if_generation(key, generation);
        if let Some(entry) = removed {
            let _ = self.send_frame(Frame::unsubscribe(&entry.stomp_id)).await;
        }
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), MonitorError> {
        let mut writer = self.inner.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => sink
                .send(WsMessage::Text(frame.serialize()))
                .await
                .map_err(Into::into),
            None => Err(MonitorError::NotConnected),
        }
    }

    async fn establish(&self) -> Result<(), MonitorError> {
        let timeout = Duration::from_millis(self.inner.config.connect_timeout_ms);
        // Race between the handshake and the timeout: whichever resolves
        // first wins, the loser is dropped with the future.
        let session = match tokio::time::timeout(timeout, open_session(&self.inner.config)).await {
            Ok(Ok(session)) => session,
            Ok(Err(error)) => return Err(error),
            Err(_) => return Err(MonitorError::ConnectTimeout),
        };
        self.install_session(session).await
    }

    async fn install_session(&self, session: EstablishedSession) -> Result<(), MonitorError> {
        let EstablishedSession {
            sink,
            stream,
            heartbeat,
        } = session;

        {
            let mut writer = self.inner.writer.lock().await;
            *writer = Some(sink);
        }

        let committed = {
            let mut state = self.inner.state.lock();
            if matches!(
                *state,
                ConnectionState::Connecting | ConnectionState::Reconnecting
            ) {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        };
        if !committed {
            // disconnect() raced us; abandon the fresh transport.
            let mut writer = self.inner.writer.lock().await;
            if let Some(mut sink) = writer.take() {
                let _ = sink.close().await;
            }
            return Err(MonitorError::NotConnected);
        }

        *self.inner.last_inbound.lock() = Instant::now();

        let cancel = CancellationToken::new();
        let mut tasks = vec![tokio::spawn(read_loop(
            self.clone(),
            stream,
            cancel.clone(),
        ))];
        let (outgoing_ms, incoming_ms) = heartbeat;
        if outgoing_ms > 0 || incoming_ms > 0 {
            tasks.push(tokio::spawn(heartbeat_loop(
                self.clone(),
                outgoing_ms,
                incoming_ms,
                cancel.clone(),
            )));
        }

        let previous = self
            .inner
            .session
            .lock()
            .replace(SessionTasks { cancel, tasks });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        self.replay_subscriptions().await;
        info!(url = %self.inner.config.ws_url, "broker connection established");
        Ok(())
    }

    async fn replay_subscriptions(&self) {
        let topics = self.inner.registry.lock().topics();
        for (key, stomp_id) in topics {
            if let Err(error) = self
                .send_frame(Frame::subscribe(&stomp_id, &key.destination()))
                .await
            {
                warn!(%error, destination = %key.destination(), "failed to replay subscription");
            }
        }
    }

    fn touch_inbound(&self) {
        *self.inner.last_inbound.lock() = Instant::now();
    }

    fn inbound_silence(&self) -> Duration {
        self.inner.last_inbound.lock().elapsed()
    }

    async fn handle_text(&self, payload: &str) {
        match parse_wire(payload) {
            Ok(WireEvent::Heartbeat) => {}
            Ok(WireEvent::Frame(frame)) => match frame.command {
                Command::Message => {
                    let Some(destination) = frame.header_value("destination") else {
                        warn!("dropping MESSAGE frame without destination header");
                        return;
                    };
                    let destination = destination.to_string();
                    let outcome = self
                        .inner
                        .registry
                        .lock()
                        .route_message(&destination, &frame.body);
                    if let DeliveryOutcome::ConsumerGone(stomp_id) = outcome {
                        debug!(%destination, "pruning subscription with closed consumer");
                        let _ = self.send_frame(Frame::unsubscribe(&stomp_id)).await;
                    }
                }
                Command::Error => {
                    warn!(
                        message = frame.header_value("message").unwrap_or_default(),
                        "broker reported an error"
                    );
                }
                _ => {}
            },
            Err(error) => warn!(%error, "dropping malformed frame"),
        }
    }

    /// Connected -> Reconnecting transition after an unsolicited loss; only
    /// the first detector wins. Retries at a fixed delay until success or
    /// teardown, without caller intervention.
    async fn begin_reconnect(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state != ConnectionState::Connected {
                return;
            }
            *state = ConnectionState::Reconnecting;
        }
        info!("broker connection lost, scheduling reconnect");

        {
            let mut writer = self.inner.writer.lock().await;
            *writer = None;
        }

        let previous = self.inner.session.lock().take();
        if let Some(previous) = previous {
            // The caller is one of these tasks; cancel without joining.
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reconnect_loop(self.clone(), cancel.clone()));
        *self.inner.session.lock() = Some(SessionTasks {
            cancel,
            tasks: vec![handle],
        });
    }
}

async fn open_session(config: &MonitorConfig) -> Result<EstablishedSession, MonitorError> {
    let (socket, _response) = connect_async(config.ws_url.as_str()).await?;
    let (mut sink, mut stream) = socket.split();

    let connect_frame = Frame::connect(&host_from_url(&config.ws_url), config.heartbeat_ms);
    sink.send(WsMessage::Text(connect_frame.serialize())).await?;

    loop {
        let Some(next) = stream.next().await else {
            return Err(MonitorError::Protocol(
                "connection closed during handshake".to_string(),
            ));
        };
        let payload = match next? {
            WsMessage::Text(text) => text,
            WsMessage::Binary(bytes) => String::from_utf8(bytes).map_err(|_| {
                MonitorError::MalformedFrame("non-utf8 frame during handshake".to_string())
            })?,
            WsMessage::Close(_) => {
                return Err(MonitorError::Protocol(
                    "broker closed the connection during handshake".to_string(),
                ))
            }
            _ => continue,
        };

        match parse_wire(&payload)? {
            WireEvent::Heartbeat => continue,
            WireEvent::Frame(frame) => match frame.command {
                Command::Connected => {
                    let server = frame
                        .header_value("heart-beat")
                        .and_then(parse_heartbeat_header)
                        .unwrap_or((0, 0));
                    let heartbeat =
                        negotiate_heartbeat((config.heartbeat_ms, config.heartbeat_ms), server);
                    return Ok(EstablishedSession {
                        sink,
                        stream,
                        heartbeat,
                    });
                }
                Command::Error => {
                    let reason = frame
                        .header_value("message")
                        .map(str::to_string)
                        .filter(|message| !message.is_empty())
                        .unwrap_or_else(|| frame.body.trim().to_string());
                    return Err(MonitorError::Protocol(reason));
                }
                _ => continue,
            },
        }
    }
}

async fn read_loop(manager: ConnectionManager, mut stream: WsSource, cancel: CancellationToken) {
    let lost = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break false,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(message)) => {
                manager.touch_inbound();
                match message {
                    WsMessage::Text(text) => manager.handle_text(&text).await,
                    WsMessage::Binary(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => manager.handle_text(&text).await,
                        Err(_) => warn!("dropping non-utf8 broker frame"),
                    },
                    WsMessage::Close(_) => break true,
                    _ => {}
                }
            }
            Some(Err(error)) => {
                debug!(%error, "transport read error");
                break true;
            }
            None => break true,
        }
    };

    if lost && !cancel.is_cancelled() {
        manager.begin_reconnect().await;
    }
}

async fn heartbeat_loop(
    manager: ConnectionManager,
    outgoing_ms: u64,
    incoming_ms: u64,
    cancel: CancellationToken,
) {
    let tick_ms = match (outgoing_ms, incoming_ms) {
        (0, incoming) => incoming,
        (outgoing, 0) => outgoing,
        (outgoing, incoming) => outgoing.min(incoming),
    };
    let silence_limit = Duration::from_millis(incoming_ms.saturating_mul(2));

    let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if outgoing_ms > 0 {
            let send_result = {
                let mut writer = manager.inner.writer.lock().await;
                match writer.as_mut() {
                    Some(sink) => sink.send(WsMessage::Text(HEARTBEAT_PAYLOAD.to_string())).await,
                    None => return,
                }
            };
            if let Err(error) = send_result {
                debug!(%error, "heartbeat send failed");
                manager.begin_reconnect().await;
                return;
            }
        }

        if incoming_ms > 0 && manager.inbound_silence() > silence_limit {
            warn!("no broker traffic within the heartbeat window");
            manager.begin_reconnect().await;
            return;
        }
    }
}

async fn reconnect_loop(manager: ConnectionManager, cancel: CancellationToken) {
    let delay = Duration::from_millis(manager.inner.config.reconnect_delay_ms);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        match manager.establish().await {
            Ok(()) => return,
            Err(error) => debug!(%error, "reconnect attempt failed"),
        }
        if cancel.is_cancelled() {
            return;
        }
    }
}

fn host_from_url(url: &str) -> String {
    let authority = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or_default();
    let host_port = authority
        .rsplit_once('@')
        .map(|(_, host)| host)
        .unwrap_or(authority);
    host_port
        .split(':')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// A live topic subscription: a typed event stream plus the capability to
/// release it. Dropping the handle detaches the consumer locally; calling
/// [`TopicSubscription::unsubscribe`] also releases the broker-side
/// subscription. Both are safe after the connection has dropped.
pub struct TopicSubscription<T> {
    key: TopicKey,
    generation: u64,
    connection: ConnectionManager,
    receiver: mpsc::UnboundedReceiver<T>,
}

pub type OrderDetailSubscription = TopicSubscription<TelemetrySample>;
pub type AlarmSubscription = TopicSubscription<AlarmEvent>;

impl<T> TopicSubscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<T, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Removes the registry entry (only if it still belongs to this handle)
    /// and releases the transport-level subscription. Calling it twice, or
    /// after the subscription was replaced or the connection dropped, is a
    /// no-op.
    pub async fn unsubscribe(&mut self) {
        let connection = self.connection.clone();
        connection
            .release_subscription(&self.key, self.generation)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_host_from_websocket_urls() {
        assert_eq!(host_from_url("ws://localhost:8080/ws"), "localhost");
        assert_eq!(host_from_url("wss://broker.plant.example/ws"), "broker.plant.example");
        assert_eq!(host_from_url("ws://user:pass@broker:9000/ws"), "broker");
        assert_eq!(host_from_url("broker"), "broker");
    }

    #[test]
    fn fresh_manager_is_disconnected_with_no_subscriptions() {
        let manager = ConnectionManager::new(MonitorConfig::default());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_connected());
        assert_eq!(manager.active_subscriptions(), 0);
    }
}
