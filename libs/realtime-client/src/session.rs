//! Transport session: owns the single physical connection to the broker
//!
//! Handles:
//!
//! - Idempotent `connect()`: concurrent callers share one in-flight attempt
//! - STOMP handshake (CONNECT / CONNECTED / ERROR)
//! - Heart-beats negotiated from CONNECT / CONNECTED, with a liveness
//!   deadline on inbound traffic
//! - Fixed-interval reconnection after an unexpected close
//! - Lifecycle notifications to registered [`SessionObserver`]s

use crate::config::RealtimeConfig;
use crate::error::{ConnectionError, RealtimeError};
use crate::frame::{decode_frames, Command, Frame, HEARTBEAT};
use crate::transport::{Link, Transport, TransportEvent};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Lost the connection (or failed to get one) and waiting to retry
    Reconnecting,
}

/// Observable connection state
///
/// `generation` increments on every successful handshake, so a change in
/// generation is the "reconnected" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub generation: u64,
}

/// Lifecycle callbacks, invoked without any session lock held
pub trait SessionObserver: Send + Sync {
    fn on_connected(&self, _generation: u64) {}

    /// `unexpected` is false for an explicit `disconnect()`
    fn on_disconnected(&self, _unexpected: bool) {}

    fn on_message(&self, _frame: &Frame) {}
}

/// Heart-beat periods agreed with the broker; zero means none
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeats {
    pub outgoing: Duration,
    pub incoming: Duration,
}

impl Heartbeats {
    /// Combine our `heart-beat` offer with the broker's reply
    ///
    /// A missing or malformed reply means the broker does no heart-beating.
    pub fn negotiate(config: &RealtimeConfig, server: Option<&str>) -> Self {
        let (sx, sy) = server
            .and_then(|value| value.split_once(','))
            .and_then(|(x, y)| Some((millis(x)?, millis(y)?)))
            .unwrap_or_default();

        Self {
            outgoing: agreed(config.heartbeat_outgoing, sy),
            incoming: agreed(config.heartbeat_incoming, sx),
        }
    }

    /// How long inbound silence is tolerated before the link is declared dead
    pub fn silence_limit(&self) -> Duration {
        self.incoming * 2
    }
}

fn millis(raw: &str) -> Option<Duration> {
    raw.trim().parse().ok().map(Duration::from_millis)
}

fn agreed(ours: Duration, theirs: Duration) -> Duration {
    if ours.is_zero() || theirs.is_zero() {
        Duration::ZERO
    } else {
        ours.max(theirs)
    }
}

type PendingConnect = Shared<BoxFuture<'static, Result<(), ConnectionError>>>;

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<SessionState>,
    observers: Mutex<Vec<Weak<dyn SessionObserver>>>,
    status_tx: watch::Sender<ConnectionState>,
}

#[derive(Default)]
struct SessionState {
    outbound: Option<mpsc::UnboundedSender<String>>,
    pending: Option<PendingConnect>,
    driver: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    /// Bumped by `disconnect()`; work started under an older epoch gives up
    epoch: u64,
    generation: u64,
}

impl Session {
    pub fn new(config: RealtimeConfig, transport: Arc<dyn Transport>) -> Self {
        let (status_tx, _) = watch::channel(ConnectionState {
            status: ConnectionStatus::Disconnected,
            generation: 0,
        });

        Self {
            inner: Arc::new(SessionInner {
                config,
                transport,
                state: Mutex::new(SessionState::default()),
                observers: Mutex::new(Vec::new()),
                status_tx,
            }),
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Register a lifecycle observer; dropped observers are pruned lazily
    pub fn add_observer(&self, observer: Weak<dyn SessionObserver>) {
        self.inner.observers.lock().push(observer);
    }

    /// Connect to the broker
    ///
    /// Resolves immediately when already connected. While an attempt is in
    /// flight every caller awaits that same attempt.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let pending = {
            let mut state = self.inner.state.lock();
            if state.outbound.is_some() {
                return Ok(());
            }
            match &state.pending {
                Some(pending) => {
                    debug!("Connect already in flight, joining it");
                    pending.clone()
                }
                None => {
                    let epoch = state.epoch;
                    let generation = state.generation;
                    if self.inner.status_tx.borrow().status != ConnectionStatus::Reconnecting {
                        self.inner.set_status(ConnectionStatus::Connecting, generation);
                    }

                    let handle = tokio::spawn(attempt(self.inner.clone(), epoch));
                    let pending = async move {
                        handle.await.unwrap_or_else(|e| {
                            Err(ConnectionError::Transport(format!("connect task failed: {e}")))
                        })
                    }
                    .boxed()
                    .shared();
                    state.pending = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Close the connection and stop reconnecting
    ///
    /// Idempotent. Callers that own topic registrations must drop them first
    /// (see `RealtimeClient::disconnect`).
    pub fn disconnect(&self) {
        let (outbound, driver, reconnect, had_pending, generation) = {
            let mut state = self.inner.state.lock();
            state.epoch += 1;
            let had_pending = state.pending.take().is_some();
            (
                state.outbound.take(),
                state.driver.take(),
                state.reconnect.take(),
                had_pending,
                state.generation,
            )
        };

        if outbound.is_none() && driver.is_none() && reconnect.is_none() && !had_pending {
            debug!("Disconnect requested while already disconnected");
            return;
        }

        if let Some(handle) = reconnect {
            handle.abort();
        }
        if let Some(handle) = driver {
            handle.abort();
        }
        let was_connected = outbound.is_some();
        if let Some(tx) = outbound {
            let _ = tx.send(Frame::disconnect().encode());
        }

        self.inner.set_status(ConnectionStatus::Disconnected, generation);
        info!(generation, "Disconnected from realtime broker");
        if was_connected {
            self.inner.notify(|o| o.on_disconnected(false));
        }
    }

    /// Whether a physical connection is currently live
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().outbound.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.status_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status_tx.subscribe()
    }

    pub fn send_frame(&self, frame: &Frame) -> Result<(), RealtimeError> {
        self.transmit(frame).map(|_| ())
    }

    /// Send a frame, returning the generation of the connection it went out on
    pub(crate) fn transmit(&self, frame: &Frame) -> Result<u64, RealtimeError> {
        let state = self.inner.state.lock();
        let outbound = state.outbound.as_ref().ok_or(RealtimeError::NotConnected)?;
        outbound
            .send(frame.encode())
            .map_err(|_| RealtimeError::NotConnected)?;
        Ok(state.generation)
    }
}

impl SessionInner {
    fn set_status(&self, status: ConnectionStatus, generation: u64) {
        self.status_tx
            .send_replace(ConnectionState { status, generation });
    }

    fn notify(&self, f: impl Fn(&dyn SessionObserver)) {
        let observers: Vec<Arc<dyn SessionObserver>> = {
            let mut observers = self.observers.lock();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            f(observer.as_ref());
        }
    }

    /// Returns the reason when the frames end the connection
    fn handle_text(&self, text: &str) -> Option<String> {
        for decoded in decode_frames(text) {
            let frame = match decoded {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Dropping undecodable inbound frame");
                    continue;
                }
            };
            match frame.command {
                Command::Message => self.notify(|o| o.on_message(&frame)),
                Command::Error => {
                    let message = frame.header("message").unwrap_or(&frame.body).to_string();
                    error!(message = %message, "Broker sent ERROR frame");
                    return Some(format!("broker error: {message}"));
                }
                Command::Receipt => {
                    debug!(receipt_id = frame.header("receipt-id"), "Receipt received")
                }
                other => debug!(command = %other, "Ignoring unexpected frame"),
            }
        }
        None
    }
}

async fn attempt(inner: Arc<SessionInner>, epoch: u64) -> Result<(), ConnectionError> {
    info!(url = %inner.config.broker_url, "Connecting to realtime broker");
    let result = handshake(&inner).await;

    let mut state = inner.state.lock();
    if state.epoch != epoch {
        // disconnect() raced ahead; dropping the link closes it.
        debug!("Connect attempt finished after disconnect, discarding");
        return Err(ConnectionError::Aborted);
    }
    state.pending = None;

    match result {
        Ok((link, beats)) => {
            state.generation += 1;
            let generation = state.generation;
            if let Some(handle) = state.reconnect.take() {
                handle.abort();
            }
            state.outbound = Some(link.outbound.clone());
            state.driver = Some(tokio::spawn(drive(inner.clone(), link, beats, epoch, generation)));
            drop(state);

            inner.set_status(ConnectionStatus::Connected, generation);
            info!(generation, "Connected to realtime broker");
            inner.notify(|o| o.on_connected(generation));
            Ok(())
        }
        Err(e) => {
            drop(state);
            warn!(error = %e, "Realtime connection attempt failed");
            schedule_reconnect(&inner, epoch);
            Err(e)
        }
    }
}

async fn handshake(inner: &SessionInner) -> Result<(Link, Heartbeats), ConnectionError> {
    let mut link = inner.transport.open(&inner.config.broker_url).await?;

    let connect = Frame::connect(
        host_of(&inner.config.broker_url),
        &inner.config.heartbeat_header(),
        inner.config.auth_token.as_deref(),
    );
    link.outbound
        .send(connect.encode())
        .map_err(|_| ConnectionError::Closed("link closed before CONNECT".into()))?;

    loop {
        match link.inbound.recv().await {
            Some(TransportEvent::Text(text)) => {
                for decoded in decode_frames(&text) {
                    match decoded {
                        Ok(frame) if frame.command == Command::Connected => {
                            let beats =
                                Heartbeats::negotiate(&inner.config, frame.header("heart-beat"));
                            debug!(
                                version = frame.header("version"),
                                outgoing_ms = beats.outgoing.as_millis() as u64,
                                incoming_ms = beats.incoming.as_millis() as u64,
                                "Handshake acknowledged"
                            );
                            return Ok((link, beats));
                        }
                        Ok(frame) if frame.command == Command::Error => {
                            let message = frame.header("message").unwrap_or(&frame.body);
                            return Err(ConnectionError::Protocol(message.to_string()));
                        }
                        Ok(frame) => {
                            debug!(command = %frame.command, "Ignoring frame before CONNECTED")
                        }
                        Err(e) => warn!(error = %e, "Malformed frame during handshake"),
                    }
                }
            }
            Some(TransportEvent::Closed(reason)) => {
                return Err(ConnectionError::Closed(
                    reason.unwrap_or_else(|| "closed by peer".into()),
                ))
            }
            Some(TransportEvent::Error(e)) => return Err(ConnectionError::Transport(e)),
            None => return Err(ConnectionError::Closed("transport ended".into())),
        }
    }
}

/// Pump inbound frames and heart-beats for one connection generation
async fn drive(
    inner: Arc<SessionInner>,
    link: Link,
    beats: Heartbeats,
    epoch: u64,
    generation: u64,
) {
    let Link {
        outbound,
        mut inbound,
    } = link;
    let mut heartbeat = heartbeat_interval(beats.outgoing);
    let silence_limit = beats.silence_limit();
    let mut last_inbound = Instant::now();

    let reason = loop {
        tokio::select! {
            event = inbound.recv() => match event {
                Some(TransportEvent::Text(text)) => {
                    last_inbound = Instant::now();
                    if let Some(reason) = inner.handle_text(&text) {
                        break reason;
                    }
                }
                Some(TransportEvent::Closed(reason)) => {
                    break reason.unwrap_or_else(|| "closed by peer".into())
                }
                Some(TransportEvent::Error(e)) => break e,
                None => break "transport ended".to_string(),
            },
            _ = next_tick(&mut heartbeat) => {
                if outbound.send(HEARTBEAT.to_string()).is_err() {
                    break "outbound channel closed".to_string();
                }
            }
            _ = silence_deadline(last_inbound, silence_limit) => {
                break format!("no data from broker for {}ms", silence_limit.as_millis());
            }
        }
    };

    connection_lost(&inner, epoch, generation, &reason);
}

fn connection_lost(inner: &Arc<SessionInner>, epoch: u64, generation: u64, reason: &str) {
    {
        let mut state = inner.state.lock();
        if state.epoch != epoch || state.generation != generation {
            return;
        }
        state.outbound = None;
        state.driver = None;
    }

    warn!(generation, reason, "Realtime connection lost");
    inner.set_status(ConnectionStatus::Reconnecting, generation);
    inner.notify(|o| o.on_disconnected(true));
    schedule_reconnect(inner, epoch);
}

fn schedule_reconnect(inner: &Arc<SessionInner>, epoch: u64) {
    let mut state = inner.state.lock();
    if state.epoch != epoch || state.reconnect.is_some() || state.outbound.is_some() {
        return;
    }
    let generation = state.generation;
    if !inner.config.auto_reconnect() {
        drop(state);
        inner.set_status(ConnectionStatus::Disconnected, generation);
        return;
    }

    let delay = inner.config.reconnect_delay;
    info!(delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
    inner.set_status(ConnectionStatus::Reconnecting, generation);

    let task_inner = inner.clone();
    state.reconnect = Some(tokio::spawn(async move {
        let session = Session { inner: task_inner };
        loop {
            tokio::time::sleep(delay).await;
            if session.inner.state.lock().epoch != epoch {
                return;
            }
            match session.connect().await {
                Ok(()) => return,
                Err(e) if !e.is_retryable() => return,
                Err(e) => warn!(error = %e, "Reconnect attempt failed, retrying"),
            }
        }
    }));
}

fn heartbeat_interval(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn silence_deadline(last_inbound: Instant, limit: Duration) {
    if limit.is_zero() {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep_until(last_inbound + limit).await;
}

fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    rest.split(['/', ':', '?']).next().unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{BrokerConnection, MemoryBroker, MemoryTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> RealtimeConfig {
        RealtimeConfig {
            broker_url: "ws://broker.test:8080/ws".into(),
            heartbeat_outgoing: Duration::ZERO,
            ..Default::default()
        }
    }

    fn new_session() -> (Session, MemoryBroker) {
        let (transport, broker) = MemoryTransport::new();
        (Session::new(test_config(), Arc::new(transport)), broker)
    }

    async fn connect(session: &Session, broker: &mut MemoryBroker) -> BrokerConnection {
        let (result, conn) = tokio::join!(session.connect(), async {
            let mut conn = broker.accept().await.unwrap();
            conn.accept_handshake().await.unwrap();
            conn
        });
        result.unwrap();
        conn
    }

    #[derive(Default)]
    struct Recorder {
        connected: AtomicUsize,
        lost: AtomicUsize,
        closed: AtomicUsize,
    }

    impl SessionObserver for Recorder {
        fn on_connected(&self, _generation: u64) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }

        fn on_disconnected(&self, unexpected: bool) {
            if unexpected {
                self.lost.fetch_add(1, Ordering::SeqCst);
            } else {
                self.closed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn test_connect_sends_handshake() {
        let (session, mut broker) = new_session();
        let (result, connect) = tokio::join!(session.connect(), async {
            let mut conn = broker.accept().await.unwrap();
            let frame = conn.accept_handshake().await.unwrap();
            (frame, conn)
        });

        result.unwrap();
        let (frame, _conn) = connect;
        assert_eq!(frame.header("accept-version"), Some("1.2,1.1,1.0"));
        assert_eq!(frame.header("host"), Some("broker.test"));
        assert!(session.is_connected());
        assert_eq!(
            session.state(),
            ConnectionState {
                status: ConnectionStatus::Connected,
                generation: 1
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_connect_opens_one_link() {
        let (session, mut broker) = new_session();
        let (a, b, _conn) = tokio::join!(session.connect(), session.connect(), async {
            let mut conn = broker.accept().await.unwrap();
            conn.accept_handshake().await.unwrap();
            conn
        });

        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(broker.opened(), 1);

        // Already connected: resolves without touching the transport.
        session.connect().await.unwrap();
        assert_eq!(broker.opened(), 1);
    }

    #[tokio::test]
    async fn test_error_frame_rejects_connect() {
        let (session, mut broker) = new_session();
        let (result, _)= tokio::join!(session.connect(), async {
            let mut conn = broker.accept().await.unwrap();
            conn.reject_handshake("Invalid credentials").await;
            conn
        });

        assert_eq!(
            result,
            Err(ConnectionError::Protocol("Invalid credentials".into()))
        );
        assert!(!session.is_connected());
        session.disconnect();
    }

    #[tokio::test]
    async fn test_refused_socket_rejects_connect() {
        let (session, broker) = new_session();
        broker.refuse_next(1);

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Transport(_)));
        assert_eq!(session.state().status, ConnectionStatus::Reconnecting);
        session.disconnect();
        assert_eq!(session.state().status, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (session, mut broker) = new_session();
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<Recorder> = Arc::downgrade(&recorder);
        session.add_observer(weak);

        let mut conn = connect(&session, &mut broker).await;
        session.disconnect();
        session.disconnect();

        assert!(!session.is_connected());
        let frame = conn.recv_frame().await.unwrap();
        assert_eq!(frame.command, Command::Disconnect);
        assert!(conn.recv_frame().await.is_none());
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 1);
        assert!(matches!(
            session.send_frame(&Frame::unsubscribe("sub-0")),
            Err(RealtimeError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_unexpected_close() {
        let (session, mut broker) = new_session();
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<Recorder> = Arc::downgrade(&recorder);
        session.add_observer(weak);

        let conn = connect(&session, &mut broker).await;
        let mut state = session.watch_state();
        conn.close();

        let mut next = broker.accept().await.unwrap();
        assert_eq!(session.state().status, ConnectionStatus::Reconnecting);
        next.accept_handshake().await.unwrap();

        state
            .wait_for(|s| s.status == ConnectionStatus::Connected && s.generation == 2)
            .await
            .unwrap();
        assert_eq!(recorder.connected.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.lost.load(Ordering::SeqCst), 1);
        session.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_reconnect_loop() {
        let (session, mut broker) = new_session();
        let conn = connect(&session, &mut broker).await;
        let mut state = session.watch_state();
        conn.close();
        state
            .wait_for(|s| s.status == ConnectionStatus::Reconnecting)
            .await
            .unwrap();

        session.disconnect();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(broker.try_accept().is_none());
        assert_eq!(broker.opened(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_aborts_inflight_attempt() {
        let (session, mut broker) = new_session();
        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.connect().await }
        });

        let mut conn = broker.accept().await.unwrap();
        session.disconnect();
        conn.accept_handshake().await.unwrap();

        assert_eq!(pending.await.unwrap(), Err(ConnectionError::Aborted));
        assert!(!session.is_connected());
    }

    #[test]
    fn test_heartbeat_negotiation() {
        let config = RealtimeConfig {
            heartbeat_outgoing: Duration::from_secs(10),
            heartbeat_incoming: Duration::from_secs(10),
            ..Default::default()
        };

        let beats = Heartbeats::negotiate(&config, Some("4000,20000"));
        assert_eq!(beats.outgoing, Duration::from_secs(20));
        assert_eq!(beats.incoming, Duration::from_secs(10));
        assert_eq!(beats.silence_limit(), Duration::from_secs(20));

        let silent = Heartbeats::negotiate(&config, Some("0,0"));
        assert_eq!(silent.outgoing, Duration::ZERO);
        assert_eq!(silent.incoming, Duration::ZERO);
        assert_eq!(Heartbeats::negotiate(&config, None), silent);
        assert_eq!(Heartbeats::negotiate(&config, Some("soon")), silent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_broker_is_declared_lost() {
        let (session, mut broker) = new_session();
        let (result, conn) = tokio::join!(session.connect(), async {
            let mut conn = broker.accept().await.unwrap();
            conn.accept_handshake_with("10000,0").await.unwrap();
            conn
        });
        result.unwrap();
        let mut state = session.watch_state();

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(session.is_connected());

        // Heart-beats keep the link alive past the first deadline.
        conn.send_text("\n");
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(session.is_connected());

        state
            .wait_for(|s| s.status == ConnectionStatus::Reconnecting)
            .await
            .unwrap();
        assert!(!session.is_connected());
        assert!(broker.accept().await.is_some());
        session.disconnect();
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("ws://localhost:8080/ws"), "localhost");
        assert_eq!(host_of("wss://api.example.org/stomp"), "api.example.org");
        assert_eq!(host_of("broker"), "broker");
    }
}
