//! Persistent market/user-data stream client.
//!
//! The connection lifecycle is a small state machine — `Disconnected`,
//! `Connecting`, `Subscribed`, `Degraded` — whose transitions are a pure
//! function of `(state, signal)` so they can be tested without a network.
//! A driver task owns the socket: it connects, replays every tracked
//! subscription in its original order, waits for the venue's acks, then
//! pumps inbound messages one at a time. Transport errors and missed
//! heartbeats degrade the connection and trigger a capped-backoff
//! reconnect, indefinitely; only a caller shutdown is terminal.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use mexc_core::{BalanceUpdate, MexcError, MexcResult, OrderUpdate, Subscription};

use crate::ws_types::{
    Deal, WsAccountData, WsDealsData, WsEnvelope, WsOrderData, WsRequest, ACCOUNT_CHANNEL,
    DEALS_CHANNEL, ORDERS_CHANNEL,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Supplies the user-data listen key for private channels. Implemented by
/// the REST client; mockable in tests.
#[async_trait]
pub trait StreamAuth: Send + Sync {
    async fn listen_key(&self) -> MexcResult<String>;

    /// Drop any cached key so the next connect starts fresh.
    async fn invalidate_listen_key(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Subscribed,
    Degraded,
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSignal {
    Start,
    ConnectFailed,
    SubscriptionsAcked,
    TransportError,
    HeartbeatMissed,
    BackoffElapsed,
    ShutdownRequested,
}

/// Pure transition function; unknown combinations keep the current state.
pub fn next_state(state: StreamState, signal: StreamSignal) -> StreamState {
    use StreamSignal::*;
    use StreamState::*;
    match (state, signal) {
        (_, ShutdownRequested) => Disconnected,
        (Disconnected, Start) => Connecting,
        (Connecting, SubscriptionsAcked) => Subscribed,
        (Connecting, ConnectFailed) | (Connecting, TransportError) => Degraded,
        (Subscribed, TransportError) | (Subscribed, HeartbeatMissed) => Degraded,
        (Degraded, BackoffElapsed) => Connecting,
        (state, _) => state,
    }
}

/// Events delivered to the consumer, in per-connection receipt order.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Order(OrderUpdate),
    Balance(BalanceUpdate),
    Deal(Deal),
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub ws_url: String,
    /// Client PING cadence; the venue drops quiet connections.
    pub ping_interval: Duration,
    /// Reconnect when nothing at all arrives for this long.
    pub heartbeat_timeout: Duration,
    /// How long to wait for subscription acks after connecting.
    pub ack_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl StreamConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ping_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(60),
            ack_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Consumer-side handle: event receiver, state observer, shutdown trigger.
pub struct StreamHandle {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    state_rx: watch::Receiver<StreamState>,
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl StreamHandle {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    pub fn state(&self) -> StreamState {
        *self.state_rx.borrow()
    }

    /// A watch receiver for observing state changes after the handle has
    /// been moved into a consumer task.
    pub fn state_receiver(&self) -> watch::Receiver<StreamState> {
        self.state_rx.clone()
    }

    /// Close the connection without reconnecting and wait for the driver
    /// task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

pub struct MexcStreamClient {
    config: StreamConfig,
    subscriptions: Vec<Subscription>,
    auth: Option<Arc<dyn StreamAuth>>,
    events_tx: mpsc::UnboundedSender<StreamEvent>,
    state_tx: watch::Sender<StreamState>,
    shutdown_rx: watch::Receiver<bool>,
}

enum Exit {
    Shutdown,
    Transport(String),
    Heartbeat,
}

impl MexcStreamClient {
    /// Spawn the driver task. Subscriptions are replayed verbatim, in the
    /// given order, on every (re)connect.
    pub fn spawn(
        config: StreamConfig,
        subscriptions: Vec<Subscription>,
        auth: Option<Arc<dyn StreamAuth>>,
    ) -> StreamHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(StreamState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let client = Self {
            config,
            subscriptions,
            auth,
            events_tx,
            state_tx,
            shutdown_rx,
        };
        let task = tokio::spawn(client.run());

        StreamHandle {
            events: events_rx,
            state_rx,
            shutdown_tx,
            task,
        }
    }

    async fn run(mut self) {
        let mut backoff = self.config.initial_backoff;
        self.transition(StreamSignal::Start);

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            match self.connect_and_subscribe().await {
                Ok(mut ws) => {
                    backoff = self.config.initial_backoff;
                    self.transition(StreamSignal::SubscriptionsAcked);
                    match self.event_loop(&mut ws).await {
                        Exit::Shutdown => {
                            let _ = ws.close(None).await;
                            break;
                        }
                        Exit::Transport(reason) => {
                            warn!("stream degraded: {reason}");
                            self.transition(StreamSignal::TransportError);
                        }
                        Exit::Heartbeat => {
                            warn!(
                                "stream degraded: no inbound traffic for {:?}",
                                self.config.heartbeat_timeout
                            );
                            self.transition(StreamSignal::HeartbeatMissed);
                        }
                    }
                }
                Err(e) => {
                    warn!("stream connect failed: {e}");
                    if let Some(auth) = &self.auth {
                        auth.invalidate_listen_key().await;
                    }
                    self.transition(StreamSignal::ConnectFailed);
                }
            }

            if *self.shutdown_rx.borrow() {
                break;
            }
            info!("reconnecting in {:?}", backoff);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {
                    self.transition(StreamSignal::BackoffElapsed);
                }
                _ = self.shutdown_rx.changed() => {
                    break;
                }
            }
            backoff = (backoff * 2).min(self.config.max_backoff);
        }

        self.transition(StreamSignal::ShutdownRequested);
        info!("stream client stopped");
    }

    async fn connect_and_subscribe(&mut self) -> MexcResult<WsStream> {
        const OP: &str = "stream.connect";

        let url = if self.subscriptions.iter().any(Subscription::is_private) {
            let auth = self.auth.as_ref().ok_or_else(|| {
                MexcError::config("private stream channels require credentials")
            })?;
            let key = auth.listen_key().await?;
            format!("{}?listenKey={key}", self.config.ws_url)
        } else {
            self.config.ws_url.clone()
        };

        info!("connecting to {}", self.config.ws_url);
        let (mut ws, response) = connect_async(url.as_str())
            .await
            .map_err(|e| MexcError::recoverable(OP, format!("websocket handshake failed: {e}")))?;
        debug!("websocket connected (status {:?})", response.status());

        let topics: Vec<String> = self.subscriptions.iter().map(Subscription::topic).collect();
        if !topics.is_empty() {
            let frame = WsRequest::subscribe(topics.clone()).to_message();
            ws.send(Message::Text(frame))
                .await
                .map_err(|e| MexcError::recoverable(OP, format!("failed to subscribe: {e}")))?;
            self.await_acks(&mut ws, topics).await?;
        }
        Ok(ws)
    }

    /// Wait until the venue has acknowledged every replayed subscription.
    /// Data pushed before the last ack is dispatched, not dropped.
    async fn await_acks(&self, ws: &mut WsStream, topics: Vec<String>) -> MexcResult<()> {
        const OP: &str = "stream.subscribe";
        let mut pending: HashSet<String> = topics.into_iter().collect();
        let deadline = tokio::time::Instant::now() + self.config.ack_timeout;

        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(MexcError::recoverable(
                    OP,
                    format!("timed out waiting for subscription acks: {pending:?}"),
                ));
            }
            let message = tokio::time::timeout(remaining, ws.next())
                .await
                .map_err(|_| {
                    MexcError::recoverable(
                        OP,
                        format!("timed out waiting for subscription acks: {pending:?}"),
                    )
                })?
                .ok_or_else(|| {
                    MexcError::recoverable(OP, "connection closed during subscribe".to_string())
                })?
                .map_err(|e| MexcError::recoverable(OP, format!("websocket errored: {e}")))?;

            match message {
                Message::Text(text) => match serde_json::from_str::<WsEnvelope>(&text) {
                    Ok(envelope) => {
                        if let Some(topic) = envelope.ack_topic() {
                            debug!("subscription acked: {topic}");
                            pending.remove(topic);
                        } else {
                            self.dispatch(&envelope);
                        }
                    }
                    Err(e) => debug!("skipping malformed message during subscribe: {e}"),
                },
                Message::Ping(payload) => {
                    let _ = ws.send(Message::Pong(payload)).await;
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn event_loop(&mut self, ws: &mut WsStream) -> Exit {
        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_inbound = tokio::time::Instant::now();

        loop {
            let heartbeat_deadline = last_inbound + self.config.heartbeat_timeout;
            tokio::select! {
                message = ws.next() => {
                    match message {
                        Some(Ok(msg)) => {
                            last_inbound = tokio::time::Instant::now();
                            if let Err(exit) = self.handle_message(ws, msg).await {
                                return exit;
                            }
                        }
                        Some(Err(e)) => return Exit::Transport(format!("websocket errored: {e}")),
                        None => return Exit::Transport("websocket closed by remote".to_string()),
                    }
                }
                _ = ping.tick() => {
                    if let Err(e) = ws.send(Message::Text(WsRequest::ping().to_message())).await {
                        return Exit::Transport(format!("failed to send ping: {e}"));
                    }
                }
                _ = tokio::time::sleep_until(heartbeat_deadline) => {
                    return Exit::Heartbeat;
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        return Exit::Shutdown;
                    }
                }
            }
        }
    }

    async fn handle_message(&self, ws: &mut WsStream, msg: Message) -> Result<(), Exit> {
        match msg {
            Message::Text(text) => {
                match serde_json::from_str::<WsEnvelope>(&text) {
                    Ok(envelope) => self.dispatch(&envelope),
                    Err(e) => debug!("skipping malformed message: {e}"),
                }
                Ok(())
            }
            Message::Binary(bytes) => {
                // Some channels push compact binary payloads; they are not
                // part of the tracked subscriptions, so just note them.
                debug!("ignoring binary message ({} bytes)", bytes.len());
                Ok(())
            }
            Message::Ping(payload) => ws
                .send(Message::Pong(payload))
                .await
                .map_err(|e| Exit::Transport(format!("failed to send pong: {e}"))),
            Message::Pong(_) => {
                debug!("received pong");
                Ok(())
            }
            Message::Close(frame) => Err(Exit::Transport(format!(
                "close frame from venue: {frame:?}"
            ))),
            Message::Frame(_) => Ok(()),
        }
    }

    fn dispatch(&self, envelope: &WsEnvelope) {
        if envelope.is_pong() {
            debug!("received pong");
            return;
        }
        let Some(channel) = envelope.channel.as_deref() else {
            debug!("ignoring control message: {:?}", envelope.msg);
            return;
        };
        match self.convert_push(channel, envelope) {
            Ok(events) => {
                for event in events {
                    let _ = self.events_tx.send(event);
                }
            }
            Err(e) => debug!("skipping malformed {channel} message: {e}"),
        }
    }

    fn convert_push(&self, channel: &str, envelope: &WsEnvelope) -> MexcResult<Vec<StreamEvent>> {
        const OP: &str = "stream.dispatch";
        let Some(data) = &envelope.data else {
            return Ok(Vec::new());
        };
        let symbol = envelope.symbol.as_deref().unwrap_or_default();
        let event_time = envelope
            .event_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        if channel.starts_with(ORDERS_CHANNEL) {
            let order: WsOrderData = serde_json::from_value(data.clone())
                .map_err(|e| MexcError::terminal(OP, None, e.to_string()))?;
            return Ok(vec![StreamEvent::Order(
                order.into_update(symbol, event_time)?,
            )]);
        }
        if channel.starts_with(ACCOUNT_CHANNEL) {
            let account: WsAccountData = serde_json::from_value(data.clone())
                .map_err(|e| MexcError::terminal(OP, None, e.to_string()))?;
            return Ok(vec![StreamEvent::Balance(account.into_update()?)]);
        }
        if channel.starts_with(DEALS_CHANNEL) {
            let deals: WsDealsData = serde_json::from_value(data.clone())
                .map_err(|e| MexcError::terminal(OP, None, e.to_string()))?;
            return deals
                .deals
                .into_iter()
                .map(|deal| deal.into_deal(symbol).map(StreamEvent::Deal))
                .collect();
        }

        debug!("no handler for channel {channel}");
        Ok(Vec::new())
    }

    fn transition(&self, signal: StreamSignal) {
        let current = *self.state_tx.borrow();
        let next = next_state(current, signal);
        if next != current {
            info!("stream state {current:?} -> {next:?} ({signal:?})");
            let _ = self.state_tx.send(next);
        }
    }
}
