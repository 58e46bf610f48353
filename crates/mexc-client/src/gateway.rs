//! Composition root: REST client + stream client + order tracker.
//!
//! The gateway seeds the tracker from REST (balances, open orders), then
//! keeps it current by routing stream events through the same transition
//! function the REST acknowledgments use. It also owns the user-data
//! listen-key lifecycle: created on demand by the stream client, refreshed
//! periodically, closed on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mexc_core::{Balance, MexcResult, Order, OrderTracker, OrderUpdate, Subscription};

use crate::config::GatewayConfig;
use crate::rest::MexcRestClient;
use crate::stream::{
    MexcStreamClient, StreamAuth, StreamConfig, StreamEvent, StreamHandle, StreamState,
};
use crate::types::NewOrder;
use crate::ws_types::{ACCOUNT_CHANNEL, DEALS_CHANNEL, ORDERS_CHANNEL};

/// The venue expires idle listen keys after an hour; refresh at half that.
const LISTEN_KEY_KEEPALIVE: Duration = Duration::from_secs(30 * 60);

pub struct MexcGateway {
    rest: Arc<MexcRestClient>,
    tracker: Arc<OrderTracker>,
    state_rx: watch::Receiver<StreamState>,
    shutdown_tx: watch::Sender<bool>,
    router: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

impl MexcGateway {
    /// Connect to the venue and start the background tasks.
    ///
    /// `symbols` selects which markets get public trade subscriptions and
    /// which open orders are seeded into the tracker; user-data channels
    /// are always subscribed. A failure here (after internal retries) means
    /// the venue is unreachable.
    pub async fn connect(config: GatewayConfig, symbols: &[String]) -> MexcResult<Self> {
        let rest = Arc::new(MexcRestClient::new(&config)?);
        rest.sync_clock().await?;

        let tracker = Arc::new(OrderTracker::default());
        tracker.replace_balances(rest.get_balances().await?).await;
        for symbol in symbols {
            for update in rest.get_open_orders(symbol).await? {
                tracker.apply(update).await;
            }
        }

        let mut subscriptions = vec![
            Subscription::channel(ORDERS_CHANNEL),
            Subscription::channel(ACCOUNT_CHANNEL),
        ];
        for symbol in symbols {
            subscriptions.push(Subscription::with_symbol(DEALS_CHANNEL, symbol.clone()));
        }

        let auth: Arc<dyn StreamAuth> = rest.clone();
        let stream = MexcStreamClient::spawn(
            StreamConfig::new(config.ws_url.clone()),
            subscriptions,
            Some(auth),
        );
        let state_rx = stream.state_receiver();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let router = tokio::spawn(Self::route_events(
            stream,
            Arc::clone(&tracker),
            shutdown_rx,
        ));
        let keepalive = tokio::spawn(Self::keepalive_loop(Arc::clone(&rest)));

        info!("gateway connected ({} symbols tracked)", symbols.len());
        Ok(Self {
            rest,
            tracker,
            state_rx,
            shutdown_tx,
            router,
            keepalive,
        })
    }

    /// Pump stream events into the tracker until shutdown.
    async fn route_events(
        mut stream: StreamHandle,
        tracker: Arc<OrderTracker>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = stream.recv() => match event {
                    Some(StreamEvent::Order(update)) => {
                        let outcome = tracker.apply(update).await;
                        debug!("order event applied: {outcome:?}");
                    }
                    Some(StreamEvent::Balance(update)) => {
                        tracker.apply_balance(update).await;
                    }
                    Some(StreamEvent::Deal(deal)) => {
                        debug!("{} trade {} @ {}", deal.symbol, deal.quantity, deal.price);
                    }
                    None => {
                        warn!("stream event channel closed");
                        break;
                    }
                },
                _ = shutdown_rx.changed() => {
                    stream.shutdown().await;
                    break;
                }
            }
        }
    }

    async fn keepalive_loop(rest: Arc<MexcRestClient>) {
        let mut ticker = tokio::time::interval(LISTEN_KEY_KEEPALIVE);
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            if let Err(e) = rest.keepalive_listen_key().await {
                warn!("listen key keepalive failed: {e}");
            }
        }
    }

    /// Place an order and feed the acknowledgment through the tracker.
    pub async fn place_order(&self, order: &NewOrder) -> MexcResult<OrderUpdate> {
        let update = self.rest.place_order(order).await?;
        self.tracker.apply(update.clone()).await;
        Ok(update)
    }

    /// Cancel an order and feed the acknowledgment through the tracker.
    pub async fn cancel_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> MexcResult<OrderUpdate> {
        let update = self.rest.cancel_order(symbol, client_order_id).await?;
        self.tracker.apply(update.clone()).await;
        Ok(update)
    }

    pub async fn current_orders(&self) -> Vec<Order> {
        self.tracker.current_orders().await
    }

    pub async fn open_orders(&self) -> Vec<Order> {
        self.tracker.open_orders().await
    }

    pub async fn balances(&self) -> Vec<Balance> {
        self.tracker.balances().await
    }

    pub fn stream_state(&self) -> StreamState {
        *self.state_rx.borrow()
    }

    pub fn rest(&self) -> Arc<MexcRestClient> {
        Arc::clone(&self.rest)
    }

    /// Orderly shutdown: taking `self` by value stops new REST calls at the
    /// type level, in-flight calls already hold their own `Arc` and run to
    /// completion, and the stream closes without reconnecting.
    pub async fn shutdown(self) -> MexcResult<()> {
        info!("gateway shutting down");
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.router.await {
            warn!("event router join failed: {e}");
        }
        self.keepalive.abort();
        if let Err(e) = self.rest.close_listen_key().await {
            warn!("failed to close listen key: {e}");
        }
        Ok(())
    }
}
