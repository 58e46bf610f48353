//! Canonical order and balance state, reconciled from REST acknowledgments
//! and stream events.
//!
//! Both sources feed the same transition function, keyed by order id, so a
//! REST ack racing a stream push cannot produce divergent state. Staleness
//! is decided by the event sequence (the venue's update-time millis): an
//! update whose sequence is not newer than the recorded one is discarded,
//! and a terminal status is never overwritten.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{Balance, BalanceUpdate, Order, OrderUpdate};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How long terminal orders are retained before eviction.
    pub terminal_retention: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            terminal_retention: Duration::from_secs(3600),
        }
    }
}

/// Outcome of applying one update to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// First sighting of this order.
    Inserted,
    /// Newer sequence, state advanced.
    Updated,
    /// Sequence not newer than the recorded one; discarded.
    Stale,
    /// Order already terminal; discarded regardless of sequence.
    TerminalPreserved,
}

/// Shared order/balance store with single-writer semantics.
///
/// Updates are serialized through the internal write lock; snapshot reads
/// clone the current state and are safe to hold while updates continue.
pub struct OrderTracker {
    orders: RwLock<HashMap<String, Order>>,
    balances: RwLock<HashMap<String, Balance>>,
    config: TrackerConfig,
}

impl OrderTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            balances: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Orders are keyed by client order id so that a retried placement after
    /// an ambiguous network failure maps onto the same entry. Venue-only
    /// events (no client id) fall back to the venue order id.
    fn key(update: &OrderUpdate) -> String {
        if update.client_order_id.is_empty() {
            update.order_id.clone()
        } else {
            update.client_order_id.clone()
        }
    }

    /// Apply one update through the transition function.
    pub async fn apply(&self, update: OrderUpdate) -> Applied {
        let mut orders = self.orders.write().await;
        let now = Utc::now();
        Self::evict_expired(&mut orders, self.config.terminal_retention);

        match orders.entry(Self::key(&update)) {
            Entry::Occupied(mut entry) => {
                let order = entry.get_mut();
                if order.status.is_terminal() {
                    debug!(
                        "discarding update for terminal order {} ({} seq {})",
                        order.client_order_id,
                        update.status.as_str(),
                        update.sequence
                    );
                    return Applied::TerminalPreserved;
                }
                if update.sequence <= order.sequence {
                    debug!(
                        "discarding stale update for {} (seq {} <= {})",
                        order.client_order_id, update.sequence, order.sequence
                    );
                    return Applied::Stale;
                }
                if !update.order_id.is_empty() {
                    order.order_id = update.order_id;
                }
                order.status = update.status;
                order.executed_quantity = update.executed_quantity;
                if update.price.is_some() {
                    order.price = update.price;
                }
                order.sequence = update.sequence;
                order.updated_at = now;
                Applied::Updated
            }
            Entry::Vacant(entry) => {
                entry.insert(Order {
                    order_id: update.order_id,
                    client_order_id: update.client_order_id,
                    symbol: update.symbol,
                    side: update.side,
                    order_type: update.order_type,
                    price: update.price,
                    quantity: update.quantity,
                    executed_quantity: update.executed_quantity,
                    status: update.status,
                    sequence: update.sequence,
                    created_at: now,
                    updated_at: now,
                });
                Applied::Inserted
            }
        }
    }

    /// Owned snapshot of every tracked order.
    pub async fn current_orders(&self) -> Vec<Order> {
        self.orders.read().await.values().cloned().collect()
    }

    /// Owned snapshot of orders that have not reached a terminal status.
    pub async fn open_orders(&self) -> Vec<Order> {
        self.orders
            .read()
            .await
            .values()
            .filter(|order| !order.status.is_terminal())
            .cloned()
            .collect()
    }

    pub async fn get(&self, client_order_id: &str) -> Option<Order> {
        self.orders.read().await.get(client_order_id).cloned()
    }

    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Replace all balances with a REST account snapshot.
    pub async fn replace_balances(&self, snapshot: Vec<Balance>) {
        let mut balances = self.balances.write().await;
        balances.clear();
        for balance in snapshot {
            balances.insert(balance.asset.clone(), balance);
        }
    }

    /// Patch a single asset from a stream account event.
    pub async fn apply_balance(&self, update: BalanceUpdate) {
        let mut balances = self.balances.write().await;
        balances.insert(
            update.asset.clone(),
            Balance {
                asset: update.asset,
                free: update.free,
                locked: update.locked,
            },
        );
    }

    /// Owned snapshot of all known balances.
    pub async fn balances(&self) -> Vec<Balance> {
        self.balances.read().await.values().cloned().collect()
    }

    fn evict_expired(orders: &mut HashMap<String, Order>, retention: Duration) {
        let now = Utc::now();
        orders.retain(|_, order| {
            if !order.status.is_terminal() {
                return true;
            }
            let age = (now - order.updated_at).to_std().unwrap_or_default();
            age <= retention
        });
    }
}

impl Default for OrderTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderSide, OrderStatus, OrderType};
    use rust_decimal_macros::dec;

    fn update(client_id: &str, status: OrderStatus, executed: rust_decimal::Decimal, seq: i64) -> OrderUpdate {
        OrderUpdate {
            order_id: format!("X-{client_id}"),
            client_order_id: client_id.to_string(),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            price: Some(dec!(65000)),
            quantity: dec!(1.5),
            executed_quantity: executed,
            status,
            sequence: seq,
        }
    }

    #[tokio::test]
    async fn reordered_updates_converge_on_newest() {
        let s1 = update("c1", OrderStatus::PartiallyFilled, dec!(0.5), 10);
        let s2 = update("c1", OrderStatus::Filled, dec!(1.5), 20);

        let forward = OrderTracker::default();
        forward.apply(s1.clone()).await;
        forward.apply(s2.clone()).await;

        let reversed = OrderTracker::default();
        reversed.apply(s2).await;
        assert_eq!(reversed.apply(s1).await, Applied::TerminalPreserved);

        let a = forward.get("c1").await.unwrap();
        let b = reversed.get("c1").await.unwrap();
        assert_eq!(a.status, OrderStatus::Filled);
        assert_eq!(b.status, OrderStatus::Filled);
        assert_eq!(a.executed_quantity, b.executed_quantity);
        assert_eq!(a.sequence, b.sequence);
    }

    #[tokio::test]
    async fn stale_sequence_is_discarded() {
        let tracker = OrderTracker::default();
        tracker
            .apply(update("c1", OrderStatus::PartiallyFilled, dec!(1.0), 20))
            .await;

        let outcome = tracker
            .apply(update("c1", OrderStatus::New, dec!(0), 15))
            .await;
        assert_eq!(outcome, Applied::Stale);

        let order = tracker.get("c1").await.unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.executed_quantity, dec!(1.0));
    }

    #[tokio::test]
    async fn terminal_status_is_never_overwritten() {
        let tracker = OrderTracker::default();
        tracker.apply(update("c1", OrderStatus::Canceled, dec!(0), 10)).await;

        // Even a newer sequence cannot resurrect a terminal order.
        let outcome = tracker
            .apply(update("c1", OrderStatus::PartiallyFilled, dec!(0.1), 99))
            .await;
        assert_eq!(outcome, Applied::TerminalPreserved);
        assert_eq!(
            tracker.get("c1").await.unwrap().status,
            OrderStatus::Canceled
        );
    }

    #[tokio::test]
    async fn duplicate_placement_yields_one_entry() {
        let tracker = OrderTracker::default();
        // Two acks for the same client order id, as after a lost-response retry.
        let first = tracker.apply(update("dup-1", OrderStatus::New, dec!(0), 30)).await;
        let second = tracker.apply(update("dup-1", OrderStatus::New, dec!(0), 30)).await;

        assert_eq!(first, Applied::Inserted);
        assert_eq!(second, Applied::Stale);
        assert_eq!(tracker.order_count().await, 1);
    }

    #[tokio::test]
    async fn snapshot_is_isolated_from_later_writes() {
        let tracker = OrderTracker::default();
        tracker.apply(update("c1", OrderStatus::New, dec!(0), 1)).await;

        let snapshot = tracker.current_orders().await;
        tracker
            .apply(update("c1", OrderStatus::Filled, dec!(1.5), 2))
            .await;

        assert_eq!(snapshot[0].status, OrderStatus::New);
        assert_eq!(
            tracker.get("c1").await.unwrap().status,
            OrderStatus::Filled
        );
    }

    #[tokio::test]
    async fn terminal_orders_are_evicted_after_retention() {
        let tracker = OrderTracker::new(TrackerConfig {
            terminal_retention: Duration::ZERO,
        });
        tracker.apply(update("old", OrderStatus::Filled, dec!(1.5), 1)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Any later write prunes expired terminal orders.
        tracker.apply(update("new", OrderStatus::New, dec!(0), 2)).await;

        assert!(tracker.get("old").await.is_none());
        assert!(tracker.get("new").await.is_some());
    }

    #[tokio::test]
    async fn open_orders_excludes_terminal() {
        let tracker = OrderTracker::default();
        tracker.apply(update("a", OrderStatus::New, dec!(0), 1)).await;
        tracker.apply(update("b", OrderStatus::Filled, dec!(1.5), 2)).await;

        let open = tracker.open_orders().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].client_order_id, "a");
    }

    #[tokio::test]
    async fn balances_replace_and_patch() {
        let tracker = OrderTracker::default();
        tracker
            .replace_balances(vec![
                Balance {
                    asset: "USDT".into(),
                    free: dec!(1000),
                    locked: dec!(0),
                },
                Balance {
                    asset: "BTC".into(),
                    free: dec!(0.5),
                    locked: dec!(0.1),
                },
            ])
            .await;

        tracker
            .apply_balance(BalanceUpdate {
                asset: "USDT".into(),
                free: dec!(900),
                locked: dec!(100),
            })
            .await;

        let mut balances = tracker.balances().await;
        balances.sort_by(|a, b| a.asset.cmp(&b.asset));
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[1].asset, "USDT");
        assert_eq!(balances[1].free, dec!(900));
        assert_eq!(balances[1].locked, dec!(100));
    }
}
