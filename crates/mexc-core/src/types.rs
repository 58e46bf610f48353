use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side in the venue's wire format (`BUY`/`SELL`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    LimitMaker,
    ImmediateOrCancel,
    FillOrKill,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::LimitMaker => "LIMIT_MAKER",
            OrderType::ImmediateOrCancel => "IMMEDIATE_OR_CANCEL",
            OrderType::FillOrKill => "FILL_OR_KILL",
        }
    }
}

/// Lifecycle status of an order.
///
/// Transitions are monotonic: `New` -> `PartiallyFilled` -> `Filled`, or any
/// non-terminal state -> `Canceled`/`Rejected`/`Expired`. A terminal status
/// is never overwritten.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// True once no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        }
    }
}

/// Canonical view of one order as maintained by the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Venue-assigned order id.
    pub order_id: String,
    /// Caller-supplied idempotency key.
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Absent for market orders.
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub executed_quantity: Decimal,
    pub status: OrderStatus,
    /// Venue event sequence (update-time millis) used for staleness checks.
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One state transition for an order, produced by a REST acknowledgment or
/// a stream event. Both sources are applied through the same tracker path.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub executed_quantity: Decimal,
    pub status: OrderStatus,
    /// Venue sequence/timestamp of the event. Older sequences for a known
    /// order are discarded.
    pub sequence: i64,
}

/// Free/locked funds for a single asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// Patch to a single asset balance, typically from a stream account event.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceUpdate {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// One stream channel subscription.
///
/// Market-data channels are parameterized by symbol; user-data channels are
/// not. Subscriptions survive reconnects and are replayed in their original
/// order before the stream reports itself subscribed again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub channel: String,
    pub symbol: Option<String>,
}

impl Subscription {
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            symbol: None,
        }
    }

    pub fn with_symbol(channel: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            symbol: Some(symbol.into()),
        }
    }

    /// The wire topic, e.g. `spot@public.deals.v3.api@BTCUSDT`.
    pub fn topic(&self) -> String {
        match &self.symbol {
            Some(symbol) => format!("{}@{}", self.channel, symbol),
            None => self.channel.clone(),
        }
    }

    /// User-data channels require an authenticated connection.
    pub fn is_private(&self) -> bool {
        self.channel.contains("private")
    }
}
