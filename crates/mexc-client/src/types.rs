//! Wire types for the MEXC v3 REST API.
//!
//! The venue encodes decimals as strings; conversions into the domain types
//! parse them explicitly so a malformed payload fails loudly with context
//! instead of silently defaulting.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;

use mexc_core::{Balance, MexcError, MexcResult, OrderSide, OrderStatus, OrderType, OrderUpdate};

/// A new-order request as accepted by `place_order`.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Required for limit orders, absent for market orders.
    pub price: Option<Decimal>,
    /// Idempotency key; generated when not supplied.
    pub client_order_id: Option<String>,
}

impl NewOrder {
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            client_order_id: None,
        }
    }

    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            client_order_id: None,
        }
    }

    pub fn with_client_order_id(mut self, client_order_id: impl Into<String>) -> Self {
        self.client_order_id = Some(client_order_id.into());
        self
    }
}

/// `GET /api/v3/time`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: i64,
}

/// Venue error body (`{"code": ..., "msg": ...}`).
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

/// `GET /api/v3/account`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    #[serde(default)]
    pub balances: Vec<RawBalance>,
    pub can_trade: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RawBalance {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

impl RawBalance {
    pub fn into_balance(self, operation: &'static str) -> MexcResult<Balance> {
        Ok(Balance {
            free: parse_decimal(operation, &self.asset, "free", &self.free)?,
            locked: parse_decimal(operation, &self.asset, "locked", &self.locked)?,
            asset: self.asset,
        })
    }
}

/// Venue order ids arrive as strings on spot and as numbers on some
/// endpoints; accept both.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Str(String),
    Num(i64),
}

impl IdValue {
    pub fn into_string(self) -> String {
        match self {
            IdValue::Str(s) => s,
            IdValue::Num(n) => n.to_string(),
        }
    }
}

/// Order payload shared by the place/cancel acknowledgments and the
/// open-orders / query-order responses. Fields the venue omits on a given
/// endpoint are optional.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestOrder {
    pub symbol: String,
    pub order_id: IdValue,
    pub client_order_id: Option<String>,
    /// Cancel acks echo the id under this name instead.
    pub orig_client_order_id: Option<String>,
    pub price: Option<String>,
    pub orig_qty: String,
    pub executed_qty: Option<String>,
    pub status: Option<OrderStatus>,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: OrderSide,
    pub time: Option<i64>,
    pub update_time: Option<i64>,
    pub transact_time: Option<i64>,
}

impl RestOrder {
    /// Convert into a tracker update.
    ///
    /// `default_status` covers acks that omit the status field (a fresh
    /// placement is `NEW`, a cancel ack is `CANCELED`); `fallback_sequence`
    /// covers responses without a venue timestamp.
    pub fn into_update(
        self,
        operation: &'static str,
        default_status: OrderStatus,
        fallback_sequence: i64,
    ) -> MexcResult<OrderUpdate> {
        let price = match &self.price {
            Some(raw) => {
                let value = parse_decimal(operation, &self.symbol, "price", raw)?;
                // The venue reports market orders with a zero price.
                (!value.is_zero()).then_some(value)
            }
            None => None,
        };
        let executed_quantity = match &self.executed_qty {
            Some(raw) => parse_decimal(operation, &self.symbol, "executedQty", raw)?,
            None => Decimal::ZERO,
        };
        let sequence = self
            .update_time
            .or(self.transact_time)
            .or(self.time)
            .unwrap_or(fallback_sequence);

        Ok(OrderUpdate {
            order_id: self.order_id.into_string(),
            client_order_id: self
                .client_order_id
                .or(self.orig_client_order_id)
                .unwrap_or_default(),
            quantity: parse_decimal(operation, &self.symbol, "origQty", &self.orig_qty)?,
            symbol: self.symbol,
            side: self.side,
            order_type: self.order_type,
            price,
            executed_quantity,
            status: self.status.unwrap_or(default_status),
            sequence,
        })
    }
}

/// `POST /api/v3/userDataStream`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKeyResponse {
    pub listen_key: String,
}

/// One entry of `GET /api/v3/capital/convert/list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertibleAsset {
    pub asset: String,
    /// Estimated MX proceeds for converting the dust balance.
    #[serde(default, alias = "convert_mx")]
    pub convert_mx: Option<String>,
}

fn parse_decimal(
    operation: &'static str,
    context: &str,
    field: &str,
    raw: &str,
) -> MexcResult<Decimal> {
    Decimal::from_str(raw).map_err(|e| {
        MexcError::terminal(
            operation,
            None,
            format!("{context}: unparseable {field} `{raw}`: {e}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn place_ack_maps_to_update() {
        let ack: RestOrder = serde_json::from_str(
            r#"{
                "symbol": "BTCUSDT",
                "orderId": "C02__443776347957968896",
                "clientOrderId": "my-id-1",
                "price": "65000.5",
                "origQty": "0.25",
                "type": "LIMIT",
                "side": "BUY",
                "transactTime": 1700000001234
            }"#,
        )
        .unwrap();

        let update = ack
            .into_update("place_order", OrderStatus::New, 0)
            .unwrap();
        assert_eq!(update.order_id, "C02__443776347957968896");
        assert_eq!(update.client_order_id, "my-id-1");
        assert_eq!(update.price, Some(dec!(65000.5)));
        assert_eq!(update.quantity, dec!(0.25));
        assert_eq!(update.status, OrderStatus::New);
        assert_eq!(update.sequence, 1700000001234);
    }

    #[test]
    fn open_order_maps_status_and_sequence() {
        let order: RestOrder = serde_json::from_str(
            r#"{
                "symbol": "MXUSDT",
                "orderId": 123456,
                "clientOrderId": "abc",
                "price": "3.1",
                "origQty": "100",
                "executedQty": "40",
                "status": "PARTIALLY_FILLED",
                "type": "LIMIT",
                "side": "SELL",
                "time": 1700000000001,
                "updateTime": 1700000005000
            }"#,
        )
        .unwrap();

        let update = order
            .into_update("get_open_orders", OrderStatus::New, 0)
            .unwrap();
        assert_eq!(update.order_id, "123456");
        assert_eq!(update.status, OrderStatus::PartiallyFilled);
        assert_eq!(update.executed_quantity, dec!(40));
        assert_eq!(update.sequence, 1700000005000);
    }

    #[test]
    fn cancel_ack_falls_back_to_orig_client_id() {
        let ack: RestOrder = serde_json::from_str(
            r#"{
                "symbol": "BTCUSDT",
                "orderId": "C02__1",
                "origClientOrderId": "my-id-2",
                "price": "0",
                "origQty": "1",
                "type": "MARKET",
                "side": "SELL"
            }"#,
        )
        .unwrap();

        let update = ack
            .into_update("cancel_order", OrderStatus::Canceled, 42)
            .unwrap();
        assert_eq!(update.client_order_id, "my-id-2");
        assert_eq!(update.status, OrderStatus::Canceled);
        // Zero price means a market order, not a free fill.
        assert_eq!(update.price, None);
        assert_eq!(update.sequence, 42);
    }

    #[test]
    fn malformed_decimal_fails_with_context() {
        let balance = RawBalance {
            asset: "USDT".into(),
            free: "not-a-number".into(),
            locked: "0".into(),
        };
        let err = balance.into_balance("get_balances").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("get_balances"));
        assert!(text.contains("USDT"));
        assert!(text.contains("not-a-number"));
    }

    #[test]
    fn account_balances_deserialize() {
        let account: AccountInfo = serde_json::from_str(
            r#"{
                "canTrade": true,
                "balances": [
                    {"asset": "USDT", "free": "100.5", "locked": "2"},
                    {"asset": "MX", "free": "0", "locked": "0"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(account.balances.len(), 2);
        let usdt = account.balances.into_iter().next().unwrap();
        let balance = usdt.into_balance("get_balances").unwrap();
        assert_eq!(balance.free, dec!(100.5));
        assert_eq!(balance.locked, dec!(2));
    }
}
