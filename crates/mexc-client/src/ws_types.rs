//! Wire types for the MEXC v3 WebSocket protocol.
//!
//! Control frames are JSON objects with a `method` (`SUBSCRIPTION`, `PING`,
//! ...); the server answers control frames with `{id, code, msg}` and pushes
//! data as `{c: channel, s: symbol, t: event-time, d: payload}`. Private
//! push payloads use the venue's short field names (`i`, `c`, `p`, `v`, ...).

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use mexc_core::{BalanceUpdate, MexcError, MexcResult, OrderSide, OrderStatus, OrderType, OrderUpdate};

pub const ORDERS_CHANNEL: &str = "spot@private.orders.v3.api";
pub const ACCOUNT_CHANNEL: &str = "spot@private.account.v3.api";
pub const DEALS_CHANNEL: &str = "spot@public.deals.v3.api";

/// Client -> server control frame.
#[derive(Debug, Serialize)]
pub struct WsRequest {
    pub method: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
}

impl WsRequest {
    pub fn subscribe(topics: Vec<String>) -> Self {
        Self {
            method: "SUBSCRIPTION",
            params: topics,
        }
    }

    pub fn unsubscribe(topics: Vec<String>) -> Self {
        Self {
            method: "UNSUBSCRIPTION",
            params: topics,
        }
    }

    pub fn ping() -> Self {
        Self {
            method: "PING",
            params: Vec::new(),
        }
    }

    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("control frame serialization cannot fail")
    }
}

/// Inbound frame: either a control ack (`id`/`code`/`msg`) or a data push
/// (`c`/`s`/`t`/`d`).
#[derive(Debug, Deserialize)]
pub struct WsEnvelope {
    pub id: Option<i64>,
    pub code: Option<i64>,
    pub msg: Option<String>,
    #[serde(rename = "c")]
    pub channel: Option<String>,
    #[serde(rename = "s")]
    pub symbol: Option<String>,
    #[serde(rename = "t")]
    pub event_time: Option<i64>,
    #[serde(rename = "d")]
    pub data: Option<serde_json::Value>,
}

impl WsEnvelope {
    pub fn is_pong(&self) -> bool {
        self.msg.as_deref() == Some("PONG")
    }

    /// For a successful subscription ack, the topic echoed back by the venue.
    pub fn ack_topic(&self) -> Option<&str> {
        if self.channel.is_none() && self.code == Some(0) {
            self.msg.as_deref().filter(|msg| msg.starts_with("spot@"))
        } else {
            None
        }
    }
}

/// Payload of `spot@private.orders.v3.api`.
#[derive(Debug, Deserialize)]
pub struct WsOrderData {
    #[serde(rename = "i")]
    pub order_id: String,
    #[serde(rename = "c", default)]
    pub client_order_id: Option<String>,
    #[serde(rename = "p", default)]
    pub price: Option<String>,
    #[serde(rename = "v")]
    pub quantity: String,
    #[serde(rename = "cv", default)]
    pub cumulative_quantity: Option<String>,
    #[serde(rename = "s")]
    pub status: i32,
    #[serde(rename = "S")]
    pub side: i32,
    #[serde(rename = "o", default)]
    pub order_type: Option<i32>,
}

impl WsOrderData {
    pub fn into_update(self, symbol: &str, event_time: i64) -> MexcResult<OrderUpdate> {
        const OP: &str = "stream.orders";
        let status = map_status(self.status).ok_or_else(|| {
            MexcError::terminal(OP, None, format!("unknown order status {}", self.status))
        })?;
        let side = map_side(self.side)
            .ok_or_else(|| MexcError::terminal(OP, None, format!("unknown side {}", self.side)))?;
        let price = match &self.price {
            Some(raw) => {
                let value = parse_decimal(OP, symbol, "p", raw)?;
                (!value.is_zero()).then_some(value)
            }
            None => None,
        };
        let executed_quantity = match &self.cumulative_quantity {
            Some(raw) => parse_decimal(OP, symbol, "cv", raw)?,
            None => Decimal::ZERO,
        };

        Ok(OrderUpdate {
            order_id: self.order_id,
            client_order_id: self.client_order_id.unwrap_or_default(),
            symbol: symbol.to_string(),
            side,
            order_type: self.order_type.and_then(map_order_type).unwrap_or(OrderType::Limit),
            price,
            quantity: parse_decimal(OP, symbol, "v", &self.quantity)?,
            executed_quantity,
            status,
            sequence: event_time,
        })
    }
}

/// Payload of `spot@private.account.v3.api`.
#[derive(Debug, Deserialize)]
pub struct WsAccountData {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "f")]
    pub free: String,
    #[serde(rename = "l", default)]
    pub locked: Option<String>,
}

impl WsAccountData {
    pub fn into_update(self) -> MexcResult<BalanceUpdate> {
        const OP: &str = "stream.account";
        let free = parse_decimal(OP, &self.asset, "f", &self.free)?;
        let locked = match &self.locked {
            Some(raw) => parse_decimal(OP, &self.asset, "l", raw)?,
            None => Decimal::ZERO,
        };
        Ok(BalanceUpdate {
            asset: self.asset,
            free,
            locked,
        })
    }
}

/// Payload of `spot@public.deals.v3.api@<SYMBOL>`.
#[derive(Debug, Deserialize)]
pub struct WsDealsData {
    pub deals: Vec<WsDeal>,
}

#[derive(Debug, Deserialize)]
pub struct WsDeal {
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "v")]
    pub quantity: String,
    #[serde(rename = "S")]
    pub side: i32,
    #[serde(rename = "t")]
    pub time: i64,
}

/// One public trade, converted from a deals push.
#[derive(Debug, Clone, PartialEq)]
pub struct Deal {
    pub symbol: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub side: OrderSide,
    pub time: i64,
}

impl WsDeal {
    pub fn into_deal(self, symbol: &str) -> MexcResult<Deal> {
        const OP: &str = "stream.deals";
        Ok(Deal {
            symbol: symbol.to_string(),
            price: parse_decimal(OP, symbol, "p", &self.price)?,
            quantity: parse_decimal(OP, symbol, "v", &self.quantity)?,
            side: map_side(self.side).unwrap_or(OrderSide::Buy),
            time: self.time,
        })
    }
}

fn map_status(raw: i32) -> Option<OrderStatus> {
    match raw {
        1 => Some(OrderStatus::New),
        2 => Some(OrderStatus::Filled),
        3 => Some(OrderStatus::PartiallyFilled),
        // 5 is the venue's "partially canceled"; the remainder is gone either way.
        4 | 5 => Some(OrderStatus::Canceled),
        _ => None,
    }
}

fn map_side(raw: i32) -> Option<OrderSide> {
    match raw {
        1 => Some(OrderSide::Buy),
        2 => Some(OrderSide::Sell),
        _ => None,
    }
}

fn map_order_type(raw: i32) -> Option<OrderType> {
    match raw {
        1 => Some(OrderType::Limit),
        2 => Some(OrderType::LimitMaker),
        3 => Some(OrderType::ImmediateOrCancel),
        4 => Some(OrderType::FillOrKill),
        5 => Some(OrderType::Market),
        _ => None,
    }
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
    fn subscription_frame_wire_format() {
        let frame = WsRequest::subscribe(vec![
            "spot@private.orders.v3.api".to_string(),
            "spot@public.deals.v3.api@BTCUSDT".to_string(),
        ]);
        let json = frame.to_message();
        assert_eq!(
            json,
            r#"{"method":"SUBSCRIPTION","params":["spot@private.orders.v3.api","spot@public.deals.v3.api@BTCUSDT"]}"#
        );
    }

    #[test]
    fn ping_frame_has_no_params() {
        assert_eq!(WsRequest::ping().to_message(), r#"{"method":"PING"}"#);
    }

    #[test]
    fn ack_and_pong_envelopes() {
        let ack: WsEnvelope =
            serde_json::from_str(r#"{"id":0,"code":0,"msg":"spot@private.orders.v3.api"}"#)
                .unwrap();
        assert_eq!(ack.ack_topic(), Some("spot@private.orders.v3.api"));

        let pong: WsEnvelope = serde_json::from_str(r#"{"id":0,"code":0,"msg":"PONG"}"#).unwrap();
        assert!(pong.is_pong());
        assert_eq!(pong.ack_topic(), None);
    }

    #[test]
    fn order_push_maps_to_update() {
        let envelope: WsEnvelope = serde_json::from_str(
            r#"{
                "c": "spot@private.orders.v3.api",
                "s": "BTCUSDT",
                "t": 1700000007000,
                "d": {
                    "i": "C02__9",
                    "c": "my-id-3",
                    "p": "64000",
                    "v": "0.5",
                    "cv": "0.2",
                    "s": 3,
                    "S": 1,
                    "o": 1
                }
            }"#,
        )
        .unwrap();

        let data: WsOrderData = serde_json::from_value(envelope.data.unwrap()).unwrap();
        let update = data
            .into_update(envelope.symbol.as_deref().unwrap(), envelope.event_time.unwrap())
            .unwrap();

        assert_eq!(update.order_id, "C02__9");
        assert_eq!(update.client_order_id, "my-id-3");
        assert_eq!(update.status, OrderStatus::PartiallyFilled);
        assert_eq!(update.side, OrderSide::Buy);
        assert_eq!(update.executed_quantity, dec!(0.2));
        assert_eq!(update.sequence, 1700000007000);
    }

    #[test]
    fn unknown_status_is_an_error() {
        let data = WsOrderData {
            order_id: "1".into(),
            client_order_id: None,
            price: None,
            quantity: "1".into(),
            cumulative_quantity: None,
            status: 99,
            side: 1,
            order_type: None,
        };
        assert!(data.into_update("BTCUSDT", 1).is_err());
    }

    #[test]
    fn account_push_maps_to_balance() {
        let data: WsAccountData =
            serde_json::from_str(r#"{"a":"USDT","f":"123.4","l":"6.6"}"#).unwrap();
        let update = data.into_update().unwrap();
        assert_eq!(update.asset, "USDT");
        assert_eq!(update.free, dec!(123.4));
        assert_eq!(update.locked, dec!(6.6));
    }

    #[test]
    fn deals_push_maps_to_trades() {
        let data: WsDealsData = serde_json::from_str(
            r#"{"deals":[{"p":"64250.1","v":"0.01","S":2,"t":1700000008000}]}"#,
        )
        .unwrap();
        let deal = data
            .deals
            .into_iter()
            .next()
            .unwrap()
            .into_deal("BTCUSDT")
            .unwrap();
        assert_eq!(deal.price, dec!(64250.1));
        assert_eq!(deal.side, OrderSide::Sell);
    }
}
