//! Authenticated REST client for the MEXC v3 API.
//!
//! Every operation validates its input locally, acquires rate budget, signs
//! with the venue clock, sends, and classifies the outcome. Transient
//! faults (timeouts, 5xx, venue-side 429) are retried with exponential
//! backoff; permanent rejections surface immediately with the venue's
//! error code attached.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mexc_core::{
    execute_with_retry, Balance, MexcError, MexcResult, OrderStatus, OrderType, OrderUpdate,
    RateLimiter, RetryConfig,
};

use crate::config::GatewayConfig;
use crate::signer::{Signer, API_KEY_HEADER};
use crate::stream::StreamAuth;
use crate::types::{
    AccountInfo, ApiErrorBody, ConvertibleAsset, ListenKeyResponse, NewOrder, RestOrder,
    ServerTime,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// Request weights per the venue's published endpoint table.
const WEIGHT_LIGHT: u32 = 1;
const WEIGHT_OPEN_ORDERS: u32 = 3;
const WEIGHT_ACCOUNT: u32 = 10;

/// Venue codes meaning the signing timestamp drifted outside the accepted
/// window; the clock is resynced and the request retried.
fn is_timestamp_error(code: i64) -> bool {
    code == 700003 || code == -1021
}

pub struct MexcRestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    signer: Signer,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    /// Venue minus local clock, milliseconds.
    clock_offset: AtomicI64,
    clock_synced: AtomicBool,
    /// Cached user-data-stream key, created on demand.
    listen_key: tokio::sync::Mutex<Option<String>>,
}

impl MexcRestClient {
    pub fn new(config: &GatewayConfig) -> MexcResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MexcError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.credentials.api_key().to_string(),
            signer: Signer::new(config.credentials.secret_key()),
            rate_limiter: Arc::new(RateLimiter::mexc()),
            retry: RetryConfig::from_env(),
            clock_offset: AtomicI64::new(0),
            clock_synced: AtomicBool::new(false),
            listen_key: tokio::sync::Mutex::new(None),
        })
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.rate_limiter)
    }

    // ---- venue clock ----

    fn local_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Signing timestamp: local clock corrected by the last observed offset.
    fn venue_timestamp(&self) -> i64 {
        Self::local_millis() + self.clock_offset.load(Ordering::Relaxed)
    }

    /// `GET /api/v3/time`
    pub async fn server_time(&self) -> MexcResult<i64> {
        let time: ServerTime = self
            .public_get("/api/v3/time", "server_time", WEIGHT_LIGHT)
            .await?;
        Ok(time.server_time)
    }

    /// Establish the venue clock offset used for signing.
    pub async fn sync_clock(&self) -> MexcResult<()> {
        let server = self.server_time().await?;
        let offset = server - Self::local_millis();
        self.clock_offset.store(offset, Ordering::Relaxed);
        self.clock_synced.store(true, Ordering::Relaxed);
        debug!("venue clock offset set to {offset}ms");
        Ok(())
    }

    async fn ensure_clock(&self) -> MexcResult<()> {
        if self.clock_synced.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.sync_clock().await
    }

    // ---- request plumbing ----

    async fn public_get<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        operation: &'static str,
        weight: u32,
    ) -> MexcResult<T> {
        execute_with_retry(&self.retry, operation, || async move {
            self.rate_limiter.acquire(weight).await?;
            let url = format!("{}{}", self.base_url, endpoint);
            debug!("{operation}: GET {endpoint}");
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| classify_transport(operation, e))?;
            self.classify_response(operation, response).await
        })
        .await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &'static str,
        operation: &'static str,
        params: Vec<(String, String)>,
        weight: u32,
    ) -> MexcResult<T> {
        execute_with_retry(&self.retry, operation, || {
            let params = params.clone();
            let method = method.clone();
            async move {
                // Inside the retry loop so a timestamp rejection gets a
                // freshly synced clock on the next attempt.
                self.ensure_clock().await?;
                self.rate_limiter.acquire(weight).await?;
                let signed = self.signer.sign(&params, self.venue_timestamp())?;
                let url = format!("{}{}?{}", self.base_url, endpoint, signed.query());
                debug!("{operation}: {method} {endpoint}");
                let response = self
                    .http
                    .request(method, url)
                    .header(API_KEY_HEADER, self.api_key.as_str())
                    .send()
                    .await
                    .map_err(|e| classify_transport(operation, e))?;
                self.classify_response(operation, response).await
            }
        })
        .await
    }

    async fn classify_response<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        response: reqwest::Response,
    ) -> MexcResult<T> {
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            MexcError::recoverable(operation, format!("failed to read response body: {e}"))
        })?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                MexcError::terminal(
                    operation,
                    None,
                    format!("unexpected response body: {e}; body: {body}"),
                )
            });
        }

        if status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            return Err(MexcError::recoverable(
                operation,
                format!("HTTP {status}: {body}"),
            ));
        }

        match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(api) if is_timestamp_error(api.code) => {
                // Clock drifted outside the venue's window; resync on the
                // next attempt and let the retry loop take another shot.
                self.clock_synced.store(false, Ordering::Relaxed);
                Err(MexcError::recoverable(
                    operation,
                    format!("venue rejected timestamp (code {}): {}", api.code, api.msg),
                ))
            }
            Ok(api) => Err(MexcError::terminal(operation, Some(api.code), api.msg)),
            Err(_) => Err(MexcError::terminal(
                operation,
                None,
                format!("HTTP {status}: {body}"),
            )),
        }
    }

    // ---- account ----

    /// `GET /api/v3/account` — free/locked funds per asset.
    pub async fn get_balances(&self) -> MexcResult<Vec<Balance>> {
        const OP: &str = "get_balances";
        let account: AccountInfo = self
            .signed_request(Method::GET, "/api/v3/account", OP, Vec::new(), WEIGHT_ACCOUNT)
            .await?;
        account
            .balances
            .into_iter()
            .map(|raw| raw.into_balance(OP))
            .collect()
    }

    // ---- orders ----

    /// `GET /api/v3/openOrders`
    pub async fn get_open_orders(&self, symbol: &str) -> MexcResult<Vec<OrderUpdate>> {
        const OP: &str = "get_open_orders";
        if symbol.trim().is_empty() {
            return Err(MexcError::validation(OP, "symbol must not be empty"));
        }
        let params = vec![("symbol".to_string(), symbol.to_string())];
        let orders: Vec<RestOrder> = self
            .signed_request(Method::GET, "/api/v3/openOrders", OP, params, WEIGHT_OPEN_ORDERS)
            .await?;
        let fallback = self.venue_timestamp();
        orders
            .into_iter()
            .map(|order| order.into_update(OP, OrderStatus::New, fallback))
            .collect()
    }

    /// `POST /api/v3/order`
    ///
    /// Always carries a client order id so that a retry after an ambiguous
    /// network failure dedupes on the venue; a duplicate-id rejection is
    /// resolved by fetching the order the venue already has.
    pub async fn place_order(&self, order: &NewOrder) -> MexcResult<OrderUpdate> {
        const OP: &str = "place_order";
        validate_new_order(order)?;
        let client_order_id = order
            .client_order_id
            .clone()
            .unwrap_or_else(generate_client_order_id);

        let mut params = vec![
            ("symbol".to_string(), order.symbol.clone()),
            ("side".to_string(), order.side.as_str().to_string()),
            ("type".to_string(), order.order_type.as_str().to_string()),
            ("quantity".to_string(), order.quantity.to_string()),
        ];
        if let Some(price) = order.price {
            params.push(("price".to_string(), price.to_string()));
        }
        params.push(("newClientOrderId".to_string(), client_order_id.clone()));

        let result: MexcResult<RestOrder> = self
            .signed_request(Method::POST, "/api/v3/order", OP, params, WEIGHT_LIGHT)
            .await;

        match result {
            Ok(ack) => {
                let mut update = ack.into_update(OP, OrderStatus::New, self.venue_timestamp())?;
                if update.client_order_id.is_empty() {
                    update.client_order_id = client_order_id.clone();
                }
                info!(
                    "{OP}: {} {} {} acknowledged (order id {}, client id {})",
                    update.side.as_str(),
                    update.quantity,
                    update.symbol,
                    update.order_id,
                    update.client_order_id
                );
                Ok(update)
            }
            Err(MexcError::Terminal { message, .. }) if is_duplicate_order(&message) => {
                warn!(
                    "{OP}: venue already holds client order id {client_order_id}, \
                     fetching the existing order"
                );
                self.query_order(&order.symbol, &client_order_id).await
            }
            Err(e) => Err(e),
        }
    }

    /// `DELETE /api/v3/order`
    pub async fn cancel_order(&self, symbol: &str, client_order_id: &str) -> MexcResult<OrderUpdate> {
        const OP: &str = "cancel_order";
        if symbol.trim().is_empty() {
            return Err(MexcError::validation(OP, "symbol must not be empty"));
        }
        if client_order_id.trim().is_empty() {
            return Err(MexcError::validation(OP, "client order id must not be empty"));
        }
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("origClientOrderId".to_string(), client_order_id.to_string()),
        ];
        let ack: RestOrder = self
            .signed_request(Method::DELETE, "/api/v3/order", OP, params, WEIGHT_LIGHT)
            .await?;
        ack.into_update(OP, OrderStatus::Canceled, self.venue_timestamp())
    }

    /// `GET /api/v3/order`
    pub async fn query_order(&self, symbol: &str, client_order_id: &str) -> MexcResult<OrderUpdate> {
        const OP: &str = "query_order";
        if symbol.trim().is_empty() {
            return Err(MexcError::validation(OP, "symbol must not be empty"));
        }
        if client_order_id.trim().is_empty() {
            return Err(MexcError::validation(OP, "client order id must not be empty"));
        }
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("origClientOrderId".to_string(), client_order_id.to_string()),
        ];
        let order: RestOrder = self
            .signed_request(Method::GET, "/api/v3/order", OP, params, WEIGHT_LIGHT)
            .await?;
        order.into_update(OP, OrderStatus::New, self.venue_timestamp())
    }

    // ---- small-balance conversion ----

    /// `GET /api/v3/capital/convert/list` — assets eligible for dust
    /// conversion into MX.
    pub async fn convertible_assets(&self) -> MexcResult<Vec<ConvertibleAsset>> {
        const OP: &str = "convertible_assets";
        self.signed_request(
            Method::GET,
            "/api/v3/capital/convert/list",
            OP,
            Vec::new(),
            WEIGHT_LIGHT,
        )
        .await
    }

    /// `POST /api/v3/capital/convert` — convert the given dust balances.
    pub async fn convert_dust(&self, assets: &[String]) -> MexcResult<serde_json::Value> {
        const OP: &str = "convert_dust";
        if assets.is_empty() {
            return Err(MexcError::validation(OP, "asset list must not be empty"));
        }
        if assets.iter().any(|asset| asset.trim().is_empty()) {
            return Err(MexcError::validation(OP, "asset names must not be empty"));
        }
        let params = vec![("asset".to_string(), assets.join(","))];
        self.signed_request(Method::POST, "/api/v3/capital/convert", OP, params, WEIGHT_LIGHT)
            .await
    }

    // ---- user-data stream keys ----

    /// `POST /api/v3/userDataStream` — create and cache a listen key.
    pub async fn create_listen_key(&self) -> MexcResult<String> {
        const OP: &str = "create_listen_key";
        let response: ListenKeyResponse = self
            .signed_request(Method::POST, "/api/v3/userDataStream", OP, Vec::new(), WEIGHT_LIGHT)
            .await?;
        let mut cached = self.listen_key.lock().await;
        *cached = Some(response.listen_key.clone());
        Ok(response.listen_key)
    }

    /// `PUT /api/v3/userDataStream` — keep the cached key alive. No-op when
    /// no key has been created.
    pub async fn keepalive_listen_key(&self) -> MexcResult<()> {
        const OP: &str = "keepalive_listen_key";
        let key = match self.listen_key.lock().await.clone() {
            Some(key) => key,
            None => return Ok(()),
        };
        let params = vec![("listenKey".to_string(), key)];
        let _: serde_json::Value = self
            .signed_request(Method::PUT, "/api/v3/userDataStream", OP, params, WEIGHT_LIGHT)
            .await?;
        Ok(())
    }

    /// `DELETE /api/v3/userDataStream` — discard the cached key on shutdown.
    pub async fn close_listen_key(&self) -> MexcResult<()> {
        const OP: &str = "close_listen_key";
        let key = match self.listen_key.lock().await.take() {
            Some(key) => key,
            None => return Ok(()),
        };
        let params = vec![("listenKey".to_string(), key)];
        let _: serde_json::Value = self
            .signed_request(Method::DELETE, "/api/v3/userDataStream", OP, params, WEIGHT_LIGHT)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StreamAuth for MexcRestClient {
    /// The stream client asks for a key on every (re)connect; reuse the
    /// cached one while the keepalive task keeps it fresh.
    async fn listen_key(&self) -> MexcResult<String> {
        if let Some(key) = self.listen_key.lock().await.clone() {
            return Ok(key);
        }
        self.create_listen_key().await
    }

    async fn invalidate_listen_key(&self) {
        self.listen_key.lock().await.take();
    }
}

fn classify_transport(operation: &'static str, err: reqwest::Error) -> MexcError {
    MexcError::recoverable(operation, format!("transport error: {err}"))
}

fn is_duplicate_order(message: &str) -> bool {
    message.to_lowercase().contains("duplicate")
}

fn generate_client_order_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn validate_new_order(order: &NewOrder) -> MexcResult<()> {
    const OP: &str = "place_order";
    if order.symbol.trim().is_empty() {
        return Err(MexcError::validation(OP, "symbol must not be empty"));
    }
    if order.quantity <= rust_decimal::Decimal::ZERO {
        return Err(MexcError::validation(
            OP,
            format!("quantity must be positive, got {}", order.quantity),
        ));
    }
    match (order.order_type, order.price) {
        (OrderType::Market, Some(_)) => Err(MexcError::validation(
            OP,
            "market orders do not take a price",
        )),
        (OrderType::Market, None) => Ok(()),
        (_, None) => Err(MexcError::validation(
            OP,
            format!("{} orders require a price", order.order_type.as_str()),
        )),
        (_, Some(price)) if price <= rust_decimal::Decimal::ZERO => Err(MexcError::validation(
            OP,
            format!("price must be positive, got {price}"),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mexc_core::OrderSide;
    use rust_decimal_macros::dec;

    #[test]
    fn zero_quantity_fails_validation() {
        let order = NewOrder::limit("BTCUSDT", OrderSide::Buy, dec!(0), dec!(65000));
        let err = validate_new_order(&order).unwrap_err();
        match err {
            MexcError::Validation { operation, reason } => {
                assert_eq!(operation, "place_order");
                assert!(reason.contains("quantity"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn empty_symbol_fails_validation() {
        let order = NewOrder::limit("  ", OrderSide::Buy, dec!(1), dec!(65000));
        assert!(matches!(
            validate_new_order(&order),
            Err(MexcError::Validation { .. })
        ));
    }

    #[test]
    fn limit_without_price_fails_validation() {
        let mut order = NewOrder::limit("BTCUSDT", OrderSide::Buy, dec!(1), dec!(65000));
        order.price = None;
        assert!(matches!(
            validate_new_order(&order),
            Err(MexcError::Validation { .. })
        ));
    }

    #[test]
    fn market_with_price_fails_validation() {
        let mut order = NewOrder::market("BTCUSDT", OrderSide::Sell, dec!(1));
        order.price = Some(dec!(65000));
        assert!(matches!(
            validate_new_order(&order),
            Err(MexcError::Validation { .. })
        ));
    }

    #[test]
    fn valid_orders_pass_validation() {
        let limit = NewOrder::limit("BTCUSDT", OrderSide::Buy, dec!(0.5), dec!(65000));
        assert!(validate_new_order(&limit).is_ok());
        let market = NewOrder::market("BTCUSDT", OrderSide::Sell, dec!(0.5));
        assert!(validate_new_order(&market).is_ok());
    }

    #[test]
    fn generated_client_ids_fit_the_venue_limit() {
        let id = generate_client_order_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn duplicate_detection_is_case_insensitive() {
        assert!(is_duplicate_order("Duplicate order sent"));
        assert!(is_duplicate_order("DUPLICATE clientOrderId"));
        assert!(!is_duplicate_order("Unknown order sent"));
    }

    #[test]
    fn timestamp_codes() {
        assert!(is_timestamp_error(700003));
        assert!(is_timestamp_error(-1021));
        assert!(!is_timestamp_error(-2010));
    }
}
