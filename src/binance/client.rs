//! Futures REST client
//!
//! Thin wrapper over `reqwest` for the USDT-M futures endpoints the engine
//! needs: order submission and lookup, leverage configuration, and the
//! user-data-stream listen key lifecycle. Signed requests use HMAC-SHA256
//! over the query string; every call first acquires weight from the shared
//! [`RateLimiter`].

use crate::binance::rate_limiter::RateLimiter;
use crate::binance::types::{ApiErrorBody, ListenKeyResponse, RestOrder};
use crate::config::Credentials;
use crate::error::{EngineError, Result};
use crate::oms::{NewOrderRequest, OrderAck, OrderGateway, OrderStatusUpdate};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

type HmacSha256 = Hmac<Sha256>;

/// Venue error code for "order does not exist".
const ERR_ORDER_NOT_FOUND: i64 = -2013;

const WEIGHT_ORDER: u32 = 1;
const WEIGHT_QUERY_ORDER: u32 = 1;
const WEIGHT_LEVERAGE: u32 = 1;
const WEIGHT_LISTEN_KEY: u32 = 1;

/// REST client for the USDT-M futures API.
#[derive(Clone)]
pub struct FuturesClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    limiter: Arc<RateLimiter>,
}

impl std::fmt::Debug for FuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuturesClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl FuturesClient {
    pub fn new(base_url: String, credentials: Credentials, limiter: Arc<RateLimiter>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("volscalp/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("reqwest client");

        Self {
            client,
            base_url,
            credentials,
            limiter,
        }
    }

    fn api_key(&self) -> Result<&str> {
        if !self.credentials.is_configured() {
            return Err(EngineError::Config(
                "API credentials not configured".to_string(),
            ));
        }
        Ok(self.credentials.api_key.reveal())
    }

    /// HMAC-SHA256 signature of the query string, hex-encoded.
    fn sign(&self, query_string: &str) -> Result<String> {
        let secret = &self.credentials.api_secret;
        if !secret.is_set() {
            return Err(EngineError::Config("API secret not configured".to_string()));
        }
        let mut mac = HmacSha256::new_from_slice(secret.reveal().as_bytes())
            .map_err(|e| EngineError::Config(format!("Invalid secret key: {}", e)))?;
        mac.update(query_string.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn timestamp_ms() -> Result<u64> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .map_err(|e| EngineError::Parse(format!("System time error: {}", e)))
    }

    fn signed_url(&self, path: &str, params: &[(&str, String)]) -> Result<String> {
        let mut query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        query.push(format!("timestamp={}", Self::timestamp_ms()?));
        let query_string = query.join("&");
        let signature = self.sign(&query_string)?;
        Ok(format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        ))
    }

    /// Read the venue's error body from a non-2xx response.
    async fn error_body(resp: reqwest::Response) -> ApiErrorBody {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        serde_json::from_str(&text).unwrap_or(ApiErrorBody {
            code: status.as_u16() as i64,
            msg: text,
        })
    }

    // ── Listen key lifecycle ─────────────────────────────────────────

    /// POST /fapi/v1/listenKey: open a user-data-stream session.
    ///
    /// The key is valid for 60 minutes and must be kept alive every 30.
    pub async fn create_listen_key(&self) -> Result<String> {
        self.limiter.acquire(WEIGHT_LISTEN_KEY).await;
        let api_key = self.api_key()?.to_string();
        let url = format!("{}/fapi/v1/listenKey", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await?;
        if !resp.status().is_success() {
            let body = Self::error_body(resp).await;
            return Err(EngineError::Exchange(format!(
                "listenKey create failed: {} {}",
                body.code, body.msg
            )));
        }

        let key: ListenKeyResponse = resp.json().await?;
        Ok(key.listen_key)
    }

    /// PUT /fapi/v1/listenKey: extend the key's validity by 60 minutes.
    pub async fn keepalive_listen_key(&self) -> Result<()> {
        self.limiter.acquire(WEIGHT_LISTEN_KEY).await;
        let api_key = self.api_key()?.to_string();
        let url = format!("{}/fapi/v1/listenKey", self.base_url);

        let resp = self
            .client
            .put(&url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await?;
        if !resp.status().is_success() {
            let body = Self::error_body(resp).await;
            return Err(EngineError::Exchange(format!(
                "listenKey keepalive failed: {} {}",
                body.code, body.msg
            )));
        }
        Ok(())
    }

    /// DELETE /fapi/v1/listenKey: close the stream session.
    pub async fn close_listen_key(&self) -> Result<()> {
        self.limiter.acquire(WEIGHT_LISTEN_KEY).await;
        let api_key = self.api_key()?.to_string();
        let url = format!("{}/fapi/v1/listenKey", self.base_url);

        let resp = self
            .client
            .delete(&url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await?;
        if !resp.status().is_success() {
            let body = Self::error_body(resp).await;
            return Err(EngineError::Exchange(format!(
                "listenKey close failed: {} {}",
                body.code, body.msg
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderGateway for FuturesClient {
    /// POST /fapi/v1/order (signed).
    async fn create_order(&self, order: &NewOrderRequest) -> Result<OrderAck> {
        self.limiter.acquire(WEIGHT_ORDER).await;
        let api_key = self.api_key()?.to_string();

        let mut params = vec![
            ("symbol", order.symbol.clone()),
            ("side", order.side.as_str().to_string()),
            ("type", order.order_type.clone()),
            ("quantity", format!("{}", order.qty)),
            ("newClientOrderId", order.client_id.clone()),
        ];
        if let Some(price) = order.price {
            params.push(("price", format!("{}", price)));
            params.push(("timeInForce", order.time_in_force.clone()));
        }

        let url = self.signed_url("/fapi/v1/order", &params)?;
        let resp = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await?;
        if !resp.status().is_success() {
            let body = Self::error_body(resp).await;
            return Err(EngineError::Exchange(format!(
                "order rejected: {} {}",
                body.code, body.msg
            )));
        }

        let ack: RestOrder = resp.json().await?;
        info!(
            client_id = %ack.client_order_id,
            exchange_id = ack.order_id,
            status = %ack.status,
            "order accepted by venue"
        );
        Ok(OrderAck {
            exchange_id: ack.order_id,
            client_id: ack.client_order_id,
            status: ack.status,
        })
    }

    /// GET /fapi/v1/order (signed). Returns `None` when the venue does not
    /// know the client order id.
    async fn query_order(
        &self,
        symbol: &str,
        client_id: &str,
    ) -> Result<Option<OrderStatusUpdate>> {
        self.limiter.acquire(WEIGHT_QUERY_ORDER).await;
        let api_key = self.api_key()?.to_string();

        let params = vec![
            ("symbol", symbol.to_string()),
            ("origClientOrderId", client_id.to_string()),
        ];
        let url = self.signed_url("/fapi/v1/order", &params)?;

        let resp = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await?;
        if !resp.status().is_success() {
            let body = Self::error_body(resp).await;
            if body.code == ERR_ORDER_NOT_FOUND {
                debug!(client_id, "order unknown to venue");
                return Ok(None);
            }
            return Err(EngineError::Exchange(format!(
                "order lookup failed: {} {}",
                body.code, body.msg
            )));
        }

        let order: RestOrder = resp.json().await?;
        Ok(Some(order.to_status_update()))
    }

    /// POST /fapi/v1/leverage (signed).
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.limiter.acquire(WEIGHT_LEVERAGE).await;
        let api_key = self.api_key()?.to_string();

        let params = vec![
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];
        let url = self.signed_url("/fapi/v1/leverage", &params)?;

        let resp = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await?;
        if !resp.status().is_success() {
            let body = Self::error_body(resp).await;
            return Err(EngineError::Exchange(format!(
                "set leverage failed: {} {}",
                body.code, body.msg
            )));
        }
        info!(symbol, leverage, "leverage configured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> FuturesClient {
        std::env::set_var("BINANCE_API_KEY", "test-key-aaaaaaaa");
        std::env::set_var("BINANCE_API_SECRET", "test-secret-bbbbbbbb");
        FuturesClient::new(
            "https://testnet.binancefuture.com".to_string(),
            Credentials::from_env(),
            Arc::new(RateLimiter::new(2400, 60)),
        )
    }

    #[test]
    fn test_signed_url_shape() {
        let c = client();
        let url = c
            .signed_url("/fapi/v1/order", &[("symbol", "BTCUSDT".to_string())])
            .unwrap();
        assert!(url.starts_with("https://testnet.binancefuture.com/fapi/v1/order?symbol=BTCUSDT&timestamp="));
        assert!(url.contains("&signature="));
    }

    #[test]
    fn test_sign_is_deterministic() {
        let c = client();
        let a = c.sign("symbol=BTCUSDT&timestamp=1").unwrap();
        let b = c.sign("symbol=BTCUSDT&timestamp=1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64); // hex-encoded SHA-256 output
    }

    #[test]
    fn test_debug_masks_credentials() {
        let c = client();
        let dbg = format!("{:?}", c);
        assert!(!dbg.contains("test-secret-bbbbbbbb"));
    }
}
