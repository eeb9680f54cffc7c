//! Wire types for the futures combined market stream, the user data
//! stream, and the REST order endpoints.
//!
//! Field names mirror the venue's single-letter JSON keys; prices and
//! quantities arrive as decimal strings and are parsed at the transport
//! boundary.

use crate::oms::OrderStatusUpdate;
use serde::{Deserialize, Serialize};

/// Envelope of the combined stream: `{"stream":"btcusdt@aggTrade","data":{…}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CombinedStreamMessage {
    pub stream: String,
    pub data: serde_json::Value,
}

/// Aggregated trade event from `<symbol>@aggTrade`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggTradeEvent {
    /// Event timestamp (Unix milliseconds)
    #[serde(rename = "E")]
    pub event_time: i64,

    /// Symbol (e.g. "BTCUSDT")
    #[serde(rename = "s")]
    pub symbol: String,

    /// Aggregate trade id, strictly increasing per symbol
    #[serde(rename = "a")]
    pub agg_trade_id: u64,

    /// Price (string to preserve precision)
    #[serde(rename = "p")]
    pub price: String,

    /// Quantity (string to preserve precision)
    #[serde(rename = "q")]
    pub quantity: String,

    /// Is the buyer the market maker? (true = aggressive sell)
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

/// Top-of-book event from `<symbol>@bookTicker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookTickerEvent {
    #[serde(rename = "s")]
    pub symbol: String,

    /// Best bid price
    #[serde(rename = "b")]
    pub bid_price: String,

    /// Best bid quantity
    #[serde(rename = "B")]
    pub bid_qty: String,

    /// Best ask price
    #[serde(rename = "a")]
    pub ask_price: String,

    /// Best ask quantity
    #[serde(rename = "A")]
    pub ask_qty: String,
}

/// User data stream events, discriminated by the `e` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e")]
pub enum UserStreamEvent {
    #[serde(rename = "ORDER_TRADE_UPDATE")]
    OrderTradeUpdate {
        #[serde(rename = "o")]
        order: OrderTradeUpdate,
    },

    #[serde(rename = "ACCOUNT_UPDATE")]
    AccountUpdate {
        #[serde(rename = "a")]
        account: AccountData,
    },

    #[serde(rename = "listenKeyExpired")]
    ListenKeyExpired,

    #[serde(other)]
    Other,
}

/// The `o` object of an ORDER_TRADE_UPDATE.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderTradeUpdate {
    /// Client order id
    #[serde(rename = "c")]
    pub client_order_id: String,

    /// Order status (NEW, PARTIALLY_FILLED, FILLED, …)
    #[serde(rename = "X")]
    pub status: String,

    /// Cumulative filled quantity
    #[serde(rename = "z", default)]
    pub filled_qty: String,

    /// Average fill price
    #[serde(rename = "ap", default)]
    pub avg_price: String,

    /// Exchange order id
    #[serde(rename = "i", default)]
    pub order_id: i64,
}

impl OrderTradeUpdate {
    /// Normalise into the record the OMS consumes.
    pub fn to_status_update(&self) -> OrderStatusUpdate {
        OrderStatusUpdate {
            client_id: self.client_order_id.clone(),
            status: self.status.clone(),
            filled_qty: self.filled_qty.parse().unwrap_or(0.0),
            avg_fill_price: self.avg_price.parse().unwrap_or(0.0),
            exchange_id: self.order_id,
        }
    }
}

/// The `a` object of an ACCOUNT_UPDATE.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountData {
    #[serde(rename = "B", default)]
    pub balances: Vec<WalletBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletBalance {
    /// Asset (e.g. "USDT")
    #[serde(rename = "a")]
    pub asset: String,

    /// Wallet balance
    #[serde(rename = "wb")]
    pub wallet_balance: String,
}

/// Response of POST /fapi/v1/listenKey.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    pub listen_key: String,
}

/// REST order payload (create/query responses).
#[derive(Debug, Clone, Deserialize)]
pub struct RestOrder {
    #[serde(rename = "orderId")]
    pub order_id: i64,

    #[serde(rename = "clientOrderId")]
    pub client_order_id: String,

    pub status: String,

    #[serde(rename = "executedQty", default)]
    pub executed_qty: String,

    #[serde(rename = "avgPrice", default)]
    pub avg_price: String,
}

impl RestOrder {
    pub fn to_status_update(&self) -> OrderStatusUpdate {
        OrderStatusUpdate {
            client_id: self.client_order_id.clone(),
            status: self.status.clone(),
            filled_qty: self.executed_qty.parse().unwrap_or(0.0),
            avg_fill_price: self.avg_price.parse().unwrap_or(0.0),
            exchange_id: self.order_id,
        }
    }
}

/// Error body the venue returns alongside non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agg_trade_deserialization() {
        let json = r#"{
            "e": "aggTrade",
            "E": 1672531200000,
            "s": "BTCUSDT",
            "a": 12345,
            "p": "16800.50",
            "q": "1.25",
            "f": 100,
            "l": 105,
            "T": 1672531199999,
            "m": true
        }"#;

        let trade: AggTradeEvent = serde_json::from_str(json).unwrap();
        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.agg_trade_id, 12345);
        assert_eq!(trade.price, "16800.50");
        assert_eq!(trade.quantity, "1.25");
        assert!(trade.is_buyer_maker);
        assert_eq!(trade.event_time, 1672531200000);
    }

    #[test]
    fn test_book_ticker_deserialization() {
        let json = r#"{
            "u": 400900217,
            "s": "BTCUSDT",
            "b": "16800.10",
            "B": "31.21",
            "a": "16800.20",
            "A": "40.66"
        }"#;

        let tick: BookTickerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(tick.symbol, "BTCUSDT");
        assert_eq!(tick.bid_price, "16800.10");
        assert_eq!(tick.bid_qty, "31.21");
        assert_eq!(tick.ask_price, "16800.20");
        assert_eq!(tick.ask_qty, "40.66");
    }

    #[test]
    fn test_combined_stream_envelope() {
        let json = r#"{"stream":"btcusdt@aggTrade","data":{"e":"aggTrade","E":1,"s":"BTCUSDT","a":7,"p":"100","q":"2","m":false}}"#;
        let msg: CombinedStreamMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.stream, "btcusdt@aggTrade");
        let trade: AggTradeEvent = serde_json::from_value(msg.data).unwrap();
        assert_eq!(trade.agg_trade_id, 7);
    }

    #[test]
    fn test_order_trade_update_deserialization() {
        let json = r#"{
            "e": "ORDER_TRADE_UPDATE",
            "E": 1568879465651,
            "o": {
                "s": "BTCUSDT",
                "c": "vs-abc123",
                "S": "BUY",
                "X": "PARTIALLY_FILLED",
                "i": 8886774,
                "z": "0.5",
                "ap": "9910.5"
            }
        }"#;

        let ev: UserStreamEvent = serde_json::from_str(json).unwrap();
        let UserStreamEvent::OrderTradeUpdate { order } = ev else {
            panic!("expected order update");
        };
        let u = order.to_status_update();
        assert_eq!(u.client_id, "vs-abc123");
        assert_eq!(u.status, "PARTIALLY_FILLED");
        assert_eq!(u.filled_qty, 0.5);
        assert_eq!(u.avg_fill_price, 9910.5);
        assert_eq!(u.exchange_id, 8886774);
    }

    #[test]
    fn test_account_update_deserialization() {
        let json = r#"{
            "e": "ACCOUNT_UPDATE",
            "E": 1564745798939,
            "a": {
                "m": "ORDER",
                "B": [
                    {"a": "USDT", "wb": "122624.12345678"},
                    {"a": "BNB", "wb": "1.00000000"}
                ]
            }
        }"#;

        let ev: UserStreamEvent = serde_json::from_str(json).unwrap();
        let UserStreamEvent::AccountUpdate { account } = ev else {
            panic!("expected account update");
        };
        assert_eq!(account.balances.len(), 2);
        assert_eq!(account.balances[0].asset, "USDT");
        assert_eq!(account.balances[0].wallet_balance, "122624.12345678");
    }

    #[test]
    fn test_listen_key_expired_and_unknown_events() {
        let ev: UserStreamEvent =
            serde_json::from_str(r#"{"e":"listenKeyExpired","E":1576653824250}"#).unwrap();
        assert!(matches!(ev, UserStreamEvent::ListenKeyExpired));

        let ev: UserStreamEvent =
            serde_json::from_str(r#"{"e":"MARGIN_CALL","E":1576653824250}"#).unwrap();
        assert!(matches!(ev, UserStreamEvent::Other));
    }

    #[test]
    fn test_rest_order_normalisation() {
        let json = r#"{
            "orderId": 22542179,
            "symbol": "BTCUSDT",
            "status": "NEW",
            "clientOrderId": "vs-xyz",
            "executedQty": "0",
            "avgPrice": "0.00000"
        }"#;
        let order: RestOrder = serde_json::from_str(json).unwrap();
        let u = order.to_status_update();
        assert_eq!(u.client_id, "vs-xyz");
        assert_eq!(u.status, "NEW");
        assert_eq!(u.filled_qty, 0.0);
        assert_eq!(u.exchange_id, 22542179);
    }
}
