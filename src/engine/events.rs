//! Typed events flowing from the transport tasks into the dispatcher.
//!
//! Everything crosses the queue by value; the dispatcher is the only
//! consumer and the only mutator of downstream state.

use crate::oms::OrderStatusUpdate;
use std::time::Instant;

/// One asset's wallet balance from an account update.
#[derive(Debug, Clone)]
pub struct AssetBalance {
    pub asset: String,
    pub wallet_balance: f64,
}

/// A parsed event from either WebSocket stream.
#[derive(Debug, Clone)]
pub enum Event {
    /// Aggregated trade from the market stream
    AggTrade {
        symbol: String,
        price: f64,
        qty: f64,
        is_buyer_maker: bool,
        trade_id: u64,
        /// Exchange event time (ms)
        event_time_ms: i64,
        /// Monotonic receive timestamp, used for latency accounting
        recv: Instant,
    },

    /// Top-of-book quote from the market stream
    BookTicker {
        symbol: String,
        bid_price: f64,
        bid_qty: f64,
        ask_price: f64,
        ask_qty: f64,
        recv: Instant,
    },

    /// Order lifecycle update from the user data stream
    OrderUpdate(OrderStatusUpdate),

    /// Wallet balances from the user data stream
    AccountUpdate { balances: Vec<AssetBalance> },
}
