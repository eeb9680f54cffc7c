//! Order Management System
//!
//! Tracks every order through its lifecycle state machine via the user
//! data stream, with orphan detection and REST fallback reconciliation
//! through the injected [`OrderGateway`].

use crate::error::Result;
use crate::signal::Side;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Seconds an order may sit in PENDING_SUBMIT before the orphan sweep
/// reconciles it over REST.
pub const ORPHAN_TIMEOUT: Duration = Duration::from_secs(5);
/// Failed reconciliation attempts before an orphan is considered permanent.
pub const MAX_ORPHAN_RETRIES: u32 = 3;

/// Lifecycle state of a managed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    /// Handed to the gateway, no exchange ack yet
    PendingSubmit,
    New,
    PartiallyFilled,
    Filled,
    /// Cancel in flight; a fill can still race it
    PendingCancel,
    Canceled,
    Rejected,
    Expired,
    /// Submission ack never arrived and REST reconciliation failed
    Orphaned,
}

impl OrderState {
    /// Terminal states are sinks: no update moves an order out of them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Canceled | OrderState::Rejected | OrderState::Expired
        )
    }

    fn from_exchange_status(status: &str) -> Option<Self> {
        match status {
            "NEW" => Some(OrderState::New),
            "PARTIALLY_FILLED" => Some(OrderState::PartiallyFilled),
            "FILLED" => Some(OrderState::Filled),
            "CANCELED" => Some(OrderState::Canceled),
            "REJECTED" => Some(OrderState::Rejected),
            "EXPIRED" => Some(OrderState::Expired),
            _ => None,
        }
    }
}

/// Canonical transition table. Arrival order is authoritative for venue
/// updates, so an out-of-table transition is logged rather than rejected;
/// only terminal states are enforced as absorbing.
fn transition_expected(from: OrderState, to: OrderState) -> bool {
    use OrderState::*;
    match from {
        PendingSubmit => matches!(to, New | Rejected | Orphaned),
        New => matches!(
            to,
            PartiallyFilled | Filled | PendingCancel | Canceled | Rejected | Expired
        ),
        PartiallyFilled => matches!(
            to,
            PartiallyFilled | Filled | PendingCancel | Canceled | Expired
        ),
        PendingCancel => matches!(to, Canceled | Filled),
        Orphaned => matches!(
            to,
            New | PartiallyFilled | Filled | Canceled | Rejected | Expired
        ),
        Filled | Canceled | Rejected | Expired => false,
    }
}

/// An order under management.
#[derive(Debug, Clone)]
pub struct ManagedOrder {
    /// Process-unique client order id
    pub client_id: String,
    pub exchange_id: Option<i64>,
    pub symbol: String,
    pub side: Side,
    pub order_type: String,
    pub qty: f64,
    pub price: Option<f64>,
    pub state: OrderState,
    pub filled_qty: f64,
    pub avg_fill_price: f64,
    pub submit_at: Instant,
    pub last_update_at: Instant,
    pub retry_count: u32,
    /// Free-form metadata (signal kind, ATR, confidence, …)
    pub tags: HashMap<String, String>,
}

impl ManagedOrder {
    pub fn market(client_id: String, symbol: String, side: Side, qty: f64) -> Self {
        let now = Instant::now();
        Self {
            client_id,
            exchange_id: None,
            symbol,
            side,
            order_type: "MARKET".to_string(),
            qty,
            price: None,
            state: OrderState::PendingSubmit,
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            submit_at: now,
            last_update_at: now,
            retry_count: 0,
            tags: HashMap::new(),
        }
    }
}

/// Normalised order status record, produced both by the user data stream
/// and by REST order lookups.
#[derive(Debug, Clone)]
pub struct OrderStatusUpdate {
    pub client_id: String,
    /// Venue status string, e.g. "NEW", "FILLED"
    pub status: String,
    pub filled_qty: f64,
    pub avg_fill_price: f64,
    pub exchange_id: i64,
}

/// Outbound order submission request.
#[derive(Debug, Clone)]
pub struct NewOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: String,
    pub qty: f64,
    pub price: Option<f64>,
    pub client_id: String,
    pub time_in_force: String,
}

/// Acknowledgement returned by order submission.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub exchange_id: i64,
    pub client_id: String,
    pub status: String,
}

/// The REST operations the OMS and dispatcher need from the exchange.
///
/// Injected as a trait object so the engine core never depends on the
/// concrete HTTP client.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn create_order(&self, order: &NewOrderRequest) -> Result<OrderAck>;
    async fn query_order(&self, symbol: &str, client_id: &str)
        -> Result<Option<OrderStatusUpdate>>;
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;
}

type FillCallback = Box<dyn Fn(&ManagedOrder) + Send + Sync>;

/// Core OMS: tracks every order's exact state via the user data stream.
#[derive(Default)]
pub struct OrderMonitor {
    orders: HashMap<String, ManagedOrder>,
    fill_callbacks: Vec<FillCallback>,
}

impl OrderMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked synchronously for every order reaching
    /// FILLED, in registration order. Callbacks must not re-enter the OMS
    /// for the same order.
    pub fn register_fill_callback(&mut self, cb: FillCallback) {
        self.fill_callbacks.push(cb);
    }

    /// Record an order handed to the gateway.
    pub fn on_submitted(&mut self, mut order: ManagedOrder) {
        order.state = OrderState::PendingSubmit;
        order.submit_at = Instant::now();
        info!(
            client_id = %order.client_id,
            side = order.side.as_str(),
            qty = order.qty,
            symbol = %order.symbol,
            "order submitted"
        );
        if let Some(prev) = self.orders.insert(order.client_id.clone(), order) {
            warn!(client_id = %prev.client_id, "duplicate client order id overwritten");
        }
    }

    /// Apply an ORDER_TRADE_UPDATE (or REST reconciliation) payload.
    pub fn on_user_data_update(&mut self, update: &OrderStatusUpdate) {
        let Some(order) = self.orders.get_mut(&update.client_id) else {
            warn!(client_id = %update.client_id, "update for unknown order, discarded");
            return;
        };

        let Some(new_state) = OrderState::from_exchange_status(&update.status) else {
            warn!(
                client_id = %update.client_id,
                status = %update.status,
                "unknown order status, discarded"
            );
            return;
        };

        let prev_state = order.state;
        if prev_state.is_terminal() {
            warn!(
                client_id = %update.client_id,
                state = ?prev_state,
                status = %update.status,
                "update for terminal order ignored"
            );
            return;
        }
        if !transition_expected(prev_state, new_state) {
            warn!(
                client_id = %update.client_id,
                from = ?prev_state,
                to = ?new_state,
                "transition outside the canonical table"
            );
        }

        order.state = new_state;
        // Fills only ever accumulate
        order.filled_qty = order.filled_qty.max(update.filled_qty);
        if update.avg_fill_price > 0.0 {
            order.avg_fill_price = update.avg_fill_price;
        }
        if update.exchange_id > 0 {
            order.exchange_id = Some(update.exchange_id);
        }
        order.last_update_at = Instant::now();

        info!(
            client_id = %update.client_id,
            from = ?prev_state,
            to = ?new_state,
            filled = order.filled_qty,
            qty = order.qty,
            "order state advanced"
        );

        if new_state == OrderState::Filled {
            let order = self.orders[&update.client_id].clone();
            for cb in &self.fill_callbacks {
                cb(&order);
            }
        }
    }

    /// Mark a cancel request in flight.
    pub fn on_cancel_requested(&mut self, client_id: &str) {
        if let Some(order) = self.orders.get_mut(client_id) {
            if matches!(
                order.state,
                OrderState::New | OrderState::PartiallyFilled
            ) {
                order.state = OrderState::PendingCancel;
                order.last_update_at = Instant::now();
            }
        }
    }

    /// Periodic sweep: reconcile orders stuck without a submission ack.
    ///
    /// A successful REST lookup re-enters the normal state machine; a
    /// failed or empty lookup promotes to ORPHANED and bumps the retry
    /// counter until the orphan becomes permanent.
    pub async fn check_orphans(&mut self, gateway: &dyn OrderGateway) {
        let candidates: Vec<(String, String)> = self
            .orders
            .values()
            .filter(|o| match o.state {
                OrderState::PendingSubmit => o.submit_at.elapsed() >= ORPHAN_TIMEOUT,
                OrderState::Orphaned => o.retry_count < MAX_ORPHAN_RETRIES,
                _ => false,
            })
            .map(|o| (o.client_id.clone(), o.symbol.clone()))
            .collect();

        for (client_id, symbol) in candidates {
            let age = self
                .orders
                .get(&client_id)
                .map(|o| o.submit_at.elapsed().as_secs_f64())
                .unwrap_or_default();
            warn!(client_id = %client_id, age_sec = age, "orphan candidate, querying venue");

            match gateway.query_order(&symbol, &client_id).await {
                Ok(Some(update)) => {
                    self.on_user_data_update(&update);
                }
                Ok(None) => self.mark_orphaned(&client_id, "order unknown to venue"),
                Err(e) => self.mark_orphaned(&client_id, &e.to_string()),
            }
        }
    }

    fn mark_orphaned(&mut self, client_id: &str, cause: &str) {
        let Some(order) = self.orders.get_mut(client_id) else {
            return;
        };
        order.state = OrderState::Orphaned;
        order.retry_count += 1;
        order.last_update_at = Instant::now();
        if order.retry_count >= MAX_ORPHAN_RETRIES {
            error!(client_id = %client_id, cause, "order permanently orphaned");
        } else {
            warn!(
                client_id = %client_id,
                retry = order.retry_count,
                cause,
                "orphan reconciliation failed"
            );
        }
    }

    /// Orders still working at the venue. Terminal orders and permanent
    /// orphans are excluded.
    pub fn get_active_orders(&self, symbol: Option<&str>) -> Vec<&ManagedOrder> {
        self.orders
            .values()
            .filter(|o| !o.state.is_terminal())
            .filter(|o| !(o.state == OrderState::Orphaned && o.retry_count >= MAX_ORPHAN_RETRIES))
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .collect()
    }

    /// Drop terminal orders older than `max_age` from memory.
    pub fn cleanup_terminal(&mut self, max_age: Duration) {
        self.orders
            .retain(|_, o| !(o.state.is_terminal() && o.last_update_at.elapsed() > max_age));
    }

    pub fn get(&self, client_id: &str) -> Option<&ManagedOrder> {
        self.orders.get(client_id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
