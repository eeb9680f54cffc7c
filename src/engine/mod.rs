//! Event dispatcher / orchestrator
//!
//! The single consumer of the event queue and the exclusive owner of all
//! per-instrument aggregators and signal engines, the OMS, and the circuit
//! breaker. Processes one event at a time, so per-instrument ordering
//! equals transport arrival order.

pub mod events;

pub use events::{AssetBalance, Event};

use crate::config::Settings;
use crate::market::VolumeBarAggregator;
use crate::oms::{ManagedOrder, NewOrderRequest, OrderGateway, OrderMonitor};
use crate::risk::{dynamic_position_size, round_qty, CircuitBreaker};
use crate::signal::{MarketRegime, SignalEngine};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Wall-clock seconds per bar of cooldown between entries on one symbol.
const COOLDOWN_BAR_SECS: f64 = 0.5;
/// Cadence of the orphan sweep.
const ORPHAN_SWEEP_INTERVAL: Duration = Duration::from_secs(10);
/// Terminal orders older than this are evicted from the OMS table.
const TERMINAL_ORDER_TTL: Duration = Duration::from_secs(3600);
/// Depth of the transport → dispatcher queue.
pub const EVENT_QUEUE_DEPTH: usize = 10_000;

/// The live trading orchestrator.
pub struct LiveEngine {
    cfg: Arc<Settings>,
    gateway: Arc<dyn OrderGateway>,
    shutdown: CancellationToken,

    oms: OrderMonitor,
    breaker: CircuitBreaker,
    aggregators: HashMap<String, VolumeBarAggregator>,
    engines: HashMap<String, SignalEngine>,

    last_entry: HashMap<String, Instant>,
    balance: f64,
}

impl LiveEngine {
    pub fn new(
        cfg: Arc<Settings>,
        gateway: Arc<dyn OrderGateway>,
        shutdown: CancellationToken,
    ) -> Self {
        let mut aggregators = HashMap::new();
        let mut engines = HashMap::new();
        for symbol in &cfg.trading_pairs {
            aggregators.insert(
                symbol.clone(),
                VolumeBarAggregator::new(cfg.bar_threshold_for(symbol)),
            );
            engines.insert(symbol.clone(), SignalEngine::new(Arc::clone(&cfg)));
        }

        let breaker = CircuitBreaker::new(
            cfg.max_daily_loss_pct,
            cfg.max_drawdown_pct,
            cfg.max_consecutive_losses,
            cfg.max_daily_trades,
            cfg.max_latency_ms,
        );

        let mut oms = OrderMonitor::new();
        oms.register_fill_callback(Box::new(|order| {
            info!(
                client_id = %order.client_id,
                symbol = %order.symbol,
                side = order.side.as_str(),
                filled = order.filled_qty,
                avg_price = order.avg_fill_price,
                "order filled"
            );
        }));

        Self {
            cfg,
            gateway,
            shutdown,
            oms,
            breaker,
            aggregators,
            engines,
            last_entry: HashMap::new(),
            balance: 0.0,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    /// Main loop: consume the event queue, sweep orphans, reset daily
    /// counters at 00:00 UTC. Terminates on shutdown or queue closure.
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) {
        self.configure_leverage().await;

        let mut orphan_tick = interval(ORPHAN_SWEEP_INTERVAL);
        orphan_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reset = tokio::time::sleep(duration_until_daily_reset());
        tokio::pin!(reset);

        info!(pairs = ?self.cfg.trading_pairs, "dispatcher running");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                maybe_event = events.recv() => match maybe_event {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        warn!("event queue closed");
                        break;
                    }
                },
                _ = orphan_tick.tick() => {
                    let gateway = Arc::clone(&self.gateway);
                    self.oms.check_orphans(gateway.as_ref()).await;
                    self.oms.cleanup_terminal(TERMINAL_ORDER_TTL);
                }
                () = &mut reset => {
                    self.breaker.reset_daily();
                    reset
                        .as_mut()
                        .reset(tokio::time::Instant::now() + duration_until_daily_reset());
                }
            }
        }
        info!("dispatcher stopped");
    }

    async fn dispatch(&mut self, event: Event) {
        match event {
            Event::AggTrade {
                symbol,
                price,
                qty,
                is_buyer_maker,
                event_time_ms,
                recv,
                ..
            } => {
                self.on_agg_trade(&symbol, price, qty, is_buyer_maker, event_time_ms, recv)
                    .await;
            }
            Event::BookTicker {
                symbol,
                bid_qty,
                ask_qty,
                ..
            } => {
                if let Some(engine) = self.engines.get_mut(&symbol) {
                    engine.update_obi(bid_qty, ask_qty);
                }
            }
            Event::OrderUpdate(update) => {
                self.oms.on_user_data_update(&update);
            }
            Event::AccountUpdate { balances } => {
                self.on_account_update(&balances);
            }
        }
    }

    async fn on_agg_trade(
        &mut self,
        symbol: &str,
        price: f64,
        qty: f64,
        is_buyer_maker: bool,
        event_time_ms: i64,
        recv: Instant,
    ) {
        // Queue dwell time feeds the latency circuit
        self.breaker
            .record_latency(recv.elapsed().as_secs_f64() * 1000.0);

        let Some(aggregator) = self.aggregators.get_mut(symbol) else {
            return;
        };
        let Some(bar) = aggregator.on_trade(price, qty, is_buyer_maker, event_time_ms) else {
            return;
        };

        let Some(engine) = self.engines.get_mut(symbol) else {
            return;
        };
        let Some(signal) = engine.on_volume_bar(&bar) else {
            return;
        };

        let (can_trade, reason) = self.breaker.check();
        if !can_trade {
            warn!(kind = signal.kind.label(), reason = %reason, "signal blocked by circuit breaker");
            return;
        }

        if let Some(last) = self.last_entry.get(symbol) {
            let cooldown = self.cfg.cooldown_bars as f64 * COOLDOWN_BAR_SECS;
            if last.elapsed().as_secs_f64() < cooldown {
                debug!(symbol, "entry suppressed by cooldown");
                return;
            }
        }

        let mut order_qty = dynamic_position_size(
            self.balance,
            signal.atr,
            bar.close,
            self.cfg.risk_per_trade_pct,
            self.cfg.atr_sl_multiplier,
            self.cfg.max_position_pct,
            self.cfg.leverage,
            self.cfg.qty_precision,
        );
        if signal.regime == MarketRegime::Volatile {
            order_qty = round_qty(order_qty * 0.5, self.cfg.qty_precision);
        }
        if order_qty < self.cfg.min_order_qty {
            debug!(symbol, qty = order_qty, "sized below instrument minimum");
            return;
        }

        let client_id = format!("vs-{}", Uuid::new_v4().simple());
        let mut order = ManagedOrder::market(
            client_id.clone(),
            symbol.to_string(),
            signal.side,
            order_qty,
        );
        order
            .tags
            .insert("signal".to_string(), signal.kind.label().to_string());
        order
            .tags
            .insert("entry_reason".to_string(), signal.entry_reason.clone());
        order
            .tags
            .insert("atr".to_string(), format!("{:.6}", signal.atr));
        order
            .tags
            .insert("confidence".to_string(), format!("{:.2}", signal.confidence));

        self.oms.on_submitted(order);

        let request = NewOrderRequest {
            symbol: symbol.to_string(),
            side: signal.side,
            order_type: "MARKET".to_string(),
            qty: order_qty,
            price: None,
            client_id: client_id.clone(),
            time_in_force: "GTC".to_string(),
        };
        // Ack state still comes from the user stream; failures here are
        // reconciled by the orphan sweep.
        if let Err(e) = self.gateway.create_order(&request).await {
            error!(client_id = %client_id, error = %e, "order submission failed");
        }

        self.last_entry.insert(symbol.to_string(), Instant::now());

        info!(
            kind = signal.kind.label(),
            side = signal.side.as_str(),
            symbol,
            qty = order_qty,
            atr = signal.atr,
            regime = ?signal.regime,
            confidence = signal.confidence,
            "signal executed"
        );
    }

    fn on_account_update(&mut self, balances: &[AssetBalance]) {
        for balance in balances {
            if balance.asset == self.cfg.quote_asset {
                self.balance = balance.wallet_balance;
                self.breaker.update_balance(self.balance);
                debug!(balance = self.balance, asset = %balance.asset, "wallet balance updated");
            }
        }
    }

    /// Apply configured leverage per pair at startup. Failures are logged
    /// and tolerated; the venue keeps its previous setting.
    async fn configure_leverage(&self) {
        for symbol in &self.cfg.trading_pairs {
            if let Err(e) = self.gateway.set_leverage(symbol, self.cfg.leverage).await {
                warn!(symbol = %symbol, error = %e, "failed to set leverage");
            }
        }
    }
}

/// Time until the next 00:00:05 UTC daily reset.
fn duration_until_daily_reset() -> Duration {
    let now = chrono::Utc::now();
    let tomorrow = (now + chrono::Duration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 5)
        .expect("valid reset time")
        .and_utc();
    (tomorrow - now)
        .to_std()
        .unwrap_or(Duration::from_secs(24 * 3600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::oms::{OrderAck, OrderStatusUpdate};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopGateway {
        orders: AtomicUsize,
    }

    impl NoopGateway {
        fn new() -> Self {
            Self {
                orders: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OrderGateway for NoopGateway {
        async fn create_order(&self, order: &NewOrderRequest) -> Result<OrderAck> {
            self.orders.fetch_add(1, Ordering::SeqCst);
            Ok(OrderAck {
                exchange_id: 1,
                client_id: order.client_id.clone(),
                status: "NEW".to_string(),
            })
        }

        async fn query_order(
            &self,
            _symbol: &str,
            _client_id: &str,
        ) -> Result<Option<OrderStatusUpdate>> {
            Ok(None)
        }

        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<()> {
            Ok(())
        }
    }

    fn engine() -> LiveEngine {
        let cfg = Arc::new(Settings::from_env().expect("default settings"));
        LiveEngine::new(
            cfg,
            Arc::new(NoopGateway::new()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_account_update_drives_balance_and_breaker() {
        let mut engine = engine();
        engine
            .dispatch(Event::AccountUpdate {
                balances: vec![
                    AssetBalance {
                        asset: "BNB".to_string(),
                        wallet_balance: 3.0,
                    },
                    AssetBalance {
                        asset: "USDT".to_string(),
                        wallet_balance: 10_000.0,
                    },
                ],
            })
            .await;

        assert_eq!(engine.balance(), 10_000.0);
        assert_eq!(engine.breaker().state().current_balance, 10_000.0);
        assert_eq!(engine.breaker().state().peak_balance, 10_000.0);
    }

    #[tokio::test]
    async fn test_agg_trade_for_unknown_symbol_is_ignored() {
        let mut engine = engine();
        engine
            .dispatch(Event::AggTrade {
                symbol: "DOGEUSDT".to_string(),
                price: 0.1,
                qty: 100.0,
                is_buyer_maker: false,
                trade_id: 1,
                event_time_ms: 1,
                recv: Instant::now(),
            })
            .await;
        // No aggregator, no state change, no panic
        assert_eq!(engine.balance(), 0.0);
    }

    #[tokio::test]
    async fn test_trades_flow_through_aggregator_without_signal() {
        let mut engine = engine();
        // One completed bar is far inside warmup: no order placed
        for i in 0..20 {
            engine
                .dispatch(Event::AggTrade {
                    symbol: "BTCUSDT".to_string(),
                    price: 100.0,
                    qty: 100.0,
                    is_buyer_maker: i % 2 == 0,
                    trade_id: i,
                    event_time_ms: i as i64,
                    recv: Instant::now(),
                })
                .await;
        }
        assert!(engine.oms.is_empty());
        // Latency samples were recorded for every trade
        assert!(engine.breaker().state().avg_latency_ms() >= 0.0);
    }

    #[test]
    fn test_daily_reset_duration_bounds() {
        let d = duration_until_daily_reset();
        assert!(d > Duration::from_secs(0));
        assert!(d <= Duration::from_secs(24 * 3600 + 5));
    }
}
