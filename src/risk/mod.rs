//! Risk management: dynamic position sizing and hard circuit breakers.
//!
//! The circuit breaker is the single gate checked before every potential
//! entry. Once tripped it stays latched until the daily reset, regardless
//! of whether the underlying condition clears.

use tracing::{error, info};

/// Latency ring bounds: trim to the newest 100 once 200 samples accumulate.
const LATENCY_RING_MAX: usize = 200;
const LATENCY_RING_KEEP: usize = 100;
/// Number of most recent latency samples averaged by the latency circuit.
const LATENCY_AVG_WINDOW: usize = 50;

/// Mutable counters behind the circuit breaker.
#[derive(Debug, Default)]
pub struct BreakerState {
    pub daily_pnl: f64,
    pub daily_trades: u32,
    pub consecutive_losses: u32,
    pub peak_balance: f64,
    pub current_balance: f64,
    pub session_start_ts: i64,
    latency_samples: Vec<f64>,
}

impl BreakerState {
    /// Mean of the most recent 50 latency samples, 0 when empty.
    pub fn avg_latency_ms(&self) -> f64 {
        if self.latency_samples.is_empty() {
            return 0.0;
        }
        let start = self.latency_samples.len().saturating_sub(LATENCY_AVG_WINDOW);
        let window = &self.latency_samples[start..];
        window.iter().sum::<f64>() / window.len() as f64
    }
}

/// Hard circuit breakers that halt all trading when triggered.
///
/// Must be checked before every new order submission.
pub struct CircuitBreaker {
    max_daily_loss_pct: f64,
    max_drawdown_pct: f64,
    max_consecutive_losses: u32,
    max_daily_trades: u32,
    max_latency_ms: f64,
    state: BreakerState,
    halted: bool,
    halt_reason: String,
}

impl CircuitBreaker {
    pub fn new(
        max_daily_loss_pct: f64,
        max_drawdown_pct: f64,
        max_consecutive_losses: u32,
        max_daily_trades: u32,
        max_latency_ms: f64,
    ) -> Self {
        Self {
            max_daily_loss_pct,
            max_drawdown_pct,
            max_consecutive_losses,
            max_daily_trades,
            max_latency_ms,
            state: BreakerState::default(),
            halted: false,
            halt_reason: String::new(),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn halt_reason(&self) -> &str {
        &self.halt_reason
    }

    pub fn state(&self) -> &BreakerState {
        &self.state
    }

    /// Evaluate every circuit in order; returns `(can_trade, reason)`.
    ///
    /// A previous halt latches: once tripped, `check` keeps returning the
    /// stored reason until [`reset_daily`](Self::reset_daily).
    pub fn check(&mut self) -> (bool, String) {
        if self.halted {
            return (false, self.halt_reason.clone());
        }

        let s = &self.state;

        // 1. Daily loss limit
        if s.peak_balance > 0.0 {
            let daily_loss = -s.daily_pnl / s.peak_balance;
            if daily_loss >= self.max_daily_loss_pct {
                return self.halt(format!("DAILY_LOSS:{:.1}%", daily_loss * 100.0));
            }
        }

        // 2. Max drawdown from peak
        if s.peak_balance > 0.0 && s.current_balance > 0.0 {
            let dd = (s.peak_balance - s.current_balance) / s.peak_balance;
            if dd >= self.max_drawdown_pct {
                return self.halt(format!("MAX_DD:{:.1}%", dd * 100.0));
            }
        }

        // 3. Consecutive losses
        if s.consecutive_losses >= self.max_consecutive_losses {
            return self.halt(format!("STREAK:{}", s.consecutive_losses));
        }

        // 4. Daily trade count
        if s.daily_trades >= self.max_daily_trades {
            return self.halt(format!("TRADE_LIMIT:{}", s.daily_trades));
        }

        // 5. Latency degradation
        let avg_latency = s.avg_latency_ms();
        if avg_latency > self.max_latency_ms {
            return self.halt(format!("LATENCY:{:.0}ms", avg_latency));
        }

        (true, "OK".to_string())
    }

    fn halt(&mut self, reason: String) -> (bool, String) {
        self.halted = true;
        self.halt_reason = reason.clone();
        error!(reason = %reason, "circuit breaker HALTED");
        (false, reason)
    }

    /// Record a closed trade's realized PnL.
    pub fn record_trade(&mut self, pnl: f64) {
        self.state.daily_pnl += pnl;
        self.state.daily_trades += 1;
        if pnl > 0.0 {
            self.state.consecutive_losses = 0;
        } else {
            self.state.consecutive_losses += 1;
        }
    }

    /// Update the wallet balance, ratcheting the peak.
    pub fn update_balance(&mut self, balance: f64) {
        self.state.current_balance = balance;
        if balance > self.state.peak_balance {
            self.state.peak_balance = balance;
        }
    }

    /// Append a latency sample, trimming the ring when it overflows.
    pub fn record_latency(&mut self, latency_ms: f64) {
        self.state.latency_samples.push(latency_ms);
        if self.state.latency_samples.len() > LATENCY_RING_MAX {
            let drop = self.state.latency_samples.len() - LATENCY_RING_KEEP;
            self.state.latency_samples.drain(..drop);
        }
    }

    /// Reset daily counters and clear the latch. Called at 00:00 UTC.
    pub fn reset_daily(&mut self) {
        self.state.daily_pnl = 0.0;
        self.state.daily_trades = 0;
        self.state.consecutive_losses = 0;
        self.halted = false;
        self.halt_reason.clear();
        self.state.session_start_ts = chrono::Utc::now().timestamp();
        info!("circuit breaker daily reset");
    }
}

/// Risk-based position sizing.
///
/// `size = (balance × risk_pct) / (atr × sl_mult)`, capped at
/// `max_position_pct` of leveraged balance and rounded down to
/// `qty_precision` decimals. Degenerate inputs size to zero.
#[allow(clippy::too_many_arguments)]
pub fn dynamic_position_size(
    balance: f64,
    atr: f64,
    price: f64,
    risk_pct: f64,
    sl_atr_mult: f64,
    max_position_pct: f64,
    leverage: u32,
    qty_precision: u32,
) -> f64 {
    if atr <= 0.0 || price <= 0.0 {
        return 0.0;
    }
    let risk_amount = balance * risk_pct;
    let stop_distance = atr * sl_atr_mult;
    if stop_distance <= 0.0 {
        return 0.0;
    }
    let raw_qty = risk_amount / stop_distance;
    let max_qty = (balance * max_position_pct * leverage as f64) / price;
    round_qty(raw_qty.min(max_qty), qty_precision)
}

/// Fractional Kelly risk budget: `f* = (p·b − q)/b` scaled by `fraction`,
/// converted to a currency amount and capped at `max_risk_pct` of balance.
pub fn kelly_risk_amount(
    balance: f64,
    win_rate: f64,
    avg_win: f64,
    avg_loss: f64,
    fraction: f64,
    max_risk_pct: f64,
) -> f64 {
    if avg_loss <= 0.0 || win_rate <= 0.0 {
        return 0.0;
    }
    let b = avg_win / avg_loss;
    let q = 1.0 - win_rate;
    let kelly_f = ((win_rate * b - q) / b).clamp(0.0, 1.0) * fraction;
    balance * kelly_f.min(max_risk_pct)
}

/// Round a quantity to the instrument's size precision.
pub fn round_qty(qty: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (qty * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        // 3% daily loss, 10% drawdown, 5 losses, 50 trades, 500ms
        CircuitBreaker::new(0.03, 0.10, 5, 50, 500.0)
    }

    #[test]
    fn test_daily_loss_halts_and_latches() {
        let mut cb = breaker();
        cb.update_balance(10_000.0);
        cb.update_balance(9_600.0);
        cb.record_trade(-400.0);

        let (ok, reason) = cb.check();
        assert!(!ok);
        assert_eq!(reason, "DAILY_LOSS:4.0%");

        // Latches with the same reason even though counters are untouched
        let (ok, reason) = cb.check();
        assert!(!ok);
        assert!(!reason.is_empty());

        cb.reset_daily();
        let (ok, reason) = cb.check();
        assert!(ok);
        assert_eq!(reason, "OK");
    }

    #[test]
    fn test_drawdown_halts() {
        let mut cb = breaker();
        cb.update_balance(10_000.0);
        cb.update_balance(8_900.0);
        let (ok, reason) = cb.check();
        assert!(!ok);
        assert!(reason.starts_with("MAX_DD:11.0%"), "{reason}");
    }

    #[test]
    fn test_loss_streak_halts_and_win_resets() {
        let mut cb = breaker();
        for _ in 0..4 {
            cb.record_trade(-10.0);
        }
        assert!(cb.check().0);
        cb.record_trade(25.0); // streak resets
        assert_eq!(cb.state().consecutive_losses, 0);
        for _ in 0..5 {
            cb.record_trade(-10.0);
        }
        let (ok, reason) = cb.check();
        assert!(!ok);
        assert_eq!(reason, "STREAK:5");
    }

    #[test]
    fn test_trade_limit_halts() {
        let mut cb = breaker();
        for _ in 0..50 {
            cb.record_trade(1.0); // winners: no loss streak, no daily loss
        }
        let (ok, reason) = cb.check();
        assert!(!ok);
        assert_eq!(reason, "TRADE_LIMIT:50");
    }

    #[test]
    fn test_latency_circuit_uses_recent_average() {
        let mut cb = breaker();
        // Old fast samples pushed out of the 50-sample average by slow ones
        for _ in 0..100 {
            cb.record_latency(10.0);
        }
        assert!(cb.check().0);
        for _ in 0..50 {
            cb.record_latency(900.0);
        }
        let (ok, reason) = cb.check();
        assert!(!ok);
        assert_eq!(reason, "LATENCY:900ms");
    }

    #[test]
    fn test_latency_ring_trims_to_last_100() {
        let mut cb = breaker();
        for i in 0..201 {
            cb.record_latency(i as f64);
        }
        assert_eq!(cb.state.latency_samples.len(), LATENCY_RING_KEEP);
        assert_eq!(cb.state.latency_samples[0], 101.0);
    }

    #[test]
    fn test_breaker_clean_state_allows() {
        let mut cb = breaker();
        cb.update_balance(10_000.0);
        let (ok, reason) = cb.check();
        assert!(ok);
        assert_eq!(reason, "OK");
    }

    #[test]
    fn test_position_size_risk_formula() {
        // balance 10_000, risk 1% = 100; stop = 2 * ATR(50) = 100 → 1.0
        let qty = dynamic_position_size(10_000.0, 50.0, 40_000.0, 0.01, 2.0, 0.25, 10, 3);
        assert!((qty - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_position_size_capped_by_leverage() {
        // raw = (10_000*0.01)/(0.2) = 500; cap = 10_000*0.25*10/100 = 250
        let qty = dynamic_position_size(10_000.0, 0.1, 100.0, 0.01, 2.0, 0.25, 10, 3);
        assert!((qty - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_position_size_degenerate_inputs() {
        assert_eq!(
            dynamic_position_size(10_000.0, 0.0, 100.0, 0.01, 2.0, 0.25, 10, 3),
            0.0
        );
        assert_eq!(
            dynamic_position_size(10_000.0, 1.0, 0.0, 0.01, 2.0, 0.25, 10, 3),
            0.0
        );
    }

    #[test]
    fn test_position_size_rounding() {
        let qty = dynamic_position_size(1_000.0, 3.0, 40_000.0, 0.01, 2.0, 0.25, 10, 3);
        // raw = 10/6 = 1.6666…, rounded to 3 decimals
        assert!((qty - 1.667).abs() < 1e-9);
    }

    #[test]
    fn test_kelly_caps_at_max_risk() {
        let amt = kelly_risk_amount(10_000.0, 0.6, 2.0, 1.0, 0.25, 0.02);
        assert!(amt <= 200.0 + 1e-9);
        assert!(amt > 0.0);
    }

    #[test]
    fn test_kelly_degenerate() {
        assert_eq!(kelly_risk_amount(10_000.0, 0.0, 2.0, 1.0, 0.25, 0.02), 0.0);
        assert_eq!(kelly_risk_amount(10_000.0, 0.6, 2.0, 0.0, 0.25, 0.02), 0.0);
    }
}
