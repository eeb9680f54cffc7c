//! Signal generation
//!
//! Processes completed volume bars through an ordered filter pipeline:
//! warmup, indicators, regime, volatility floor, liquidity-sweep probe,
//! trend bias, pattern detection, RSI and volume confirmation. The first
//! failing layer ends the bar with no signal.

pub mod cvd;
pub mod regime;
pub mod sweep;

pub use cvd::CvdTracker;
pub use regime::{detect_regime, MarketRegime};
pub use sweep::{LiquiditySweepDetector, Sweep};

use crate::config::Settings;
use crate::market::{indicators, VolumeBar};
use std::sync::Arc;
use tracing::debug;

/// Trailing window for the relative-volume baseline.
const RVOL_PERIOD: usize = 20;
/// Capacity of the ATR history ring feeding the regime classifier.
const ATR_HISTORY_LEN: usize = 200;
/// OBI magnitude beyond which the book is considered aligned with a side.
const OBI_AGREEMENT: f64 = 0.3;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Which pattern produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    BreakoutLong,
    BreakoutShort,
    MeanRevLong,
    MeanRevShort,
    SweepLong,
    SweepShort,
}

impl SignalKind {
    pub fn is_long(self) -> bool {
        matches!(
            self,
            SignalKind::BreakoutLong | SignalKind::MeanRevLong | SignalKind::SweepLong
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            SignalKind::BreakoutLong => "breakout_long",
            SignalKind::BreakoutShort => "breakout_short",
            SignalKind::MeanRevLong => "mean_rev_long",
            SignalKind::MeanRevShort => "mean_rev_short",
            SignalKind::SweepLong => "sweep_long",
            SignalKind::SweepShort => "sweep_short",
        }
    }
}

/// A trade signal emitted for a completed volume bar.
#[derive(Debug, Clone)]
pub struct Signal {
    pub kind: SignalKind,
    pub regime: MarketRegime,
    pub side: Side,
    /// Conviction in [0, 1]
    pub confidence: f64,
    /// ATR at signal time, used for sizing and stops
    pub atr: f64,
    pub entry_reason: String,
}

/// Fixed-capacity ring of f64 samples with ordered linearisation.
struct Ring {
    buf: Vec<f64>,
    head: usize,
    len: usize,
}

impl Ring {
    fn new(cap: usize) -> Self {
        Self {
            buf: vec![0.0; cap],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, v: f64) {
        self.buf[self.head] = v;
        self.head = (self.head + 1) % self.buf.len();
        self.len = (self.len + 1).min(self.buf.len());
    }

    /// Copy contents oldest-first into `out` without reallocating.
    fn copy_ordered(&self, out: &mut Vec<f64>) {
        out.clear();
        if self.len < self.buf.len() {
            out.extend_from_slice(&self.buf[..self.len]);
        } else {
            out.extend_from_slice(&self.buf[self.head..]);
            out.extend_from_slice(&self.buf[..self.head]);
        }
    }
}

/// Snapshot of the previous bar's derived values, for cross detection.
#[derive(Default)]
struct PrevBar {
    ema_fast: f64,
    ema_medium: f64,
    close: f64,
    bb_upper: f64,
    bb_lower: f64,
    was_squeezed: bool,
}

/// Per-instrument signal engine.
pub struct SignalEngine {
    cfg: Arc<Settings>,

    closes: Ring,
    highs: Ring,
    lows: Ring,
    volumes: Ring,
    atr_history: Ring,
    bar_count: u64,

    // Preallocated linearisation scratch, sized once at construction
    scratch_closes: Vec<f64>,
    scratch_highs: Vec<f64>,
    scratch_lows: Vec<f64>,
    scratch_volumes: Vec<f64>,
    scratch_atr: Vec<f64>,

    prev: PrevBar,
    sweep_detector: LiquiditySweepDetector,
    pub cvd: CvdTracker,
    latest_obi: f64,
}

impl SignalEngine {
    pub fn new(cfg: Arc<Settings>) -> Self {
        let buf_len = cfg.engine_buffer_len();
        Self {
            cfg,
            closes: Ring::new(buf_len),
            highs: Ring::new(buf_len),
            lows: Ring::new(buf_len),
            volumes: Ring::new(buf_len),
            atr_history: Ring::new(ATR_HISTORY_LEN),
            bar_count: 0,
            scratch_closes: Vec::with_capacity(buf_len),
            scratch_highs: Vec::with_capacity(buf_len),
            scratch_lows: Vec::with_capacity(buf_len),
            scratch_volumes: Vec::with_capacity(buf_len),
            scratch_atr: Vec::with_capacity(ATR_HISTORY_LEN),
            prev: PrevBar::default(),
            sweep_detector: LiquiditySweepDetector::default(),
            cvd: CvdTracker::default(),
            latest_obi: 0.0,
        }
    }

    /// Refresh the top-of-book imbalance from a book-ticker update.
    pub fn update_obi(&mut self, bid_qty: f64, ask_qty: f64) {
        self.latest_obi = indicators::order_book_imbalance(bid_qty, ask_qty);
    }

    /// Process a completed volume bar; at most one signal per bar.
    pub fn on_volume_bar(&mut self, bar: &VolumeBar) -> Option<Signal> {
        self.closes.push(bar.close);
        self.highs.push(bar.high);
        self.lows.push(bar.low);
        self.volumes.push(bar.volume);
        self.bar_count += 1;
        self.cvd.push(bar.cvd());

        // Warmup: the squeeze lookback needs a full bollinger history
        if (self.bar_count as usize) < self.cfg.bb_squeeze_lookback + self.cfg.bb_period {
            return None;
        }

        self.closes.copy_ordered(&mut self.scratch_closes);
        self.highs.copy_ordered(&mut self.scratch_highs);
        self.lows.copy_ordered(&mut self.scratch_lows);
        self.volumes.copy_ordered(&mut self.scratch_volumes);

        let cfg = &self.cfg;
        let c = &self.scratch_closes;
        let h = &self.scratch_highs;
        let l = &self.scratch_lows;
        let v = &self.scratch_volumes;

        let ema_f = indicators::ema(c, cfg.ema_fast);
        let ema_m = indicators::ema(c, cfg.ema_medium);
        let ema_t = indicators::ema(c, cfg.ema_trend);
        let vwap = indicators::vwap(c, v, cfg.vwap_period);
        let rsi = indicators::rsi(c, cfg.rsi_period);
        let atr = indicators::atr(h, l, c, cfg.atr_period);
        let (bb_u, _bb_mid, bb_l) = indicators::bollinger(c, cfg.bb_period, cfg.bb_std);
        let squeezed = indicators::is_squeeze(c, cfg.bb_period, cfg.bb_std, cfg.bb_squeeze_lookback);
        let rvol = indicators::rvol(v, RVOL_PERIOD);

        self.atr_history.push(atr);
        self.atr_history.copy_ordered(&mut self.scratch_atr);

        let close = bar.close;
        let regime = detect_regime(&self.scratch_atr, close, ema_f, ema_m, ema_t);
        if regime == MarketRegime::Choppy {
            self.save_prev(ema_f, ema_m, close, bb_u, bb_l, squeezed);
            return None;
        }

        // Volatility floor: skip markets too quiet to cover costs
        if close > 0.0 && atr / close < cfg.min_atr_pct {
            self.save_prev(ema_f, ema_m, close, bb_u, bb_l, squeezed);
            return None;
        }

        // Adversarial probe: sweeps fire immediately, skipping the
        // trend/RSI/volume confirmations below
        let n = v.len();
        let avg_vol = if n >= RVOL_PERIOD {
            v[n - RVOL_PERIOD..].iter().sum::<f64>() / RVOL_PERIOD as f64
        } else {
            0.0
        };
        if let Some(sw) = self.sweep_detector.detect(h, l, c, v, avg_vol) {
            let (kind, side) = match sw {
                Sweep::Bullish => (SignalKind::SweepLong, Side::Buy),
                Sweep::Bearish => (SignalKind::SweepShort, Side::Sell),
            };
            let sig = Signal {
                kind,
                regime,
                side,
                confidence: 0.7,
                atr,
                entry_reason: format!("liquidity_sweep_{}", side.as_str().to_lowercase()),
            };
            self.save_prev(ema_f, ema_m, close, bb_u, bb_l, squeezed);
            return Some(sig);
        }

        // Layer 1: trend bias
        let spread_ok = close > 0.0 && (ema_f - ema_m).abs() / close >= cfg.min_ema_spread_pct;
        let bias_long = close > vwap && close > ema_t && ema_f > ema_m && spread_ok;
        let bias_short = close < vwap && close < ema_t && ema_f < ema_m && spread_ok;

        if !(bias_long || bias_short) {
            self.save_prev(ema_f, ema_m, close, bb_u, bb_l, squeezed);
            return None;
        }

        // Layer 2: pattern detection
        let Some(kind) = self.detect_pattern(close, bias_long, bias_short, ema_f, ema_m, bb_u, bb_l)
        else {
            self.save_prev(ema_f, ema_m, close, bb_u, bb_l, squeezed);
            return None;
        };

        // Layer 3: RSI confirmation
        let rsi_ok = if kind.is_long() {
            cfg.rsi_long_min <= rsi && rsi <= cfg.rsi_long_max
        } else {
            cfg.rsi_short_min <= rsi && rsi <= cfg.rsi_short_max
        };
        if !rsi_ok {
            self.save_prev(ema_f, ema_m, close, bb_u, bb_l, squeezed);
            return None;
        }

        // Layer 4: volume confirmation
        if rvol < cfg.rvol_threshold {
            self.save_prev(ema_f, ema_m, close, bb_u, bb_l, squeezed);
            return None;
        }

        let is_long = kind.is_long();
        let mut confidence = 0.6;
        if (self.latest_obi > OBI_AGREEMENT && is_long)
            || (self.latest_obi < -OBI_AGREEMENT && !is_long)
        {
            confidence += 0.15;
        }

        debug!(
            kind = kind.label(),
            rsi,
            rvol,
            obi = self.latest_obi,
            confidence,
            "signal layers passed"
        );

        let sig = Signal {
            kind,
            regime,
            side: if is_long { Side::Buy } else { Side::Sell },
            confidence,
            atr,
            entry_reason: kind.label().to_string(),
        };
        self.save_prev(ema_f, ema_m, close, bb_u, bb_l, squeezed);
        Some(sig)
    }

    /// EMA crossover + Bollinger breakout / mean-reversion detection.
    /// Both the squeeze precondition and the cross come from the previous
    /// bar's snapshot, so a breakout fires on the bar that leaves the
    /// squeeze, not the one that is still inside it.
    #[allow(clippy::too_many_arguments)]
    fn detect_pattern(
        &self,
        close: f64,
        bias_long: bool,
        bias_short: bool,
        ema_f: f64,
        ema_m: f64,
        bb_u: f64,
        bb_l: f64,
    ) -> Option<SignalKind> {
        let prev = &self.prev;
        let had_cross_up =
            prev.ema_fast > 0.0 && prev.ema_fast <= prev.ema_medium && ema_f > ema_m;
        let had_cross_down =
            prev.ema_fast > 0.0 && prev.ema_fast >= prev.ema_medium && ema_f < ema_m;

        if self.cfg.entry_mode.allows_breakout() && prev.was_squeezed {
            if bias_long && close > bb_u && (had_cross_up || ema_f > ema_m) {
                return Some(SignalKind::BreakoutLong);
            }
            if bias_short && close < bb_l && (had_cross_down || ema_f < ema_m) {
                return Some(SignalKind::BreakoutShort);
            }
        }

        if self.cfg.entry_mode.allows_mean_rev() && prev.close > 0.0 && prev.bb_lower > 0.0 {
            if bias_long && prev.close < prev.bb_lower && close > bb_l && had_cross_up {
                return Some(SignalKind::MeanRevLong);
            }
            if bias_short && prev.close > prev.bb_upper && close < bb_u && had_cross_down {
                return Some(SignalKind::MeanRevShort);
            }
        }

        None
    }

    fn save_prev(
        &mut self,
        ema_f: f64,
        ema_m: f64,
        close: f64,
        bb_u: f64,
        bb_l: f64,
        squeezed: bool,
    ) {
        self.prev = PrevBar {
            ema_fast: ema_f,
            ema_medium: ema_m,
            close,
            bb_upper: bb_u,
            bb_lower: bb_l,
            was_squeezed: squeezed,
        };
    }
}
