//! Centralised configuration loaded from the environment
//!
//! All parameters consumed by the engine are defined here. Loading happens
//! once at startup; every subsystem borrows (or clones an `Arc` of) the
//! resulting `Settings`.

use crate::config::credentials::Credentials;
use crate::error::{EngineError, Result};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Which entry patterns the signal engine is allowed to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    Breakout,
    MeanRev,
    Hybrid,
}

impl EntryMode {
    pub fn allows_breakout(self) -> bool {
        matches!(self, EntryMode::Breakout | EntryMode::Hybrid)
    }

    pub fn allows_mean_rev(self) -> bool {
        matches!(self, EntryMode::MeanRev | EntryMode::Hybrid)
    }
}

impl FromStr for EntryMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "breakout" => Ok(EntryMode::Breakout),
            "mean_rev" => Ok(EntryMode::MeanRev),
            "hybrid" => Ok(EntryMode::Hybrid),
            other => Err(EngineError::Config(format!(
                "ENTRY_MODE must be breakout|mean_rev|hybrid, got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    // ── Exchange access ──────────────────────────────────────────────
    pub credentials: Credentials,
    pub use_testnet: bool,
    pub rest_url: String,
    pub ws_url: String,

    // ── Trading universe ─────────────────────────────────────────────
    pub trading_pairs: Vec<String>,
    /// Quote asset whose wallet balance drives sizing and the breaker
    pub quote_asset: String,
    pub leverage: u32,

    // ── Volume bar aggregator ────────────────────────────────────────
    /// Notional (quote currency) at which a volume bar completes
    pub volume_bar_threshold_usd: f64,
    /// Per-symbol threshold overrides, e.g. "BTCUSDT:50000,ETHUSDT:20000"
    pub volume_bar_threshold_overrides: HashMap<String, f64>,

    // ── Indicator periods ────────────────────────────────────────────
    pub ema_fast: usize,
    pub ema_medium: usize,
    pub ema_trend: usize,
    pub rsi_period: usize,
    pub atr_period: usize,
    pub bb_period: usize,
    pub bb_std: f64,
    pub bb_squeeze_lookback: usize,
    pub vwap_period: usize,

    // ── Entry filters ────────────────────────────────────────────────
    pub rsi_long_min: f64,
    pub rsi_long_max: f64,
    pub rsi_short_min: f64,
    pub rsi_short_max: f64,
    pub rvol_threshold: f64,
    pub min_ema_spread_pct: f64,
    pub min_atr_pct: f64,
    pub entry_mode: EntryMode,

    // ── Risk sizing ──────────────────────────────────────────────────
    pub risk_per_trade_pct: f64,
    pub atr_sl_multiplier: f64,
    pub atr_tp_multiplier: f64,
    pub trailing_activate_atr: f64,
    pub trailing_distance_atr: f64,
    pub max_position_pct: f64,
    /// Smallest order quantity the venue accepts for the traded instruments
    pub min_order_qty: f64,
    /// Decimal places the venue accepts for order quantities
    pub qty_precision: u32,

    // ── Circuit breakers ─────────────────────────────────────────────
    pub max_daily_loss_pct: f64,
    pub max_drawdown_pct: f64,
    pub max_consecutive_losses: u32,
    pub max_daily_trades: u32,
    pub max_latency_ms: f64,
    pub cooldown_bars: u32,
    pub pause_bars_after_streak: u32,

    // ── Rate limiting ────────────────────────────────────────────────
    pub api_weight_limit: u32,
    pub api_weight_window_sec: u64,
}

impl Settings {
    /// Load configuration from environment variables (after dotenv).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // missing .env is fine

        let use_testnet = env::var("BINANCE_USE_TESTNET")
            .unwrap_or_else(|_| "true".into())
            .to_lowercase()
            == "true";

        let rest_url = env::var("BINANCE_FUTURES_REST_URL").unwrap_or_else(|_| {
            if use_testnet {
                "https://testnet.binancefuture.com".into()
            } else {
                "https://fapi.binance.com".into()
            }
        });
        let ws_url = env::var("BINANCE_FUTURES_WS_URL").unwrap_or_else(|_| {
            if use_testnet {
                "wss://stream.binancefuture.com".into()
            } else {
                "wss://fstream.binance.com".into()
            }
        });

        let trading_pairs: Vec<String> = env::var("TRADING_PAIRS")
            .unwrap_or_else(|_| "BTCUSDT".into())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if trading_pairs.is_empty() {
            return Err(EngineError::Config("TRADING_PAIRS is empty".into()));
        }

        let entry_mode: EntryMode = env::var("ENTRY_MODE")
            .unwrap_or_else(|_| "hybrid".into())
            .parse()?;

        Ok(Self {
            credentials: Credentials::from_env(),
            use_testnet,
            rest_url,
            ws_url,
            trading_pairs,
            quote_asset: env::var("QUOTE_ASSET").unwrap_or_else(|_| "USDT".into()),
            leverage: parse_env("LEVERAGE", 10u32)?,

            volume_bar_threshold_usd: parse_env("VOLUME_BAR_THRESHOLD_USD", 50_000.0)?,
            volume_bar_threshold_overrides: parse_threshold_overrides(
                &env::var("VOLUME_BAR_THRESHOLDS").unwrap_or_default(),
            )?,

            ema_fast: parse_env("EMA_FAST", 9usize)?,
            ema_medium: parse_env("EMA_MEDIUM", 21usize)?,
            ema_trend: parse_env("EMA_TREND", 50usize)?,
            rsi_period: parse_env("RSI_PERIOD", 14usize)?,
            atr_period: parse_env("ATR_PERIOD", 14usize)?,
            bb_period: parse_env("BB_PERIOD", 20usize)?,
            bb_std: parse_env("BB_STD", 2.0)?,
            bb_squeeze_lookback: parse_env("BB_SQUEEZE_LOOKBACK", 60usize)?,
            vwap_period: parse_env("VWAP_PERIOD", 20usize)?,

            rsi_long_min: parse_env("RSI_LONG_MIN", 45.0)?,
            rsi_long_max: parse_env("RSI_LONG_MAX", 68.0)?,
            rsi_short_min: parse_env("RSI_SHORT_MIN", 32.0)?,
            rsi_short_max: parse_env("RSI_SHORT_MAX", 55.0)?,
            rvol_threshold: parse_env("RVOL_THRESHOLD", 1.3)?,
            min_ema_spread_pct: parse_env("MIN_EMA_SPREAD_PCT", 0.0005)?,
            min_atr_pct: parse_env("MIN_ATR_PCT", 0.001)?,
            entry_mode,

            risk_per_trade_pct: parse_env("RISK_PER_TRADE_PCT", 0.01)?,
            atr_sl_multiplier: parse_env("ATR_SL_MULTIPLIER", 2.0)?,
            atr_tp_multiplier: parse_env("ATR_TP_MULTIPLIER", 4.0)?,
            trailing_activate_atr: parse_env("TRAILING_ACTIVATE_ATR", 2.0)?,
            trailing_distance_atr: parse_env("TRAILING_DISTANCE_ATR", 1.0)?,
            max_position_pct: parse_env("MAX_POSITION_PCT", 0.25)?,
            min_order_qty: parse_env("MIN_ORDER_QTY", 0.001)?,
            qty_precision: parse_env("QTY_PRECISION", 3u32)?,

            max_daily_loss_pct: parse_env("MAX_DAILY_LOSS_PCT", 0.03)?,
            max_drawdown_pct: parse_env("MAX_DRAWDOWN_PCT", 0.10)?,
            max_consecutive_losses: parse_env("MAX_CONSECUTIVE_LOSSES", 5u32)?,
            max_daily_trades: parse_env("MAX_DAILY_TRADES", 50u32)?,
            max_latency_ms: parse_env("MAX_LATENCY_MS", 500.0)?,
            cooldown_bars: parse_env("COOLDOWN_BARS", 10u32)?,
            pause_bars_after_streak: parse_env("PAUSE_BARS_AFTER_STREAK", 60u32)?,

            api_weight_limit: parse_env("API_WEIGHT_LIMIT", 2400u32)?,
            api_weight_window_sec: parse_env("API_WEIGHT_WINDOW_SEC", 60u64)?,
        })
    }

    /// Capacity of the per-instrument price buffers, sized so the slowest
    /// indicator plus the squeeze lookback always have history to work with.
    pub fn engine_buffer_len(&self) -> usize {
        self.ema_trend.max(self.bb_period).max(self.atr_period) + self.bb_squeeze_lookback + 50
    }

    /// Bar completion threshold for a symbol, honoring overrides.
    pub fn bar_threshold_for(&self, symbol: &str) -> f64 {
        self.volume_bar_threshold_overrides
            .get(symbol)
            .copied()
            .unwrap_or(self.volume_bar_threshold_usd)
    }
}

/// Parse "SYMBOL:notional" pairs separated by commas.
fn parse_threshold_overrides(raw: &str) -> Result<HashMap<String, f64>> {
    let mut overrides = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (symbol, value) = entry.split_once(':').ok_or_else(|| {
            EngineError::Config(format!(
                "VOLUME_BAR_THRESHOLDS entry '{entry}' must be SYMBOL:notional"
            ))
        })?;
        let value: f64 = value.trim().parse().map_err(|e| {
            EngineError::Config(format!("VOLUME_BAR_THRESHOLDS entry '{entry}': {e}"))
        })?;
        overrides.insert(symbol.trim().to_uppercase(), value);
    }
    Ok(overrides)
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| EngineError::Config(format!("Config key {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_mode_parse() {
        assert_eq!("hybrid".parse::<EntryMode>().unwrap(), EntryMode::Hybrid);
        assert_eq!(
            "MEAN_REV".parse::<EntryMode>().unwrap(),
            EntryMode::MeanRev
        );
        assert!("momentum".parse::<EntryMode>().is_err());
    }

    #[test]
    fn test_threshold_overrides_parse() {
        let map = parse_threshold_overrides("BTCUSDT:50000, ethusdt:20000").unwrap();
        assert_eq!(map["BTCUSDT"], 50_000.0);
        assert_eq!(map["ETHUSDT"], 20_000.0);
        assert!(parse_threshold_overrides("").unwrap().is_empty());
        assert!(parse_threshold_overrides("BTCUSDT").is_err());
        assert!(parse_threshold_overrides("BTCUSDT:abc").is_err());
    }

    #[test]
    fn test_entry_mode_gates() {
        assert!(EntryMode::Hybrid.allows_breakout());
        assert!(EntryMode::Hybrid.allows_mean_rev());
        assert!(EntryMode::Breakout.allows_breakout());
        assert!(!EntryMode::Breakout.allows_mean_rev());
        assert!(!EntryMode::MeanRev.allows_breakout());
    }
}
