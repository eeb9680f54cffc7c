//! Market regime classification
//!
//! Coarse regime label from the ATR percentile rank plus EMA dispersion.
//! CHOPPY halts entries entirely, VOLATILE halves position size, TRENDING
//! trades at full size.

/// Coarse market regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketRegime {
    /// Low volatility with converged EMAs: halt trading
    Choppy,
    /// Normal conditions
    Trending,
    /// ATR in its top decile: reduce size 50%
    Volatile,
}

/// Minimum ATR history before the classifier trusts its percentile rank.
const MIN_ATR_SAMPLES: usize = 50;
/// Percentile window over the most recent ATR values.
const ATR_PERCENTILE_WINDOW: usize = 100;

/// Classify the regime from recent ATR history and the three trend EMAs.
///
/// `atr_history` is ordered oldest-first; the current ATR is its last
/// element. Fewer than 50 samples defaults to TRENDING.
pub fn detect_regime(
    atr_history: &[f64],
    close: f64,
    ema_fast: f64,
    ema_medium: f64,
    ema_trend: f64,
) -> MarketRegime {
    if atr_history.len() < MIN_ATR_SAMPLES {
        return MarketRegime::Trending;
    }

    let current_atr = atr_history[atr_history.len() - 1];
    let start = atr_history.len().saturating_sub(ATR_PERCENTILE_WINDOW);
    let mut sorted: Vec<f64> = atr_history[start..].to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = sorted.partition_point(|&x| x < current_atr);
    let pctile = rank as f64 / sorted.len() as f64;

    // EMA convergence: all three within 0.05% of price reads as chop
    let price = if close > 0.0 { close } else { 1.0 };
    let max_ema = ema_fast.max(ema_medium).max(ema_trend);
    let min_ema = ema_fast.min(ema_medium).min(ema_trend);
    let ema_range_pct = (max_ema - min_ema) / price;

    if pctile < 0.25 && ema_range_pct < 0.0005 {
        return MarketRegime::Choppy;
    }
    if pctile > 0.90 {
        return MarketRegime::Volatile;
    }
    MarketRegime::Trending
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_history_defaults_to_trending() {
        let hist = vec![1.0; 49];
        assert_eq!(
            detect_regime(&hist, 100.0, 100.0, 100.0, 100.0),
            MarketRegime::Trending
        );
    }

    #[test]
    fn test_flat_atr_with_converged_emas_is_choppy() {
        // 50 identical samples: percentile rank of the current value is 0
        let hist = vec![2.0; 50];
        assert_eq!(
            detect_regime(&hist, 100.0, 100.0, 100.0, 100.0),
            MarketRegime::Choppy
        );
    }

    #[test]
    fn test_atr_spike_is_volatile() {
        // Current ATR strictly above every other sample: rank 99/100
        let mut hist = vec![1.0; 99];
        hist.push(5.0);
        assert_eq!(
            detect_regime(&hist, 100.0, 100.0, 100.0, 100.0),
            MarketRegime::Volatile
        );
    }

    #[test]
    fn test_low_atr_with_spread_emas_is_trending() {
        // Percentile is low but EMAs are dispersed, so not choppy
        let hist = vec![2.0; 60];
        assert_eq!(
            detect_regime(&hist, 100.0, 101.0, 100.0, 99.0),
            MarketRegime::Trending
        );
    }

    #[test]
    fn test_midrange_atr_is_trending() {
        let hist: Vec<f64> = (0..100).map(|i| 1.0 + (i % 10) as f64).collect();
        let regime = detect_regime(&hist, 100.0, 101.0, 100.5, 100.0);
        assert_eq!(regime, MarketRegime::Trending);
    }
}
