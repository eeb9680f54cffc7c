//! Volume bar aggregation
//!
//! Builds OHLCV bars whose closure condition is cumulative notional
//! (price × qty) rather than wall-clock time, so every bar carries roughly
//! the same amount of traded value regardless of market pace.

use tracing::debug;

/// A completed (or in-progress) volume bar.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Total base-asset volume
    pub volume: f64,
    /// Volume where the aggressor was the buyer
    pub buy_volume: f64,
    /// Volume where the aggressor was the seller
    pub sell_volume: f64,
    pub tick_count: u64,
    /// Exchange event time of the first trade (ms)
    pub ts_start: i64,
    /// Exchange event time of the last trade (ms)
    pub ts_end: i64,
}

impl Default for VolumeBar {
    /// An empty bar awaiting its first trade. High/low start at the
    /// opposite extremes so the first print sets both.
    fn default() -> Self {
        Self {
            open: 0.0,
            high: f64::MIN,
            low: f64::MAX,
            close: 0.0,
            volume: 0.0,
            buy_volume: 0.0,
            sell_volume: 0.0,
            tick_count: 0,
            ts_start: 0,
            ts_end: 0,
        }
    }
}

impl VolumeBar {
    /// Cumulative volume delta for this bar.
    pub fn cvd(&self) -> f64 {
        self.buy_volume - self.sell_volume
    }
}

/// Aggregates trades into volume bars of fixed notional size.
///
/// Trades must arrive in per-instrument event-time order; the aggregator
/// never drops or reorders them.
pub struct VolumeBarAggregator {
    threshold_usd: f64,
    current: VolumeBar,
    accumulated_notional: f64,
}

impl VolumeBarAggregator {
    pub fn new(threshold_usd: f64) -> Self {
        Self {
            threshold_usd,
            current: VolumeBar::default(),
            accumulated_notional: 0.0,
        }
    }

    /// Fold one trade into the current bar.
    ///
    /// Returns the completed bar once accumulated notional reaches the
    /// threshold, resetting internal state for the next bar.
    pub fn on_trade(
        &mut self,
        price: f64,
        qty: f64,
        is_buyer_maker: bool,
        ts: i64,
    ) -> Option<VolumeBar> {
        let notional = price * qty;

        if self.current.tick_count == 0 {
            self.current.open = price;
            self.current.high = price;
            self.current.low = price;
            self.current.ts_start = ts;
        }

        self.current.high = self.current.high.max(price);
        self.current.low = self.current.low.min(price);
        self.current.close = price;
        self.current.volume += qty;
        self.current.tick_count += 1;
        self.current.ts_end = ts;

        // `is_buyer_maker` means the aggressor hit the bid
        if is_buyer_maker {
            self.current.sell_volume += qty;
        } else {
            self.current.buy_volume += qty;
        }

        self.accumulated_notional += notional;

        if self.accumulated_notional >= self.threshold_usd {
            // Threshold breached: close out and start fresh
            let completed = std::mem::take(&mut self.current);
            debug!(
                notional = self.accumulated_notional,
                ticks = completed.tick_count,
                close = completed.close,
                "volume bar complete"
            );
            self.accumulated_notional = 0.0;
            return Some(completed);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_completes_at_threshold() {
        // $50k threshold; third trade pushes notional to exactly 50_000
        let mut agg = VolumeBarAggregator::new(50_000.0);
        assert!(agg.on_trade(100.0, 10.0, false, 1).is_none());
        assert!(agg.on_trade(100.0, 100.0, false, 2).is_none());
        let bar = agg.on_trade(100.0, 300.0, true, 3).expect("bar complete");

        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 100.0);
        assert_eq!(bar.low, 100.0);
        assert_eq!(bar.close, 100.0);
        assert_eq!(bar.volume, 410.0);
        assert_eq!(bar.buy_volume, 110.0);
        assert_eq!(bar.sell_volume, 300.0);
        assert_eq!(bar.tick_count, 3);
        assert_eq!(bar.ts_start, 1);
        assert_eq!(bar.ts_end, 3);

        // Fourth trade starts a fresh bar
        assert!(agg.on_trade(100.0, 200.0, false, 4).is_none());
    }

    #[test]
    fn test_volume_conservation_across_bars() {
        let mut agg = VolumeBarAggregator::new(1_000.0);
        let trades = [
            (10.0, 30.0, false),
            (11.0, 40.0, true),
            (12.0, 50.0, false),
            (9.0, 20.0, true),
            (10.0, 80.0, false),
        ];
        let mut barred = 0.0;
        let mut fed = 0.0;
        for (i, &(p, q, m)) in trades.iter().enumerate() {
            fed += q;
            if let Some(bar) = agg.on_trade(p, q, m, i as i64) {
                assert!((bar.buy_volume + bar.sell_volume - bar.volume).abs() < 1e-9);
                assert!(bar.low <= bar.open && bar.open <= bar.high);
                assert!(bar.low <= bar.close && bar.close <= bar.high);
                barred += bar.volume;
            }
        }
        // Everything fed is either in a completed bar or the open one
        assert!(barred <= fed);
    }

    #[test]
    fn test_threshold_straddle() {
        // Notional before the closing trade must be below the threshold
        let mut agg = VolumeBarAggregator::new(500.0);
        assert!(agg.on_trade(100.0, 3.0, false, 1).is_none()); // 300
        let bar = agg.on_trade(100.0, 3.0, false, 2).expect("complete"); // 600
        let total: f64 = 600.0;
        let last: f64 = 300.0;
        assert!(total >= 500.0);
        assert!(total - last < 500.0);
        assert_eq!(bar.tick_count, 2);
    }

    #[test]
    fn test_ohlc_tracks_extremes() {
        let mut agg = VolumeBarAggregator::new(1_000_000.0);
        agg.on_trade(100.0, 1.0, false, 1);
        agg.on_trade(105.0, 1.0, false, 2);
        agg.on_trade(95.0, 1.0, true, 3);
        let bar = agg.on_trade(101.0, 10_000.0, false, 4).expect("complete");
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 105.0);
        assert_eq!(bar.low, 95.0);
        assert_eq!(bar.close, 101.0);
    }

    #[test]
    fn test_cvd_sign() {
        let mut agg = VolumeBarAggregator::new(100.0);
        let bar = agg.on_trade(10.0, 30.0, false, 1).expect("complete");
        assert_eq!(bar.cvd(), 30.0);
        let bar = agg.on_trade(10.0, 30.0, true, 2).expect("complete");
        assert_eq!(bar.cvd(), -30.0);
    }
}
