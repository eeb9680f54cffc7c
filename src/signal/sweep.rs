//! Liquidity sweep detection
//!
//! Flags failed breakouts (stop runs): price wicks through a recent swing
//! level on a volume spike but closes back inside the range. Read as an
//! adversarial entry in the opposite direction of the breach.

/// Direction of a detected sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    /// Swing low breached and reclaimed: long entry
    Bullish,
    /// Swing high breached and rejected: short entry
    Bearish,
}

pub struct LiquiditySweepDetector {
    lookback: usize,
    vol_spike_mult: f64,
    reversal_bars: usize,
}

impl Default for LiquiditySweepDetector {
    fn default() -> Self {
        Self {
            lookback: 20,
            vol_spike_mult: 2.0,
            reversal_bars: 3,
        }
    }
}

impl LiquiditySweepDetector {
    pub fn new(lookback: usize, vol_spike_mult: f64, reversal_bars: usize) -> Self {
        Self {
            lookback,
            vol_spike_mult,
            reversal_bars,
        }
    }

    /// Probe the last `lookback + reversal_bars` bars for a sweep.
    ///
    /// Slices are ordered oldest-first. `avg_volume` is the caller's
    /// trailing mean bar volume used as the spike baseline.
    pub fn detect(
        &self,
        highs: &[f64],
        lows: &[f64],
        closes: &[f64],
        volumes: &[f64],
        avg_volume: f64,
    ) -> Option<Sweep> {
        let n = closes.len();
        let needed = self.lookback + self.reversal_bars;
        if n < needed {
            return None;
        }

        let swing = n - needed..n - self.reversal_bars;
        let recent_high = highs[swing.clone()].iter().cloned().fold(f64::MIN, f64::max);
        let recent_low = lows[swing].iter().cloned().fold(f64::MAX, f64::min);

        let sweep_highs = &highs[n - self.reversal_bars..];
        let sweep_lows = &lows[n - self.reversal_bars..];
        let last_close = closes[n - 1];
        let max_sweep_vol = volumes[n - self.reversal_bars..]
            .iter()
            .cloned()
            .fold(f64::MIN, f64::max);

        let volume_spiked = max_sweep_vol > avg_volume * self.vol_spike_mult;

        // Bearish: wick above the swing high, close back below, volume spike
        if sweep_highs.iter().any(|&h| h > recent_high)
            && last_close < recent_high
            && volume_spiked
        {
            return Some(Sweep::Bearish);
        }

        // Bullish: wick below the swing low, close back above, volume spike
        if sweep_lows.iter().any(|&l| l < recent_low) && last_close > recent_low && volume_spiked {
            return Some(Sweep::Bullish);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 23 flat bars, then a spike through the old high that fails to hold.
    fn bearish_fixture() -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
        let mut highs = vec![101.0; 20];
        let mut lows = vec![99.0; 20];
        let mut closes = vec![100.0; 20];
        let mut volumes = vec![10.0; 20];
        // Reversal window: wick to 103, close back at 100.5, volume burst
        highs.extend([103.0, 102.0, 101.0]);
        lows.extend([100.0, 99.5, 99.8]);
        closes.extend([102.0, 100.8, 100.5]);
        volumes.extend([35.0, 12.0, 11.0]);
        (highs, lows, closes, volumes)
    }

    #[test]
    fn test_bearish_sweep_detected() {
        let (h, l, c, v) = bearish_fixture();
        let det = LiquiditySweepDetector::default();
        assert_eq!(det.detect(&h, &l, &c, &v, 10.0), Some(Sweep::Bearish));
    }

    #[test]
    fn test_no_sweep_without_volume_spike() {
        let (h, l, c, mut v) = bearish_fixture();
        // Same price action, unremarkable volume
        let n = v.len();
        v[n - 3] = 11.0;
        let det = LiquiditySweepDetector::default();
        assert_eq!(det.detect(&h, &l, &c, &v, 10.0), None);
    }

    #[test]
    fn test_no_sweep_when_breakout_holds() {
        let (mut h, l, mut c, v) = bearish_fixture();
        // Close above the swing high: a real breakout, not a sweep
        let n = c.len();
        c[n - 1] = 103.5;
        h[n - 1] = 104.0;
        let det = LiquiditySweepDetector::default();
        assert_eq!(det.detect(&h, &l, &c, &v, 10.0), None);
    }

    #[test]
    fn test_bullish_sweep_detected() {
        let mut highs = vec![101.0; 20];
        let mut lows = vec![99.0; 20];
        let mut closes = vec![100.0; 20];
        let mut volumes = vec![10.0; 20];
        highs.extend([100.5, 100.2, 100.8]);
        lows.extend([97.0, 98.5, 99.2]);
        closes.extend([98.0, 99.5, 99.8]);
        volumes.extend([40.0, 12.0, 11.0]);
        let det = LiquiditySweepDetector::default();
        assert_eq!(
            det.detect(&highs, &lows, &closes, &volumes, 10.0),
            Some(Sweep::Bullish)
        );
    }

    #[test]
    fn test_insufficient_history() {
        let det = LiquiditySweepDetector::default();
        let xs = vec![100.0; 10];
        assert_eq!(det.detect(&xs, &xs, &xs, &xs, 10.0), None);
    }
}
