//! Indicator kernels
//!
//! Pure functions over flat `f64` slices; no hidden state, no allocation.
//! Callers pass windows ordered oldest-first. Degenerate inputs return
//! defined sentinels (50 for RSI, 0 for RVOL, last price for EMA/VWAP)
//! instead of NaN so downstream filters never have to special-case.

/// Exponential moving average, smoothing factor `k = 2/(period+1)`.
///
/// Returns the last price when fewer than `period` samples are available,
/// and 0 for an empty slice.
pub fn ema(prices: &[f64], period: usize) -> f64 {
    let n = prices.len();
    if n == 0 {
        return 0.0;
    }
    if n < period {
        return prices[n - 1];
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut result = prices[0];
    for &p in &prices[1..] {
        result = p * k + result * (1.0 - k);
    }
    result
}

/// Relative Strength Index with Wilder's smoothing.
///
/// Seeded from the delta `period` steps before the tail; returns the
/// neutral 50 when fewer than `period + 1` samples exist, and 100 when the
/// average loss is zero.
pub fn rsi(prices: &[f64], period: usize) -> f64 {
    let n = prices.len();
    if n < period + 1 {
        return 50.0;
    }
    let start = n - period - 1;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    let delta = prices[start + 1] - prices[start];
    if delta > 0.0 {
        avg_gain = delta;
    } else {
        avg_loss = -delta;
    }

    let p = period as f64;
    for i in (start + 2)..n {
        let delta = prices[i] - prices[i - 1];
        if delta > 0.0 {
            avg_gain = (avg_gain * (p - 1.0) + delta) / p;
            avg_loss = (avg_loss * (p - 1.0)) / p;
        } else {
            avg_gain = (avg_gain * (p - 1.0)) / p;
            avg_loss = (avg_loss * (p - 1.0) + (-delta)) / p;
        }
    }

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    (high - low)
        .max((high - prev_close).abs())
        .max((low - prev_close).abs())
}

/// Average True Range with Wilder's smoothing.
///
/// Seed is the simple mean of the first `period` true ranges. With fewer
/// than `period + 1` samples the plain mean TR is returned; with fewer than
/// two samples, `high - low` (or 0 when empty).
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    let n = highs.len();
    if n < 2 {
        return if n > 0 { highs[0] - lows[0] } else { 0.0 };
    }
    if n < period + 1 {
        let mut total = 0.0;
        for i in 1..n {
            total += true_range(highs[i], lows[i], closes[i - 1]);
        }
        return total / (n - 1).max(1) as f64;
    }

    let p = period as f64;
    let mut atr_val = 0.0;
    for i in 1..=period {
        atr_val += true_range(highs[i], lows[i], closes[i - 1]);
    }
    atr_val /= p;

    for i in (period + 1)..n {
        let tr = true_range(highs[i], lows[i], closes[i - 1]);
        atr_val = (atr_val * (p - 1.0) + tr) / p;
    }
    atr_val
}

/// Bollinger bands over the trailing `period` closes.
///
/// Returns `(upper, middle, lower)` where middle is the SMA and the band
/// half-width is `num_std` sample standard deviations (n−1 denominator).
/// With insufficient data all three collapse to the last close.
pub fn bollinger(closes: &[f64], period: usize, num_std: f64) -> (f64, f64, f64) {
    let n = closes.len();
    if n < period {
        let v = if n > 0 { closes[n - 1] } else { 0.0 };
        return (v, v, v);
    }
    let window = &closes[n - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    let sq_sum: f64 = window.iter().map(|c| (c - middle) * (c - middle)).sum();
    let std = (sq_sum / (period - 1) as f64).sqrt();
    (middle + num_std * std, middle, middle - num_std * std)
}

/// Bollinger squeeze: true when the current bandwidth sits in the bottom
/// 15% of its distribution over the last `lookback` windows.
pub fn is_squeeze(closes: &[f64], bb_period: usize, bb_std: f64, lookback: usize) -> bool {
    let n = closes.len();
    if n < bb_period + lookback {
        return false;
    }

    let mut min_bw = f64::MAX;
    let mut max_bw = f64::MIN;
    let mut current_bw = 0.0;

    for offset in 0..lookback {
        let end = n - offset;
        if end < bb_period {
            break;
        }
        let start = end - bb_period;
        let window = &closes[start..end];
        let mid = window.iter().sum::<f64>() / bb_period as f64;
        if mid <= 0.0 {
            continue;
        }
        let sq_sum: f64 = window.iter().map(|c| (c - mid) * (c - mid)).sum();
        let std = (sq_sum / (bb_period - 1) as f64).sqrt();
        let bw = (2.0 * bb_std * std) / mid;
        if offset == 0 {
            current_bw = bw;
        }
        min_bw = min_bw.min(bw);
        max_bw = max_bw.max(bw);
    }

    let bw_range = max_bw - min_bw;
    if bw_range <= 0.0 {
        return false;
    }
    (current_bw - min_bw) / bw_range < 0.15
}

/// Volume-weighted average price over the trailing `period` bars.
///
/// Falls back to the last close when volume sums to zero or the window is
/// not yet full.
pub fn vwap(closes: &[f64], volumes: &[f64], period: usize) -> f64 {
    let n = closes.len();
    if n < period {
        return if n > 0 { closes[n - 1] } else { 0.0 };
    }
    let mut total_pv = 0.0;
    let mut total_v = 0.0;
    for i in (n - period)..n {
        total_pv += closes[i] * volumes[i];
        total_v += volumes[i];
    }
    if total_v <= 0.0 {
        return closes[n - 1];
    }
    total_pv / total_v
}

/// Relative volume: current bar volume over the mean of the previous
/// `period` bars. Zero when the trailing average is non-positive or the
/// window is not yet full.
pub fn rvol(volumes: &[f64], period: usize) -> f64 {
    let n = volumes.len();
    if n < period + 1 {
        return 0.0;
    }
    let current = volumes[n - 1];
    let total: f64 = volumes[n - period - 1..n - 1].iter().sum();
    let avg = total / period as f64;
    if avg <= 0.0 {
        return 0.0;
    }
    current / avg
}

/// Top-of-book order-book imbalance: `(bid − ask)/(bid + ask)` in [-1, 1],
/// zero when the book is empty on both sides.
pub fn order_book_imbalance(bid_qty: f64, ask_qty: f64) -> f64 {
    let total = bid_qty + ask_qty;
    if total == 0.0 {
        return 0.0;
    }
    (bid_qty - ask_qty) / total
}

/// Volatility trailing stop.
///
/// Activates once unrealized excursion exceeds `activate_atr_mult * atr`
/// and then trails the favourable extreme by `trail_atr_mult * atr`,
/// ratcheting monotonically (up for longs, down for shorts).
///
/// Returns `(active, stop_price)`.
pub fn trailing_stop(
    side_is_long: bool,
    highest: f64,
    lowest: f64,
    current_atr: f64,
    entry_price: f64,
    activate_atr_mult: f64,
    trail_atr_mult: f64,
    prev_trailing_stop: f64,
) -> (bool, f64) {
    if side_is_long {
        let unrealized = highest - entry_price;
        if unrealized >= current_atr * activate_atr_mult {
            let new_stop = highest - current_atr * trail_atr_mult;
            return (true, new_stop.max(prev_trailing_stop));
        }
    } else {
        let unrealized = entry_price - lowest;
        if unrealized >= current_atr * activate_atr_mult {
            let new_stop = lowest + current_atr * trail_atr_mult;
            if prev_trailing_stop <= 0.0 {
                return (true, new_stop);
            }
            return (true, new_stop.min(prev_trailing_stop));
        }
    }
    (false, prev_trailing_stop)
}
