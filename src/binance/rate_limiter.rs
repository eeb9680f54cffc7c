//! Client-side API weight budget
//!
//! The exchange enforces a per-minute request-weight ceiling per IP. This
//! limiter tracks spent weight in a sliding window and blocks callers
//! before the venue would, keeping 15% headroom so bursts from the venue's
//! own accounting drift never trip a ban.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Fraction of the configured ceiling the limiter will actually spend.
const HEADROOM: f64 = 0.85;
/// Poll interval while blocked waiting for the window to roll.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Sliding-window request-weight limiter shared by every REST caller.
pub struct RateLimiter {
    max_weight: u32,
    window: Duration,
    requests: Mutex<VecDeque<(Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(max_weight: u32, window_sec: u64) -> Self {
        Self {
            max_weight,
            window: Duration::from_secs(window_sec),
            requests: Mutex::new(VecDeque::new()),
        }
    }

    /// Weight spent inside the current window.
    pub fn current_weight(&self) -> u32 {
        let mut requests = self.requests.lock().unwrap();
        Self::purge(&mut requests, self.window);
        requests.iter().map(|&(_, w)| w).sum()
    }

    /// Window utilization as a percentage of the configured ceiling.
    pub fn utilization_pct(&self) -> f64 {
        self.current_weight() as f64 / self.max_weight as f64 * 100.0
    }

    /// Whether `weight` more units fit under the headroom ceiling.
    pub fn can_request(&self, weight: u32) -> bool {
        self.current_weight() + weight <= (self.max_weight as f64 * HEADROOM) as u32
    }

    /// Record spent weight without blocking.
    pub fn record(&self, weight: u32) {
        let mut requests = self.requests.lock().unwrap();
        requests.push_back((Instant::now(), weight));
    }

    /// Block until `weight` units fit, then record them.
    ///
    /// Never fails; callers that cannot tolerate unbounded waiting should
    /// probe [`can_request`](Self::can_request) first.
    pub async fn acquire(&self, weight: u32) {
        while !self.can_request(weight) {
            warn!(
                current = self.current_weight(),
                max = self.max_weight,
                "API weight throttled"
            );
            tokio::time::sleep(RETRY_DELAY).await;
        }
        self.record(weight);
    }

    fn purge(requests: &mut VecDeque<(Instant, u32)>, window: Duration) {
        let now = Instant::now();
        while let Some(&(ts, _)) = requests.front() {
            if now.duration_since(ts) >= window {
                requests.pop_front();
            } else {
                break;
            }
        }
    }
}
