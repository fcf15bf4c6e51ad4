use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Bucket count above which expired buckets are pruned on the next consume.
const PRUNE_THRESHOLD: usize = 1024;

/// Per-key fixed-window point budget.
///
/// Every key starts each window with the full budget; each successful
/// [`consume`](RateLimiter::consume) deducts `cost` points. Once the budget
/// is exhausted further consumption is denied until the window rolls over,
/// at which point the budget resets in full. There is no carry-over and no
/// queuing of denied attempts: this is a hard admission gate.
///
/// The bucket map is shared by every connection pair, so check-and-decrement
/// happens under one lock and concurrent consumers cannot lose updates.
pub struct RateLimiter {
    budget: u32,
    window: Duration,
    cost: u32,
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
}

struct Bucket {
    remaining: u32,
    window_start: Instant,
}

impl RateLimiter {
    /// A limiter allowing `budget` points per `window`, one point per call.
    pub fn new(budget: u32, window: Duration) -> Self {
        Self {
            budget,
            window,
            cost: 1,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Override the points deducted per consumption.
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Deduct one consumption for `key`. Returns `false` when the key's
    /// budget for the current window is exhausted.
    pub fn consume(&self, key: IpAddr) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();

        if buckets.len() > PRUNE_THRESHOLD {
            self.prune(&mut buckets, now);
        }

        let bucket = buckets.entry(key).or_insert(Bucket {
            remaining: self.budget,
            window_start: now,
        });

        if now.duration_since(bucket.window_start) >= self.window {
            bucket.remaining = self.budget;
            bucket.window_start = now;
        }

        if bucket.remaining < self.cost {
            return false;
        }
        bucket.remaining -= self.cost;
        true
    }

    /// Points left for `key` in its current window, without consuming.
    pub fn remaining(&self, key: IpAddr) -> u32 {
        let now = Instant::now();
        let buckets = self.buckets.lock();
        match buckets.get(&key) {
            Some(bucket) if now.duration_since(bucket.window_start) < self.window => {
                bucket.remaining
            }
            _ => self.budget,
        }
    }

    /// Drop buckets whose window has expired; they are equivalent to absent.
    fn prune(&self, buckets: &mut HashMap<IpAddr, Bucket>, now: Instant) {
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.window_start) < self.window);
        tracing::debug!(
            removed = before - buckets.len(),
            kept = buckets.len(),
            "pruned expired rate-limit buckets"
        );
    }
}
