// src/ratelimit/bucket.rs
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Longest single sleep while waiting for refill; the lock is released before sleeping.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: capacity = burst, refilled continuously at `rate` tokens per second.
/// Never errors, only delays.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            rate: rate_per_sec.max(f64::MIN_POSITIVE),
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until `n` tokens are available, debit them, and return the time spent waiting.
    /// Requests larger than the capacity are clamped to it.
    pub async fn acquire(&self, n: u32) -> Duration {
        let need = f64::from(n).min(self.capacity);
        let start = Instant::now();
        loop {
            let wait = {
                let mut s = self.state.lock().expect("token bucket mutex poisoned");
                let now = Instant::now();
                let elapsed = now.duration_since(s.last_refill).as_secs_f64();
                s.tokens = (s.tokens + elapsed * self.rate).min(self.capacity);
                s.last_refill = now;

                if s.tokens >= need {
                    s.tokens -= need;
                    return start.elapsed();
                }
                Duration::from_secs_f64((need - s.tokens) / self.rate)
            };
            tokio::time::sleep(wait.min(MAX_WAIT_SLICE)).await;
        }
    }

    /// Tokens currently available (after refill).
    pub fn available(&self) -> f64 {
        let mut s = self.state.lock().expect("token bucket mutex poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(s.last_refill).as_secs_f64();
        s.tokens = (s.tokens + elapsed * self.rate).min(self.capacity);
        s.last_refill = now;
        s.tokens
    }
}
