// src/ratelimit/scrape.rs
//! Jittered spacing for the unmetered transcript endpoint. Irregular intervals matter
//! more than raw rate there, so there is no bucket, only a randomized gap between calls.

use rand::Rng;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::config::ScrapeApiConfig;
use crate::error::{Error, Result};
use crate::quota::QuotaLedger;

#[derive(Debug)]
pub struct ScrapeLimiter {
    cfg: ScrapeApiConfig,
    /// Start time of the most recently scheduled call.
    last_call: Mutex<Option<Instant>>,
    ledger: Arc<QuotaLedger>,
}

impl ScrapeLimiter {
    pub fn new(cfg: &ScrapeApiConfig, ledger: Arc<QuotaLedger>) -> Self {
        Self {
            cfg: cfg.clone(),
            last_call: Mutex::new(None),
            ledger,
        }
    }

    /// Midpoint of the delay window plus `jitter * midpoint * U(0,1)`.
    fn target_delay(&self) -> Duration {
        let mid = (self.cfg.min_delay_seconds + self.cfg.max_delay_seconds) / 2.0;
        let extra = mid * self.cfg.delay_jitter * rand::rng().random_range(0.0..=1.0);
        Duration::from_secs_f64(mid + extra)
    }

    /// Reserve the next call slot and sleep until it. Concurrent callers queue up
    /// behind each other instead of firing together.
    async fn pace(&self) {
        let target = self.target_delay();
        let slot = {
            let mut last = self.last_call.lock().expect("scrape limiter mutex poisoned");
            let now = Instant::now();
            let slot = match *last {
                Some(prev) => (prev + target).max(now),
                None => now,
            };
            *last = Some(slot);
            slot
        };
        let wait = slot.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            tokio::time::sleep_until(slot).await;
        }
    }

    /// Permanent conditions are not worth another request.
    fn is_permanent(err: &Error) -> bool {
        matches!(
            err,
            Error::TranscriptUnavailable { .. } | Error::QuotaExceeded { .. } | Error::Config(_)
        )
    }

    pub async fn call<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.cfg.enabled {
            return op().await;
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.pace().await;

            let err = match op().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            if Self::is_permanent(&err) || attempt >= self.cfg.max_retries {
                return Err(err);
            }

            let backoff = Duration::from_secs_f64(
                self.cfg.min_delay_seconds * 2f64.powi(attempt.min(16) as i32 - 1),
            );
            self.ledger.retry(attempt, err.kind());
            warn!(
                op = label,
                attempt,
                max_retries = self.cfg.max_retries,
                delay_ms = backoff.as_millis() as u64,
                error = %err,
                "transcript fetch failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cfg() -> ScrapeApiConfig {
        ScrapeApiConfig {
            min_delay_seconds: 0.2,
            max_delay_seconds: 0.6,
            delay_jitter: 0.5,
            max_retries: 3,
            enabled: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_calls_are_spaced_by_jittered_midpoint() {
        let limiter = ScrapeLimiter::new(&cfg(), Arc::new(QuotaLedger::new(1)));
        let start = Instant::now();
        limiter.call("a", || async { Ok::<_, Error>(()) }).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(1));

        limiter.call("b", || async { Ok::<_, Error>(()) }).await.unwrap();
        let gap = start.elapsed();
        // midpoint 0.4s, up to +50%
        assert!(gap >= Duration::from_millis(400) && gap <= Duration::from_millis(601), "{gap:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_up_to_limit() {
        let ledger = Arc::new(QuotaLedger::new(1));
        let limiter = ScrapeLimiter::new(&cfg(), Arc::clone(&ledger));
        let calls = AtomicU32::new(0);
        let err = limiter
            .call("t", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Error::Network("reset".into())) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(ledger.snapshot().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_transcript_is_not_retried() {
        let limiter = ScrapeLimiter::new(&cfg(), Arc::new(QuotaLedger::new(1)));
        let calls = AtomicU32::new(0);
        let err = limiter
            .call("t", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(Error::TranscriptUnavailable {
                        id: "v1".into(),
                        detail: "disabled".into(),
                    })
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TranscriptUnavailable { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
