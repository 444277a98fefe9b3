// src/ratelimit/metered.rs
//! Pacing before the call (token bucket), exponential backoff after a retryable failure.

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::MeteredApiConfig;
use crate::error::Result;
use crate::quota::QuotaLedger;
use crate::ratelimit::bucket::TokenBucket;

/// Waits shorter than this are not reported as throttling.
const THROTTLE_THRESHOLD: Duration = Duration::from_millis(10);

/// Upper bound of the random jitter added to each backoff, as a fraction of it.
const BACKOFF_JITTER: f64 = 0.25;

#[derive(Debug)]
pub struct MeteredLimiter {
    name: &'static str,
    cfg: MeteredApiConfig,
    bucket: TokenBucket,
    ledger: Arc<QuotaLedger>,
    /// Refuse to issue calls once the ledger's budget is spent.
    quota_gated: bool,
}

impl MeteredLimiter {
    /// Limiter for the quota-charged upstream: calls are refused once the budget is spent.
    pub fn metered(name: &'static str, cfg: &MeteredApiConfig, ledger: Arc<QuotaLedger>) -> Self {
        Self::build(name, cfg, ledger, true)
    }

    /// Same pacing and retry policy, but the ledger budget does not gate calls
    /// (inference backends are only paced and counted).
    pub fn unmetered(name: &'static str, cfg: &MeteredApiConfig, ledger: Arc<QuotaLedger>) -> Self {
        Self::build(name, cfg, ledger, false)
    }

    fn build(
        name: &'static str,
        cfg: &MeteredApiConfig,
        ledger: Arc<QuotaLedger>,
        quota_gated: bool,
    ) -> Self {
        Self {
            name,
            bucket: TokenBucket::new(cfg.requests_per_second, cfg.burst_size),
            cfg: cfg.clone(),
            ledger,
            quota_gated,
        }
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    /// Run `op` under pacing and retry. `op` is re-invoked for every attempt, so any
    /// per-request quota charge belongs inside it.
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
            if self.quota_gated {
                self.ledger.ensure_available()?;
            }

            let waited = self.bucket.acquire(1).await;
            if waited > THROTTLE_THRESHOLD {
                self.ledger.throttle(waited);
            }

            let err = match op().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= self.cfg.max_retries {
                self.ledger.rate_limit_error();
                warn!(
                    limiter = self.name,
                    op = label,
                    attempts = attempt,
                    error = %err,
                    "giving up after retries"
                );
                return Err(err);
            }

            self.ledger.retry(attempt, err.kind());
            let delay = self.backoff(attempt);
            warn!(
                limiter = self.name,
                op = label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retryable upstream failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// `min * multiplier^(attempt-1)` clamped to [min, max], plus jitter (still capped at max).
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        let min = self.cfg.min_delay_seconds;
        let max = self.cfg.max_delay_seconds;
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let base = (min * self.cfg.backoff_multiplier.powi(exp)).clamp(min, max);
        let jitter = rand::rng().random_range(0.0..=BACKOFF_JITTER);
        Duration::from_secs_f64((base * (1.0 + jitter)).min(max))
    }
}
