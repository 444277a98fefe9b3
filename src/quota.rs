// src/quota.rs
//! Process-scoped quota ledger for the metered upstream API, plus soft counters
//! (throttles, retries, rate-limit errors, inference calls) shared by every limiter.
//!
//! The ledger is not persisted: it resets on process restart, so the provider's daily
//! window must be paced externally.

use metrics::counter;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Fixed per-request costs charged by the metered provider.
pub struct QuotaCost;

impl QuotaCost {
    /// search.list (handle -> channel id)
    pub const SEARCH: u64 = 100;
    /// channels.list (channel id -> uploads playlist)
    pub const CHANNEL_LOOKUP: u64 = 1;
    /// playlistItems.list, per page
    pub const PLAYLIST_PAGE: u64 = 1;
    /// videos.list statistics, per batch of up to 50 ids
    pub const VIDEO_STATS: u64 = 1;
}

/// Usage above this fraction of the budget is flagged in the summary.
const HIGH_WATER_MARK: f64 = 0.8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub units_used: u64,
    pub daily_limit: u64,
    pub inference_calls: u64,
    pub throttled: u64,
    pub retries: u64,
    pub rate_limit_errors: u64,
}

#[derive(Debug, Default)]
struct State {
    units_used: u64,
    inference_calls: u64,
    throttled: u64,
    retries: u64,
    rate_limit_errors: u64,
}

#[derive(Debug)]
pub struct QuotaLedger {
    daily_limit: u64,
    state: Mutex<State>,
}

impl QuotaLedger {
    pub fn new(daily_limit: u64) -> Self {
        Self {
            daily_limit,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    /// Charge `units` for `label`. The add happens first: the raising call has already
    /// spent its units and the total stays at its over-limit value.
    pub fn record(&self, units: u64, label: &str) -> Result<u64> {
        let total = {
            let mut s = self.lock();
            s.units_used = s.units_used.saturating_add(units);
            s.units_used
        };
        counter!("quota_units_total").increment(units);
        debug!(units, total, op = label, "metered API call");
        self.check_total(total)
    }

    /// Refuse further metered work once the budget is spent.
    pub fn ensure_available(&self) -> Result<()> {
        let total = self.lock().units_used;
        self.check_total(total).map(|_| ())
    }

    fn check_total(&self, total: u64) -> Result<u64> {
        if total >= self.daily_limit {
            error!(
                used = total,
                limit = self.daily_limit,
                "metered API quota exceeded"
            );
            return Err(Error::QuotaExceeded {
                used: total,
                limit: self.daily_limit,
            });
        }
        Ok(total)
    }

    pub fn record_inference(&self, label: &str) {
        let calls = {
            let mut s = self.lock();
            s.inference_calls += 1;
            s.inference_calls
        };
        counter!("inference_calls_total").increment(1);
        debug!(op = label, calls, "inference call");
    }

    pub fn throttle(&self, waited: Duration) {
        self.lock().throttled += 1;
        counter!("ratelimit_throttled_total").increment(1);
        debug!(
            delay_ms = waited.as_millis() as u64,
            "rate limiter throttled request"
        );
    }

    pub fn retry(&self, attempt: u32, reason: &str) {
        self.lock().retries += 1;
        counter!("ratelimit_retries_total").increment(1);
        warn!(attempt, reason, "retry attempt");
    }

    pub fn rate_limit_error(&self) {
        self.lock().rate_limit_errors += 1;
        counter!("ratelimit_errors_total").increment(1);
        error!("rate limit error: retries exhausted");
    }

    pub fn units_used(&self) -> u64 {
        self.lock().units_used
    }

    pub fn daily_limit(&self) -> u64 {
        self.daily_limit
    }

    pub fn remaining(&self) -> u64 {
        self.daily_limit.saturating_sub(self.units_used())
    }

    pub fn snapshot(&self) -> QuotaSnapshot {
        let s = self.lock();
        QuotaSnapshot {
            units_used: s.units_used,
            daily_limit: self.daily_limit,
            inference_calls: s.inference_calls,
            throttled: s.throttled,
            retries: s.retries,
            rate_limit_errors: s.rate_limit_errors,
        }
    }

    pub fn reset(&self) {
        *self.lock() = State::default();
    }

    /// End-of-run digest. Returns true when usage crossed the high-water mark.
    pub fn summary(&self) -> bool {
        let snap = self.snapshot();
        info!(
            units = snap.units_used,
            limit = snap.daily_limit,
            inference_calls = snap.inference_calls,
            "API usage summary"
        );
        if snap.throttled > 0 || snap.retries > 0 || snap.rate_limit_errors > 0 {
            info!(
                throttled = snap.throttled,
                retries = snap.retries,
                rate_limit_errors = snap.rate_limit_errors,
                "rate limiting stats"
            );
        }
        let high = snap.units_used as f64 > snap.daily_limit as f64 * HIGH_WATER_MARK;
        if high {
            warn!(
                units = snap.units_used,
                limit = snap.daily_limit,
                "metered API quota usage is high"
            );
        }
        high
    }
}
