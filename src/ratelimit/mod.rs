// src/ratelimit/mod.rs
pub mod bucket;
pub mod metered;
pub mod scrape;

use std::sync::Arc;

pub use bucket::TokenBucket;
pub use metered::MeteredLimiter;
pub use scrape::ScrapeLimiter;

use crate::config::RateLimitingConfig;
use crate::quota::QuotaLedger;

/// One limiter per upstream budget, all reporting into the same ledger.
#[derive(Debug, Clone)]
pub struct Limiters {
    pub youtube: Arc<MeteredLimiter>,
    pub transcript: Arc<ScrapeLimiter>,
    pub inference: Arc<MeteredLimiter>,
    pub ledger: Arc<QuotaLedger>,
}

impl Limiters {
    pub fn from_config(cfg: &RateLimitingConfig) -> Self {
        let ledger = Arc::new(QuotaLedger::new(cfg.youtube_api.daily_quota_limit));
        Self::with_ledger(cfg, ledger)
    }

    pub fn with_ledger(cfg: &RateLimitingConfig, ledger: Arc<QuotaLedger>) -> Self {
        Self {
            youtube: Arc::new(MeteredLimiter::metered(
                "youtube",
                &cfg.youtube_api,
                Arc::clone(&ledger),
            )),
            transcript: Arc::new(ScrapeLimiter::new(&cfg.transcript_api, Arc::clone(&ledger))),
            inference: Arc::new(MeteredLimiter::unmetered(
                "inference",
                &cfg.inference,
                Arc::clone(&ledger),
            )),
            ledger,
        }
    }
}
