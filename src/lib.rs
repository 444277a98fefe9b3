// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analyze;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod ingest;
pub mod metadata;
pub mod pipeline;
pub mod quota;
pub mod ratelimit;
pub mod report;
pub mod snapshot;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use analyze::ai_adapter;
pub use error::{Error, Result};
pub use quota::{QuotaCost, QuotaLedger};
