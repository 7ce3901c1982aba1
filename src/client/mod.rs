//! Resilient outbound HTTP client
//!
//! Wraps backend calls with per-attempt timeouts, exponential backoff with jitter, an in-memory
//! response cache, and stale-cache fallback once every attempt has failed.

pub mod cache;
pub mod error;
pub mod resilient;
pub mod retry;

pub use cache::{CacheEntry, ResponseCache};
pub use error::ClientError;
pub use resilient::{CallOptions, Fetched, Freshness, ResilientClient, DEFAULT_CACHE_TTL};
pub use retry::{RetryConfig, RetryOverrides};
