//! Outbound rate limiting: token buckets for the global, per-chat and
//! per-user tiers.

pub mod bucket;
pub mod limiter;

pub use bucket::TokenBucket;
pub use limiter::{BucketTable, RateLimiter, RateLimiterEntry, Tier};
