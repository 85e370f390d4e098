//! Async token bucket.
//!
//! Tokens refill continuously at a fixed rate up to the bucket capacity.
//! Waiting never reserves tokens: a waiter sleeps until enough time has
//! passed, then tries again. Dropping or cancelling a wait therefore never
//! consumes anything.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::TierConfig;
use crate::context::TaskContext;
use crate::error::Cancelled;

/// Absorbs float drift so a waiter that slept the exact deficit succeeds.
const TOKEN_EPSILON: f64 = 1e-9;

/// Mutable refill state behind the mutex.
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket with fixed capacity and refill rate.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(tier: TierConfig) -> Self {
        let capacity = f64::from(tier.capacity.max(1));
        Self {
            capacity,
            refill_per_sec: tier.refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    /// Take one token if available, otherwise report how long until one is.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        self.refill(&mut state, now);

        if state.tokens + TOKEN_EPSILON >= 1.0 {
            state.tokens = (state.tokens - 1.0).max(0.0);
            return Ok(());
        }

        let deficit = 1.0 - state.tokens;
        // A non-positive rate never refills; wait "forever" rather than panic.
        Err(Duration::try_from_secs_f64(deficit / self.refill_per_sec).unwrap_or(Duration::MAX))
    }

    /// Wait for one token under `ctx`.
    ///
    /// Returns `Err` without consuming a token if the context is cancelled
    /// or its deadline passes first.
    pub async fn acquire(&self, ctx: &TaskContext) -> Result<(), Cancelled> {
        loop {
            ctx.check()?;
            let wait = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            ctx.run(tokio::time::sleep(wait)).await?;
        }
    }

    /// Tokens currently available (after refill).
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(capacity: u32, rate: f64) -> TokenBucket {
        TokenBucket::new(TierConfig::new(capacity, rate))
    }

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_capacity() {
        let b = bucket(3, 1.0);
        assert!(b.try_acquire().is_ok());
        assert!(b.try_acquire().is_ok());
        assert!(b.try_acquire().is_ok());
        let wait = b.try_acquire().unwrap_err();
        assert!(wait <= Duration::from_secs(1));
        assert!(wait > Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn next_token_arrives_after_one_over_rate() {
        let b = bucket(2, 10.0);
        let ctx = TaskContext::detached();
        b.acquire(&ctx).await.unwrap();
        b.acquire(&ctx).await.unwrap();

        let before = Instant::now();
        b.acquire(&ctx).await.unwrap();
        let waited = before.elapsed();
        assert!(waited >= Duration::from_millis(99), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(110), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_capacity() {
        let b = bucket(2, 100.0);
        b.try_acquire().unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((b.available() - 2.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_consumes_nothing() {
        let b = bucket(1, 1.0);
        b.try_acquire().unwrap();

        let ctx = TaskContext::detached().with_timeout(Duration::from_millis(200));
        assert_eq!(b.acquire(&ctx).await, Err(Cancelled::Deadline));

        // A full refill period later exactly one token is available, so the
        // cancelled waiter did not eat it.
        tokio::time::advance(Duration::from_millis(800)).await;
        assert!(b.try_acquire().is_ok());
        assert!(b.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_rate_bucket_reports_an_unbounded_wait() {
        let b = bucket(1, 0.0);
        b.try_acquire().unwrap();
        assert_eq!(b.try_acquire(), Err(Duration::MAX));

        let ctx = TaskContext::detached().with_timeout(Duration::from_secs(1));
        assert_eq!(b.acquire(&ctx).await, Err(Cancelled::Deadline));
    }

    #[tokio::test]
    async fn already_cancelled_context_fails_fast() {
        let b = bucket(5, 1.0);
        let ctx = TaskContext::detached();
        ctx.cancel();
        assert_eq!(b.acquire(&ctx).await, Err(Cancelled::Shutdown));
        assert!((b.available() - 5.0).abs() < 1e-6);
    }
}
