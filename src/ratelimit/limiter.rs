//! Three-tier outbound rate limiter.
//!
//! Every outbound call acquires, in order, one token from the chat's bucket,
//! the global bucket and the user's bucket. Per-chat and per-user buckets
//! are created lazily and evicted by a periodic sweep once idle beyond the
//! configured TTL.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::channels::{ChatId, UserId};
use crate::config::{RateLimitConfig, TierConfig};
use crate::context::TaskContext;
use crate::error::{Cancelled, ConfigError};
use crate::ratelimit::bucket::TokenBucket;

/// One tracked identity: its bucket and when it was last used.
#[derive(Debug)]
pub struct RateLimiterEntry {
    bucket: Arc<TokenBucket>,
    last_access: Instant,
}

impl RateLimiterEntry {
    pub fn last_access(&self) -> Instant {
        self.last_access
    }
}

/// Lazily populated table of buckets for one tier.
#[derive(Debug)]
pub struct BucketTable<K> {
    tier: TierConfig,
    entries: Mutex<HashMap<K, RateLimiterEntry>>,
}

impl<K: Hash + Eq + Copy> BucketTable<K> {
    pub fn new(tier: TierConfig) -> Self {
        Self {
            tier,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the bucket for `key`, creating it on first sight, and stamp
    /// the access time.
    pub fn bucket(&self, key: K) -> Arc<TokenBucket> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(key).or_insert_with(|| RateLimiterEntry {
            bucket: Arc::new(TokenBucket::new(self.tier)),
            last_access: now,
        });
        entry.last_access = now;
        Arc::clone(&entry.bucket)
    }

    /// Drop entries idle for longer than `ttl`. Waiters that already hold
    /// the bucket keep using their `Arc`.
    pub fn evict_idle(&self, ttl: std::time::Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.last_access) <= ttl);
        before - entries.len()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which tier a wait was cut short on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Chat,
    Global,
    User,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Chat => "chat",
            Self::Global => "global",
            Self::User => "user",
        };
        write!(f, "{s}")
    }
}

/// Handle to the running sweep task.
struct Sweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Global + per-chat + per-user token buckets.
pub struct RateLimiter {
    config: RateLimitConfig,
    global: Arc<TokenBucket>,
    chats: BucketTable<ChatId>,
    users: BucketTable<UserId>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl RateLimiter {
    /// Build the limiter. Tier parameters are fixed from here on; a tier
    /// with a zero capacity or refill rate is rejected.
    pub fn new(config: RateLimitConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Ok(Arc::new(Self {
            global: Arc::new(TokenBucket::new(config.global)),
            chats: BucketTable::new(config.per_chat),
            users: BucketTable::new(config.per_user),
            sweeper: Mutex::new(None),
            config,
        }))
    }

    /// Acquire one token from each tier: chat, then global, then user.
    ///
    /// If `ctx` is cancelled or expires while waiting on a tier, later tiers
    /// are never touched.
    pub async fn acquire(
        &self,
        ctx: &TaskContext,
        chat: ChatId,
        user: Option<UserId>,
    ) -> Result<(), Cancelled> {
        self.acquire_tier(ctx, Tier::Chat, &self.chats.bucket(chat)).await?;
        self.acquire_tier(ctx, Tier::Global, &self.global).await?;
        if let Some(user) = user {
            self.acquire_tier(ctx, Tier::User, &self.users.bucket(user)).await?;
        }
        Ok(())
    }

    async fn acquire_tier(
        &self,
        ctx: &TaskContext,
        tier: Tier,
        bucket: &TokenBucket,
    ) -> Result<(), Cancelled> {
        bucket.acquire(ctx).await.inspect_err(|reason| {
            debug!(%tier, %reason, "Rate limit wait aborted");
        })
    }

    /// Evict idle per-chat and per-user entries. Returns how many went.
    pub fn sweep(&self) -> usize {
        let ttl = self.config.idle_ttl;
        self.chats.evict_idle(ttl) + self.users.evict_idle(ttl)
    }

    /// Start the periodic eviction sweep. It exits when `root` is cancelled
    /// or `stop()` is called.
    pub fn spawn_sweeper(self: &Arc<Self>, root: &CancellationToken) {
        let token = root.child_token();
        let limiter = Arc::clone(self);
        let stop = token.clone();
        let interval = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip immediate first tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = limiter.sweep();
                        if evicted > 0 {
                            debug!(
                                evicted,
                                chats = limiter.chats.len(),
                                users = limiter.users.len(),
                                "Evicted idle rate limiter entries"
                            );
                        }
                    }
                }
            }
            debug!("Rate limiter sweep stopped");
        });

        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Sweeper { token, handle });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
    }

    /// Stop the sweep task and wait for it to finish.
    pub async fn stop(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            sweeper.token.cancel();
            let _ = sweeper.handle.await;
            info!("Rate limiter stopped");
        }
    }

    pub fn tracked_chats(&self) -> usize {
        self.chats.len()
    }

    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }

    pub fn is_tracking_chat(&self, chat: ChatId) -> bool {
        self.chats.contains(&chat)
    }

    pub fn is_tracking_user(&self, user: UserId) -> bool {
        self.users.contains(&user)
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
