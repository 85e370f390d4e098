//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Token-bucket parameters for one tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierConfig {
    /// Burst size.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl TierConfig {
    pub const fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
        }
    }

    /// Both the burst size and the refill rate must be positive.
    pub fn validate(&self, key: &str) -> Result<(), ConfigError> {
        if self.capacity == 0 || !(self.refill_per_sec > 0.0) || !self.refill_per_sec.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!(
                    "capacity and refill rate must be positive (got {}/{})",
                    self.capacity, self.refill_per_sec
                ),
            });
        }
        Ok(())
    }
}

/// Outbound rate limits, one tier per scope.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub global: TierConfig,
    pub per_chat: TierConfig,
    pub per_user: TierConfig,
    /// Idle per-chat/per-user entries are evicted after this long.
    pub idle_ttl: Duration,
    /// How often the eviction sweep runs.
    pub sweep_interval: Duration,
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.global.validate("global")?;
        self.per_chat.validate("per_chat")?;
        self.per_user.validate("per_user")
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            // Telegram: ~30 messages/sec across all chats, ~1/sec per chat.
            global: TierConfig::new(30, 30.0),
            per_chat: TierConfig::new(3, 1.0),
            per_user: TierConfig::new(5, 2.0),
            idle_ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Per-operation timeouts.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Single-symbol analysis and position monitoring.
    pub symbol_analysis: Duration,
    /// Whole-universe analysis.
    pub universe_analysis: Duration,
    /// News lookup.
    pub news: Duration,
    /// Synchronous collaborator calls made inside a handler.
    pub store_call: Duration,
    /// Budget for an ordinary reply (rate-limit wait included).
    pub reply: Duration,
    /// How long shutdown waits for in-flight background tasks.
    pub shutdown_grace: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            symbol_analysis: Duration::from_secs(120),
            universe_analysis: Duration::from_secs(900),
            news: Duration::from_secs(60),
            store_call: Duration::from_secs(15),
            reply: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Dialog-level settings.
#[derive(Debug, Clone)]
pub struct DialogConfig {
    /// Sessions untouched for this long are dropped.
    pub session_idle_timeout: Duration,
    /// How often idle sessions are pruned.
    pub session_prune_interval: Duration,
    /// Interval between loading-indicator frames.
    pub animation_interval: Duration,
    /// Symbols covered by `/analyzeall`.
    pub universe: Vec<String>,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            session_idle_timeout: Duration::from_secs(3600), // 1 hour
            session_prune_interval: Duration::from_secs(600),
            animation_interval: Duration::from_millis(1500),
            universe: ["ANTM", "BBCA", "BBRI", "BMRI", "TLKM", "ASII", "UNVR", "ADRO"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: SecretString,
    /// Telegram usernames or numeric ids; `*` allows everyone.
    pub allowed_users: Vec<String>,
    /// Base URL of the analysis/news/jobs backend.
    pub backend_url: String,
    pub rate_limits: RateLimitConfig,
    pub timeouts: TimeoutConfig,
    pub dialog: DialogConfig,
}

impl BotConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()))?;

        let allowed_users = std::env::var("TELEGRAM_ALLOWED_USERS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let backend_url = std::env::var("STOCK_ASSIST_BACKEND_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string());

        let mut rate_limits = RateLimitConfig::default();
        rate_limits.global = tier_from_env("STOCK_ASSIST_RATE_GLOBAL", rate_limits.global)?;
        rate_limits.per_chat = tier_from_env("STOCK_ASSIST_RATE_CHAT", rate_limits.per_chat)?;
        rate_limits.per_user = tier_from_env("STOCK_ASSIST_RATE_USER", rate_limits.per_user)?;
        rate_limits.idle_ttl = secs_from_env("STOCK_ASSIST_RATE_IDLE_TTL_SECS", rate_limits.idle_ttl)?;

        let mut timeouts = TimeoutConfig::default();
        timeouts.symbol_analysis =
            secs_from_env("STOCK_ASSIST_ANALYZE_TIMEOUT_SECS", timeouts.symbol_analysis)?;
        timeouts.universe_analysis =
            secs_from_env("STOCK_ASSIST_ANALYZE_ALL_TIMEOUT_SECS", timeouts.universe_analysis)?;
        timeouts.shutdown_grace =
            secs_from_env("STOCK_ASSIST_SHUTDOWN_GRACE_SECS", timeouts.shutdown_grace)?;

        let mut dialog = DialogConfig::default();
        dialog.session_idle_timeout =
            secs_from_env("STOCK_ASSIST_SESSION_IDLE_SECS", dialog.session_idle_timeout)?;
        if let Ok(universe) = std::env::var("STOCK_ASSIST_UNIVERSE") {
            let symbols: Vec<String> = universe
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if symbols.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "STOCK_ASSIST_UNIVERSE".into(),
                    message: "no symbols listed".into(),
                });
            }
            dialog.universe = symbols;
        }

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            allowed_users,
            backend_url,
            rate_limits,
            timeouts,
            dialog,
        })
    }
}

/// Parse `capacity/refill_per_sec`, e.g. `30/30`.
fn parse_tier(key: &str, raw: &str) -> Result<TierConfig, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{message} (got '{raw}', expected capacity/refill_per_sec)"),
    };

    let (capacity, refill) = raw.split_once('/').ok_or_else(|| invalid("missing '/'"))?;
    let capacity: u32 = parse_trimmed(capacity).ok_or_else(|| invalid("bad capacity"))?;
    let refill: f64 = parse_trimmed(refill).ok_or_else(|| invalid("bad refill rate"))?;
    let tier = TierConfig::new(capacity, refill);
    tier.validate(key)?;
    Ok(tier)
}

fn parse_trimmed<T: FromStr>(s: &str) -> Option<T> {
    s.trim().parse().ok()
}

fn tier_from_env(key: &str, default: TierConfig) -> Result<TierConfig, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => parse_tier(key, &raw),
        Err(_) => Ok(default),
    }
}

fn secs_from_env(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => parse_trimmed::<u64>(&raw)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}' is not a number of seconds"),
            }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tier_accepts_capacity_and_rate() {
        let tier = parse_tier("K", "30/ 30").unwrap();
        assert_eq!(tier, TierConfig::new(30, 30.0));

        let tier = parse_tier("K", "3/0.5").unwrap();
        assert_eq!(tier.capacity, 3);
        assert!((tier.refill_per_sec - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_tier_rejects_garbage() {
        assert!(parse_tier("K", "30").is_err());
        assert!(parse_tier("K", "0/1").is_err());
        assert!(parse_tier("K", "5/0").is_err());
        assert!(parse_tier("K", "a/b").is_err());
    }

    #[test]
    fn defaults_match_telegram_quota() {
        let limits = RateLimitConfig::default();
        assert_eq!(limits.global.capacity, 30);
        assert!(limits.per_chat.refill_per_sec <= 1.0);
        assert!(TimeoutConfig::default().universe_analysis > TimeoutConfig::default().symbol_analysis);
    }
}
