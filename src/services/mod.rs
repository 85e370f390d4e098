//! External collaborators: analysis, positions, scheduled jobs and news.
//!
//! The dialog core only talks to these traits. `memory` holds an in-process
//! position store; `http` is a JSON client for a backend that implements the
//! analysis, news and job endpoints.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channels::UserId;
use crate::context::TaskContext;
use crate::error::Result;

pub use http::HttpBackend;
pub use memory::MemoryPositionStore;

/// Candle interval for an analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "1d")]
    Day,
    #[serde(rename = "1wk")]
    Week,
}

impl Interval {
    pub const ALL: [Interval; 3] = [Self::Hour, Self::Day, Self::Week];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "1h",
            Self::Day => "1d",
            Self::Week => "1wk",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|i| i.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Look-back window for an analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Range {
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
}

impl Range {
    pub const ALL: [Range; 5] = [
        Self::OneMonth,
        Self::ThreeMonths,
        Self::SixMonths,
        Self::OneYear,
        Self::TwoYears,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMonth => "1mo",
            Self::ThreeMonths => "3mo",
            Self::SixMonths => "6mo",
            Self::OneYear => "1y",
            Self::TwoYears => "2y",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Single-symbol analysis outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub symbol: String,
    pub interval: Interval,
    pub range: Range,
    pub last_price: Option<Decimal>,
    /// e.g. "BUY", "HOLD", "SELL".
    pub signal: Option<String>,
    pub summary: String,
}

/// Input for a position health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRequest {
    pub symbol: String,
    pub buy_price: Decimal,
    pub buy_date: NaiveDate,
    pub target_price: Decimal,
    pub stop_loss: Decimal,
    pub max_holding_days: u32,
}

/// Outcome of a position health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionResult {
    pub symbol: String,
    pub last_price: Option<Decimal>,
    pub unrealized_pct: Option<Decimal>,
    pub recommendation: String,
    pub summary: String,
}

/// Outcome of a whole-universe analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub analyzed: usize,
    #[serde(default)]
    pub failed: Vec<String>,
    pub summary: String,
}

/// Technical/AI analysis backend.
#[async_trait]
pub trait AnalyzerService: Send + Sync {
    async fn analyze_symbol(
        &self,
        ctx: &TaskContext,
        symbol: &str,
        interval: Interval,
        range: Range,
    ) -> Result<AnalysisResult>;

    async fn monitor_position(
        &self,
        ctx: &TaskContext,
        request: PositionRequest,
    ) -> Result<PositionResult>;

    async fn analyze_universe(
        &self,
        ctx: &TaskContext,
        symbols: &[String],
        interval: Interval,
        range: Range,
    ) -> Result<SummaryResult>;
}

/// A tracked trading position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    /// Chat-platform user that owns the position.
    pub user: UserId,
    pub symbol: String,
    pub buy_price: Decimal,
    pub buy_date: NaiveDate,
    pub target_price: Decimal,
    pub stop_loss: Decimal,
    pub max_holding_days: u32,
    pub alert_price: bool,
    pub alert_monitor: bool,
    pub is_active: bool,
    pub exit_price: Option<Decimal>,
    pub exit_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl Position {
    pub fn to_request(&self) -> PositionRequest {
        PositionRequest {
            symbol: self.symbol.clone(),
            buy_price: self.buy_price,
            buy_date: self.buy_date,
            target_price: self.target_price,
            stop_loss: self.stop_loss,
            max_holding_days: self.max_holding_days,
        }
    }

    /// Realized or hypothetical return at `price`, in percent.
    pub fn return_pct(&self, price: Decimal) -> Option<Decimal> {
        if self.buy_price.is_zero() {
            return None;
        }
        Some(((price - self.buy_price) / self.buy_price * Decimal::ONE_HUNDRED).round_dp(2))
    }
}

/// Fields collected by the position-setup flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPosition {
    pub user: UserId,
    pub symbol: String,
    pub buy_price: Decimal,
    pub buy_date: NaiveDate,
    pub target_price: Decimal,
    pub stop_loss: Decimal,
    pub max_holding_days: u32,
    pub alert_price: bool,
    pub alert_monitor: bool,
}

/// Position persistence keyed by (user, symbol, active flag).
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn create(&self, position: NewPosition) -> Result<Position>;

    /// Replace the stored record with the same id.
    async fn update(&self, position: &Position) -> Result<()>;

    /// Delete matching records. Returns whether anything was removed.
    async fn delete(&self, user: UserId, symbol: &str, active: bool) -> Result<bool>;

    async fn list(&self, user: UserId, active: bool) -> Result<Vec<Position>>;

    async fn find(&self, user: UserId, symbol: &str, active: bool) -> Result<Option<Position>>;
}

/// A scheduled background job known to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub name: String,
    pub schedule: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// One execution of a scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// "running", "success" or "failed".
    pub status: String,
    pub message: Option<String>,
}

/// Scheduled-job control.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn list_jobs(&self) -> Result<Vec<JobInfo>>;

    /// Trigger a manual run. Unknown names yield `NotFoundError::Job`.
    async fn trigger(&self, name: &str) -> Result<JobRun>;

    async fn history(&self, limit: usize) -> Result<Vec<JobRun>>;
}

/// A news headline about a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub sentiment: Option<String>,
}

/// News lookup backend.
#[async_trait]
pub trait NewsService: Send + Sync {
    async fn recent(&self, ctx: &TaskContext, symbol: &str, days: u32) -> Result<Vec<NewsItem>>;
}
