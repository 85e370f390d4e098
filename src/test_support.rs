//! Fakes shared by unit tests.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::channels::{CallbackQuery, ChatId, MessageRef, Outbox, Reply, Transport};
use crate::config::{RateLimitConfig, TierConfig};
use crate::context::TaskContext;
use crate::error::{self, NotFoundError, TransportError};
use crate::ratelimit::RateLimiter;
use crate::services::{
    AnalysisResult, AnalyzerService, Interval, JobInfo, JobRun, JobStore, NewsItem, NewsService,
    PositionRequest, PositionResult, Range, SummaryResult,
};

/// Transport that records every call.
#[derive(Default)]
pub struct RecordingTransport {
    sends: AtomicUsize,
    edits: AtomicUsize,
    deletes: AtomicUsize,
    responds: AtomicUsize,
    next_id: AtomicI64,
    fail_sends: AtomicBool,
    fail_edits: AtomicBool,
    edit_delay: Mutex<Option<Duration>>,
    max_message_len: Mutex<Option<usize>>,
    texts: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn edits(&self) -> usize {
        self.edits.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn responds(&self) -> usize {
        self.responds.load(Ordering::SeqCst)
    }

    /// Texts of every successful send and edit, in order.
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn last_text(&self) -> Option<String> {
        self.texts.lock().unwrap().last().cloned()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_edits(&self, fail: bool) {
        self.fail_edits.store(fail, Ordering::SeqCst);
    }

    pub fn set_edit_delay(&self, delay: Duration) {
        *self.edit_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_max_message_len(&self, len: usize) {
        *self.max_message_len.lock().unwrap() = Some(len);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    fn max_message_len(&self) -> usize {
        self.max_message_len.lock().unwrap().unwrap_or(usize::MAX)
    }

    async fn send(&self, chat: ChatId, reply: &Reply) -> Result<MessageRef, TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed {
                chat: chat.0,
                reason: "refused".into(),
            });
        }
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().unwrap().push(reply.text.clone());
        Ok(MessageRef {
            chat,
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn edit(&self, message: &MessageRef, reply: &Reply) -> Result<MessageRef, TransportError> {
        let delay = *self.edit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(TransportError::EditFailed {
                chat: message.chat.0,
                message_id: message.message_id,
                reason: "message to edit not found".into(),
            });
        }
        self.edits.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().unwrap().push(reply.text.clone());
        Ok(*message)
    }

    async fn delete(&self, _message: &MessageRef) -> Result<(), TransportError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn respond(
        &self,
        _callback: &CallbackQuery,
        _text: Option<&str>,
    ) -> Result<(), TransportError> {
        self.responds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Limits loose enough that tests never wait on them.
pub fn relaxed_limits() -> RateLimitConfig {
    RateLimitConfig {
        global: TierConfig::new(1000, 1000.0),
        per_chat: TierConfig::new(1000, 1000.0),
        per_user: TierConfig::new(1000, 1000.0),
        ..RateLimitConfig::default()
    }
}

/// Outbox over `transport` with relaxed limits, plus its root token.
pub fn outbox_for(transport: Arc<RecordingTransport>) -> (Arc<Outbox>, CancellationToken) {
    let root = CancellationToken::new();
    let limiter = RateLimiter::new(relaxed_limits()).unwrap();
    (Outbox::new(transport, limiter, root.clone()), root)
}

/// Analyzer, job store and news service answering canned results.
#[derive(Default)]
pub struct FakeBackend {
    calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeBackend {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make analyzer calls take `delay`, honouring their context.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn slow(&self, ctx: &TaskContext) -> error::Result<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            ctx.run(tokio::time::sleep(delay)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AnalyzerService for FakeBackend {
    async fn analyze_symbol(
        &self,
        ctx: &TaskContext,
        symbol: &str,
        interval: Interval,
        range: Range,
    ) -> error::Result<AnalysisResult> {
        self.hit();
        self.slow(ctx).await?;
        Ok(AnalysisResult {
            symbol: symbol.to_string(),
            interval,
            range,
            last_price: None,
            signal: Some("HOLD".into()),
            summary: "sideways".into(),
        })
    }

    async fn monitor_position(
        &self,
        ctx: &TaskContext,
        request: PositionRequest,
    ) -> error::Result<PositionResult> {
        self.hit();
        self.slow(ctx).await?;
        Ok(PositionResult {
            symbol: request.symbol,
            last_price: None,
            unrealized_pct: None,
            recommendation: "HOLD".into(),
            summary: "on track".into(),
        })
    }

    async fn analyze_universe(
        &self,
        ctx: &TaskContext,
        symbols: &[String],
        _interval: Interval,
        _range: Range,
    ) -> error::Result<SummaryResult> {
        self.hit();
        self.slow(ctx).await?;
        Ok(SummaryResult {
            analyzed: symbols.len(),
            failed: Vec::new(),
            summary: "mixed".into(),
        })
    }
}

#[async_trait]
impl JobStore for FakeBackend {
    async fn list_jobs(&self) -> error::Result<Vec<JobInfo>> {
        self.hit();
        Ok(Vec::new())
    }

    async fn trigger(&self, name: &str) -> error::Result<JobRun> {
        self.hit();
        Err(NotFoundError::Job { name: name.into() }.into())
    }

    async fn history(&self, _limit: usize) -> error::Result<Vec<JobRun>> {
        self.hit();
        Ok(Vec::new())
    }
}

#[async_trait]
impl NewsService for FakeBackend {
    async fn recent(&self, _ctx: &TaskContext, _symbol: &str, _days: u32) -> error::Result<Vec<NewsItem>> {
        self.hit();
        Ok(Vec::new())
    }
}
