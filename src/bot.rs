//! Event loop and shutdown orchestration.
//!
//! Each inbound event is handled in its own task; the router serializes
//! events of the same user. Shutdown starts when the root token is
//! cancelled (or the update stream ends) and runs in a fixed order: root is
//! cancelled so nothing new goes out, in-flight handlers and background
//! jobs get the grace period to unwind, then the rate limiter's sweeper is
//! stopped.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::channels::EventStream;
use crate::config::DialogConfig;
use crate::dialog::Router;
use crate::ratelimit::RateLimiter;
use crate::session::SessionStore;
use crate::worker::Dispatcher;

/// Owns the long-lived pieces and drives the event loop.
pub struct Bot {
    router: Arc<Router>,
    dispatcher: Arc<Dispatcher>,
    limiter: Arc<RateLimiter>,
    dialog: DialogConfig,
    shutdown_grace: Duration,
}

impl Bot {
    pub fn new(
        router: Arc<Router>,
        dispatcher: Arc<Dispatcher>,
        limiter: Arc<RateLimiter>,
        dialog: DialogConfig,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            router,
            dispatcher,
            limiter,
            dialog,
            shutdown_grace,
        }
    }

    /// Handle events until the root token is cancelled or the stream ends,
    /// then shut down.
    pub async fn run(&self, events: EventStream) {
        let root = self.dispatcher.root().clone();
        self.limiter.spawn_sweeper(&root);
        let pruner = spawn_session_pruner(
            Arc::clone(self.router.sessions()),
            self.dialog.session_idle_timeout,
            self.dialog.session_prune_interval,
            root.clone(),
        );

        let handlers = TaskTracker::new();
        let mut events = events.take_until(root.clone().cancelled_owned()).boxed();
        while let Some(event) = events.next().await {
            if root.is_cancelled() {
                debug!(user = %event.user(), "Dropping event received during shutdown");
                continue;
            }
            let router = Arc::clone(&self.router);
            handlers.spawn(async move { router.handle(event).await });
        }
        if root.is_cancelled() {
            info!("Shutdown signal received");
        } else {
            info!("Update stream closed, shutting down");
        }

        self.shutdown(handlers).await;
        if let Err(e) = pruner.await {
            warn!(error = %e, "Session pruner task failed");
        }
    }

    async fn shutdown(&self, handlers: TaskTracker) {
        // Outbound traffic and animations stop here, before anything is awaited.
        self.dispatcher.root().cancel();
        handlers.close();
        if tokio::time::timeout(self.shutdown_grace, handlers.wait())
            .await
            .is_err()
        {
            warn!(pending = handlers.len(), "Event handlers still running after grace period");
        }

        let clean = self.dispatcher.shutdown(self.shutdown_grace).await;
        self.limiter.stop().await;
        info!(clean, "Shutdown complete");
    }
}

/// Periodically drop idle dialog sessions until `root` is cancelled.
pub fn spawn_session_pruner(
    sessions: Arc<SessionStore>,
    ttl: Duration,
    every: Duration,
    root: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // skip the immediate first tick
        loop {
            tokio::select! {
                _ = root.cancelled() => break,
                _ = interval.tick() => {
                    let pruned = sessions.prune_idle(ttl);
                    if pruned > 0 {
                        info!(pruned, remaining = sessions.len(), "Idle sessions pruned");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use futures::stream;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::channels::{CallbackQuery, ChatId, InboundEvent, Outbox, UserId};
    use crate::config::TimeoutConfig;
    use crate::dialog::{DialogState, RouterDeps};
    use crate::services::{MemoryPositionStore, NewPosition, PositionStore};
    use crate::test_support::{FakeBackend, RecordingTransport, relaxed_limits};

    fn message(user: i64, text: &str) -> InboundEvent {
        InboundEvent::Message {
            chat: ChatId(user),
            user: UserId(user),
            username: None,
            text: text.into(),
        }
    }

    fn press(user: i64, data: &str) -> InboundEvent {
        InboundEvent::Callback {
            chat: ChatId(user),
            user: UserId(user),
            username: None,
            query: CallbackQuery {
                id: format!("cb-{user}"),
                data: data.into(),
                message: None,
            },
        }
    }

    struct Fixture {
        bot: Bot,
        root: CancellationToken,
        dispatcher: Arc<Dispatcher>,
        sessions: Arc<SessionStore>,
        positions: Arc<MemoryPositionStore>,
        transport: Arc<RecordingTransport>,
        backend: Arc<FakeBackend>,
    }

    fn fixture(animation_interval: Duration) -> Fixture {
        let transport = RecordingTransport::new();
        let root = CancellationToken::new();
        let limiter = RateLimiter::new(relaxed_limits()).unwrap();
        let outbox = Outbox::new(transport.clone(), Arc::clone(&limiter), root.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            root.clone(),
            animation_interval,
            Duration::from_secs(5),
        ));
        let sessions = Arc::new(SessionStore::new());
        let positions = Arc::new(MemoryPositionStore::new());
        let backend = Arc::new(FakeBackend::default());
        let router = Arc::new(
            Router::new(RouterDeps {
                sessions: Arc::clone(&sessions),
                outbox,
                dispatcher: Arc::clone(&dispatcher),
                positions: positions.clone(),
                analyzer: backend.clone(),
                jobs: backend.clone(),
                news: backend.clone(),
                timeouts: TimeoutConfig::default(),
                dialog: DialogConfig::default(),
            })
            .unwrap(),
        );
        let bot = Bot::new(
            router,
            Arc::clone(&dispatcher),
            limiter,
            DialogConfig::default(),
            Duration::from_secs(5),
        );
        Fixture {
            bot,
            root,
            dispatcher,
            sessions,
            positions,
            transport,
            backend,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pruner_drops_idle_sessions_and_stops_on_cancel() {
        let sessions = Arc::new(SessionStore::new());
        sessions.set_state(
            UserId(1),
            DialogState::NewsLookup(crate::dialog::state::NewsLookupStep::Symbol),
        );
        sessions.set_data(
            UserId(1),
            crate::dialog::FlowData::empty(crate::dialog::FlowKind::NewsLookup),
        );
        let root = CancellationToken::new();
        let handle = spawn_session_pruner(
            Arc::clone(&sessions),
            Duration::from_secs(30),
            Duration::from_secs(10),
            root.clone(),
        );

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(sessions.is_empty());

        root.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_handles_events_then_shuts_down_in_order() {
        let f = fixture(Duration::from_secs(60));

        let events = stream::iter(vec![
            message(1, "/help"),
            message(2, "/setposition"),
        ])
        .boxed();
        f.bot.run(events).await;

        assert!(f.root.is_cancelled());
        assert_eq!(f.dispatcher.in_flight(), 0);
        assert_eq!(f.transport.sends(), 2);
        assert!(matches!(
            f.sessions.state(UserId(2)),
            DialogState::SetPosition(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_signal_silences_background_jobs_immediately() {
        let f = fixture(Duration::from_secs(1));
        f.positions
            .create(NewPosition {
                user: UserId(1),
                symbol: "ANTM".into(),
                buy_price: dec!(150),
                buy_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
                target_price: dec!(180),
                stop_loss: dec!(140),
                max_holding_days: 5,
                alert_price: true,
                alert_monitor: true,
            })
            .await
            .unwrap();
        f.backend.set_delay(Duration::from_secs(600));

        // The stream never ends on its own; only the signal stops the bot.
        let events = stream::iter(vec![press(1, "mon:ANTM")])
            .chain(stream::pending())
            .boxed();
        let Fixture {
            bot,
            root,
            dispatcher,
            transport,
            backend,
            ..
        } = f;
        let running = tokio::spawn(async move { bot.run(events).await });

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(transport.responds(), 1);
        assert_eq!(backend.calls(), 1);
        assert_eq!(dispatcher.in_flight(), 1);
        assert!(transport.edits() >= 3, "animation should be running");
        let sends = transport.sends();
        let edits = transport.edits();

        let signalled = tokio::time::Instant::now();
        root.cancel();
        running.await.unwrap();
        assert!(signalled.elapsed() < Duration::from_millis(100));

        // Let any straggler timers fire.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.sends(), sends);
        assert_eq!(transport.edits(), edits);
        assert_eq!(dispatcher.in_flight(), 0);
    }
}
