//! Supervised background work.
//!
//! Long-running analysis runs in its own task under a context derived from
//! the process-wide root token and bounded by a per-job timeout. Each launch
//! shows a loading placeholder while the work runs and then replaces it with
//! exactly one terminal update, success or failure. Panics inside the work
//! are caught at the task boundary. Once shutdown starts the terminal update
//! is skipped and logged instead.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::{ChatOutbox, Reply};
use crate::context::TaskContext;
use crate::dialog::render;
use crate::error::{Cancelled, Error, TransportError};
use crate::worker::loading::LoadingIndicator;

/// What to run and where to report it.
pub struct BackgroundJob {
    /// Short label for logs, e.g. `analyze_symbol`.
    pub name: &'static str,
    pub outbox: ChatOutbox,
    /// Placeholder text shown while the work runs.
    pub loading_text: String,
    pub timeout: Duration,
}

/// How a launched job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
    TimedOut,
    Panicked,
    /// Shutdown started; no terminal update was sent.
    Skipped,
}

/// Launches background jobs bound to the root shutdown token.
pub struct Dispatcher {
    root: CancellationToken,
    tracker: TaskTracker,
    animation_interval: Duration,
    /// Budget for delivering the terminal update.
    reply_timeout: Duration,
}

impl Dispatcher {
    pub fn new(root: CancellationToken, animation_interval: Duration, reply_timeout: Duration) -> Self {
        Self {
            root,
            tracker: TaskTracker::new(),
            animation_interval,
            reply_timeout,
        }
    }

    pub fn root(&self) -> &CancellationToken {
        &self.root
    }

    /// Jobs still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Start `work` without blocking the caller.
    ///
    /// `work` receives a context that is cancelled on shutdown and expires
    /// after `job.timeout`.
    pub fn launch<F, Fut>(&self, job: BackgroundJob, work: F) -> JoinHandle<Outcome>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Reply, Error>> + Send + 'static,
    {
        let root = self.root.clone();
        let animation_interval = self.animation_interval;
        let reply_timeout = self.reply_timeout;
        self.tracker.spawn(run_job(
            root,
            job,
            work,
            animation_interval,
            reply_timeout,
        ))
    }

    /// Cancel the root token, stop accepting jobs and wait up to `grace`
    /// for running ones. Returns false when the grace period ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.root.cancel();
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, "Waiting for background jobs to finish");
        }
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    pending = self.tracker.len(),
                    "Background jobs still running after shutdown grace period"
                );
                false
            }
        }
    }
}

async fn run_job<F, Fut>(
    root: CancellationToken,
    job: BackgroundJob,
    work: F,
    animation_interval: Duration,
    reply_timeout: Duration,
) -> Outcome
where
    F: FnOnce(TaskContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Reply, Error>> + Send + 'static,
{
    let id = Uuid::new_v4();
    let chat = job.outbox.chat_id();
    let user = job.outbox.user_id();
    let name = job.name;

    if root.is_cancelled() {
        info!(%id, job = name, %chat, "Shutdown in progress, not starting background job");
        return Outcome::Skipped;
    }

    let ctx = TaskContext::new(&root).with_timeout(job.timeout);
    debug!(%id, job = name, %chat, %user, timeout = ?job.timeout, "Background job started");

    let animation =
        LoadingIndicator::start(&ctx, job.outbox.clone(), job.loading_text, animation_interval)
            .await;

    let work_ctx = ctx.clone();
    let result = AssertUnwindSafe(async move { work(work_ctx).await })
        .catch_unwind()
        .await;

    let placeholder = animation.stop().await;

    let (outcome, reply) = match result {
        Ok(Ok(reply)) => (Outcome::Succeeded, reply),
        Ok(Err(e)) if e.is_shutdown() => {
            info!(%id, job = name, %chat, "Background job cancelled by shutdown, skipping terminal update");
            return Outcome::Skipped;
        }
        Ok(Err(Error::Cancelled(Cancelled::Deadline))) => {
            warn!(%id, job = name, %chat, %user, timeout = ?job.timeout, "Background job timed out");
            (Outcome::TimedOut, Reply::text(render::TIMED_OUT))
        }
        Ok(Err(e)) => {
            error!(%id, job = name, %chat, %user, error = %e, "Background job failed");
            (Outcome::Failed, Reply::text(render::GENERIC_FAILURE))
        }
        Err(panic) => {
            error!(
                %id,
                job = name,
                %chat,
                %user,
                panic = %panic_message(panic.as_ref()),
                "Background job panicked"
            );
            (Outcome::Panicked, Reply::text(render::GENERIC_FAILURE))
        }
    };

    if root.is_cancelled() {
        info!(%id, job = name, %chat, ?outcome, "Shutdown in progress, skipping terminal update");
        return Outcome::Skipped;
    }

    // The job's own deadline may already have passed.
    let deliver_ctx = TaskContext::new(&root).with_timeout(reply_timeout);
    let delivered = match placeholder {
        Some(message) => match job.outbox.edit(&deliver_ctx, &message, &reply).await {
            Ok(_) => Ok(()),
            Err(e @ TransportError::Cancelled(_)) => Err(e),
            Err(e) => {
                debug!(%id, error = %e, "Placeholder edit failed, sending result instead");
                let sent = job.outbox.send(&deliver_ctx, &reply).await.map(|_| ());
                if sent.is_ok() {
                    // The stale spinner would otherwise stay in the chat.
                    if let Err(e) = job.outbox.delete(&deliver_ctx, &message).await {
                        debug!(%id, error = %e, "Failed to delete stale placeholder");
                    }
                }
                sent
            }
        },
        None => job.outbox.send(&deliver_ctx, &reply).await.map(|_| ()),
    };

    match delivered {
        Ok(()) => {
            debug!(%id, job = name, %chat, ?outcome, "Background job finished");
            outcome
        }
        Err(TransportError::Cancelled(Cancelled::Shutdown)) => {
            info!(%id, job = name, %chat, ?outcome, "Shutdown in progress, terminal update skipped");
            Outcome::Skipped
        }
        Err(e) => {
            error!(%id, job = name, %chat, error = %e, "Failed to deliver background job result");
            outcome
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::channels::{ChatId, Outbox, UserId};
    use crate::test_support::{RecordingTransport, outbox_for};

    fn setup() -> (Arc<RecordingTransport>, Arc<Outbox>, Dispatcher) {
        let transport = RecordingTransport::new();
        let (outbox, root) = outbox_for(transport.clone());
        let dispatcher = Dispatcher::new(root, Duration::from_secs(60), Duration::from_secs(5));
        (transport, outbox, dispatcher)
    }

    fn job(outbox: &Arc<Outbox>, timeout: Duration) -> BackgroundJob {
        BackgroundJob {
            name: "test",
            outbox: outbox.chat(ChatId(1), UserId(2)),
            loading_text: "Working".into(),
            timeout,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_replaces_placeholder_once() {
        let (transport, outbox, dispatcher) = setup();
        let handle = dispatcher.launch(job(&outbox, Duration::from_secs(10)), |_ctx| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(Reply::text("done"))
        });
        assert_eq!(handle.await.unwrap(), Outcome::Succeeded);
        assert_eq!(transport.sends(), 1);
        assert_eq!(transport.edits(), 1);
        assert_eq!(transport.last_text().as_deref(), Some("done"));
        assert_eq!(transport.deletes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panic_is_contained_and_reported_once() {
        let (transport, outbox, dispatcher) = setup();
        let handle = dispatcher.launch(job(&outbox, Duration::from_secs(10)), |_ctx| async {
            if true {
                panic!("analyzer exploded");
            }
            Ok(Reply::text("unreachable"))
        });
        assert_eq!(handle.await.unwrap(), Outcome::Panicked);
        assert_eq!(transport.edits(), 1);
        assert_eq!(transport.last_text().as_deref(), Some(render::GENERIC_FAILURE));
    }

    #[tokio::test(start_paused = true)]
    async fn panic_before_first_await_is_contained() {
        let (transport, outbox, dispatcher) = setup();
        let handle = dispatcher.launch(
            job(&outbox, Duration::from_secs(10)),
            |_ctx| -> std::future::Ready<Result<Reply, Error>> { panic!("eager") },
        );
        assert_eq!(handle.await.unwrap(), Outcome::Panicked);
        assert_eq!(transport.edits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_timeout() {
        let (transport, outbox, dispatcher) = setup();
        let handle = dispatcher.launch(job(&outbox, Duration::from_secs(2)), |ctx| async move {
            ctx.run(tokio::time::sleep(Duration::from_secs(30))).await?;
            Ok(Reply::text("late"))
        });
        assert_eq!(handle.await.unwrap(), Outcome::TimedOut);
        assert_eq!(transport.edits(), 1);
        assert_eq!(transport.last_text().as_deref(), Some(render::TIMED_OUT));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_falls_back_to_send_when_placeholder_is_gone() {
        let (transport, outbox, dispatcher) = setup();
        transport.fail_edits(true);
        let handle = dispatcher.launch(job(&outbox, Duration::from_secs(10)), |_ctx| async {
            Err(crate::error::CollaboratorError::RequestFailed {
                service: "analyzer".into(),
                reason: "503".into(),
            }
            .into())
        });
        assert_eq!(handle.await.unwrap(), Outcome::Failed);
        assert_eq!(transport.sends(), 2);
        assert_eq!(transport.edits(), 0);
        assert_eq!(transport.deletes(), 1);
        assert_eq!(transport.last_text().as_deref(), Some(render::GENERIC_FAILURE));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_work_and_skips_terminal_update() {
        let (transport, outbox, dispatcher) = setup();
        let handle = dispatcher.launch(job(&outbox, Duration::from_secs(600)), |ctx| async move {
            ctx.run(std::future::pending::<()>()).await?;
            Ok(Reply::text("never"))
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(dispatcher.in_flight(), 1);

        assert!(dispatcher.shutdown(Duration::from_secs(5)).await);
        assert_eq!(handle.await.unwrap(), Outcome::Skipped);
        assert_eq!(transport.sends(), 1);
        assert_eq!(transport.edits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn launch_after_shutdown_sends_nothing() {
        let (transport, outbox, dispatcher) = setup();
        dispatcher.shutdown(Duration::from_secs(1)).await;
        let handle = dispatcher.launch(job(&outbox, Duration::from_secs(10)), |_ctx| async {
            Ok(Reply::text("x"))
        });
        assert_eq!(handle.await.unwrap(), Outcome::Skipped);
        assert_eq!(transport.sends(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_gives_up_after_grace() {
        let (_transport, outbox, dispatcher) = setup();
        let _handle = dispatcher.launch(job(&outbox, Duration::from_secs(600)), |_ctx| async {
            // Ignores its context
            tokio::time::sleep(Duration::from_secs(120)).await;
            Ok(Reply::text("stubborn"))
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!dispatcher.shutdown(Duration::from_secs(1)).await);
    }

    #[test]
    fn panic_message_handles_both_payload_kinds() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(s.as_ref()), "owned");
        let s: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(s.as_ref()), "non-string panic payload");
    }
}
