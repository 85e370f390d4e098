//! Animated "please wait" placeholder.
//!
//! The placeholder is sent once, then a dedicated task edits it with a
//! rotating suffix until the [`Animation`] handle is stopped or dropped.
//! The stop token is read immediately before every edit and raced against
//! the edit itself, so once `stop` returns no further edit goes out.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channels::{ChatOutbox, MessageRef, Reply};
use crate::context::TaskContext;

const FRAMES: [&str; 3] = [".", "..", "..."];

pub struct LoadingIndicator;

impl LoadingIndicator {
    /// Send the placeholder and start animating it.
    ///
    /// When the placeholder cannot be sent the handle is inert: there is
    /// nothing to animate and `placeholder()` is `None`.
    pub async fn start(
        ctx: &TaskContext,
        outbox: ChatOutbox,
        text: impl Into<String>,
        interval: Duration,
    ) -> Animation {
        let text = text.into();
        let anim_ctx = ctx.child();
        let stop = anim_ctx.token().clone();
        let edits = Arc::new(AtomicUsize::new(0));

        let placeholder = match outbox
            .send(&anim_ctx, &Reply::text(format!("{text}{}", FRAMES[0])))
            .await
        {
            Ok(message) => message,
            Err(e) => {
                warn!(chat = %outbox.chat_id(), error = %e, "Failed to send loading placeholder");
                return Animation {
                    placeholder: None,
                    stop,
                    handle: None,
                    edits,
                };
            }
        };

        let handle = tokio::spawn(animate(
            anim_ctx,
            outbox,
            placeholder,
            text,
            interval,
            Arc::clone(&edits),
        ));

        Animation {
            placeholder: Some(placeholder),
            stop,
            handle: Some(handle),
            edits,
        }
    }
}

async fn animate(
    ctx: TaskContext,
    outbox: ChatOutbox,
    placeholder: MessageRef,
    text: String,
    interval: Duration,
    edits: Arc<AtomicUsize>,
) {
    let stop = ctx.token().clone();
    let mut frame = 0;
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        // Checked right before the edit, never after.
        if stop.is_cancelled() {
            break;
        }
        frame = (frame + 1) % FRAMES.len();
        let reply = Reply::text(format!("{text}{}", FRAMES[frame]));

        let result = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            result = outbox.edit(&ctx, &placeholder, &reply) => result,
        };
        match result {
            Ok(_) => {
                edits.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                debug!(chat = %placeholder.chat, error = %e, "Loading animation stopped after failed edit");
                break;
            }
        }
    }
}

/// Handle to a running animation. Stopping consumes it, so stop happens
/// exactly once; dropping it also stops the animation.
pub struct Animation {
    placeholder: Option<MessageRef>,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
    edits: Arc<AtomicUsize>,
}

impl Animation {
    pub fn placeholder(&self) -> Option<MessageRef> {
        self.placeholder
    }

    /// Edits issued so far.
    pub fn edits(&self) -> usize {
        self.edits.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop animating and wait for the task to exit. Returns the
    /// placeholder so the caller can replace it with the final result.
    pub async fn stop(mut self) -> Option<MessageRef> {
        self.stop.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Loading animation task failed");
        }
        self.placeholder
    }
}

impl Drop for Animation {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
