//! Rate-limited outbound gate.
//!
//! Every send, edit, delete and callback acknowledgement goes through the
//! `Outbox`, which takes tokens from the three limiter tiers and refuses to
//! touch the transport once shutdown has begun. Replies longer than the
//! transport accepts are split here, and each chunk pays for its own tokens.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channels::{
    CallbackQuery, ChatId, MessageRef, Reply, Transport, UserId, split_message,
};
use crate::context::TaskContext;
use crate::error::{Cancelled, TransportError};
use crate::ratelimit::RateLimiter;

/// Transport wrapped in the rate limiter and the shutdown token.
pub struct Outbox {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    root: CancellationToken,
}

impl Outbox {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        root: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            limiter,
            root,
        })
    }

    /// Scope the outbox to one chat and the user it is acting for.
    pub fn chat(self: &Arc<Self>, chat: ChatId, user: UserId) -> ChatOutbox {
        ChatOutbox {
            outbox: Arc::clone(self),
            chat,
            user,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Wait for all tiers, then re-check shutdown so a send that waited
    /// through the start of shutdown is skipped.
    async fn gate(
        &self,
        ctx: &TaskContext,
        op: &'static str,
        chat: ChatId,
        user: UserId,
    ) -> Result<(), TransportError> {
        if self.root.is_cancelled() {
            debug!(op, %chat, "Skipping outbound call: shutdown in progress");
            return Err(Cancelled::Shutdown.into());
        }
        self.limiter.acquire(ctx, chat, Some(user)).await?;
        if self.root.is_cancelled() {
            debug!(op, %chat, "Skipping outbound call: shutdown in progress");
            return Err(Cancelled::Shutdown.into());
        }
        Ok(())
    }

    /// Cut `reply` into pieces the transport accepts. The keyboard rides on
    /// the last piece.
    fn chunks(&self, reply: &Reply) -> Vec<Reply> {
        let max_len = self.transport.max_message_len();
        if reply.text.len() <= max_len {
            return vec![reply.clone()];
        }
        let pieces = split_message(&reply.text, max_len);
        let last = pieces.len() - 1;
        pieces
            .into_iter()
            .enumerate()
            .map(|(i, text)| Reply {
                text,
                format: reply.format,
                keyboard: if i == last { reply.keyboard.clone() } else { None },
            })
            .collect()
    }

    /// Send `reply`, split if needed. Returns the last message sent.
    pub async fn send(
        &self,
        ctx: &TaskContext,
        chat: ChatId,
        user: UserId,
        reply: &Reply,
    ) -> Result<MessageRef, TransportError> {
        let chunks = self.chunks(reply);
        if chunks.len() > 1 {
            debug!(%chat, chunks = chunks.len(), "Splitting long reply");
        }
        let mut sent = None;
        for chunk in &chunks {
            self.gate(ctx, "send", chat, user).await?;
            sent = Some(ctx.run_to_deadline(self.transport.send(chat, chunk)).await??);
        }
        sent.ok_or_else(|| TransportError::SendFailed {
            chat: chat.0,
            reason: "nothing to send".into(),
        })
    }

    /// Replace `message` with the first chunk of `reply`; any further chunks
    /// follow as new messages. Returns the edited message.
    pub async fn edit(
        &self,
        ctx: &TaskContext,
        user: UserId,
        message: &MessageRef,
        reply: &Reply,
    ) -> Result<MessageRef, TransportError> {
        let mut chunks = self.chunks(reply).into_iter();
        let Some(first) = chunks.next() else {
            return Ok(*message);
        };
        self.gate(ctx, "edit", message.chat, user).await?;
        let edited = ctx.run_to_deadline(self.transport.edit(message, &first)).await??;
        for chunk in chunks {
            self.gate(ctx, "send", message.chat, user).await?;
            ctx.run_to_deadline(self.transport.send(message.chat, &chunk))
                .await??;
        }
        Ok(edited)
    }

    pub async fn delete(
        &self,
        ctx: &TaskContext,
        user: UserId,
        message: &MessageRef,
    ) -> Result<(), TransportError> {
        self.gate(ctx, "delete", message.chat, user).await?;
        ctx.run_to_deadline(self.transport.delete(message)).await?
    }

    pub async fn respond(
        &self,
        ctx: &TaskContext,
        chat: ChatId,
        user: UserId,
        callback: &CallbackQuery,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        self.gate(ctx, "respond", chat, user).await?;
        ctx.run_to_deadline(self.transport.respond(callback, text)).await?
    }
}

/// Outbox bound to one chat and user.
#[derive(Clone)]
pub struct ChatOutbox {
    outbox: Arc<Outbox>,
    chat: ChatId,
    user: UserId,
}

impl ChatOutbox {
    pub fn chat_id(&self) -> ChatId {
        self.chat
    }

    pub fn user_id(&self) -> UserId {
        self.user
    }

    pub fn is_shutting_down(&self) -> bool {
        self.outbox.is_shutting_down()
    }

    pub async fn send(&self, ctx: &TaskContext, reply: &Reply) -> Result<MessageRef, TransportError> {
        self.outbox.send(ctx, self.chat, self.user, reply).await
    }

    pub async fn edit(
        &self,
        ctx: &TaskContext,
        message: &MessageRef,
        reply: &Reply,
    ) -> Result<MessageRef, TransportError> {
        self.outbox.edit(ctx, self.user, message, reply).await
    }

    pub async fn delete(&self, ctx: &TaskContext, message: &MessageRef) -> Result<(), TransportError> {
        self.outbox.delete(ctx, self.user, message).await
    }

    pub async fn respond(
        &self,
        ctx: &TaskContext,
        callback: &CallbackQuery,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        self.outbox
            .respond(ctx, self.chat, self.user, callback, text)
            .await
    }
}
