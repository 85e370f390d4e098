//! Chat I/O: message model, the outbound `Transport` seam, the
//! rate-limited outbox and the Telegram implementation.

pub mod outbox;
pub mod telegram;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

pub use outbox::{ChatOutbox, Outbox};
pub use telegram::{TelegramPoller, TelegramTransport};

/// Telegram's limit on inline-button callback payloads.
pub const MAX_CALLBACK_DATA_LEN: usize = 64;

/// Chat identity (private chat, group or channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub i64);

/// Sender identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message the bot has sent and may later edit or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat: ChatId,
    pub message_id: i64,
}

/// Text formatting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Plain,
    Markdown,
    Html,
}

/// One inline button carrying an opaque callback payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Rows of inline buttons attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, buttons: Vec<InlineButton>) -> Self {
        self.rows.push(buttons);
        self
    }

    /// Lay `buttons` out `per_row` to a row.
    pub fn grid(buttons: Vec<InlineButton>, per_row: usize) -> Self {
        let per_row = per_row.max(1);
        let mut rows = Vec::new();
        let mut current = Vec::new();
        for button in buttons {
            current.push(button);
            if current.len() == per_row {
                rows.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            rows.push(current);
        }
        Self { rows }
    }

    pub fn buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.rows.iter().flatten()
    }
}

/// Outbound message content.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    pub text: String,
    pub format: Format,
    pub keyboard: Option<InlineKeyboard>,
}

impl Reply {
    /// Plain text reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// HTML-formatted reply.
    pub fn html(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: Format::Html,
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: InlineKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// An inline-button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackQuery {
    /// Platform id used to acknowledge the press.
    pub id: String,
    /// The button's payload, round-tripped unchanged.
    pub data: String,
    /// Message the button was attached to, if still accessible.
    pub message: Option<MessageRef>,
}

/// An inbound update the router handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message {
        chat: ChatId,
        user: UserId,
        username: Option<String>,
        text: String,
    },
    Callback {
        chat: ChatId,
        user: UserId,
        username: Option<String>,
        query: CallbackQuery,
    },
}

impl InboundEvent {
    pub fn chat(&self) -> ChatId {
        match self {
            Self::Message { chat, .. } | Self::Callback { chat, .. } => *chat,
        }
    }

    pub fn user(&self) -> UserId {
        match self {
            Self::Message { user, .. } | Self::Callback { user, .. } => *user,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Callback { .. } => "callback",
        }
    }
}

/// Stream of inbound updates.
pub type EventStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

/// Outbound side of a chat platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get the transport name.
    fn name(&self) -> &str;

    /// Longest text a single send or edit may carry. The outbox splits
    /// longer replies.
    fn max_message_len(&self) -> usize {
        usize::MAX
    }

    /// Send a new message.
    async fn send(&self, chat: ChatId, reply: &Reply) -> Result<MessageRef, TransportError>;

    /// Replace the content of a message the bot sent earlier.
    async fn edit(&self, message: &MessageRef, reply: &Reply)
    -> Result<MessageRef, TransportError>;

    /// Delete a message the bot sent earlier.
    async fn delete(&self, message: &MessageRef) -> Result<(), TransportError>;

    /// Acknowledge an inline-button press, optionally with a toast text.
    async fn respond(
        &self,
        callback: &CallbackQuery,
        text: Option<&str>,
    ) -> Result<(), TransportError>;
}

/// Split text into chunks of at most `max_len` bytes.
/// Tries to split on newlines, then spaces, then hard-cuts.
/// Always returns at least one chunk.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut cut = max_len;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }

        // Find a good split point
        let chunk = &remaining[..cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(cut);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { cut } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_grid_wraps_rows() {
        let buttons = (0..5)
            .map(|i| InlineButton::new(format!("b{i}"), format!("d{i}")))
            .collect();
        let kb = InlineKeyboard::grid(buttons, 2);
        assert_eq!(kb.rows.len(), 3);
        assert_eq!(kb.rows[2].len(), 1);
        assert_eq!(kb.buttons().count(), 5);
    }

    #[test]
    fn event_accessors() {
        let event = InboundEvent::Callback {
            chat: ChatId(10),
            user: UserId(20),
            username: None,
            query: CallbackQuery {
                id: "q".into(),
                data: "yes".into(),
                message: None,
            },
        };
        assert_eq!(event.chat(), ChatId(10));
        assert_eq!(event.user(), UserId(20));
        assert_eq!(event.kind(), "callback");
    }

    #[test]
    fn split_message_short() {
        let chunks = split_message("Hello", 4096);
        assert_eq!(chunks, vec!["Hello"]);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(2000));
        assert_eq!(chunks[1], "b".repeat(3000));
    }

    #[test]
    fn split_message_no_good_split_point() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_respects_char_boundaries() {
        let msg = "é".repeat(3000); // 6000 bytes
        let chunks = split_message(&msg, 4096);
        assert!(chunks.iter().all(|c| c.len() <= 4096));
        assert_eq!(chunks.concat(), msg);
    }
}
