//! Telegram transport: Bot API calls over reqwest, plus a long-polling
//! update source that turns `getUpdates` results into `InboundEvent`s.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::channels::{
    CallbackQuery, ChatId, EventStream, Format, InboundEvent, InlineKeyboard, MessageRef, Reply,
    Transport, UserId,
};
use crate::error::TransportError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

fn api_url(token: &SecretString, method: &str) -> String {
    format!("https://api.telegram.org/bot{}/{method}", token.expose_secret())
}

/// Outbound half: sendMessage / editMessageText / deleteMessage /
/// answerCallbackQuery.
pub struct TelegramTransport {
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(bot_token: SecretString, client: reqwest::Client) -> Self {
        Self { bot_token, client }
    }

    async fn call(&self, method: &str, body: &Value) -> Result<Value, TransportError> {
        let resp = self
            .client
            .post(api_url(&self.bot_token, method))
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = resp.status();
        let data: Value = resp
            .json()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if status.is_success() && data.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(data.get("result").cloned().unwrap_or(Value::Null));
        }

        Err(TransportError::Api {
            status: status.as_u16(),
            description: data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("no description")
                .to_string(),
        })
    }

    /// Send one chunk (≤4096 chars). Formatted text falls back to plain
    /// text when Telegram rejects the markup.
    async fn send_chunk(
        &self,
        chat: ChatId,
        text: &str,
        format: Format,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<MessageRef, TransportError> {
        let mut body = message_body(text, format, keyboard);
        body["chat_id"] = json!(chat.0);

        let result = match self.call("sendMessage", &body).await {
            Ok(result) => result,
            Err(TransportError::Api { status: 400, description }) if format != Format::Plain => {
                tracing::warn!(
                    %chat,
                    %description,
                    "Telegram sendMessage with markup failed; retrying without parse_mode"
                );
                let mut plain = message_body(text, Format::Plain, keyboard);
                plain["chat_id"] = json!(chat.0);
                self.call("sendMessage", &plain)
                    .await
                    .map_err(|e| TransportError::SendFailed {
                        chat: chat.0,
                        reason: e.to_string(),
                    })?
            }
            Err(e) => {
                return Err(TransportError::SendFailed {
                    chat: chat.0,
                    reason: e.to_string(),
                });
            }
        };

        parse_message_ref(&result).ok_or_else(|| TransportError::SendFailed {
            chat: chat.0,
            reason: "sendMessage result has no message_id".into(),
        })
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    fn max_message_len(&self) -> usize {
        TELEGRAM_MAX_MESSAGE_LENGTH
    }

    async fn send(&self, chat: ChatId, reply: &Reply) -> Result<MessageRef, TransportError> {
        self.send_chunk(chat, &reply.text, reply.format, reply.keyboard.as_ref())
            .await
    }

    async fn edit(
        &self,
        message: &MessageRef,
        reply: &Reply,
    ) -> Result<MessageRef, TransportError> {
        let mut body = message_body(&reply.text, reply.format, reply.keyboard.as_ref());
        body["chat_id"] = json!(message.chat.0);
        body["message_id"] = json!(message.message_id);

        match self.call("editMessageText", &body).await {
            Ok(_) => Ok(*message),
            // Editing to identical content is not a failure for our purposes.
            Err(TransportError::Api { description, .. })
                if description.contains("message is not modified") =>
            {
                Ok(*message)
            }
            Err(e) => Err(TransportError::EditFailed {
                chat: message.chat.0,
                message_id: message.message_id,
                reason: e.to_string(),
            }),
        }
    }

    async fn delete(&self, message: &MessageRef) -> Result<(), TransportError> {
        let body = json!({
            "chat_id": message.chat.0,
            "message_id": message.message_id,
        });
        self.call("deleteMessage", &body)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::DeleteFailed {
                chat: message.chat.0,
                message_id: message.message_id,
                reason: e.to_string(),
            })
    }

    async fn respond(
        &self,
        callback: &CallbackQuery,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut body = json!({ "callback_query_id": callback.id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call("answerCallbackQuery", &body)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::RespondFailed {
                callback_id: callback.id.clone(),
                reason: e.to_string(),
            })
    }
}

/// Inbound half: long-polls getUpdates for messages and callback queries.
pub struct TelegramPoller {
    bot_token: SecretString,
    allowed_users: Vec<String>,
    client: reqwest::Client,
}

impl TelegramPoller {
    pub fn new(bot_token: SecretString, allowed_users: Vec<String>, client: reqwest::Client) -> Self {
        Self {
            bot_token,
            allowed_users,
            client,
        }
    }

    /// Check if a username is in the allowed list.
    pub fn is_user_allowed(&self, username: &str) -> bool {
        check_user_allowed(&self.allowed_users, [username])
    }

    /// Start polling. The stream ends once `shutdown` is cancelled.
    pub fn start(self, shutdown: CancellationToken) -> EventStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            let url = api_url(&self.bot_token, "getUpdates");

            tracing::info!("Telegram poller listening for updates...");

            loop {
                let body = json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "callback_query"]
                });

                let request = self.client.post(&url).json(&body).send();
                let resp = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    resp = request => resp,
                };

                let resp = match resp {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        if pause_or_shutdown(&shutdown).await {
                            break;
                        }
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        if pause_or_shutdown(&shutdown).await {
                            break;
                        }
                        continue;
                    }
                };

                let results = match poll_results(&data) {
                    Ok(results) => results,
                    Err(description) => {
                        tracing::warn!(%description, "Telegram rejected getUpdates");
                        if pause_or_shutdown(&shutdown).await {
                            break;
                        }
                        continue;
                    }
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(event) = parse_update(update) else {
                        continue;
                    };

                    if !is_event_allowed(&self.allowed_users, &event) {
                        tracing::warn!(
                            user = %event.user(),
                            "Telegram: ignoring update from unauthorized user"
                        );
                        continue;
                    }

                    if tx.send(event).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }

            tracing::info!("Telegram poller stopped");
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Box::pin(stream)
    }
}

/// Back off after a poll error. Returns true if shutdown fired meanwhile.
async fn pause_or_shutdown(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => false,
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Updates of a getUpdates answer, or Telegram's description of why there
/// are none (bad token, another poller running).
fn poll_results(data: &Value) -> Result<&[Value], String> {
    if data.get("ok").and_then(Value::as_bool) != Some(true) {
        return Err(data
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("no description")
            .to_string());
    }
    data.get("result")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| "getUpdates result is not a list".to_string())
}

fn message_body(text: &str, format: Format, keyboard: Option<&InlineKeyboard>) -> Value {
    let mut body = json!({ "text": text });
    match format {
        Format::Plain => {}
        Format::Markdown => body["parse_mode"] = json!("Markdown"),
        Format::Html => body["parse_mode"] = json!("HTML"),
    }
    if let Some(keyboard) = keyboard {
        body["reply_markup"] = keyboard_markup(keyboard);
    }
    body
}

fn keyboard_markup(keyboard: &InlineKeyboard) -> Value {
    let rows: Vec<Vec<Value>> = keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| json!({ "text": b.text, "callback_data": b.callback_data }))
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

fn parse_message_ref(message: &Value) -> Option<MessageRef> {
    let message_id = message.get("message_id").and_then(Value::as_i64)?;
    let chat = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)?;
    Some(MessageRef {
        chat: ChatId(chat),
        message_id,
    })
}

/// Turn one getUpdates entry into an event. Non-text messages and other
/// update kinds are ignored.
fn parse_update(update: &Value) -> Option<InboundEvent> {
    if let Some(message) = update.get("message") {
        let text = message.get("text").and_then(Value::as_str)?;
        let from = message.get("from")?;
        let chat = message
            .get("chat")
            .and_then(|c| c.get("id"))
            .and_then(Value::as_i64)?;
        return Some(InboundEvent::Message {
            chat: ChatId(chat),
            user: UserId(from.get("id").and_then(Value::as_i64)?),
            username: from
                .get("username")
                .and_then(Value::as_str)
                .map(String::from),
            text: text.to_string(),
        });
    }

    if let Some(query) = update.get("callback_query") {
        let from = query.get("from")?;
        let message = query.get("message").and_then(parse_message_ref);
        let user = UserId(from.get("id").and_then(Value::as_i64)?);
        // Inaccessible messages carry no chat; fall back to the private chat.
        let chat = message.map(|m| m.chat).unwrap_or(ChatId(user.0));
        return Some(InboundEvent::Callback {
            chat,
            user,
            username: from
                .get("username")
                .and_then(Value::as_str)
                .map(String::from),
            query: CallbackQuery {
                id: query.get("id").and_then(Value::as_str)?.to_string(),
                data: query
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                message,
            },
        });
    }

    None
}

fn is_event_allowed(allowed_users: &[String], event: &InboundEvent) -> bool {
    let user_id = event.user().to_string();
    let username = match event {
        InboundEvent::Message { username, .. } | InboundEvent::Callback { username, .. } => {
            username.as_deref().unwrap_or("unknown")
        }
    };
    check_user_allowed(allowed_users, [username, user_id.as_str()])
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

// ── Tests ───────────────────────────────────────────────────────────
