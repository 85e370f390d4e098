//! Error types for the stock assistant.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Cancelled: {0}")]
    Cancelled(#[from] Cancelled),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),
}

impl Error {
    /// True when the error only reflects process shutdown.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Cancelled(Cancelled::Shutdown))
            || matches!(self, Self::Transport(TransportError::Cancelled(Cancelled::Shutdown)))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Flow {flow} state code {code} collides with flow {other}")]
    OverlappingStates {
        flow: String,
        other: String,
        code: u16,
    },

    #[error("Flow {flow} state code {code} is outside its range {start}..{end}")]
    StateOutOfRange {
        flow: String,
        code: u16,
        start: u16,
        end: u16,
    },

    #[error("Entry command /{command} is claimed by both {flow} and {other}")]
    DuplicateEntry {
        command: String,
        flow: String,
        other: String,
    },
}

/// Bad user input. Always recoverable by re-prompting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("'{0}' is not a valid ticker symbol. Use 2-6 letters, e.g. ANTM or BBCA.")]
    Symbol(String),

    #[error("'{0}' is not a valid price. Send a positive number, e.g. 150.5.")]
    Price(String),

    #[error("Target price must be above the buy price ({buy}).")]
    TargetNotAboveBuy { buy: String },

    #[error("Stop loss must be below the buy price ({buy}).")]
    StopNotBelowBuy { buy: String },

    #[error("'{0}' is not a valid date. Use YYYY-MM-DD, e.g. 2025-01-10.")]
    Date(String),

    #[error("The date {0} is in the future.")]
    FutureDate(String),

    #[error("'{input}' is not a whole number between {min} and {max}.")]
    OutOfRange { input: String, min: u32, max: u32 },

    #[error("Please choose one of: {options}.")]
    Choice { options: String },

    #[error("There is no active position for {0}.")]
    UnknownPosition(String),

    #[error("'{0}' is not a valid job name. Use letters, digits, '-' or '_'. See /jobs.")]
    JobName(String),

    #[error("Button payload is too long ({0} bytes).")]
    PayloadTooLong(usize),

    #[error("Unrecognised button.")]
    UnknownCallback,
}

/// A session, position or job that was expected but is missing.
#[derive(Debug, thiserror::Error)]
pub enum NotFoundError {
    #[error("No scratch data for user {user} in state {state}")]
    Session { user: i64, state: String },

    #[error("Position {symbol} for user {user}")]
    Position { user: i64, symbol: String },

    #[error("Job {name}")]
    Job { name: String },
}

/// Outbound transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to send to chat {chat}: {reason}")]
    SendFailed { chat: i64, reason: String },

    #[error("Failed to edit message {message_id} in chat {chat}: {reason}")]
    EditFailed {
        chat: i64,
        message_id: i64,
        reason: String,
    },

    #[error("Failed to delete message {message_id} in chat {chat}: {reason}")]
    DeleteFailed {
        chat: i64,
        message_id: i64,
        reason: String,
    },

    #[error("Failed to answer callback {callback_id}: {reason}")]
    RespondFailed { callback_id: String, reason: String },

    #[error("Telegram API returned {status}: {description}")]
    Api { status: u16, description: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Outbound call aborted: {0}")]
    Cancelled(#[from] Cancelled),
}

/// Why a wait or a task was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Cancelled {
    #[error("shutdown in progress")]
    Shutdown,

    #[error("deadline exceeded")]
    Deadline,
}

/// Failures reported by external collaborators (analyzer, stores, backend).
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{service} request failed: {reason}")]
    RequestFailed { service: String, reason: String },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },

    #[error("{service} timed out after {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    #[error("Background task panicked: {0}")]
    Panicked(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_detection() {
        assert!(Error::Cancelled(Cancelled::Shutdown).is_shutdown());
        assert!(Error::Transport(TransportError::Cancelled(Cancelled::Shutdown)).is_shutdown());
        assert!(!Error::Cancelled(Cancelled::Deadline).is_shutdown());
        assert!(
            !Error::Transport(TransportError::Http("boom".into())).is_shutdown()
        );
    }

    #[test]
    fn validation_messages_are_user_facing() {
        let err = ValidationError::Price("abc".into());
        assert!(err.to_string().contains("'abc' is not a valid price"));
    }
}
