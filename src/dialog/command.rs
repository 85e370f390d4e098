//! Slash commands and inline-button payloads.

use crate::channels::MAX_CALLBACK_DATA_LEN;
use crate::dialog::state::FlowKind;
use crate::error::ValidationError;
use crate::services::{Interval, Range};

/// Default number of runs shown by `/jobhistory`.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;
const MAX_HISTORY_LIMIT: usize = 50;

/// Parses message text into a `Command`.
pub struct CommandParser;

impl CommandParser {
    /// Parse message content into a Command.
    pub fn parse(content: &str) -> Command {
        let trimmed = content.trim();
        let lower = trimmed.to_lowercase();

        match lower.as_str() {
            // Cancel keywords work without a slash
            "cancel" | "batal" | "/cancel" | "/batal" | "/stop" => return Command::Cancel,
            _ => {}
        }

        if !trimmed.starts_with('/') {
            return Command::Text(trimmed.to_string());
        }

        let mut parts = trimmed.split_whitespace();
        let head = parts.next().unwrap_or_default().to_lowercase();
        let args: Vec<&str> = parts.collect();
        // `/cmd@botname` is what group chats send
        let name = head
            .trim_start_matches('/')
            .split('@')
            .next()
            .unwrap_or_default();

        match name {
            "start" => Command::Start,
            "help" | "?" => Command::Help,
            "cancel" => Command::Cancel,
            "positions" | "list" => Command::Positions,
            "jobs" => Command::Jobs,
            "runjob" => Command::RunJob {
                name: args.first().map(|s| s.to_string()),
            },
            "jobhistory" => Command::JobHistory {
                limit: parse_limit(args.first().copied()),
            },
            _ => match FlowKind::ALL.iter().find(|f| f.entry_command() == name) {
                Some(flow) => Command::Enter(*flow),
                None => Command::Unknown(format!("/{name}")),
            },
        }
    }
}

fn parse_limit(arg: Option<&str>) -> usize {
    arg.and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .map(|n| n.min(MAX_HISTORY_LIMIT))
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
}

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    /// Leave the active flow.
    Cancel,
    /// Start a flow, dropping any flow already in progress.
    Enter(FlowKind),
    Positions,
    Jobs,
    RunJob { name: Option<String> },
    JobHistory { limit: usize },
    /// Slash command nobody handles.
    Unknown(String),
    /// Free text, fed to the active flow.
    Text(String),
}

impl Command {
    /// Commands that bypass the state check and reset the session.
    pub fn is_global(&self) -> bool {
        !matches!(self, Self::Text(_))
    }
}

/// Typed inline-button payload.
///
/// Encoded as `tag` or `tag:value`, never longer than Telegram's 64-byte
/// callback limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackData {
    Cancel,
    Yes,
    No,
    Skip,
    Interval(Interval),
    Range(Range),
    /// Pick one of the listed positions.
    Symbol(String),
    /// Run a position health check in the background.
    Monitor(String),
    /// Delete an active position.
    Remove(String),
    /// Trigger a scheduled job.
    RunJob(String),
}

impl CallbackData {
    pub fn encode(&self) -> Result<String, ValidationError> {
        let encoded = match self {
            Self::Cancel => "cancel".to_string(),
            Self::Yes => "yes".to_string(),
            Self::No => "no".to_string(),
            Self::Skip => "skip".to_string(),
            Self::Interval(i) => format!("iv:{}", i.as_str()),
            Self::Range(r) => format!("rg:{}", r.as_str()),
            Self::Symbol(s) => format!("sym:{s}"),
            Self::Monitor(s) => format!("mon:{s}"),
            Self::Remove(s) => format!("del:{s}"),
            Self::RunJob(name) => format!("job:{name}"),
        };
        if encoded.len() > MAX_CALLBACK_DATA_LEN {
            return Err(ValidationError::PayloadTooLong(encoded.len()));
        }
        Ok(encoded)
    }

    pub fn decode(data: &str) -> Result<Self, ValidationError> {
        if data.len() > MAX_CALLBACK_DATA_LEN {
            return Err(ValidationError::PayloadTooLong(data.len()));
        }
        let (tag, value) = match data.split_once(':') {
            Some((tag, value)) => (tag, Some(value)),
            None => (data, None),
        };
        let decoded = match (tag, value) {
            ("cancel", None) => Self::Cancel,
            ("yes", None) => Self::Yes,
            ("no", None) => Self::No,
            ("skip", None) => Self::Skip,
            ("iv", Some(v)) => Self::Interval(Interval::parse(v).ok_or(ValidationError::UnknownCallback)?),
            ("rg", Some(v)) => Self::Range(Range::parse(v).ok_or(ValidationError::UnknownCallback)?),
            ("sym", Some(v)) if !v.is_empty() => Self::Symbol(v.to_string()),
            ("mon", Some(v)) if !v.is_empty() => Self::Monitor(v.to_string()),
            ("del", Some(v)) if !v.is_empty() => Self::Remove(v.to_string()),
            ("job", Some(v)) if !v.is_empty() => Self::RunJob(v.to_string()),
            _ => return Err(ValidationError::UnknownCallback),
        };
        Ok(decoded)
    }

    /// Text equivalent, for steps that accept both buttons and typing.
    pub fn as_text(&self) -> String {
        match self {
            Self::Cancel => "cancel".into(),
            Self::Yes => "yes".into(),
            Self::No => "no".into(),
            Self::Skip => "skip".into(),
            Self::Interval(i) => i.as_str().into(),
            Self::Range(r) => r.as_str().into(),
            Self::Symbol(s) | Self::Monitor(s) | Self::Remove(s) | Self::RunJob(s) => s.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_entry_commands() {
        assert_eq!(
            CommandParser::parse("/setposition"),
            Command::Enter(FlowKind::SetPosition)
        );
        assert_eq!(
            CommandParser::parse("/analyzeall@StockBot"),
            Command::Enter(FlowKind::GeneralAnalysis)
        );
        assert_eq!(
            CommandParser::parse("  /NEWS "),
            Command::Enter(FlowKind::NewsLookup)
        );
    }

    #[test]
    fn parse_cancel_keywords() {
        for input in ["cancel", "Batal", "/cancel", "/cancel@StockBot"] {
            assert_eq!(CommandParser::parse(input), Command::Cancel, "{input}");
        }
    }

    #[test]
    fn parse_job_commands() {
        assert_eq!(
            CommandParser::parse("/runjob daily_scan"),
            Command::RunJob {
                name: Some("daily_scan".into())
            }
        );
        assert_eq!(CommandParser::parse("/runjob"), Command::RunJob { name: None });
        assert_eq!(
            CommandParser::parse("/jobhistory 5"),
            Command::JobHistory { limit: 5 }
        );
        assert_eq!(
            CommandParser::parse("/jobhistory 999"),
            Command::JobHistory {
                limit: MAX_HISTORY_LIMIT
            }
        );
        assert_eq!(
            CommandParser::parse("/jobhistory x"),
            Command::JobHistory {
                limit: DEFAULT_HISTORY_LIMIT
            }
        );
    }

    #[test]
    fn plain_text_and_unknown() {
        assert_eq!(
            CommandParser::parse(" 150.5 "),
            Command::Text("150.5".into())
        );
        assert!(!CommandParser::parse("ANTM").is_global());
        assert_eq!(
            CommandParser::parse("/frobnicate"),
            Command::Unknown("/frobnicate".into())
        );
    }

    #[test]
    fn callback_payloads_decode_back() {
        for data in [
            CallbackData::Cancel,
            CallbackData::Yes,
            CallbackData::Interval(Interval::Week),
            CallbackData::Range(Range::TwoYears),
            CallbackData::Monitor("BBCA".into()),
            CallbackData::Remove("ANTM".into()),
        ] {
            let encoded = data.encode().unwrap();
            assert_eq!(CallbackData::decode(&encoded).unwrap(), data);
        }
    }

    #[test]
    fn callback_payloads_are_bounded() {
        let long = "x".repeat(70);
        assert_eq!(
            CallbackData::RunJob(long.clone()).encode(),
            Err(ValidationError::PayloadTooLong(74))
        );
        assert_eq!(
            CallbackData::decode(&long),
            Err(ValidationError::PayloadTooLong(70))
        );
        assert_eq!(
            CallbackData::decode("iv:5m"),
            Err(ValidationError::UnknownCallback)
        );
        assert_eq!(
            CallbackData::decode("sym:"),
            Err(ValidationError::UnknownCallback)
        );
    }
}
