//! Input parsers for flow steps. All pure, all return `ValidationError`
//! with a message fit to show the user.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::services::{Interval, Range};

static SYMBOL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2,6}(\.[A-Z]{2})?$").ok());

static JOB_NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,48}$").ok());

pub const MAX_HOLDING_DAYS: (u32, u32) = (1, 365);
pub const NEWS_DAYS: (u32, u32) = (1, 30);

/// Upper-cased ticker such as `ANTM` or `BBCA.JK`.
pub fn symbol(input: &str) -> Result<String, ValidationError> {
    let candidate = input.trim().to_uppercase();
    if SYMBOL_RE.as_ref().is_some_and(|re| re.is_match(&candidate)) {
        Ok(candidate)
    } else {
        Err(ValidationError::Symbol(input.trim().to_string()))
    }
}

/// Backend job name. Only letters, digits, `-` and `_`, so it is always
/// one plain path segment.
pub fn job_name(input: &str) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    if JOB_NAME_RE.as_ref().is_some_and(|re| re.is_match(trimmed)) {
        Ok(trimmed.to_string())
    } else {
        Err(ValidationError::JobName(trimmed.to_string()))
    }
}

/// Positive decimal price. A comma is accepted as the decimal separator.
pub fn price(input: &str) -> Result<Decimal, ValidationError> {
    let trimmed = input.trim();
    let normalized = trimmed.replace(',', ".");
    match Decimal::from_str(&normalized) {
        Ok(value) if value > Decimal::ZERO => Ok(value.normalize()),
        _ => Err(ValidationError::Price(trimmed.to_string())),
    }
}

/// Price strictly above `buy`.
pub fn target_price(input: &str, buy: Decimal) -> Result<Decimal, ValidationError> {
    let value = price(input)?;
    if value <= buy {
        return Err(ValidationError::TargetNotAboveBuy {
            buy: buy.to_string(),
        });
    }
    Ok(value)
}

/// Price strictly below `buy`.
pub fn stop_loss(input: &str, buy: Decimal) -> Result<Decimal, ValidationError> {
    let value = price(input)?;
    if value >= buy {
        return Err(ValidationError::StopNotBelowBuy {
            buy: buy.to_string(),
        });
    }
    Ok(value)
}

/// `YYYY-MM-DD`, no later than `today`. The keyword `today` is accepted.
pub fn date(input: &str, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case("today") || trimmed.eq_ignore_ascii_case("hari ini") {
        return Ok(today);
    }
    let parsed = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| ValidationError::Date(trimmed.to_string()))?;
    if parsed > today {
        return Err(ValidationError::FutureDate(parsed.to_string()));
    }
    Ok(parsed)
}

/// Whole number within `min..=max`.
pub fn number_in(input: &str, (min, max): (u32, u32)) -> Result<u32, ValidationError> {
    let trimmed = input.trim();
    match trimmed.parse::<u32>() {
        Ok(n) if (min..=max).contains(&n) => Ok(n),
        _ => Err(ValidationError::OutOfRange {
            input: trimmed.to_string(),
            min,
            max,
        }),
    }
}

pub fn interval(input: &str) -> Result<Interval, ValidationError> {
    Interval::parse(input).ok_or_else(|| ValidationError::Choice {
        options: Interval::ALL.map(|i| i.as_str()).join(", "),
    })
}

pub fn range(input: &str) -> Result<Range, ValidationError> {
    Range::parse(input).ok_or_else(|| ValidationError::Choice {
        options: Range::ALL.map(|r| r.as_str()).join(", "),
    })
}

/// Yes/no typed as text, in English or Indonesian.
pub fn yes_no(input: &str) -> Result<bool, ValidationError> {
    match input.trim().to_lowercase().as_str() {
        "yes" | "y" | "ya" | "iya" | "true" => Ok(true),
        "no" | "n" | "tidak" | "false" => Ok(false),
        _ => Err(ValidationError::Choice {
            options: "yes, no".into(),
        }),
    }
}

/// `skip` keeps the current value.
pub fn is_skip(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "skip" | "lewati" | "-")
}
