//! User-facing text for command and collaborator results.

use crate::channels::{InlineButton, InlineKeyboard, Reply};
use crate::dialog::command::CallbackData;
use crate::dialog::state::FlowKind;
use crate::services::{
    AnalysisResult, JobInfo, JobRun, NewsItem, Position, PositionResult, SummaryResult,
};

/// Sent when a handler fails for reasons the user cannot fix.
pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again in a moment.";

/// Sent when the session vanished mid-flow.
pub const SESSION_EXPIRED: &str =
    "Your session expired or was interrupted. Please start again.";

pub const TIMED_OUT: &str = "That took too long and was stopped. Please try again later.";

/// Escape text for Telegram's HTML parse mode.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn help() -> Reply {
    let mut lines = vec![
        "<b>Stock assistant</b>".to_string(),
        String::new(),
        "<b>Positions</b>".to_string(),
    ];
    let describe = |flow: FlowKind| -> &'static str {
        match flow {
            FlowKind::SetPosition => "record a new position",
            FlowKind::ExitPosition => "close an active position",
            FlowKind::AdjustTarget => "move target price and stop loss",
            FlowKind::AnalyzeSymbol => "technical analysis of one symbol",
            FlowKind::GeneralAnalysis => "analysis of the whole watchlist",
            FlowKind::NewsLookup => "recent news for a symbol",
        }
    };
    for flow in [
        FlowKind::SetPosition,
        FlowKind::ExitPosition,
        FlowKind::AdjustTarget,
    ] {
        lines.push(format!("/{} - {}", flow.entry_command(), describe(flow)));
    }
    lines.push("/positions - list active positions".into());
    lines.push(String::new());
    lines.push("<b>Analysis</b>".into());
    for flow in [
        FlowKind::AnalyzeSymbol,
        FlowKind::GeneralAnalysis,
        FlowKind::NewsLookup,
    ] {
        lines.push(format!("/{} - {}", flow.entry_command(), describe(flow)));
    }
    lines.push(String::new());
    lines.push("<b>Jobs</b>".into());
    lines.push("/jobs - scheduled jobs".into());
    lines.push("/runjob &lt;name&gt; - run a job now".into());
    lines.push("/jobhistory [n] - recent job runs".into());
    lines.push(String::new());
    lines.push("Send 'cancel' at any time to stop the current step.".into());
    Reply::html(lines.join("\n"))
}

pub fn position_created(position: &Position) -> Reply {
    Reply::html(format!(
        "Position saved.\n\n{}\nAlerts: {}, monitor: {}",
        position_line(position),
        on_off(position.alert_price),
        on_off(position.alert_monitor)
    ))
}

pub fn position_closed(position: &Position) -> Reply {
    let pct = position
        .exit_price
        .and_then(|exit| position.return_pct(exit))
        .map(|pct| format!("{pct}%"))
        .unwrap_or_else(|| "n/a".into());
    Reply::html(format!(
        "Closed <b>{}</b> at {} on {}. Return: {pct}",
        escape(&position.symbol),
        position
            .exit_price
            .map(|p| p.to_string())
            .unwrap_or_default(),
        position
            .exit_date
            .map(|d| d.to_string())
            .unwrap_or_default()
    ))
}

pub fn position_updated(position: &Position) -> Reply {
    Reply::html(format!("Position updated.\n\n{}", position_line(position)))
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

fn position_line(p: &Position) -> String {
    format!(
        "<b>{}</b> bought {} on {}, target {}, stop {}, max {} days",
        escape(&p.symbol),
        p.buy_price,
        p.buy_date,
        p.target_price,
        p.stop_loss,
        p.max_holding_days
    )
}

/// Active positions, each with a button that runs a health check.
pub fn positions(positions: &[Position]) -> Reply {
    if positions.is_empty() {
        return Reply::text("You have no active positions. Use /setposition to add one.");
    }
    let lines: Vec<String> = positions.iter().map(position_line).collect();
    let mut keyboard = InlineKeyboard::new();
    for p in positions {
        let row: Vec<InlineButton> = [
            (format!("Check {}", p.symbol), CallbackData::Monitor(p.symbol.clone())),
            (format!("Remove {}", p.symbol), CallbackData::Remove(p.symbol.clone())),
        ]
        .into_iter()
        .filter_map(|(label, data)| data.encode().ok().map(|data| InlineButton::new(label, data)))
        .collect();
        keyboard = keyboard.row(row);
    }
    Reply::html(format!("<b>Active positions</b>\n\n{}", lines.join("\n"))).with_keyboard(keyboard)
}

pub fn analysis(result: &AnalysisResult) -> Reply {
    let mut text = format!(
        "<b>{}</b> ({} / {})\n",
        escape(&result.symbol),
        result.interval,
        result.range
    );
    if let Some(price) = result.last_price {
        text.push_str(&format!("Last price: {price}\n"));
    }
    if let Some(signal) = &result.signal {
        text.push_str(&format!("Signal: <b>{}</b>\n", escape(signal)));
    }
    text.push('\n');
    text.push_str(&escape(&result.summary));
    Reply::html(text)
}

pub fn position_check(result: &PositionResult) -> Reply {
    let mut text = format!("<b>{}</b> position check\n", escape(&result.symbol));
    if let Some(price) = result.last_price {
        text.push_str(&format!("Last price: {price}\n"));
    }
    if let Some(pct) = result.unrealized_pct {
        text.push_str(&format!("Unrealized: {pct}%\n"));
    }
    text.push_str(&format!(
        "Recommendation: <b>{}</b>\n\n{}",
        escape(&result.recommendation),
        escape(&result.summary)
    ));
    Reply::html(text)
}

pub fn summary(result: &SummaryResult) -> Reply {
    let mut text = format!("<b>Market overview</b> ({} symbols)\n\n", result.analyzed);
    text.push_str(&escape(&result.summary));
    if !result.failed.is_empty() {
        text.push_str(&format!(
            "\n\nCould not analyze: {}",
            escape(&result.failed.join(", "))
        ));
    }
    Reply::html(text)
}

pub fn news(symbol: &str, days: u32, items: &[NewsItem]) -> Reply {
    if items.is_empty() {
        return Reply::text(format!("No news for {symbol} in the last {days} days."));
    }
    let mut text = format!("<b>News for {}</b> (last {days} days)\n", escape(symbol));
    for item in items {
        text.push_str(&format!(
            "\n• <a href=\"{}\">{}</a>\n  {} · {}",
            escape(&item.url),
            escape(&item.title),
            escape(&item.source),
            item.published_at.format("%Y-%m-%d")
        ));
        if let Some(sentiment) = &item.sentiment {
            text.push_str(&format!(" · {}", escape(sentiment)));
        }
    }
    Reply::html(text)
}

pub fn jobs(jobs: &[JobInfo]) -> Reply {
    if jobs.is_empty() {
        return Reply::text("No scheduled jobs.");
    }
    let lines: Vec<String> = jobs
        .iter()
        .map(|job| {
            let last = job
                .last_run_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".into());
            format!(
                "<b>{}</b> [{}] {} (last run: {last})",
                escape(&job.name),
                escape(&job.schedule),
                if job.enabled { "enabled" } else { "disabled" }
            )
        })
        .collect();
    let buttons = jobs
        .iter()
        .filter(|job| job.enabled)
        .filter_map(|job| {
            CallbackData::RunJob(job.name.clone())
                .encode()
                .ok()
                .map(|data| InlineButton::new(format!("Run {}", job.name), data))
        })
        .collect();
    Reply::html(format!("<b>Scheduled jobs</b>\n\n{}", lines.join("\n")))
        .with_keyboard(InlineKeyboard::grid(buttons, 2))
}

pub fn job_run(run: &JobRun) -> Reply {
    let mut text = format!(
        "Job <b>{}</b> started at {}: {}",
        escape(&run.job_name),
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        escape(&run.status)
    );
    if let Some(message) = &run.message {
        text.push_str(&format!("\n{}", escape(message)));
    }
    Reply::html(text)
}

pub fn job_history(runs: &[JobRun]) -> Reply {
    if runs.is_empty() {
        return Reply::text("No job runs recorded yet.");
    }
    let lines: Vec<String> = runs
        .iter()
        .map(|run| {
            let took = run
                .finished_at
                .map(|end| format!(" in {}s", (end - run.started_at).num_seconds()))
                .unwrap_or_default();
            format!(
                "{} <b>{}</b> {}{took}",
                run.started_at.format("%m-%d %H:%M"),
                escape(&run.job_name),
                escape(&run.status)
            )
        })
        .collect();
    Reply::html(format!("<b>Recent job runs</b>\n\n{}", lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::channels::{Format, UserId};
    use crate::services::{Interval, Range};

    #[test]
    fn escape_html_specials() {
        assert_eq!(escape("a < b & c > d"), "a &lt; b &amp; c &gt; d");
        assert_eq!(escape(r#"say "hi""#), "say &quot;hi&quot;");
    }

    #[test]
    fn news_links_cannot_break_out_of_href() {
        let reply = news(
            "ANTM",
            3,
            &[NewsItem {
                title: "Nickel up".into(),
                url: r#"https://x.test/a" onclick="y"#.into(),
                source: "Wire".into(),
                published_at: Utc::now(),
                sentiment: None,
            }],
        );
        assert!(reply.text.contains(r#"href="https://x.test/a&quot; onclick=&quot;y""#));
    }

    #[test]
    fn help_lists_every_entry_command() {
        let reply = help();
        assert_eq!(reply.format, Format::Html);
        for flow in FlowKind::ALL {
            assert!(reply.text.contains(&format!("/{}", flow.entry_command())));
        }
    }

    #[test]
    fn positions_carry_monitor_buttons() {
        let position = Position {
            id: Uuid::new_v4(),
            user: UserId(1),
            symbol: "BBCA".into(),
            buy_price: dec!(9000),
            buy_date: NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
            target_price: dec!(10000),
            stop_loss: dec!(8500),
            max_holding_days: 30,
            alert_price: true,
            alert_monitor: true,
            is_active: true,
            exit_price: None,
            exit_date: None,
            created_at: Utc::now(),
        };
        let reply = positions(&[position]);
        let keyboard = reply.keyboard.unwrap();
        let data: Vec<&str> = keyboard.buttons().map(|b| b.callback_data.as_str()).collect();
        assert_eq!(data, vec!["mon:BBCA", "del:BBCA"]);
        assert_eq!(keyboard.rows.len(), 1);
        assert!(positions(&[]).keyboard.is_none());
    }

    #[test]
    fn analysis_escapes_summary() {
        let reply = analysis(&AnalysisResult {
            symbol: "ANTM".into(),
            interval: Interval::Day,
            range: Range::ThreeMonths,
            last_price: Some(dec!(1500)),
            signal: Some("BUY".into()),
            summary: "RSI < 30".into(),
        });
        assert!(reply.text.contains("RSI &lt; 30"));
        assert!(reply.text.contains("(1d / 3mo)"));
    }

    #[test]
    fn job_history_shows_duration() {
        let started = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let reply = job_history(&[JobRun {
            job_name: "daily_scan".into(),
            started_at: started,
            finished_at: Some(started + chrono::Duration::seconds(42)),
            status: "success".into(),
            message: None,
        }]);
        assert!(reply.text.contains("daily_scan"));
        assert!(reply.text.contains("in 42s"));
    }
}
