//! Pure dialog transitions.
//!
//! `transition(state, data, input, env)` decides what one inbound input does
//! to a user's conversation without touching the session table, the
//! transport or any collaborator. The router applies the resulting [`Step`].

use std::collections::HashMap;
use std::ops::Range as CodeRange;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::channels::{InlineButton, InlineKeyboard, Reply, UserId};
use crate::dialog::command::CallbackData;
use crate::dialog::state::{
    AdjustTargetData, AdjustTargetStep, AnalyzeSymbolData, AnalyzeSymbolStep, DialogState,
    ExitPositionData, ExitPositionStep, FlowData, FlowKind, GeneralAnalysisData,
    GeneralAnalysisStep, NewsLookupData, NewsLookupStep, SetPositionData, SetPositionStep,
};
use crate::dialog::validate;
use crate::error::{ConfigError, ValidationError};
use crate::services::{Interval, NewPosition, Position, Range};

/// One inbound input fed to the active flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Text(String),
    Button(CallbackData),
}

impl Input {
    /// Text form of the input; buttons map to their typed equivalent.
    pub fn text(&self) -> String {
        match self {
            Self::Text(t) => t.trim().to_string(),
            Self::Button(data) => data.as_text(),
        }
    }
}

/// Facts a transition may depend on besides the session.
#[derive(Debug, Clone, Copy)]
pub struct Env {
    pub user: UserId,
    pub today: NaiveDate,
}

/// Work to do once a flow has collected everything it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    CreatePosition(NewPosition),
    /// The position with exit fields filled in and marked inactive.
    ClosePosition(Position),
    /// The position with new target and stop loss.
    UpdatePosition(Position),
    AnalyzeSymbol {
        symbol: String,
        interval: Interval,
        range: Range,
    },
    AnalyzeUniverse {
        interval: Interval,
        range: Range,
    },
    FetchNews {
        symbol: String,
        days: u32,
    },
}

impl Effect {
    pub fn flow(&self) -> FlowKind {
        match self {
            Self::CreatePosition(_) => FlowKind::SetPosition,
            Self::ClosePosition(_) => FlowKind::ExitPosition,
            Self::UpdatePosition(_) => FlowKind::AdjustTarget,
            Self::AnalyzeSymbol { .. } => FlowKind::AnalyzeSymbol,
            Self::AnalyzeUniverse { .. } => FlowKind::GeneralAnalysis,
            Self::FetchNews { .. } => FlowKind::NewsLookup,
        }
    }

    /// Runs in the background dispatcher rather than inline.
    pub fn is_background(&self) -> bool {
        matches!(
            self,
            Self::AnalyzeSymbol { .. } | Self::AnalyzeUniverse { .. } | Self::FetchNews { .. }
        )
    }
}

/// Outcome of one transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Move to `state` with updated scratch and ask the next question.
    Advance {
        state: DialogState,
        data: FlowData,
        reply: Reply,
    },
    /// Input rejected. State and scratch stay as they are.
    Reprompt {
        error: ValidationError,
        reply: Reply,
    },
    /// Flow complete. Run the effect, reset, then report.
    Finish { effect: Effect },
    /// User declined at a confirmation. Reset and say so.
    Abort { reply: Reply },
    /// Scratch is missing or belongs to another flow.
    Expired,
}

/// Start `flow`. `positions` are the user's active positions, consulted by
/// flows that pick one of them.
pub fn enter(flow: FlowKind, positions: Vec<Position>) -> Step {
    if flow.needs_positions() && positions.is_empty() {
        return Step::Abort {
            reply: Reply::text("You have no active positions. Use /setposition to add one."),
        };
    }
    let data = match flow {
        FlowKind::ExitPosition => FlowData::ExitPosition(ExitPositionData {
            positions,
            ..Default::default()
        }),
        FlowKind::AdjustTarget => FlowData::AdjustTarget(AdjustTargetData {
            positions,
            ..Default::default()
        }),
        other => FlowData::empty(other),
    };
    advance(flow.first_state(), data)
}

/// Apply `input` to the user's current state and scratch.
pub fn transition(
    state: &DialogState,
    data: Option<&FlowData>,
    input: &Input,
    env: &Env,
) -> Step {
    if state.is_idle() {
        return Step::Abort {
            reply: Reply::text("Nothing is in progress. Send /help to see what I can do."),
        };
    }
    let Some(data) = data else {
        return Step::Expired;
    };

    match (state, data) {
        (DialogState::SetPosition(step), FlowData::SetPosition(d)) => {
            set_position(*step, d, input, env)
        }
        (DialogState::ExitPosition(step), FlowData::ExitPosition(d)) => {
            exit_position(*step, d, input, env)
        }
        (DialogState::AdjustTarget(step), FlowData::AdjustTarget(d)) => {
            adjust_target(*step, d, input)
        }
        (DialogState::AnalyzeSymbol(step), FlowData::AnalyzeSymbol(d)) => {
            analyze_symbol(*step, d, input)
        }
        (DialogState::GeneralAnalysis(step), FlowData::GeneralAnalysis(d)) => {
            general_analysis(*step, d, input)
        }
        (DialogState::NewsLookup(step), FlowData::NewsLookup(d)) => news_lookup(*step, d, input),
        _ => Step::Expired,
    }
}

fn advance(state: DialogState, data: FlowData) -> Step {
    let reply = prompt(&state, &data);
    Step::Advance { state, data, reply }
}

fn reprompt(state: DialogState, data: &FlowData, error: ValidationError) -> Step {
    let question = prompt(&state, data);
    Step::Reprompt {
        reply: Reply {
            text: format!("{error}\n\n{}", question.text),
            ..question
        },
        error,
    }
}

/// Collapse a validation result into either the value or a reprompt.
macro_rules! valid {
    ($result:expr, $state:expr, $data:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) => return reprompt($state, $data, error),
        }
    };
}

/// Collapse a missing earlier answer into `Expired`.
macro_rules! earlier {
    ($opt:expr) => {
        match $opt {
            Some(value) => value,
            None => return Step::Expired,
        }
    };
}

fn yes_no(input: &Input) -> Result<bool, ValidationError> {
    match input {
        Input::Button(CallbackData::Yes) => Ok(true),
        Input::Button(CallbackData::No) => Ok(false),
        Input::Button(_) => Err(ValidationError::Choice {
            options: "yes, no".into(),
        }),
        Input::Text(text) => validate::yes_no(text),
    }
}

fn interval(input: &Input) -> Result<Interval, ValidationError> {
    match input {
        Input::Button(CallbackData::Interval(i)) => Ok(*i),
        other => validate::interval(&other.text()),
    }
}

fn range(input: &Input) -> Result<Range, ValidationError> {
    match input {
        Input::Button(CallbackData::Range(r)) => Ok(*r),
        other => validate::range(&other.text()),
    }
}

fn pick_position(positions: &[Position], input: &Input) -> Result<Position, ValidationError> {
    let symbol = validate::symbol(&input.text())?;
    positions
        .iter()
        .find(|p| p.symbol == symbol)
        .cloned()
        .ok_or(ValidationError::UnknownPosition(symbol))
}

fn set_position(step: SetPositionStep, d: &SetPositionData, input: &Input, env: &Env) -> Step {
    let state = DialogState::SetPosition(step);
    let current = FlowData::SetPosition(d.clone());
    let text = input.text();
    let mut next = d.clone();

    let next_step = match step {
        SetPositionStep::Symbol => {
            next.symbol = Some(valid!(validate::symbol(&text), state, &current));
            SetPositionStep::BuyPrice
        }
        SetPositionStep::BuyPrice => {
            next.buy_price = Some(valid!(validate::price(&text), state, &current));
            SetPositionStep::BuyDate
        }
        SetPositionStep::BuyDate => {
            next.buy_date = Some(valid!(validate::date(&text, env.today), state, &current));
            SetPositionStep::TargetPrice
        }
        SetPositionStep::TargetPrice => {
            let buy = earlier!(d.buy_price);
            next.target_price = Some(valid!(validate::target_price(&text, buy), state, &current));
            SetPositionStep::StopLoss
        }
        SetPositionStep::StopLoss => {
            let buy = earlier!(d.buy_price);
            next.stop_loss = Some(valid!(validate::stop_loss(&text, buy), state, &current));
            SetPositionStep::MaxHolding
        }
        SetPositionStep::MaxHolding => {
            next.max_holding_days = Some(valid!(
                validate::number_in(&text, validate::MAX_HOLDING_DAYS),
                state,
                &current
            ));
            SetPositionStep::AlertPrice
        }
        SetPositionStep::AlertPrice => {
            next.alert_price = Some(valid!(yes_no(input), state, &current));
            SetPositionStep::AlertMonitor
        }
        SetPositionStep::AlertMonitor => {
            let alert_monitor = valid!(yes_no(input), state, &current);
            let position = NewPosition {
                user: env.user,
                symbol: earlier!(d.symbol.clone()),
                buy_price: earlier!(d.buy_price),
                buy_date: earlier!(d.buy_date),
                target_price: earlier!(d.target_price),
                stop_loss: earlier!(d.stop_loss),
                max_holding_days: earlier!(d.max_holding_days),
                alert_price: earlier!(d.alert_price),
                alert_monitor,
            };
            return Step::Finish {
                effect: Effect::CreatePosition(position),
            };
        }
    };
    advance(DialogState::SetPosition(next_step), FlowData::SetPosition(next))
}

fn exit_position(step: ExitPositionStep, d: &ExitPositionData, input: &Input, env: &Env) -> Step {
    let state = DialogState::ExitPosition(step);
    let current = FlowData::ExitPosition(d.clone());
    let text = input.text();
    let mut next = d.clone();

    let next_step = match step {
        ExitPositionStep::Symbol => {
            next.selected = Some(valid!(pick_position(&d.positions, input), state, &current));
            ExitPositionStep::ExitPrice
        }
        ExitPositionStep::ExitPrice => {
            next.exit_price = Some(valid!(validate::price(&text), state, &current));
            ExitPositionStep::ExitDate
        }
        ExitPositionStep::ExitDate => {
            let selected = earlier!(d.selected.as_ref());
            let exit_date = valid!(validate::date(&text, env.today), state, &current);
            if exit_date < selected.buy_date {
                return reprompt(
                    state,
                    &current,
                    ValidationError::Date(format!("{exit_date} is before the buy date")),
                );
            }
            next.exit_date = Some(exit_date);
            ExitPositionStep::Confirm
        }
        ExitPositionStep::Confirm => {
            if !valid!(yes_no(input), state, &current) {
                return Step::Abort {
                    reply: Reply::text("Exit cancelled. The position is unchanged."),
                };
            }
            let mut position = earlier!(d.selected.clone());
            position.exit_price = Some(earlier!(d.exit_price));
            position.exit_date = Some(earlier!(d.exit_date));
            position.is_active = false;
            return Step::Finish {
                effect: Effect::ClosePosition(position),
            };
        }
    };
    advance(DialogState::ExitPosition(next_step), FlowData::ExitPosition(next))
}

fn adjust_target(step: AdjustTargetStep, d: &AdjustTargetData, input: &Input) -> Step {
    let state = DialogState::AdjustTarget(step);
    let current = FlowData::AdjustTarget(d.clone());
    let text = input.text();
    let mut next = d.clone();

    let next_step = match step {
        AdjustTargetStep::Symbol => {
            next.selected = Some(valid!(pick_position(&d.positions, input), state, &current));
            AdjustTargetStep::TargetPrice
        }
        AdjustTargetStep::TargetPrice => {
            let buy = earlier!(d.selected.as_ref()).buy_price;
            next.target_price = Some(valid!(validate::target_price(&text, buy), state, &current));
            AdjustTargetStep::StopLoss
        }
        AdjustTargetStep::StopLoss => {
            let mut position = earlier!(d.selected.clone());
            let skip = matches!(input, Input::Button(CallbackData::Skip)) || validate::is_skip(&text);
            if !skip {
                position.stop_loss =
                    valid!(validate::stop_loss(&text, position.buy_price), state, &current);
            }
            position.target_price = earlier!(d.target_price);
            return Step::Finish {
                effect: Effect::UpdatePosition(position),
            };
        }
    };
    advance(DialogState::AdjustTarget(next_step), FlowData::AdjustTarget(next))
}

fn analyze_symbol(step: AnalyzeSymbolStep, d: &AnalyzeSymbolData, input: &Input) -> Step {
    let state = DialogState::AnalyzeSymbol(step);
    let current = FlowData::AnalyzeSymbol(d.clone());
    let mut next = d.clone();

    let next_step = match step {
        AnalyzeSymbolStep::Symbol => {
            next.symbol = Some(valid!(validate::symbol(&input.text()), state, &current));
            AnalyzeSymbolStep::Interval
        }
        AnalyzeSymbolStep::Interval => {
            next.interval = Some(valid!(interval(input), state, &current));
            AnalyzeSymbolStep::Range
        }
        AnalyzeSymbolStep::Range => {
            let range = valid!(range(input), state, &current);
            return Step::Finish {
                effect: Effect::AnalyzeSymbol {
                    symbol: earlier!(d.symbol.clone()),
                    interval: earlier!(d.interval),
                    range,
                },
            };
        }
    };
    advance(DialogState::AnalyzeSymbol(next_step), FlowData::AnalyzeSymbol(next))
}

fn general_analysis(step: GeneralAnalysisStep, d: &GeneralAnalysisData, input: &Input) -> Step {
    let state = DialogState::GeneralAnalysis(step);
    let current = FlowData::GeneralAnalysis(d.clone());
    let mut next = d.clone();

    let next_step = match step {
        GeneralAnalysisStep::Interval => {
            next.interval = Some(valid!(interval(input), state, &current));
            GeneralAnalysisStep::Range
        }
        GeneralAnalysisStep::Range => {
            next.range = Some(valid!(range(input), state, &current));
            GeneralAnalysisStep::Confirm
        }
        GeneralAnalysisStep::Confirm => {
            if !valid!(yes_no(input), state, &current) {
                return Step::Abort {
                    reply: Reply::text("Analysis cancelled."),
                };
            }
            return Step::Finish {
                effect: Effect::AnalyzeUniverse {
                    interval: earlier!(d.interval),
                    range: earlier!(d.range),
                },
            };
        }
    };
    advance(DialogState::GeneralAnalysis(next_step), FlowData::GeneralAnalysis(next))
}

fn news_lookup(step: NewsLookupStep, d: &NewsLookupData, input: &Input) -> Step {
    let state = DialogState::NewsLookup(step);
    let current = FlowData::NewsLookup(d.clone());
    let text = input.text();

    match step {
        NewsLookupStep::Symbol => {
            let symbol = valid!(validate::symbol(&text), state, &current);
            advance(
                DialogState::NewsLookup(NewsLookupStep::Days),
                FlowData::NewsLookup(NewsLookupData {
                    symbol: Some(symbol),
                }),
            )
        }
        NewsLookupStep::Days => {
            let days = valid!(validate::number_in(&text, validate::NEWS_DAYS), state, &current);
            Step::Finish {
                effect: Effect::FetchNews {
                    symbol: earlier!(d.symbol.clone()),
                    days,
                },
            }
        }
    }
}

fn button(text: &str, data: CallbackData) -> Option<InlineButton> {
    data.encode().ok().map(|encoded| InlineButton::new(text, encoded))
}

fn cancel_row() -> Vec<InlineButton> {
    button("Cancel", CallbackData::Cancel).into_iter().collect()
}

fn keyboard(buttons: Vec<InlineButton>, per_row: usize) -> InlineKeyboard {
    InlineKeyboard::grid(buttons, per_row).row(cancel_row())
}

fn yes_no_keyboard() -> InlineKeyboard {
    let buttons = [("Yes", CallbackData::Yes), ("No", CallbackData::No)]
        .into_iter()
        .filter_map(|(text, data)| button(text, data))
        .collect();
    keyboard(buttons, 2)
}

fn interval_keyboard() -> InlineKeyboard {
    let buttons = Interval::ALL
        .into_iter()
        .filter_map(|i| button(i.as_str(), CallbackData::Interval(i)))
        .collect();
    keyboard(buttons, 3)
}

fn range_keyboard() -> InlineKeyboard {
    let buttons = Range::ALL
        .into_iter()
        .filter_map(|r| button(r.as_str(), CallbackData::Range(r)))
        .collect();
    keyboard(buttons, 5)
}

fn position_keyboard(positions: &[Position]) -> InlineKeyboard {
    let buttons = positions
        .iter()
        .filter_map(|p| button(&p.symbol, CallbackData::Symbol(p.symbol.clone())))
        .collect();
    keyboard(buttons, 3)
}

fn cancel_keyboard() -> InlineKeyboard {
    InlineKeyboard::new().row(cancel_row())
}

fn shown<T: std::fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "?".into())
}

fn price_shown(value: Option<Decimal>) -> String {
    shown(&value)
}

/// The question asked in `state`.
pub fn prompt(state: &DialogState, data: &FlowData) -> Reply {
    match (state, data) {
        (DialogState::SetPosition(step), FlowData::SetPosition(d)) => {
            let symbol = shown(&d.symbol);
            match step {
                SetPositionStep::Symbol => Reply::text(
                    "New position. Which stock symbol? (e.g. ANTM)\nSend 'cancel' at any time to stop.",
                )
                .with_keyboard(cancel_keyboard()),
                SetPositionStep::BuyPrice => {
                    Reply::text(format!("Buy price for {symbol}?")).with_keyboard(cancel_keyboard())
                }
                SetPositionStep::BuyDate => {
                    Reply::text("Buy date? (YYYY-MM-DD, or 'today')").with_keyboard(cancel_keyboard())
                }
                SetPositionStep::TargetPrice => Reply::text(format!(
                    "Target price? Must be above the buy price {}.",
                    price_shown(d.buy_price)
                ))
                .with_keyboard(cancel_keyboard()),
                SetPositionStep::StopLoss => Reply::text(format!(
                    "Stop loss? Must be below the buy price {}.",
                    price_shown(d.buy_price)
                ))
                .with_keyboard(cancel_keyboard()),
                SetPositionStep::MaxHolding => Reply::text(format!(
                    "Maximum holding period in days? ({}-{})",
                    validate::MAX_HOLDING_DAYS.0,
                    validate::MAX_HOLDING_DAYS.1
                ))
                .with_keyboard(cancel_keyboard()),
                SetPositionStep::AlertPrice => {
                    Reply::text(format!("Alert me when {symbol} hits the target or stop loss?"))
                        .with_keyboard(yes_no_keyboard())
                }
                SetPositionStep::AlertMonitor => {
                    Reply::text(format!("Include {symbol} in the daily position monitor?"))
                        .with_keyboard(yes_no_keyboard())
                }
            }
        }
        (DialogState::ExitPosition(step), FlowData::ExitPosition(d)) => {
            let symbol = d
                .selected
                .as_ref()
                .map(|p| p.symbol.clone())
                .unwrap_or_else(|| "?".into());
            match step {
                ExitPositionStep::Symbol => Reply::text("Which position are you exiting?")
                    .with_keyboard(position_keyboard(&d.positions)),
                ExitPositionStep::ExitPrice => {
                    Reply::text(format!("Exit price for {symbol}?")).with_keyboard(cancel_keyboard())
                }
                ExitPositionStep::ExitDate => {
                    Reply::text("Exit date? (YYYY-MM-DD, or 'today')").with_keyboard(cancel_keyboard())
                }
                ExitPositionStep::Confirm => {
                    let pct = match (d.selected.as_ref(), d.exit_price) {
                        (Some(p), Some(exit)) => p
                            .return_pct(exit)
                            .map(|pct| format!(" ({pct}%)"))
                            .unwrap_or_default(),
                        _ => String::new(),
                    };
                    Reply::text(format!(
                        "Close {symbol} at {} on {}{pct}?",
                        price_shown(d.exit_price),
                        shown(&d.exit_date)
                    ))
                    .with_keyboard(yes_no_keyboard())
                }
            }
        }
        (DialogState::AdjustTarget(step), FlowData::AdjustTarget(d)) => match step {
            AdjustTargetStep::Symbol => Reply::text("Which position do you want to adjust?")
                .with_keyboard(position_keyboard(&d.positions)),
            AdjustTargetStep::TargetPrice => {
                let (symbol, target) = d
                    .selected
                    .as_ref()
                    .map(|p| (p.symbol.clone(), p.target_price.to_string()))
                    .unwrap_or_else(|| ("?".into(), "?".into()));
                Reply::text(format!("New target price for {symbol}? (currently {target})"))
                    .with_keyboard(cancel_keyboard())
            }
            AdjustTargetStep::StopLoss => {
                let stop = d
                    .selected
                    .as_ref()
                    .map(|p| p.stop_loss.to_string())
                    .unwrap_or_else(|| "?".into());
                let buttons = button("Keep current", CallbackData::Skip)
                    .into_iter()
                    .collect();
                Reply::text(format!(
                    "New stop loss? (currently {stop}, send 'skip' to keep it)"
                ))
                .with_keyboard(keyboard(buttons, 1))
            }
        },
        (DialogState::AnalyzeSymbol(step), FlowData::AnalyzeSymbol(d)) => match step {
            AnalyzeSymbolStep::Symbol => Reply::text("Which stock symbol should I analyze?")
                .with_keyboard(cancel_keyboard()),
            AnalyzeSymbolStep::Interval => {
                Reply::text(format!("Candle interval for {}?", shown(&d.symbol)))
                    .with_keyboard(interval_keyboard())
            }
            AnalyzeSymbolStep::Range => {
                Reply::text("How far back should I look?").with_keyboard(range_keyboard())
            }
        },
        (DialogState::GeneralAnalysis(step), FlowData::GeneralAnalysis(d)) => match step {
            GeneralAnalysisStep::Interval => {
                Reply::text("Market-wide analysis. Candle interval?").with_keyboard(interval_keyboard())
            }
            GeneralAnalysisStep::Range => {
                Reply::text("How far back should I look?").with_keyboard(range_keyboard())
            }
            GeneralAnalysisStep::Confirm => Reply::text(format!(
                "Analyze the whole watchlist on {} candles over {}? This can take several minutes.",
                shown(&d.interval),
                shown(&d.range)
            ))
            .with_keyboard(yes_no_keyboard()),
        },
        (DialogState::NewsLookup(step), FlowData::NewsLookup(d)) => match step {
            NewsLookupStep::Symbol => {
                Reply::text("News for which stock symbol?").with_keyboard(cancel_keyboard())
            }
            NewsLookupStep::Days => Reply::text(format!(
                "How many days of news for {}? ({}-{})",
                shown(&d.symbol),
                validate::NEWS_DAYS.0,
                validate::NEWS_DAYS.1
            ))
            .with_keyboard(cancel_keyboard()),
        },
        _ => Reply::text("Send /help to see what I can do."),
    }
}

/// Static description of one flow, checked at startup.
#[derive(Debug, Clone)]
pub struct FlowSpec {
    pub name: String,
    pub entry_command: String,
    pub range: CodeRange<u16>,
    pub codes: Vec<u16>,
}

impl FlowSpec {
    pub fn of(flow: FlowKind) -> Self {
        Self {
            name: flow.name().to_string(),
            entry_command: flow.entry_command().to_string(),
            range: flow.code_range(),
            codes: flow.states().iter().map(|s| s.code()).collect(),
        }
    }
}

/// The set of flows the router serves, with their code ranges verified to
/// be disjoint and their entry commands unique.
#[derive(Debug, Clone)]
pub struct FlowRegistry {
    flows: Vec<(FlowKind, CodeRange<u16>)>,
}

impl FlowRegistry {
    pub fn new() -> Result<Self, ConfigError> {
        let specs: Vec<FlowSpec> = FlowKind::ALL.iter().map(|f| FlowSpec::of(*f)).collect();
        Self::validate(&specs)?;
        Ok(Self {
            flows: FlowKind::ALL.iter().map(|f| (*f, f.code_range())).collect(),
        })
    }

    /// Check that every state code lies in its flow's range, that no two
    /// ranges overlap, and that entry commands are unique.
    pub fn validate(specs: &[FlowSpec]) -> Result<(), ConfigError> {
        let mut entries: HashMap<&str, &str> = HashMap::new();

        for spec in specs {
            if let Some(code) = spec.codes.iter().find(|c| !spec.range.contains(c)) {
                return Err(ConfigError::StateOutOfRange {
                    flow: spec.name.clone(),
                    code: *code,
                    start: spec.range.start,
                    end: spec.range.end,
                });
            }
            if let Some(other) = entries.insert(spec.entry_command.as_str(), spec.name.as_str()) {
                return Err(ConfigError::DuplicateEntry {
                    command: spec.entry_command.clone(),
                    flow: spec.name.clone(),
                    other: other.to_string(),
                });
            }
        }

        for (i, a) in specs.iter().enumerate() {
            for b in &specs[i + 1..] {
                if a.range.start < b.range.end && b.range.start < a.range.end {
                    return Err(ConfigError::OverlappingStates {
                        flow: a.name.clone(),
                        other: b.name.clone(),
                        code: a.range.start.max(b.range.start),
                    });
                }
            }
        }

        Ok(())
    }

    /// Flow owning `code`, by range membership. `None` for `Idle`.
    pub fn resolve(&self, code: u16) -> Option<FlowKind> {
        self.flows
            .iter()
            .find(|(_, range)| range.contains(&code))
            .map(|(flow, _)| *flow)
    }

    pub fn flows(&self) -> impl Iterator<Item = FlowKind> + '_ {
        self.flows.iter().map(|(flow, _)| *flow)
    }
}
