//! Dialog states and per-flow scratch.
//!
//! Every flow owns one step enum and one scratch struct. `DialogState`
//! carries the step of the active flow; `FlowData` carries only that flow's
//! fields. Each state also has a numeric code (`flow base + step index`) so
//! flows can be resolved by range and checked for overlap at startup.

use std::fmt;
use std::ops::Range as CodeRange;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::services::{Interval, Position, Range};

/// Width of the code range reserved for each flow.
pub const FLOW_CODE_WIDTH: u16 = 100;

/// The conversation flows a user can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    SetPosition,
    ExitPosition,
    AdjustTarget,
    AnalyzeSymbol,
    GeneralAnalysis,
    NewsLookup,
}

impl FlowKind {
    pub const ALL: [FlowKind; 6] = [
        Self::SetPosition,
        Self::ExitPosition,
        Self::AdjustTarget,
        Self::AnalyzeSymbol,
        Self::GeneralAnalysis,
        Self::NewsLookup,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::SetPosition => "set_position",
            Self::ExitPosition => "exit_position",
            Self::AdjustTarget => "adjust_target",
            Self::AnalyzeSymbol => "analyze_symbol",
            Self::GeneralAnalysis => "general_analysis",
            Self::NewsLookup => "news_lookup",
        }
    }

    /// Slash command (without `/`) that enters this flow.
    pub fn entry_command(&self) -> &'static str {
        match self {
            Self::SetPosition => "setposition",
            Self::ExitPosition => "exitposition",
            Self::AdjustTarget => "adjusttarget",
            Self::AnalyzeSymbol => "analyze",
            Self::GeneralAnalysis => "analyzeall",
            Self::NewsLookup => "news",
        }
    }

    /// First code of this flow's reserved range.
    pub fn code_base(&self) -> u16 {
        let index = match self {
            Self::SetPosition => 1,
            Self::ExitPosition => 2,
            Self::AdjustTarget => 3,
            Self::AnalyzeSymbol => 4,
            Self::GeneralAnalysis => 5,
            Self::NewsLookup => 6,
        };
        index * FLOW_CODE_WIDTH
    }

    pub fn code_range(&self) -> CodeRange<u16> {
        let base = self.code_base();
        base..base + FLOW_CODE_WIDTH
    }

    /// Entry needs the user's active positions listed into scratch.
    pub fn needs_positions(&self) -> bool {
        matches!(self, Self::ExitPosition | Self::AdjustTarget)
    }

    /// Every state of this flow, in order.
    pub fn states(&self) -> Vec<DialogState> {
        match self {
            Self::SetPosition => SetPositionStep::ALL
                .iter()
                .map(|s| DialogState::SetPosition(*s))
                .collect(),
            Self::ExitPosition => ExitPositionStep::ALL
                .iter()
                .map(|s| DialogState::ExitPosition(*s))
                .collect(),
            Self::AdjustTarget => AdjustTargetStep::ALL
                .iter()
                .map(|s| DialogState::AdjustTarget(*s))
                .collect(),
            Self::AnalyzeSymbol => AnalyzeSymbolStep::ALL
                .iter()
                .map(|s| DialogState::AnalyzeSymbol(*s))
                .collect(),
            Self::GeneralAnalysis => GeneralAnalysisStep::ALL
                .iter()
                .map(|s| DialogState::GeneralAnalysis(*s))
                .collect(),
            Self::NewsLookup => NewsLookupStep::ALL
                .iter()
                .map(|s| DialogState::NewsLookup(*s))
                .collect(),
        }
    }

    /// First state after entry.
    pub fn first_state(&self) -> DialogState {
        match self {
            Self::SetPosition => DialogState::SetPosition(SetPositionStep::Symbol),
            Self::ExitPosition => DialogState::ExitPosition(ExitPositionStep::Symbol),
            Self::AdjustTarget => DialogState::AdjustTarget(AdjustTargetStep::Symbol),
            Self::AnalyzeSymbol => DialogState::AnalyzeSymbol(AnalyzeSymbolStep::Symbol),
            Self::GeneralAnalysis => DialogState::GeneralAnalysis(GeneralAnalysisStep::Interval),
            Self::NewsLookup => DialogState::NewsLookup(NewsLookupStep::Symbol),
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

macro_rules! steps {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$(Self::$variant),+];

            pub fn index(&self) -> u16 {
                *self as u16
            }

            pub fn label(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }
        }
    };
}

steps!(
    /// Position setup.
    SetPositionStep {
        Symbol => "symbol",
        BuyPrice => "buy_price",
        BuyDate => "buy_date",
        TargetPrice => "target_price",
        StopLoss => "stop_loss",
        MaxHolding => "max_holding",
        AlertPrice => "alert_price",
        AlertMonitor => "alert_monitor",
    }
);

steps!(
    /// Closing an active position.
    ExitPositionStep {
        Symbol => "symbol",
        ExitPrice => "exit_price",
        ExitDate => "exit_date",
        Confirm => "confirm",
    }
);

steps!(
    /// Moving target and stop loss of an active position.
    AdjustTargetStep {
        Symbol => "symbol",
        TargetPrice => "target_price",
        StopLoss => "stop_loss",
    }
);

steps!(
    /// Single-symbol analysis parameters.
    AnalyzeSymbolStep {
        Symbol => "symbol",
        Interval => "interval",
        Range => "range",
    }
);

steps!(
    /// Whole-universe analysis parameters.
    GeneralAnalysisStep {
        Interval => "interval",
        Range => "range",
        Confirm => "confirm",
    }
);

steps!(
    /// News lookup parameters.
    NewsLookupStep {
        Symbol => "symbol",
        Days => "days",
    }
);

/// Where a user currently is in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DialogState {
    #[default]
    Idle,
    SetPosition(SetPositionStep),
    ExitPosition(ExitPositionStep),
    AdjustTarget(AdjustTargetStep),
    AnalyzeSymbol(AnalyzeSymbolStep),
    GeneralAnalysis(GeneralAnalysisStep),
    NewsLookup(NewsLookupStep),
}

impl DialogState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn flow(&self) -> Option<FlowKind> {
        match self {
            Self::Idle => None,
            Self::SetPosition(_) => Some(FlowKind::SetPosition),
            Self::ExitPosition(_) => Some(FlowKind::ExitPosition),
            Self::AdjustTarget(_) => Some(FlowKind::AdjustTarget),
            Self::AnalyzeSymbol(_) => Some(FlowKind::AnalyzeSymbol),
            Self::GeneralAnalysis(_) => Some(FlowKind::GeneralAnalysis),
            Self::NewsLookup(_) => Some(FlowKind::NewsLookup),
        }
    }

    /// Step label within the flow, or `idle`.
    pub fn step(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::SetPosition(s) => s.label(),
            Self::ExitPosition(s) => s.label(),
            Self::AdjustTarget(s) => s.label(),
            Self::AnalyzeSymbol(s) => s.label(),
            Self::GeneralAnalysis(s) => s.label(),
            Self::NewsLookup(s) => s.label(),
        }
    }

    /// Numeric state code. `Idle` is 0.
    pub fn code(&self) -> u16 {
        let index = match self {
            Self::Idle => return 0,
            Self::SetPosition(s) => s.index(),
            Self::ExitPosition(s) => s.index(),
            Self::AdjustTarget(s) => s.index(),
            Self::AnalyzeSymbol(s) => s.index(),
            Self::GeneralAnalysis(s) => s.index(),
            Self::NewsLookup(s) => s.index(),
        };
        self.flow().map(|f| f.code_base()).unwrap_or(0) + index
    }
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.flow() {
            Some(flow) => write!(f, "{}.{}", flow, self.step()),
            None => f.write_str("idle"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetPositionData {
    pub symbol: Option<String>,
    pub buy_price: Option<Decimal>,
    pub buy_date: Option<NaiveDate>,
    pub target_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub max_holding_days: Option<u32>,
    pub alert_price: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExitPositionData {
    /// Active positions listed when the flow started.
    pub positions: Vec<Position>,
    pub selected: Option<Position>,
    pub exit_price: Option<Decimal>,
    pub exit_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AdjustTargetData {
    /// Active positions listed when the flow started.
    pub positions: Vec<Position>,
    pub selected: Option<Position>,
    pub target_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalyzeSymbolData {
    pub symbol: Option<String>,
    pub interval: Option<Interval>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeneralAnalysisData {
    pub interval: Option<Interval>,
    pub range: Option<Range>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewsLookupData {
    pub symbol: Option<String>,
}

/// Scratch for the active flow.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowData {
    SetPosition(SetPositionData),
    ExitPosition(ExitPositionData),
    AdjustTarget(AdjustTargetData),
    AnalyzeSymbol(AnalyzeSymbolData),
    GeneralAnalysis(GeneralAnalysisData),
    NewsLookup(NewsLookupData),
}

impl FlowData {
    pub fn flow(&self) -> FlowKind {
        match self {
            Self::SetPosition(_) => FlowKind::SetPosition,
            Self::ExitPosition(_) => FlowKind::ExitPosition,
            Self::AdjustTarget(_) => FlowKind::AdjustTarget,
            Self::AnalyzeSymbol(_) => FlowKind::AnalyzeSymbol,
            Self::GeneralAnalysis(_) => FlowKind::GeneralAnalysis,
            Self::NewsLookup(_) => FlowKind::NewsLookup,
        }
    }

    /// Empty scratch for `flow`.
    pub fn empty(flow: FlowKind) -> Self {
        match flow {
            FlowKind::SetPosition => Self::SetPosition(SetPositionData::default()),
            FlowKind::ExitPosition => Self::ExitPosition(ExitPositionData::default()),
            FlowKind::AdjustTarget => Self::AdjustTarget(AdjustTargetData::default()),
            FlowKind::AnalyzeSymbol => Self::AnalyzeSymbol(AnalyzeSymbolData::default()),
            FlowKind::GeneralAnalysis => Self::GeneralAnalysis(GeneralAnalysisData::default()),
            FlowKind::NewsLookup => Self::NewsLookup(NewsLookupData::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_fall_inside_their_flow_range() {
        for flow in FlowKind::ALL {
            let range = flow.code_range();
            for state in flow.states() {
                assert!(range.contains(&state.code()), "{state} code {}", state.code());
                assert_eq!(state.flow(), Some(flow));
            }
        }
        assert_eq!(DialogState::Idle.code(), 0);
    }

    #[test]
    fn step_codes_follow_declaration_order() {
        assert_eq!(DialogState::SetPosition(SetPositionStep::Symbol).code(), 100);
        assert_eq!(DialogState::SetPosition(SetPositionStep::AlertMonitor).code(), 107);
        assert_eq!(DialogState::NewsLookup(NewsLookupStep::Days).code(), 601);
    }

    #[test]
    fn first_state_is_first_listed() {
        for flow in FlowKind::ALL {
            assert_eq!(flow.states()[0], flow.first_state());
            assert_eq!(FlowData::empty(flow).flow(), flow);
        }
    }

    #[test]
    fn display_names_flow_and_step() {
        let state = DialogState::ExitPosition(ExitPositionStep::ExitDate);
        assert_eq!(state.to_string(), "exit_position.exit_date");
        assert_eq!(DialogState::Idle.to_string(), "idle");
    }
}
