//! Conversation handling: flow states, command parsing, input validation,
//! the pure transition function and the router that applies it.

pub mod command;
pub mod machine;
pub mod render;
pub mod router;
pub mod state;
pub mod validate;

pub use command::{CallbackData, Command, CommandParser};
pub use machine::{Effect, Env, FlowRegistry, FlowSpec, Input, Step, enter, transition};
pub use router::{Router, RouterDeps};
pub use state::{DialogState, FlowData, FlowKind};
