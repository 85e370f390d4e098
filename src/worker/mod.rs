//! Background work: the supervised dispatcher and the loading indicator it
//! drives while a job runs.

pub mod dispatcher;
pub mod loading;

pub use dispatcher::{BackgroundJob, Dispatcher, Outcome, panic_message};
pub use loading::{Animation, LoadingIndicator};
