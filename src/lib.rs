//! Stock Assist: Telegram bot for tracking trading positions and
//! requesting market analysis through guided dialogs.

pub mod bot;
pub mod channels;
pub mod config;
pub mod context;
pub mod dialog;
pub mod error;
pub mod ratelimit;
pub mod services;
pub mod session;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;
