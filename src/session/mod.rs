//! Dialog session storage.

pub mod store;

pub use store::{Session, SessionStore};
