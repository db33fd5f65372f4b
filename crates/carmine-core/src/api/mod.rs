//! Public API: client construction and per-request sessions.

pub mod client;
pub mod session;

pub use client::{Client, ClientBuilder};
pub use session::{CancelToken, Session};
