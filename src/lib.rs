//! X-Clone sync engine
//!
//! Keeps the conversation list, message threads, notification feed and
//! suggestion state of the X-Clone client consistent with a REST backend
//! that has no push channel:
//! - `api` talks to the backend and holds the session
//! - `storage` holds the client-side stores and persisted state
//! - `services` runs the periodic refreshes
//! - `app` wires everything together

#![warn(clippy::all, rust_2018_idioms)]

pub mod api;
pub mod app;
pub mod services;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use api::{HttpGateway, RemoteGateway, Session};
pub use app::SyncApp;
pub use services::{PollOptions, PollScheduler};
pub use storage::{Settings, Storage, StoreError};
