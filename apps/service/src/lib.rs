//! Vigil: a self-hosted uptime monitor.
//!
//! [`engine::Engine`] is the entry point. It runs one loop per active target,
//! stores every heartbeat, notifies channels on state changes and answers
//! uptime queries.

pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod events;
pub mod http;
pub mod monitoring;
pub mod notification;
pub mod pool;
pub mod retention;
pub mod seed;
pub mod uptime;

#[cfg(test)]
mod test_support;

pub use engine::{Engine, MonitorState};
pub use error::EngineError;
