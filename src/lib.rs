//! Tollgate - cached, rate-limited mediation for metered HTTP APIs
//!
//! Calls go through a persistent response cache and per-client quotas;
//! asynchronous task results delivered by webhook are filed under the cache
//! key of the request that created the task.

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod output;
pub mod webhook;

pub use error::{Error, ErrorKind, Result};
