//! # gatepass_core
//!
//! Gate-pass authorization engine: student presence, gate-pass approval
//! pipelines, single-use QR tokens and guard decisions.

pub mod auth;
pub mod clock;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod identity;
pub mod migrate;
pub mod models;
pub mod notify;
pub mod passes;
pub mod presence;
pub mod store;
pub mod tokens;
pub mod uuid;

pub use engine::GateEngine;
pub use error::{GateError, GateResult};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
