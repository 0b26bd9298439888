//! modlayer library exports.
//!
//! The binary is a thin CLI over [`engine::Engine`]; everything else is
//! exposed for the integration tests under `tests/`.

pub mod common;
pub mod config;
pub mod defs;
pub mod engine;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod lock;
pub mod logging;
pub mod module;
pub mod mount;
pub mod plan;
pub mod process;
pub mod timing;
