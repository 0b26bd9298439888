//! CLI command handlers.
//!
//! Each submodule handles one group of commands:
//! - `scan` - List enabled modules
//! - `winnow` - Show conflicts, set or clear forced winners
//! - `module` - Per-module mode and priority overrides
//! - `mount` - Activate, tear down, relocate
//! - `show` - Logs, diagnostics, effective configuration
//!
//! Results go to stdout as JSON; logs go to stderr and the run log.

pub mod module;
pub mod mount;
pub mod scan;
pub mod show;
pub mod winnow;

pub use module::{cmd_mode, cmd_priority};
pub use mount::{cmd_mount, cmd_relocate, cmd_umount};
pub use scan::cmd_scan;
pub use show::{cmd_diagnose, cmd_logs, cmd_show_config};
pub use winnow::{cmd_conflicts, cmd_winnow};

use anyhow::{Context, Result};
use serde::Serialize;

use modlayer::config::Config;
use modlayer::engine::Engine;
use modlayer::mount::CommandMounter;

/// Engine backed by the system `mount`/`umount` tools.
pub(crate) fn system_engine(config: &Config) -> Result<Engine<CommandMounter>> {
    Engine::new(config.clone(), CommandMounter::new()).context("Failed to load engine state")
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}
