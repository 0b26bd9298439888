//! modlayer - module mount orchestration.
//!
//! Layers module directory trees onto the live system partitions:
//! - scans enabled modules and their per-partition contributions
//! - plans an overlay or graft strategy per partition
//! - resolves path conflicts, honoring user winnowing rules
//! - mounts the result and records every mount it owns

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use modlayer::config::Config;
use modlayer::defs::DEFAULT_CONFIG_FILE;
use modlayer::logging;
use modlayer::module::MountMode;

#[derive(Parser)]
#[command(name = "modlayer")]
#[command(about = "Module mount orchestration engine")]
#[command(
    after_help = "QUICK START:\n  modlayer scan       List enabled modules\n  modlayer conflicts  Show paths provided by more than one module\n  modlayer mount      Activate modules\n  modlayer umount     Remove every mount modlayer owns"
)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List enabled modules as JSON
    Scan {
        /// Module root (overrides config)
        #[arg(long)]
        moduledir: Option<PathBuf>,
    },

    /// List every conflicting path as JSON
    Conflicts,

    /// Force a module to win a path, e.g. `winnow /system/etc/hosts my-module`
    Winnow {
        /// Full path on the live system, starting with the partition
        full_path: String,
        /// Module that should win the path
        #[arg(required_unless_present = "clear")]
        module_id: Option<String>,
        /// Remove the rule for the path instead
        #[arg(long, conflicts_with = "module_id")]
        clear: bool,
    },

    /// Override a module's mount mode
    Mode {
        module_id: String,
        /// auto, overlay, graft or ignore
        #[arg(required_unless_present = "clear")]
        mode: Option<MountMode>,
        /// Only for this partition
        #[arg(long)]
        partition: Option<String>,
        /// Go back to the mode declared in module.prop
        #[arg(long, conflicts_with = "mode")]
        clear: bool,
    },

    /// Override a module's priority (lower wins)
    Priority {
        module_id: String,
        #[arg(required_unless_present = "clear")]
        priority: Option<u32>,
        /// Go back to the scan-order priority
        #[arg(long, conflicts_with = "priority")]
        clear: bool,
    },

    /// Run one activation (teardown instead when `umount = true`)
    Mount {
        /// Record mount operations without performing them or saving the inventory
        #[arg(long)]
        dry_run: bool,
    },

    /// Unmount everything modlayer owns
    Umount,

    /// Move an owned mount to a new target
    Relocate { from: PathBuf, to: PathBuf },

    /// Print the engine run log
    Logs {
        /// Number of trailing lines to show
        #[arg(short = 'n', long, default_value = "200")]
        lines: usize,
    },

    /// Print planning diagnostics as JSON
    Diagnose,

    /// Print the effective configuration
    ShowConfig {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();
    let config = Config::load(&cli.config)?;
    logging::init(&config.statedir, config.verbose);

    match cli.command {
        Commands::Scan { moduledir } => commands::cmd_scan(&config, moduledir)?,

        Commands::Conflicts => commands::cmd_conflicts(&config)?,

        Commands::Winnow {
            full_path,
            module_id,
            clear,
        } => {
            let module_id = if clear { None } else { module_id };
            commands::cmd_winnow(&config, &full_path, module_id.as_deref())?;
        }

        Commands::Mode {
            module_id,
            mode,
            partition,
            clear,
        } => {
            let mode = if clear { None } else { mode };
            commands::cmd_mode(&config, &module_id, partition.as_deref(), mode)?;
        }

        Commands::Priority {
            module_id,
            priority,
            clear,
        } => {
            let priority = if clear { None } else { priority };
            commands::cmd_priority(&config, &module_id, priority)?;
        }

        Commands::Mount { dry_run } => commands::cmd_mount(&config, dry_run)?,

        Commands::Umount => commands::cmd_umount(&config)?,

        Commands::Relocate { from, to } => commands::cmd_relocate(&config, &from, &to)?,

        Commands::Logs { lines } => commands::cmd_logs(&config, lines)?,

        Commands::Diagnose => commands::cmd_diagnose(&config)?,

        Commands::ShowConfig { json } => commands::cmd_show_config(&config, json)?,
    }

    Ok(())
}
