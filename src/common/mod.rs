//! Shared utilities across modlayer modules.

pub mod files;
pub mod temp;

pub use files::{read_json_or_default, write_json_atomic};
pub use temp::{cleanup_work_dir, prepare_work_dir, select_temp_dir, work_root};
