//! CLI command implementations

mod config;
mod monitor;

pub use config::{cmd_config_init, cmd_config_show};
pub use monitor::{MonitorArgs, cmd_monitor};
