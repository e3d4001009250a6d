//! Configuration module for splitd
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use splitd::config::{load_config, Config};
//!
//! let config = load_config("/etc/splitd/splitd.json").unwrap();
//! println!("{} uplinks, {} rules", config.uplinks.len(), config.rules.len());
//! ```

mod loader;
mod types;

pub use loader::{
    create_default_config, load_config, load_config_str, load_config_with_env, save_config,
};
pub use types::{
    Config, LogConfig, QueueConfig, RuleConfig, UplinkConfig, DEFAULT_LINK_CHECK_INTERVAL,
    DEFAULT_QUEUE_NUM, DEFAULT_ROUTE_TABLE_BASE, MAX_RULES,
};
