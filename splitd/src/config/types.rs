//! Configuration types for splitd
//!
//! The configuration document is what the control plane hands to
//! [`Manager::set_config`](crate::manager::Manager::set_config): the uplinks
//! taking part in splitting and the ordered list of scoring rules. Daemon
//! settings (logging, queue number) ride along in the same file.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::uplink::{Uplink, UplinkId, UplinkTable, IFNAMSIZ, MAX_UPLINKS};

/// Maximum number of rules in one chain
pub const MAX_RULES: usize = 16;

/// Default routing table offset; uplink N routes through table `64 + N`
pub const DEFAULT_ROUTE_TABLE_BASE: u32 = 64;

/// Default NFQUEUE number
pub const DEFAULT_QUEUE_NUM: u16 = 47;

/// Default seconds between uplink carrier checks
pub const DEFAULT_LINK_CHECK_INTERVAL: u64 = 5;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Master switch; when off no rules run and packets pass unmarked
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between split statistics log lines (0 disables)
    #[serde(default, alias = "log_interval")]
    pub log_interval_seconds: u64,

    /// Seconds between uplink carrier checks (0 disables)
    #[serde(default = "default_link_check_interval")]
    pub link_check_interval_seconds: u64,

    /// Routing table offset added to the uplink ID to form the packet mark
    #[serde(default = "default_route_table_base")]
    pub route_table_base: u32,

    /// Uplinks taking part in splitting
    #[serde(default)]
    pub uplinks: Vec<UplinkConfig>,

    /// Scoring rules, applied in order
    #[serde(default, alias = "splitters")]
    pub rules: Vec<RuleConfig>,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Kernel packet queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for uplink in &self.uplinks {
            uplink.validate()?;
            if !ids.insert(uplink.external_id) {
                return Err(ConfigError::validation(format!(
                    "Duplicate uplink externalID: {}",
                    uplink.external_id
                )));
            }
        }

        if self.rules.len() > MAX_RULES {
            return Err(ConfigError::validation(format!(
                "Too many rules: {} (max {MAX_RULES})",
                self.rules.len()
            )));
        }

        for rule in &self.rules {
            rule.validate()?;
        }

        if self
            .route_table_base
            .checked_add(MAX_UPLINKS as u32)
            .is_none()
        {
            return Err(ConfigError::validation(format!(
                "routeTableBase {} leaves no room for {MAX_UPLINKS} uplinks",
                self.route_table_base
            )));
        }

        self.log.validate()?;
        self.queue.validate()?;

        Ok(())
    }

    /// Rules that should be running: none while disabled
    #[must_use]
    pub fn effective_rules(&self) -> &[RuleConfig] {
        if self.enabled {
            self.rules.as_slice()
        } else {
            &[]
        }
    }

    /// Uplink table with no discovered metadata
    #[must_use]
    pub fn uplink_table(&self) -> UplinkTable {
        let mut table = UplinkTable::new();
        for uplink in &self.uplinks {
            if let Some(id) = uplink.id() {
                table.insert(Uplink::new(&uplink.os_name, id));
            }
        }
        table
    }

    /// Configuration with nothing to split
    #[must_use]
    pub fn empty() -> Self {
        Self {
            enabled: true,
            log_interval_seconds: 0,
            link_check_interval_seconds: DEFAULT_LINK_CHECK_INTERVAL,
            route_table_base: DEFAULT_ROUTE_TABLE_BASE,
            uplinks: Vec::new(),
            rules: Vec::new(),
            log: LogConfig::default(),
            queue: QueueConfig::default(),
        }
    }

    /// Two-uplink example written by `--generate-config`
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            log_interval_seconds: 300,
            uplinks: vec![UplinkConfig::new("eth0", 1), UplinkConfig::new("eth1", 2)],
            rules: vec![
                RuleConfig::new("online", Value::Null),
                RuleConfig::new("basic", serde_json::json!({ "scores": [50, 50] })),
            ],
            ..Self::empty()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::empty()
    }
}

/// One uplink entry of the configuration document
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UplinkConfig {
    /// OS interface name
    #[serde(rename = "osName", alias = "os_name")]
    pub os_name: String,

    /// Operator-assigned ID, 1..=8
    #[serde(rename = "externalID", alias = "alpaca_interface_id")]
    pub external_id: u8,
}

impl UplinkConfig {
    /// Create an uplink entry
    pub fn new(os_name: impl Into<String>, external_id: u8) -> Self {
        Self {
            os_name: os_name.into(),
            external_id,
        }
    }

    /// The validated uplink ID
    #[must_use]
    pub const fn id(&self) -> Option<UplinkId> {
        UplinkId::new(self.external_id)
    }

    /// Validate the uplink entry
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id().is_none() {
            return Err(ConfigError::validation(format!(
                "Uplink {} has externalID {} outside 1..={MAX_UPLINKS}",
                self.os_name, self.external_id
            )));
        }

        if self.os_name.is_empty() || self.os_name.len() >= IFNAMSIZ {
            return Err(ConfigError::validation(format!(
                "Invalid interface name '{}' (1..{} chars)",
                self.os_name,
                IFNAMSIZ - 1
            )));
        }

        Ok(())
    }
}

/// One scoring rule: the rule class name and its opaque parameters
///
/// Equality is name equality plus deep equality of `params`; an unchanged
/// `RuleConfig` keeps its running instance across reconfiguration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RuleConfig {
    /// Registered rule class name
    #[serde(rename = "ruleName", alias = "splitter_name")]
    pub rule_name: String,

    /// Rule parameters, interpreted by the rule class
    #[serde(default)]
    pub params: Value,
}

impl RuleConfig {
    /// Create a rule entry
    pub fn new(rule_name: impl Into<String>, params: Value) -> Self {
        Self {
            rule_name: rule_name.into(),
            params,
        }
    }

    /// Validate the rule entry
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rule_name.trim().is_empty() {
            return Err(ConfigError::validation("Rule name cannot be empty"));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl LogConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.format.as_str(), "json" | "text") {
            return Err(ConfigError::validation(format!(
                "Invalid log format '{}' (expected json or text)",
                self.format
            )));
        }
        Ok(())
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            timestamps: true,
            target: true,
        }
    }
}

/// Kernel packet queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// NFQUEUE number the firewall sends new sessions to
    #[serde(default = "default_queue_num")]
    pub number: u16,

    /// Kernel-side queue length
    #[serde(default = "default_queue_max_length")]
    pub max_length: u32,

    /// Bytes of each packet copied to userspace
    #[serde(default = "default_copy_range")]
    pub copy_range: u16,
}

impl QueueConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_length == 0 {
            return Err(ConfigError::validation("queue maxLength must be greater than 0"));
        }
        // IPv4 header plus the first transport word
        if self.copy_range < 64 {
            return Err(ConfigError::validation(format!(
                "queue copyRange {} too small (min 64)",
                self.copy_range
            )));
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            number: DEFAULT_QUEUE_NUM,
            max_length: default_queue_max_length(),
            copy_range: default_copy_range(),
        }
    }
}

// Default value functions

const fn default_true() -> bool {
    true
}

const fn default_link_check_interval() -> u64 {
    DEFAULT_LINK_CHECK_INTERVAL
}

const fn default_route_table_base() -> u32 {
    DEFAULT_ROUTE_TABLE_BASE
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "json".into()
}

const fn default_queue_num() -> u16 {
    DEFAULT_QUEUE_NUM
}

const fn default_queue_max_length() -> u32 {
    2048
}

const fn default_copy_range() -> u16 {
    256
}
