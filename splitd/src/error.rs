//! Error types for splitd
//!
//! This module defines the error hierarchy for the traffic splitter.
//! Errors are grouped by subsystem and carry recovery hints so the
//! control plane can tell a bad configuration apart from a transient
//! kernel hiccup.

use std::io;

use thiserror::Error;

/// Top-level error type for splitd
#[derive(Debug, Error)]
pub enum SplitdError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Address matcher syntax errors
    #[error("Matcher error: {0}")]
    Matcher(#[from] MatcherError),

    /// Rule construction or evaluation errors
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    /// Rule library registration errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Packet parsing errors
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    /// Kernel packet queue errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Reader control channel errors
    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    /// Uplink discovery errors
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Reconciliation errors
    #[error("Manager error: {0}")]
    Manager(#[from] ManagerError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SplitdError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::Matcher(_) => false,
            Self::Rule(e) => e.is_recoverable(),
            Self::Registry(_) => false,
            Self::Packet(_) => true,
            Self::Queue(e) => e.is_recoverable(),
            Self::Reader(_) => false,
            Self::Discovery(_) => true,
            Self::Manager(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading or writing config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }
}

/// Address matcher syntax errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatcherError {
    /// Matcher list or one of its tokens is empty
    #[error("Empty address matcher in '{input}'")]
    Empty { input: String },

    /// A token could not be parsed
    #[error("Invalid address matcher '{token}': {reason}")]
    InvalidToken { token: String, reason: String },
}

impl MatcherError {
    /// Create an invalid token error
    pub fn invalid(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidToken {
            token: token.into(),
            reason: reason.into(),
        }
    }
}

/// Rule construction and evaluation errors
#[derive(Debug, Error)]
pub enum RuleError {
    /// Rule parameters are malformed
    #[error("Invalid parameters for rule '{rule}': {reason}")]
    InvalidParams { rule: String, reason: String },

    /// Rule parameters contain a malformed address matcher
    #[error("Invalid address matcher in rule '{rule}': {source}")]
    Matcher {
        rule: String,
        #[source]
        source: MatcherError,
    },

    /// Rule initialization failed
    #[error("Failed to initialize rule '{rule}': {reason}")]
    InitFailed { rule: String, reason: String },

    /// Rule failed while scoring a packet
    #[error("Rule '{rule}' failed on packet: {reason}")]
    Evaluation { rule: String, reason: String },
}

impl RuleError {
    /// Check if this error is recoverable
    ///
    /// Evaluation failures are scoped to a single packet. Everything else
    /// needs a configuration change.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Evaluation { .. })
    }

    /// Create an invalid parameters error
    pub fn invalid_params(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    /// Create an init failure error
    pub fn init_failed(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InitFailed {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    /// Create a per-packet evaluation error
    pub fn evaluation(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Evaluation {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a matcher error for the given rule
    pub fn matcher(rule: impl Into<String>, source: MatcherError) -> Self {
        Self::Matcher {
            rule: rule.into(),
            source,
        }
    }
}

/// Rule library registration errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A rule class with this name is already registered
    #[error("Rule class '{name}' from library '{library}' is already registered")]
    DuplicateClass { name: String, library: String },

    /// A library failed its own initialization
    #[error("Rule library '{library}' failed to initialize: {reason}")]
    LibraryInit { library: String, reason: String },

    /// A library with this name is already loaded
    #[error("Rule library '{0}' is already loaded")]
    DuplicateLibrary(String),
}

impl RegistryError {
    /// Create a library init error
    pub fn library_init(library: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LibraryInit {
            library: library.into(),
            reason: reason.into(),
        }
    }
}

/// Packet parsing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Packet is empty
    #[error("Empty packet")]
    Empty,

    /// Packet is not IPv4
    #[error("Unsupported IP version: {0}")]
    UnsupportedVersion(u8),

    /// Packet is shorter than its header claims
    #[error("Packet too short: {len} < {needed}")]
    Truncated { len: usize, needed: usize },

    /// Header length field is below the IPv4 minimum
    #[error("Invalid IPv4 header length: {0}")]
    InvalidHeaderLength(usize),
}

/// Kernel packet queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to open the queue handle
    #[error("Failed to open packet queue: {0}")]
    Open(String),

    /// Failed to bind to the queue number
    #[error("Failed to bind packet queue {queue}: {reason}")]
    Bind { queue: u16, reason: String },

    /// The packet source has gone away
    #[error("Packet queue closed")]
    Closed,

    /// I/O error on the queue socket
    #[error("Packet queue I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl QueueError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Open(_) | Self::Bind { .. } | Self::Closed => false,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::OutOfMemory
            ),
        }
    }

    /// Create a bind error
    pub fn bind(queue: u16, reason: impl Into<String>) -> Self {
        Self::Bind {
            queue,
            reason: reason.into(),
        }
    }
}

/// Reader control channel errors
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The reader has exited and no longer accepts messages
    #[error("Reader is not running")]
    NotRunning,
}

/// Uplink discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Interface does not exist
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    /// Interface attribute could not be parsed
    #[error("Invalid {attribute} for interface {interface}: {reason}")]
    InvalidAttribute {
        interface: String,
        attribute: &'static str,
        reason: String,
    },

    /// I/O error while querying the system
    #[error("Discovery I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl DiscoveryError {
    /// Create an invalid attribute error
    pub fn invalid_attribute(
        interface: impl Into<String>,
        attribute: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidAttribute {
            interface: interface.into(),
            attribute,
            reason: reason.into(),
        }
    }
}

/// Reconciliation errors
#[derive(Debug, Error)]
pub enum ManagerError {
    /// New configuration failed validation
    #[error("Rejected configuration: {0}")]
    Config(#[from] ConfigError),

    /// A rule instance could not be created
    #[error("Failed to build chain: {0}")]
    Rule(#[from] RuleError),

    /// The reader is gone, the chain could not be published
    #[error("Failed to publish chain: {0}")]
    Publish(#[from] ReaderError),
}

impl ManagerError {
    /// Check if this error is recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::Publish(_) => false,
            Self::Rule(e) => e.is_recoverable(),
        }
    }
}

/// Type alias for Result with `SplitdError`
pub type Result<T> = std::result::Result<T, SplitdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recovery_classification() {
        // Config errors are not recoverable
        let config_err = ConfigError::ValidationError("test".into());
        assert!(!config_err.is_recoverable());

        // Per-packet rule failures are recoverable
        let eval_err = RuleError::evaluation("router", "bad state");
        assert!(eval_err.is_recoverable());

        // Bad parameters are not
        let params_err = RuleError::invalid_params("basic", "scores must be an array");
        assert!(!params_err.is_recoverable());

        // A closed queue is final
        assert!(!QueueError::Closed.is_recoverable());

        let would_block = QueueError::IoError(io::Error::new(io::ErrorKind::WouldBlock, "again"));
        assert!(would_block.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = MatcherError::invalid("10.0.0.1/33", "prefix length out of range");
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.1/33"));
        assert!(msg.contains("prefix"));

        let err = RuleError::matcher("router", err);
        let msg = err.to_string();
        assert!(msg.contains("router"));
        assert!(msg.contains("10.0.0.1/33"));

        let err = QueueError::bind(47, "operation not permitted");
        assert!(err.to_string().contains("47"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        let err: SplitdError = io_err.into();
        assert!(err.is_recoverable());

        let config_err = ConfigError::ValidationError("invalid".into());
        let err: SplitdError = config_err.into();
        assert!(!err.is_recoverable());

        let manager_err: ManagerError = ReaderError::NotRunning.into();
        let err: SplitdError = manager_err.into();
        assert!(!err.is_recoverable());
    }
}
