//! splitd: multi-uplink traffic splitter
//!
//! This crate decides, for every new flow leaving a multi-WAN gateway, which
//! uplink should carry it. The firewall queues the first packet of each
//! session to splitd over NFQUEUE; splitd scores the configured uplinks
//! with a chain of rules, picks one at random weighted by score, and
//! accepts the packet with that uplink's routing mark.
//!
//! # Features
//!
//! - **Pluggable rules**: `basic` (fixed weights), `online` (skip failed
//!   links), `cacher` (sticky host pairs) and `router` (source routes)
//! - **Live reconfiguration**: unchanged rules keep their state across
//!   configuration changes
//! - **Lock-free packet path**: one task owns the active chain
//!
//! # Architecture
//!
//! ```text
//! config ──> Manager ──(PendingChain)──> Reader <──> NFQUEUE
//!              │                           │
//!         RuleRegistry                 active Chain
//!         UplinkDiscovery          rule, rule, rule ──> select ──> mark
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use splitd::config::load_config;
//! use splitd::manager::Manager;
//! use splitd::queue::channel_queue;
//! use splitd::reader::Reader;
//! use splitd::rules::RuleRegistry;
//! use splitd::uplink::{LinkStatusBoard, SysfsDiscovery};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/splitd/splitd.json")?;
//!
//! let (queue, _feed) = channel_queue(1024);
//! let (reader, handle) = Reader::new(queue);
//! let task = reader.spawn();
//!
//! let registry = RuleRegistry::with_builtin(Arc::new(LinkStatusBoard::new()));
//! let manager = Manager::new(Arc::new(registry), Arc::new(SysfsDiscovery::new()), handle);
//! manager.set_config(config)?;
//!
//! manager.shutdown()?;
//! let stats = task.await?;
//! println!("{stats}");
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`chain`]: Rule chains and the per-packet pipeline
//! - [`config`]: Configuration types and loading
//! - [`error`]: Error types
//! - [`manager`]: Configuration reconciliation
//! - [`packet`]: Packet view and score vector
//! - [`queue`]: Packet sources
//! - [`reader`]: The packet event loop
//! - [`rules`]: Rule contract, built-in rules and registry
//! - [`uplink`]: Uplink metadata, discovery and link status

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod chain;
pub mod config;
pub mod error;
pub mod manager;
pub mod packet;
pub mod queue;
pub mod reader;
pub mod rules;
pub mod uplink;

// Re-export commonly used types at the crate root
pub use chain::{Chain, ChainSnapshot, Decision, PendingChain};
pub use config::{Config, RuleConfig, UplinkConfig};
pub use error::{
    ConfigError, ManagerError, MatcherError, QueueError, ReaderError, RegistryError, RuleError,
    SplitdError,
};
pub use manager::Manager;
pub use packet::{Packet, ScoreVector};
pub use queue::{PacketQueue, Verdict};
pub use reader::{Reader, ReaderHandle, SplitStats};
pub use rules::{Rule, RuleClass, RuleLibrary, RuleRegistry};
pub use uplink::{LinkStatusBoard, UplinkId, MAX_UPLINKS};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
