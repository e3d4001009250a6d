//! Scoring rules
//!
//! This module provides:
//! - The rule contract ([`Rule`], [`RuleClass`], [`RuleLibrary`])
//! - The built-in rules: `basic`, `online`, `cacher` and `router`
//! - The address matcher language used by `router`
//! - The name-to-class [`RuleRegistry`]
//!
//! # Architecture
//!
//! Rules run in configuration order. Each one adjusts the packet's
//! [`ScoreVector`](crate::packet::ScoreVector) and may end the pipeline
//! early or ask for the packet to be dropped. Once an uplink is chosen every
//! rule is told, which is how stateful rules such as `cacher` learn.
//!
//! # Example
//!
//! ```
//! use splitd::config::RuleConfig;
//! use splitd::rules::{RuleClass, RuleRegistry};
//! use splitd::uplink::LinkStatusBoard;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let registry = RuleRegistry::with_builtin(Arc::new(LinkStatusBoard::new()));
//! let class = registry.get("basic").unwrap();
//! let rule = class.init(&RuleConfig::new("basic", json!({ "scores": [5, 0] })));
//! assert!(rule.is_ok());
//! ```

pub mod affinity;
pub mod basic;
pub mod matcher;
pub mod online;
pub mod registry;
pub mod router;
pub mod traits;

pub use affinity::{AffinityCache, AffinityCacheClass, AffinityKey, AffinitySettings, AffinityTable};
pub use basic::{Basic, BasicClass};
pub use matcher::{AddressMatcher, MatcherList};
pub use online::{Online, OnlineClass};
pub use registry::{BaseLibrary, RuleRegistry};
pub use router::{Route, Router, RouterClass};
pub use traits::{InstanceId, Rule, RuleClass, RuleInstance, RuleLibrary};
