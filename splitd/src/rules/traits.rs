//! The scoring rule contract
//!
//! A [`RuleClass`] is a named factory registered once at startup. The
//! manager calls [`RuleClass::init`] for each configured rule, which may
//! block; the resulting [`Rule`] is moved into a chain and from then on is
//! only touched by the reader, one packet at a time.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::chain::ChainSnapshot;
use crate::config::RuleConfig;
use crate::error::{RegistryError, RuleError};
use crate::packet::{Packet, ScoreVector};
use crate::uplink::UplinkId;

/// Running state of one configured rule
///
/// Implementations run on the reader's packet path: both callbacks must
/// return promptly and must not block.
pub trait Rule: Send {
    /// Adjust `scores` for `packet`
    ///
    /// # Errors
    ///
    /// An error drops the packet.
    fn update_scores(
        &mut self,
        chain: &ChainSnapshot,
        scores: &mut ScoreVector,
        packet: &Packet,
    ) -> Result<(), RuleError>;

    /// Observe the uplink chosen for `packet`
    ///
    /// # Errors
    ///
    /// An error drops the packet.
    fn on_uplink_chosen(
        &mut self,
        _chain: &ChainSnapshot,
        _uplink: UplinkId,
        _packet: &Packet,
    ) -> Result<(), RuleError> {
        Ok(())
    }

    /// Release instance state; called once when the instance is retired
    fn destroy(&mut self) {}
}

/// A named rule implementation
pub trait RuleClass: Send + Sync {
    /// Name rules refer to in the configuration
    fn name(&self) -> &str;

    /// Create a fresh instance from `config.params`
    ///
    /// # Errors
    ///
    /// Returns `RuleError` if the parameters are invalid.
    fn init(&self, config: &RuleConfig) -> Result<Box<dyn Rule>, RuleError>;
}

/// A bundle of rule classes registered together
pub trait RuleLibrary: Send + Sync {
    /// Library name, used in logs and duplicate reports
    fn name(&self) -> &str;

    /// One-time setup before the classes are registered
    ///
    /// # Errors
    ///
    /// A failing library is skipped; other libraries still load.
    fn init(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    /// Teardown when the registry is dropped
    fn destroy(&self) {}

    /// The classes this library provides
    fn rule_classes(&self) -> Vec<Arc<dyn RuleClass>>;
}

/// Identity of a rule instance, stable for its whole lifetime
pub type InstanceId = u64;

/// A configured rule bound to its class and private state
///
/// Dropping the instance runs [`Rule::destroy`].
pub struct RuleInstance {
    id: InstanceId,
    config: RuleConfig,
    class: Arc<dyn RuleClass>,
    rule: Box<dyn Rule>,
}

impl RuleInstance {
    /// Initialize a new instance of `class`
    ///
    /// # Errors
    ///
    /// Returns the class's init error.
    pub fn create(
        id: InstanceId,
        class: Arc<dyn RuleClass>,
        config: RuleConfig,
    ) -> Result<Self, RuleError> {
        let rule = class.init(&config)?;
        debug!(instance = id, rule = %config.rule_name, "Rule instance started");
        Ok(Self {
            id,
            config,
            class,
            rule,
        })
    }

    /// Instance ID
    #[must_use]
    pub const fn id(&self) -> InstanceId {
        self.id
    }

    /// Configuration this instance was created from
    #[must_use]
    pub const fn config(&self) -> &RuleConfig {
        &self.config
    }

    /// Name of the bound class
    #[must_use]
    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    /// Forward to [`Rule::update_scores`]
    ///
    /// # Errors
    ///
    /// Propagates the rule's error.
    pub fn update_scores(
        &mut self,
        chain: &ChainSnapshot,
        scores: &mut ScoreVector,
        packet: &Packet,
    ) -> Result<(), RuleError> {
        self.rule.update_scores(chain, scores, packet)
    }

    /// Forward to [`Rule::on_uplink_chosen`]
    ///
    /// # Errors
    ///
    /// Propagates the rule's error.
    pub fn on_uplink_chosen(
        &mut self,
        chain: &ChainSnapshot,
        uplink: UplinkId,
        packet: &Packet,
    ) -> Result<(), RuleError> {
        self.rule.on_uplink_chosen(chain, uplink, packet)
    }
}

impl Drop for RuleInstance {
    fn drop(&mut self) {
        self.rule.destroy();
        debug!(instance = self.id, rule = %self.config.rule_name, "Rule instance destroyed");
    }
}

impl fmt::Debug for RuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleInstance")
            .field("id", &self.id)
            .field("class", &self.class.name())
            .field("params", &self.config.params)
            .finish_non_exhaustive()
    }
}
