//! Rule chains
//!
//! A chain binds one configuration snapshot to the ordered rule instances
//! that implement it. The manager assembles a [`PendingChain`] and sends it
//! to the reader; the reader turns it into the active [`Chain`] with
//! [`PendingChain::adopt`], taking over the instances the previous chain
//! carries forward and destroying the rest.
//!
//! # Handoff
//!
//! ```text
//! Manager                             Reader
//!    │  PendingChain                     │
//!    │  [Owned(new), Inherited(id)] ───> │ adopt(previous)
//!    │                                   │   Inherited(id) <- previous
//!    │                                   │   drop(previous) -> destroy rest
//!    │                                   ▼
//!    │                              active Chain
//! ```
//!
//! Instances never cross back to the manager, so the packet path takes no
//! locks. Retired instances are destroyed on the reader, after the new chain
//! is in place.

use std::fmt;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, error, trace};

use crate::config::Config;
use crate::packet::{Packet, ScoreVector};
use crate::queue::Verdict;
use crate::rules::{InstanceId, RuleInstance};
use crate::uplink::{UplinkId, UplinkTable};

/// Configuration and uplink metadata a chain was built from
#[derive(Debug, Clone)]
pub struct ChainSnapshot {
    /// Configuration in force for this chain
    pub config: Arc<Config>,
    /// Configured uplinks with their discovered metadata
    pub uplinks: UplinkTable,
}

impl ChainSnapshot {
    /// Snapshot over explicit uplink metadata
    #[must_use]
    pub fn new(config: Arc<Config>, uplinks: UplinkTable) -> Self {
        Self { config, uplinks }
    }

    /// Snapshot whose uplinks carry no discovered metadata
    #[must_use]
    pub fn from_config(config: Arc<Config>) -> Self {
        let uplinks = config.uplink_table();
        Self { config, uplinks }
    }

    /// Whether splitting is on
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Packet mark routing through `uplink`'s table
    #[must_use]
    pub fn mark(&self, uplink: UplinkId) -> u32 {
        self.config.route_table_base + u32::from(uplink.get())
    }

    #[cfg(test)]
    pub(crate) fn for_uplinks(ids: &[u8]) -> Self {
        use crate::config::UplinkConfig;

        let config = Config {
            uplinks: ids
                .iter()
                .map(|id| UplinkConfig::new(format!("eth{}", id - 1), *id))
                .collect(),
            ..Config::empty()
        };
        Self::from_config(Arc::new(config))
    }
}

/// One position in a pending chain
#[derive(Debug)]
pub enum Link {
    /// Freshly started instance
    Owned(RuleInstance),
    /// Instance carried over from the previous chain
    Inherited(InstanceId),
}

impl Link {
    /// Instance ID at this position
    #[must_use]
    pub fn id(&self) -> InstanceId {
        match self {
            Self::Owned(instance) => instance.id(),
            Self::Inherited(id) => *id,
        }
    }
}

/// A chain on its way to the reader
#[derive(Debug)]
pub struct PendingChain {
    snapshot: ChainSnapshot,
    links: Vec<Link>,
}

impl PendingChain {
    /// Create a pending chain
    #[must_use]
    pub fn new(snapshot: ChainSnapshot, links: Vec<Link>) -> Self {
        Self { snapshot, links }
    }

    /// Snapshot the chain was built from
    #[must_use]
    pub const fn snapshot(&self) -> &ChainSnapshot {
        &self.snapshot
    }

    /// Positions in chain order
    #[must_use]
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Resolve inherited positions against `previous` and activate
    ///
    /// Instances of `previous` that are not carried forward are destroyed
    /// when it is dropped at the end of this call. An inherited ID that
    /// `previous` does not hold is logged and left out.
    #[must_use]
    pub fn adopt(self, previous: Option<Chain>) -> Chain {
        let mut carried: Vec<Option<RuleInstance>> = previous
            .map(|chain| chain.instances.into_iter().map(Some).collect())
            .unwrap_or_default();

        let mut instances = Vec::with_capacity(self.links.len());
        for link in self.links {
            match link {
                Link::Owned(instance) => instances.push(instance),
                Link::Inherited(id) => {
                    let found = carried
                        .iter_mut()
                        .find(|slot| slot.as_ref().is_some_and(|i| i.id() == id))
                        .and_then(Option::take);
                    match found {
                        Some(instance) => instances.push(instance),
                        None => error!(instance = id, "Inherited rule instance missing, skipping"),
                    }
                }
            }
        }

        let retired = carried.iter().flatten().count();
        if retired > 0 {
            debug!(retired, "Destroying retired rule instances");
        }
        drop(carried);

        Chain {
            snapshot: self.snapshot,
            instances,
        }
    }
}

/// Why a packet was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A rule set `drop_packet`
    Rule,
    /// A rule callback failed
    Error,
}

/// Outcome of running a packet through a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Send out `uplink` by marking the packet
    Route {
        /// Chosen uplink
        uplink: UplinkId,
        /// Mark to apply
        mark: u32,
    },
    /// Drop the packet
    Drop(DropReason),
    /// Accept unmarked; the default route applies
    PassThrough,
}

impl Decision {
    /// Queue verdict for this decision
    #[must_use]
    pub const fn verdict(self) -> Verdict {
        match self {
            Self::Route { mark, .. } => Verdict::Accept { mark: Some(mark) },
            Self::Drop(_) => Verdict::Drop,
            Self::PassThrough => Verdict::Accept { mark: None },
        }
    }
}

/// The active chain, owned by the reader
pub struct Chain {
    snapshot: ChainSnapshot,
    instances: Vec<RuleInstance>,
}

impl Chain {
    /// Create an active chain directly
    #[must_use]
    pub fn new(snapshot: ChainSnapshot, instances: Vec<RuleInstance>) -> Self {
        Self { snapshot, instances }
    }

    /// Snapshot the chain was built from
    #[must_use]
    pub const fn snapshot(&self) -> &ChainSnapshot {
        &self.snapshot
    }

    /// Instance IDs in chain order
    pub fn instance_ids(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.instances.iter().map(RuleInstance::id)
    }

    /// Number of rule instances
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the chain has no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Score `packet` and choose an uplink
    ///
    /// `packet` must already be parsed; an unparsed packet passes through.
    pub fn process<R: Rng + ?Sized>(&mut self, packet: &Packet, rng: &mut R) -> Decision {
        let Self {
            snapshot,
            instances,
        } = self;

        if !snapshot.enabled() || packet.header().is_none() || snapshot.uplinks.is_empty() {
            return Decision::PassThrough;
        }

        let mut scores = ScoreVector::baseline(&snapshot.uplinks);
        for instance in instances.iter_mut() {
            if let Err(e) = instance.update_scores(snapshot, &mut scores, packet) {
                debug!(packet = packet.id(), rule = instance.class_name(), error = %e, "Rule failed, dropping packet");
                return Decision::Drop(DropReason::Error);
            }
            if scores.is_final() {
                break;
            }
        }

        if scores.drop_packet {
            trace!(packet = packet.id(), %scores, "Dropped by rule");
            return Decision::Drop(DropReason::Rule);
        }

        let Some(uplink) = scores.select(rng) else {
            return Decision::PassThrough;
        };

        for instance in instances.iter_mut() {
            if let Err(e) = instance.on_uplink_chosen(snapshot, uplink, packet) {
                debug!(packet = packet.id(), rule = instance.class_name(), error = %e, "Rule failed, dropping packet");
                return Decision::Drop(DropReason::Error);
            }
        }

        trace!(packet = packet.id(), %scores, %uplink, "Uplink chosen");
        Decision::Route {
            uplink,
            mark: snapshot.mark(uplink),
        }
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("enabled", &self.snapshot.enabled())
            .field("uplinks", &self.snapshot.uplinks.len())
            .field("instances", &self.instances)
            .finish()
    }
}
