//! Configuration reconciliation
//!
//! The [`Manager`] owns the authoritative configuration and knows which rule
//! instances are running. [`Manager::set_config`] turns a new configuration
//! into a new chain for the reader:
//!
//! 1. Validate the configuration.
//! 2. Refresh uplink metadata through discovery (best-effort; a failed
//!    lookup keeps the stale metadata).
//! 3. Match each wanted rule against the running instances. An equal
//!    [`RuleConfig`] keeps its instance, and its state, untouched.
//! 4. Start the rest. Unknown rule names are logged and skipped; an `init`
//!    failure aborts the whole call.
//! 5. Publish the chain to the reader without waiting for it.
//! 6. Commit: running instances not carried forward are retired and are
//!    destroyed by the reader once the new chain is in place.
//!
//! Nothing is committed unless the chain was published, so a failed call
//! leaves the previous configuration and chain in force.
//!
//! # Thread Safety
//!
//! Calls are serialized by a mutex. [`Manager::config`] reads a snapshot
//! through `ArcSwap` and never waits for a reconciliation in progress.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::chain::{ChainSnapshot, Link, PendingChain};
use crate::config::{Config, RuleConfig};
use crate::error::ManagerError;
use crate::reader::ReaderHandle;
use crate::rules::{InstanceId, RuleInstance, RuleRegistry};
use crate::uplink::{Uplink, UplinkDiscovery, UplinkId, UplinkTable};

/// A rule instance the reader is running
#[derive(Debug, Clone, PartialEq)]
pub struct RunningRule {
    /// Instance ID
    pub id: InstanceId,
    /// Configuration the instance was started from
    pub config: RuleConfig,
}

#[derive(Debug)]
struct ManagerState {
    uplinks: UplinkTable,
    running: Vec<RunningRule>,
    next_id: InstanceId,
}

/// Outcome of matching wanted rules against running ones
struct Plan<'a> {
    /// Per wanted rule: the running instance to keep, if any
    keep: Vec<Option<InstanceId>>,
    /// Wanted rules, in configuration order
    wanted: &'a [RuleConfig],
    /// Running instances not kept
    retired: usize,
}

impl<'a> Plan<'a> {
    fn new(running: &[RunningRule], wanted: &'a [RuleConfig]) -> Self {
        let mut claimed = vec![false; running.len()];
        let keep = wanted
            .iter()
            .map(|rule| {
                let slot = running
                    .iter()
                    .enumerate()
                    .position(|(i, r)| !claimed[i] && r.config == *rule)?;
                claimed[slot] = true;
                Some(running[slot].id)
            })
            .collect();
        let retired = claimed.iter().filter(|c| !**c).count();
        Self {
            keep,
            wanted,
            retired,
        }
    }
}

/// Owner of the running configuration
pub struct Manager {
    registry: Arc<RuleRegistry>,
    discovery: Arc<dyn UplinkDiscovery>,
    reader: ReaderHandle,
    state: Mutex<ManagerState>,
    current: ArcSwap<Config>,
}

impl Manager {
    /// Create a manager; nothing runs until the first [`set_config`](Self::set_config)
    #[must_use]
    pub fn new(
        registry: Arc<RuleRegistry>,
        discovery: Arc<dyn UplinkDiscovery>,
        reader: ReaderHandle,
    ) -> Self {
        Self {
            registry,
            discovery,
            reader,
            state: Mutex::new(ManagerState {
                uplinks: UplinkTable::new(),
                running: Vec::new(),
                next_id: 1,
            }),
            current: ArcSwap::from_pointee(Config::empty()),
        }
    }

    /// Apply a new configuration
    ///
    /// Returns once the new chain is handed to the reader, not once it is
    /// adopted.
    ///
    /// # Errors
    ///
    /// - `ManagerError::Config` if the configuration is invalid
    /// - `ManagerError::Rule` if a rule fails to initialize
    /// - `ManagerError::Publish` if the reader has exited
    ///
    /// In every case the previous configuration stays in force.
    pub fn set_config(&self, config: Config) -> Result<(), ManagerError> {
        config.validate()?;

        let mut state = self.state.lock();
        let uplinks = self.discover(&config, &state.uplinks);

        let wanted = config.effective_rules();
        let plan = Plan::new(&state.running, wanted);
        let retired = plan.retired;

        let mut next_id = state.next_id;
        let mut links = Vec::with_capacity(wanted.len());
        let mut running = Vec::with_capacity(wanted.len());
        let mut started = 0usize;

        for (rule, keep) in plan.wanted.iter().zip(&plan.keep) {
            if let Some(id) = keep {
                links.push(Link::Inherited(*id));
                running.push(RunningRule {
                    id: *id,
                    config: rule.clone(),
                });
                continue;
            }

            let Some(class) = self.registry.get(&rule.rule_name) else {
                warn!(rule = %rule.rule_name, "Unknown rule, skipping");
                continue;
            };

            let id = next_id;
            next_id += 1;
            let instance = RuleInstance::create(id, class, rule.clone())?;
            links.push(Link::Owned(instance));
            running.push(RunningRule {
                id,
                config: rule.clone(),
            });
            started += 1;
        }

        let config = Arc::new(config);
        let snapshot = ChainSnapshot::new(Arc::clone(&config), uplinks.clone());
        self.reader.publish(PendingChain::new(snapshot, links))?;

        info!(
            enabled = config.enabled,
            uplinks = uplinks.len(),
            kept = running.len() - started,
            started,
            retired,
            "Configuration applied"
        );

        state.uplinks = uplinks;
        state.running = running;
        state.next_id = next_id;
        self.current.store(config);
        Ok(())
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        self.current.load_full()
    }

    /// Current metadata for uplink `id`
    #[must_use]
    pub fn uplink(&self, id: UplinkId) -> Option<Uplink> {
        self.state.lock().uplinks.get(id).cloned()
    }

    /// Current metadata for all configured uplinks
    #[must_use]
    pub fn uplinks(&self) -> UplinkTable {
        self.state.lock().uplinks.clone()
    }

    /// Running rules in chain order
    #[must_use]
    pub fn running_rules(&self) -> Vec<RunningRule> {
        self.state.lock().running.clone()
    }

    /// Re-run discovery for the configured uplinks
    ///
    /// If anything changed, a chain carrying the same rule instances and the
    /// new metadata is published. Returns the number of uplinks that
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns `ManagerError::Publish` if the reader has exited.
    pub fn refresh_uplinks(&self) -> Result<usize, ManagerError> {
        let mut state = self.state.lock();
        let config = self.config();
        let uplinks = self.discover(&config, &state.uplinks);

        let changed = uplinks
            .iter()
            .filter(|u| state.uplinks.get(u.id) != Some(*u))
            .count();
        if changed == 0 {
            return Ok(0);
        }

        let links = state
            .running
            .iter()
            .map(|r| Link::Inherited(r.id))
            .collect();
        self.reader
            .publish(PendingChain::new(ChainSnapshot::new(config, uplinks.clone()), links))?;

        info!(changed, "Uplink metadata refreshed");
        state.uplinks = uplinks;
        Ok(changed)
    }

    /// Ask the reader to stop
    ///
    /// # Errors
    ///
    /// Returns `ManagerError::Publish` if the reader has already exited.
    pub fn shutdown(&self) -> Result<(), ManagerError> {
        self.reader.shutdown()?;
        Ok(())
    }

    /// Whether the reader still accepts chains
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.reader.is_running()
    }

    /// Uplink table for `config`, starting from `previous` metadata
    fn discover(&self, config: &Config, previous: &UplinkTable) -> UplinkTable {
        let mut table = UplinkTable::new();
        for uplink_config in &config.uplinks {
            let Some(id) = uplink_config.id() else {
                continue;
            };

            let mut uplink = match previous.get(id) {
                Some(old) if old.local_name == uplink_config.os_name => old.clone(),
                _ => Uplink::new(&uplink_config.os_name, id),
            };

            match self.discovery.discover(&uplink.local_name) {
                Ok(found) => {
                    if uplink.apply(&found) {
                        debug!(uplink = %id, interface = %uplink.local_name, "Uplink metadata updated");
                    }
                }
                Err(e) => warn!(
                    uplink = %id,
                    interface = %uplink.local_name,
                    error = %e,
                    "Uplink discovery failed, keeping previous metadata"
                ),
            }
            table.insert(uplink);
        }
        table
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("registry", &self.registry)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}
