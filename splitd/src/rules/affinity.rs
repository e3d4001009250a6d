//! `cacher`: sticky uplink per host pair
//!
//! Once a flow between two hosts has been routed, later flows with the same
//! protocol and addresses are pinned to the same uplink. Ports are not part
//! of the key, so every connection between the two hosts shares one
//! decision.
//!
//! The table is bounded two ways:
//!
//! - **Time**: entries expire a fixed time after creation, and earlier if
//!   left idle.
//! - **Size**: above the soft limit every insert triggers a sweep; at the
//!   hard limit new entries are refused.
//!
//! Sweeps run from [`Rule::on_uplink_chosen`], on traffic, never on a timer.
//!
//! # Parameters
//!
//! | Key | Default |
//! |-----|---------|
//! | `creationTimeout` | 2592000 s (30 days) |
//! | `accessTimeout` | 7200 s |
//! | `softMaxSize` | 2000 |
//! | `hardMaxSize` | 10000 |
//! | `cleanInterval` | 60 s |
//!
//! The `cache_*` spellings of older configurations are accepted as well.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, trace, warn};

use super::traits::{Rule, RuleClass};
use crate::chain::ChainSnapshot;
use crate::config::RuleConfig;
use crate::error::RuleError;
use crate::packet::{Packet, ScoreVector};
use crate::uplink::UplinkId;

/// Rule class name
pub const NAME: &str = "cacher";

/// Alternate class name
pub const ALIAS: &str = "affinity";

/// Table tuning, read once at init
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffinitySettings {
    /// Maximum age of an entry
    pub creation_timeout: Duration,
    /// Maximum idle time of an entry
    pub access_timeout: Duration,
    /// Size above which every insert triggers a sweep
    pub soft_max_size: usize,
    /// Size at which inserts are refused
    pub hard_max_size: usize,
    /// Minimum time between interval-triggered sweeps
    pub clean_interval: Duration,
}

impl Default for AffinitySettings {
    fn default() -> Self {
        Self {
            creation_timeout: Duration::from_secs(30 * 24 * 3600),
            access_timeout: Duration::from_secs(7200),
            soft_max_size: 2000,
            hard_max_size: 10000,
            clean_interval: Duration::from_secs(60),
        }
    }
}

impl AffinitySettings {
    /// Read settings from rule params
    ///
    /// Missing keys take their default. A key present with a value that is
    /// not a non-negative integer is logged and also takes its default.
    #[must_use]
    pub fn from_params(params: &Value) -> Self {
        let defaults = Self::default();
        let read = |keys: [&str; 2], default: u64| -> u64 {
            let Some((key, value)) = keys
                .iter()
                .find_map(|k| params.get(*k).map(|v| (*k, v)))
            else {
                return default;
            };
            value.as_u64().unwrap_or_else(|| {
                warn!(rule = NAME, key, %value, default, "Invalid parameter, assuming default");
                default
            })
        };

        let as_usize = |v: u64| usize::try_from(v).unwrap_or(usize::MAX);

        Self {
            creation_timeout: Duration::from_secs(read(
                ["creationTimeout", "cache_creation_timeout"],
                defaults.creation_timeout.as_secs(),
            )),
            access_timeout: Duration::from_secs(read(
                ["accessTimeout", "cache_access_timeout"],
                defaults.access_timeout.as_secs(),
            )),
            soft_max_size: as_usize(read(
                ["softMaxSize", "cache_max_size"],
                defaults.soft_max_size as u64,
            )),
            hard_max_size: as_usize(read(
                ["hardMaxSize", "cache_hard_max_size"],
                defaults.hard_max_size as u64,
            )),
            clean_interval: Duration::from_secs(read(
                ["cleanInterval", "cache_clean_interval"],
                defaults.clean_interval.as_secs(),
            )),
        }
    }
}

/// Host pair and protocol of a pre-NAT tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AffinityKey {
    /// IP protocol number
    pub protocol: u8,
    /// Pre-NAT source address
    pub src: Ipv4Addr,
    /// Pre-NAT destination address
    pub dst: Ipv4Addr,
}

impl AffinityKey {
    /// Key for `packet`
    #[must_use]
    pub fn of(packet: &Packet) -> Self {
        let original = packet.original();
        Self {
            protocol: packet.protocol(),
            src: original.src,
            dst: original.dst,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    uplink: UplinkId,
    created: Instant,
    last_access: Instant,
}

/// What [`AffinityTable::record`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// New entry added
    Inserted,
    /// Existing entry's access time refreshed
    Refreshed,
    /// Table full, nothing stored
    Rejected,
}

/// The affinity table, with time passed in explicitly
#[derive(Debug)]
pub struct AffinityTable {
    settings: AffinitySettings,
    entries: HashMap<AffinityKey, CacheEntry>,
    last_clean: Instant,
    /// Inserts refused at the hard limit since the last sweep
    rejected: u64,
}

impl AffinityTable {
    /// Create an empty table whose sweep clock starts at `now`
    #[must_use]
    pub fn new(settings: AffinitySettings, now: Instant) -> Self {
        Self {
            settings,
            entries: HashMap::new(),
            last_clean: now,
            rejected: 0,
        }
    }

    /// Table settings
    #[must_use]
    pub const fn settings(&self) -> &AffinitySettings {
        &self.settings
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts refused at the hard limit since the last sweep
    #[must_use]
    pub const fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Uplink remembered for `key`
    #[must_use]
    pub fn lookup(&self, key: &AffinityKey) -> Option<UplinkId> {
        self.entries.get(key).map(|e| e.uplink)
    }

    /// Remember `uplink` for `key`, or refresh an existing entry
    pub fn record(&mut self, key: AffinityKey, uplink: UplinkId, now: Instant) -> RecordOutcome {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_access = now;
            return RecordOutcome::Refreshed;
        }

        if self.entries.len() >= self.settings.hard_max_size {
            // Warn once per sweep cycle; the sweep reports the total
            self.rejected += 1;
            if self.rejected == 1 {
                warn!(
                    size = self.entries.len(),
                    limit = self.settings.hard_max_size,
                    "Affinity cache hard limit reached, not caching"
                );
            } else {
                trace!(?key, "Affinity cache full, not caching");
            }
            return RecordOutcome::Rejected;
        }

        trace!(?key, %uplink, "Affinity cache add");
        self.entries.insert(
            key,
            CacheEntry {
                uplink,
                created: now,
                last_access: now,
            },
        );
        RecordOutcome::Inserted
    }

    /// Sweep if the interval has passed or the soft limit is exceeded
    ///
    /// Returns the number of entries removed, `None` if no sweep ran.
    pub fn maintain(&mut self, now: Instant) -> Option<usize> {
        let interval_due = now.saturating_duration_since(self.last_clean) > self.settings.clean_interval;
        let oversized = self.entries.len() > self.settings.soft_max_size;
        if !interval_due && !oversized {
            return None;
        }
        Some(self.sweep(now))
    }

    /// Remove every expired entry and restart the sweep clock
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let AffinitySettings {
            creation_timeout,
            access_timeout,
            ..
        } = self.settings;

        self.entries.retain(|_, entry| {
            now.saturating_duration_since(entry.created) < creation_timeout
                && now.saturating_duration_since(entry.last_access) < access_timeout
        });
        self.last_clean = now;

        if self.rejected > 0 {
            warn!(rejected = self.rejected, "Affinity cache refused inserts since last sweep");
            self.rejected = 0;
        }

        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Affinity cache swept");
        }
        removed
    }
}

/// Class for [`AffinityCache`]
#[derive(Debug)]
pub struct AffinityCacheClass {
    name: &'static str,
}

impl AffinityCacheClass {
    /// The class under its primary name
    #[must_use]
    pub const fn new() -> Self {
        Self { name: NAME }
    }

    /// The class under its alternate name
    #[must_use]
    pub const fn alias() -> Self {
        Self { name: ALIAS }
    }
}

impl Default for AffinityCacheClass {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleClass for AffinityCacheClass {
    fn name(&self) -> &str {
        self.name
    }

    fn init(&self, config: &RuleConfig) -> Result<Box<dyn Rule>, RuleError> {
        if !(config.params.is_null() || config.params.is_object()) {
            return Err(RuleError::invalid_params(self.name, "params must be an object"));
        }
        let settings = AffinitySettings::from_params(&config.params);
        debug!(rule = self.name, ?settings, "Affinity cache configured");
        Ok(Box::new(AffinityCache::new(settings)))
    }
}

/// Pins repeated host-pair traffic to its first uplink
#[derive(Debug)]
pub struct AffinityCache {
    table: AffinityTable,
}

impl AffinityCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(settings: AffinitySettings) -> Self {
        Self {
            table: AffinityTable::new(settings, Instant::now()),
        }
    }

    /// The underlying table
    #[must_use]
    pub const fn table(&self) -> &AffinityTable {
        &self.table
    }
}

impl Rule for AffinityCache {
    fn update_scores(
        &mut self,
        _chain: &ChainSnapshot,
        scores: &mut ScoreVector,
        packet: &Packet,
    ) -> Result<(), RuleError> {
        let key = AffinityKey::of(packet);
        if let Some(uplink) = self.table.lookup(&key) {
            trace!(?key, %uplink, "Affinity cache hit");
            scores.pin(uplink);
        }
        Ok(())
    }

    fn on_uplink_chosen(
        &mut self,
        _chain: &ChainSnapshot,
        uplink: UplinkId,
        packet: &Packet,
    ) -> Result<(), RuleError> {
        let now = Instant::now();
        self.table.record(AffinityKey::of(packet), uplink, now);
        self.table.maintain(now);
        Ok(())
    }

    fn destroy(&mut self) {
        debug!(entries = self.table.len(), "Affinity cache released");
        self.table.entries.clear();
    }
}
