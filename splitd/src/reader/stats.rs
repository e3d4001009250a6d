//! Split statistics
//!
//! Counters kept by the reader. With a log interval configured, the
//! per-uplink session counts are logged and reset once per interval; the
//! check runs after each packet, so an idle queue logs nothing.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::info;

use crate::chain::{Decision, DropReason};
use crate::uplink::{UplinkId, MAX_UPLINKS};

/// Reader counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitStats {
    /// Packets received from the queue
    pub packets: u64,
    /// Packets routed per uplink, indexed by slot
    pub routed: [u64; MAX_UPLINKS],
    /// Packets dropped at a rule's request
    pub dropped: u64,
    /// Packets dropped because a rule failed
    pub rule_errors: u64,
    /// Packets accepted without a mark
    pub passed_through: u64,
    /// Packets that did not parse as IPv4
    pub unparsed: u64,
    /// Chains adopted
    pub chains: u64,
}

impl SplitStats {
    /// Count one decision
    pub fn record(&mut self, decision: &Decision) {
        match decision {
            Decision::Route { uplink, .. } => self.routed[uplink.index()] += 1,
            Decision::Drop(DropReason::Rule) => self.dropped += 1,
            Decision::Drop(DropReason::Error) => self.rule_errors += 1,
            Decision::PassThrough => self.passed_through += 1,
        }
    }

    /// Packets routed through `uplink`
    #[must_use]
    pub const fn routed_via(&self, uplink: UplinkId) -> u64 {
        self.routed[uplink.index()]
    }

    /// Packets routed through any uplink
    #[must_use]
    pub fn total_routed(&self) -> u64 {
        self.routed.iter().sum()
    }
}

impl fmt::Display for SplitStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "packets={} routed=[", self.packets)?;
        let mut first = true;
        for id in UplinkId::all() {
            let count = self.routed[id.index()];
            if count == 0 {
                continue;
            }
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{id}:{count}")?;
        }
        write!(
            f,
            "] dropped={} errors={} passthrough={} unparsed={}",
            self.dropped, self.rule_errors, self.passed_through, self.unparsed
        )
    }
}

/// Per-interval session counts
#[derive(Debug)]
pub struct IntervalLog {
    interval: Option<Duration>,
    window_start: Instant,
    sessions: [u64; MAX_UPLINKS],
}

impl IntervalLog {
    /// Create a log; `seconds == 0` disables it
    #[must_use]
    pub fn new(seconds: u64, now: Instant) -> Self {
        Self {
            interval: (seconds > 0).then(|| Duration::from_secs(seconds)),
            window_start: now,
            sessions: [0; MAX_UPLINKS],
        }
    }

    /// Change the interval, keeping the current window
    pub fn set_interval(&mut self, seconds: u64) {
        self.interval = (seconds > 0).then(|| Duration::from_secs(seconds));
    }

    /// Count a session routed through `uplink`
    pub fn count(&mut self, uplink: UplinkId) {
        self.sessions[uplink.index()] += 1;
    }

    /// Log and reset if the interval has elapsed
    ///
    /// Returns the counts that were logged.
    pub fn flush_if_due(&mut self, now: Instant) -> Option<[u64; MAX_UPLINKS]> {
        let interval = self.interval?;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < interval {
            return None;
        }

        let sessions = std::mem::take(&mut self.sessions);
        self.window_start = now;
        let summary = UplinkId::all()
            .filter(|id| sessions[id.index()] > 0)
            .map(|id| format!("{id}:{}", sessions[id.index()]))
            .collect::<Vec<_>>()
            .join(" ");
        info!(seconds = elapsed.as_secs(), sessions = %summary, "Split sessions");
        Some(sessions)
    }
}
