//! Per-packet uplink scores and weighted selection
//!
//! Every packet starts from a baseline of 1 point per configured uplink and
//! 0 for empty slots. Rules add or remove points in chain order; once they
//! are done the positive scores become selection weights.
//!
//! # Selection
//!
//! | Step | Rule |
//! |------|------|
//! | Clamp | a score `<= 0` weighs nothing |
//! | Fallback | zero total weight picks the lowest configured ID |
//! | Draw | uniform in `[0, total)`, walk IDs ascending, first cumulative weight above the draw wins |
//!
//! Unconfigured slots never win, whatever their score.

use std::fmt;

use rand::Rng;

use crate::uplink::{UplinkId, UplinkTable, MAX_UPLINKS};

/// Score that takes an uplink out of the running
///
/// Far enough below zero that later additive rules cannot revive it.
pub const DISQUALIFIED: i32 = -1000;

/// Baseline score of a configured uplink
pub const BASELINE: i32 = 1;

/// Mutable scoring state threaded through the rule pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreVector {
    scores: [i32; MAX_UPLINKS],
    configured: u8,
    /// End the pipeline after the current rule
    pub stop_processing: bool,
    /// Drop the packet instead of routing it
    pub drop_packet: bool,
}

impl ScoreVector {
    /// Baseline for the uplinks in `table`
    #[must_use]
    pub fn baseline(table: &UplinkTable) -> Self {
        Self::with_configured(table.ids())
    }

    /// Baseline for an explicit set of configured uplinks
    pub fn with_configured(ids: impl IntoIterator<Item = UplinkId>) -> Self {
        let mut vector = Self {
            scores: [0; MAX_UPLINKS],
            configured: 0,
            stop_processing: false,
            drop_packet: false,
        };
        for id in ids {
            vector.configured |= 1 << id.index();
            vector.scores[id.index()] = BASELINE;
        }
        vector
    }

    /// Whether `id` is a configured uplink
    #[must_use]
    pub const fn is_configured(&self, id: UplinkId) -> bool {
        self.configured & (1 << id.index()) != 0
    }

    /// Configured uplinks in ascending ID order
    pub fn configured(&self) -> impl Iterator<Item = UplinkId> + '_ {
        UplinkId::all().filter(|id| self.is_configured(*id))
    }

    /// Current score of `id`
    #[must_use]
    pub const fn get(&self, id: UplinkId) -> i32 {
        self.scores[id.index()]
    }

    /// Overwrite the score of `id`
    pub fn set(&mut self, id: UplinkId, score: i32) {
        self.scores[id.index()] = score;
    }

    /// Add `points` (possibly negative) to `id`
    pub fn add(&mut self, id: UplinkId, points: i32) {
        let slot = &mut self.scores[id.index()];
        *slot = slot.saturating_add(points);
    }

    /// Take `id` out of the running
    pub fn disqualify(&mut self, id: UplinkId) {
        self.set(id, DISQUALIFIED);
    }

    /// Disqualify every uplink except `keep`
    pub fn pin(&mut self, keep: UplinkId) {
        for id in UplinkId::all().filter(|id| *id != keep) {
            self.disqualify(id);
        }
    }

    /// Zero every uplink except `keep`
    pub fn zero_others(&mut self, keep: UplinkId) {
        for id in UplinkId::all().filter(|id| *id != keep) {
            self.set(id, 0);
        }
    }

    /// Whether the pipeline should stop before the next rule
    #[must_use]
    pub const fn is_final(&self) -> bool {
        self.stop_processing || self.drop_packet
    }

    /// Selection weight of `id` after clamping
    #[must_use]
    pub fn weight(&self, id: UplinkId) -> u64 {
        if self.is_configured(id) {
            u64::try_from(self.get(id)).unwrap_or(0)
        } else {
            0
        }
    }

    /// Sum of all selection weights
    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.configured().map(|id| self.weight(id)).sum()
    }

    /// Uplink whose cumulative weight first exceeds `draw`
    ///
    /// `draw` must be below [`total_weight`](Self::total_weight).
    #[must_use]
    pub fn pick(&self, draw: u64) -> Option<UplinkId> {
        let mut cumulative = 0u64;
        for id in self.configured() {
            cumulative += self.weight(id);
            if draw < cumulative {
                return Some(id);
            }
        }
        None
    }

    /// Choose an uplink
    ///
    /// Returns `None` only when no uplink is configured.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<UplinkId> {
        let total = self.total_weight();
        if total == 0 {
            return self.configured().next();
        }
        self.pick(rng.gen_range(0..total))
    }

    /// Raw scores by slot
    #[must_use]
    pub const fn as_array(&self) -> &[i32; MAX_UPLINKS] {
        &self.scores
    }
}

impl fmt::Display for ScoreVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, id) in self.configured().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{id}:{}", self.get(id))?;
        }
        f.write_str("]")?;
        if self.drop_packet {
            f.write_str(" drop")?;
        } else if self.stop_processing {
            f.write_str(" stop")?;
        }
        Ok(())
    }
}
