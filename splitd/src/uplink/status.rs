//! Shared per-uplink link state
//!
//! The [`LinkMonitor`](super::LinkMonitor) writes carrier state here, as can
//! an external failure detector; the `online` rule reads it on every packet.
//! Each slot is a single atomic so readers never take a lock.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::info;

use super::{UplinkId, MAX_UPLINKS};

/// Link state of one uplink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LinkState {
    /// No report yet, treated as online
    #[default]
    Unknown = 0,
    /// Link passed its last test
    Online = 1,
    /// Link failed its last test
    Offline = 2,
}

impl LinkState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Online,
            2 => Self::Offline,
            _ => Self::Unknown,
        }
    }

    /// Whether traffic may be sent over a link in this state
    #[must_use]
    pub const fn is_usable(self) -> bool {
        !matches!(self, Self::Offline)
    }
}

/// Lock-free table of link states
#[derive(Debug, Default)]
pub struct LinkStatusBoard {
    states: [AtomicU8; MAX_UPLINKS],
}

impl LinkStatusBoard {
    /// Create a board with every link unknown
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `id`
    pub fn state(&self, id: UplinkId) -> LinkState {
        LinkState::from_u8(self.states[id.index()].load(Ordering::Acquire))
    }

    /// Record a new state for `id`
    pub fn set_state(&self, id: UplinkId, state: LinkState) {
        let previous = self.states[id.index()].swap(state as u8, Ordering::AcqRel);
        if previous != state as u8 {
            info!(uplink = %id, ?state, "Link state changed");
        }
    }

    /// Convenience for detectors that only report up/down
    pub fn set_online(&self, id: UplinkId, online: bool) {
        self.set_state(id, if online { LinkState::Online } else { LinkState::Offline });
    }

    /// Whether `id` may carry traffic
    pub fn is_usable(&self, id: UplinkId) -> bool {
        self.state(id).is_usable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_is_usable() {
        let board = LinkStatusBoard::new();
        let id = UplinkId::new(1).unwrap();
        assert_eq!(board.state(id), LinkState::Unknown);
        assert!(board.is_usable(id));
    }

    #[test]
    fn test_set_online_roundtrip() {
        let board = LinkStatusBoard::new();
        let id = UplinkId::new(4).unwrap();

        board.set_online(id, false);
        assert_eq!(board.state(id), LinkState::Offline);
        assert!(!board.is_usable(id));

        board.set_online(id, true);
        assert_eq!(board.state(id), LinkState::Online);

        // Other slots untouched
        assert_eq!(board.state(UplinkId::new(3).unwrap()), LinkState::Unknown);
    }
}
