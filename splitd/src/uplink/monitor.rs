//! Carrier monitor for configured uplinks
//!
//! Reads each uplink's `carrier` (falling back to `operstate`) from sysfs and
//! writes the result to the [`LinkStatusBoard`] the `online` rule consults.
//! When any state changes the manager re-runs discovery, so addresses picked
//! up by a link coming back reach the reader with the next chain.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{LinkState, LinkStatusBoard, UplinkTable};
use crate::error::ManagerError;
use crate::manager::Manager;

/// Polls sysfs link state for the configured uplinks
#[derive(Debug, Clone)]
pub struct LinkMonitor {
    sys_class_net: PathBuf,
}

impl Default for LinkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkMonitor {
    /// Monitor the live system
    #[must_use]
    pub fn new() -> Self {
        Self::with_root("/sys/class/net")
    }

    /// Monitor an alternate `/sys/class/net`
    pub fn with_root(sys_class_net: impl Into<PathBuf>) -> Self {
        Self {
            sys_class_net: sys_class_net.into(),
        }
    }

    /// Current link state of `interface`
    ///
    /// A missing interface is offline. `carrier` is authoritative when it can
    /// be read; an administratively down link refuses the read, so
    /// `operstate` decides then.
    pub fn read_state(&self, interface: &str) -> LinkState {
        let dir = self.sys_class_net.join(interface);
        if !dir.exists() {
            return LinkState::Offline;
        }

        let attr = |name: &str| fs::read_to_string(dir.join(name)).map(|s| s.trim().to_string());
        match attr("carrier").as_deref() {
            Ok("1") => return LinkState::Online,
            Ok("0") => return LinkState::Offline,
            _ => {}
        }
        match attr("operstate").as_deref() {
            Ok("up") => LinkState::Online,
            Ok("down" | "lowerlayerdown" | "notpresent") => LinkState::Offline,
            _ => LinkState::Unknown,
        }
    }

    /// Read every uplink in `uplinks` into `board`
    ///
    /// Returns the number of uplinks whose state changed.
    pub fn poll(&self, uplinks: &UplinkTable, board: &LinkStatusBoard) -> usize {
        let mut changed = 0;
        for uplink in uplinks.iter() {
            let state = self.read_state(&uplink.local_name);
            if board.state(uplink.id) != state {
                board.set_state(uplink.id, state);
                changed += 1;
            }
        }
        changed
    }

    /// Poll the manager's uplinks and refresh their metadata on any change
    ///
    /// Returns the number of uplinks whose state changed.
    ///
    /// # Errors
    ///
    /// Returns `ManagerError::Publish` if the reader has exited.
    pub fn check(&self, manager: &Manager, board: &LinkStatusBoard) -> Result<usize, ManagerError> {
        let changed = self.poll(&manager.uplinks(), board);
        if changed > 0 {
            manager.refresh_uplinks()?;
        }
        Ok(changed)
    }

    /// Check every `period` until the reader stops
    ///
    /// Checks run on the blocking pool since discovery reads files and takes
    /// the manager lock. A zero `period` returns at once.
    pub async fn run(self, manager: Arc<Manager>, board: Arc<LinkStatusBoard>, period: Duration) {
        if period.is_zero() {
            info!("Link monitor disabled");
            return;
        }
        info!(period_secs = period.as_secs(), "Link monitor started");
        let monitor = Arc::new(self);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !manager.is_running() {
                break;
            }

            let (monitor, manager, board) =
                (Arc::clone(&monitor), Arc::clone(&manager), Arc::clone(&board));
            match tokio::task::spawn_blocking(move || monitor.check(&manager, &board)).await {
                Ok(Ok(0)) => {}
                Ok(Ok(changed)) => debug!(changed, "Uplink link states changed"),
                Ok(Err(e)) => {
                    warn!(error = %e, "Link check failed");
                    break;
                }
                Err(e) => warn!(error = %e, "Link check task failed"),
            }
        }
        info!("Link monitor stopped");
    }
}
