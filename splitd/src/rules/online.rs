//! `online`: keep traffic off failed links

use std::sync::Arc;

use super::traits::{Rule, RuleClass};
use crate::chain::ChainSnapshot;
use crate::config::RuleConfig;
use crate::error::RuleError;
use crate::packet::{Packet, ScoreVector};
use crate::uplink::{LinkStatusBoard, UplinkId};

/// Rule class name
pub const NAME: &str = "online";

/// Class for [`Online`]; every instance reads the same status board
#[derive(Debug)]
pub struct OnlineClass {
    status: Arc<LinkStatusBoard>,
}

impl OnlineClass {
    /// Create the class over a shared status board
    #[must_use]
    pub const fn new(status: Arc<LinkStatusBoard>) -> Self {
        Self { status }
    }
}

impl RuleClass for OnlineClass {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&self, _config: &RuleConfig) -> Result<Box<dyn Rule>, RuleError> {
        Ok(Box::new(Online {
            status: Arc::clone(&self.status),
        }))
    }
}

/// Disqualifies every configured uplink reported offline
#[derive(Debug)]
pub struct Online {
    status: Arc<LinkStatusBoard>,
}

impl Rule for Online {
    fn update_scores(
        &mut self,
        _chain: &ChainSnapshot,
        scores: &mut ScoreVector,
        _packet: &Packet,
    ) -> Result<(), RuleError> {
        for id in UplinkId::all() {
            if scores.is_configured(id) && !self.status.is_usable(id) {
                scores.disqualify(id);
            }
        }
        Ok(())
    }
}
