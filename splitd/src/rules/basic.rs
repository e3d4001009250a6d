//! `basic`: fixed per-uplink points
//!
//! Params: `{"scores": [p1, p2, ...]}` where `pN` is added to uplink `N`.
//! The legacy key `distribution` is accepted too.

use serde::Deserialize;
use serde_json::Value;

use super::traits::{Rule, RuleClass};
use crate::chain::ChainSnapshot;
use crate::config::RuleConfig;
use crate::error::RuleError;
use crate::packet::{Packet, ScoreVector};
use crate::uplink::{UplinkId, MAX_UPLINKS};

/// Rule class name
pub const NAME: &str = "basic";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    #[serde(default, alias = "distribution")]
    scores: Vec<i32>,
}

/// Class for [`Basic`]
#[derive(Debug, Default)]
pub struct BasicClass;

impl RuleClass for BasicClass {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&self, config: &RuleConfig) -> Result<Box<dyn Rule>, RuleError> {
        Ok(Box::new(Basic::from_params(&config.params)?))
    }
}

/// Adds a fixed number of points to each uplink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Basic {
    points: [i32; MAX_UPLINKS],
}

impl Basic {
    /// Parse the rule parameters
    ///
    /// # Errors
    ///
    /// Returns `RuleError::InvalidParams` if `params` is not an object with
    /// at most `MAX_UPLINKS` integer scores.
    pub fn from_params(params: &Value) -> Result<Self, RuleError> {
        let params: Params = if params.is_null() {
            Params::default()
        } else {
            Params::deserialize(params).map_err(|e| RuleError::invalid_params(NAME, e.to_string()))?
        };

        if params.scores.len() > MAX_UPLINKS {
            return Err(RuleError::invalid_params(
                NAME,
                format!("{} scores given, at most {MAX_UPLINKS} uplinks", params.scores.len()),
            ));
        }

        let mut points = [0; MAX_UPLINKS];
        points[..params.scores.len()].copy_from_slice(&params.scores);
        Ok(Self { points })
    }
}

impl Rule for Basic {
    fn update_scores(
        &mut self,
        _chain: &ChainSnapshot,
        scores: &mut ScoreVector,
        _packet: &Packet,
    ) -> Result<(), RuleError> {
        for id in UplinkId::all() {
            scores.add(id, self.points[id.index()]);
        }
        Ok(())
    }
}
