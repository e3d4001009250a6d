//! `router`: operator source routes
//!
//! Params:
//!
//! ```json
//! { "routes": [
//!     { "enabled": true, "sourceNetwork": "192.168.1.0/24", "uplinkID": 2 },
//!     { "enabled": true, "sourceNetwork": "10.0.0.5-10.0.0.10", "uplinkID": 0 }
//! ] }
//! ```
//!
//! Routes are scanned in order against the pre-NAT source address and only
//! the first enabled match applies:
//!
//! - `uplinkID` 0 leaves the scores alone (an exception to later routes).
//! - A target whose score is already non-positive is down; the route is
//!   ignored and scanning stops.
//! - Otherwise every other uplink is zeroed and the pipeline ends.
//!
//! A route without `uplinkID` is out of range and always skipped.

use serde::Deserialize;
use serde_json::Value;
use tracing::{trace, warn};

use super::matcher::MatcherList;
use super::traits::{Rule, RuleClass};
use crate::chain::ChainSnapshot;
use crate::config::RuleConfig;
use crate::error::RuleError;
use crate::packet::{Packet, ScoreVector};
use crate::uplink::{UplinkId, MAX_UPLINKS};

/// Rule class name
pub const NAME: &str = "router";

/// Maximum number of route entries
pub const MAX_ROUTES: usize = 256;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteParams {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    source_network: Option<String>,
    #[serde(default = "default_uplink_id", rename = "uplinkID")]
    uplink_id: i64,
}

/// Out of range, so a route without `uplinkID` is never applied
const fn default_uplink_id() -> i64 {
    -1
}

/// One source route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Disabled routes are skipped
    pub enabled: bool,
    /// Source addresses the route applies to
    pub source_network: MatcherList,
    /// Target uplink, 0 for "no change"
    pub uplink_id: i64,
}

impl Route {
    /// Target uplink, `None` for a no-op route
    ///
    /// Only meaningful for in-range IDs; see [`is_valid`](Self::is_valid).
    #[must_use]
    pub fn target(&self) -> Option<UplinkId> {
        u8::try_from(self.uplink_id).ok().and_then(UplinkId::new)
    }

    /// Whether `uplink_id` is 0 or a valid uplink ID
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (0..=MAX_UPLINKS as i64).contains(&self.uplink_id)
    }
}

/// Class for [`Router`]
#[derive(Debug, Default)]
pub struct RouterClass;

impl RuleClass for RouterClass {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&self, config: &RuleConfig) -> Result<Box<dyn Rule>, RuleError> {
        Ok(Box::new(Router::from_params(&config.params)?))
    }
}

/// Forces matching sources onto a fixed uplink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Create a router over explicit routes
    #[must_use]
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// Parse the rule parameters
    ///
    /// A missing `routes` key is accepted with a warning and yields a router
    /// that never matches.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::InvalidParams` for a malformed route list and
    /// `RuleError::Matcher` for a malformed `sourceNetwork`.
    pub fn from_params(params: &Value) -> Result<Self, RuleError> {
        let Some(routes) = params.get("routes") else {
            warn!(rule = NAME, "Missing routes, router will not match anything");
            return Ok(Self::new(Vec::new()));
        };

        let entries: Vec<RouteParams> = Vec::deserialize(routes)
            .map_err(|e| RuleError::invalid_params(NAME, e.to_string()))?;
        if entries.len() > MAX_ROUTES {
            return Err(RuleError::invalid_params(
                NAME,
                format!("{} routes given, at most {MAX_ROUTES}", entries.len()),
            ));
        }

        let routes = entries
            .into_iter()
            .map(|entry| {
                let source_network = match entry.source_network.as_deref() {
                    Some(text) => text.parse::<MatcherList>().map_err(|e| RuleError::matcher(NAME, e))?,
                    None => MatcherList::default(),
                };
                Ok(Route {
                    enabled: entry.enabled,
                    source_network,
                    uplink_id: entry.uplink_id,
                })
            })
            .collect::<Result<Vec<_>, RuleError>>()?;

        Ok(Self::new(routes))
    }

    /// Configured routes
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

impl Rule for Router {
    fn update_scores(
        &mut self,
        _chain: &ChainSnapshot,
        scores: &mut ScoreVector,
        packet: &Packet,
    ) -> Result<(), RuleError> {
        let src = packet.original().src;

        let Some((index, route)) = self
            .routes
            .iter()
            .enumerate()
            .filter(|(_, r)| r.enabled && r.is_valid())
            .find(|(_, r)| r.source_network.matches(src))
        else {
            return Ok(());
        };

        let Some(target) = route.target() else {
            trace!(route = index, %src, "Route leaves scores unchanged");
            return Ok(());
        };

        if scores.get(target) <= 0 {
            trace!(route = index, %src, uplink = %target, "Route target down, ignoring");
            return Ok(());
        }

        trace!(route = index, %src, uplink = %target, "Routing by source");
        scores.zero_others(target);
        scores.stop_processing = true;
        Ok(())
    }
}
