//! Shared fixtures: a reader on an in-memory queue and a manager feeding it

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use tokio::task::JoinHandle;

use splitd::chain::ChainSnapshot;
use splitd::config::{Config, RuleConfig, UplinkConfig};
use splitd::error::{RegistryError, RuleError};
use splitd::manager::Manager;
use splitd::packet::{Packet, ScoreVector, Tuple, IPPROTO_TCP};
use splitd::queue::{channel_queue, ChannelQueueHandle, QueuedPacket, Verdict};
use splitd::reader::{Reader, SplitStats};
use splitd::rules::{Rule, RuleClass, RuleLibrary, RuleRegistry};
use splitd::uplink::{LinkStatusBoard, StaticDiscovery, UplinkDiscovery, UplinkId};

// ============================================================================
// Counting rule
// ============================================================================

/// Counts lifecycle calls
///
/// `{"fail": true}` makes every update fail; `{"drop": true}` asks for
/// every packet to be dropped.
#[derive(Default)]
pub struct CountingClass {
    pub inits: AtomicUsize,
    pub destroys: Arc<AtomicUsize>,
}

struct Counting {
    fail: bool,
    drop: bool,
    destroys: Arc<AtomicUsize>,
}

impl Rule for Counting {
    fn update_scores(
        &mut self,
        _chain: &ChainSnapshot,
        scores: &mut ScoreVector,
        _packet: &Packet,
    ) -> Result<(), RuleError> {
        if self.fail {
            return Err(RuleError::evaluation("counting", "asked to fail"));
        }
        scores.drop_packet = self.drop;
        Ok(())
    }

    fn destroy(&mut self) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
    }
}

impl RuleClass for CountingClass {
    fn name(&self) -> &str {
        "counting"
    }

    fn init(&self, config: &RuleConfig) -> Result<Box<dyn Rule>, RuleError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Counting {
            fail: flag(&config.params, "fail"),
            drop: flag(&config.params, "drop"),
            destroys: Arc::clone(&self.destroys),
        }))
    }
}

fn flag(params: &Value, key: &str) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(false)
}

struct CountingLibrary(Arc<CountingClass>);

impl RuleLibrary for CountingLibrary {
    fn name(&self) -> &str {
        "counting"
    }

    fn init(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    fn rule_classes(&self) -> Vec<Arc<dyn RuleClass>> {
        vec![Arc::clone(&self.0) as Arc<dyn RuleClass>]
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub manager: Manager,
    pub feed: ChannelQueueHandle,
    pub reader: JoinHandle<SplitStats>,
    pub status: Arc<LinkStatusBoard>,
    pub counting: Arc<CountingClass>,
    next_id: u32,
}

impl Harness {
    /// Spawn a reader with a seeded RNG and a manager publishing to it
    pub fn start(seed: u64) -> Self {
        let (queue, feed) = channel_queue(64);
        let (reader, handle) = Reader::with_rng(queue, StdRng::seed_from_u64(seed));

        let status = Arc::new(LinkStatusBoard::new());
        let counting = Arc::new(CountingClass::default());
        let mut registry = RuleRegistry::with_builtin(Arc::clone(&status));
        registry
            .load_library(Arc::new(CountingLibrary(Arc::clone(&counting))))
            .unwrap();

        let discovery: Arc<dyn UplinkDiscovery> = Arc::new(StaticDiscovery::new());
        let manager = Manager::new(Arc::new(registry), discovery, handle);

        Self {
            manager,
            feed,
            reader: reader.spawn(),
            status,
            counting,
            next_id: 0,
        }
    }

    /// Queue one TCP packet from `src` to `dst` and wait for its verdict
    pub async fn route(&mut self, src: Ipv4Addr, dst: Ipv4Addr) -> Verdict {
        self.next_id += 1;
        let id = self.next_id;
        let payload = Packet::build_ipv4(IPPROTO_TCP, &Tuple::new(src, 40000, dst, 443));
        self.feed.send(QueuedPacket::new(id, payload)).await.unwrap();

        let (verdict_id, verdict) = self.feed.next_verdict().await.unwrap();
        assert_eq!(verdict_id, id);
        verdict
    }

    /// Shut the reader down and collect its counters
    pub async fn stop(self) -> SplitStats {
        self.manager.shutdown().unwrap();
        self.reader.await.unwrap()
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn id(n: u8) -> UplinkId {
    UplinkId::new(n).unwrap()
}

pub fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

/// Config with uplinks 1..=`count` on eth0.. and the given rules
pub fn config(count: u8, rules: Vec<RuleConfig>) -> Config {
    Config {
        uplinks: (1..=count)
            .map(|n| UplinkConfig::new(format!("eth{}", n - 1), n))
            .collect(),
        rules,
        ..Config::empty()
    }
}

/// Mark the default route table base gives `uplink`
pub fn mark(uplink: u8) -> Verdict {
    Verdict::Accept {
        mark: Some(64 + u32::from(uplink)),
    }
}
