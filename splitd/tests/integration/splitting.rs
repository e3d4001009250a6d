//! End-to-end splitting through the reader
//!
//! Every test drives real rules through a reader fed by an in-memory queue,
//! exactly as the daemon would receive packets from the kernel.

use serde_json::json;

use splitd::config::RuleConfig;
use splitd::queue::Verdict;
use splitd::uplink::LinkState;

use super::common::{config, id, ip, mark, Harness};

// ============================================================================
// Weighted Selection
// ============================================================================

#[tokio::test]
async fn test_basic_split_follows_weights() {
    let mut harness = Harness::start(7);
    // Baseline 1 each, plus [5, 0]: uplink 1 weighs 6, uplink 2 weighs 1
    harness
        .manager
        .set_config(config(2, vec![RuleConfig::new("basic", json!({ "scores": [5, 0] }))]))
        .unwrap();

    const PACKETS: u32 = 10_000;
    for n in 0..PACKETS {
        let src = std::net::Ipv4Addr::from(0x0a00_0000 + n);
        let verdict = harness.route(src, ip("1.1.1.1")).await;
        assert!(verdict == mark(1) || verdict == mark(2), "unexpected {verdict}");
    }

    let stats = harness.stop().await;
    assert_eq!(stats.packets, u64::from(PACKETS));
    assert_eq!(stats.total_routed(), u64::from(PACKETS));

    let share = stats.routed_via(id(1)) as f64 / f64::from(PACKETS);
    let expected = 6.0 / 7.0;
    assert!(
        (share - expected).abs() < 0.02,
        "uplink 1 carried {share:.4}, expected about {expected:.4}"
    );
}

#[tokio::test]
async fn test_single_uplink_always_chosen() {
    let mut harness = Harness::start(1);
    harness.manager.set_config(config(1, Vec::new())).unwrap();

    for _ in 0..20 {
        assert_eq!(harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await, mark(1));
    }
    harness.stop().await;
}

#[tokio::test]
async fn test_custom_route_table_base() {
    let mut harness = Harness::start(1);
    let mut cfg = config(3, vec![RuleConfig::new("basic", json!({ "scores": [-5, -5, 0] }))]);
    cfg.route_table_base = 200;
    harness.manager.set_config(cfg).unwrap();

    assert_eq!(
        harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await,
        Verdict::Accept { mark: Some(203) }
    );
    harness.stop().await;
}

// ============================================================================
// Pass-Through
// ============================================================================

#[tokio::test]
async fn test_disabled_config_passes_unmarked() {
    let mut harness = Harness::start(1);
    let mut cfg = config(2, vec![RuleConfig::new("counting", json!({ "fail": true }))]);
    cfg.enabled = false;
    harness.manager.set_config(cfg).unwrap();

    let verdict = harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await;
    assert_eq!(verdict, Verdict::Accept { mark: None });

    let stats = harness.stop().await;
    assert_eq!(stats.passed_through, 1);
    assert_eq!(stats.rule_errors, 0);
}

#[tokio::test]
async fn test_no_uplinks_passes_unmarked() {
    let mut harness = Harness::start(1);
    harness
        .manager
        .set_config(config(0, vec![RuleConfig::new("basic", json!({ "scores": [3] }))]))
        .unwrap();

    assert_eq!(
        harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await,
        Verdict::Accept { mark: None }
    );
    harness.stop().await;
}

// ============================================================================
// Drops
// ============================================================================

#[tokio::test]
async fn test_no_positive_score_falls_back_to_lowest_id() {
    let mut harness = Harness::start(1);
    harness
        .manager
        .set_config(config(3, vec![RuleConfig::new("basic", json!({ "scores": [-1, -1, -1] }))]))
        .unwrap();

    for _ in 0..10 {
        assert_eq!(harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await, mark(1));
    }
    harness.stop().await;
}

#[tokio::test]
async fn test_rule_requested_drop() {
    let mut harness = Harness::start(1);
    harness
        .manager
        .set_config(config(
            2,
            vec![
                RuleConfig::new("counting", json!({ "drop": true })),
                RuleConfig::new("cacher", json!({})),
            ],
        ))
        .unwrap();

    assert_eq!(harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await, Verdict::Drop);
    assert_eq!(harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await, Verdict::Drop);

    let stats = harness.stop().await;
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.total_routed(), 0);
}

#[tokio::test]
async fn test_failing_rule_drops_packet() {
    let mut harness = Harness::start(1);
    harness
        .manager
        .set_config(config(
            2,
            vec![
                RuleConfig::new("basic", json!({ "scores": [10, 0] })),
                RuleConfig::new("counting", json!({ "fail": true })),
            ],
        ))
        .unwrap();

    assert_eq!(harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await, Verdict::Drop);

    let stats = harness.stop().await;
    assert_eq!(stats.rule_errors, 1);
    assert_eq!(stats.dropped, 0);
}

// ============================================================================
// Built-in Rules Together
// ============================================================================

#[tokio::test]
async fn test_online_avoids_failed_uplink() {
    let mut harness = Harness::start(3);
    harness.status.set_state(id(1), LinkState::Offline);
    harness
        .manager
        .set_config(config(
            2,
            vec![
                RuleConfig::new("basic", json!({ "scores": [50, 0] })),
                RuleConfig::new("online", json!(null)),
            ],
        ))
        .unwrap();

    for n in 0..50u8 {
        let verdict = harness.route(std::net::Ipv4Addr::new(10, 0, 1, n), ip("8.8.8.8")).await;
        assert_eq!(verdict, mark(2));
    }

    // Back online: the heavy weight wins again
    harness.status.set_online(id(1), true);
    let mut via_first = 0;
    for n in 0..50u8 {
        if harness.route(std::net::Ipv4Addr::new(10, 0, 2, n), ip("8.8.8.8")).await == mark(1) {
            via_first += 1;
        }
    }
    assert!(via_first > 40, "only {via_first} of 50 used uplink 1");
    harness.stop().await;
}

#[tokio::test]
async fn test_router_overrides_weights_for_its_sources() {
    let mut harness = Harness::start(5);
    harness
        .manager
        .set_config(config(
            3,
            vec![
                RuleConfig::new(
                    "router",
                    json!({ "routes": [
                        { "enabled": true, "sourceNetwork": "192.168.50.0/24", "uplinkID": 3 },
                        { "enabled": true, "sourceNetwork": "192.168.60.7", "uplinkID": 0 }
                    ]}),
                ),
                RuleConfig::new("basic", json!({ "scores": [100, 100, -1] })),
            ],
        ))
        .unwrap();

    // Routed source: uplink 3 despite basic favouring 1 and 2
    for n in 1..=20u8 {
        let verdict = harness.route(std::net::Ipv4Addr::new(192, 168, 50, n), ip("8.8.8.8")).await;
        assert_eq!(verdict, mark(3));
    }

    // Route to 0 leaves the weights alone; uplink 3 ends at zero
    for _ in 0..20 {
        let verdict = harness.route(ip("192.168.60.7"), ip("8.8.8.8")).await;
        assert_ne!(verdict, mark(3));
    }
    harness.stop().await;
}

#[tokio::test]
async fn test_affinity_keeps_host_pair_on_one_uplink() {
    let mut harness = Harness::start(11);
    harness
        .manager
        .set_config(config(
            4,
            vec![RuleConfig::new("cacher", json!({ "accessTimeout": 3600 }))],
        ))
        .unwrap();

    let first = harness.route(ip("10.0.0.5"), ip("93.184.216.34")).await;
    assert!(matches!(first, Verdict::Accept { mark: Some(_) }));
    for _ in 0..30 {
        assert_eq!(harness.route(ip("10.0.0.5"), ip("93.184.216.34")).await, first);
    }

    // Other pairs are still spread out
    let mut seen = std::collections::HashSet::new();
    for n in 0..64u8 {
        seen.insert(harness.route(std::net::Ipv4Addr::new(10, 0, 9, n), ip("93.184.216.34")).await);
    }
    assert!(seen.len() > 1);
    harness.stop().await;
}

#[tokio::test]
async fn test_affinity_alias_name() {
    let mut harness = Harness::start(2);
    harness
        .manager
        .set_config(config(2, vec![RuleConfig::new("affinity", json!({}))]))
        .unwrap();

    let first = harness.route(ip("10.0.0.8"), ip("1.0.0.1")).await;
    assert_eq!(harness.route(ip("10.0.0.8"), ip("1.0.0.1")).await, first);
    let stats = harness.stop().await;
    assert_eq!(stats.routed_via(id(1)) + stats.routed_via(id(2)), 2);
}
