//! Live reconfiguration: instance reuse, retirement and failed updates

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;

use splitd::config::RuleConfig;
use splitd::error::ManagerError;
use splitd::queue::Verdict;

use super::common::{config, ip, mark, Harness};

/// Give the reader a turn to adopt what was published
async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Instance Reuse
// ============================================================================

#[tokio::test]
async fn test_unchanged_rule_keeps_instance() {
    let mut harness = Harness::start(1);
    let counting = RuleConfig::new("counting", json!({ "tag": "a" }));

    harness
        .manager
        .set_config(config(2, vec![counting.clone()]))
        .unwrap();
    let before = harness.manager.running_rules();

    harness
        .manager
        .set_config(config(
            2,
            vec![RuleConfig::new("basic", json!({ "scores": [1, 1] })), counting.clone()],
        ))
        .unwrap();
    let after = harness.manager.running_rules();

    assert_eq!(harness.counting.inits.load(Ordering::SeqCst), 1);
    assert_eq!(after.len(), 2);
    assert_eq!(after[1].id, before[0].id);
    assert_eq!(after[1].config, counting);

    harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await;
    assert_eq!(harness.counting.destroys.load(Ordering::SeqCst), 0);
    harness.stop().await;
}

#[tokio::test]
async fn test_affinity_state_survives_reconfiguration() {
    let mut harness = Harness::start(21);
    let cacher = RuleConfig::new("cacher", json!({ "accessTimeout": 3600 }));
    harness
        .manager
        .set_config(config(2, vec![cacher.clone()]))
        .unwrap();

    let pinned = harness.route(ip("10.1.1.1"), ip("93.184.216.34")).await;
    let other = if pinned == mark(1) { [0, 100] } else { [100, 0] };

    // Same cacher, new basic rule pulling hard the other way
    harness
        .manager
        .set_config(config(
            2,
            vec![cacher, RuleConfig::new("basic", json!({ "scores": other }))],
        ))
        .unwrap();

    for _ in 0..25 {
        assert_eq!(harness.route(ip("10.1.1.1"), ip("93.184.216.34")).await, pinned);
    }
    harness.stop().await;
}

#[tokio::test]
async fn test_changed_params_start_fresh_instance() {
    let mut harness = Harness::start(1);
    harness
        .manager
        .set_config(config(2, vec![RuleConfig::new("counting", json!({ "tag": "a" }))]))
        .unwrap();
    harness
        .manager
        .set_config(config(2, vec![RuleConfig::new("counting", json!({ "tag": "b" }))]))
        .unwrap();

    // The retired instance is destroyed once the reader adopts the new chain
    harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await;
    assert_eq!(harness.counting.inits.load(Ordering::SeqCst), 2);
    assert_eq!(harness.counting.destroys.load(Ordering::SeqCst), 1);
    harness.stop().await;
}

#[tokio::test]
async fn test_duplicate_rules_get_separate_instances() {
    let mut harness = Harness::start(1);
    let counting = RuleConfig::new("counting", json!(null));
    harness
        .manager
        .set_config(config(2, vec![counting.clone(), counting.clone()]))
        .unwrap();
    harness
        .manager
        .set_config(config(2, vec![counting.clone()]))
        .unwrap();

    harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await;
    assert_eq!(harness.counting.inits.load(Ordering::SeqCst), 2);
    assert_eq!(harness.counting.destroys.load(Ordering::SeqCst), 1);
    assert_eq!(harness.manager.running_rules().len(), 1);
    harness.stop().await;
}

// ============================================================================
// Failed Updates
// ============================================================================

#[tokio::test]
async fn test_invalid_rule_params_keep_previous_config() {
    let mut harness = Harness::start(1);
    harness
        .manager
        .set_config(config(2, vec![RuleConfig::new("basic", json!({ "scores": [-1, 0] }))]))
        .unwrap();

    let result = harness.manager.set_config(config(
        2,
        vec![
            RuleConfig::new("counting", json!(null)),
            RuleConfig::new("router", json!({ "routes": [{ "sourceNetwork": "not-an-address", "uplinkID": 1 }] })),
        ],
    ));
    assert!(matches!(result, Err(ManagerError::Rule(_))));

    // The instance started for the failed update never reaches the reader
    assert_eq!(harness.counting.inits.load(Ordering::SeqCst), 1);
    assert_eq!(harness.counting.destroys.load(Ordering::SeqCst), 1);
    assert_eq!(harness.manager.running_rules()[0].config.rule_name, "basic");
    assert_eq!(harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await, mark(2));
    harness.stop().await;
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let harness = Harness::start(1);
    let mut cfg = config(2, Vec::new());
    cfg.uplinks[1].external_id = 1;

    let result = harness.manager.set_config(cfg);
    assert!(matches!(result, Err(ManagerError::Config(_))));
    assert!(harness.manager.config().uplinks.is_empty());
    harness.stop().await;
}

#[tokio::test]
async fn test_unknown_rule_skipped() {
    let mut harness = Harness::start(1);
    harness
        .manager
        .set_config(config(
            2,
            vec![
                RuleConfig::new("no-such-rule", json!({})),
                RuleConfig::new("basic", json!({ "scores": [0, -1] })),
            ],
        ))
        .unwrap();

    assert_eq!(harness.manager.running_rules().len(), 1);
    assert_eq!(harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await, mark(1));
    harness.stop().await;
}

// ============================================================================
// Hand-off
// ============================================================================

#[tokio::test]
async fn test_set_config_does_not_wait_for_reader() {
    let mut harness = Harness::start(1);
    harness.manager.set_config(config(1, Vec::new())).unwrap();

    // Hold a packet in flight so the reader is busy answering it
    let first = harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await;
    assert_eq!(first, mark(1));

    // Many updates in a row return immediately; only the last one matters
    tokio::time::timeout(Duration::from_secs(1), async {
        for n in 0..50u8 {
            let score = if n % 2 == 0 { [0, -1] } else { [-1, 0] };
            harness
                .manager
                .set_config(config(2, vec![RuleConfig::new("basic", json!({ "scores": score }))]))
                .unwrap();
        }
    })
    .await
    .unwrap();

    settle().await;
    assert_eq!(harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await, mark(2));

    let stats = harness.stop().await;
    assert_eq!(stats.chains, 51);
}

#[tokio::test]
async fn test_refresh_uplinks_without_changes() {
    let mut harness = Harness::start(1);
    harness.manager.set_config(config(2, Vec::new())).unwrap();
    assert_eq!(harness.manager.refresh_uplinks().unwrap(), 0);

    harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await;
    let stats = harness.stop().await;
    assert_eq!(stats.chains, 1);
}

#[tokio::test]
async fn test_disable_then_enable() {
    let mut harness = Harness::start(1);
    let rules = vec![RuleConfig::new("counting", json!(null))];
    harness.manager.set_config(config(2, rules.clone())).unwrap();

    let mut off = config(2, rules.clone());
    off.enabled = false;
    harness.manager.set_config(off).unwrap();
    assert!(harness.manager.running_rules().is_empty());
    assert_eq!(
        harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await,
        Verdict::Accept { mark: None }
    );
    assert_eq!(harness.counting.destroys.load(Ordering::SeqCst), 1);

    harness.manager.set_config(config(2, rules)).unwrap();
    assert_eq!(harness.counting.inits.load(Ordering::SeqCst), 2);
    harness.stop().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_destroys_active_rules() {
    let mut harness = Harness::start(1);
    harness
        .manager
        .set_config(config(2, vec![RuleConfig::new("counting", json!(null))]))
        .unwrap();
    harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await;

    let destroys = std::sync::Arc::clone(&harness.counting.destroys);
    let stats = harness.stop().await;
    assert_eq!(stats.packets, 1);
    assert_eq!(destroys.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_set_config_after_shutdown_fails() {
    let harness = Harness::start(1);
    harness.manager.shutdown().unwrap();
    // Wait for the reader to exit
    let manager = harness.manager;
    harness.reader.await.unwrap();

    let result = manager.set_config(config(1, Vec::new()));
    assert!(matches!(result, Err(ManagerError::Publish(_))));
}
