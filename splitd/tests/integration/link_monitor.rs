//! Carrier changes reaching the packet path
//!
//! A fake `/sys/class/net` stands in for the kernel; the monitor writes what
//! it reads to the status board the `online` rule consults.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

use splitd::config::RuleConfig;
use splitd::manager::Manager;
use splitd::queue::channel_queue;
use splitd::reader::Reader;
use splitd::rules::RuleRegistry;
use splitd::uplink::{LinkMonitor, LinkState, LinkStatusBoard, StaticDiscovery};

use super::common::{config, id, ip, mark, Harness};

fn set_carrier(root: &Path, interface: &str, up: bool) {
    let dir = root.join(interface);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("carrier"), if up { "1\n" } else { "0\n" }).unwrap();
}

fn split_rules() -> Vec<RuleConfig> {
    vec![
        RuleConfig::new("basic", json!({ "scores": [50, 0] })),
        RuleConfig::new("online", json!(null)),
    ]
}

// ============================================================================
// Carrier Loss
// ============================================================================

#[tokio::test]
async fn test_carrier_loss_moves_traffic_off_uplink() {
    let sysfs = tempfile::tempdir().unwrap();
    set_carrier(sysfs.path(), "eth0", true);
    set_carrier(sysfs.path(), "eth1", true);

    let mut harness = Harness::start(11);
    harness.manager.set_config(config(2, split_rules())).unwrap();

    let monitor = LinkMonitor::with_root(sysfs.path());
    assert_eq!(monitor.check(&harness.manager, &harness.status).unwrap(), 2);
    assert_eq!(harness.status.state(id(1)), LinkState::Online);

    set_carrier(sysfs.path(), "eth0", false);
    assert_eq!(monitor.check(&harness.manager, &harness.status).unwrap(), 1);

    for n in 0..50u8 {
        let verdict = harness.route(std::net::Ipv4Addr::new(10, 0, 3, n), ip("1.1.1.1")).await;
        assert_eq!(verdict, mark(2));
    }

    // Carrier back: the heavy weight wins again
    set_carrier(sysfs.path(), "eth0", true);
    assert_eq!(monitor.check(&harness.manager, &harness.status).unwrap(), 1);
    let mut via_first = 0;
    for n in 0..50u8 {
        if harness.route(std::net::Ipv4Addr::new(10, 0, 4, n), ip("1.1.1.1")).await == mark(1) {
            via_first += 1;
        }
    }
    assert!(via_first > 40, "only {via_first} of 50 used uplink 1");
    harness.stop().await;
}

#[tokio::test]
async fn test_removed_interface_is_offline() {
    let sysfs = tempfile::tempdir().unwrap();
    set_carrier(sysfs.path(), "eth1", true);

    let mut harness = Harness::start(12);
    harness.manager.set_config(config(2, split_rules())).unwrap();

    // eth0 has no sysfs entry at all
    LinkMonitor::with_root(sysfs.path())
        .check(&harness.manager, &harness.status)
        .unwrap();
    assert_eq!(harness.status.state(id(1)), LinkState::Offline);
    assert_eq!(harness.route(ip("10.0.5.1"), ip("1.1.1.1")).await, mark(2));
    harness.stop().await;
}

// ============================================================================
// Background Task
// ============================================================================

#[tokio::test]
async fn test_monitor_task_tracks_carrier_and_stops_with_reader() {
    let sysfs = tempfile::tempdir().unwrap();
    set_carrier(sysfs.path(), "eth0", true);
    set_carrier(sysfs.path(), "eth1", true);

    let (queue, _feed) = channel_queue(8);
    let (reader, handle) = Reader::with_rng(queue, StdRng::seed_from_u64(1));
    let reader = reader.spawn();

    let status = Arc::new(LinkStatusBoard::new());
    let registry = Arc::new(RuleRegistry::with_builtin(Arc::clone(&status)));
    let manager = Arc::new(Manager::new(registry, Arc::new(StaticDiscovery::new()), handle));
    manager.set_config(config(2, split_rules())).unwrap();

    let task = tokio::spawn(LinkMonitor::with_root(sysfs.path()).run(
        Arc::clone(&manager),
        Arc::clone(&status),
        Duration::from_millis(10),
    ));

    set_carrier(sysfs.path(), "eth1", false);
    for _ in 0..200 {
        if status.state(id(2)) == LinkState::Offline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(status.state(id(1)), LinkState::Online);
    assert_eq!(status.state(id(2)), LinkState::Offline);

    manager.shutdown().unwrap();
    reader.await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("monitor kept running after the reader stopped")
        .unwrap();
}

#[tokio::test]
async fn test_zero_period_disables_monitor() {
    let (queue, _feed) = channel_queue(8);
    let (reader, handle) = Reader::with_rng(queue, StdRng::seed_from_u64(1));
    let reader = reader.spawn();

    let status = Arc::new(LinkStatusBoard::new());
    let registry = Arc::new(RuleRegistry::with_builtin(Arc::clone(&status)));
    let manager = Arc::new(Manager::new(registry, Arc::new(StaticDiscovery::new()), handle));

    // Returns without touching the board
    LinkMonitor::with_root("/nonexistent")
        .run(Arc::clone(&manager), Arc::clone(&status), Duration::ZERO)
        .await;
    assert_eq!(status.state(id(1)), LinkState::Unknown);

    manager.shutdown().unwrap();
    reader.await.unwrap();
}
