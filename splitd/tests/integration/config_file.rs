//! Configuration files applied through the manager

use std::io::Write;

use tempfile::NamedTempFile;

use splitd::config::{load_config, save_config, Config};

use super::common::{ip, mark, Harness};

const SPLIT_CONFIG: &str = r#"{
    "enabled": true,
    "logIntervalSeconds": 0,
    "uplinks": [
        { "osName": "eth0", "externalID": 1 },
        { "osName": "ppp0", "externalID": 2 }
    ],
    "rules": [
        { "ruleName": "online" },
        { "ruleName": "router", "params": { "routes": [
            { "enabled": true, "sourceNetwork": "172.16.0.0/12", "uplinkID": 2 }
        ]}},
        { "ruleName": "basic", "params": { "scores": [20, 0] } }
    ]
}"#;

#[tokio::test]
async fn test_file_config_end_to_end() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(SPLIT_CONFIG.as_bytes()).unwrap();
    let config = load_config(file.path()).unwrap();

    let mut harness = Harness::start(9);
    harness.manager.set_config(config).unwrap();
    assert_eq!(harness.manager.running_rules().len(), 3);

    for _ in 0..10 {
        assert_eq!(harness.route(ip("172.20.1.1"), ip("8.8.8.8")).await, mark(2));
    }
    harness.stop().await;
}

#[tokio::test]
async fn test_legacy_keys_apply_like_current_ones() {
    let legacy = r#"{
        "log_interval": 30,
        "uplinks": [{ "os_name": "eth0", "alpaca_interface_id": 1 }],
        "splitters": [{ "splitter_name": "basic", "params": { "distribution": [4] } }]
    }"#;
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(legacy.as_bytes()).unwrap();
    let config = load_config(file.path()).unwrap();
    assert_eq!(config.log_interval_seconds, 30);

    let mut harness = Harness::start(1);
    harness.manager.set_config(config).unwrap();
    assert_eq!(harness.route(ip("10.0.0.1"), ip("8.8.8.8")).await, mark(1));
    harness.stop().await;
}

#[tokio::test]
async fn test_saved_config_reapplies_without_restarting_rules() {
    let original: Config = serde_json::from_str(SPLIT_CONFIG).unwrap();
    let file = NamedTempFile::new().unwrap();
    save_config(file.path(), &original).unwrap();

    let harness = Harness::start(1);
    harness.manager.set_config(original).unwrap();
    let before = harness.manager.running_rules();

    // Reloading an unchanged file keeps every instance
    harness.manager.set_config(load_config(file.path()).unwrap()).unwrap();
    assert_eq!(harness.manager.running_rules(), before);
    harness.stop().await;
}
