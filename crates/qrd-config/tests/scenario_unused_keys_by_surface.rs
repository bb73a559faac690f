//! Layered files and the per-surface unused-key registry.
//!
//! # Invariants under test
//!
//! 1. Layers load from disk in order; later files win.
//! 2. Keys the daemon reads are not flagged for the daemon surface.
//! 3. Daemon-only keys are flagged for the CLI surface, and `Fail` refuses them.
//! 4. Settings built from the merged layers reflect the overlay.

use std::io::Write;

use qrd_config::{
    load_layered_yaml, report_unused_keys, ConfigSurface, DaemonSettings, StoreKind,
    UnusedKeyPolicy,
};

const BASE_YAML: &str = r#"
profile: dev
server:
  bind_addr: "127.0.0.1:9000"
store:
  kind: memory
  fixture_path: "fixtures/bistro.yaml"
stream:
  heartbeat_secs: 15
cart:
  max_lines: 30
"#;

const OVERLAY_YAML: &str = r#"
store:
  kind: postgres
stream:
  heartbeat_secs: 5
typo_section:
  heartbaet_secs: 1
"#;

fn write_layer(body: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(body.as_bytes()).unwrap();
    f
}

fn load_both() -> qrd_config::LoadedConfig {
    let base = write_layer(BASE_YAML);
    let overlay = write_layer(OVERLAY_YAML);
    load_layered_yaml(&[
        base.path().to_str().unwrap(),
        overlay.path().to_str().unwrap(),
    ])
    .expect("layers must load")
}

#[test]
fn later_layers_override_earlier_ones() {
    let loaded = load_both();
    assert_eq!(loaded.config_json["stream"]["heartbeat_secs"], 5);
    assert_eq!(loaded.config_json["store"]["kind"], "postgres");
    // Untouched base keys survive the merge.
    assert_eq!(loaded.config_json["cart"]["max_lines"], 30);
}

#[test]
fn daemon_surface_flags_only_unknown_keys() {
    let loaded = load_both();
    let report = report_unused_keys(ConfigSurface::Daemon, &loaded.config_json, UnusedKeyPolicy::Warn)
        .expect("warn mode must not error");

    assert_eq!(
        report.unused_leaf_pointers,
        vec!["/typo_section/heartbaet_secs".to_string()]
    );
}

#[test]
fn cli_surface_flags_daemon_only_keys_and_fail_refuses() {
    let loaded = load_both();
    let report = report_unused_keys(ConfigSurface::Cli, &loaded.config_json, UnusedKeyPolicy::Warn)
        .unwrap();

    for p in ["/server/bind_addr", "/store/fixture_path", "/stream/heartbeat_secs"] {
        assert!(
            report.unused_leaf_pointers.contains(&p.to_string()),
            "{p} should be unused for the CLI"
        );
    }
    assert!(!report.unused_leaf_pointers.contains(&"/cart/max_lines".to_string()));

    let err = report_unused_keys(ConfigSurface::Cli, &loaded.config_json, UnusedKeyPolicy::Fail)
        .unwrap_err();
    assert!(err.to_string().contains("CONFIG_UNUSED_KEYS"));
}

#[test]
fn settings_follow_the_merged_layers() {
    let loaded = load_both();
    let s = DaemonSettings::from_config(&loaded.config_json).unwrap();

    assert_eq!(s.store_kind, StoreKind::Postgres);
    assert_eq!(s.heartbeat_interval.as_secs(), 5);
    assert_eq!(s.cart.max_lines, 30);
    assert_eq!(s.bind_addr.port(), 9000);
}

#[test]
fn missing_layer_file_names_the_path() {
    let err = load_layered_yaml(&["/nonexistent/qrd/base.yaml"]).unwrap_err();
    assert!(format!("{err:#}").contains("/nonexistent/qrd/base.yaml"));
}
