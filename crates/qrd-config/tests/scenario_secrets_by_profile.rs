//! Secret resolution per profile.
//!
//! Each test points the config at its own env var name so tests can run in
//! parallel without sharing process env state.

use qrd_config::{load_layered_yaml_from_strings, resolve_secrets, DaemonSettings, Profile};

fn config_naming(db_env: &str, extra: &str) -> serde_json::Value {
    let yaml = format!("store:\n  database_url_env: {db_env}\n{extra}");
    load_layered_yaml_from_strings(&[yaml.as_str()])
        .unwrap()
        .config_json
}

#[test]
fn dev_profile_tolerates_missing_database_url() {
    let cfg = config_naming("QRD_TEST_DB_URL_DEV_UNSET", "");
    let s = resolve_secrets(&cfg, Profile::Dev).unwrap();
    assert!(s.database_url.is_none());
    assert_eq!(s.database_url_env, "QRD_TEST_DB_URL_DEV_UNSET");
}

#[test]
fn production_requires_database_url_and_names_the_var() {
    let cfg = config_naming("QRD_TEST_DB_URL_PROD_UNSET", "");
    let err = resolve_secrets(&cfg, Profile::Production).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("SECRETS_MISSING"));
    assert!(msg.contains("QRD_TEST_DB_URL_PROD_UNSET"));
}

#[test]
fn resolved_url_is_redacted_in_debug() {
    std::env::set_var("QRD_TEST_DB_URL_SET", "postgres://user:pw@localhost/qrd");
    let cfg = config_naming("QRD_TEST_DB_URL_SET", "");
    let s = resolve_secrets(&cfg, Profile::Production).unwrap();

    assert_eq!(s.database_url.as_deref(), Some("postgres://user:pw@localhost/qrd"));
    let dbg = format!("{s:?}");
    assert!(dbg.contains("<REDACTED>"));
    assert!(!dbg.contains("pw@localhost"));
}

#[test]
fn production_profile_refuses_memory_store() {
    let cfg = config_naming("QRD_TEST_DB_URL_UNUSED", "profile: production\n");
    // `store.kind` defaults to memory.
    let err = DaemonSettings::from_config(&cfg).unwrap_err();
    assert!(err.to_string().contains("requires /store/kind = postgres"));
}
