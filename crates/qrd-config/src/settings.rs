//! Typed view of the daemon's section of the effective config.
//!
//! Every pointer read here must be listed in
//! [`crate::consumed_pointers_for_surface`].

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use qrd_orders::CartLimits;
use serde_json::Value;

use crate::secrets::{read_str_at, Profile};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl StoreKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreKind::Postgres),
            "memory" | "mem" => Ok(StoreKind::Memory),
            other => bail!("CONFIG_INVALID /store/kind: '{}' (expected postgres | memory)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub profile: Profile,
    pub bind_addr: SocketAddr,
    pub cors_origins: Vec<String>,
    pub store_kind: StoreKind,
    /// Menu fixture loaded into the memory store at boot.
    pub fixture_path: Option<String>,
    pub bus_capacity: usize,
    pub heartbeat_interval: Duration,
    pub polling_max_limit: usize,
    pub cart: CartLimits,
    /// `None` means pushes are only logged.
    pub push_relay_url: Option<String>,
    pub push_timeout: Duration,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            profile: Profile::Dev,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            store_kind: StoreKind::Memory,
            fixture_path: None,
            bus_capacity: 1024,
            heartbeat_interval: Duration::from_secs(15),
            polling_max_limit: 500,
            cart: CartLimits::default(),
            push_relay_url: None,
            push_timeout: Duration::from_millis(5_000),
        }
    }
}

fn read_u64_at(config: &Value, pointer: &str) -> Result<Option<u64>> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .with_context(|| format!("CONFIG_INVALID {pointer}: expected a non-negative integer")),
    }
}

fn positive(pointer: &str, v: u64) -> Result<u64> {
    if v == 0 {
        bail!("CONFIG_INVALID {pointer}: must be > 0");
    }
    Ok(v)
}

impl DaemonSettings {
    pub fn from_config(config_json: &Value) -> Result<Self> {
        let mut s = Self {
            profile: Profile::from_config(config_json)?,
            ..Self::default()
        };

        if let Some(addr) = read_str_at(config_json, "/server/bind_addr") {
            s.bind_addr = addr
                .parse()
                .with_context(|| format!("CONFIG_INVALID /server/bind_addr: '{addr}'"))?;
        }

        if let Some(v) = config_json.pointer("/server/cors_origins") {
            let arr = v
                .as_array()
                .context("CONFIG_INVALID /server/cors_origins: expected a list")?;
            s.cors_origins = arr
                .iter()
                .filter_map(|o| o.as_str().map(|x| x.trim().to_string()))
                .filter(|o| !o.is_empty())
                .collect();
        }

        if let Some(kind) = read_str_at(config_json, "/store/kind") {
            s.store_kind = StoreKind::parse(&kind)?;
        }
        s.fixture_path = read_str_at(config_json, "/store/fixture_path");

        if let Some(v) = read_u64_at(config_json, "/stream/bus_capacity")? {
            s.bus_capacity = positive("/stream/bus_capacity", v)? as usize;
        }
        if let Some(v) = read_u64_at(config_json, "/stream/heartbeat_secs")? {
            s.heartbeat_interval = Duration::from_secs(positive("/stream/heartbeat_secs", v)?);
        }
        if let Some(v) = read_u64_at(config_json, "/polling/max_limit")? {
            s.polling_max_limit = positive("/polling/max_limit", v)? as usize;
        }
        if let Some(v) = read_u64_at(config_json, "/cart/max_line_quantity")? {
            let v = positive("/cart/max_line_quantity", v)?;
            s.cart.max_line_quantity = u32::try_from(v)
                .context("CONFIG_INVALID /cart/max_line_quantity: out of range")?;
        }
        if let Some(v) = read_u64_at(config_json, "/cart/max_lines")? {
            s.cart.max_lines = positive("/cart/max_lines", v)? as usize;
        }

        s.push_relay_url = read_str_at(config_json, "/push/relay_url");
        if let Some(v) = read_u64_at(config_json, "/push/timeout_ms")? {
            s.push_timeout = Duration::from_millis(positive("/push/timeout_ms", v)?);
        }

        if s.profile == Profile::Production && s.store_kind == StoreKind::Memory {
            bail!("CONFIG_INVALID: profile=production requires /store/kind = postgres");
        }

        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_config_yields_defaults() {
        let s = DaemonSettings::from_config(&json!({})).unwrap();
        assert_eq!(s.store_kind, StoreKind::Memory);
        assert_eq!(s.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(s.cart, CartLimits::default());
        assert!(s.push_relay_url.is_none());
    }

    #[test]
    fn reads_every_section() {
        let cfg = json!({
            "profile": "production",
            "server": {"bind_addr": "0.0.0.0:9000", "cors_origins": ["https://menu.example"]},
            "store": {"kind": "postgres"},
            "stream": {"bus_capacity": 64, "heartbeat_secs": 5},
            "polling": {"max_limit": 50},
            "cart": {"max_line_quantity": 10, "max_lines": 5},
            "push": {"relay_url": "http://relay:8080/send", "timeout_ms": 750}
        });
        let s = DaemonSettings::from_config(&cfg).unwrap();
        assert_eq!(s.profile, Profile::Production);
        assert_eq!(s.bind_addr.port(), 9000);
        assert_eq!(s.cors_origins, vec!["https://menu.example".to_string()]);
        assert_eq!(s.store_kind, StoreKind::Postgres);
        assert_eq!(s.bus_capacity, 64);
        assert_eq!(s.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(s.polling_max_limit, 50);
        assert_eq!(s.cart.max_line_quantity, 10);
        assert_eq!(s.cart.max_lines, 5);
        assert_eq!(s.push_timeout, Duration::from_millis(750));
    }

    #[test]
    fn rejects_zero_and_bad_values() {
        assert!(DaemonSettings::from_config(&json!({"stream": {"heartbeat_secs": 0}})).is_err());
        assert!(DaemonSettings::from_config(&json!({"server": {"bind_addr": "nope"}})).is_err());
        assert!(DaemonSettings::from_config(&json!({"store": {"kind": "redis"}})).is_err());
        assert!(DaemonSettings::from_config(&json!({"polling": {"max_limit": "ten"}})).is_err());
    }

    #[test]
    fn production_refuses_memory_store() {
        let err = DaemonSettings::from_config(&json!({"profile": "production"})).unwrap_err();
        assert!(err.to_string().contains("requires /store/kind"));
    }
}
