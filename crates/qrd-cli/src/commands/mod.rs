//! Command handler modules for qrd-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod order;
pub mod seed;

use anyhow::{Context, Result};
use qrd_config::{report_unused_keys, ConfigSurface, LoadedConfig, UnusedKeyPolicy};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Load layered config for the CLI surface. No paths means built-in defaults.
pub fn load_cli_config(paths: &[String]) -> Result<LoadedConfig> {
    let loaded = if paths.is_empty() {
        qrd_config::load_layered_yaml_from_strings(&[])?
    } else {
        let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
        qrd_config::load_layered_yaml(&path_refs)?
    };

    let report = report_unused_keys(ConfigSurface::Cli, &loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !report.is_clean() {
        eprintln!(
            "WARN: CONFIG_UNUSED_KEYS surface=CLI unused_leaf_keys={}",
            report.unused_leaf_pointers.len()
        );
        for p in report.unused_leaf_pointers.iter().take(50) {
            eprintln!("  unused={}", p);
        }
    }
    Ok(loaded)
}

pub fn parse_order_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).context("invalid order_id uuid")
}
