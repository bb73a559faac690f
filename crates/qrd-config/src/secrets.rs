//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"QRD_DATABASE_URL"`).
//! - At startup, callers invoke [`resolve_secrets`] once and pass the result
//!   into constructors; `std::env::var` is not called elsewhere for secrets.
//! - `Debug` impls **redact** values.
//! - Error messages reference the env var **NAME**, never the value.
//!
//! # Profile enforcement
//! - `production`: database URL is **required**.
//! - `dev`: nothing required.
//!
//! The push relay token is optional in every profile; a relay without auth is
//! allowed (e.g. a sidecar on localhost).

use anyhow::{bail, Result};
use serde_json::Value;

pub const DEFAULT_DATABASE_URL_ENV: &str = "QRD_DATABASE_URL";
pub const DEFAULT_PUSH_TOKEN_ENV: &str = "QRD_PUSH_RELAY_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Dev,
    Production,
}

impl Profile {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Profile::Dev),
            "prod" | "production" => Ok(Profile::Production),
            other => bail!(
                "CONFIG_UNKNOWN_PROFILE: unrecognised profile '{}'; expected dev | production",
                other
            ),
        }
    }

    /// `/profile` from the config, defaulting to `dev`.
    pub fn from_config(config_json: &Value) -> Result<Self> {
        match read_str_at(config_json, "/profile") {
            Some(p) => Self::parse(&p),
            None => Ok(Profile::Dev),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Dev => "dev",
            Profile::Production => "production",
        }
    }
}

/// All runtime-resolved secrets. **Values are redacted in `Debug` output.**
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Postgres connection URL. `None` if the named env var was absent or empty.
    pub database_url: Option<String>,
    /// Name of the env var the URL was read from (for error messages).
    pub database_url_env: String,
    /// Bearer token for the push relay.
    pub push_relay_token: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "<REDACTED>"),
            )
            .field("database_url_env", &self.database_url_env)
            .field(
                "push_relay_token",
                &self.push_relay_token.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Read a non-empty string value at `pointer` from a JSON config.
pub(crate) fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Returns `None` if the variable is unset or blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve all secrets from the environment for `profile`.
///
/// # Errors
/// Returns `Err` naming the **env var** of the first missing required value.
pub fn resolve_secrets(config_json: &Value, profile: Profile) -> Result<ResolvedSecrets> {
    let database_url_env = read_str_at(config_json, "/store/database_url_env")
        .unwrap_or_else(|| DEFAULT_DATABASE_URL_ENV.to_string());
    let push_token_env = read_str_at(config_json, "/push/relay_token_env")
        .unwrap_or_else(|| DEFAULT_PUSH_TOKEN_ENV.to_string());

    let database_url = resolve_env(&database_url_env);
    let push_relay_token = resolve_env(&push_token_env);

    if profile == Profile::Production && database_url.is_none() {
        bail!(
            "SECRETS_MISSING profile=production: required env var '{}' \
             (database url) is not set or empty",
            database_url_env,
        );
    }

    Ok(ResolvedSecrets {
        database_url,
        database_url_env,
        push_relay_token,
    })
}
