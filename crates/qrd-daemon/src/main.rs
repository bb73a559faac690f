//! qrd-daemon entry point.
//!
//! Loads config, picks the store and the push transport, then serves the
//! router from `routes.rs` until Ctrl+C or SIGTERM.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{anyhow, bail, Context};
use axum::http::{HeaderValue, Method};
use qrd_config::{
    report_unused_keys, resolve_secrets, ConfigSurface, DaemonSettings, LoadedConfig,
    ResolvedSecrets, StoreKind, UnusedKeyPolicy,
};
use qrd_daemon::{pipeline, routes, state};
use qrd_notify::{LogPushSender, PushSender, RelayPushSender};
use qrd_orders::{MemoryStore, OrderStore};
use qrd_schemas::MenuFixture;
use tokio::signal;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};

const ENV_CONFIG: &str = "QRD_CONFIG";
const ENV_DAEMON_ADDR: &str = "QRD_DAEMON_ADDR";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = load_config()?;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let report = report_unused_keys(
        ConfigSurface::Daemon,
        &loaded.config_json,
        UnusedKeyPolicy::Warn,
    )?;
    if !report.is_clean() {
        warn!(unused = ?report.unused_leaf_pointers, "config contains keys the daemon ignores");
    }

    let mut settings = DaemonSettings::from_config(&loaded.config_json)?;
    if let Some(addr) = bind_addr_from_env() {
        settings.bind_addr = addr;
    }
    let secrets = resolve_secrets(&loaded.config_json, settings.profile)?;

    let (store, pg) = build_store(&settings, &secrets).await?;
    let sender = build_sender(&settings, &secrets)?;

    let shared = Arc::new(state::AppState::new(store, sender, settings.clone()));

    state::spawn_heartbeat(shared.bus.clone(), settings.heartbeat_interval);
    if let Some(pg) = pg {
        pipeline::spawn_notice_relay(Arc::clone(&shared), pg);
    }

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors(&settings.cors_origins));

    info!(
        profile = settings.profile.as_str(),
        store = ?settings.store_kind,
        "qrd-daemon listening on http://{}",
        settings.bind_addr
    );

    axum::serve(tokio::net::TcpListener::bind(settings.bind_addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    info!("qrd-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Layered YAML from `QRD_CONFIG` (comma-separated, base first). Unset means
/// built-in defaults.
fn load_config() -> anyhow::Result<LoadedConfig> {
    match std::env::var(ENV_CONFIG) {
        Ok(raw) if !raw.trim().is_empty() => {
            let paths: Vec<&str> = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            qrd_config::load_layered_yaml(&paths)
        }
        _ => qrd_config::load_layered_yaml_from_strings(&[]),
    }
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var(ENV_DAEMON_ADDR).ok()?.parse().ok()
}

/// The store handlers use, plus the Postgres store again when there is one so
/// the notice relay can share its origin.
async fn build_store(
    settings: &DaemonSettings,
    secrets: &ResolvedSecrets,
) -> anyhow::Result<(Arc<dyn OrderStore>, Option<qrd_db::PgStore>)> {
    match settings.store_kind {
        StoreKind::Postgres => {
            let url = secrets.database_url.as_deref().ok_or_else(|| {
                anyhow!(
                    "store.kind=postgres but env var '{}' is not set",
                    secrets.database_url_env
                )
            })?;
            let pool = qrd_db::connect(url).await?;
            let st = qrd_db::status(&pool).await?;
            if !st.has_orders_table {
                bail!("database has no orders table; run `qrd db migrate` first");
            }
            if settings.fixture_path.is_some() {
                warn!("store.fixture_path is ignored for postgres; use `qrd seed`");
            }
            let pg = qrd_db::PgStore::new(pool);
            Ok((Arc::new(pg.clone()), Some(pg)))
        }
        StoreKind::Memory => {
            let store = match &settings.fixture_path {
                Some(path) => {
                    let raw = std::fs::read_to_string(path)
                        .with_context(|| format!("failed to read fixture: {path}"))?;
                    let fx: MenuFixture = serde_yaml::from_str(&raw)
                        .with_context(|| format!("invalid fixture yaml: {path}"))?;
                    info!(
                        accounts = fx.accounts.len(),
                        tables = fx.tables.len(),
                        products = fx.products.len(),
                        "memory store seeded"
                    );
                    MemoryStore::from_fixture(&fx)
                }
                None => {
                    warn!("memory store without fixture: no accounts exist");
                    MemoryStore::new()
                }
            };
            Ok((Arc::new(store), None))
        }
    }
}

fn build_sender(
    settings: &DaemonSettings,
    secrets: &ResolvedSecrets,
) -> anyhow::Result<Arc<dyn PushSender>> {
    match &settings.push_relay_url {
        Some(url) => {
            let sender = RelayPushSender::new(
                url.clone(),
                secrets.push_relay_token.clone(),
                settings.push_timeout,
            )?;
            info!(relay = %url, "push relay configured");
            Ok(Arc::new(sender))
        }
        None => {
            info!("no push relay configured; pushes are logged only");
            Ok(Arc::new(LogPushSender))
        }
    }
}

fn cors(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
