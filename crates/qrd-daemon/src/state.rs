//! Shared runtime state for qrd-daemon.
//!
//! One `AppState` per process, handed to handlers as `State<Arc<AppState>>`.
//! It carries the order service, the push dispatcher over the same store, and
//! the broadcast bus that feeds every open SSE stream.

use std::sync::Arc;
use std::time::Duration;

use qrd_config::DaemonSettings;
use qrd_notify::{Dispatcher, PushSender};
use qrd_orders::{OrderService, OrderStore};
use qrd_schemas::OrderEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// One bus message per stored order change, plus periodic heartbeats.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Order(OrderEvent),
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Handle shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Order events for SSE subscribers; sends never block.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub service: OrderService,
    /// Push fan-out, spawned after every stored change.
    pub dispatcher: Dispatcher,
    pub settings: DaemonSettings,
}

impl AppState {
    pub fn new(
        store: Arc<dyn OrderStore>,
        sender: Arc<dyn PushSender>,
        settings: DaemonSettings,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(settings.bus_capacity.max(1));

        Self {
            bus,
            build: BuildInfo {
                service: "qrd-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            service: OrderService::new(Arc::clone(&store), settings.cart),
            dispatcher: Dispatcher::new(store, sender),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        self.service.store()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
