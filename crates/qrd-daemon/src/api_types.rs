//! Request and response types for all qrd-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests.  No business logic lives here.

use qrd_schemas::{Order, OrderStatus, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    /// Stable machine-readable code, e.g. "illegal_transition".
    pub code: String,
    /// Set on `active_order_exists` so the client can follow the open order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_order_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderResponse {
    pub order: Order,
    /// Presented back as `x-qrd-customer-token` by the ordering browser.
    pub customer_token: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveOrderResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    /// Only for callers allowed to see the order itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetStatusResponse {
    pub order: Order,
    pub previous: OrderStatus,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionsResponse {
    pub order_id: Uuid,
    pub current: OrderStatus,
    pub allowed: Vec<OrderStatus>,
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOrdersQuery {
    /// Comma-separated statuses; absent means all.
    pub status: Option<String>,
    /// Coarse start: only orders updated strictly after this many ms since
    /// the epoch. Follow `next_cursor` for subsequent pages.
    pub since_ms: Option<i64>,
    /// Opaque keyset cursor from a previous `next_cursor`.
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOrdersResponse {
    pub orders: Vec<Order>,
    /// Pass back as `cursor`. Position of the last order in the page, or
    /// the request's cursor when the page is empty.
    pub next_cursor: Option<String>,
    /// Max `updated_at` of the page in ms. Informational; not a safe resume
    /// point when several orders share one millisecond.
    pub next_since_ms: Option<i64>,
}

// ---------------------------------------------------------------------------
// Push subscriptions
// ---------------------------------------------------------------------------

/// Exactly one of `role` (staff device) or `order_id` (customer device).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub endpoint: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub order_id: Option<Uuid>,
}
