//! Cross-process change notices over Postgres `LISTEN/NOTIFY`.
//!
//! Every order write in [`crate::PgStore`] sends one notice on
//! [`ORDER_EVENTS_CHANNEL`] inside the writing transaction, so it is delivered
//! only if the change commits. A daemon listens and republishes changes made
//! by other processes (the operator CLI, other daemon replicas) on its own
//! event bus.

use anyhow::{Context, Result};
use qrd_schemas::OrderStatus;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

pub const ORDER_EVENTS_CHANNEL: &str = "qrd_order_events";

/// Payload of one notice. Carries ids only; listeners reload the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNotice {
    /// Id of the store instance that made the change.
    pub origin: Uuid,
    pub order_id: Uuid,
    pub status: OrderStatus,
    /// `None` for a newly placed order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<OrderStatus>,
}

impl OrderNotice {
    pub fn to_payload(&self) -> Result<String> {
        serde_json::to_string(self).context("encode order notice failed")
    }

    pub fn from_payload(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).with_context(|| format!("invalid order notice: {raw}"))
    }
}

pub struct OrderNoticeListener {
    listener: PgListener,
}

impl OrderNoticeListener {
    pub async fn connect(pool: &PgPool) -> Result<Self> {
        let mut listener = PgListener::connect_with(pool)
            .await
            .context("order notice listener connect failed")?;
        listener
            .listen(ORDER_EVENTS_CHANNEL)
            .await
            .context("LISTEN qrd_order_events failed")?;
        Ok(Self { listener })
    }

    /// Next well-formed notice. Malformed payloads are logged and skipped.
    ///
    /// If the connection drops, sqlx reconnects and re-listens; notices sent
    /// while disconnected are lost.
    pub async fn recv(&mut self) -> Result<OrderNotice> {
        loop {
            let n = self
                .listener
                .recv()
                .await
                .context("order notice receive failed")?;
            match OrderNotice::from_payload(n.payload()) {
                Ok(notice) => return Ok(notice),
                Err(e) => warn!(error = %e, "skipping order notice"),
            }
        }
    }
}
