//! Propagation of stored order changes.
//!
//! After the store has accepted a change, [`publish`] fans it out twice:
//! onto the SSE bus (synchronously; no subscribers is fine) and into a
//! spawned push dispatch for the order's new status. The dispatcher's claim
//! makes duplicate dispatches harmless.
//!
//! With the Postgres store, changes committed by other processes arrive as
//! [`OrderNotice`]s and go through the same [`publish`] via
//! [`spawn_notice_relay`].

use std::sync::Arc;
use std::time::Duration;

use qrd_db::{OrderNotice, OrderNoticeListener, PgStore, ORDER_EVENTS_CHANNEL};
use qrd_schemas::{Order, OrderEvent};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::state::{AppState, BusMsg};

const RELAY_RETRY: Duration = Duration::from_secs(2);

pub fn publish(state: &AppState, event: OrderEvent) -> JoinHandle<()> {
    let order = event.order().clone();
    let status = event.status();

    match state.bus.send(BusMsg::Order(event)) {
        Ok(n) => debug!(order_id = %order.order_id, receivers = n, "order event published"),
        Err(_) => debug!(order_id = %order.order_id, "order event published (no receivers)"),
    }

    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        if let Err(e) = dispatcher.dispatch(&order, status).await {
            error!(
                order_id = %order.order_id,
                status = %status,
                error = %e,
                "push dispatch failed"
            );
        }
    })
}

/// Event for a notice, given the order as reloaded after it arrived.
///
/// `None` when the order has already moved past the noticed status; the
/// notice for the newer status follows.
pub fn event_for_notice(notice: &OrderNotice, order: Order) -> Option<OrderEvent> {
    if order.status != notice.status {
        return None;
    }
    Some(match notice.previous {
        None => OrderEvent::Created { order },
        Some(previous) => OrderEvent::StatusChanged { order, previous },
    })
}

/// Republish changes other processes commit to `store`'s database. Notices
/// stamped with `store`'s own origin were already published by the handler
/// that made the change and are skipped.
pub fn spawn_notice_relay(state: Arc<AppState>, store: PgStore) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = relay_notices(&state, &store).await {
                warn!(error = %e, "order notice relay failed; reconnecting");
            }
            tokio::time::sleep(RELAY_RETRY).await;
        }
    })
}

async fn relay_notices(state: &AppState, store: &PgStore) -> anyhow::Result<()> {
    let mut listener = OrderNoticeListener::connect(store.pool()).await?;
    info!(channel = ORDER_EVENTS_CHANNEL, origin = %store.origin(), "relaying order notices");

    loop {
        let notice = listener.recv().await?;
        if notice.origin == store.origin() {
            continue;
        }
        let Some(order) = state.store().order(notice.order_id).await? else {
            warn!(order_id = %notice.order_id, "notice for unknown order");
            continue;
        };
        match event_for_notice(&notice, order) {
            Some(event) => {
                debug!(order_id = %notice.order_id, status = %notice.status, "relaying remote change");
                publish(state, event);
            }
            None => debug!(order_id = %notice.order_id, status = %notice.status, "stale notice"),
        }
    }
}
