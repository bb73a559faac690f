//! Exactly-once push fan-out per (order, status).
//!
//! # Invariants
//!
//! - A status is claimed through [`OrderStore::claim_notification`] before
//!   anything is sent. Only the claim winner sends; every other caller gets
//!   `already_sent = true` and sends nothing.
//! - After a successful claim, each subscription gets at most one attempt.
//!   Failures are logged and counted, never retried.
//! - Subscriptions the transport reports as gone are removed.
//! - Once claimed, store errors while fanning out (listing an audience,
//!   pruning) are counted as failures; the remaining audiences still get
//!   their attempt.

use std::sync::Arc;

use anyhow::Result;
use qrd_orders::OrderStore;
use qrd_schemas::{Order, OrderStatus};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::message::{audiences_for, PushMessage};
use crate::sender::{Delivery, PushSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub already_sent: bool,
    pub delivered: usize,
    pub pruned: usize,
    /// Failed sends, unlistable audiences and failed prunes.
    pub failed: usize,
}

impl DispatchReport {
    fn skipped(order_id: Uuid, status: OrderStatus) -> Self {
        Self {
            order_id,
            status,
            already_sent: true,
            delivered: 0,
            pruned: 0,
            failed: 0,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn OrderStore>,
    sender: Arc<dyn PushSender>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn OrderStore>, sender: Arc<dyn PushSender>) -> Self {
        Self { store, sender }
    }

    /// Notify every audience of `status` for `order`, once.
    pub async fn dispatch(&self, order: &Order, status: OrderStatus) -> Result<DispatchReport> {
        if !self.store.claim_notification(order.order_id, status).await? {
            debug!(order_id = %order.order_id, status = %status, "push already sent");
            return Ok(DispatchReport::skipped(order.order_id, status));
        }

        let mut report = DispatchReport {
            order_id: order.order_id,
            status,
            already_sent: false,
            delivered: 0,
            pruned: 0,
            failed: 0,
        };

        for audience in audiences_for(status, order.order_id) {
            let subs = match self
                .store
                .subscriptions_for(&order.account_id, &audience)
                .await
            {
                Ok(subs) => subs,
                Err(e) => {
                    warn!(
                        order_id = %order.order_id,
                        audience = ?audience,
                        error = %e,
                        "listing push subscriptions failed"
                    );
                    report.failed += 1;
                    continue;
                }
            };
            if subs.is_empty() {
                continue;
            }

            let message = PushMessage::for_audience(order, status, &audience);
            for sub in subs {
                match self.sender.send(&sub, &message).await {
                    Ok(Delivery::Delivered) => report.delivered += 1,
                    Ok(Delivery::Gone) => {
                        match self.store.remove_subscription(sub.subscription_id).await {
                            Ok(_) => report.pruned += 1,
                            Err(e) => {
                                warn!(
                                    subscription_id = %sub.subscription_id,
                                    error = %e,
                                    "pruning gone subscription failed"
                                );
                                report.failed += 1;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            order_id = %order.order_id,
                            subscription_id = %sub.subscription_id,
                            error = %e,
                            "push delivery failed"
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            order_id = %order.order_id,
            status = %status,
            delivered = report.delivered,
            pruned = report.pruned,
            failed = report.failed,
            "push dispatched"
        );
        Ok(report)
    }
}
