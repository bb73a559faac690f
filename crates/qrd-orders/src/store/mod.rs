//! Persistence seam for orders and the documents they reference.
//!
//! The service layer only ever talks to [`OrderStore`]. Two implementations
//! exist: [`MemoryStore`] here (tests, local dev) and the Postgres store in
//! `qrd-db`.
//!
//! # Contract
//!
//! - `insert_order` MUST atomically refuse a second active order on a table
//!   with [`OrderError::ActiveOrderExists`].
//! - `update_status` is compare-and-set on the stored status.
//! - `claim_notification` records a status in `notified_statuses` inside a
//!   single transaction and returns `true` only for the first caller.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use qrd_schemas::{
    Account, Audience, Order, OrderStatus, Product, PushSubscription, Role, Table,
};
use uuid::Uuid;

use crate::error::OrderResult;

mod memory;

pub use memory::MemoryStore;

/// Keyset position in the `(updated_at_utc, order_id)` listing order.
///
/// Stores keep microsecond timestamps, so the cursor is exact: resuming after
/// it never repeats or skips an order, however many share one millisecond.
/// Wire form is `<unix_micros>_<order_id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderCursor {
    pub updated_at_utc: DateTime<Utc>,
    pub order_id: Uuid,
}

impl OrderCursor {
    pub fn of(order: &Order) -> Self {
        Self {
            updated_at_utc: order.updated_at_utc,
            order_id: order.order_id,
        }
    }

    /// True when `order` sorts strictly after this position.
    pub fn precedes(&self, order: &Order) -> bool {
        (order.updated_at_utc, order.order_id) > (self.updated_at_utc, self.order_id)
    }
}

impl fmt::Display for OrderCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}",
            self.updated_at_utc.timestamp_micros(),
            self.order_id.simple()
        )
    }
}

/// Returned when a cursor token does not parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid order cursor: {0:?}")]
pub struct InvalidCursor(pub String);

impl FromStr for OrderCursor {
    type Err = InvalidCursor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || InvalidCursor(s.to_string());
        let (micros, id) = s.trim().split_once('_').ok_or_else(bad)?;
        let micros: i64 = micros.parse().map_err(|_| bad())?;
        let updated_at_utc = Utc
            .timestamp_micros(micros)
            .single()
            .ok_or_else(bad)?;
        let order_id = Uuid::parse_str(id).map_err(|_| bad())?;
        Ok(Self {
            updated_at_utc,
            order_id,
        })
    }
}

/// Selection for dashboard listing and polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFilter {
    /// Empty means every status.
    pub statuses: Vec<OrderStatus>,
    /// Only orders updated strictly after this instant.
    pub updated_since: Option<DateTime<Utc>>,
    /// Only orders after this keyset position.
    pub after: Option<OrderCursor>,
    pub limit: usize,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self {
            statuses: Vec::new(),
            updated_since: None,
            after: None,
            limit: 200,
        }
    }
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&order.status))
            && self
                .updated_since
                .map_or(true, |since| order.updated_at_utc > since)
            && self.after.map_or(true, |c| c.precedes(order))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
    pub account_id: String,
    pub audience: Audience,
    pub endpoint: String,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn account(&self, account_id: &str) -> anyhow::Result<Option<Account>>;

    async fn table(&self, account_id: &str, table_id: &str) -> anyhow::Result<Option<Table>>;

    /// Products of `account_id` among `product_ids`. Unknown ids are omitted.
    async fn products(
        &self,
        account_id: &str,
        product_ids: &[String],
    ) -> anyhow::Result<Vec<Product>>;

    async fn insert_order(&self, order: Order) -> OrderResult<Order>;

    async fn order(&self, order_id: Uuid) -> anyhow::Result<Option<Order>>;

    async fn active_order_for_table(
        &self,
        account_id: &str,
        table_id: &str,
    ) -> anyhow::Result<Option<Order>>;

    /// Sorted by `(updated_at_utc, order_id)` ascending, at most
    /// `filter.limit` rows.
    async fn list_orders(&self, account_id: &str, filter: &OrderFilter)
        -> anyhow::Result<Vec<Order>>;

    async fn update_status(
        &self,
        order_id: Uuid,
        expected_from: OrderStatus,
        to: OrderStatus,
        role: Role,
    ) -> OrderResult<Order>;

    async fn claim_notification(&self, order_id: Uuid, status: OrderStatus) -> OrderResult<bool>;

    async fn add_subscription(&self, sub: NewSubscription) -> anyhow::Result<PushSubscription>;

    async fn subscription(&self, subscription_id: Uuid)
        -> anyhow::Result<Option<PushSubscription>>;

    async fn subscriptions_for(
        &self,
        account_id: &str,
        audience: &Audience,
    ) -> anyhow::Result<Vec<PushSubscription>>;

    async fn remove_subscription(&self, subscription_id: Uuid) -> anyhow::Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_at(ts: DateTime<Utc>, order_id: Uuid) -> Order {
        Order {
            order_id,
            account_id: "bistro".into(),
            table_id: "t1".into(),
            table_label: "Table 1".into(),
            lines: Vec::new(),
            total_cents: 0,
            status: OrderStatus::Pending,
            customer_note: None,
            notified_statuses: Vec::new(),
            history: Vec::new(),
            created_at_utc: ts,
            updated_at_utc: ts,
            customer_token: Uuid::nil(),
        }
    }

    #[test]
    fn cursor_token_parses_back_to_same_position() {
        let ts = Utc.timestamp_micros(1_760_000_000_123_456).single().unwrap();
        let c = OrderCursor {
            updated_at_utc: ts,
            order_id: Uuid::new_v4(),
        };
        let token = c.to_string();
        assert!(token.starts_with("1760000000123456_"));
        assert_eq!(token.parse::<OrderCursor>().unwrap(), c);
    }

    #[test]
    fn malformed_cursor_tokens_are_rejected() {
        for bad in ["", "123", "abc_def", "12_not-a-uuid", "_0000"] {
            assert!(bad.parse::<OrderCursor>().is_err(), "{bad:?}");
        }
    }

    #[test]
    fn ties_on_timestamp_break_on_order_id() {
        let ts = Utc.timestamp_micros(1_760_000_000_000_000).single().unwrap();
        let mut ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        ids.sort();
        let orders: Vec<Order> = ids.iter().map(|id| order_at(ts, *id)).collect();

        let filter = OrderFilter {
            after: Some(OrderCursor::of(&orders[0])),
            ..OrderFilter::default()
        };
        let rest: Vec<Uuid> = orders
            .iter()
            .filter(|o| filter.matches(o))
            .map(|o| o.order_id)
            .collect();
        assert_eq!(rest, ids[1..].to_vec());
    }
}
