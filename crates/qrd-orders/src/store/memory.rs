//! In-process [`OrderStore`] backed by hash maps.
//!
//! One `tokio::sync::Mutex` guards the whole state, so every trait method is
//! a transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use qrd_schemas::{
    Account, Audience, MenuFixture, Order, OrderStatus, Product, PushSubscription, Role,
    StatusChange, Table,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{NewSubscription, OrderFilter, OrderStore};
use crate::error::{OrderError, OrderResult};

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    tables: HashMap<(String, String), Table>,
    products: HashMap<(String, String), Product>,
    orders: HashMap<Uuid, Order>,
    subscriptions: HashMap<Uuid, PushSubscription>,
    last_ts: Option<DateTime<Utc>>,
}

impl Inner {
    /// Strictly increasing, microsecond-precision timestamps, like the
    /// Postgres store's, so cursors round-trip exactly.
    fn next_ts(&mut self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let ts = match self.last_ts {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_ts = Some(ts);
        ts
    }

    fn active_for_table(&self, account_id: &str, table_id: &str) -> Option<&Order> {
        self.orders.values().find(|o| {
            o.account_id == account_id && o.table_id == table_id && o.status.is_active()
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: &MenuFixture) -> Self {
        let mut inner = Inner::default();
        apply_fixture(&mut inner, fixture);
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub async fn order_count(&self) -> usize {
        self.inner.lock().await.orders.len()
    }
}

fn apply_fixture(inner: &mut Inner, fixture: &MenuFixture) {
    for a in &fixture.accounts {
        inner.accounts.insert(a.account_id.clone(), a.clone());
    }
    for t in &fixture.tables {
        inner
            .tables
            .insert((t.account_id.clone(), t.table_id.clone()), t.clone());
    }
    for p in &fixture.products {
        inner
            .products
            .insert((p.account_id.clone(), p.product_id.clone()), p.clone());
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn account(&self, account_id: &str) -> anyhow::Result<Option<Account>> {
        Ok(self.inner.lock().await.accounts.get(account_id).cloned())
    }

    async fn table(&self, account_id: &str, table_id: &str) -> anyhow::Result<Option<Table>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tables
            .get(&(account_id.to_string(), table_id.to_string()))
            .cloned())
    }

    async fn products(
        &self,
        account_id: &str,
        product_ids: &[String],
    ) -> anyhow::Result<Vec<Product>> {
        let inner = self.inner.lock().await;
        Ok(product_ids
            .iter()
            .filter_map(|id| {
                inner
                    .products
                    .get(&(account_id.to_string(), id.clone()))
                    .cloned()
            })
            .collect())
    }

    async fn insert_order(&self, mut order: Order) -> OrderResult<Order> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.active_for_table(&order.account_id, &order.table_id) {
            return Err(OrderError::ActiveOrderExists {
                order_id: existing.order_id,
            });
        }

        let ts = inner.next_ts();
        order.created_at_utc = ts;
        order.updated_at_utc = ts;
        for change in &mut order.history {
            change.at_utc = ts;
        }

        inner.orders.insert(order.order_id, order.clone());
        Ok(order)
    }

    async fn order(&self, order_id: Uuid) -> anyhow::Result<Option<Order>> {
        Ok(self.inner.lock().await.orders.get(&order_id).cloned())
    }

    async fn active_order_for_table(
        &self,
        account_id: &str,
        table_id: &str,
    ) -> anyhow::Result<Option<Order>> {
        let inner = self.inner.lock().await;
        Ok(inner.active_for_table(account_id, table_id).cloned())
    }

    async fn list_orders(
        &self,
        account_id: &str,
        filter: &OrderFilter,
    ) -> anyhow::Result<Vec<Order>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.account_id == account_id && filter.matches(o))
            .cloned()
            .collect();
        out.sort_by_key(|o| (o.updated_at_utc, o.order_id));
        out.truncate(filter.limit);
        Ok(out)
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        expected_from: OrderStatus,
        to: OrderStatus,
        role: Role,
    ) -> OrderResult<Order> {
        let mut inner = self.inner.lock().await;
        let ts = inner.next_ts();

        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or(OrderError::OrderNotFound(order_id))?;

        if order.status != expected_from {
            return Err(OrderError::StatusConflict {
                current: order.status,
            });
        }

        order.status = to;
        order.updated_at_utc = ts;
        order.history.push(StatusChange {
            status: to,
            role,
            at_utc: ts,
        });

        Ok(order.clone())
    }

    async fn claim_notification(&self, order_id: Uuid, status: OrderStatus) -> OrderResult<bool> {
        let mut inner = self.inner.lock().await;
        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or(OrderError::OrderNotFound(order_id))?;

        if order.notified_statuses.contains(&status) {
            return Ok(false);
        }
        order.notified_statuses.push(status);
        Ok(true)
    }

    async fn add_subscription(&self, sub: NewSubscription) -> anyhow::Result<PushSubscription> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.subscriptions.values().find(|s| {
            s.account_id == sub.account_id && s.audience == sub.audience && s.endpoint == sub.endpoint
        }) {
            return Ok(existing.clone());
        }

        let created = PushSubscription {
            subscription_id: Uuid::new_v4(),
            account_id: sub.account_id,
            audience: sub.audience,
            endpoint: sub.endpoint,
            created_at_utc: Utc::now(),
        };
        inner
            .subscriptions
            .insert(created.subscription_id, created.clone());
        Ok(created)
    }

    async fn subscription(
        &self,
        subscription_id: Uuid,
    ) -> anyhow::Result<Option<PushSubscription>> {
        Ok(self
            .inner
            .lock()
            .await
            .subscriptions
            .get(&subscription_id)
            .cloned())
    }

    async fn subscriptions_for(
        &self,
        account_id: &str,
        audience: &Audience,
    ) -> anyhow::Result<Vec<PushSubscription>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<PushSubscription> = inner
            .subscriptions
            .values()
            .filter(|s| s.account_id == account_id && s.audience == *audience)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at_utc);
        Ok(out)
    }

    async fn remove_subscription(&self, subscription_id: Uuid) -> anyhow::Result<bool> {
        Ok(self
            .inner
            .lock()
            .await
            .subscriptions
            .remove(&subscription_id)
            .is_some())
    }
}
