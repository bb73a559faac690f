//! Postgres-backed [`OrderStore`].
//!
//! Where the invariants are enforced:
//! - one active order per table: partial unique index `uq_orders_active_table`
//! - status CAS: `update ... where status = $expected`
//! - notification claim: `select ... for update` then `array_append`, one
//!   transaction
//!
//! Inserts and status changes also send an [`OrderNotice`] in the same
//! transaction.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use qrd_orders::{NewSubscription, OrderError, OrderFilter, OrderResult, OrderStore};
use qrd_schemas::{
    Account, Audience, Order, OrderLine, OrderStatus, Product, PushSubscription, Role,
    StatusChange, Table,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::is_unique_constraint_violation;
use crate::notice::{OrderNotice, ORDER_EVENTS_CHANNEL};

const ORDER_COLUMNS: &str = "order_id, account_id, table_id, table_label, lines, total_cents, \
     status, customer_note, notified_statuses, history, customer_token, \
     created_at_utc, updated_at_utc";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    origin: Uuid,
}

impl PgStore {
    /// Each store gets a fresh origin id; clones share it.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            origin: Uuid::new_v4(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Stamped on every notice this store sends.
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    fn notice(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        previous: Option<OrderStatus>,
    ) -> anyhow::Result<String> {
        OrderNotice {
            origin: self.origin,
            order_id,
            status,
            previous,
        }
        .to_payload()
    }

    /// Insert plus notice, committed together.
    async fn try_insert(
        &self,
        order: &Order,
        notified: &[String],
        notice: &str,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            insert into orders (
              order_id, account_id, table_id, table_label, lines, total_cents,
              status, customer_note, notified_statuses, history, customer_token,
              created_at_utc, updated_at_utc
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13
            )
            "#,
        )
        .bind(order.order_id)
        .bind(&order.account_id)
        .bind(&order.table_id)
        .bind(&order.table_label)
        .bind(Json(&order.lines))
        .bind(order.total_cents)
        .bind(order.status.as_str())
        .bind(&order.customer_note)
        .bind(notified)
        .bind(Json(&order.history))
        .bind(order.customer_token)
        .bind(order.created_at_utc)
        .bind(order.updated_at_utc)
        .execute(&mut *tx)
        .await?;
        send_notice(&mut tx, notice).await?;
        tx.commit().await
    }

    /// Explain a compare-and-set that matched no row.
    async fn cas_lost(&self, order_id: Uuid, expected_from: OrderStatus) -> OrderResult<Order> {
        match self.order(order_id).await? {
            None => Err(OrderError::OrderNotFound(order_id)),
            Some(current) => {
                debug!(order_id = %order_id, expected = %expected_from, current = %current.status, "status cas lost");
                Err(OrderError::StatusConflict {
                    current: current.status,
                })
            }
        }
    }
}

async fn send_notice(tx: &mut Transaction<'_, Postgres>, payload: &str) -> Result<(), sqlx::Error> {
    sqlx::query("select pg_notify($1, $2)")
        .bind(ORDER_EVENTS_CHANNEL)
        .bind(payload)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Attempts at inserting before a table conflict whose holder keeps
/// disappearing is reported as an error.
const INSERT_ATTEMPTS: usize = 2;

/// Postgres keeps microseconds; truncate so values read back compare equal.
fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn parse_status(s: &str) -> anyhow::Result<OrderStatus> {
    OrderStatus::parse(s).ok_or_else(|| anyhow!("invalid order status in db: {s}"))
}

fn order_from_row(row: &PgRow) -> anyhow::Result<Order> {
    let Json(lines): Json<Vec<OrderLine>> = row.try_get("lines")?;
    let Json(history): Json<Vec<StatusChange>> = row.try_get("history")?;
    let notified: Vec<String> = row.try_get("notified_statuses")?;

    Ok(Order {
        order_id: row.try_get("order_id")?,
        account_id: row.try_get("account_id")?,
        table_id: row.try_get("table_id")?,
        table_label: row.try_get("table_label")?,
        lines,
        total_cents: row.try_get("total_cents")?,
        status: parse_status(&row.try_get::<String, _>("status")?)?,
        customer_note: row.try_get("customer_note")?,
        notified_statuses: notified
            .iter()
            .map(|s| parse_status(s))
            .collect::<anyhow::Result<_>>()?,
        history,
        created_at_utc: row.try_get("created_at_utc")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
        customer_token: row.try_get("customer_token")?,
    })
}

fn audience_key(audience: &Audience) -> String {
    match audience {
        Audience::Staff { role } => format!("staff:{}", role.as_str()),
        Audience::Order { order_id } => format!("order:{order_id}"),
    }
}

fn parse_audience_key(key: &str) -> anyhow::Result<Audience> {
    match key.split_once(':') {
        Some(("staff", role)) => Role::parse(role)
            .map(|role| Audience::Staff { role })
            .ok_or_else(|| anyhow!("invalid audience role in db: {key}")),
        Some(("order", id)) => Ok(Audience::Order {
            order_id: Uuid::parse_str(id).with_context(|| format!("invalid audience: {key}"))?,
        }),
        _ => Err(anyhow!("invalid audience key in db: {key}")),
    }
}

fn subscription_from_row(row: &PgRow) -> anyhow::Result<PushSubscription> {
    Ok(PushSubscription {
        subscription_id: row.try_get("subscription_id")?,
        account_id: row.try_get("account_id")?,
        audience: parse_audience_key(&row.try_get::<String, _>("audience_key")?)?,
        endpoint: row.try_get("endpoint")?,
        created_at_utc: row.try_get("created_at_utc")?,
    })
}

#[async_trait]
impl OrderStore for PgStore {
    async fn account(&self, account_id: &str) -> anyhow::Result<Option<Account>> {
        let row = sqlx::query(
            "select account_id, name, ordering_enabled from accounts where account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch account failed")?;

        row.map(|r| -> anyhow::Result<Account> {
            Ok(Account {
                account_id: r.try_get("account_id")?,
                name: r.try_get("name")?,
                ordering_enabled: r.try_get("ordering_enabled")?,
            })
        })
        .transpose()
    }

    async fn table(&self, account_id: &str, table_id: &str) -> anyhow::Result<Option<Table>> {
        let row = sqlx::query(
            r#"
            select account_id, table_id, label, active
            from venue_tables
            where account_id = $1 and table_id = $2
            "#,
        )
        .bind(account_id)
        .bind(table_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch table failed")?;

        row.map(|r| -> anyhow::Result<Table> {
            Ok(Table {
                account_id: r.try_get("account_id")?,
                table_id: r.try_get("table_id")?,
                label: r.try_get("label")?,
                active: r.try_get("active")?,
            })
        })
        .transpose()
    }

    async fn products(
        &self,
        account_id: &str,
        product_ids: &[String],
    ) -> anyhow::Result<Vec<Product>> {
        let rows = sqlx::query(
            r#"
            select account_id, product_id, name, price_cents, available
            from products
            where account_id = $1 and product_id = any($2)
            "#,
        )
        .bind(account_id)
        .bind(product_ids)
        .fetch_all(&self.pool)
        .await
        .context("fetch products failed")?;

        rows.iter()
            .map(|r| -> anyhow::Result<Product> {
                Ok(Product {
                    account_id: r.try_get("account_id")?,
                    product_id: r.try_get("product_id")?,
                    name: r.try_get("name")?,
                    price_cents: r.try_get("price_cents")?,
                    available: r.try_get("available")?,
                })
            })
            .collect()
    }

    async fn insert_order(&self, mut order: Order) -> OrderResult<Order> {
        let ts = now_utc();
        order.created_at_utc = ts;
        order.updated_at_utc = ts;
        for change in &mut order.history {
            change.at_utc = ts;
        }
        let notified: Vec<String> = order
            .notified_statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let notice = self.notice(order.order_id, order.status, None)?;

        for attempt in 1..=INSERT_ATTEMPTS {
            let err = match self.try_insert(&order, &notified, &notice).await {
                Ok(()) => return Ok(order),
                Err(e) => e,
            };
            if !is_unique_constraint_violation(&err, "uq_orders_active_table") {
                return Err(anyhow::Error::new(err).context("insert_order failed").into());
            }
            match self
                .active_order_for_table(&order.account_id, &order.table_id)
                .await?
            {
                Some(existing) => {
                    return Err(OrderError::ActiveOrderExists {
                        order_id: existing.order_id,
                    })
                }
                // The holder was served or cancelled between our insert and
                // the re-read; the table is free now.
                None => warn!(
                    table_id = %order.table_id,
                    attempt,
                    "active order vanished after unique violation; retrying insert"
                ),
            }
        }
        Err(anyhow!(
            "insert_order: table {}/{} conflict did not settle",
            order.account_id,
            order.table_id
        )
        .into())
    }

    async fn order(&self, order_id: Uuid) -> anyhow::Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "select {ORDER_COLUMNS} from orders where order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch order failed")?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn active_order_for_table(
        &self,
        account_id: &str,
        table_id: &str,
    ) -> anyhow::Result<Option<Order>> {
        let row = sqlx::query(&format!(
            r#"
            select {ORDER_COLUMNS}
            from orders
            where account_id = $1
              and table_id = $2
              and status in ('pending','approved','ready')
            "#
        ))
        .bind(account_id)
        .bind(table_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch active order failed")?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn list_orders(
        &self,
        account_id: &str,
        filter: &OrderFilter,
    ) -> anyhow::Result<Vec<Order>> {
        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let limit = i64::try_from(filter.limit).unwrap_or(i64::MAX);

        let rows = sqlx::query(&format!(
            r#"
            select {ORDER_COLUMNS}
            from orders
            where account_id = $1
              and (cardinality($2::text[]) = 0 or status = any($2))
              and ($3::timestamptz is null or updated_at_utc > $3)
              and ($4::timestamptz is null or (updated_at_utc, order_id) > ($4, $5::uuid))
            order by updated_at_utc asc, order_id asc
            limit $6
            "#
        ))
        .bind(account_id)
        .bind(&statuses)
        .bind(filter.updated_since)
        .bind(filter.after.map(|c| c.updated_at_utc))
        .bind(filter.after.map(|c| c.order_id))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("list_orders failed")?;

        rows.iter().map(order_from_row).collect()
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        expected_from: OrderStatus,
        to: OrderStatus,
        role: Role,
    ) -> OrderResult<Order> {
        let ts = now_utc();
        let change = StatusChange {
            status: to,
            role,
            at_utc: ts,
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .context("update_status begin failed")?;

        let row = sqlx::query(&format!(
            r#"
            update orders
            set status = $3,
                updated_at_utc = $4,
                history = history || $5::jsonb
            where order_id = $1 and status = $2
            returning {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(expected_from.as_str())
        .bind(to.as_str())
        .bind(ts)
        .bind(Json(vec![change]))
        .fetch_optional(&mut *tx)
        .await
        .context("update_status failed")?;

        match row {
            Some(r) => {
                let order = order_from_row(&r)?;
                let notice = self.notice(order_id, to, Some(expected_from))?;
                send_notice(&mut tx, &notice)
                    .await
                    .context("pg_notify failed")?;
                tx.commit().await.context("update_status commit failed")?;
                Ok(order)
            }
            None => {
                tx.rollback().await.context("update_status rollback failed")?;
                self.cas_lost(order_id, expected_from).await
            }
        }
    }

    async fn claim_notification(&self, order_id: Uuid, status: OrderStatus) -> OrderResult<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("claim_notification begin failed")?;

        // Row lock: concurrent claimers for this order queue here.
        let row: Option<(Vec<String>,)> = sqlx::query_as(
            "select notified_statuses from orders where order_id = $1 for update",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await
        .context("claim_notification lock failed")?;

        let Some((notified,)) = row else {
            return Err(OrderError::OrderNotFound(order_id));
        };

        if notified.iter().any(|s| s == status.as_str()) {
            tx.commit()
                .await
                .context("claim_notification commit failed")?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            update orders
            set notified_statuses = array_append(notified_statuses, $2)
            where order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await
        .context("claim_notification update failed")?;

        tx.commit()
            .await
            .context("claim_notification commit failed")?;
        Ok(true)
    }

    async fn add_subscription(&self, sub: NewSubscription) -> anyhow::Result<PushSubscription> {
        // The no-op update makes `returning` yield the existing row on conflict.
        let row = sqlx::query(
            r#"
            insert into push_subscriptions (
              subscription_id, account_id, audience_key, endpoint, created_at_utc
            ) values ($1, $2, $3, $4, $5)
            on conflict on constraint uq_push_subscription
              do update set endpoint = excluded.endpoint
            returning subscription_id, account_id, audience_key, endpoint, created_at_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&sub.account_id)
        .bind(audience_key(&sub.audience))
        .bind(&sub.endpoint)
        .bind(now_utc())
        .fetch_one(&self.pool)
        .await
        .context("add_subscription failed")?;

        subscription_from_row(&row)
    }

    async fn subscription(
        &self,
        subscription_id: Uuid,
    ) -> anyhow::Result<Option<PushSubscription>> {
        let row = sqlx::query(
            r#"
            select subscription_id, account_id, audience_key, endpoint, created_at_utc
            from push_subscriptions
            where subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch subscription failed")?;

        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn subscriptions_for(
        &self,
        account_id: &str,
        audience: &Audience,
    ) -> anyhow::Result<Vec<PushSubscription>> {
        let rows = sqlx::query(
            r#"
            select subscription_id, account_id, audience_key, endpoint, created_at_utc
            from push_subscriptions
            where account_id = $1 and audience_key = $2
            order by created_at_utc asc
            "#,
        )
        .bind(account_id)
        .bind(audience_key(audience))
        .fetch_all(&self.pool)
        .await
        .context("fetch subscriptions failed")?;

        rows.iter().map(subscription_from_row).collect()
    }

    async fn remove_subscription(&self, subscription_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("delete from push_subscriptions where subscription_id = $1")
            .bind(subscription_id)
            .execute(&self.pool)
            .await
            .context("remove_subscription failed")?;
        Ok(res.rows_affected() > 0)
    }
}
