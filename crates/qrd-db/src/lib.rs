use anyhow::{Context, Result};
use qrd_schemas::MenuFixture;
use sqlx::{postgres::PgPoolOptions, PgPool};

mod notice;
mod store;

pub use notice::{OrderNotice, OrderNoticeListener, ORDER_EVENTS_CHANNEL};
pub use store::PgStore;

pub const ENV_DB_URL: &str = "QRD_DATABASE_URL";

/// Connect to Postgres using QRD_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_orders_table: exists,
    })
}

/// Upsert accounts, tables and products from a fixture in one transaction.
/// Existing orders are untouched.
pub async fn seed_fixture(pool: &PgPool, fixture: &MenuFixture) -> Result<SeedCounts> {
    let mut tx = pool.begin().await.context("seed begin failed")?;

    for a in &fixture.accounts {
        sqlx::query(
            r#"
            insert into accounts (account_id, name, ordering_enabled)
            values ($1, $2, $3)
            on conflict (account_id) do update
              set name = excluded.name,
                  ordering_enabled = excluded.ordering_enabled
            "#,
        )
        .bind(&a.account_id)
        .bind(&a.name)
        .bind(a.ordering_enabled)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("seed account {} failed", a.account_id))?;
    }

    for t in &fixture.tables {
        sqlx::query(
            r#"
            insert into venue_tables (account_id, table_id, label, active)
            values ($1, $2, $3, $4)
            on conflict (account_id, table_id) do update
              set label = excluded.label,
                  active = excluded.active
            "#,
        )
        .bind(&t.account_id)
        .bind(&t.table_id)
        .bind(&t.label)
        .bind(t.active)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("seed table {}/{} failed", t.account_id, t.table_id))?;
    }

    for p in &fixture.products {
        sqlx::query(
            r#"
            insert into products (account_id, product_id, name, price_cents, available)
            values ($1, $2, $3, $4, $5)
            on conflict (account_id, product_id) do update
              set name = excluded.name,
                  price_cents = excluded.price_cents,
                  available = excluded.available
            "#,
        )
        .bind(&p.account_id)
        .bind(&p.product_id)
        .bind(&p.name)
        .bind(p.price_cents)
        .bind(p.available)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("seed product {}/{} failed", p.account_id, p.product_id))?;
    }

    tx.commit().await.context("seed commit failed")?;

    Ok(SeedCounts {
        accounts: fixture.accounts.len(),
        tables: fixture.tables.len(),
        products: fixture.products.len(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedCounts {
    pub accounts: usize,
    pub tables: usize,
    pub products: usize,
}

/// Detect a Postgres unique constraint violation by name.
pub fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.constraint() == Some(constraint)
                // Postgres unique_violation is 23505. Not always present, but helps.
                || db_err.code().as_deref() == Some("23505")
                    && db_err.message().contains(constraint)
        }
        _ => false,
    }
}
