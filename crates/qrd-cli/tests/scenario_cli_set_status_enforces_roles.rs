use std::io::Write;
use std::sync::Arc;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use qrd_orders::{CartLimits, OrderRequest, OrderService, OrderStore, RequestedLine};
use qrd_schemas::OrderStatus;
use std::process::Command;
use uuid::Uuid;

/// `qrd seed` + `qrd order set-status` against a real database: role rules
/// are the daemon's, and the push claim for each status is taken once.
///
/// This test is DB-backed and is skipped if QRD_DATABASE_URL is not set.
#[tokio::test]
async fn cli_set_status_follows_role_table_and_claims_push() -> anyhow::Result<()> {
    // Skip if no DB configured (local + CI friendly).
    let url = match std::env::var(qrd_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: QRD_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = match qrd_db::connect(&url).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("SKIP: cannot connect to DB: {e}");
            return Ok(());
        }
    };
    qrd_db::migrate(&pool).await?;

    let account = format!("cli-{}", Uuid::new_v4().simple());
    let mut fixture = tempfile::NamedTempFile::new()?;
    write!(
        fixture,
        r#"
accounts:
  - {{ account_id: {account}, name: CLI Bistro }}
tables:
  - {{ account_id: {account}, table_id: t1, label: "Table 1" }}
products:
  - {{ account_id: {account}, product_id: soup, name: Soup, price_cents: 650 }}
"#
    )?;

    Command::cargo_bin("qrd")?
        .env(qrd_db::ENV_DB_URL, &url)
        .args(["seed", "--fixture"])
        .arg(fixture.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("accounts=1 tables=1 products=1"));

    let store: Arc<dyn OrderStore> = Arc::new(qrd_db::PgStore::new(pool.clone()));
    let service = OrderService::new(Arc::clone(&store), CartLimits::default());
    let placed = service
        .place_order(
            &account,
            "t1",
            &OrderRequest {
                lines: vec![RequestedLine {
                    product_id: "soup".into(),
                    quantity: 2,
                    note: None,
                }],
                customer_note: None,
            },
        )
        .await?;
    let order_id = placed.order.order_id.to_string();

    let set_status = |status: &str, role: &str| {
        let mut cmd = Command::cargo_bin("qrd").unwrap();
        cmd.env(qrd_db::ENV_DB_URL, &url).args([
            "order",
            "set-status",
            "--order-id",
            order_id.as_str(),
            "--status",
            status,
            "--role",
            role,
        ]);
        cmd
    };

    // Waiters cannot approve.
    set_status("approved", "waiter")
        .assert()
        .failure()
        .stderr(predicate::str::contains("may not move an order"));

    set_status("approved", "kitchen")
        .assert()
        .success()
        .stdout(predicate::str::contains("previous=pending status=approved changed=true"))
        .stdout(predicate::str::contains("already_sent=false"));

    // Repeating the same status is a no-op and sends nothing.
    set_status("approved", "kitchen")
        .assert()
        .success()
        .stdout(predicate::str::contains("changed=false"))
        .stdout(predicate::str::contains("push").not());

    Command::cargo_bin("qrd")?
        .env(qrd_db::ENV_DB_URL, &url)
        .args(["order", "show", "--order-id", order_id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("status=approved"))
        .stdout(predicate::str::contains("notified=approved"))
        .stdout(predicate::str::contains("line product_id=soup qty=2"));

    let stored = store.order(placed.order.order_id).await?.expect("order row");
    assert_eq!(stored.status, OrderStatus::Approved);
    assert!(stored.has_notified(OrderStatus::Approved));

    // Leave the table free for reruns against the same database.
    service
        .advance(
            placed.order.order_id,
            &qrd_orders::Actor::Staff {
                account_id: account.clone(),
                role: qrd_schemas::Role::Admin,
            },
            OrderStatus::Cancelled,
        )
        .await?;
    Ok(())
}
