//! `qrd order` handlers: show and set-status.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use qrd_config::{resolve_secrets, DaemonSettings, ResolvedSecrets};
use qrd_notify::{Dispatcher, LogPushSender, PushSender, RelayPushSender};
use qrd_orders::{Actor, OrderService, OrderStore};
use qrd_schemas::{Order, OrderStatus, Role};
use tracing::warn;

use super::{load_cli_config, parse_order_id};

// ---------------------------------------------------------------------------
// order show
// ---------------------------------------------------------------------------

pub async fn show(order_id: &str) -> Result<()> {
    let order_id = parse_order_id(order_id)?;
    let pool = qrd_db::connect_from_env().await?;
    let store = qrd_db::PgStore::new(pool);

    let order = store
        .order(order_id)
        .await?
        .ok_or_else(|| anyhow!("order not found: {order_id}"))?;
    print_order(&order);
    Ok(())
}

fn print_order(o: &Order) {
    println!("order_id={}", o.order_id);
    println!("account_id={}", o.account_id);
    println!("table_id={}", o.table_id);
    println!("table_label={}", o.table_label);
    println!("status={}", o.status);
    println!("total_cents={}", o.total_cents);
    println!("created_at_utc={}", o.created_at_utc.to_rfc3339());
    println!("updated_at_utc={}", o.updated_at_utc.to_rfc3339());
    println!("notified={}", join_statuses(&o.notified_statuses));
    if let Some(note) = &o.customer_note {
        println!("customer_note={}", note);
    }
    for l in &o.lines {
        println!(
            "line product_id={} qty={} unit_price_cents={}",
            l.product_id, l.quantity, l.unit_price_cents
        );
    }
    for h in &o.history {
        println!(
            "history status={} role={} at_utc={}",
            h.status,
            h.role,
            h.at_utc.to_rfc3339()
        );
    }
}

fn join_statuses(statuses: &[OrderStatus]) -> String {
    statuses
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

// ---------------------------------------------------------------------------
// order set-status
// ---------------------------------------------------------------------------

pub async fn set_status(
    order_id: &str,
    status: &str,
    role: &str,
    config_paths: &[String],
) -> Result<()> {
    let order_id = parse_order_id(order_id)?;
    let to = OrderStatus::from_str(status).context("invalid --status")?;
    let role = parse_staff_role(role)?;

    let loaded = load_cli_config(config_paths)?;
    let settings = DaemonSettings::from_config(&loaded.config_json)?;
    let secrets = resolve_secrets(&loaded.config_json, settings.profile)?;

    let url = secrets.database_url.as_deref().ok_or_else(|| {
        anyhow!(
            "env var '{}' is not set; order commands need the database",
            secrets.database_url_env
        )
    })?;
    let store: Arc<dyn OrderStore> = Arc::new(qrd_db::PgStore::new(qrd_db::connect(url).await?));

    // The operator acts as staff of whichever account owns the order.
    let order = store
        .order(order_id)
        .await?
        .ok_or_else(|| anyhow!("order not found: {order_id}"))?;
    let actor = Actor::Staff {
        account_id: order.account_id.clone(),
        role,
    };

    let service = OrderService::new(Arc::clone(&store), settings.cart);
    let adv = service.advance(order_id, &actor, to).await?;

    println!(
        "order_id={} previous={} status={} changed={}",
        adv.order.order_id, adv.previous, adv.order.status, adv.changed
    );

    if adv.changed {
        let sender = build_sender(&settings, &secrets)?;
        let report = Dispatcher::new(store, sender)
            .dispatch(&adv.order, adv.order.status)
            .await?;
        println!(
            "push already_sent={} delivered={} pruned={} failed={}",
            report.already_sent, report.delivered, report.pruned, report.failed
        );
        if report.failed > 0 {
            warn!(order_id = %order_id, failed = report.failed, "some push deliveries failed");
        }
    }
    Ok(())
}

fn parse_staff_role(raw: &str) -> Result<Role> {
    let role = Role::from_str(raw).context("invalid --role")?;
    if !role.is_staff() {
        bail!("--role must be a staff role (admin | kitchen | waiter), got '{}'", raw.trim());
    }
    Ok(role)
}

fn build_sender(settings: &DaemonSettings, secrets: &ResolvedSecrets) -> Result<Arc<dyn PushSender>> {
    let sender: Arc<dyn PushSender> = match &settings.push_relay_url {
        Some(url) => Arc::new(RelayPushSender::new(
            url.clone(),
            secrets.push_relay_token.clone(),
            settings.push_timeout,
        )?),
        None => Arc::new(LogPushSender),
    };
    Ok(sender)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_staff_roles_may_set_status() {
        assert_eq!(parse_staff_role("kitchen").unwrap(), Role::Kitchen);
        assert_eq!(parse_staff_role(" ADMIN ").unwrap(), Role::Admin);
        assert!(parse_staff_role("customer").is_err());
        assert!(parse_staff_role("chef").is_err());
    }

    #[test]
    fn statuses_join_in_order() {
        assert_eq!(
            join_statuses(&[OrderStatus::Pending, OrderStatus::Approved]),
            "pending,approved"
        );
        assert_eq!(join_statuses(&[]), "");
    }
}
