//! Scenario: push dispatch per status happens once.
//!
//! # Invariants under test
//!
//! 1. Dispatching the same (order, status) twice sends once; the second call
//!    reports `already_sent`.
//! 2. Racing dispatchers for one status produce exactly one send per
//!    subscription.
//! 3. Audiences are resolved per status: customer devices never hear about
//!    `pending`, kitchen devices never hear about `ready`.
//! 4. Gone subscriptions are pruned; failing ones are counted, not retried.
//! 5. Store errors after the claim cost only the affected subscription or
//!    audience; every other audience is still notified.

use std::sync::Arc;

use async_trait::async_trait;
use qrd_notify::{Dispatcher, RecordingPushSender};
use qrd_orders::{
    Actor, CartLimits, MemoryStore, NewSubscription, OrderFilter, OrderRequest, OrderResult,
    OrderService, OrderStore, RequestedLine,
};
use qrd_schemas::{
    Account, Audience, MenuFixture, Order, OrderStatus, Product, PushSubscription, Role, Table,
};
use uuid::Uuid;

struct Harness {
    store: Arc<MemoryStore>,
    service: OrderService,
    sender: RecordingPushSender,
    dispatcher: Dispatcher,
}

fn harness() -> Harness {
    let fx = MenuFixture {
        accounts: vec![Account {
            account_id: "bistro".into(),
            name: "Bistro".into(),
            ordering_enabled: true,
        }],
        tables: vec![Table {
            account_id: "bistro".into(),
            table_id: "t1".into(),
            label: "Table 1".into(),
            active: true,
        }],
        products: vec![Product {
            account_id: "bistro".into(),
            product_id: "soup".into(),
            name: "Soup".into(),
            price_cents: 650,
            available: true,
        }],
    };
    let store = Arc::new(MemoryStore::from_fixture(&fx));
    let sender = RecordingPushSender::new();
    Harness {
        service: OrderService::new(store.clone(), CartLimits::default()),
        dispatcher: Dispatcher::new(store.clone(), Arc::new(sender.clone())),
        store,
        sender,
    }
}

async fn place(h: &Harness) -> Order {
    let req = OrderRequest {
        lines: vec![RequestedLine {
            product_id: "soup".into(),
            quantity: 1,
            note: None,
        }],
        customer_note: None,
    };
    h.service.place_order("bistro", "t1", &req).await.unwrap().order
}

async fn subscribe(h: &Harness, audience: Audience, endpoint: &str) {
    h.store
        .add_subscription(NewSubscription {
            account_id: "bistro".into(),
            audience,
            endpoint: endpoint.into(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn second_dispatch_for_same_status_sends_nothing() {
    let h = harness();
    let order = place(&h).await;
    subscribe(&h, Audience::Staff { role: Role::Kitchen }, "https://push/kitchen-1").await;

    let first = h.dispatcher.dispatch(&order, OrderStatus::Pending).await.unwrap();
    assert!(!first.already_sent);
    assert_eq!(first.delivered, 1);

    let second = h.dispatcher.dispatch(&order, OrderStatus::Pending).await.unwrap();
    assert!(second.already_sent);
    assert_eq!(second.delivered, 0);

    assert_eq!(h.sender.sent().await.len(), 1);
}

#[tokio::test]
async fn racing_dispatchers_send_once() {
    let h = harness();
    let order = place(&h).await;
    subscribe(&h, Audience::Staff { role: Role::Waiter }, "https://push/waiter-1").await;
    subscribe(&h, Audience::Staff { role: Role::Kitchen }, "https://push/kitchen-1").await;

    let tasks = (0..10).map(|_| {
        let d = h.dispatcher.clone();
        let o = order.clone();
        tokio::spawn(async move { d.dispatch(&o, OrderStatus::Pending).await })
    });
    let reports: Vec<_> = futures_join(tasks).await;

    let winners = reports.iter().filter(|r| !r.already_sent).count();
    assert_eq!(winners, 1);
    assert_eq!(h.sender.sent().await.len(), 2);
}

async fn futures_join<I>(tasks: I) -> Vec<qrd_notify::DispatchReport>
where
    I: IntoIterator<Item = tokio::task::JoinHandle<anyhow::Result<qrd_notify::DispatchReport>>>,
{
    let mut out = Vec::new();
    for t in tasks {
        out.push(t.await.unwrap().unwrap());
    }
    out
}

#[tokio::test]
async fn audiences_follow_the_status() {
    let h = harness();
    let order = place(&h).await;
    let customer = Audience::Order {
        order_id: order.order_id,
    };
    subscribe(&h, customer, "https://push/customer").await;
    subscribe(&h, Audience::Staff { role: Role::Kitchen }, "https://push/kitchen").await;
    subscribe(&h, Audience::Staff { role: Role::Waiter }, "https://push/waiter").await;

    h.dispatcher.dispatch(&order, OrderStatus::Pending).await.unwrap();
    let pending: Vec<_> = h
        .sender
        .sent()
        .await
        .into_iter()
        .map(|(s, _)| s.endpoint)
        .collect();
    assert!(!pending.contains(&"https://push/customer".to_string()));
    assert_eq!(pending.len(), 2);

    let staff = Actor::Staff {
        account_id: "bistro".into(),
        role: Role::Admin,
    };
    h.service.advance(order.order_id, &staff, OrderStatus::Approved).await.unwrap();
    let ready = h
        .service
        .advance(order.order_id, &staff, OrderStatus::Ready)
        .await
        .unwrap()
        .order;

    let report = h.dispatcher.dispatch(&ready, OrderStatus::Ready).await.unwrap();
    assert_eq!(report.delivered, 2);

    let ready_endpoints: Vec<_> = h
        .sender
        .sent()
        .await
        .into_iter()
        .filter(|(_, m)| m.status == OrderStatus::Ready)
        .map(|(s, _)| s.endpoint)
        .collect();
    assert!(ready_endpoints.contains(&"https://push/customer".to_string()));
    assert!(ready_endpoints.contains(&"https://push/waiter".to_string()));
    assert!(!ready_endpoints.contains(&"https://push/kitchen".to_string()));
}

#[tokio::test]
async fn gone_subscriptions_are_pruned_and_failures_counted() {
    let h = harness();
    let order = place(&h).await;
    let kitchen = Audience::Staff { role: Role::Kitchen };
    subscribe(&h, kitchen, "https://push/old-tablet").await;
    subscribe(&h, kitchen, "https://push/flaky").await;
    subscribe(&h, kitchen, "https://push/good").await;
    h.sender.mark_gone("https://push/old-tablet").await;
    h.sender.mark_failing("https://push/flaky").await;

    let report = h.dispatcher.dispatch(&order, OrderStatus::Pending).await.unwrap();
    assert_eq!((report.delivered, report.pruned, report.failed), (1, 1, 1));

    let left: Vec<_> = h
        .store
        .subscriptions_for("bistro", &kitchen)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.endpoint)
        .collect();
    assert_eq!(left.len(), 2);
    assert!(!left.contains(&"https://push/old-tablet".to_string()));

    // The claim is spent even though one delivery failed.
    let again = h.dispatcher.dispatch(&order, OrderStatus::Pending).await.unwrap();
    assert!(again.already_sent);
}

// ---------------------------------------------------------------------------
// Store failures mid fan-out
// ---------------------------------------------------------------------------

/// Memory store whose prunes always fail and which cannot list one audience.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    unlistable: Option<Audience>,
}

#[async_trait]
impl OrderStore for FlakyStore {
    async fn account(&self, account_id: &str) -> anyhow::Result<Option<Account>> {
        self.inner.account(account_id).await
    }

    async fn table(&self, account_id: &str, table_id: &str) -> anyhow::Result<Option<Table>> {
        self.inner.table(account_id, table_id).await
    }

    async fn products(&self, account_id: &str, ids: &[String]) -> anyhow::Result<Vec<Product>> {
        self.inner.products(account_id, ids).await
    }

    async fn insert_order(&self, order: Order) -> OrderResult<Order> {
        self.inner.insert_order(order).await
    }

    async fn order(&self, order_id: Uuid) -> anyhow::Result<Option<Order>> {
        self.inner.order(order_id).await
    }

    async fn active_order_for_table(
        &self,
        account_id: &str,
        table_id: &str,
    ) -> anyhow::Result<Option<Order>> {
        self.inner.active_order_for_table(account_id, table_id).await
    }

    async fn list_orders(
        &self,
        account_id: &str,
        filter: &OrderFilter,
    ) -> anyhow::Result<Vec<Order>> {
        self.inner.list_orders(account_id, filter).await
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        expected_from: OrderStatus,
        to: OrderStatus,
        role: Role,
    ) -> OrderResult<Order> {
        self.inner.update_status(order_id, expected_from, to, role).await
    }

    async fn claim_notification(&self, order_id: Uuid, status: OrderStatus) -> OrderResult<bool> {
        self.inner.claim_notification(order_id, status).await
    }

    async fn add_subscription(&self, sub: NewSubscription) -> anyhow::Result<PushSubscription> {
        self.inner.add_subscription(sub).await
    }

    async fn subscription(&self, id: Uuid) -> anyhow::Result<Option<PushSubscription>> {
        self.inner.subscription(id).await
    }

    async fn subscriptions_for(
        &self,
        account_id: &str,
        audience: &Audience,
    ) -> anyhow::Result<Vec<PushSubscription>> {
        if self.unlistable.as_ref() == Some(audience) {
            anyhow::bail!("subscription index unavailable");
        }
        self.inner.subscriptions_for(account_id, audience).await
    }

    async fn remove_subscription(&self, _id: Uuid) -> anyhow::Result<bool> {
        anyhow::bail!("connection reset during delete")
    }
}

fn flaky_dispatcher(h: &Harness, unlistable: Option<Audience>) -> Dispatcher {
    let store = FlakyStore {
        inner: h.store.clone(),
        unlistable,
    };
    Dispatcher::new(Arc::new(store), Arc::new(h.sender.clone()))
}

#[tokio::test]
async fn failed_prune_does_not_stop_later_audiences() {
    let h = harness();
    let order = place(&h).await;
    subscribe(&h, Audience::Staff { role: Role::Kitchen }, "https://push/kitchen-gone").await;
    subscribe(&h, Audience::Staff { role: Role::Waiter }, "https://push/waiter").await;
    h.sender.mark_gone("https://push/kitchen-gone").await;

    let report = flaky_dispatcher(&h, None)
        .dispatch(&order, OrderStatus::Pending)
        .await
        .unwrap();
    assert!(!report.already_sent);
    assert_eq!((report.delivered, report.pruned, report.failed), (1, 0, 1));

    let endpoints: Vec<_> = h.sender.sent().await.into_iter().map(|(s, _)| s.endpoint).collect();
    assert_eq!(endpoints, vec!["https://push/waiter".to_string()]);
}

#[tokio::test]
async fn unlistable_audience_is_counted_and_skipped() {
    let h = harness();
    let order = place(&h).await;
    let kitchen = Audience::Staff { role: Role::Kitchen };
    subscribe(&h, kitchen, "https://push/kitchen").await;
    subscribe(&h, Audience::Staff { role: Role::Waiter }, "https://push/waiter").await;

    let report = flaky_dispatcher(&h, Some(kitchen))
        .dispatch(&order, OrderStatus::Pending)
        .await
        .unwrap();
    assert_eq!((report.delivered, report.failed), (1, 1));

    // The claim is spent; a retry does not reach the kitchen either.
    let again = h.dispatcher.dispatch(&order, OrderStatus::Pending).await.unwrap();
    assert!(again.already_sent);
}
