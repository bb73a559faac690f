//! Who hears about a status, and what they are told.

use qrd_schemas::{Audience, Order, OrderStatus, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audiences notified when an order enters `status`.
pub fn audiences_for(status: OrderStatus, order_id: Uuid) -> Vec<Audience> {
    let customer = Audience::Order { order_id };
    let kitchen = Audience::Staff { role: Role::Kitchen };
    let waiter = Audience::Staff { role: Role::Waiter };

    match status {
        OrderStatus::Pending => vec![kitchen, waiter],
        OrderStatus::Approved => vec![customer, kitchen],
        OrderStatus::Ready => vec![customer, waiter],
        OrderStatus::Served => vec![customer],
        OrderStatus::Cancelled => vec![customer, kitchen, waiter],
    }
}

/// Payload delivered to a device through the push relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    /// Relative deep link the notification opens.
    pub url: String,
    /// Collapses repeated notifications for the same order/status on device.
    pub tag: String,
    pub order_id: Uuid,
    pub status: OrderStatus,
}

impl PushMessage {
    pub fn for_audience(order: &Order, status: OrderStatus, audience: &Audience) -> Self {
        let table = &order.table_label;
        let (title, body, url) = match audience {
            Audience::Order { .. } => {
                let body = match status {
                    OrderStatus::Pending => "We received your order.".to_string(),
                    OrderStatus::Approved => "Your order was accepted and is being prepared.".to_string(),
                    OrderStatus::Ready => "Your order is ready.".to_string(),
                    OrderStatus::Served => "Enjoy your meal!".to_string(),
                    OrderStatus::Cancelled => "Your order was cancelled.".to_string(),
                };
                (
                    format!("Order update · {table}"),
                    body,
                    format!("/order/{}", order.order_id),
                )
            }
            Audience::Staff { role } => {
                let items: u32 = order.lines.iter().map(|l| l.quantity).sum();
                let title = match status {
                    OrderStatus::Pending => format!("New order · {table}"),
                    OrderStatus::Approved => format!("Order approved · {table}"),
                    OrderStatus::Ready => format!("Ready to serve · {table}"),
                    OrderStatus::Served => format!("Served · {table}"),
                    OrderStatus::Cancelled => format!("Order cancelled · {table}"),
                };
                (
                    title,
                    format!("{items} item(s), total {}", format_cents(order.total_cents)),
                    format!("/dashboard/{}/{}", role.as_str(), order.order_id),
                )
            }
        };

        Self {
            title,
            body,
            url,
            tag: format!("order-{}-{}", order.order_id, status.as_str()),
            order_id: order.order_id,
            status,
        }
    }
}

fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use qrd_schemas::OrderLine;

    fn order() -> Order {
        let now = Utc::now();
        Order {
            order_id: Uuid::new_v4(),
            account_id: "bistro".into(),
            table_id: "t4".into(),
            table_label: "Table 4".into(),
            lines: vec![OrderLine {
                product_id: "soup".into(),
                name: "Soup".into(),
                unit_price_cents: 650,
                quantity: 3,
                note: None,
            }],
            total_cents: 1950,
            status: OrderStatus::Pending,
            customer_note: None,
            notified_statuses: vec![],
            history: vec![],
            created_at_utc: now,
            updated_at_utc: now,
            customer_token: Uuid::new_v4(),
        }
    }

    #[test]
    fn new_orders_go_to_staff_only() {
        let id = Uuid::new_v4();
        let a = audiences_for(OrderStatus::Pending, id);
        assert!(a.iter().all(|x| matches!(x, Audience::Staff { .. })));
        assert!(audiences_for(OrderStatus::Ready, id).contains(&Audience::Order { order_id: id }));
    }

    #[test]
    fn staff_message_summarises_order() {
        let o = order();
        let m = PushMessage::for_audience(&o, OrderStatus::Pending, &Audience::Staff { role: Role::Kitchen });
        assert_eq!(m.title, "New order · Table 4");
        assert_eq!(m.body, "3 item(s), total 19.50");
        assert_eq!(m.url, format!("/dashboard/kitchen/{}", o.order_id));
        assert_eq!(m.tag, format!("order-{}-pending", o.order_id));
    }

    #[test]
    fn customer_message_links_to_order_page() {
        let o = order();
        let m = PushMessage::for_audience(
            &o,
            OrderStatus::Ready,
            &Audience::Order { order_id: o.order_id },
        );
        assert_eq!(m.body, "Your order is ready.");
        assert_eq!(m.url, format!("/order/{}", o.order_id));
    }

    #[test]
    fn cents_formatting() {
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(12345), "123.45");
        assert_eq!(format_cents(-250), "-2.50");
    }
}
