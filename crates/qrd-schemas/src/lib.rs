//! Shared document and wire types for the ordering service.
//!
//! Everything here is plain data: `Serialize + Deserialize`, no IO and no
//! business rules beyond small classification helpers on the enums.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a single table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Approved,
    Ready,
    Served,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Approved,
        OrderStatus::Ready,
        OrderStatus::Served,
        OrderStatus::Cancelled,
    ];

    /// Statuses that occupy the table.
    pub const ACTIVE: [OrderStatus; 3] = [
        OrderStatus::Pending,
        OrderStatus::Approved,
        OrderStatus::Ready,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Approved => "approved",
            OrderStatus::Ready => "ready",
            OrderStatus::Served => "served",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(OrderStatus::Pending),
            "approved" => Some(OrderStatus::Approved),
            "ready" => Some(OrderStatus::Ready),
            "served" => Some(OrderStatus::Served),
            "cancelled" | "canceled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Served | OrderStatus::Cancelled)
    }

    /// An active order blocks new orders on the same table.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UnknownVariant {
            kind: "order status",
            value: s.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Who is acting on an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Kitchen,
    Waiter,
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Kitchen => "kitchen",
            Role::Waiter => "waiter",
            Role::Customer => "customer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "kitchen" => Some(Role::Kitchen),
            "waiter" => Some(Role::Waiter),
            "customer" => Some(Role::Customer),
            _ => None,
        }
    }

    pub fn is_staff(&self) -> bool {
        !matches!(self, Role::Customer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UnknownVariant {
            kind: "role",
            value: s.to_string(),
        })
    }
}

/// Returned by the `FromStr` impls above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

// ---------------------------------------------------------------------------
// Menu / venue documents (owned by the admin surface; read-only here)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub ordering_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub account_id: String,
    pub table_id: String,
    pub label: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub account_id: String,
    pub product_id: String,
    pub name: String,
    pub price_cents: i64,
    #[serde(default = "default_true")]
    pub available: bool,
}

fn default_true() -> bool {
    true
}

/// Seed bundle for local development and the in-memory store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuFixture {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub products: Vec<Product>,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// One priced line of an order. Prices are copied from the menu at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl OrderLine {
    pub fn line_total_cents(&self) -> Option<i64> {
        self.unit_price_cents.checked_mul(i64::from(self.quantity))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub role: Role,
    pub at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub account_id: String,
    pub table_id: String,
    pub table_label: String,
    pub lines: Vec<OrderLine>,
    pub total_cents: i64,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_note: Option<String>,
    /// Statuses whose push notification has already been claimed.
    #[serde(default)]
    pub notified_statuses: Vec<OrderStatus>,
    #[serde(default)]
    pub history: Vec<StatusChange>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
    /// Capability held by the ordering browser. Never leaves the server
    /// inside an order payload.
    #[serde(skip)]
    pub customer_token: Uuid,
}

impl Order {
    pub fn has_notified(&self, status: OrderStatus) -> bool {
        self.notified_statuses.contains(&status)
    }
}

// ---------------------------------------------------------------------------
// OrderEvent: what the UI and notification layers observe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderEvent {
    Created {
        order: Order,
    },
    StatusChanged {
        order: Order,
        previous: OrderStatus,
    },
}

impl OrderEvent {
    pub fn order(&self) -> &Order {
        match self {
            OrderEvent::Created { order } | OrderEvent::StatusChanged { order, .. } => order,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.order().account_id
    }

    pub fn order_id(&self) -> Uuid {
        self.order().order_id
    }

    /// The status whose notification this event should trigger.
    pub fn status(&self) -> OrderStatus {
        self.order().status
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            OrderEvent::Created { .. } => "order_created",
            OrderEvent::StatusChanged { .. } => "order_status_changed",
        }
    }
}

// ---------------------------------------------------------------------------
// Push subscriptions
// ---------------------------------------------------------------------------

/// Who a push subscription listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Audience {
    /// Every device of a staff role in the account.
    Staff { role: Role },
    /// The customer device(s) following one order.
    Order { order_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub subscription_id: Uuid,
    pub account_id: String,
    pub audience: Audience,
    /// Push service endpoint handed out by the browser.
    pub endpoint: String,
    pub created_at_utc: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for s in OrderStatus::ALL {
            assert_eq!(OrderStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(OrderStatus::parse(" Canceled "), Some(OrderStatus::Cancelled));
        assert!("bogus".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn only_served_and_cancelled_are_terminal() {
        let terminal: Vec<_> = OrderStatus::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![OrderStatus::Served, OrderStatus::Cancelled]);
        assert!(OrderStatus::ACTIVE.iter().all(|s| s.is_active()));
    }

    #[test]
    fn customer_token_is_not_serialized() {
        let now = Utc::now();
        let order = Order {
            order_id: Uuid::new_v4(),
            account_id: "acct".into(),
            table_id: "t1".into(),
            table_label: "Table 1".into(),
            lines: vec![],
            total_cents: 0,
            status: OrderStatus::Pending,
            customer_note: None,
            notified_statuses: vec![],
            history: vec![],
            created_at_utc: now,
            updated_at_utc: now,
            customer_token: Uuid::new_v4(),
        };
        let json = serde_json::to_value(&order).unwrap();
        assert!(json.get("customer_token").is_none());
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn fixture_defaults_flags_to_true() {
        let yaml = r#"
accounts:
  - account_id: bistro
    name: Bistro
tables:
  - account_id: bistro
    table_id: t1
    label: Table 1
products:
  - account_id: bistro
    product_id: soup
    name: Soup
    price_cents: 650
"#;
        let fx: MenuFixture = serde_yaml::from_str(yaml).unwrap();
        assert!(fx.accounts[0].ordering_enabled);
        assert!(fx.tables[0].active);
        assert!(fx.products[0].available);
    }
}
