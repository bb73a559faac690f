//! Order service: placing orders and moving them through the state machine.
//!
//! Side effects beyond the store (bus publication, push dispatch) belong to
//! the caller. Every method here returns enough to drive them: the stored
//! order and, for status changes, the previous status and whether anything
//! changed at all.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use qrd_schemas::{Order, OrderStatus, Role, StatusChange};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cart::{price_order, CartLimits, OrderRequest};
use crate::error::{OrderError, OrderResult};
use crate::store::{OrderFilter, OrderStore};
use crate::transition::{allowed_targets, check_transition, Transition};

/// The caller of an order operation, as established upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Staff { account_id: String, role: Role },
    Customer { token: Option<Uuid> },
}

impl Actor {
    pub fn role(&self) -> Role {
        match self {
            Actor::Staff { role, .. } => *role,
            Actor::Customer { .. } => Role::Customer,
        }
    }

    pub fn is_staff_of(&self, account_id: &str) -> bool {
        matches!(self, Actor::Staff { account_id: a, .. } if a == account_id)
    }

    /// Staff of the order's account, or the customer holding its token.
    pub fn can_access(&self, order: &Order) -> bool {
        match self {
            Actor::Staff { account_id, .. } => *account_id == order.account_id,
            Actor::Customer { token } => *token == Some(order.customer_token),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    pub customer_token: Uuid,
}

#[derive(Debug, Clone)]
pub struct Advance {
    pub order: Order,
    pub previous: OrderStatus,
    /// `false` when the order already had the requested status.
    pub changed: bool,
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    limits: CartLimits,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>, limits: CartLimits) -> Self {
        Self { store, limits }
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    /// Create a `pending` order for a table from a customer cart.
    pub async fn place_order(
        &self,
        account_id: &str,
        table_id: &str,
        request: &OrderRequest,
    ) -> OrderResult<PlacedOrder> {
        let account = self
            .store
            .account(account_id)
            .await?
            .ok_or_else(|| OrderError::AccountNotFound(account_id.to_string()))?;
        if !account.ordering_enabled {
            return Err(OrderError::OrderingDisabled(account_id.to_string()));
        }

        let table = self
            .store
            .table(account_id, table_id)
            .await?
            .ok_or_else(|| OrderError::TableNotFound(table_id.to_string()))?;
        if !table.active {
            return Err(OrderError::TableInactive(table_id.to_string()));
        }

        let mut ids: Vec<String> = request.lines.iter().map(|l| l.product_id.clone()).collect();
        ids.sort();
        ids.dedup();
        let menu: HashMap<String, _> = self
            .store
            .products(account_id, &ids)
            .await?
            .into_iter()
            .map(|p| (p.product_id.clone(), p))
            .collect();

        let priced = price_order(request, &menu, self.limits)?;

        let now = Utc::now();
        let customer_token = Uuid::new_v4();
        let order = Order {
            order_id: Uuid::new_v4(),
            account_id: account.account_id,
            table_id: table.table_id,
            table_label: table.label,
            lines: priced.lines,
            total_cents: priced.total_cents,
            status: OrderStatus::Pending,
            customer_note: priced.customer_note,
            notified_statuses: Vec::new(),
            history: vec![StatusChange {
                status: OrderStatus::Pending,
                role: Role::Customer,
                at_utc: now,
            }],
            created_at_utc: now,
            updated_at_utc: now,
            customer_token,
        };

        let order = self.store.insert_order(order).await?;
        info!(
            order_id = %order.order_id,
            account_id = %order.account_id,
            table_id = %order.table_id,
            total_cents = order.total_cents,
            "order placed"
        );

        Ok(PlacedOrder {
            order,
            customer_token,
        })
    }

    /// Load an order the actor may see.
    pub async fn view(&self, order_id: Uuid, actor: &Actor) -> OrderResult<Order> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))?;
        if !actor.can_access(&order) {
            return Err(OrderError::AccessDenied(order_id));
        }
        Ok(order)
    }

    /// Statuses the actor may move this order to right now.
    pub async fn transitions(&self, order_id: Uuid, actor: &Actor) -> OrderResult<Vec<OrderStatus>> {
        let order = self.view(order_id, actor).await?;
        Ok(allowed_targets(order.status, actor.role()))
    }

    /// Request `to` on behalf of `actor`.
    pub async fn advance(&self, order_id: Uuid, actor: &Actor, to: OrderStatus) -> OrderResult<Advance> {
        let order = self.view(order_id, actor).await?;
        let role = actor.role();

        let from = match check_transition(order.status, to, role)? {
            Transition::Unchanged => {
                debug!(order_id = %order_id, status = %to, "status unchanged");
                return Ok(Advance {
                    previous: order.status,
                    order,
                    changed: false,
                });
            }
            Transition::Apply { from, .. } => from,
        };

        match self.store.update_status(order_id, from, to, role).await {
            Ok(updated) => {
                info!(
                    order_id = %order_id,
                    from = %from,
                    to = %to,
                    role = %role,
                    "order status changed"
                );
                Ok(Advance {
                    order: updated,
                    previous: from,
                    changed: true,
                })
            }
            // Someone else got there first with the same target.
            Err(OrderError::StatusConflict { current }) if current == to => {
                let order = self.view(order_id, actor).await?;
                Ok(Advance {
                    previous: current,
                    order,
                    changed: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Dashboard listing / polling; staff of the account only.
    pub async fn list(
        &self,
        account_id: &str,
        actor: &Actor,
        filter: &OrderFilter,
    ) -> OrderResult<Vec<Order>> {
        if !actor.is_staff_of(account_id) {
            return Err(OrderError::AccountAccessDenied(account_id.to_string()));
        }
        Ok(self.store.list_orders(account_id, filter).await?)
    }

    pub async fn active_order(&self, account_id: &str, table_id: &str) -> OrderResult<Option<Order>> {
        Ok(self.store.active_order_for_table(account_id, table_id).await?)
    }
}
