use qrd_schemas::OrderStatus;
use thiserror::Error;
use uuid::Uuid;

use crate::transition::TransitionError;

/// Domain error for everything that touches an order.
///
/// The daemon maps each variant onto an HTTP status; the CLI prints it.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("ordering is disabled for account {0}")]
    OrderingDisabled(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table {0} is not accepting orders")]
    TableInactive(String),

    #[error("order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("order has no lines")]
    EmptyOrder,

    #[error("too many order lines: {count} (max {max})")]
    TooManyLines { count: usize, max: usize },

    #[error("invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: String, quantity: u32 },

    #[error("product unavailable: {0}")]
    ProductUnavailable(String),

    #[error("table already has an active order: {order_id}")]
    ActiveOrderExists { order_id: Uuid },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("order status changed concurrently; now {current}")]
    StatusConflict { current: OrderStatus },

    #[error("not permitted to access order {0}")]
    AccessDenied(Uuid),

    #[error("not permitted to act on account {0}")]
    AccountAccessDenied(String),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

pub type OrderResult<T> = Result<T, OrderError>;
