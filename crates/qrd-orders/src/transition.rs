//! Order status state machine.
//!
//! # Design
//!
//! Every status change requested by a dashboard or a customer is checked by
//! [`check_transition`] before anything is written. Two invariants hold:
//!
//! 1. **Legal transitions only.** Pairs outside the table below return
//!    [`TransitionError::Illegal`]. Terminal statuses have no exits.
//! 2. **Role gated.** A legal pair requested by a role not listed for it
//!    returns [`TransitionError::Forbidden`].
//!
//! Re-requesting the current status is [`Transition::Unchanged`]: callers
//! write nothing, publish nothing and notify nobody.
//!
//! # State diagram
//!
//! ```text
//!   pending ──approve──► approved ──ready──► ready ──serve──► served (term.)
//!      │                    │
//!      └──────cancel────────┴──────────► cancelled (term.)
//! ```
//!
//! | from     | to        | roles                            |
//! |----------|-----------|----------------------------------|
//! | pending  | approved  | admin, waiter, kitchen           |
//! | approved | ready     | admin, kitchen                   |
//! | ready    | served    | admin, waiter                    |
//! | pending  | cancelled | admin, waiter, kitchen, customer |
//! | approved | cancelled | admin, waiter, kitchen           |

use qrd_schemas::{OrderStatus, Role};
use thiserror::Error;

/// Outcome of a successful check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The order moves `from` → `to`.
    Apply { from: OrderStatus, to: OrderStatus },
    /// Requested status equals the current one.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal order transition: {from} -> {to}")]
    Illegal { from: OrderStatus, to: OrderStatus },

    #[error("role {role} may not move an order {from} -> {to}")]
    Forbidden {
        from: OrderStatus,
        to: OrderStatus,
        role: Role,
    },
}

/// Roles allowed to perform `from -> to`, or `None` if the pair is illegal.
fn allowed_roles(from: OrderStatus, to: OrderStatus) -> Option<&'static [Role]> {
    use OrderStatus::*;
    use Role::*;

    match (from, to) {
        (Pending, Approved) => Some(&[Admin, Waiter, Kitchen]),
        (Approved, Ready) => Some(&[Admin, Kitchen]),
        (Ready, Served) => Some(&[Admin, Waiter]),
        (Pending, Cancelled) => Some(&[Admin, Waiter, Kitchen, Customer]),
        (Approved, Cancelled) => Some(&[Admin, Waiter, Kitchen]),
        _ => None,
    }
}

/// Validate a requested status change for `role`.
pub fn check_transition(
    from: OrderStatus,
    to: OrderStatus,
    role: Role,
) -> Result<Transition, TransitionError> {
    if from == to {
        return Ok(Transition::Unchanged);
    }

    let roles = allowed_roles(from, to).ok_or(TransitionError::Illegal { from, to })?;
    if !roles.contains(&role) {
        return Err(TransitionError::Forbidden { from, to, role });
    }

    Ok(Transition::Apply { from, to })
}

/// Statuses `role` may move an order in `from` to, in lifecycle order.
pub fn allowed_targets(from: OrderStatus, role: Role) -> Vec<OrderStatus> {
    OrderStatus::ALL
        .into_iter()
        .filter(|to| matches!(allowed_roles(from, *to), Some(roles) if roles.contains(&role)))
        .collect()
}
