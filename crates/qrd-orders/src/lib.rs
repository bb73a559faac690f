//! qrd-orders
//!
//! The order lifecycle core:
//! - `transition`: legal status changes and the roles allowed to make them
//! - `cart`: menu-priced validation of a customer cart
//! - `store`: the persistence seam (+ in-memory implementation)
//! - `service`: placing, viewing and advancing orders on top of a store
//!
//! Bus publication and push dispatch live in the daemon; `service` returns
//! what changed so the caller can propagate it.

pub mod cart;
pub mod error;
pub mod service;
pub mod store;
pub mod transition;

pub use cart::{CartLimits, OrderRequest, PricedOrder, RequestedLine};
pub use error::{OrderError, OrderResult};
pub use service::{Actor, Advance, OrderService, PlacedOrder};
pub use store::{InvalidCursor, MemoryStore, NewSubscription, OrderCursor, OrderFilter, OrderStore};
pub use transition::{allowed_targets, check_transition, Transition, TransitionError};
