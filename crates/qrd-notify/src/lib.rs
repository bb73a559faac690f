//! qrd-notify
//!
//! Push notifications for order status changes:
//! - `message`: audiences per status and the text each audience receives
//! - `sender`: the `PushSender` transport trait and its implementations
//! - `dispatcher`: claim-then-send fan-out, once per (order, status)

pub mod dispatcher;
pub mod message;
pub mod sender;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use message::{audiences_for, PushMessage};
pub use sender::{Delivery, LogPushSender, PushSender, RecordingPushSender, RelayPushSender};
