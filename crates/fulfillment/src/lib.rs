//! The three participants of the order fulfillment choreography.
//!
//! - [`OrderLifecycle`] owns order status, creates orders and reacts to
//!   reservation and settlement outcomes
//! - [`InventoryReservation`] reserves stock for `order.created`
//! - [`PaymentCapture`] records a payment for `inventory.locked`
//!
//! Each participant implements [`broker::MessageHandler`] and is driven by a
//! [`broker::Consumer`]. Every handler is idempotent per order, so at-least-once
//! delivery and the stale-order [`reaper`] are safe.

pub mod error;
pub mod inventory;
pub mod order_lifecycle;
pub mod payment;
pub mod reaper;
pub mod retry;

pub use error::{FulfillmentError, Result};
pub use inventory::InventoryReservation;
pub use order_lifecycle::{LifecycleConfig, OrderLifecycle};
pub use payment::PaymentCapture;
pub use reaper::{ReaperConfig, run_reaper};
pub use retry::default_store_retry;
