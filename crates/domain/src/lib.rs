//! Domain layer for order fulfillment.
//!
//! This crate provides:
//! - The order model and its status state machine
//! - Inventory and payment records
//! - Store capability traits (`OrderStore`, `InventoryStore`, `PaymentStore`, `OrderCache`)
//! - Validation and store error types

pub mod cache;
pub mod error;
pub mod inventory;
pub mod order;
pub mod payment;
pub mod store;

pub use cache::{OrderCache, cache_key};
pub use error::{CacheError, StoreError, ValidationError};
pub use inventory::{
    DecrementOutcome, InventoryRecord, Reservation, ReservationLine, ReservationOutcome,
};
pub use order::{Order, OrderItem, OrderStatus};
pub use payment::{PaymentInsert, PaymentRecord};
pub use store::{InventoryStore, OrderStore, PaymentStore, TransitionOutcome};
