//! Store implementations for the fulfillment services.
//!
//! This crate provides:
//! - In-memory stores with atomic stock counters and fault injection for tests
//! - PostgreSQL stores built on `sqlx`
//! - An in-memory expiring order cache
//! - The default product catalogue

pub mod cache;
pub mod memory;
pub mod postgres;
pub mod seed;

pub use cache::InMemoryOrderCache;
pub use memory::{InMemoryInventoryStore, InMemoryOrderStore, InMemoryPaymentStore};
pub use postgres::{PgInventoryStore, PgOrderStore, PgPaymentStore, connect, run_migrations};
pub use seed::{default_catalogue, seed_if_empty};
pub use sqlx::PgPool;
