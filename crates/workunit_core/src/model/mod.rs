//! Reference entities persisted through the SQLite store.
//!
//! # Responsibility
//! - Define the customer/order shapes the demo driver and tests batch.
//! - Map them onto tables via `Record` and `Model`.
//!
//! # Invariants
//! - Every entity is identified by a database-assigned `RecordId`.
//! - An order always references an existing customer.

pub mod customer;
pub mod order;

pub use customer::Customer;
pub use order::{Order, OrderStatus};

use crate::db::record::EntityDescriptor;

/// Descriptors for every reference entity, in dependency order.
pub fn all_entities() -> [&'static EntityDescriptor; 2] {
    [&customer::CUSTOMERS, &order::ORDERS]
}
