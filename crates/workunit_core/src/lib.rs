//! Transactional unit of work over an abstract store, with a SQLite backend.
//! `uow` owns the batching/commit protocol; `db` is one store it can drive.

pub mod context;
pub mod db;
pub mod logging;
pub mod model;
pub mod store;
pub mod uow;

pub use context::{CancelHandle, CommitContext, ContextError};
pub use db::record::{
    ColumnDef, EntityDescriptor, EntityRef, Filter, Model, Record, RecordId, RelationLoader,
    Tracked, ValidationError,
};
pub use db::store::{SqliteStore, StoreError, StoreResult};
pub use db::{DbError, StoreConfig};
pub use logging::{default_log_level, init_logging, init_stderr_logging, logging_status};
pub use model::{Customer, Order, OrderStatus};
pub use store::{DeleteTarget, StoreTx, TransactionalStore};
pub use uow::{CommitScope, Hook, Operation, PendingCounts, UnitOfWork};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
