//! Transactional store abstraction the unit of work applies changes through.
//!
//! # Responsibility
//! - Define the narrow capability a storage backend must offer: run a body
//!   atomically and, inside it, create / upsert / delete entities.
//! - Keep the coordinator free of any concrete driver type.
//!
//! # Invariants
//! - Everything a body does through its `StoreTx` is applied or rolled back
//!   as one unit.
//! - An error returned by the body is returned by `run_in_transaction`.
//!
//! # See also
//! - `crate::db::store::SqliteStore` for the SQLite implementation.

use crate::context::{CommitContext, ContextError};
use std::error::Error;

/// What a queued delete points at.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteTarget<E, C> {
    /// Delete the row backing this entity (by identity).
    Entity(E),
    /// Delete every row matching a store-defined condition.
    Matching(C),
}

/// A storage backend able to run a body inside one atomic transaction.
pub trait TransactionalStore: Send + Sync {
    /// Opaque, cheaply cloneable reference to an entity.
    type Entity: Clone + Send + Sync + 'static;
    /// Store-defined condition for bulk deletes.
    type Condition: Clone + Send + Sync + 'static;
    /// Transaction failure. Context expiry must be representable.
    type Error: Error + From<ContextError> + Send + Sync + 'static;

    /// Opens one transaction scoped to `ctx` and runs `body` inside it.
    ///
    /// Commits when `body` returns `Ok`, rolls back otherwise and returns the
    /// body's error.
    fn run_in_transaction(
        &self,
        ctx: &CommitContext,
        body: &mut dyn FnMut(&mut dyn StoreTx<Self>) -> Result<(), Self::Error>,
    ) -> Result<(), Self::Error>;
}

/// Operations available on a live transaction.
pub trait StoreTx<S: TransactionalStore + ?Sized> {
    /// Inserts a new entity. Backends may assign identity onto it.
    fn create(&mut self, entity: &S::Entity) -> Result<(), S::Error>;

    /// Upserts by identity: inserts when absent, updates when present.
    fn save(&mut self, entity: &S::Entity) -> Result<(), S::Error>;

    fn delete_matching(
        &mut self,
        target: &DeleteTarget<S::Entity, S::Condition>,
    ) -> Result<(), S::Error>;
}
