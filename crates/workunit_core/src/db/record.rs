//! Entity contracts for the SQLite store.
//!
//! # Responsibility
//! - Describe how a Rust type maps onto one table (`EntityDescriptor`).
//! - Provide the shared handles the unit of work queues (`EntityRef`) and the
//!   typed handles callers keep (`Tracked<T>`).
//! - Express equality filters for lookups and conditional deletes.
//!
//! # Invariants
//! - Every table has an `INTEGER PRIMARY KEY` column named `id`.
//! - `Record::values` returns one value per `EntityDescriptor::columns`
//!   entry, in the same order.

use super::store::{select_records, StoreError, StoreResult};
use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Row identity assigned by the database.
pub type RecordId = i64;

/// Name of the primary key column of every entity table.
pub const ID_COLUMN: &str = "id";

/// One non-key column: its name and SQLite declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    /// Type and constraints, e.g. `TEXT NOT NULL UNIQUE`.
    pub decl: &'static str,
}

impl ColumnDef {
    pub const fn new(name: &'static str, decl: &'static str) -> Self {
        Self { name, decl }
    }
}

/// Static table shape for one entity type.
#[derive(Debug, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub table: &'static str,
    /// Columns other than `id`, in `Record::values` order.
    pub columns: &'static [ColumnDef],
    /// Columns that get a secondary index.
    pub indexes: &'static [&'static str],
    /// Relation names accepted by `Model::preload`.
    pub relations: &'static [&'static str],
}

impl EntityDescriptor {
    pub fn has_column(&self, name: &str) -> bool {
        name == ID_COLUMN || self.columns.iter().any(|column| column.name == name)
    }

    pub fn has_relation(&self, name: &str) -> bool {
        self.relations.contains(&name)
    }
}

/// Field-level validation failure raised before a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub table: &'static str,
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(table: &'static str, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            table,
            field,
            message: message.into(),
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}.{}: {}", self.table, self.field, self.message)
    }
}

impl Error for ValidationError {}

/// Write-side view of an entity, usable behind `dyn`.
pub trait Record: Send + 'static {
    fn descriptor(&self) -> &'static EntityDescriptor;
    fn id(&self) -> Option<RecordId>;
    /// Called after an insert without explicit id.
    fn assign_id(&mut self, id: RecordId);
    fn values(&self) -> Vec<Value>;

    /// Checked before every insert or upsert.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Called with the current epoch milliseconds before every write.
    fn touch(&mut self, _now_ms: i64) {}
}

/// Read-side view of an entity.
pub trait Model: Record + Sized {
    fn entity() -> &'static EntityDescriptor;

    fn from_row(row: &Row<'_>) -> StoreResult<Self>;

    /// Loads one named relation onto `self`.
    fn preload(&mut self, relation: &str, _loader: &RelationLoader<'_>) -> StoreResult<()> {
        Err(StoreError::UnknownRelation {
            table: Self::entity().table,
            relation: relation.to_string(),
        })
    }
}

/// Type-erased shared entity handle queued on a unit of work.
#[derive(Clone)]
pub struct EntityRef(Arc<Mutex<dyn Record>>);

impl EntityRef {
    pub fn new<T: Record>(record: T) -> Self {
        Self::from(Tracked::new(record))
    }

    pub fn table(&self) -> &'static str {
        self.with_record_mut(|record| record.descriptor().table)
    }

    pub fn id(&self) -> Option<RecordId> {
        self.with_record_mut(|record| record.id())
    }

    /// True when both handles point at the same entity.
    pub fn same_entity(&self, other: &EntityRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn with_record_mut<R>(&self, f: impl FnOnce(&mut dyn Record) -> R) -> R {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    }
}

impl Debug for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0.try_lock() {
            Ok(record) => f
                .debug_struct("EntityRef")
                .field("table", &record.descriptor().table)
                .field("id", &record.id())
                .finish(),
            Err(_) => f.write_str("EntityRef(<locked>)"),
        }
    }
}

/// Typed handle to an entity that may also be queued as an `EntityRef`.
///
/// Ids assigned on insert are visible through every clone.
pub struct Tracked<T: Record>(Arc<Mutex<T>>);

impl<T: Record> Tracked<T> {
    pub fn new(record: T) -> Self {
        Self(Arc::new(Mutex::new(record)))
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.lock())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn id(&self) -> Option<RecordId> {
        self.lock().id()
    }

    /// Clones the current value out of the handle.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.lock().clone()
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::from(self)
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Record> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Record + Debug> Debug for Tracked<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0.try_lock() {
            Ok(record) => f.debug_tuple("Tracked").field(&*record).finish(),
            Err(_) => f.write_str("Tracked(<locked>)"),
        }
    }
}

impl<T: Record> From<&Tracked<T>> for EntityRef {
    fn from(value: &Tracked<T>) -> Self {
        let shared: Arc<Mutex<dyn Record>> = value.0.clone();
        Self(shared)
    }
}

impl<T: Record> From<Tracked<T>> for EntityRef {
    fn from(value: Tracked<T>) -> Self {
        let shared: Arc<Mutex<dyn Record>> = value.0;
        Self(shared)
    }
}

/// Conjunction of `column = value` clauses against one entity table.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    entity: &'static EntityDescriptor,
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// Empty filter for `T`'s table.
    pub fn on<T: Model>() -> Self {
        Self::for_entity(T::entity())
    }

    pub fn for_entity(entity: &'static EntityDescriptor) -> Self {
        Self {
            entity,
            clauses: Vec::new(),
        }
    }

    pub fn by_id<T: Model>(id: RecordId) -> Self {
        Self::on::<T>().eq(ID_COLUMN, id)
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.clauses.push((column.to_string(), value.into()));
        self
    }

    pub fn entity(&self) -> &'static EntityDescriptor {
        self.entity
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Renders `a = ?1 AND b = ?2` plus its bind values.
    pub(crate) fn where_sql(&self) -> StoreResult<(String, Vec<Value>)> {
        let mut parts = Vec::with_capacity(self.clauses.len());
        let mut values = Vec::with_capacity(self.clauses.len());
        for (index, (column, value)) in self.clauses.iter().enumerate() {
            if !self.entity.has_column(column) {
                return Err(StoreError::UnknownColumn {
                    table: self.entity.table,
                    column: column.clone(),
                });
            }
            parts.push(format!("{column} = ?{}", index + 1));
            values.push(value.clone());
        }
        Ok((parts.join(" AND "), values))
    }
}

/// Query access handed to `Model::preload`.
pub struct RelationLoader<'conn> {
    conn: &'conn Connection,
}

impl<'conn> RelationLoader<'conn> {
    pub(crate) fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Loads every `C` whose `foreign_key` column equals `parent_id`, by id.
    pub fn children<C: Model>(&self, foreign_key: &str, parent_id: RecordId) -> StoreResult<Vec<C>> {
        let filter = Filter::on::<C>().eq(foreign_key, parent_id);
        select_records::<C>(self.conn, &filter, None)
    }
}
