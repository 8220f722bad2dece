//! SQLite implementation of `TransactionalStore`.
//!
//! # Responsibility
//! - Run unit-of-work bodies inside `IMMEDIATE` transactions.
//! - Translate entity creates, upserts and deletes into SQL.
//! - Serve point lookups with optional relation preloading.
//!
//! # Invariants
//! - One connection, guarded by a mutex; transactions never interleave.
//! - A cancelled or expired context interrupts running statements and is
//!   reported as `StoreError::Context`.
//! - A conditional delete always carries at least one clause.

use super::open::configure_connection;
use super::record::{EntityDescriptor, EntityRef, Filter, Model, Record, RecordId, RelationLoader};
use super::record::{ValidationError, ID_COLUMN};
use super::{open_db, open_db_in_memory, schema, validate_identifier, DbError, StoreConfig};
use crate::context::{CommitContext, ContextError};
use crate::store::{DeleteTarget, StoreTx, TransactionalStore};
use crate::uow::UnitOfWork;
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by the SQLite store.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// The commit or query context was cancelled or expired.
    Context(ContextError),
    /// A record rejected its own field values.
    Validation(ValidationError),
    /// Delete-by-entity on a record that was never persisted.
    MissingId { table: &'static str },
    UnknownColumn { table: &'static str, column: String },
    /// A conditional delete without any clause.
    UnboundedDelete { table: &'static str },
    UnknownRelation { table: &'static str, relation: String },
    /// A filter built for one table was used to load another.
    FilterMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl StoreError {
    /// True for UNIQUE, NOT NULL, FOREIGN KEY and CHECK violations.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(failure, _)))
                if failure.code == ErrorCode::ConstraintViolation
        )
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Context(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::MissingId { table } => {
                write!(f, "cannot delete {table} record without id")
            }
            Self::UnknownColumn { table, column } => {
                write!(f, "unknown column `{column}` on table `{table}`")
            }
            Self::UnboundedDelete { table } => {
                write!(f, "refusing to delete from `{table}` without conditions")
            }
            Self::UnknownRelation { table, relation } => {
                write!(f, "unknown relation `{relation}` on table `{table}`")
            }
            Self::FilterMismatch { expected, actual } => {
                write!(f, "filter targets `{actual}` but `{expected}` was requested")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Context(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::MissingId { .. } => None,
            Self::UnknownColumn { .. } => None,
            Self::UnboundedDelete { .. } => None,
            Self::UnknownRelation { .. } => None,
            Self::FilterMismatch { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ContextError> for StoreError {
    fn from(value: ContextError) -> Self {
        Self::Context(value)
    }
}

impl From<ValidationError> for StoreError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

/// SQLite-backed transactional store shared by many units of work.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    config: StoreConfig,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> StoreResult<Self> {
        let conn = open_db(path, &config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    pub fn open_in_memory(config: StoreConfig) -> StoreResult<Self> {
        let conn = open_db_in_memory(&config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    /// Wraps an existing connection, applying `config` to it.
    pub fn from_connection(conn: Connection, config: StoreConfig) -> StoreResult<Self> {
        configure_connection(&conn, &config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Creates missing tables, columns and indexes for `descriptors`.
    ///
    /// Run once at startup; not part of the commit path.
    pub fn ensure_schema_for(&self, descriptors: &[&'static EntityDescriptor]) -> StoreResult<()> {
        let conn = self.lock_conn();
        schema::ensure_schema_for(&conn, descriptors)?;
        Ok(())
    }

    /// Loads the first `T` (lowest id) matching `filter`.
    pub fn find_first<T: Model>(
        &self,
        ctx: &CommitContext,
        filter: &Filter,
    ) -> StoreResult<Option<T>> {
        self.find_first_with(ctx, filter, &[])
    }

    /// Loads the first `T` matching `filter` plus the named relations.
    pub fn find_first_with<T: Model>(
        &self,
        ctx: &CommitContext,
        filter: &Filter,
        preloads: &[&str],
    ) -> StoreResult<Option<T>> {
        ctx.check()?;
        let conn = self.lock_conn();
        load_first::<T>(&conn, ctx, self.config.progress_interval_ops, filter, preloads)
            .map_err(|err| resolve_interrupt(err, ctx))
    }

    /// Loads a `T` by primary key plus the named relations.
    pub fn preload_first<T: Model>(
        &self,
        ctx: &CommitContext,
        id: RecordId,
        preloads: &[&str],
    ) -> StoreResult<Option<T>> {
        self.find_first_with(ctx, &Filter::by_id::<T>(id), preloads)
    }

    /// Runs `f` against the raw connection, outside any transaction.
    pub fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> R) -> R {
        f(&self.lock_conn())
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransactionalStore for SqliteStore {
    type Entity = EntityRef;
    type Condition = Filter;
    type Error = StoreError;

    fn run_in_transaction(
        &self,
        ctx: &CommitContext,
        body: &mut dyn FnMut(&mut dyn StoreTx<Self>) -> StoreResult<()>,
    ) -> StoreResult<()> {
        ctx.check()?;
        let started_at = Instant::now();
        let conn = self.lock_conn();

        match run_body(&conn, ctx, self.config.progress_interval_ops, body) {
            Ok(()) => {
                debug!(
                    "event=db_tx module=db status=ok duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                let err = resolve_interrupt(err, ctx);
                warn!(
                    "event=db_tx module=db status=rollback duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }
}

impl UnitOfWork<SqliteStore> {
    /// See [`SqliteStore::ensure_schema_for`].
    pub fn ensure_schema_for(&self, descriptors: &[&'static EntityDescriptor]) -> StoreResult<()> {
        self.store().ensure_schema_for(descriptors)
    }

    /// See [`SqliteStore::find_first`].
    pub fn find_first<T: Model>(
        &self,
        ctx: &CommitContext,
        filter: &Filter,
    ) -> StoreResult<Option<T>> {
        self.store().find_first(ctx, filter)
    }

    /// See [`SqliteStore::find_first_with`].
    pub fn find_first_with<T: Model>(
        &self,
        ctx: &CommitContext,
        filter: &Filter,
        preloads: &[&str],
    ) -> StoreResult<Option<T>> {
        self.store().find_first_with(ctx, filter, preloads)
    }

    /// See [`SqliteStore::preload_first`].
    pub fn preload_first<T: Model>(
        &self,
        ctx: &CommitContext,
        id: RecordId,
        preloads: &[&str],
    ) -> StoreResult<Option<T>> {
        self.store().preload_first(ctx, id, preloads)
    }
}

/// Runs `body` in an `IMMEDIATE` transaction.
///
/// The interrupt guard only covers the body, so `COMMIT` and the implicit
/// `ROLLBACK` on drop are never interrupted.
fn run_body(
    conn: &Connection,
    ctx: &CommitContext,
    interval_ops: u32,
    body: &mut dyn FnMut(&mut dyn StoreTx<SqliteStore>) -> StoreResult<()>,
) -> StoreResult<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    {
        let _interrupt = InterruptGuard::install(conn, ctx, interval_ops);
        body(&mut SqliteTx { conn: &tx })?;
    }
    ctx.check()?;
    tx.commit()?;
    Ok(())
}

/// Transaction handle passed to unit-of-work bodies.
struct SqliteTx<'conn> {
    conn: &'conn Connection,
}

impl StoreTx<SqliteStore> for SqliteTx<'_> {
    fn create(&mut self, entity: &EntityRef) -> StoreResult<()> {
        entity.with_record_mut(|record| insert_record(self.conn, record))
    }

    fn save(&mut self, entity: &EntityRef) -> StoreResult<()> {
        entity.with_record_mut(|record| upsert_record(self.conn, record))
    }

    fn delete_matching(&mut self, target: &DeleteTarget<EntityRef, Filter>) -> StoreResult<()> {
        match target {
            DeleteTarget::Entity(entity) => {
                entity.with_record_mut(|record| delete_record(self.conn, record))
            }
            DeleteTarget::Matching(filter) => delete_filtered(self.conn, filter),
        }
    }
}

/// Interrupts statements on `conn` once `ctx` is done; removed on drop.
struct InterruptGuard<'conn> {
    conn: &'conn Connection,
}

impl<'conn> InterruptGuard<'conn> {
    fn install(conn: &'conn Connection, ctx: &CommitContext, interval_ops: u32) -> Self {
        let ctx = ctx.clone();
        let interval = i32::try_from(interval_ops.max(1)).unwrap_or(i32::MAX);
        conn.progress_handler(interval, Some(move || ctx.is_done()));
        Self { conn }
    }
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

/// Maps an interrupted statement to the context error that caused it.
fn resolve_interrupt(err: StoreError, ctx: &CommitContext) -> StoreError {
    let interrupted = matches!(
        &err,
        StoreError::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(failure, _)))
            if failure.code == ErrorCode::OperationInterrupted
    );
    match ctx.err() {
        Some(reason) if interrupted => StoreError::Context(reason),
        _ => err,
    }
}

fn insert_record(conn: &Connection, record: &mut dyn Record) -> StoreResult<()> {
    let (sql, values) = insert_sql(record, false)?;
    conn.execute(&sql, params_from_iter(values))?;
    if record.id().is_none() {
        record.assign_id(conn.last_insert_rowid());
    }
    debug!(
        "event=db_insert module=db status=ok table={} id={}",
        record.descriptor().table,
        record.id().unwrap_or_default()
    );
    Ok(())
}

fn upsert_record(conn: &Connection, record: &mut dyn Record) -> StoreResult<()> {
    if record.id().is_none() {
        return insert_record(conn, record);
    }
    let (sql, values) = insert_sql(record, true)?;
    conn.execute(&sql, params_from_iter(values))?;
    debug!(
        "event=db_upsert module=db status=ok table={} id={}",
        record.descriptor().table,
        record.id().unwrap_or_default()
    );
    Ok(())
}

/// Builds `INSERT`, optionally with an upsert clause on `id`.
fn insert_sql(record: &mut dyn Record, upsert: bool) -> StoreResult<(String, Vec<Value>)> {
    record.touch(now_ms());
    record.validate()?;

    let descriptor = record.descriptor();
    validate_descriptor(descriptor)?;
    let row = record.values();
    if row.len() != descriptor.columns.len() {
        return Err(StoreError::InvalidData(format!(
            "{} record produced {} values for {} columns",
            descriptor.table,
            row.len(),
            descriptor.columns.len()
        )));
    }

    let mut columns = Vec::with_capacity(row.len() + 1);
    let mut values = Vec::with_capacity(row.len() + 1);
    if let Some(id) = record.id() {
        columns.push(ID_COLUMN);
        values.push(Value::Integer(id));
    }
    columns.extend(descriptor.columns.iter().map(|column| column.name));
    values.extend(row);

    let placeholders = (1..=values.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        descriptor.table,
        columns.join(", "),
        placeholders
    );

    if upsert {
        if descriptor.columns.is_empty() {
            sql.push_str(" ON CONFLICT(id) DO NOTHING");
        } else {
            let assignments = descriptor
                .columns
                .iter()
                .map(|column| format!("{0} = excluded.{0}", column.name))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ON CONFLICT(id) DO UPDATE SET {assignments}"));
        }
    }
    sql.push(';');

    Ok((sql, values))
}

fn delete_record(conn: &Connection, record: &mut dyn Record) -> StoreResult<()> {
    let descriptor = record.descriptor();
    let id = record.id().ok_or(StoreError::MissingId {
        table: descriptor.table,
    })?;
    validate_descriptor(descriptor)?;
    conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1;", descriptor.table),
        [id],
    )?;
    debug!(
        "event=db_delete module=db status=ok table={} id={}",
        descriptor.table, id
    );
    Ok(())
}

fn delete_filtered(conn: &Connection, filter: &Filter) -> StoreResult<()> {
    let descriptor = filter.entity();
    if filter.is_empty() {
        return Err(StoreError::UnboundedDelete {
            table: descriptor.table,
        });
    }
    validate_descriptor(descriptor)?;
    let (where_sql, values) = filter.where_sql()?;
    let changed = conn.execute(
        &format!("DELETE FROM {} WHERE {};", descriptor.table, where_sql),
        params_from_iter(values),
    )?;
    debug!(
        "event=db_delete module=db status=ok table={} rows={}",
        descriptor.table, changed
    );
    Ok(())
}

fn load_first<T: Model>(
    conn: &Connection,
    ctx: &CommitContext,
    interval_ops: u32,
    filter: &Filter,
    preloads: &[&str],
) -> StoreResult<Option<T>> {
    for relation in preloads {
        if !T::entity().has_relation(relation) {
            return Err(StoreError::UnknownRelation {
                table: T::entity().table,
                relation: (*relation).to_string(),
            });
        }
    }

    // Deferred read transaction so the record and its relations come from
    // one snapshot.
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Deferred)?;
    let record = {
        let _interrupt = InterruptGuard::install(conn, ctx, interval_ops);
        let Some(mut record) = select_records::<T>(&tx, filter, Some(1))?.pop() else {
            return Ok(None);
        };
        let loader = RelationLoader::new(&tx);
        for relation in preloads {
            record.preload(relation, &loader)?;
        }
        record
    };
    tx.commit()?;

    Ok(Some(record))
}

/// Selects `T` rows matching `filter`, ordered by id.
pub(crate) fn select_records<T: Model>(
    conn: &Connection,
    filter: &Filter,
    limit: Option<u32>,
) -> StoreResult<Vec<T>> {
    let descriptor = T::entity();
    if filter.entity().table != descriptor.table {
        return Err(StoreError::FilterMismatch {
            expected: descriptor.table,
            actual: filter.entity().table,
        });
    }
    validate_descriptor(descriptor)?;

    let columns = std::iter::once(ID_COLUMN)
        .chain(descriptor.columns.iter().map(|column| column.name))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!("SELECT {columns} FROM {}", descriptor.table);
    let (where_sql, values) = filter.where_sql()?;
    if !filter.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    sql.push_str(" ORDER BY id ASC");
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    sql.push(';');

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(values))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(T::from_row(row)?);
    }
    Ok(records)
}

fn validate_descriptor(descriptor: &EntityDescriptor) -> StoreResult<()> {
    validate_identifier(descriptor.table)?;
    for column in descriptor.columns {
        validate_identifier(column.name)?;
    }
    Ok(())
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
