//! Unit of work: batch pending changes, apply them in one transaction.
//!
//! # Responsibility
//! - Accept creates, updates, deletes, deferred operations and hooks from any
//!   number of threads.
//! - Apply a snapshot of them atomically through a `TransactionalStore`.
//! - Notify commit or rollback hooks after the outcome is known.
//!
//! # Invariants
//! - Queueing never performs I/O; it only takes the in-process lock.
//! - The lock is never held across a store call or a hook.
//! - Apply order is creates, updates, deletes, then deferred operations, each
//!   in queue order.
//! - A failed or panicking commit leaves its items pending; a successful one
//!   removes exactly the items it applied.
//! - Hook panics never change the value returned by `commit`.

mod hooks;
mod pending;
mod scope;

pub use pending::PendingCounts;
pub use scope::CommitScope;

use crate::context::CommitContext;
use crate::logging::describe_panic_payload;
use crate::store::{DeleteTarget, StoreTx, TransactionalStore};
use hooks::run_hooks;
use log::{debug, error, info, warn};
use pending::PendingChangeSet;
use scope::apply_round;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Deferred work run inside the commit transaction.
pub type Operation<S> = Arc<
    dyn Fn(&mut CommitScope<'_, S>) -> Result<(), <S as TransactionalStore>::Error>
        + Send
        + Sync,
>;

/// Zero-argument notification callback.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Collects pending persistence intents and commits them atomically.
///
/// Share one instance between the threads contributing to the same logical
/// unit of work (`Arc<UnitOfWork<S>>`); use separate instances for unrelated
/// work against the same store.
pub struct UnitOfWork<S: TransactionalStore> {
    store: Arc<S>,
    pending: Mutex<PendingChangeSet<S>>,
}

impl<S: TransactionalStore> UnitOfWork<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            pending: Mutex::new(PendingChangeSet::new()),
        }
    }

    /// Shared store this unit of work commits to.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Queues an entity to be created on commit.
    pub fn queue_create(&self, entity: impl Into<S::Entity>) {
        self.lock_pending().push_create(entity.into());
    }

    /// Queues an entity to be upserted on commit.
    pub fn queue_update(&self, entity: impl Into<S::Entity>) {
        self.lock_pending().push_update(entity.into());
    }

    /// Queues an entity to be deleted by identity on commit.
    pub fn queue_delete(&self, entity: impl Into<S::Entity>) {
        self.lock_pending()
            .push_delete(DeleteTarget::Entity(entity.into()));
    }

    /// Queues a conditional delete on commit.
    pub fn queue_delete_matching(&self, condition: impl Into<S::Condition>) {
        self.lock_pending()
            .push_delete(DeleteTarget::Matching(condition.into()));
    }

    /// Queues a custom operation run inside the transaction, after all
    /// queued creates, updates and deletes.
    pub fn queue_operation<F>(&self, op: F)
    where
        F: Fn(&mut CommitScope<'_, S>) -> Result<(), S::Error> + Send + Sync + 'static,
    {
        self.lock_pending().push_operation(Arc::new(op));
    }

    /// Registers a callback run after a successful commit.
    pub fn on_committed(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.lock_pending().push_commit_hook(Arc::new(hook));
    }

    /// Registers a callback run after a failed commit.
    pub fn on_rolled_back(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.lock_pending().push_rollback_hook(Arc::new(hook));
    }

    /// True when creates, updates, deletes or operations are queued.
    /// Hooks alone are not pending work.
    pub fn has_pending(&self) -> bool {
        !self.lock_pending().is_empty()
    }

    pub fn pending_counts(&self) -> PendingCounts {
        self.lock_pending().counts()
    }

    /// Discards all pending work and hooks.
    pub fn clear(&self) {
        self.lock_pending().clear();
    }

    /// Alias of [`UnitOfWork::commit`].
    pub fn save_changes(&self, ctx: &CommitContext) -> Result<(), S::Error> {
        self.commit(ctx)
    }

    /// Applies everything pending at call time in one transaction.
    ///
    /// On error the transaction is rolled back, the items stay queued so the
    /// caller can retry or `clear()`, rollback hooks run, and the store error
    /// is returned unchanged. Retrying is only safe when the queued work is
    /// idempotent: a retried create inserts again.
    ///
    /// A panic inside the transaction releases the items and runs rollback
    /// hooks before it propagates.
    ///
    /// # Side effects
    /// - One store transaction.
    /// - Emits `uow_commit` logging events with counts and duration.
    pub fn commit(&self, ctx: &CommitContext) -> Result<(), S::Error> {
        let started_at = Instant::now();
        let snapshot = self.lock_pending().claim();
        debug!(
            "event=uow_commit module=uow status=start creates={} updates={} deletes={} operations={}",
            snapshot.work.creates.len(),
            snapshot.work.updates.len(),
            snapshot.work.deletes.len(),
            snapshot.work.operations.len()
        );

        let mut rounds = 0usize;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.store.run_in_transaction(
                ctx,
                &mut |tx: &mut dyn StoreTx<S>| -> Result<(), S::Error> {
                    let mut scope = CommitScope::new(tx, ctx);
                    apply_round(&mut scope, &snapshot.work)?;
                    rounds = 1;
                    loop {
                        let follow_ups = scope.take_follow_ups();
                        if follow_ups.is_empty() {
                            return Ok(());
                        }
                        apply_round(&mut scope, &follow_ups)?;
                        rounds += 1;
                    }
                },
            )
        }));

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                // The store transaction was dropped while unwinding.
                self.lock_pending().release_claimed(&snapshot.claimed);
                error!(
                    "event=uow_commit module=uow status=panic items={} duration_ms={} payload={}",
                    snapshot.claimed.len(),
                    started_at.elapsed().as_millis(),
                    describe_panic_payload(payload.as_ref())
                );
                run_hooks("after_rollback", &snapshot.after_rollback);
                resume_unwind(payload);
            }
        };

        match result {
            Ok(()) => {
                self.lock_pending().remove_claimed(&snapshot.claimed);
                let failed_hooks = run_hooks("after_commit", &snapshot.after_commit);
                info!(
                    "event=uow_commit module=uow status=ok rounds={} items={} failed_hooks={} duration_ms={}",
                    rounds,
                    snapshot.claimed.len(),
                    failed_hooks,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                self.lock_pending().release_claimed(&snapshot.claimed);
                let failed_hooks = run_hooks("after_rollback", &snapshot.after_rollback);
                warn!(
                    "event=uow_commit module=uow status=error items={} failed_hooks={} duration_ms={} error={}",
                    snapshot.claimed.len(),
                    failed_hooks,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingChangeSet<S>> {
        // Pending state is consistent between statements, so a poisoned lock
        // is still safe to use.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
