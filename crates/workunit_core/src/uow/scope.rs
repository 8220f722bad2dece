//! Transaction handle given to deferred operations.

use super::pending::Round;
use super::Operation;
use crate::context::CommitContext;
use crate::store::{DeleteTarget, StoreTx, TransactionalStore};
use std::sync::Arc;

/// A live transaction plus a queue for follow-up work.
///
/// Direct calls (`create`, `save`, `delete_matching`) hit the transaction
/// immediately. `queue_*` calls are applied later in the same transaction,
/// in a further round that runs creates, updates, deletes, then operations.
pub struct CommitScope<'a, S: TransactionalStore> {
    tx: &'a mut dyn StoreTx<S>,
    ctx: &'a CommitContext,
    follow_ups: Round<S>,
}

impl<'a, S: TransactionalStore> CommitScope<'a, S> {
    pub(crate) fn new(tx: &'a mut dyn StoreTx<S>, ctx: &'a CommitContext) -> Self {
        Self {
            tx,
            ctx,
            follow_ups: Round::new(),
        }
    }

    /// Raw transaction handle.
    pub fn tx(&mut self) -> &mut dyn StoreTx<S> {
        &mut *self.tx
    }

    pub fn context(&self) -> &CommitContext {
        self.ctx
    }

    /// Fails with the context error once the commit context is done.
    pub fn checkpoint(&self) -> Result<(), S::Error> {
        self.ctx.check().map_err(S::Error::from)
    }

    pub fn create(&mut self, entity: impl Into<S::Entity>) -> Result<(), S::Error> {
        self.tx.create(&entity.into())
    }

    pub fn save(&mut self, entity: impl Into<S::Entity>) -> Result<(), S::Error> {
        self.tx.save(&entity.into())
    }

    pub fn delete(&mut self, entity: impl Into<S::Entity>) -> Result<(), S::Error> {
        self.tx.delete_matching(&DeleteTarget::Entity(entity.into()))
    }

    pub fn delete_matching(&mut self, condition: impl Into<S::Condition>) -> Result<(), S::Error> {
        self.tx
            .delete_matching(&DeleteTarget::Matching(condition.into()))
    }

    pub fn queue_create(&mut self, entity: impl Into<S::Entity>) {
        self.follow_ups.creates.push(entity.into());
    }

    pub fn queue_update(&mut self, entity: impl Into<S::Entity>) {
        self.follow_ups.updates.push(entity.into());
    }

    pub fn queue_delete(&mut self, entity: impl Into<S::Entity>) {
        self.follow_ups
            .deletes
            .push(DeleteTarget::Entity(entity.into()));
    }

    pub fn queue_delete_matching(&mut self, condition: impl Into<S::Condition>) {
        self.follow_ups
            .deletes
            .push(DeleteTarget::Matching(condition.into()));
    }

    pub fn queue_operation<F>(&mut self, op: F)
    where
        F: Fn(&mut CommitScope<'_, S>) -> Result<(), S::Error> + Send + Sync + 'static,
    {
        self.follow_ups.operations.push(Arc::new(op));
    }

    pub(crate) fn take_follow_ups(&mut self) -> Round<S> {
        std::mem::replace(&mut self.follow_ups, Round::new())
    }
}

/// Applies one round in the fixed stage order, stopping at the first error.
pub(crate) fn apply_round<S: TransactionalStore>(
    scope: &mut CommitScope<'_, S>,
    round: &Round<S>,
) -> Result<(), S::Error> {
    for entity in &round.creates {
        scope.checkpoint()?;
        scope.tx.create(entity)?;
    }
    for entity in &round.updates {
        scope.checkpoint()?;
        scope.tx.save(entity)?;
    }
    for target in &round.deletes {
        scope.checkpoint()?;
        scope.tx.delete_matching(target)?;
    }
    for op in &round.operations {
        scope.checkpoint()?;
        (**op)(&mut *scope)?;
    }
    Ok(())
}
