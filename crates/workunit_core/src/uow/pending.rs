//! Pending change bookkeeping for one unit of work.
//!
//! # Responsibility
//! - Hold queued creates, updates, deletes, deferred operations and hooks in
//!   queue order.
//! - Hand out snapshots to commit attempts and settle them afterwards.
//!
//! # Invariants
//! - Every queued item gets a sequence number unique within the set.
//! - An item is claimed by at most one in-flight commit at a time.
//! - Settling only touches the claimed items; items queued after the
//!   snapshot stay pending untouched.

use super::{Hook, Operation};
use crate::store::{DeleteTarget, TransactionalStore};

type Seq = u64;

struct Entry<T> {
    seq: Seq,
    claimed: bool,
    item: T,
}

/// One ordered queue with claim tracking.
struct Lane<T> {
    entries: Vec<Entry<T>>,
}

impl<T: Clone> Lane<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn push(&mut self, seq: Seq, item: T) {
        self.entries.push(Entry {
            seq,
            claimed: false,
            item,
        });
    }

    fn claim(&mut self, claimed: &mut Vec<Seq>) -> Vec<T> {
        let mut items = Vec::new();
        for entry in self.entries.iter_mut().filter(|entry| !entry.claimed) {
            entry.claimed = true;
            claimed.push(entry.seq);
            items.push(entry.item.clone());
        }
        items
    }

    fn release(&mut self, claimed: &[Seq]) {
        for entry in &mut self.entries {
            if claimed.binary_search(&entry.seq).is_ok() {
                entry.claimed = false;
            }
        }
    }

    fn remove(&mut self, claimed: &[Seq]) {
        self.entries
            .retain(|entry| claimed.binary_search(&entry.seq).is_err());
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Per-sequence item counts, claimed items included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub operations: usize,
    pub commit_hooks: usize,
    pub rollback_hooks: usize,
}

impl PendingCounts {
    pub fn total(&self) -> usize {
        self.creates
            + self.updates
            + self.deletes
            + self.operations
            + self.commit_hooks
            + self.rollback_hooks
    }

    /// Queued creates, updates, deletes and operations, hooks excluded.
    pub fn work(&self) -> usize {
        self.creates + self.updates + self.deletes + self.operations
    }
}

/// Work applied by one pass of the commit body.
pub(crate) struct Round<S: TransactionalStore> {
    pub(crate) creates: Vec<S::Entity>,
    pub(crate) updates: Vec<S::Entity>,
    pub(crate) deletes: Vec<DeleteTarget<S::Entity, S::Condition>>,
    pub(crate) operations: Vec<Operation<S>>,
}

impl<S: TransactionalStore> Round<S> {
    pub(crate) fn new() -> Self {
        Self {
            creates: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
            operations: Vec::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.creates.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.operations.is_empty()
    }
}

/// Immutable copy of pending state taken at the start of a commit attempt.
pub(crate) struct Snapshot<S: TransactionalStore> {
    pub(crate) work: Round<S>,
    pub(crate) after_commit: Vec<Hook>,
    pub(crate) after_rollback: Vec<Hook>,
    /// Sorted sequence numbers of every claimed item.
    pub(crate) claimed: Vec<Seq>,
}

pub(crate) struct PendingChangeSet<S: TransactionalStore> {
    next_seq: Seq,
    creates: Lane<S::Entity>,
    updates: Lane<S::Entity>,
    deletes: Lane<DeleteTarget<S::Entity, S::Condition>>,
    operations: Lane<Operation<S>>,
    after_commit: Lane<Hook>,
    after_rollback: Lane<Hook>,
}

impl<S: TransactionalStore> PendingChangeSet<S> {
    pub(crate) fn new() -> Self {
        Self {
            next_seq: 0,
            creates: Lane::new(),
            updates: Lane::new(),
            deletes: Lane::new(),
            operations: Lane::new(),
            after_commit: Lane::new(),
            after_rollback: Lane::new(),
        }
    }

    fn next_seq(&mut self) -> Seq {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub(crate) fn push_create(&mut self, entity: S::Entity) {
        let seq = self.next_seq();
        self.creates.push(seq, entity);
    }

    pub(crate) fn push_update(&mut self, entity: S::Entity) {
        let seq = self.next_seq();
        self.updates.push(seq, entity);
    }

    pub(crate) fn push_delete(&mut self, target: DeleteTarget<S::Entity, S::Condition>) {
        let seq = self.next_seq();
        self.deletes.push(seq, target);
    }

    pub(crate) fn push_operation(&mut self, op: Operation<S>) {
        let seq = self.next_seq();
        self.operations.push(seq, op);
    }

    pub(crate) fn push_commit_hook(&mut self, hook: Hook) {
        let seq = self.next_seq();
        self.after_commit.push(seq, hook);
    }

    pub(crate) fn push_rollback_hook(&mut self, hook: Hook) {
        let seq = self.next_seq();
        self.after_rollback.push(seq, hook);
    }

    /// Claims every unclaimed item and returns copies of them.
    pub(crate) fn claim(&mut self) -> Snapshot<S> {
        let mut claimed = Vec::new();
        let work = Round {
            creates: self.creates.claim(&mut claimed),
            updates: self.updates.claim(&mut claimed),
            deletes: self.deletes.claim(&mut claimed),
            operations: self.operations.claim(&mut claimed),
        };
        let after_commit = self.after_commit.claim(&mut claimed);
        let after_rollback = self.after_rollback.claim(&mut claimed);
        claimed.sort_unstable();

        Snapshot {
            work,
            after_commit,
            after_rollback,
            claimed,
        }
    }

    /// Drops claimed items after their commit succeeded.
    pub(crate) fn remove_claimed(&mut self, claimed: &[Seq]) {
        self.creates.remove(claimed);
        self.updates.remove(claimed);
        self.deletes.remove(claimed);
        self.operations.remove(claimed);
        self.after_commit.remove(claimed);
        self.after_rollback.remove(claimed);
    }

    /// Returns claimed items to the pending pool after their commit failed.
    pub(crate) fn release_claimed(&mut self, claimed: &[Seq]) {
        self.creates.release(claimed);
        self.updates.release(claimed);
        self.deletes.release(claimed);
        self.operations.release(claimed);
        self.after_commit.release(claimed);
        self.after_rollback.release(claimed);
    }

    pub(crate) fn clear(&mut self) {
        self.creates.clear();
        self.updates.clear();
        self.deletes.clear();
        self.operations.clear();
        self.after_commit.clear();
        self.after_rollback.clear();
    }

    pub(crate) fn counts(&self) -> PendingCounts {
        PendingCounts {
            creates: self.creates.len(),
            updates: self.updates.len(),
            deletes: self.deletes.len(),
            operations: self.operations.len(),
            commit_hooks: self.after_commit.len(),
            rollback_hooks: self.after_rollback.len(),
        }
    }

    /// True when no creates, updates, deletes or operations are queued.
    /// Registered hooks alone do not count as pending work.
    pub(crate) fn is_empty(&self) -> bool {
        self.counts().work() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::Lane;

    #[test]
    fn claim_skips_items_already_claimed() {
        let mut lane = Lane::new();
        lane.push(0, "a");
        lane.push(1, "b");

        let mut first = Vec::new();
        assert_eq!(lane.claim(&mut first), vec!["a", "b"]);

        lane.push(2, "c");
        let mut second = Vec::new();
        assert_eq!(lane.claim(&mut second), vec!["c"]);
        assert_eq!(first, vec![0, 1]);
        assert_eq!(second, vec![2]);
    }

    #[test]
    fn release_restores_items_in_original_position() {
        let mut lane = Lane::new();
        lane.push(0, "a");
        let mut claimed = Vec::new();
        lane.claim(&mut claimed);
        lane.push(1, "b");

        lane.release(&claimed);

        let mut again = Vec::new();
        assert_eq!(lane.claim(&mut again), vec!["a", "b"]);
    }

    #[test]
    fn remove_only_drops_claimed_items() {
        let mut lane = Lane::new();
        lane.push(0, "a");
        let mut claimed = Vec::new();
        lane.claim(&mut claimed);
        lane.push(1, "b");

        lane.remove(&claimed);

        assert_eq!(lane.len(), 1);
        let mut rest = Vec::new();
        assert_eq!(lane.claim(&mut rest), vec!["b"]);
    }
}
