#![allow(dead_code)]

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use workunit_core::{CommitContext, ContextError, DeleteTarget, StoreTx, TransactionalStore};

/// One write observed by the recording store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Create(String),
    Save(String),
    Delete(String),
    DeleteWhere(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeError {
    Rejected(String),
    Context(ContextError),
}

impl Display for FakeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(label) => write!(f, "rejected `{label}`"),
            Self::Context(err) => write!(f, "{err}"),
        }
    }
}

impl Error for FakeError {}

impl From<ContextError> for FakeError {
    fn from(value: ContextError) -> Self {
        Self::Context(value)
    }
}

/// In-memory store whose entities are string labels.
///
/// Writes are staged per transaction and appended to `committed` only when
/// the body succeeds.
#[derive(Default)]
pub struct RecordingStore {
    committed: Mutex<Vec<Applied>>,
    reject: Mutex<Option<String>>,
    transactions: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write of `label` fail until cleared.
    pub fn reject(&self, label: &str) {
        *self.reject.lock().unwrap() = Some(label.to_string());
    }

    pub fn accept_all(&self) {
        *self.reject.lock().unwrap() = None;
    }

    pub fn committed(&self) -> Vec<Applied> {
        self.committed.lock().unwrap().clone()
    }

    pub fn transactions(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

struct RecordingTx<'a> {
    reject: Option<String>,
    staged: &'a mut Vec<Applied>,
}

impl RecordingTx<'_> {
    fn stage(&mut self, label: &str, applied: Applied) -> Result<(), FakeError> {
        if self.reject.as_deref() == Some(label) {
            return Err(FakeError::Rejected(label.to_string()));
        }
        self.staged.push(applied);
        Ok(())
    }
}

impl StoreTx<RecordingStore> for RecordingTx<'_> {
    fn create(&mut self, entity: &String) -> Result<(), FakeError> {
        self.stage(entity, Applied::Create(entity.clone()))
    }

    fn save(&mut self, entity: &String) -> Result<(), FakeError> {
        self.stage(entity, Applied::Save(entity.clone()))
    }

    fn delete_matching(&mut self, target: &DeleteTarget<String, String>) -> Result<(), FakeError> {
        match target {
            DeleteTarget::Entity(label) => self.stage(label, Applied::Delete(label.clone())),
            DeleteTarget::Matching(condition) => {
                self.stage(condition, Applied::DeleteWhere(condition.clone()))
            }
        }
    }
}

impl TransactionalStore for RecordingStore {
    type Entity = String;
    type Condition = String;
    type Error = FakeError;

    fn run_in_transaction(
        &self,
        ctx: &CommitContext,
        body: &mut dyn FnMut(&mut dyn StoreTx<Self>) -> Result<(), FakeError>,
    ) -> Result<(), FakeError> {
        self.transactions.fetch_add(1, Ordering::SeqCst);
        ctx.check()?;

        let mut staged = Vec::new();
        let reject = self.reject.lock().unwrap().clone();
        let result = body(&mut RecordingTx {
            reject,
            staged: &mut staged,
        })
        .and_then(|()| ctx.check().map_err(FakeError::from));

        match result {
            Ok(()) => {
                self.committed.lock().unwrap().extend(staged);
                Ok(())
            }
            Err(err) => {
                self.rollbacks.fetch_add(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }
}

pub fn create(label: &str) -> Applied {
    Applied::Create(label.to_string())
}

pub fn save(label: &str) -> Applied {
    Applied::Save(label.to_string())
}

pub fn delete(label: &str) -> Applied {
    Applied::Delete(label.to_string())
}

pub fn delete_where(condition: &str) -> Applied {
    Applied::DeleteWhere(condition.to_string())
}
