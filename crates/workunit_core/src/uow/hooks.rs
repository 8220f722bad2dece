//! Best-effort dispatch of commit and rollback hooks.

use super::Hook;
use crate::logging::describe_panic_payload;
use log::warn;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Runs every hook in order. A panicking hook is logged and skipped.
///
/// Returns how many hooks failed.
pub(crate) fn run_hooks(stage: &'static str, hooks: &[Hook]) -> usize {
    let mut failed = 0;
    for (index, hook) in hooks.iter().enumerate() {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (**hook)())) {
            failed += 1;
            warn!(
                "event=uow_hook module=uow status=error stage={} index={} payload={}",
                stage,
                index,
                describe_panic_payload(payload.as_ref())
            );
        }
    }
    failed
}
