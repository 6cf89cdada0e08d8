//! Ambient execution context for the non-transactional path.
//!
//! Arithmetic ops route to the current STM transaction or, outside a
//! transaction, directly to the ledger. The transaction side is ambient via
//! [`crate::transaction`]'s thread-local; this module supplies the other
//! half the direct path needs: which [`crate::ledger::Ledger`] to record
//! into, and whether the assign merge rule's bootstrap-replace branch is
//! currently allowed (true exactly when `entropy > 0` inside the
//! convergence loop). Both are installed by [`crate::engine::Engine::run`]
//! for the duration of one user-body invocation and are only ever read on
//! the coordinator/engine thread.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use crate::ledger::Ledger;

thread_local! {
    static CURRENT_LEDGER: RefCell<Option<Arc<Ledger>>> = const { RefCell::new(None) };
    static BOOTSTRAP_REPLACE_ALLOWED: Cell<bool> = const { Cell::new(false) };
    static FORCED_CONVERGENCE: Cell<bool> = const { Cell::new(false) };
}

/// RAII guard installing the ambient ledger/flag for the duration of one
/// scope, restoring the previous values (if any) on drop. Re-entrant: a
/// transaction body run by [`crate::coordinator::Coordinator`] on the same
/// thread as a direct [`crate::engine::Engine::run`] call nests correctly.
pub(crate) struct ContextGuard {
    previous_ledger: Option<Arc<Ledger>>,
    previous_flag: bool,
}

impl ContextGuard {
    pub(crate) fn install(ledger: Arc<Ledger>, bootstrap_replace_allowed: bool) -> Self {
        let previous_ledger = CURRENT_LEDGER.with(|cell| cell.borrow_mut().replace(ledger));
        let previous_flag = BOOTSTRAP_REPLACE_ALLOWED.with(|cell| cell.replace(bootstrap_replace_allowed));
        Self {
            previous_ledger,
            previous_flag,
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT_LEDGER.with(|cell| *cell.borrow_mut() = self.previous_ledger.take());
        BOOTSTRAP_REPLACE_ALLOWED.with(|cell| cell.set(self.previous_flag));
    }
}

pub(crate) fn with_current_ledger<R>(f: impl FnOnce(Option<&Arc<Ledger>>) -> R) -> R {
    CURRENT_LEDGER.with(|cell| f(cell.borrow().as_ref()))
}

pub(crate) fn bootstrap_replace_allowed() -> bool {
    BOOTSTRAP_REPLACE_ALLOWED.with(Cell::get)
}

/// Raised by [`crate::ops`] when an `assign()` takes the merge rule's unify
/// branch, which marks the runtime converged. The engine loop consumes this
/// once per half-cycle alongside the tail-unchanged check.
pub(crate) fn mark_forced_convergence() {
    FORCED_CONVERGENCE.with(|cell| cell.set(true));
}

pub(crate) fn clear_forced_convergence() {
    FORCED_CONVERGENCE.with(|cell| cell.set(false));
}

pub(crate) fn take_forced_convergence() -> bool {
    FORCED_CONVERGENCE.with(|cell| cell.replace(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bootstrap_replace_allowed_is_false() {
        assert!(!bootstrap_replace_allowed());
    }

    #[test]
    fn guard_installs_and_restores_flag() {
        assert!(!bootstrap_replace_allowed());
        {
            let _guard = ContextGuard::install(Arc::new(Ledger::new()), true);
            assert!(bootstrap_replace_allowed());
        }
        assert!(!bootstrap_replace_allowed());
    }

    #[test]
    fn forced_convergence_is_take_once() {
        clear_forced_convergence();
        assert!(!take_forced_convergence());
        mark_forced_convergence();
        assert!(take_forced_convergence());
        assert!(!take_forced_convergence());
    }
}
