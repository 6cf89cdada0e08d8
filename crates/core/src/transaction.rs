//! STM transaction: a per-thread ambient scope buffering reads, staged
//! writes, ledger entries, and commit hooks, committed atomically under
//! ordered per-variable locks.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CommitError;
use crate::ledger::{CommitId, Ledger};
use crate::operation::LedgerOp;
use crate::variable::{AnyVariable, Variable, VariableId};

thread_local! {
    static CURRENT_TRANSACTION: RefCell<Option<Transaction>> = const { RefCell::new(None) };
}

/// True while this thread is inside [`Transaction::begin`]/[`Transaction::commit`].
///
/// Used by call sites (e.g. [`crate::variable::Variable`]'s public arithmetic
/// methods) to route a mutation through the ambient transaction instead of
/// straight to the ledger, the same ergonomics `rust-stm`'s `atomically!`
/// gives user code without an explicit transaction parameter at every call.
pub(crate) fn with_current<R>(f: impl FnOnce(Option<&mut Transaction>) -> R) -> R {
    CURRENT_TRANSACTION.with(|cell| f(cell.borrow_mut().as_mut()))
}

fn take_current() -> Option<Transaction> {
    CURRENT_TRANSACTION.with(|cell| cell.borrow_mut().take())
}

/// Object-safe staged mutation, erasing the concrete `Variable<T, S>` so a
/// single transaction can buffer writes against variables of unrelated
/// value types.
pub(crate) trait StagedWrite: Send + Sync {
    fn any(&self) -> Arc<dyn AnyVariable>;
    /// Apply the write to the variable's timeline. Called only from
    /// [`Transaction::commit`] while the variable's lock is held.
    fn apply(&self);
}

/// Staged write for `assign()` — the history-scanning merge rule, always
/// with a backup recorded so [`crate::operation::StructuralOp`] can undo it.
/// Callers filter out true no-ops before ever constructing one of these (see
/// `DESIGN.md`), so every staged `MergeWrite` is guaranteed to mutate the
/// timeline and needs a backup.
pub(crate) struct MergeWrite<T, S: crate::slice::Slice<T>> {
    pub variable: Arc<Variable<T, S>>,
    pub slice: S,
    pub bootstrap_replace_allowed: bool,
}

impl<T, S> StagedWrite for MergeWrite<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: crate::slice::Slice<T>,
{
    fn any(&self) -> Arc<dyn AnyVariable> {
        Arc::clone(&self.variable) as Arc<dyn AnyVariable>
    }

    fn apply(&self) {
        self.variable
            .apply_merge_recording_backup(self.slice.clone(), self.bootstrap_replace_allowed);
    }
}

/// Staged write for arithmetic ops (write-kind `ReplaceLast`): overwrites the
/// tail directly, no history scan, no backup — undo recomputes an algebraic
/// inverse instead ([`crate::operation::ArithmeticOp`]).
pub(crate) struct ReplaceLastWrite<T, S: crate::slice::Slice<T>> {
    pub variable: Arc<Variable<T, S>>,
    pub slice: S,
}

impl<T, S> StagedWrite for ReplaceLastWrite<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: crate::slice::Slice<T>,
{
    fn any(&self) -> Arc<dyn AnyVariable> {
        Arc::clone(&self.variable) as Arc<dyn AnyVariable>
    }

    fn apply(&self) {
        self.variable.replace_tail(self.slice.clone());
    }
}

/// Per-thread ambient scope for one STM commit attempt.
pub struct Transaction {
    read_set: BTreeMap<VariableId, (Arc<dyn AnyVariable>, u64)>,
    write_set: Vec<Box<dyn StagedWrite>>,
    buffered_ledger_entries: Vec<Box<dyn LedgerOp>>,
    commit_hooks: Vec<Box<dyn FnOnce() + Send>>,
}

impl Transaction {
    fn new() -> Self {
        Self {
            read_set: BTreeMap::new(),
            write_set: Vec::new(),
            buffered_ledger_entries: Vec::new(),
            commit_hooks: Vec::new(),
        }
    }

    /// Begin a transaction and install it as this thread's ambient current
    /// transaction. Panics on a nested call, mirroring the `TransactionGuard`
    /// idiom used for the same purpose by reference STM implementations.
    pub fn begin() {
        CURRENT_TRANSACTION.with(|cell| {
            assert!(
                cell.borrow().is_none(),
                "nested STM transaction: commit or abort the current one first"
            );
            *cell.borrow_mut() = Some(Self::new());
        });
        debug!("stm transaction begun");
    }

    /// Record that `variable` was read at its current version, so commit-time
    /// validation can detect a concurrent writer. Callers performing a
    /// read-modify-write inside [`Self::run_with_retry`] must call this
    /// *before* reading the value (`spec.md` §8 property 4) — recording the
    /// read afterward lets a concurrent commit land in the gap undetected.
    pub fn record_read<T, S>(variable: &Arc<Variable<T, S>>)
    where
        T: Clone + Send + Sync + 'static,
        S: crate::slice::Slice<T>,
    {
        with_current(|tx| {
            if let Some(tx) = tx {
                tx.read_set
                    .entry(variable.id())
                    .or_insert_with(|| (Arc::clone(variable) as Arc<dyn AnyVariable>, variable.version()));
            }
        });
    }

    pub(crate) fn stage_write(write: Box<dyn StagedWrite>) {
        with_current(|tx| {
            if let Some(tx) = tx {
                tx.write_set.push(write);
            }
        });
    }

    pub(crate) fn buffer_ledger_entry(op: Box<dyn LedgerOp>) {
        with_current(|tx| {
            if let Some(tx) = tx {
                tx.buffered_ledger_entries.push(op);
            }
        });
    }

    /// Register a closure to run after a successful commit. A hook that
    /// panics is caught, logged, and swallowed; the remaining hooks still
    /// run. Hooks exist for bookkeeping (snapshot publication, counters)
    /// that should never abort an already-applied commit.
    pub fn add_commit_hook(hook: impl FnOnce() + Send + 'static) {
        with_current(|tx| {
            if let Some(tx) = tx {
                tx.commit_hooks.push(Box::new(hook));
            }
        });
    }

    /// Validate the read-set, apply all staged writes under ascending
    /// variable-id lock order, append buffered ledger entries under a fresh
    /// commit id, and run commit hooks. Returns `Err` on a read-set
    /// conflict, leaving the ambient transaction cleared either way.
    pub fn commit(ledger: &Ledger) -> Result<(), CommitError> {
        let Some(tx) = take_current() else {
            return Ok(());
        };

        // Read-only fast path: no writes, no ledger entries, no hooks.
        // Validate under an atomic read of versions and return without ever
        // touching a lock.
        if tx.write_set.is_empty() && tx.buffered_ledger_entries.is_empty() && tx.commit_hooks.is_empty() {
            for (id, (any, version)) in &tx.read_set {
                if any.version() != *version {
                    return Err(CommitError::Conflict(*id));
                }
            }
            return Ok(());
        }

        // Ascending variable-id lock order over the union of the read-set
        // and write-set, so two transactions with overlapping variables can
        // never deadlock against each other.
        let mut by_id: BTreeMap<VariableId, Arc<dyn AnyVariable>> = BTreeMap::new();
        for (id, (any, _)) in &tx.read_set {
            by_id.insert(*id, Arc::clone(any));
        }
        for write in &tx.write_set {
            let any = write.any();
            by_id.insert(any.id(), any);
        }

        let _guards: Vec<_> = by_id.values().map(|v| v.commit_lock().lock()).collect();

        for (id, (any, version)) in &tx.read_set {
            if any.version() != *version {
                warn!(variable = ?id, "stm conflict at commit validation, retry required");
                return Err(CommitError::Conflict(*id));
            }
        }

        let commit_id = CommitId::next();
        for write in &tx.write_set {
            write.apply();
        }
        ledger.append(tx.buffered_ledger_entries, commit_id);

        drop(_guards);

        for hook in tx.commit_hooks {
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(hook)) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                warn!(commit_id = ?commit_id, %message, "commit hook panicked, continuing");
            }
        }

        debug!(commit_id = ?commit_id, writes = by_id.len(), "stm transaction committed");
        Ok(())
    }

    /// Abort the current transaction: discard its writes and buffered ledger
    /// entries without applying anything. Used when user-body code raises
    /// an exception inside a transaction that has not yet committed.
    pub fn abort() {
        take_current();
    }

    /// `begin` → `body` → `commit`, retrying on [`CommitError::Conflict`] up
    /// to `max_retries` times. Any other error (there is only one variant
    /// today) propagates immediately.
    pub fn run_with_retry<R>(
        ledger: &Ledger,
        max_retries: u32,
        mut body: impl FnMut() -> R,
    ) -> Result<R, CommitError> {
        let mut attempt = 0;
        loop {
            Self::begin();
            let result = body();
            match Self::commit(ledger) {
                Ok(()) => return Ok(result),
                Err(err @ CommitError::Conflict(_)) => {
                    attempt += 1;
                    if attempt > max_retries {
                        return Err(err);
                    }
                }
            }
        }
    }
}
