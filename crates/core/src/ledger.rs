//! The undo stack: an idempotent, commit-id-keyed append-only log of
//! [`crate::operation::LedgerOp`] entries, replayed in LIFO order on
//! reverse passes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::operation::LedgerOp;

/// Identifies the set of ledger entries produced by one committed
/// transaction. Idempotency keys on this value, not on the individual
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(u64);

impl CommitId {
    /// Mint a fresh, process-wide unique commit id.
    #[must_use]
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct Inner {
    stack: Vec<(Box<dyn LedgerOp>, CommitId)>,
    seen: HashSet<CommitId>,
}

/// Stack of `(operation, commit-id)` entries plus a seen-commit-id set
/// enforcing idempotency under STM retry.
pub struct Ledger {
    inner: Mutex<Inner>,
}

impl Ledger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                stack: Vec::new(),
                seen: HashSet::new(),
            }),
        }
    }

    /// Push every op in `ops` under the single `commit_id` they share, unless
    /// that commit id has already been recorded, in which case the whole
    /// batch is silently dropped. A committing transaction buffers all of its
    /// ledger entries under one freshly-minted commit id and hands them to
    /// this method together, so a retried attempt that somehow replayed an
    /// already-applied commit id cannot double up the ledger.
    pub fn append(&self, ops: Vec<Box<dyn LedgerOp>>, commit_id: CommitId) {
        if ops.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.seen.insert(commit_id) {
            inner.stack.extend(ops.into_iter().map(|op| (op, commit_id)));
        }
    }

    /// Name of the top-of-stack operation, for diagnostics.
    #[must_use]
    pub fn peek(&self) -> Option<&'static str> {
        self.inner.lock().stack.last().map(|(op, _)| op.name())
    }

    /// Drop the top entry without undoing it.
    pub fn pop(&self) {
        self.inner.lock().stack.pop();
    }

    /// Replay the entire ledger in LIFO order, invoking `undo()` on each
    /// entry. Returns `true` if any undone operation demands the runtime
    /// converge immediately: modulus, OR, and shifts force convergence on
    /// undo because their forward effects cannot be cleanly replayed (see
    /// `DESIGN.md` for the chosen modulus-undo policy).
    pub fn reverse_all(&self) -> bool {
        let mut forced_convergence = false;
        loop {
            let entry = {
                let mut inner = self.inner.lock();
                inner.stack.pop()
            };
            let Some((op, _)) = entry else { break };
            if op.undo() {
                forced_convergence = true;
            }
        }
        forced_convergence
    }

    /// Drop every entry and clear the seen-commit-id set.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.stack.clear();
        inner.seen.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().stack.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().stack.len()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::slice::ValueSet;
    use crate::variable::{Variable, VariableId, VariableKey};

    fn dummy_variable_id() -> VariableId {
        Variable::<i64, ValueSet<i64>>::new(VariableKey::new::<i64>("ledger-test"), ValueSet::singleton(0)).id()
    }

    struct CountingOp {
        calls: Arc<AtomicUsize>,
        forces_convergence: bool,
        variable_id: VariableId,
    }

    impl LedgerOp for CountingOp {
        fn undo(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.forces_convergence
        }

        fn variable_id(&self) -> VariableId {
            self.variable_id
        }

        fn name(&self) -> &'static str {
            "counting-op"
        }
    }

    #[test]
    fn append_and_reverse_all_invokes_undo_in_lifo_order() {
        let ledger = Ledger::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            ledger.append(
                vec![Box::new(CountingOp {
                    calls: Arc::clone(&calls),
                    forces_convergence: false,
                    variable_id: dummy_variable_id(),
                })],
                CommitId::next(),
            );
        }
        assert_eq!(ledger.len(), 3);
        let forced = ledger.reverse_all();
        assert!(!forced);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(ledger.is_empty());
    }

    #[test]
    fn one_commit_id_carries_every_entry_in_its_batch() {
        let ledger = Ledger::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = CommitId::next();
        let ops: Vec<Box<dyn LedgerOp>> = (0..3)
            .map(|_| -> Box<dyn LedgerOp> {
                Box::new(CountingOp {
                    calls: Arc::clone(&calls),
                    forces_convergence: false,
                    variable_id: dummy_variable_id(),
                })
            })
            .collect();
        ledger.append(ops, id);
        assert_eq!(ledger.len(), 3, "all entries in the batch share one commit id");
    }

    #[test]
    fn replaying_an_already_applied_commit_id_is_dropped() {
        let ledger = Ledger::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = CommitId::next();
        ledger.append(
            vec![Box::new(CountingOp {
                calls: Arc::clone(&calls),
                forces_convergence: false,
                variable_id: dummy_variable_id(),
            })],
            id,
        );
        ledger.append(
            vec![Box::new(CountingOp {
                calls: Arc::clone(&calls),
                forces_convergence: false,
                variable_id: dummy_variable_id(),
            })],
            id,
        );
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn reverse_all_reports_forced_convergence() {
        let ledger = Ledger::new();
        let calls = Arc::new(AtomicUsize::new(0));
        ledger.append(
            vec![Box::new(CountingOp {
                calls,
                forces_convergence: true,
                variable_id: dummy_variable_id(),
            })],
            CommitId::next(),
        );
        assert!(ledger.reverse_all());
    }

    #[test]
    fn clear_drops_entries_and_seen_set() {
        let ledger = Ledger::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = CommitId::next();
        ledger.append(
            vec![Box::new(CountingOp {
                calls: Arc::clone(&calls),
                forces_convergence: false,
                variable_id: dummy_variable_id(),
            })],
            id,
        );
        ledger.clear();
        assert!(ledger.is_empty());
        ledger.append(
            vec![Box::new(CountingOp {
                calls,
                forces_convergence: false,
                variable_id: dummy_variable_id(),
            })],
            id,
        );
        assert_eq!(ledger.len(), 1, "same commit id usable again after clear()");
    }
}
