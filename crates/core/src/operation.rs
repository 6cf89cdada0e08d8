//! Reversible operations and their ledger entries.
//!
//! Two shapes of undo exist: arithmetic operations recompute an algebraic
//! inverse over the current tail (the default `undo()`); operations that
//! change the *shape* of the timeline (assign's append/unify/bootstrap
//! replace) instead restore a whole-timeline backup captured by the
//! archivist before the mutation. [`LedgerOp`] erases both behind one
//! object-safe interface so [`crate::ledger::Ledger`] can hold a
//! homogeneous stack of heterogeneous operations, the same trick
//! [`crate::variable::AnyVariable`] uses for locks.

use std::sync::Arc;

use crate::slice::Slice;
use crate::variable::{Variable, VariableId};

/// Object-safe undo handle stored in the ledger. `undo` returns `true` when
/// undoing it must force the runtime to converge immediately — the resolved
/// open question for irreversible operators (see `DESIGN.md`).
pub(crate) trait LedgerOp: Send + Sync {
    fn undo(&self) -> bool;
    fn variable_id(&self) -> VariableId;
    fn name(&self) -> &'static str;
}

/// A scalar transform staged as `forward`/`inverse` pair over every value in
/// the variable's current tail (`spec.md` §4.3).
pub(crate) struct ArithmeticOp<T, S> {
    variable: Arc<Variable<T, S>>,
    inverse: Arc<dyn Fn(T) -> T + Send + Sync>,
    /// The tail slice before this operation's forward mutation was applied.
    pre_mutation: S,
    name: &'static str,
    /// True for operators with no algebraic inverse (`mod`, bitwise ops,
    /// shifts): undo restores `pre_mutation` verbatim instead of recomputing.
    irreversible: bool,
}

impl<T, S> ArithmeticOp<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: Slice<T>,
{
    pub(crate) fn new(
        variable: Arc<Variable<T, S>>,
        inverse: Arc<dyn Fn(T) -> T + Send + Sync>,
        pre_mutation: S,
        name: &'static str,
        irreversible: bool,
    ) -> Self {
        Self {
            variable,
            inverse,
            pre_mutation,
            name,
            irreversible,
        }
    }
}

impl<T, S> LedgerOp for ArithmeticOp<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: Slice<T>,
{
    fn undo(&self) -> bool {
        if self.irreversible {
            self.variable.restore_tail_verbatim(self.pre_mutation.clone());
            return true;
        }
        let current = self.variable.read();
        let inverse = Arc::clone(&self.inverse);
        let undone = S::from_values(current.collapsed_values().into_iter().map(move |v| (inverse)(v)));
        self.variable.append_from_reverse(undone);
        false
    }

    fn variable_id(&self) -> VariableId {
        self.variable.id()
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Which structural mutation `assign` performed, recorded so undo can
/// describe itself in traces even though the mechanism (pop the backup
/// stack) is identical for all three (`spec.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StructuralKind {
    Append,
    Unify,
    BootstrapReplace,
}

impl StructuralKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Append => "assign (append)",
            Self::Unify => "assign (unify)",
            Self::BootstrapReplace => "assign (bootstrap replace)",
        }
    }
}

/// Undo for a timeline-shape-changing write: pops the per-variable backup
/// stack pushed by the archivist just before the mutation was applied.
pub(crate) struct StructuralOp<T, S> {
    variable: Arc<Variable<T, S>>,
    kind: StructuralKind,
}

impl<T, S> StructuralOp<T, S> {
    pub(crate) fn new(variable: Arc<Variable<T, S>>, kind: StructuralKind) -> Self {
        Self { variable, kind }
    }
}

impl<T, S> LedgerOp for StructuralOp<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: Slice<T>,
{
    fn undo(&self) -> bool {
        self.variable.restore_last_snapshot();
        false
    }

    fn variable_id(&self) -> VariableId {
        self.variable.id()
    }

    fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}
