//! Public mutation surface of [`crate::variable::Variable`] (`spec.md` §4.2,
//! §4.3, §4.9, §6 "Variable API"): `assign`, the arithmetic/bitwise
//! operators, and the routing between the ambient STM transaction and the
//! direct ledger path that backs them.
//!
//! Every method here follows the same shape: compute the forward result,
//! decide whether an ambient [`crate::transaction::Transaction`] is active,
//! and either stage the write against it or apply it immediately and record
//! it on the ambient [`crate::ledger::Ledger`] installed by
//! [`crate::engine::Engine::run`]. This is the "push an operation record to
//! the current STM transaction (or directly to the ledger outside a
//! transaction)" routing `spec.md` §4.2 describes.

use std::sync::Arc;

use crate::context;
use crate::ledger::CommitId;
use crate::operation::{ArithmeticOp, StructuralKind, StructuralOp};
use crate::slice::Slice;
use crate::transaction::{MergeWrite, ReplaceLastWrite, StagedWrite, Transaction};
use crate::variable::{Variable, WriteKind};

fn in_transaction() -> bool {
    crate::transaction::with_current(|tx| tx.is_some())
}

fn record_to_ledger_if_direct(op: Box<dyn crate::operation::LedgerOp>) {
    context::with_current_ledger(|ledger| {
        if let Some(ledger) = ledger {
            ledger.append(vec![op], CommitId::next());
        }
    });
}

fn structural_kind_of(kind: WriteKind) -> StructuralKind {
    match kind {
        WriteKind::BootstrapReplace => StructuralKind::BootstrapReplace,
        WriteKind::Unify => StructuralKind::Unify,
        WriteKind::Append | WriteKind::NoOp => StructuralKind::Append,
    }
}

impl<T, S> Variable<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: Slice<T>,
{
    /// Full-replace (`spec.md` §4.2 `assign(slice)`, §4.9 merge rules).
    ///
    /// The no-op branch is decided synchronously against the variable's
    /// current state before anything is staged: this crate's one-coordinator
    /// model (`spec.md` §5) means nothing else can mutate the variable
    /// between this preview and the write being applied, so the preview is
    /// exact. Deciding it this early, rather than at commit time, is what
    /// lets a true no-op skip the backup stack entirely instead of recording
    /// a [`StructuralOp`] with no matching backup to undo (see `DESIGN.md`).
    pub fn assign(self: &Arc<Self>, slice: S) {
        let allowed = context::bootstrap_replace_allowed();
        let kind = self.preview_merge_kind(&slice, allowed);
        if matches!(kind, WriteKind::NoOp) {
            return;
        }
        if matches!(kind, WriteKind::Unify) {
            context::mark_forced_convergence();
        }
        let ledger_op: Box<dyn crate::operation::LedgerOp> =
            Box::new(StructuralOp::new(Arc::clone(self), structural_kind_of(kind)));
        let write: Box<dyn StagedWrite> = Box::new(MergeWrite {
            variable: Arc::clone(self),
            slice,
            bootstrap_replace_allowed: allowed,
        });
        if in_transaction() {
            Transaction::record_read(self);
            Transaction::stage_write(write);
            Transaction::buffer_ledger_entry(ledger_op);
        } else {
            write.apply();
            record_to_ledger_if_direct(ledger_op);
        }
    }

    /// Shorthand for [`Self::assign`] wrapping a single value in a slice.
    pub fn assign_value(self: &Arc<Self>, value: T) {
        self.assign(S::from_values([value]));
    }

    fn apply_reversible(
        self: &Arc<Self>,
        name: &'static str,
        forward: impl Fn(T) -> T,
        inverse: impl Fn(T) -> T + Send + Sync + 'static,
    ) {
        self.record_arithmetic(name, forward, inverse, false);
    }

    fn apply_irreversible(self: &Arc<Self>, name: &'static str, forward: impl Fn(T) -> T) {
        self.record_arithmetic(name, forward, |x| x, true);
    }

    /// Forward-applies `forward` over the current tail's collapsed values and
    /// stages the result as a `ReplaceLast` write (`spec.md` §4.2, §4.6) —
    /// unlike `assign`, this never scans history or unifies: the tail is
    /// simply overwritten, and undo (via the buffered `ArithmeticOp`) is what
    /// carries the history-aware "replace-or-unify" semantics `spec.md` §4.3
    /// describes for reverse passes.
    fn record_arithmetic(
        self: &Arc<Self>,
        name: &'static str,
        forward: impl Fn(T) -> T,
        inverse: impl Fn(T) -> T + Send + Sync + 'static,
        irreversible: bool,
    ) {
        let pre = self.read();
        let new_values: Vec<T> = pre.collapsed_values().into_iter().map(forward).collect();
        let new_slice = S::from_values(new_values);
        let ledger_op: Box<dyn crate::operation::LedgerOp> =
            Box::new(ArithmeticOp::new(Arc::clone(self), Arc::new(inverse), pre, name, irreversible));
        let write: Box<dyn StagedWrite> = Box::new(ReplaceLastWrite {
            variable: Arc::clone(self),
            slice: new_slice,
        });
        if in_transaction() {
            Transaction::record_read(self);
            Transaction::stage_write(write);
            Transaction::buffer_ledger_entry(ledger_op);
        } else {
            write.apply();
            record_to_ledger_if_direct(ledger_op);
        }
    }
}

impl<T, S> Variable<T, S>
where
    T: Copy + Send + Sync + 'static + std::ops::Add<Output = T> + std::ops::Sub<Output = T>,
    S: Slice<T>,
{
    /// `x := x + rhs` (`spec.md` §4.3 `add`).
    pub fn add(self: &Arc<Self>, rhs: T) {
        self.apply_reversible("add", move |x| x + rhs, move |x| x - rhs);
    }

    /// `x := x - rhs` (`spec.md` §4.3 `sub`).
    pub fn sub(self: &Arc<Self>, rhs: T) {
        self.apply_reversible("sub", move |x| x - rhs, move |x| x + rhs);
    }

    /// `x := lhs - x` (`spec.md` §4.3 `sub-reversed`), its own inverse.
    pub fn sub_reversed(self: &Arc<Self>, lhs: T) {
        self.apply_reversible("sub_reversed", move |x| lhs - x, move |x| lhs - x);
    }
}

impl<T, S> Variable<T, S>
where
    T: Copy + Send + Sync + 'static + std::ops::Mul<Output = T> + std::ops::Div<Output = T>,
    S: Slice<T>,
{
    /// `x := x * rhs` (`spec.md` §4.3 `mul`).
    pub fn mul(self: &Arc<Self>, rhs: T) {
        self.apply_reversible("mul", move |x| x * rhs, move |x| x / rhs);
    }

    /// `x := x / rhs` (`spec.md` §4.3 `div`).
    pub fn div(self: &Arc<Self>, rhs: T) {
        self.apply_reversible("div", move |x| x / rhs, move |x| x * rhs);
    }

    /// `x := lhs / x` (`spec.md` §4.3 `div-reversed`), its own inverse.
    pub fn div_reversed(self: &Arc<Self>, lhs: T) {
        self.apply_reversible("div_reversed", move |x| lhs / x, move |x| lhs / x);
    }
}

impl<T, S> Variable<T, S>
where
    T: Copy + Send + Sync + 'static + std::ops::Neg<Output = T>,
    S: Slice<T>,
{
    /// `x := -x` (`spec.md` §4.3 `neg`), its own inverse — this is the
    /// "antival paradox" operator exercised by scenario S1.
    pub fn neg(self: &Arc<Self>) {
        self.apply_reversible("neg", move |x| -x, move |x| -x);
    }
}

impl<T, S> Variable<T, S>
where
    T: Copy + Send + Sync + 'static + std::ops::Rem<Output = T>,
    S: Slice<T>,
{
    /// `x := x % rhs` (`spec.md` §4.3 `mod`).
    ///
    /// `DESIGN.md` resolves the open question on modulus-undo policy: like
    /// OR and the shifts, modulus discards information (the quotient), so
    /// undo restores the pre-mutation snapshot and forces the runtime to
    /// converge immediately rather than attempting an algebraic inverse.
    pub fn rem(self: &Arc<Self>, rhs: T) {
        self.apply_irreversible("mod", move |x| x % rhs);
    }
}

/// Integer/boolean value types whose bitwise AND/OR/XOR/NOT are meaningful.
/// Replaces `spec.md` §9's "type-capability marker" with a compile-time
/// bound: a caller can simply never name `.bitand()` etc. on a `Variable<f64, _>`,
/// so `EngineError::UnsupportedOperand` is reserved for call sites that must
/// dispatch dynamically rather than ever firing from these methods.
pub trait BitwiseCapable:
    Copy
    + std::ops::BitAnd<Output = Self>
    + std::ops::BitOr<Output = Self>
    + std::ops::BitXor<Output = Self>
    + std::ops::Not<Output = Self>
{
}

macro_rules! impl_bitwise_capable {
    ($($t:ty),* $(,)?) => {
        $(impl BitwiseCapable for $t {})*
    };
}

impl_bitwise_capable!(bool, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl<T, S> Variable<T, S>
where
    T: BitwiseCapable + Send + Sync + 'static,
    S: Slice<T>,
{
    /// `x := x & rhs` (`spec.md` §4.3 `bit-and`). Lossy (bits that were 1
    /// may become 0 and cannot be recovered), so undo restores the snapshot
    /// and forces convergence, per the irreversible-operator policy.
    pub fn bitand(self: &Arc<Self>, rhs: T) {
        self.apply_irreversible("bitand", move |x| x & rhs);
    }

    /// `x := x | rhs` (`spec.md` §4.3 `bit-or`). Lossy in the same way as
    /// `bitand`, in the opposite direction.
    pub fn bitor(self: &Arc<Self>, rhs: T) {
        self.apply_irreversible("bitor", move |x| x | rhs);
    }

    /// `x := x ^ rhs` (`spec.md` §4.3 `bit-xor`). Lossless: XOR with the
    /// same `rhs` twice is the identity, so this has a genuine algebraic
    /// inverse and does not force convergence.
    pub fn bitxor(self: &Arc<Self>, rhs: T) {
        self.apply_reversible("bitxor", move |x| x ^ rhs, move |x| x ^ rhs);
    }

    /// `x := !x` (`spec.md` §4.3 `bit-not`). Lossless and its own inverse.
    pub fn bitnot(self: &Arc<Self>) {
        self.apply_reversible("bitnot", move |x| !x, move |x| !x);
    }
}

/// Integer value types whose shift operators are meaningful (excludes
/// `bool`, unlike [`BitwiseCapable`]).
pub trait ShiftCapable: Copy + std::ops::Shl<u32, Output = Self> + std::ops::Shr<u32, Output = Self> {}

macro_rules! impl_shift_capable {
    ($($t:ty),* $(,)?) => {
        $(impl ShiftCapable for $t {})*
    };
}

impl_shift_capable!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl<T, S> Variable<T, S>
where
    T: ShiftCapable + Send + Sync + 'static,
    S: Slice<T>,
{
    /// `x := x << rhs` (`spec.md` §4.3 `shift-left`). Bits shifted out of
    /// the top are lost, so undo restores the snapshot and forces
    /// convergence.
    pub fn shl(self: &Arc<Self>, rhs: u32) {
        self.apply_irreversible("shl", move |x| x << rhs);
    }

    /// `x := x >> rhs` (`spec.md` §4.3 `shift-right`). Bits shifted out of
    /// the bottom are lost, so undo restores the snapshot and forces
    /// convergence.
    pub fn shr(self: &Arc<Self>, rhs: u32) {
        self.apply_irreversible("shr", move |x| x >> rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::ValueSet;
    use crate::variable::VariableKey;

    fn fresh(bootstrap: i64) -> Arc<Variable<i64, ValueSet<i64>>> {
        Variable::new(VariableKey::new::<i64>("x"), ValueSet::singleton(bootstrap))
    }

    #[test]
    fn assign_outside_transaction_applies_immediately() {
        let v = fresh(1);
        v.assign_value(2);
        assert_eq!(v.to_values(), vec![2]);
        assert_eq!(v.version(), 1);
    }

    #[test]
    fn assign_same_value_is_a_true_noop() {
        let v = fresh(5);
        v.assign_value(5);
        assert_eq!(v.version(), 0);
    }

    #[test]
    fn add_then_sub_round_trips() {
        let v = fresh(10);
        v.add(5);
        assert_eq!(v.to_values(), vec![15]);
        v.sub(5);
        assert_eq!(v.to_values(), vec![10]);
    }

    #[test]
    fn neg_is_its_own_inverse() {
        let v = fresh(3);
        v.neg();
        assert_eq!(v.to_values(), vec![-3]);
        v.neg();
        assert_eq!(v.to_values(), vec![3]);
    }

    #[test]
    fn bitxor_round_trips_via_algebraic_inverse() {
        let v = fresh(0b1010);
        v.bitxor(0b0110);
        assert_eq!(v.to_values(), vec![0b1100]);
    }

    #[test]
    fn repeating_a_prior_state_marks_forced_convergence() {
        let v = fresh(1);
        v.assign_value(2);
        v.assign_value(3);
        context::clear_forced_convergence();
        v.assign_value(1);
        assert!(context::take_forced_convergence());
    }

    #[test]
    fn transactional_assign_stages_instead_of_applying_immediately() {
        let v = fresh(1);
        let ledger = crate::ledger::Ledger::new();
        Transaction::begin();
        v.assign_value(2);
        assert_eq!(v.to_values(), vec![1], "write is staged, not yet applied");
        assert!(Transaction::commit(&ledger).is_ok());
        assert_eq!(v.to_values(), vec![2]);
    }
}
