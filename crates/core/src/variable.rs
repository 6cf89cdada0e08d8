//! The positronic variable (`spec.md` §4.2, component C4) and its identity.

use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::archivist::Snapshot;
use crate::slice::Slice;
use crate::timeline::Timeline;

/// Monotonically-increasing, process-wide variable identity.
///
/// Used for ascending-order lock acquisition in STM commits (`spec.md` §4.6,
/// invariant 5) and as the key into per-run snapshot archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableId(u64);

impl VariableId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity key a [`crate::registry::Registry`] uses to find-or-create a
/// variable: a stable type tag plus the caller's name, replacing reflection-
/// based keying (`spec.md` §9 design notes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct VariableKey {
    type_tag: TypeId,
    name: String,
}

impl VariableKey {
    pub(crate) fn new<T: 'static>(name: impl Into<String>) -> Self {
        Self {
            type_tag: TypeId::of::<T>(),
            name: name.into(),
        }
    }
}

/// Outcome of a single merge-rule application (`spec.md` §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteKind {
    BootstrapReplace,
    NoOp,
    Unify,
    Append,
}

/// Object-safe view of a variable, used by [`crate::transaction::Transaction`]
/// to lock and validate variables of heterogeneous value types in one commit,
/// and by [`crate::engine::Engine`] to iterate every registered variable
/// without naming its type parameter.
///
/// Every concrete [`Variable<T, S>`] carries its own typed `data` mutex for
/// the timeline itself; `commit_lock` is a second, uniformly-typed
/// (`Mutex<()>`) lock used purely to serialize and order STM commits across
/// variables of different `T`. Acquiring it never requires knowing `T`,
/// which is what lets [`crate::transaction::Transaction::commit`] collect a
/// `Vec<parking_lot::MutexGuard<'_, ()>>` for an arbitrary mix of variables
/// sorted by [`VariableId`] — see `DESIGN.md` for why this two-lock split
/// exists.
pub(crate) trait AnyVariable: Send + Sync {
    fn id(&self) -> VariableId;
    fn version(&self) -> u64;
    fn commit_lock(&self) -> &Mutex<()>;
    /// Snapshot the current tail as the mark to diff against at pass end.
    fn mark_forward_pass_start(&self);
    /// True if the tail is unchanged (by set equality) since the last mark.
    fn tail_unchanged_since_mark(&self) -> bool;
    /// Collapse the whole timeline into one union tail slice (`spec.md` §4.2).
    fn unify_all(&self);
    fn timeline_len(&self) -> usize;
}

pub(crate) struct VariableData<S> {
    pub(crate) timeline: Timeline<S>,
    pub(crate) first_append_seen: bool,
    pub(crate) state_read_in_current_forward_pass: bool,
}

/// Owns the ordered timeline of slices for one logical name (`spec.md` §3
/// "Variable", §4.2).
pub struct Variable<T, S: Slice<T>> {
    id: VariableId,
    pub(crate) key: VariableKey,
    version: AtomicU64,
    pub(crate) commit_lock: Mutex<()>,
    pub(crate) data: Mutex<VariableData<S>>,
    pub(crate) snapshots: Mutex<Vec<Snapshot<S>>>,
    snapshot_seq: AtomicU64,
    pub(crate) backups: Mutex<Vec<Timeline<S>>>,
    forward_mark: Mutex<Option<S>>,
    _value: std::marker::PhantomData<T>,
}

impl<T, S> Variable<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: Slice<T>,
{
    pub(crate) fn new(key: VariableKey, bootstrap: S) -> Arc<Self> {
        Arc::new(Self {
            id: VariableId::next(),
            key,
            version: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
            data: Mutex::new(VariableData {
                timeline: Timeline::new(bootstrap),
                first_append_seen: false,
                state_read_in_current_forward_pass: false,
            }),
            snapshots: Mutex::new(Vec::new()),
            backups: Mutex::new(Vec::new()),
            forward_mark: Mutex::new(None),
            _value: std::marker::PhantomData,
        })
    }

    #[must_use]
    pub fn id(&self) -> VariableId {
        self.id
    }

    /// Returns the tail of the timeline; sets the "read during current
    /// forward pass" marker used by the open-question resolution in
    /// `DESIGN.md` (`spec.md` §4.2/§9).
    #[must_use]
    pub fn read(&self) -> S {
        let mut data = self.data.lock();
        data.state_read_in_current_forward_pass = true;
        data.timeline.tail().clone()
    }

    /// Collapsed values of the tail slice (`spec.md` §4.2 `to-values`).
    #[must_use]
    pub fn to_values(&self) -> Vec<T> {
        self.data.lock().timeline.tail().collapsed_values()
    }

    #[must_use]
    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Full-replace the variable's value with `slice` (`spec.md` §4.2/§4.9).
    /// `bootstrap_replace_allowed` is true exactly when the runtime is in
    /// the convergence loop with `entropy > 0` (the first branch of §4.9).
    pub(crate) fn apply_merge(&self, slice: S, bootstrap_replace_allowed: bool) -> WriteKind {
        self.apply_merge_inner(slice, bootstrap_replace_allowed, false)
    }

    /// As [`Self::apply_merge`], but first clones the pre-mutation timeline
    /// onto the backup stack whenever the merge is not a no-op, under the
    /// same lock acquisition used to decide the merge kind. This is what
    /// lets [`crate::operation::StructuralOp::undo`] pop a backup that is
    /// guaranteed to correspond 1:1 with a buffered ledger entry — deciding
    /// the kind and pushing the backup as two separate locked sections would
    /// let a no-op mutation push an orphaned backup that a later, unrelated
    /// undo would wrongly consume.
    pub(crate) fn apply_merge_recording_backup(&self, slice: S, bootstrap_replace_allowed: bool) -> WriteKind {
        self.apply_merge_inner(slice, bootstrap_replace_allowed, true)
    }

    fn apply_merge_inner(&self, slice: S, bootstrap_replace_allowed: bool, record_backup: bool) -> WriteKind {
        let mut data = self.data.lock();
        let kind = Self::decide_merge(&data.timeline, &slice, bootstrap_replace_allowed);
        if record_backup && !matches!(kind, WriteKind::NoOp) {
            self.backups.lock().push(data.timeline.clone());
        }
        match kind {
            WriteKind::NoOp => {}
            WriteKind::BootstrapReplace => {
                data.timeline.reseed_bootstrap(slice);
            }
            WriteKind::Append => {
                data.timeline.push(slice);
                data.first_append_seen = true;
            }
            WriteKind::Unify => {
                let index = data
                    .timeline
                    .index_of::<T>(&slice)
                    .expect("Unify only chosen when a prior slice matches");
                let mut union = data.timeline.tail().clone();
                for existing in data.timeline.iter().skip(index) {
                    union = union.union(existing);
                }
                union = union.union(&slice);
                data.timeline.collapse_to(index, union);
                data.first_append_seen = true;
            }
        }
        data.state_read_in_current_forward_pass = false;
        drop(data);
        if !matches!(kind, WriteKind::NoOp) {
            self.version.fetch_add(1, Ordering::SeqCst);
            self.publish_snapshot();
        }
        kind
    }

    /// Preview which branch of the merge rule (`spec.md` §4.9) `slice` would
    /// take against the variable's current tail, without mutating anything.
    /// Used by [`crate::ops`] to decide, before staging anything, whether an
    /// `assign()` call is a true no-op — see `DESIGN.md` for why that
    /// decision must be made synchronously rather than deferred to commit.
    pub(crate) fn preview_merge_kind(&self, slice: &S, bootstrap_replace_allowed: bool) -> WriteKind {
        Self::decide_merge(&self.data.lock().timeline, slice, bootstrap_replace_allowed)
    }

    fn decide_merge(timeline: &Timeline<S>, slice: &S, bootstrap_replace_allowed: bool) -> WriteKind {
        if timeline.len() == 1 && bootstrap_replace_allowed {
            return WriteKind::BootstrapReplace;
        }
        if slice.set_eq(timeline.tail()) {
            return WriteKind::NoOp;
        }
        if timeline.index_of::<T>(slice).is_some() {
            return WriteKind::Unify;
        }
        WriteKind::Append
    }

    /// Overwrite the tail outright, bypassing the assign merge rule entirely
    /// (`spec.md` §4.6 write-kind `ReplaceLast`). This is the forward
    /// application arithmetic operations use: `spec.md` §4.2 stages "a write
    /// of the new tail slice" for `add`/`sub`/etc, as distinct from
    /// `assign`'s history-scanning Append/Unify/NoOp/BootstrapReplace rule
    /// in §4.9. No backup is recorded — arithmetic undo recomputes an
    /// algebraic inverse instead of popping a snapshot (see `DESIGN.md`).
    pub(crate) fn replace_tail(&self, slice: S) {
        let mut data = self.data.lock();
        data.timeline.replace_tail(slice);
        data.state_read_in_current_forward_pass = false;
        drop(data);
        self.version.fetch_add(1, Ordering::SeqCst);
        self.publish_snapshot();
    }

    /// As [`Self::replace_tail`], named for its other call site: restoring a
    /// pre-mutation snapshot on undo of an irreversible operation (`spec.md`
    /// §4.3). Mechanically identical.
    pub(crate) fn restore_tail_verbatim(&self, slice: S) {
        self.replace_tail(slice);
    }

    /// Truncate to length 1 and reseed index 0 (`spec.md` §4.2
    /// `replace-forward-history-with`), used by backup restoration.
    pub(crate) fn replace_forward_history_with(&self, slice: S) {
        let mut data = self.data.lock();
        data.timeline.reseed_bootstrap(slice);
        drop(data);
        self.version.fetch_add(1, Ordering::SeqCst);
        self.publish_snapshot();
    }

    /// `append-from-reverse` (`spec.md` §4.2): the same merge rule as
    /// `assign`, with bootstrap-replace disabled, since it only ever runs
    /// outside the `entropy > 0` branch.
    pub(crate) fn append_from_reverse(&self, slice: S) -> WriteKind {
        self.apply_merge(slice, false)
    }

    /// Collapse the entire timeline into one union tail slice (`spec.md` §4.2).
    pub fn unify_all(&self) {
        let mut data = self.data.lock();
        if data.timeline.len() <= 1 {
            return;
        }
        let mut union = data.timeline.bootstrap().clone();
        for slice in data.timeline.iter().skip(1) {
            union = union.union(slice);
        }
        data.timeline.collapse_to(0, union);
        drop(data);
        self.version.fetch_add(1, Ordering::SeqCst);
        self.publish_snapshot();
    }

    pub(crate) fn push_backup(&self) {
        self.backups.lock().push(self.data.lock().timeline.clone());
    }

    /// `restore-last-snapshot` (`spec.md` §4.5): pop the backup stack and
    /// restore the timeline wholesale.
    pub(crate) fn restore_last_snapshot(&self) {
        if let Some(backup) = self.backups.lock().pop() {
            let mut data = self.data.lock();
            data.timeline = backup;
            drop(data);
            self.version.fetch_add(1, Ordering::SeqCst);
            self.publish_snapshot();
        }
    }

    pub(crate) fn push_snapshot(&self, snapshot: Snapshot<S>) {
        self.snapshots.lock().push(snapshot);
    }

    /// Capture the current timeline and append it to the snapshot archive
    /// (`spec.md` §4.5 `publish-snapshot`). Called after every committed
    /// mutation, direct or transactional, so readers can inspect history
    /// without ever taking the variable's data lock (`spec.md` §3 "Snapshot").
    fn publish_snapshot(&self) {
        let slices: Vec<S> = self.data.lock().timeline.iter().cloned().collect();
        let sequence = self.snapshot_seq.fetch_add(1, Ordering::SeqCst);
        self.push_snapshot(Snapshot::capture(self.id, self.version(), sequence, &slices));
    }

    /// The published snapshot archive, oldest first. Returns an owned clone
    /// so callers never contend with the variable's data lock to read it.
    #[must_use]
    pub fn snapshots(&self) -> Vec<Snapshot<S>> {
        self.snapshots.lock().clone()
    }

    pub(crate) fn clone_timeline(&self) -> Timeline<S> {
        self.data.lock().timeline.clone()
    }
}

impl<T, S> AnyVariable for Variable<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: Slice<T>,
{
    fn id(&self) -> VariableId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version()
    }

    fn commit_lock(&self) -> &Mutex<()> {
        &self.commit_lock
    }

    fn mark_forward_pass_start(&self) {
        let tail = self.data.lock().timeline.tail().clone();
        *self.forward_mark.lock() = Some(tail);
    }

    fn tail_unchanged_since_mark(&self) -> bool {
        let mark = self.forward_mark.lock();
        match mark.as_ref() {
            Some(mark) => mark.set_eq(self.data.lock().timeline.tail()),
            None => false,
        }
    }

    fn unify_all(&self) {
        Variable::unify_all(self);
    }

    fn timeline_len(&self) -> usize {
        self.data.lock().timeline.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::ValueSet;

    fn fresh(bootstrap: i64) -> Arc<Variable<i64, ValueSet<i64>>> {
        Variable::new(VariableKey::new::<i64>("x"), ValueSet::singleton(bootstrap))
    }

    #[test]
    fn read_returns_bootstrap_before_any_write() {
        let v = fresh(0);
        assert_eq!(v.read().collapsed_values(), vec![0]);
    }

    #[test]
    fn assign_equal_to_tail_is_noop() {
        let v = fresh(5);
        let kind = v.apply_merge(ValueSet::singleton(5), false);
        assert_eq!(kind, WriteKind::NoOp);
        assert_eq!(v.version(), 0);
    }

    #[test]
    fn assign_new_value_appends() {
        let v = fresh(5);
        let kind = v.apply_merge(ValueSet::singleton(6), false);
        assert_eq!(kind, WriteKind::Append);
        assert_eq!(v.to_values(), vec![6]);
        assert_eq!(v.version(), 1);
    }

    #[test]
    fn bootstrap_replace_only_when_allowed_and_at_length_one() {
        let v = fresh(5);
        let kind = v.apply_merge(ValueSet::singleton(6), true);
        assert_eq!(kind, WriteKind::BootstrapReplace);
        assert_eq!(v.clone_timeline().len(), 1);
    }

    #[test]
    fn repeating_a_prior_state_unifies() {
        let v = fresh(1);
        v.apply_merge(ValueSet::singleton(2), false);
        v.apply_merge(ValueSet::singleton(3), false);
        let kind = v.apply_merge(ValueSet::singleton(1), false);
        assert_eq!(kind, WriteKind::Unify);
        assert_eq!(v.clone_timeline().len(), 1);
        let mut values = v.to_values();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn unify_all_collapses_whole_timeline() {
        let v = fresh(1);
        v.apply_merge(ValueSet::singleton(2), false);
        v.apply_merge(ValueSet::singleton(3), false);
        v.unify_all();
        assert_eq!(v.clone_timeline().len(), 1);
        let mut values = v.to_values();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn restore_last_snapshot_pops_backup() {
        let v = fresh(1);
        v.push_backup();
        v.apply_merge(ValueSet::singleton(2), false);
        assert_eq!(v.to_values(), vec![2]);
        v.restore_last_snapshot();
        assert_eq!(v.to_values(), vec![1]);
    }

    #[test]
    fn every_committed_mutation_publishes_a_snapshot() {
        let v = fresh(1);
        assert!(v.snapshots().is_empty(), "no mutation yet, no snapshot");
        v.apply_merge(ValueSet::singleton(1), false);
        assert!(v.snapshots().is_empty(), "a no-op merge publishes nothing");
        v.apply_merge(ValueSet::singleton(2), false);
        let snapshots = v.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].version, v.version());
        assert_eq!(snapshots[0].slices.last().unwrap().collapsed_values(), vec![2]);
        v.unify_all();
        assert_eq!(v.snapshots().len(), 2, "unify_all publishes its own snapshot too");
    }

    #[test]
    fn forward_pass_mark_detects_change() {
        let v = fresh(1);
        v.mark_forward_pass_start();
        assert!(AnyVariable::tail_unchanged_since_mark(v.as_ref()));
        v.apply_merge(ValueSet::singleton(2), false);
        assert!(!AnyVariable::tail_unchanged_since_mark(v.as_ref()));
    }
}
