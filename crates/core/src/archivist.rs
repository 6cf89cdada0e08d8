//! Snapshot archive (`spec.md` §4.5, component C6).
//!
//! The archivist is the only code path allowed to mutate a
//! [`crate::timeline::Timeline`]. It owns two append-only records per
//! variable: a public, inspectable snapshot history (`snapshots`, this
//! module's [`Snapshot`]) and a private backup stack used purely to undo
//! timeline-structural writes (`crate::variable::Variable::backups`).

/// Immutable record of a variable's timeline at one point in time
/// (`spec.md` §3 "Snapshot": variable id, version, cloned slices, timestamp).
#[derive(Debug, Clone)]
pub struct Snapshot<S> {
    pub variable_id: crate::variable::VariableId,
    pub version: u64,
    pub slices: Vec<S>,
    pub sequence: u64,
}

impl<S: Clone> Snapshot<S> {
    #[must_use]
    pub(crate) fn capture(variable_id: crate::variable::VariableId, version: u64, sequence: u64, slices: &[S]) -> Self {
        Self {
            variable_id,
            version,
            slices: slices.to_vec(),
            sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::{Slice, ValueSet};
    use crate::variable::Variable;
    use crate::variable::VariableKey;

    #[test]
    fn capture_clones_current_slices() {
        let v = Variable::<i64, ValueSet<i64>>::new(VariableKey::new::<i64>("x"), ValueSet::singleton(1));
        let timeline = v.clone_timeline();
        let slices: Vec<_> = timeline.iter().cloned().collect();
        let snap = Snapshot::capture(v.id(), v.version(), 0, &slices);
        assert_eq!(snap.slices.len(), 1);
        assert_eq!(snap.slices[0].collapsed_values(), vec![1]);
    }
}
