//! Scenario S3: a `row` variable seeded with `[1]`, repeatedly assigned its
//! own next Pascal's-triangle row until it is ten wide, then unified. Each
//! intermediate row is distinct content, so every `assign` call appends a
//! fresh slice to the timeline (`spec.md` §4.9's append branch) rather than
//! ever repeating a prior state; `unify_all` then collapses that whole
//! growth history into one multi-valued tail, exercising the same
//! mechanism `unify_all_collapses_whole_timeline` in `variable.rs` checks
//! for scalars, generalised to a structured value type.

use chronovar_core::slice::ValueSet;
use chronovar_core::Registry;

fn next_row(row: &[i64]) -> Vec<i64> {
    let mut next = Vec::with_capacity(row.len() + 1);
    next.push(1);
    for window in row.windows(2) {
        next.push(window[0] + window[1]);
    }
    next.push(1);
    next
}

#[test]
fn growth_history_unifies_into_one_slice_containing_every_row() {
    let registry = Registry::new();
    let row = registry.get_or_create::<Vec<i64>, ValueSet<Vec<i64>>>("row", || ValueSet::singleton(vec![1]));

    let mut current = vec![1];
    while current.len() < 10 {
        current = next_row(&current);
        row.assign_value(current.clone());
    }
    assert_eq!(row.to_values(), vec![current.clone()], "tail is the most recently assigned row before unification");
    assert_eq!(current, vec![1, 9, 36, 84, 126, 126, 84, 36, 9, 1]);

    row.unify_all();

    let values = row.to_values();
    assert_eq!(values.len(), 10, "every distinct row seen along the way survives the unification");
    assert!(values.contains(&vec![1, 9, 36, 84, 126, 126, 84, 36, 9, 1]));
    assert!(values.contains(&vec![1]));
}
