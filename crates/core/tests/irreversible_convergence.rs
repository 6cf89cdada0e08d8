//! Lossy operators (`mod`, bitwise AND/OR, shifts) cannot be algebraically
//! undone, so their undo restores the pre-mutation snapshot and forces the
//! runtime to converge immediately (`spec.md` §4.3, §4.10; the modulus-undo
//! open question resolved in `DESIGN.md`). This exercises that path through
//! the full engine loop rather than `Ledger`/`ArithmeticOp` in isolation.

use chronovar_core::slice::ValueSet;
use chronovar_core::{Engine, EngineConfig};

#[test]
fn modulus_forces_convergence_on_the_first_reverse_pass() {
    let mut engine = Engine::new(EngineConfig::default());
    let result = engine.run(|registry| {
        let v = registry.get_or_create::<i64, ValueSet<i64>>("v", || ValueSet::singleton(7));
        v.rem(3);
    });

    assert!(result.is_ok());
    assert!(engine.state().converged);
    // The reverse half-cycle's undo restores 7, then the one final pass
    // recomputes 7 % 3 itself.
    assert_eq!(engine.state().iteration, 1);
    let v = engine.registry().get_or_create::<i64, ValueSet<i64>>("v", || ValueSet::singleton(7));
    assert_eq!(v.to_values(), vec![1]);
}

#[test]
fn bitor_is_lossy_and_also_forces_convergence() {
    let mut engine = Engine::new(EngineConfig::default());
    let result = engine.run(|registry| {
        let flags = registry.get_or_create::<u8, ValueSet<u8>>("flags", || ValueSet::singleton(0b0100));
        flags.bitor(0b0011);
    });

    assert!(result.is_ok());
    assert!(engine.state().converged);
    let flags = engine.registry().get_or_create::<u8, ValueSet<u8>>("flags", || ValueSet::singleton(0b0100));
    assert_eq!(flags.to_values(), vec![0b0111]);
}
