//! Scenario S4: concurrent STM transactions against the same variable.
//!
//! Several threads each run a read-increment-write loop through
//! [`Transaction::run_with_retry`] against one shared counter. The safety
//! property under test is testable property 4 (`spec.md` §8): of two
//! transactions with overlapping write-sets, at most one commits without
//! retry, and no update is ever lost. Whether any individual attempt
//! actually observes a conflict is a scheduling artifact of how the OS
//! interleaves the threads, so this test asserts the invariant that must
//! hold regardless — the final count — rather than a specific retry count.

use std::sync::Arc;

use chronovar_core::slice::ValueSet;
use chronovar_core::{Ledger, Registry, Transaction};

#[test]
fn concurrent_incrementers_lose_no_updates() {
    let registry = Registry::new();
    let ledger = Arc::new(Ledger::new());
    let counter = registry.get_or_create::<i64, ValueSet<i64>>("counter", || ValueSet::singleton(0));

    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let counter = Arc::clone(&counter);
            let ledger = Arc::clone(&ledger);
            std::thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    Transaction::run_with_retry(&ledger, 64, || {
                        Transaction::record_read(&counter);
                        let current = counter.to_values().first().copied().unwrap_or(0);
                        counter.assign_value(current + 1);
                    })
                    .expect("retry budget is generous enough for this contention level");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(counter.to_values(), vec![(THREADS * PER_THREAD) as i64]);
}
