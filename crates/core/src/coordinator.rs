//! The convergence coordinator: a bounded work queue with a single reader
//! thread that serialises every STM commit in the process onto one thread,
//! the same thread that — when the coordinator is driving an
//! [`crate::engine::Engine`] — owns the convergence loop itself (the
//! one-writer invariant).

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::warn;

use crate::ledger::Ledger;
use crate::telemetry::Telemetry;
use crate::transaction::Transaction;

/// A unit of coordinator-scheduled work.
///
/// `build_writes` and `build_commit_hooks` run with an ambient transaction
/// already begun (a thread-local current-transaction, installed by the
/// coordinator loop) — implementations call the ordinary `Variable`
/// mutation methods, which route themselves into that ambient transaction.
pub trait WorkItem: Send {
    /// Stage writes and buffer ledger entries against the ambient transaction.
    fn build_writes(&self);

    /// Register commit hooks against the ambient transaction. Most work
    /// items need none.
    fn build_commit_hooks(&self) {}

    /// Optional read-back performed after a successful commit.
    fn result_after_commit(&self) {}

    /// True for coordinator-internal barrier items (currently only
    /// [`FlushMarker`]), which must not count toward the `enqueued`/
    /// `processed` telemetry a caller uses to observe `spec.md` §8 property
    /// 6 (`processed == enqueued-at-call`) — they were never part of the
    /// caller's own enqueued workload.
    fn is_internal(&self) -> bool {
        false
    }
}

/// Wraps a plain closure as a [`WorkItem`] with no hooks or read-back, for
/// the common case of "enqueue this mutation".
pub struct FnWorkItem<F: Fn() + Send>(F);

impl<F: Fn() + Send> FnWorkItem<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F: Fn() + Send> WorkItem for FnWorkItem<F> {
    fn build_writes(&self) {
        (self.0)();
    }
}

struct FlushMarker {
    signal: Sender<()>,
}

impl WorkItem for FlushMarker {
    fn build_writes(&self) {}

    fn result_after_commit(&self) {
        let _ = self.signal.send(());
    }

    fn is_internal(&self) -> bool {
        true
    }
}

/// Single-reader bounded work queue serialising all STM commits.
pub struct Coordinator {
    sender: Option<Sender<Box<dyn WorkItem>>>,
    handle: Option<JoinHandle<()>>,
    telemetry: Arc<Telemetry>,
}

impl Coordinator {
    /// Spawn the coordinator thread using an [`crate::config::EngineConfig`]'s
    /// `queue_capacity` and `default_max_retries` (`spec.md` §4.7's "capacity
    /// configurable; default 1024").
    #[must_use]
    pub fn for_engine(config: &crate::config::EngineConfig, ledger: Arc<Ledger>) -> Self {
        Self::new(ledger, config.queue_capacity, config.default_max_retries)
    }

    /// Spawn the coordinator thread with the given queue `capacity` and
    /// per-item STM retry budget, committing against `ledger`.
    #[must_use]
    pub fn new(ledger: Arc<Ledger>, capacity: usize, max_retries: u32) -> Self {
        let (sender, receiver): (Sender<Box<dyn WorkItem>>, Receiver<Box<dyn WorkItem>>) = bounded(capacity);
        let telemetry = Arc::new(Telemetry::new());
        let telemetry_worker = Arc::clone(&telemetry);
        let handle = std::thread::spawn(move || Self::worker_loop(&receiver, &ledger, max_retries, &telemetry_worker));
        Self {
            sender: Some(sender),
            handle: Some(handle),
            telemetry,
        }
    }

    fn worker_loop(receiver: &Receiver<Box<dyn WorkItem>>, ledger: &Arc<Ledger>, max_retries: u32, telemetry: &Telemetry) {
        while let Ok(item) = receiver.recv() {
            let internal = item.is_internal();
            let mut attempt = 0;
            loop {
                Transaction::begin();
                item.build_writes();
                item.build_commit_hooks();
                match Transaction::commit(ledger) {
                    Ok(()) => {
                        if !internal {
                            telemetry.record_commit();
                            if attempt > 0 {
                                telemetry.record_retry();
                            }
                        }
                        item.result_after_commit();
                        break;
                    }
                    Err(err) => {
                        if !internal {
                            telemetry.record_validation_failure();
                        }
                        attempt += 1;
                        if attempt > max_retries {
                            if !internal {
                                telemetry.record_abort();
                            }
                            warn!(error = %err, attempts = attempt, "coordinator work item aborted after exhausting retries");
                            break;
                        }
                    }
                }
            }
            if !internal {
                telemetry.record_processed();
            }
        }
    }

    /// Enqueue `item`, blocking if the bounded channel is full.
    ///
    /// # Panics
    /// Panics if the coordinator has already been [`disposed`](Self::dispose).
    pub fn enqueue(&self, item: impl WorkItem + 'static) {
        if !item.is_internal() {
            self.telemetry.record_enqueued();
        }
        self.sender
            .as_ref()
            .expect("coordinator has been disposed")
            .send(Box::new(item))
            .expect("coordinator worker thread is still running");
    }

    /// Block until every item enqueued strictly before this call has been
    /// processed. Implemented by enqueueing a barrier item behind them on
    /// the same FIFO queue, rather than polling a counter, so it is correct
    /// even with other producers enqueueing concurrently.
    pub fn flush(&self) {
        let (signal, done) = bounded(1);
        self.enqueue(FlushMarker { signal });
        let _ = done.recv();
    }

    #[must_use]
    pub fn telemetry(&self) -> Arc<Telemetry> {
        Arc::clone(&self.telemetry)
    }

    /// Cancel the worker. Drops the sending half so the worker's blocking
    /// `recv` returns and the loop exits, then waits up to a short grace
    /// period (≈250ms) for it to actually finish before giving up on
    /// waiting — the worker thread itself is still allowed to run to
    /// completion in the background, since Rust threads cannot be forcibly
    /// killed.
    pub fn dispose(mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let _ = handle.join();
                let _ = done_tx.send(());
            });
            let _ = done_rx.recv_timeout(Duration::from_millis(250));
        }
    }
}
