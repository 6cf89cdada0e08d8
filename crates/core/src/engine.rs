//! The improbability engine (`spec.md` §4.10, component C11): drives the
//! forward/reverse convergence loop and the single final pass whose side
//! effects are the user-visible output.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{EngineConfig, RuntimeState};
use crate::context::{self, ContextGuard};
use crate::entropy::Entropy;
use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::registry::Registry;
use crate::variable::AnyVariable;

/// Owns one convergence run: a variable registry, an undo ledger, and the
/// runtime counters described in `spec.md` §3 "Runtime context".
///
/// An `Engine` is the thread that `spec.md` §5 calls "the coordinator
/// thread" when it is not also driving a [`crate::coordinator::Coordinator`]:
/// `run` executes the user body directly on the calling thread rather than
/// through an STM transaction, since nothing else may observe or mutate a
/// variable mid-loop under the one-writer invariant.
pub struct Engine {
    config: EngineConfig,
    registry: Registry,
    ledger: Arc<Ledger>,
    state: RuntimeState,
}

impl Engine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            ledger: Arc::new(Ledger::new()),
            state: RuntimeState::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Run the convergence loop (`spec.md` §4.10), invoking `body` once per
    /// half-cycle and once more for the final pass. `body` receives the
    /// registry so it can `get_or_create` the variables it reads and writes;
    /// doing this on every call is idempotent (`spec.md` §3 "Variable").
    ///
    /// Returns `Err(EngineError::NonConvergence)` if `max_iterations` is
    /// reached without every variable's tail settling — a returned error,
    /// not a panic, per `spec.md` §7's "warning-level result, not a throw".
    pub fn run(&mut self, mut body: impl FnMut(&Registry)) -> Result<(), EngineError> {
        self.state = RuntimeState::new();
        self.state.in_convergence_loop = true;
        self.ledger.clear();

        loop {
            self.state.iteration += 1;
            let bootstrap_replace_allowed = self.state.entropy.is_forward();

            {
                let _guard = ContextGuard::install(Arc::clone(&self.ledger), bootstrap_replace_allowed);
                context::clear_forced_convergence();
                if self.state.entropy.is_forward() {
                    for variable in self.registry.all() {
                        variable.mark_forward_pass_start();
                    }
                }
                body(&self.registry);
            }

            if self.state.entropy.is_forward() {
                let unchanged = self.registry.all().iter().all(|v| v.tail_unchanged_since_mark());
                if unchanged {
                    self.state.converged = true;
                }
            } else {
                let forced = self.ledger.reverse_all();
                if forced {
                    self.state.converged = true;
                }
            }

            // A Unify during the body (`spec.md` §4.9) forces convergence
            // regardless of which half-cycle it happened on.
            if context::take_forced_convergence() {
                self.state.converged = true;
            }

            self.state.entropy.flip();

            if self.state.iteration >= u64::from(self.config.max_iterations) {
                break;
            }
            if self.state.converged {
                break;
            }
        }

        self.state.in_convergence_loop = false;

        if !self.state.converged {
            warn!(iterations = self.state.iteration, "engine did not converge within max_iterations");
            return Err(EngineError::NonConvergence {
                iterations: self.state.iteration,
            });
        }

        for variable in self.registry.all() {
            if variable.timeline_len() > 1 {
                variable.unify_all();
            }
        }

        self.state.entropy = Entropy::final_pass();
        {
            let _guard = ContextGuard::install(Arc::clone(&self.ledger), false);
            body(&self.registry);
        }

        info!(iterations = self.state.iteration, "engine converged");
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
