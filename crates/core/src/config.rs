//! Engine tunables and per-run counters.
//!
//! [`EngineConfig`] holds the tunables a caller supplies once, built with
//! `typed-builder`; [`RuntimeState`] holds the counters (entropy sign,
//! converged flag, iteration count, convergence-loop flag) that reset every
//! time [`crate::engine::Engine::run`] is called.

use typed_builder::TypedBuilder;

use crate::entropy::Entropy;

/// Tunables for one [`crate::engine::Engine`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct EngineConfig {
    /// Upper bound on half-cycle iterations before giving up (default 1000).
    #[builder(default = 1000)]
    pub max_iterations: u32,

    /// Capacity of the coordinator's bounded work queue (default 1024).
    #[builder(default = 1024)]
    pub queue_capacity: usize,

    /// Default retry budget for `Transaction::run_with_retry`.
    #[builder(default = 16)]
    pub default_max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Per-run mutable counters.
#[derive(Debug, Clone)]
pub struct RuntimeState {
    pub entropy: Entropy,
    pub converged: bool,
    pub iteration: u64,
    pub in_convergence_loop: bool,
}

impl RuntimeState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entropy: Entropy::initialise(),
            converged: false,
            iteration: 0,
            in_convergence_loop: false,
        }
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_documented_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_iterations, 1000);
        assert_eq!(config.queue_capacity, 1024);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = EngineConfig::builder().max_iterations(5).build();
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.queue_capacity, 1024);
    }

    #[test]
    fn fresh_runtime_state_starts_reverse_and_unconverged() {
        let state = RuntimeState::new();
        assert!(state.entropy.is_reverse());
        assert!(!state.converged);
        assert_eq!(state.iteration, 0);
        assert!(!state.in_convergence_loop);
    }
}
