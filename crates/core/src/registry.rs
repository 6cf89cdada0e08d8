//! Identity map from `(type, name)` to variable instance (`spec.md` §3
//! "Variable" identity, component C3).
//!
//! Variables are created lazily on first [`Registry::get_or_create`] and
//! live for as long as the registry (one registry per [`crate::engine::Engine`]
//! run, matching `spec.md`'s "scope-bounded lifetime"). Cyclic references
//! between variables and their operation records are avoided the way `spec.md`
//! §9 prescribes: operation records hold only a [`VariableId`] plus an `Arc`
//! to the concrete variable they were built against, never a back-reference
//! into the registry itself.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::slice::Slice;
use crate::variable::{AnyVariable, Variable, VariableKey};

/// Type-erased store of every variable created during one engine run.
pub struct Registry {
    by_key: Mutex<HashMap<VariableKey, Box<dyn Any + Send + Sync>>>,
    ordered: Mutex<Vec<Arc<dyn AnyVariable>>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_key: Mutex::new(HashMap::new()),
            ordered: Mutex::new(Vec::new()),
        }
    }

    /// Find the variable named `name` of value type `T`, or create it with
    /// `bootstrap()` as its seed slice. `bootstrap` is only invoked on the
    /// first call for a given `(T, name)` pair.
    pub fn get_or_create<T, S>(&self, name: impl Into<String>, bootstrap: impl FnOnce() -> S) -> Arc<Variable<T, S>>
    where
        T: Clone + Send + Sync + 'static,
        S: Slice<T>,
    {
        let key = VariableKey::new::<T>(name);
        let mut by_key = self.by_key.lock();
        if let Some(existing) = by_key.get(&key) {
            return Arc::clone(
                existing
                    .downcast_ref::<Arc<Variable<T, S>>>()
                    .expect("variable keyed by (TypeId, name) always downcasts to the type it was created with"),
            );
        }
        let variable = Variable::new(key.clone(), bootstrap());
        by_key.insert(key, Box::new(Arc::clone(&variable)));
        self.ordered.lock().push(Arc::clone(&variable) as Arc<dyn AnyVariable>);
        variable
    }

    /// Every variable created so far, in creation order — used by the
    /// engine loop to check convergence and run final unification across
    /// all registered variables without naming their value types.
    #[must_use]
    pub(crate) fn all(&self) -> Vec<Arc<dyn AnyVariable>> {
        self.ordered.lock().clone()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
