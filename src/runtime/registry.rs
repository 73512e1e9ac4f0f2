//! Action registry and factory system
//!
//! Maps every [`ActionKind`] to a constructor. An [`ActionCatalog`] is filled
//! at startup and frozen into an immutable [`ActionRegistry`] that the
//! dispatcher consults for each event.

use std::collections::HashMap;
use std::sync::Arc;

use super::action::{Action, ActionKind, ObjectAction, SingleTargetAction};
use super::batch::{BatchAction, ObjectBatchAction};
use super::error::{DispatchError, DispatchResult};
use super::operation::Operation;
use super::refresh::RefreshResult;

/// Factory function that creates a fresh action instance
pub type ActionFactory = Arc<dyn Fn() -> Box<dyn Action> + Send + Sync>;

#[derive(Clone)]
struct ActionTypeInfo {
    factory: ActionFactory,
    claims_targets: bool,
}

/// Mutable catalog used while wiring up the application
#[derive(Default)]
pub struct ActionCatalog {
    types: HashMap<ActionKind, ActionTypeInfo>,
}

impl ActionCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every repository operation, single and batch, plus
    /// RefreshResult
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        for op in Operation::ALL {
            catalog.register(ActionKind::Single(op), move || {
                Box::new(SingleTargetAction(ObjectAction::new(op)))
            });
            catalog.register(ActionKind::Batch(op), move || {
                Box::new(BatchAction::new(ObjectBatchAction::new(op)))
            });
        }
        catalog.register_read_only(ActionKind::RefreshResult, || Box::new(RefreshResult));
        catalog
    }

    /// Register a state-changing action.
    ///
    /// A single target is claimed at dispatch; batches claim the subset they
    /// resolve.
    pub fn register<F>(&mut self, kind: ActionKind, factory: F)
    where
        F: Fn() -> Box<dyn Action> + Send + Sync + 'static,
    {
        self.insert(kind, factory, true);
    }

    /// Register an action that only reads its targets and never claims them.
    pub fn register_read_only<F>(&mut self, kind: ActionKind, factory: F)
    where
        F: Fn() -> Box<dyn Action> + Send + Sync + 'static,
    {
        self.insert(kind, factory, false);
    }

    /// Remove a registration
    pub fn unregister(&mut self, kind: ActionKind) -> bool {
        self.types.remove(&kind).is_some()
    }

    fn insert<F>(&mut self, kind: ActionKind, factory: F, claims_targets: bool)
    where
        F: Fn() -> Box<dyn Action> + Send + Sync + 'static,
    {
        self.types.insert(
            kind,
            ActionTypeInfo {
                factory: Arc::new(factory),
                claims_targets,
            },
        );
    }

    /// Freeze into an immutable registry
    pub fn snapshot(&self) -> ActionRegistry {
        ActionRegistry {
            types: Arc::new(self.types.clone()),
        }
    }
}

/// Immutable view of the action catalog
#[derive(Clone)]
pub struct ActionRegistry {
    types: Arc<HashMap<ActionKind, ActionTypeInfo>>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        ActionCatalog::with_defaults().snapshot()
    }
}

impl ActionRegistry {
    /// Instantiate the action registered for `kind`
    pub fn create(&self, kind: ActionKind) -> DispatchResult<Box<dyn Action>> {
        let info = self
            .types
            .get(&kind)
            .ok_or(DispatchError::Unresolved(kind))?;
        Ok((info.factory)())
    }

    /// Whether dispatching `kind` claims its targets; unknown kinds claim nothing
    pub fn claims_targets(&self, kind: ActionKind) -> bool {
        self.types
            .get(&kind)
            .map(|info| info.claims_targets)
            .unwrap_or(false)
    }

    /// Whether `kind` is registered
    pub fn has_kind(&self, kind: ActionKind) -> bool {
        self.types.contains_key(&kind)
    }

    /// Registered kinds, sorted
    pub fn list_kinds(&self) -> Vec<ActionKind> {
        let mut kinds: Vec<ActionKind> = self.types.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
