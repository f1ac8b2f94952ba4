use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use parking_lot::RwLock;
use shared::{
    domain::ModelKey,
    error::{ErrorCode, ErrorReport},
    protocol::{MutationKind, StoreEvent, TransitionCall},
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

mod definition;
mod handle;

pub use definition::{ModelDefinition, ModelDefinitionBuilder};
pub use handle::{ModelHandle, ModelSubscription};

use definition::DefinitionCore;

const STORE_EVENT_CAPACITY: usize = 1024;

/// Shared, immutable snapshot of one model's state.
pub type StateValue = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model {model} has no transition named `{transition}`")]
    UnknownTransition { model: String, transition: String },
    #[error("model {model} cannot register `{name}`: name is reserved or already registered")]
    DuplicateRegistration { model: String, name: String },
    #[error("key {key} is already registered by model {existing}")]
    DuplicateModelKey { key: ModelKey, existing: String },
    #[error("keyed store is not installed; model {model} cannot be accessed")]
    MissingStoreSubtree { model: String },
    #[error("invalid arguments for transition `{transition}` on model {model}: {source}")]
    InvalidTransitionArgs {
        model: String,
        transition: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no model definition is registered for key {key}")]
    UnregisteredModel { key: ModelKey },
    #[error("state for model {model} is not of type {expected}")]
    StateTypeMismatch {
        model: String,
        expected: &'static str,
    },
}

impl ModelError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ModelError::UnknownTransition { .. } => ErrorCode::UnknownTransition,
            ModelError::DuplicateRegistration { .. } | ModelError::DuplicateModelKey { .. } => {
                ErrorCode::DuplicateRegistration
            }
            ModelError::MissingStoreSubtree { .. } => ErrorCode::MissingStoreSubtree,
            ModelError::InvalidTransitionArgs { .. } | ModelError::StateTypeMismatch { .. } => {
                ErrorCode::InvalidTransitionArgs
            }
            ModelError::UnregisteredModel { .. } => ErrorCode::UnregisteredModel,
        }
    }
}

impl From<&ModelError> for ErrorReport {
    fn from(value: &ModelError) -> Self {
        ErrorReport::new(value.code(), value.to_string())
    }
}

/// New state for a model: either a replacement value or a pure function of the
/// current state.
pub enum Update<S> {
    Replace(S),
    Apply(Box<dyn FnOnce(&S) -> S + Send>),
}

impl<S> Update<S> {
    pub fn apply<F>(updater: F) -> Self
    where
        F: FnOnce(&S) -> S + Send + 'static,
    {
        Update::Apply(Box::new(updater))
    }
}

impl<S> From<S> for Update<S> {
    fn from(value: S) -> Self {
        Update::Replace(value)
    }
}

type ErasedUpdate =
    Box<dyn FnOnce(&(dyn Any + Send + Sync)) -> Result<StateValue, ModelError> + Send>;

/// Payload of a mutation request.
pub enum MutationOp {
    Replace(StateValue),
    Apply(ErasedUpdate),
    Transition(TransitionCall),
}

/// One message on the store's single mutation channel.
pub struct Mutation {
    pub target_key: ModelKey,
    pub op: MutationOp,
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self.op {
            MutationOp::Transition(_) => MutationKind::NamedTransition,
            MutationOp::Replace(_) | MutationOp::Apply(_) => MutationKind::Replace,
        }
    }
}

struct Entry {
    value: StateValue,
    revision: u64,
}

pub(crate) struct StoreShared {
    registry: RwLock<HashMap<ModelKey, Arc<DefinitionCore>>>,
    entries: RwLock<HashMap<ModelKey, Entry>>,
    events: broadcast::Sender<StoreEvent>,
}

/// Process-wide map from model key to state.
///
/// Every write goes through [`KeyedStore::dispatch`], which applies one
/// mutation at a time under the entry lock and then notifies subscribers.
/// Readers always observe the last committed value.
#[derive(Clone)]
pub struct KeyedStore {
    shared: Arc<StoreShared>,
}

impl Default for KeyedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyedStore {
    pub fn new() -> Self {
        Self::with_event_capacity(STORE_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            shared: Arc::new(StoreShared {
                registry: RwLock::new(HashMap::new()),
                entries: RwLock::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Registers a definition. Registering the same definition again is a
    /// no-op; a different definition with the same key is rejected.
    pub fn register<S>(&self, definition: &ModelDefinition<S>) -> Result<(), ModelError>
    where
        S: Send + Sync + 'static,
    {
        let mut registry = self.shared.registry.write();
        if let Some(existing) = registry.get(&definition.core.key) {
            if Arc::ptr_eq(existing, &definition.core) {
                return Ok(());
            }
            return Err(ModelError::DuplicateModelKey {
                key: definition.core.key,
                existing: existing.label(),
            });
        }
        registry.insert(definition.core.key, Arc::clone(&definition.core));
        debug!(
            key = %definition.core.key,
            model = %definition.core.name,
            transitions = definition.core.transitions.len(),
            "store: registered model"
        );
        Ok(())
    }

    /// Registers `definition` if needed and returns a typed handle to it.
    pub fn model<S>(&self, definition: &ModelDefinition<S>) -> Result<ModelHandle<S>, ModelError>
    where
        S: Send + Sync + 'static,
    {
        self.register(definition)?;
        Ok(ModelHandle::new(
            Arc::downgrade(&self.shared),
            definition.clone(),
        ))
    }

    pub fn is_registered(&self, key: ModelKey) -> bool {
        self.shared.registry.read().contains_key(&key)
    }

    /// Current state for `key`, or the declared default if nothing was written yet.
    pub fn read(&self, key: ModelKey) -> Result<StateValue, ModelError> {
        self.shared.read(key)
    }

    pub fn revision(&self, key: ModelKey) -> u64 {
        self.shared.revision(key)
    }

    pub fn write<S>(&self, key: ModelKey, update: impl Into<Update<S>>) -> Result<u64, ModelError>
    where
        S: Send + Sync + 'static,
    {
        self.shared.write(key, update.into())
    }

    pub fn invoke_transition(
        &self,
        key: ModelKey,
        transition: &str,
        args: serde_json::Value,
    ) -> Result<u64, ModelError> {
        self.dispatch(Mutation {
            target_key: key,
            op: MutationOp::Transition(TransitionCall {
                name: transition.to_string(),
                args,
            }),
        })
    }

    /// Applies one mutation and returns the new revision of the target entry.
    pub fn dispatch(&self, mutation: Mutation) -> Result<u64, ModelError> {
        self.shared.dispatch(mutation)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.shared.events.subscribe()
    }
}

impl StoreShared {
    fn definition(&self, key: ModelKey) -> Result<Arc<DefinitionCore>, ModelError> {
        self.registry
            .read()
            .get(&key)
            .cloned()
            .ok_or(ModelError::UnregisteredModel { key })
    }

    pub(crate) fn read(&self, key: ModelKey) -> Result<StateValue, ModelError> {
        let definition = self.definition(key)?;
        let entries = self.entries.read();
        Ok(entries
            .get(&key)
            .map(|entry| Arc::clone(&entry.value))
            .unwrap_or_else(|| Arc::clone(&definition.default)))
    }

    pub(crate) fn revision(&self, key: ModelKey) -> u64 {
        self.entries
            .read()
            .get(&key)
            .map(|entry| entry.revision)
            .unwrap_or_default()
    }

    pub(crate) fn write<S>(&self, key: ModelKey, update: Update<S>) -> Result<u64, ModelError>
    where
        S: Send + Sync + 'static,
    {
        let definition = self.definition(key)?;
        if definition.state_type != TypeId::of::<S>() {
            return Err(definition.type_mismatch());
        }

        let op = match update {
            Update::Replace(value) => MutationOp::Replace(Arc::new(value)),
            Update::Apply(updater) => {
                let model = definition.label();
                let expected = definition.state_type_name;
                MutationOp::Apply(Box::new(move |current: &(dyn Any + Send + Sync)| {
                    let current = current
                        .downcast_ref::<S>()
                        .ok_or(ModelError::StateTypeMismatch { model, expected })?;
                    Ok(Arc::new(updater(current)) as StateValue)
                }))
            }
        };

        self.dispatch(Mutation {
            target_key: key,
            op,
        })
    }

    pub(crate) fn dispatch(&self, mutation: Mutation) -> Result<u64, ModelError> {
        let kind = mutation.kind();
        let Mutation { target_key, op } = mutation;
        let definition = self.definition(target_key)?;

        let transition = match &op {
            MutationOp::Transition(call) => Some(definition.transition(&call.name)?),
            MutationOp::Replace(value) => {
                if !(definition.holds_state)(value.as_ref()) {
                    return Err(definition.type_mismatch());
                }
                None
            }
            MutationOp::Apply(_) => None,
        };

        let (revision, transition_name) = {
            let mut entries = self.entries.write();
            let (current, previous_revision) = match entries.get(&target_key) {
                Some(entry) => (Arc::clone(&entry.value), entry.revision),
                None => (Arc::clone(&definition.default), 0),
            };

            let (next, transition_name) = match op {
                MutationOp::Replace(value) => (value, None),
                MutationOp::Apply(updater) => (updater(current.as_ref())?, None),
                MutationOp::Transition(call) => {
                    let Some(transition) = transition else {
                        return Err(ModelError::UnknownTransition {
                            model: definition.label(),
                            transition: call.name,
                        });
                    };
                    (transition(current.as_ref(), &call.args)?, Some(call.name))
                }
            };

            let revision = previous_revision + 1;
            entries.insert(
                target_key,
                Entry {
                    value: next,
                    revision,
                },
            );

            // Sent under the lock so subscribers see revisions in commit order.
            let _ = self.events.send(StoreEvent {
                target_key,
                kind,
                transition: transition_name.clone(),
                revision,
            });
            (revision, transition_name)
        };

        debug!(
            key = %target_key,
            model = %definition.name,
            ?kind,
            transition = transition_name.as_deref().unwrap_or(""),
            revision,
            "store: committed mutation"
        );

        Ok(revision)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
