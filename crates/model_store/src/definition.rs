use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::Arc,
};

use serde::{de::DeserializeOwned, Serialize};
use shared::domain::{is_reserved_name, ModelKey};

use crate::{ModelError, StateValue};

pub(crate) type ErasedTransition = Arc<
    dyn Fn(&(dyn Any + Send + Sync), &serde_json::Value) -> Result<StateValue, ModelError>
        + Send
        + Sync,
>;

/// Type-erased half of a model definition. This is what the store registers.
pub(crate) struct DefinitionCore {
    pub(crate) key: ModelKey,
    pub(crate) name: String,
    pub(crate) default: StateValue,
    pub(crate) state_type: TypeId,
    pub(crate) state_type_name: &'static str,
    pub(crate) holds_state: fn(&(dyn Any + Send + Sync)) -> bool,
    pub(crate) transitions: HashMap<String, ErasedTransition>,
}

impl DefinitionCore {
    pub(crate) fn label(&self) -> String {
        format!("{}#{}", self.name, self.key)
    }

    pub(crate) fn transition(&self, name: &str) -> Result<&ErasedTransition, ModelError> {
        self.transitions
            .get(name)
            .ok_or_else(|| ModelError::UnknownTransition {
                model: self.label(),
                transition: name.to_string(),
            })
    }

    pub(crate) fn type_mismatch(&self) -> ModelError {
        ModelError::StateTypeMismatch {
            model: self.label(),
            expected: self.state_type_name,
        }
    }
}

fn holds<S: Any>(value: &(dyn Any + Send + Sync)) -> bool {
    value.is::<S>()
}

/// A named slice of shared state together with its pure transitions.
///
/// The key is fixed when the definition is built. Two definitions never share
/// a key unless the caller supplied the same one explicitly, in which case the
/// store rejects the second at registration.
pub struct ModelDefinition<S> {
    pub(crate) core: Arc<DefinitionCore>,
    _state: PhantomData<fn() -> S>,
}

impl<S> Clone for ModelDefinition<S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _state: PhantomData,
        }
    }
}

impl<S> fmt::Debug for ModelDefinition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.core.transitions.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("ModelDefinition")
            .field("key", &self.core.key)
            .field("name", &self.core.name)
            .field("transitions", &names)
            .finish()
    }
}

impl<S> ModelDefinition<S>
where
    S: Send + Sync + 'static,
{
    pub fn builder(name: impl Into<String>, default_state: S) -> ModelDefinitionBuilder<S> {
        ModelDefinitionBuilder {
            key: None,
            name: name.into(),
            default_state,
            transitions: HashMap::new(),
        }
    }

    pub fn key(&self) -> ModelKey {
        self.core.key
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn default_state(&self) -> Result<Arc<S>, ModelError> {
        Arc::clone(&self.core.default)
            .downcast::<S>()
            .map_err(|_| self.core.type_mismatch())
    }

    pub fn has_transition(&self, name: &str) -> bool {
        self.core.transitions.contains_key(name)
    }

    pub fn transition_names(&self) -> Vec<&str> {
        let mut names = self
            .core
            .transitions
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    /// Runs a registered transition against `state` without touching any store.
    pub fn evaluate<A>(&self, state: &S, transition: &str, args: A) -> Result<Arc<S>, ModelError>
    where
        A: Serialize,
    {
        let transition_fn = self.core.transition(transition)?;
        let args = encode_args(&self.core, transition, args)?;
        transition_fn(state as &(dyn Any + Send + Sync), &args)?
            .downcast::<S>()
            .map_err(|_| self.core.type_mismatch())
    }
}

pub(crate) fn encode_args<A: Serialize>(
    core: &DefinitionCore,
    transition: &str,
    args: A,
) -> Result<serde_json::Value, ModelError> {
    serde_json::to_value(args).map_err(|source| ModelError::InvalidTransitionArgs {
        model: core.label(),
        transition: transition.to_string(),
        source,
    })
}

pub struct ModelDefinitionBuilder<S> {
    key: Option<ModelKey>,
    name: String,
    default_state: S,
    transitions: HashMap<String, ErasedTransition>,
}

impl<S> fmt::Debug for ModelDefinitionBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDefinitionBuilder")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("transitions", &self.transitions.len())
            .finish()
    }
}

impl<S> ModelDefinitionBuilder<S>
where
    S: Send + Sync + 'static,
{
    /// Uses a caller-supplied key instead of a generated one.
    pub fn with_key(mut self, key: ModelKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Registers a pure transition under `name`.
    ///
    /// Arguments arrive as JSON and are decoded into `A`; use a tuple for
    /// several positional arguments and `()` for none. `set_state` is reserved
    /// and names may only be registered once.
    pub fn transition<A, F>(mut self, name: &str, transition: F) -> Result<Self, ModelError>
    where
        A: DeserializeOwned,
        F: Fn(&S, A) -> S + Send + Sync + 'static,
    {
        if is_reserved_name(name) || self.transitions.contains_key(name) {
            return Err(ModelError::DuplicateRegistration {
                model: self.name.clone(),
                name: name.to_string(),
            });
        }

        let model = self.name.clone();
        let transition_name = name.to_string();
        let erased: ErasedTransition = Arc::new(
            move |state: &(dyn Any + Send + Sync), args: &serde_json::Value| {
                let state =
                    state
                        .downcast_ref::<S>()
                        .ok_or_else(|| ModelError::StateTypeMismatch {
                            model: model.clone(),
                            expected: type_name::<S>(),
                        })?;
                let args =
                    A::deserialize(args).map_err(|source| ModelError::InvalidTransitionArgs {
                        model: model.clone(),
                        transition: transition_name.clone(),
                        source,
                    })?;
                Ok(Arc::new(transition(state, args)) as StateValue)
            },
        );
        self.transitions.insert(name.to_string(), erased);
        Ok(self)
    }

    pub fn build(self) -> ModelDefinition<S> {
        let key = self.key.unwrap_or_else(ModelKey::generate);
        ModelDefinition {
            core: Arc::new(DefinitionCore {
                key,
                name: self.name,
                default: Arc::new(self.default_state),
                state_type: TypeId::of::<S>(),
                state_type_name: type_name::<S>(),
                holds_state: holds::<S>,
                transitions: self.transitions,
            }),
            _state: PhantomData,
        }
    }
}
