use std::sync::{Arc, Weak};

use serde::Serialize;
use shared::{
    domain::ModelKey,
    protocol::{StoreEvent, TransitionCall},
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::{
    definition::encode_args, ModelDefinition, ModelError, Mutation, MutationOp, StoreShared,
    Update,
};

/// Typed facade over one entry of a [`crate::KeyedStore`].
///
/// The handle does not keep the store alive. Once the store is gone every
/// call fails with [`ModelError::MissingStoreSubtree`].
pub struct ModelHandle<S> {
    store: Weak<StoreShared>,
    definition: ModelDefinition<S>,
}

impl<S> Clone for ModelHandle<S> {
    fn clone(&self) -> Self {
        Self {
            store: Weak::clone(&self.store),
            definition: self.definition.clone(),
        }
    }
}

impl<S> ModelHandle<S>
where
    S: Send + Sync + 'static,
{
    pub(crate) fn new(store: Weak<StoreShared>, definition: ModelDefinition<S>) -> Self {
        Self { store, definition }
    }

    pub fn key(&self) -> ModelKey {
        self.definition.key()
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn definition(&self) -> &ModelDefinition<S> {
        &self.definition
    }

    fn store(&self) -> Result<Arc<StoreShared>, ModelError> {
        self.store
            .upgrade()
            .ok_or_else(|| ModelError::MissingStoreSubtree {
                model: self.definition.core.label(),
            })
    }

    pub fn read(&self) -> Result<Arc<S>, ModelError> {
        self.store()?
            .read(self.key())?
            .downcast::<S>()
            .map_err(|_| self.definition.core.type_mismatch())
    }

    pub fn revision(&self) -> Result<u64, ModelError> {
        Ok(self.store()?.revision(self.key()))
    }

    /// The always-available raw replace operation.
    pub fn set_state(&self, update: impl Into<Update<S>>) -> Result<u64, ModelError> {
        self.store()?.write(self.key(), update.into())
    }

    pub fn update<F>(&self, updater: F) -> Result<u64, ModelError>
    where
        F: FnOnce(&S) -> S + Send + 'static,
    {
        self.set_state(Update::apply(updater))
    }

    /// Applies the registered transition `name` with `args` through the store's
    /// mutation channel.
    pub fn invoke<A>(&self, name: &str, args: A) -> Result<u64, ModelError>
    where
        A: Serialize,
    {
        let store = self.store()?;
        let args = encode_args(&self.definition.core, name, args)?;
        store.dispatch(Mutation {
            target_key: self.key(),
            op: MutationOp::Transition(TransitionCall {
                name: name.to_string(),
                args,
            }),
        })
    }

    pub fn subscribe(&self) -> Result<ModelSubscription, ModelError> {
        Ok(ModelSubscription {
            key: self.key(),
            events: self.store()?.events.subscribe(),
        })
    }
}

/// Stream of commit notifications for a single model key.
pub struct ModelSubscription {
    key: ModelKey,
    events: broadcast::Receiver<StoreEvent>,
}

impl ModelSubscription {
    pub fn key(&self) -> ModelKey {
        self.key
    }

    /// Waits for the next commit to this key. Returns `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<StoreEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) if event.target_key == self.key => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(key = %self.key, skipped, "store: subscriber lagged behind commits");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
