//! Action definitions and their normalization.

use std::{future::Future, sync::Arc};

use crate::{ActionOptions, CancelHandle, Operation, OperationError};

/// Runs after a successful operation, before the response is recorded.
///
/// This is the only place an action is expected to write into model state.
/// Errors are not caught: they are returned to the caller of `run`.
pub type AfterHook<C, P, R> = Arc<dyn Fn(&R, &P, &C) -> anyhow::Result<()> + Send + Sync>;

pub enum ActionDef<C, P, R> {
    Plain(Arc<dyn Operation<C, P, R>>),
    WithOptions(Arc<dyn Operation<C, P, R>>, ActionOptions),
    Full {
        operation: Arc<dyn Operation<C, P, R>>,
        after: Option<AfterHook<C, P, R>>,
        options: Option<ActionOptions>,
    },
}

impl<C, P, R> ActionDef<C, P, R>
where
    C: Send + Sync + 'static,
    P: Send + 'static,
    R: Send + 'static,
{
    pub fn plain<F, Fut>(operation: F) -> Self
    where
        F: Fn(CancelHandle, Arc<C>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, OperationError>> + Send + 'static,
    {
        ActionDef::Plain(Arc::new(operation))
    }

    pub fn with_options<F, Fut>(operation: F, options: ActionOptions) -> Self
    where
        F: Fn(CancelHandle, Arc<C>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, OperationError>> + Send + 'static,
    {
        ActionDef::WithOptions(Arc::new(operation), options)
    }

    /// Wraps a hand-written [`Operation`] implementation.
    pub fn from_operation(operation: impl Operation<C, P, R> + 'static) -> Self {
        ActionDef::Plain(Arc::new(operation))
    }

    /// Attaches a post-success hook, turning the definition into [`ActionDef::Full`].
    pub fn after<F>(self, hook: F) -> Self
    where
        F: Fn(&R, &P, &C) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let (operation, options) = self.into_parts();
        ActionDef::Full {
            operation,
            after: Some(Arc::new(hook)),
            options,
        }
    }

    /// Replaces the options, turning the definition into [`ActionDef::Full`].
    pub fn options(self, options: ActionOptions) -> Self {
        match self {
            ActionDef::Full {
                operation, after, ..
            } => ActionDef::Full {
                operation,
                after,
                options: Some(options),
            },
            other => {
                let (operation, _) = other.into_parts();
                ActionDef::Full {
                    operation,
                    after: None,
                    options: Some(options),
                }
            }
        }
    }

    fn into_parts(self) -> (Arc<dyn Operation<C, P, R>>, Option<ActionOptions>) {
        match self {
            ActionDef::Plain(operation) => (operation, None),
            ActionDef::WithOptions(operation, options) => (operation, Some(options)),
            ActionDef::Full {
                operation, options, ..
            } => (operation, options),
        }
    }

    pub(crate) fn normalize(self) -> NormalizedAction<C, P, R> {
        match self {
            ActionDef::Plain(operation) => NormalizedAction {
                operation,
                after: None,
                options: ActionOptions::default(),
            },
            ActionDef::WithOptions(operation, options) => NormalizedAction {
                operation,
                after: None,
                options,
            },
            ActionDef::Full {
                operation,
                after,
                options,
            } => NormalizedAction {
                operation,
                after,
                options: options.unwrap_or_default(),
            },
        }
    }
}

/// Canonical record every definition form is reduced to at configuration time.
pub(crate) struct NormalizedAction<C, P, R> {
    pub(crate) operation: Arc<dyn Operation<C, P, R>>,
    pub(crate) after: Option<AfterHook<C, P, R>>,
    pub(crate) options: ActionOptions,
}
