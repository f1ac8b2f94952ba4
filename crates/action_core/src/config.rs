//! Supervisor configuration: error handling and cancellation wiring.

use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::{ActionFailure, ActionOptions, Settlement, SupervisorError};

static PROCESS_DEFAULT: OnceLock<SupervisorConfig> = OnceLock::new();

/// Receives operation failures that were not cancellations.
pub trait ErrorHandler: Send + Sync {
    fn handle(
        &self,
        action: &'static str,
        error: &ActionFailure,
        options: &ActionOptions,
        rerun: RerunHandle,
    );
}

impl<F> ErrorHandler for F
where
    F: Fn(&'static str, &ActionFailure, &ActionOptions, RerunHandle) + Send + Sync,
{
    fn handle(
        &self,
        action: &'static str,
        error: &ActionFailure,
        options: &ActionOptions,
        rerun: RerunHandle,
    ) {
        (self)(action, error, options, rerun)
    }
}

type RerunFn = dyn Fn() -> BoxFuture<'static, Result<Settlement, SupervisorError>> + Send + Sync;

/// Re-invokes a failed action with the params and run options it failed with.
#[derive(Clone)]
pub struct RerunHandle {
    action: &'static str,
    rerun: Arc<RerunFn>,
}

impl RerunHandle {
    pub(crate) fn new<F>(action: &'static str, rerun: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<Settlement, SupervisorError>> + Send + Sync + 'static,
    {
        Self {
            action,
            rerun: Arc::new(rerun),
        }
    }

    pub fn action(&self) -> &'static str {
        self.action
    }

    /// Starts the rerun immediately; the returned future drives it to settlement.
    pub fn run(&self) -> BoxFuture<'static, Result<Settlement, SupervisorError>> {
        (self.rerun)()
    }
}

impl fmt::Debug for RerunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RerunHandle")
            .field("action", &self.action)
            .finish()
    }
}

/// Explicit configuration handed to a supervisor when it is built.
///
/// Without an error handler, failures go to the `tracing` error sink. With a
/// parent token, every cancel handle is a child of it, so cancelling the parent
/// cancels every in-flight invocation of every supervisor sharing this config.
#[derive(Clone, Default)]
pub struct SupervisorConfig {
    error_handler: Option<Arc<dyn ErrorHandler>>,
    parent_token: Option<CancellationToken>,
}

impl SupervisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Closure form of [`SupervisorConfig::with_error_handler`].
    pub fn on_error<F>(self, handler: F) -> Self
    where
        F: Fn(&'static str, &ActionFailure, &ActionOptions, RerunHandle) + Send + Sync + 'static,
    {
        self.with_error_handler(handler)
    }

    pub fn with_parent_token(mut self, token: CancellationToken) -> Self {
        self.parent_token = Some(token);
        self
    }

    pub fn error_handler(&self) -> Option<&Arc<dyn ErrorHandler>> {
        self.error_handler.as_ref()
    }

    pub(crate) fn issue_token(&self) -> CancellationToken {
        match &self.parent_token {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        }
    }

    /// Installs the config used by [`crate::ActionSupervisor::builder`]. Can be
    /// done once per process.
    pub fn install_default(config: SupervisorConfig) -> Result<(), SupervisorError> {
        PROCESS_DEFAULT
            .set(config)
            .map_err(|_| SupervisorError::DefaultAlreadyInstalled)
    }

    pub fn process_default() -> SupervisorConfig {
        PROCESS_DEFAULT.get().cloned().unwrap_or_default()
    }
}

impl fmt::Debug for SupervisorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorConfig")
            .field("error_handler", &self.error_handler.is_some())
            .field("parent_token", &self.parent_token)
            .finish()
    }
}
