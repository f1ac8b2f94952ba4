use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{
    domain::InvocationId,
    error::{ErrorCode, ErrorReport},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod config;
pub mod definition;
pub mod derived;
mod supervisor;
mod trigger;

pub use config::{ErrorHandler, RerunHandle, SupervisorConfig};
pub use definition::{ActionDef, AfterHook};
pub use derived::{ActionStatus, LoadingSummary};
pub use shared::domain::Phase;
pub use supervisor::{Action, ActionSnapshot, ActionSupervisor, SupervisorBuilder};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("action name must not be empty")]
    EmptyName,
    #[error("action name `{0}` is reserved")]
    ReservedName(String),
    #[error("action `{0}` is declared more than once")]
    DuplicateAction(String),
    #[error("a process-wide supervisor config is already installed")]
    DefaultAlreadyInstalled,
    #[error("action `{action}` belongs to a supervisor that has been torn down")]
    TornDown { action: &'static str },
    #[error("post-success hook of action `{action}` failed: {source}")]
    AfterHook {
        action: &'static str,
        source: anyhow::Error,
    },
}

impl SupervisorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SupervisorError::EmptyName | SupervisorError::DefaultAlreadyInstalled => {
                ErrorCode::InvalidConfiguration
            }
            SupervisorError::ReservedName(_) | SupervisorError::DuplicateAction(_) => {
                ErrorCode::DuplicateRegistration
            }
            SupervisorError::TornDown { .. } => ErrorCode::TornDown,
            SupervisorError::AfterHook { .. } => ErrorCode::AfterHook,
        }
    }
}

impl From<&SupervisorError> for ErrorReport {
    fn from(value: &SupervisorError) -> Self {
        ErrorReport::new(value.code(), value.to_string())
    }
}

/// What an operation returns when it does not produce a response.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
    /// Control signal, not a failure: the caller asked for this result to be dropped.
    #[error("operation cancelled")]
    Cancelled,
}

impl OperationError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OperationError::Cancelled)
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            OperationError::Failed(_) => ErrorCode::OperationFailure,
            OperationError::Cancelled => ErrorCode::CancellationSignal,
        }
    }
}

/// A retained operation failure. Cheap to clone; shared between the action
/// snapshot and the error handler.
#[derive(Clone)]
pub struct ActionFailure(Arc<anyhow::Error>);

impl ActionFailure {
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(error.into()))
    }

    pub fn message(&self) -> String {
        self.0.to_string()
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.0
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    pub fn code(&self) -> ErrorCode {
        ErrorCode::OperationFailure
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.code(), self.message())
    }
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

/// Cooperative cancellation signal handed to every operation invocation.
///
/// Cancelling does not stop the operation; it only marks the invocation so
/// its eventual result is discarded. Operations may observe it to stop early.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    action: &'static str,
    invocation: InvocationId,
    token: CancellationToken,
}

impl CancelHandle {
    pub(crate) fn new(
        action: &'static str,
        invocation: InvocationId,
        token: CancellationToken,
    ) -> Self {
        Self {
            action,
            invocation,
            token,
        }
    }

    pub fn action(&self) -> &'static str {
        self.action
    }

    pub fn invocation(&self) -> InvocationId {
        self.invocation
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Returns `Err(OperationError::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), OperationError> {
        if self.is_cancelled() {
            Err(OperationError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Underlying token, for forwarding to transports that accept one.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Opaque per-action options, handed verbatim to the error handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionOptions(serde_json::Map<String, serde_json::Value>);

impl ActionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Drop the retained response and error as soon as the run starts.
    pub clear: bool,
}

impl RunOptions {
    pub fn clear() -> Self {
        Self { clear: true }
    }
}

/// How a single `run` invocation ended, as seen by its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Succeeded,
    Failed,
    /// Superseded, cancelled, or torn down. No response or error was recorded.
    Discarded,
}

/// The asynchronous work behind an action.
#[async_trait]
pub trait Operation<C, P, R>: Send + Sync {
    async fn call(&self, cancel: CancelHandle, context: Arc<C>, params: P)
        -> Result<R, OperationError>;
}

#[async_trait]
impl<C, P, R, F, Fut> Operation<C, P, R> for F
where
    C: Send + Sync + 'static,
    P: Send + 'static,
    R: Send + 'static,
    F: Fn(CancelHandle, Arc<C>, P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, OperationError>> + Send + 'static,
{
    async fn call(
        &self,
        cancel: CancelHandle,
        context: Arc<C>,
        params: P,
    ) -> Result<R, OperationError> {
        (self)(cancel, context, params).await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
