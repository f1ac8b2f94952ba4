use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    OperationFailure,
    CancellationSignal,
    UnknownTransition,
    DuplicateRegistration,
    MissingStoreSubtree,
    InvalidTransitionArgs,
    UnregisteredModel,
    InvalidConfiguration,
    TornDown,
    AfterHook,
}

impl ErrorCode {
    /// Configuration and wiring defects. These are never retried.
    pub fn is_programmer_error(self) -> bool {
        matches!(
            self,
            ErrorCode::UnknownTransition
                | ErrorCode::DuplicateRegistration
                | ErrorCode::MissingStoreSubtree
                | ErrorCode::InvalidTransitionArgs
                | ErrorCode::UnregisteredModel
                | ErrorCode::InvalidConfiguration
        )
    }
}

/// Serializable summary of an error, suitable for a diagnostic sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorReport {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
