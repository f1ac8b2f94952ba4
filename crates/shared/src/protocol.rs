use serde::{Deserialize, Serialize};

use crate::domain::ModelKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Replace,
    NamedTransition,
}

/// Invocation of a registered transition as it travels through the mutation channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Broadcast to subscribers after a mutation has been committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEvent {
    pub target_key: ModelKey,
    pub kind: MutationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<String>,
    pub revision: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_event_uses_snake_case_kind_and_omits_missing_transition() {
        let event = StoreEvent {
            target_key: ModelKey(7),
            kind: MutationKind::Replace,
            transition: None,
            revision: 3,
        };
        let encoded = serde_json::to_value(&event).expect("encode");
        assert_eq!(encoded["kind"], "replace");
        assert_eq!(encoded["target_key"], 7);
        assert!(encoded.get("transition").is_none());
    }

    #[test]
    fn transition_call_defaults_missing_args_to_null() {
        let call: TransitionCall =
            serde_json::from_str(r#"{"name":"delete_todo"}"#).expect("decode");
        assert_eq!(call.name, "delete_todo");
        assert!(call.args.is_null());
    }
}
