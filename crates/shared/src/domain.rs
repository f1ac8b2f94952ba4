use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ModelKey);
id_newtype!(InvocationId);

/// Generated keys start high so they stay clear of small caller-supplied ids.
const GENERATED_KEY_BASE: u64 = 1 << 32;

static NEXT_MODEL_KEY: AtomicU64 = AtomicU64::new(GENERATED_KEY_BASE);

impl ModelKey {
    /// Allocates a process-unique key. Never returns the same value twice.
    pub fn generate() -> Self {
        Self(NEXT_MODEL_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

/// Name reserved for the raw replace operation available on every model.
pub const SET_STATE: &str = "set_state";

pub fn is_reserved_name(name: &str) -> bool {
    name == SET_STATE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Loading,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn is_settled(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }
}
