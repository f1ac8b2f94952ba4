//! Pure aggregation over action states for presentation logic.

use serde::Serialize;

use crate::Phase;

/// Read-only view of one action's state.
pub trait ActionStatus {
    fn phase(&self) -> Phase;
    fn has_response(&self) -> bool;
    fn has_error(&self) -> bool;

    fn is_loading(&self) -> bool {
        self.phase() == Phase::Loading
    }

    /// The last run ended with a response or an error and nothing is in flight.
    fn is_settled(&self) -> bool {
        self.phase().is_settled()
    }

    /// Either a response or an error is available to show.
    fn has_data(&self) -> bool {
        self.has_response() || self.has_error()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadingSummary {
    /// At least one action is running.
    pub is_loading: bool,
    /// Every action has a response or an error. True for an empty set.
    pub has_data: bool,
}

impl Default for LoadingSummary {
    fn default() -> Self {
        Self::of(&[])
    }
}

impl LoadingSummary {
    pub fn of(actions: &[&dyn ActionStatus]) -> Self {
        Self {
            is_loading: actions.iter().any(|action| action.is_loading()),
            has_data: actions.iter().all(|action| action.has_data()),
        }
    }

    pub fn should_render_content(&self) -> bool {
        self.has_data
    }

    /// Stale data is on screen while a newer request is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.is_loading && self.has_data
    }
}
