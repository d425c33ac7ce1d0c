//! Per (device, geofence) containment state.

use chrono::{DateTime, Utc};

use crate::event::Transition;

/// Last known containment for one (device, geofence) pair.
///
/// A pair with no entry in the tracker is "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainmentState {
    pub is_inside: bool,
    pub last_entry_at: Option<DateTime<Utc>>,
    pub last_exit_at: Option<DateTime<Utc>>,
    /// Timestamp of the newest sample applied to this pair.
    pub last_observed_at: DateTime<Utc>,
}

/// What a new sample did to a pair's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// No prior state; the sample seeded it.
    First,
    /// Older than the newest applied sample; ignored.
    Stale,
    /// Same containment as before.
    Unchanged,
    /// Containment flipped.
    Changed(Transition),
}

impl Step {
    #[must_use]
    pub const fn transition(self) -> Option<Transition> {
        match self {
            Self::Changed(t) => Some(t),
            _ => None,
        }
    }
}

impl ContainmentState {
    #[must_use]
    pub const fn seeded(is_inside: bool, observed_at: DateTime<Utc>) -> Self {
        Self {
            is_inside,
            last_entry_at: None,
            last_exit_at: None,
            last_observed_at: observed_at,
        }
    }

    /// Applies a sample. The stored containment always follows the newest
    /// sample, whether or not an event is later emitted for it.
    pub fn apply(&mut self, currently_inside: bool, observed_at: DateTime<Utc>) -> Step {
        if observed_at < self.last_observed_at {
            return Step::Stale;
        }
        self.last_observed_at = observed_at;

        let step = match (self.is_inside, currently_inside) {
            (false, true) => Step::Changed(Transition::Entered),
            (true, false) => Step::Changed(Transition::Exited),
            _ => Step::Unchanged,
        };
        self.is_inside = currently_inside;
        step
    }

    /// Records that an event for `transition` was emitted at `at`.
    pub fn record_emitted(&mut self, transition: Transition, at: DateTime<Utc>) {
        match transition {
            Transition::Entered => self.last_entry_at = Some(at),
            Transition::Exited => self.last_exit_at = Some(at),
        }
    }
}
