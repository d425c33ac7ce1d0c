//! Cooldown policy.
//!
//! Decides whether a detected transition becomes an event. The policy is pure:
//! the per-direction timestamps it compares against are owned and persisted by
//! the tracker.

use chrono::{DateTime, Duration, Utc};

use crate::event::Transition;
use crate::geofence::Geofence;

/// Why a transition did not produce an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    /// The geofence is inactive.
    Inactive,
    /// Notifications for this direction are disabled.
    DirectionDisabled,
    /// The previous event of this direction is still inside the window.
    Cooldown {
        /// Time left until the window closes.
        remaining: Duration,
    },
}

/// Outcome of the cooldown check.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    Emit,
    Suppress(Suppression),
}

impl CooldownDecision {
    #[must_use]
    pub const fn is_emit(self) -> bool {
        matches!(self, Self::Emit)
    }
}

/// Stateless gate between transition detection and event emission.
#[derive(Debug, Default, Clone, Copy)]
pub struct CooldownPolicy;

impl CooldownPolicy {
    /// Full decision, including the reason for suppression.
    #[must_use]
    pub fn decide(
        geofence: &Geofence,
        transition: Transition,
        now: DateTime<Utc>,
        last_entry_at: Option<DateTime<Utc>>,
        last_exit_at: Option<DateTime<Utc>>,
    ) -> CooldownDecision {
        if !geofence.is_active {
            return CooldownDecision::Suppress(Suppression::Inactive);
        }

        let (enabled, last) = match transition {
            Transition::Entered => (geofence.notify_on_entry, last_entry_at),
            Transition::Exited => (geofence.notify_on_exit, last_exit_at),
        };
        if !enabled {
            return CooldownDecision::Suppress(Suppression::DirectionDisabled);
        }

        let window = geofence.cooldown();
        if window <= Duration::zero() {
            return CooldownDecision::Emit;
        }

        match last {
            None => CooldownDecision::Emit,
            Some(last) => {
                let elapsed = now - last;
                if elapsed >= window {
                    CooldownDecision::Emit
                } else {
                    CooldownDecision::Suppress(Suppression::Cooldown {
                        remaining: window - elapsed,
                    })
                }
            }
        }
    }

    /// `true` iff the transition should become an event.
    #[must_use]
    pub fn should_emit(
        geofence: &Geofence,
        transition: Transition,
        now: DateTime<Utc>,
        last_entry_at: Option<DateTime<Utc>>,
        last_exit_at: Option<DateTime<Utc>>,
    ) -> bool {
        Self::decide(geofence, transition, now, last_entry_at, last_exit_at).is_emit()
    }
}
