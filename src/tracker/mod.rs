//! Containment state tracker.
//!
//! Owns the per (device, geofence) containment state and turns position
//! samples into ENTERED/EXITED transitions. State is sharded by device id:
//! every sample of a device takes the same shard lock, so the
//! read-modify-write of one pair can never interleave with another sample
//! of the same device, while distinct devices proceed in parallel.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::channel::EventPublisher;
use crate::error::{FenceError, FenceResult};
use crate::event::{GeofenceEvent, Transition};
use crate::geofence::{Geofence, GeofenceId};
use crate::geometry;
use crate::position::{DeviceId, DevicePosition};

/// Cooldown gate applied after transition detection.
pub mod cooldown;
/// Per-pair state and its update rule.
pub mod state;

pub use cooldown::{CooldownDecision, CooldownPolicy, Suppression};
pub use state::{ContainmentState, Step};

type PairKey = (DeviceId, GeofenceId);
type Shard = HashMap<PairKey, ContainmentState>;

/// Stable device → shard routing, shared with the ingest runtime so a device
/// always lands on the same worker.
#[must_use]
pub fn shard_for(device_id: &DeviceId, shards: usize) -> usize {
    let hash = blake3::hash(device_id.as_str().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    #[allow(clippy::cast_possible_truncation)]
    let idx = (u64::from_le_bytes(prefix) % shards.max(1) as u64) as usize;
    idx
}

/// Result of running one sample through detection and cooldown.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Containment computed for this sample.
    pub inside: bool,
    /// Effect of the sample on the tracked state.
    pub step: Step,
    /// Cooldown outcome, present only when a transition was detected.
    pub decision: Option<CooldownDecision>,
    /// The emitted event, if any.
    pub event: Option<GeofenceEvent>,
}

/// Sharded per-pair containment state.
#[derive(Debug)]
pub struct ContainmentTracker {
    shards: Vec<Mutex<Shard>>,
}

impl Default for ContainmentTracker {
    fn default() -> Self {
        Self::new(16)
    }
}

impl ContainmentTracker {
    #[must_use]
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn lock_shard(&self, device_id: &DeviceId) -> FenceResult<MutexGuard<'_, Shard>> {
        self.shards[shard_for(device_id, self.shards.len())]
            .lock()
            .map_err(|_| FenceError::internal("poisoned lock: tracker shard"))
    }

    /// Detects a raw transition for one sample and persists the new state.
    ///
    /// The first sample of a pair never yields a transition. Samples older
    /// than the newest applied one are ignored. No cooldown is applied here.
    pub fn observe(
        &self,
        geofence: &Geofence,
        position: &DevicePosition,
        _now: DateTime<Utc>,
    ) -> FenceResult<Option<Transition>> {
        position.validate()?;
        let inside = geometry::contains(&geofence.geometry, position.point())?;

        let mut shard = self.lock_shard(&position.device_id)?;
        let step = advance(&mut shard, pair_key(position, geofence), inside, position.timestamp);
        Ok(step.transition())
    }

    /// Full per-sample pipeline: containment, transition detection and the
    /// cooldown gate, atomically with respect to the device's state.
    ///
    /// The sample's timestamp is the only clock: emitted events are stamped
    /// with it and cooldown windows are measured between sample times.
    pub fn evaluate(&self, geofence: &Geofence, position: &DevicePosition) -> FenceResult<Evaluation> {
        self.evaluate_and_publish(geofence, position, None)
    }

    /// Like [`evaluate`](Self::evaluate), but hands an emitted event to
    /// `publisher` before the device's shard lock is released, so events of
    /// one device reach the publisher in the order their state changed.
    pub fn evaluate_and_publish(
        &self,
        geofence: &Geofence,
        position: &DevicePosition,
        publisher: Option<&dyn EventPublisher>,
    ) -> FenceResult<Evaluation> {
        let now = position.timestamp;
        position.validate()?;
        let inside = geometry::contains(&geofence.geometry, position.point())?;

        let key = pair_key(position, geofence);
        let mut shard = self.lock_shard(&position.device_id)?;
        let step = advance(&mut shard, key.clone(), inside, position.timestamp);

        let Step::Changed(transition) = step else {
            if step == Step::Stale {
                debug!(
                    device_id = %position.device_id,
                    geofence_id = %geofence.id,
                    sample_at = %position.timestamp,
                    "ignoring out-of-order sample"
                );
            }
            return Ok(Evaluation {
                inside,
                step,
                decision: None,
                event: None,
            });
        };

        let state = shard
            .get_mut(&key)
            .ok_or_else(|| FenceError::internal("tracker lost state for a changed pair"))?;
        let decision = CooldownPolicy::decide(geofence, transition, now, state.last_entry_at, state.last_exit_at);

        let event = match decision {
            CooldownDecision::Emit => {
                state.record_emitted(transition, now);
                Some(GeofenceEvent::new(
                    geofence.id.clone(),
                    position.device_id.clone(),
                    transition.event_type(),
                    position.point(),
                    now,
                ))
            }
            CooldownDecision::Suppress(reason) => {
                debug!(
                    device_id = %position.device_id,
                    geofence_id = %geofence.id,
                    ?transition,
                    ?reason,
                    "transition suppressed"
                );
                None
            }
        };

        if let (Some(publisher), Some(event)) = (publisher, &event) {
            publisher.publish(event.clone());
        }
        drop(shard);

        Ok(Evaluation {
            inside,
            step,
            decision: Some(decision),
            event,
        })
    }

    /// Snapshot of a pair's state, `None` if unknown.
    pub fn state(&self, device_id: &DeviceId, geofence_id: &GeofenceId) -> FenceResult<Option<ContainmentState>> {
        let shard = self.lock_shard(device_id)?;
        Ok(shard.get(&(device_id.clone(), geofence_id.clone())).copied())
    }

    /// Drops a pair's state; the next sample is treated as a first observation.
    pub fn forget(&self, device_id: &DeviceId, geofence_id: &GeofenceId) -> FenceResult<bool> {
        let mut shard = self.lock_shard(device_id)?;
        Ok(shard.remove(&(device_id.clone(), geofence_id.clone())).is_some())
    }

    /// Drops every pair of a device.
    pub fn forget_device(&self, device_id: &DeviceId) -> FenceResult<usize> {
        let mut shard = self.lock_shard(device_id)?;
        let before = shard.len();
        shard.retain(|(d, _), _| d != device_id);
        Ok(before - shard.len())
    }

    /// Drops every pair of a geofence.
    pub fn forget_geofence(&self, geofence_id: &GeofenceId) -> FenceResult<usize> {
        self.retain_all(|(_, g), _| g != geofence_id)
    }

    /// Drops pairs whose newest sample is older than `cutoff`.
    pub fn evict_idle(&self, cutoff: DateTime<Utc>) -> FenceResult<usize> {
        self.retain_all(|_, s| s.last_observed_at >= cutoff)
    }

    /// Number of tracked pairs.
    pub fn len(&self) -> FenceResult<usize> {
        let mut total = 0;
        for shard in &self.shards {
            total += shard
                .lock()
                .map_err(|_| FenceError::internal("poisoned lock: tracker shard"))?
                .len();
        }
        Ok(total)
    }

    /// Returns true if no pair is tracked.
    pub fn is_empty(&self) -> FenceResult<bool> {
        Ok(self.len()? == 0)
    }

    fn retain_all(&self, mut keep: impl FnMut(&PairKey, &ContainmentState) -> bool) -> FenceResult<usize> {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard
                .lock()
                .map_err(|_| FenceError::internal("poisoned lock: tracker shard"))?;
            let before = shard.len();
            shard.retain(|k, v| keep(k, v));
            removed += before - shard.len();
        }
        Ok(removed)
    }
}

fn pair_key(position: &DevicePosition, geofence: &Geofence) -> PairKey {
    (position.device_id.clone(), geofence.id.clone())
}

fn advance(shard: &mut Shard, key: PairKey, inside: bool, observed_at: DateTime<Utc>) -> Step {
    match shard.get_mut(&key) {
        Some(state) => state.apply(inside, observed_at),
        None => {
            shard.insert(key, ContainmentState::seeded(inside, observed_at));
            Step::First
        }
    }
}
