//! Geofence engine.
//!
//! Wires the pipeline together: position sample → geometry → tracker →
//! cooldown → event channel. The streaming path (`process_position`) and the
//! manual check (`check_now`) share the same tracker and the same clock, the
//! sample timestamp, so a manual check is indistinguishable from replaying
//! the device's latest sample.

/// Sharded ingest worker pool.
pub mod runtime;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::batch::{BatchControl, BatchResult, BatchRunner, CheckNowReport, DeviceError};
use crate::channel::EventPublisher;
use crate::config::FenceConfig;
use crate::error::{ExecutionError, FenceError, FenceResult};
use crate::event::GeofenceEvent;
use crate::geofence::{Geofence, GeofenceId};
use crate::position::DevicePosition;
use crate::storage::{GeofenceStore, PositionProvider};
use crate::tracker::ContainmentTracker;

/// Geofence evaluation engine.
pub struct GeofenceEngine {
    geofences: Arc<dyn GeofenceStore>,
    positions: Arc<dyn PositionProvider>,
    publisher: Arc<dyn EventPublisher>,
    tracker: Arc<ContainmentTracker>,
    batch: BatchRunner,
}

impl GeofenceEngine {
    /// Create a new engine over the given collaborators.
    #[must_use]
    pub fn new(
        cfg: &FenceConfig,
        geofences: Arc<dyn GeofenceStore>,
        positions: Arc<dyn PositionProvider>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let tracker = Arc::new(ContainmentTracker::new(cfg.tracker_shards));
        let batch = BatchRunner::new(Arc::clone(&tracker), &cfg.batch).with_publisher(Arc::clone(&publisher));
        Self {
            geofences,
            positions,
            publisher,
            tracker,
            batch,
        }
    }

    /// Get a reference to the geofence store.
    pub fn geofence_store(&self) -> &Arc<dyn GeofenceStore> {
        &self.geofences
    }

    /// Get a reference to the containment tracker.
    pub fn tracker(&self) -> &Arc<ContainmentTracker> {
        &self.tracker
    }

    /// Evaluates one sample against every geofence assigned to its device and
    /// publishes the resulting events.
    ///
    /// The sample timestamp is the evaluation clock: cooldowns are measured
    /// between sample times and events are stamped with them. A geofence
    /// with malformed geometry is skipped; the others still run.
    ///
    /// # Errors
    ///
    /// Fails only for an invalid position or an unavailable geofence store.
    pub fn process_position(&self, position: &DevicePosition) -> FenceResult<Vec<GeofenceEvent>> {
        position.validate()?;
        let fences = self.geofences.geofences_for_device(&position.device_id)?;

        let mut events = Vec::new();
        for fence in &fences {
            match self
                .tracker
                .evaluate_and_publish(fence, position, Some(self.publisher.as_ref()))
            {
                Ok(evaluation) => {
                    debug!(
                        device_id = %position.device_id,
                        geofence_id = %fence.id,
                        inside = evaluation.inside,
                        step = ?evaluation.step,
                        "sample evaluated"
                    );
                    if let Some(event) = evaluation.event {
                        info!(
                            device_id = %event.device_id,
                            geofence_id = %event.geofence_id,
                            event_type = ?event.event_type,
                            "geofence event"
                        );
                        events.push(event);
                    }
                }
                Err(FenceError::Geometry(err)) => {
                    warn!(geofence_id = %fence.id, error = %err, "skipping geofence with invalid geometry");
                }
                Err(err) => {
                    warn!(
                        device_id = %position.device_id,
                        geofence_id = %fence.id,
                        error = %err,
                        "sample evaluation failed"
                    );
                }
            }
        }
        Ok(events)
    }

    /// `checkNow(geofenceId)`: re-evaluates every assigned device at its
    /// latest known position, using that position's timestamp as the clock.
    pub fn check_now(&self, geofence_id: &GeofenceId) -> FenceResult<CheckNowReport> {
        self.check_now_with(geofence_id, &BatchControl::unbounded())
            .map(|result| result.report())
    }

    /// Manual check with a deadline or cancellation token.
    ///
    /// Assigned devices without any known position are reported as errors.
    pub fn check_now_with(&self, geofence_id: &GeofenceId, control: &BatchControl) -> FenceResult<BatchResult> {
        let fence = self.geofence(geofence_id)?;
        let devices = self.geofences.devices_for(geofence_id)?;

        let mut positions = Vec::with_capacity(devices.len());
        let mut missing = Vec::new();
        for device_id in devices {
            match self.positions.latest(&device_id) {
                Ok(Some(position)) => positions.push(position),
                Ok(None) => missing.push(DeviceError {
                    device_id,
                    error: "no known position".to_string(),
                }),
                Err(err) => missing.push(DeviceError {
                    device_id,
                    error: err.to_string(),
                }),
            }
        }

        let mut result = self.batch.check_now(&fence, &positions, control)?;
        result.errors.extend(missing);
        Ok(result)
    }

    /// Runs a manual check over caller-supplied positions.
    pub fn check_positions(
        &self,
        geofence_id: &GeofenceId,
        positions: &[DevicePosition],
        control: &BatchControl,
    ) -> FenceResult<BatchResult> {
        let fence = self.geofence(geofence_id)?;
        self.batch.check_now(&fence, positions, control)
    }

    /// Registers or replaces a geofence. Replacing the geometry forgets the
    /// tracked state for it, so the next sample is a first observation.
    pub fn upsert_geofence(&self, geofence: Geofence) -> FenceResult<()> {
        let id = geofence.id.clone();
        let geometry = geofence.geometry.clone();
        if let Some(previous) = self.geofences.upsert(geofence)? {
            if previous.geometry != geometry {
                let forgotten = self.tracker.forget_geofence(&id)?;
                debug!(geofence_id = %id, forgotten, "geometry changed, state reset");
            }
        }
        Ok(())
    }

    /// Removes a geofence and every tracked pair that refers to it.
    pub fn remove_geofence(&self, geofence_id: &GeofenceId) -> FenceResult<Option<Geofence>> {
        let removed = self.geofences.remove(geofence_id)?;
        self.tracker.forget_geofence(geofence_id)?;
        Ok(removed)
    }

    fn geofence(&self, geofence_id: &GeofenceId) -> FenceResult<Geofence> {
        self.geofences.get(geofence_id)?.ok_or_else(|| {
            FenceError::Execution(ExecutionError::GeofenceNotFound {
                id: geofence_id.to_string(),
            })
        })
    }
}
