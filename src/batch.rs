//! Manual re-evaluation batch runner.
//!
//! Runs the regular per-sample pipeline for a set of device positions against
//! one geofence, on demand. Each position is evaluated at its own timestamp,
//! so from the tracker's point of view a manual check is just that sample
//! arriving again, and a device seen for the first time never produces an
//! event.
//!
//! Devices are independent and may be evaluated in parallel. A malformed
//! position fails only its own entry. A deadline or cancellation stops the
//! batch between devices: finished devices keep their updated state, the rest
//! are reported as skipped.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::unbounded;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::channel::EventPublisher;
use crate::error::FenceResult;
use crate::event::GeofenceEvent;
use crate::geofence::{Geofence, GeofenceId};
use crate::position::{DeviceId, DevicePosition};
use crate::tracker::ContainmentTracker;

/// Batch runner settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum devices evaluated concurrently.
    pub parallelism: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { parallelism: 4 }
    }
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Deadline and cancellation for one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchControl {
    pub deadline: Option<Instant>,
    pub cancel: Option<CancelToken>,
}

impl BatchControl {
    /// No deadline, no cancellation.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn should_stop(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Events generated for one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResult {
    pub device_id: DeviceId,
    pub events: Vec<GeofenceEvent>,
}

/// A device whose position could not be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceError {
    pub device_id: DeviceId,
    pub error: String,
}

/// Outcome of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub geofence_id: GeofenceId,
    /// Successfully evaluated devices, in input order.
    pub results: Vec<DeviceResult>,
    /// Devices that failed, in input order.
    pub errors: Vec<DeviceError>,
    /// Devices not evaluated because the batch was stopped.
    pub skipped: Vec<DeviceId>,
}

impl BatchResult {
    #[must_use]
    pub fn devices_checked(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn events_generated(&self) -> usize {
        self.results.iter().map(|r| r.events.len()).sum()
    }

    #[must_use]
    pub fn was_interrupted(&self) -> bool {
        !self.skipped.is_empty()
    }

    /// Summary in the manual-check API shape.
    #[must_use]
    pub fn report(&self) -> CheckNowReport {
        CheckNowReport {
            geofence_id: self.geofence_id.clone(),
            devices_checked: self.devices_checked(),
            events_generated: self.events_generated(),
            results: self
                .results
                .iter()
                .map(|r| DeviceSummary {
                    device_id: r.device_id.clone(),
                    events_generated: r.events.len(),
                })
                .collect(),
            errors: self.errors.clone(),
            skipped: self.skipped.clone(),
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub device_id: DeviceId,
    pub events_generated: usize,
}

/// Response of `checkNow(geofenceId)`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckNowReport {
    pub geofence_id: GeofenceId,
    pub devices_checked: usize,
    pub events_generated: usize,
    pub results: Vec<DeviceSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<DeviceError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<DeviceId>,
}

enum Outcome {
    Done(Vec<GeofenceEvent>),
    Failed(String),
    Skipped,
}

/// Evaluates a geofence against many device positions on demand.
pub struct BatchRunner {
    tracker: Arc<ContainmentTracker>,
    publisher: Option<Arc<dyn EventPublisher>>,
    parallelism: usize,
}

impl BatchRunner {
    #[must_use]
    pub fn new(tracker: Arc<ContainmentTracker>, cfg: &BatchConfig) -> Self {
        Self {
            tracker,
            publisher: None,
            parallelism: cfg.parallelism.max(1),
        }
    }

    /// Generated events are also handed to `publisher`, as on the streaming path.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Runs the batch. Each position is evaluated at its own timestamp, the
    /// same clock the streaming path uses.
    ///
    /// # Errors
    ///
    /// Fails before touching any device if the geofence itself is invalid.
    pub fn check_now(
        &self,
        geofence: &Geofence,
        positions: &[DevicePosition],
        control: &BatchControl,
    ) -> FenceResult<BatchResult> {
        geofence.geometry.validate()?;

        let next = AtomicUsize::new(0);
        let (tx, rx) = unbounded::<(usize, Outcome)>();
        let workers = self.parallelism.min(positions.len()).max(1);

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || loop {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    let Some(position) = positions.get(idx) else {
                        break;
                    };
                    let outcome = if control.should_stop() {
                        Outcome::Skipped
                    } else {
                        self.check_one(geofence, position)
                    };
                    let _ = tx.send((idx, outcome));
                });
            }
        });
        drop(tx);

        let mut outcomes: Vec<(usize, Outcome)> = rx.into_iter().collect();
        outcomes.sort_by_key(|(idx, _)| *idx);

        let mut result = BatchResult {
            geofence_id: geofence.id.clone(),
            results: Vec::new(),
            errors: Vec::new(),
            skipped: Vec::new(),
        };
        for (idx, outcome) in outcomes {
            let device_id = positions[idx].device_id.clone();
            match outcome {
                Outcome::Done(events) => result.results.push(DeviceResult { device_id, events }),
                Outcome::Failed(error) => result.errors.push(DeviceError { device_id, error }),
                Outcome::Skipped => result.skipped.push(device_id),
            }
        }

        info!(
            geofence_id = %geofence.id,
            devices_checked = result.devices_checked(),
            events_generated = result.events_generated(),
            errors = result.errors.len(),
            skipped = result.skipped.len(),
            "manual check finished"
        );
        Ok(result)
    }

    fn check_one(&self, geofence: &Geofence, position: &DevicePosition) -> Outcome {
        match self
            .tracker
            .evaluate_and_publish(geofence, position, self.publisher.as_deref())
        {
            Ok(evaluation) => Outcome::Done(evaluation.event.into_iter().collect()),
            Err(err) => {
                warn!(
                    geofence_id = %geofence.id,
                    device_id = %position.device_id,
                    error = %err,
                    "manual check failed for device"
                );
                Outcome::Failed(err.to_string())
            }
        }
    }
}
