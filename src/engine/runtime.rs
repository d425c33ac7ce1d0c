//! Sharded ingest runtime.
//!
//! Position samples arrive faster than a caller wants to wait for them. This
//! runtime hands each sample to a bounded worker queue chosen by device id,
//! so samples of one device are always processed in submission order while
//! different devices proceed in parallel. A full queue rejects the sample
//! instead of blocking the producer.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ExecutionError, FenceError, FenceResult};
use crate::event::GeofenceEvent;
use crate::position::DevicePosition;
use crate::tracker::shard_for;

use super::GeofenceEngine;

/// Ingest runtime configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Number of workers, each owning one queue.
    pub workers: usize,
    /// Maximum queued samples per worker.
    pub queue_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

enum Job {
    Process {
        position: DevicePosition,
        reply: Option<Sender<FenceResult<Vec<GeofenceEvent>>>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct Lane {
    name: String,
    tx: Sender<Job>,
    worker: JoinHandle<()>,
    queue_capacity: usize,
}

impl Lane {
    fn start(idx: usize, queue_capacity: usize, engine: Arc<GeofenceEngine>) -> FenceResult<Self> {
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);
        let name = format!("ingest-{idx}");

        let worker = thread::Builder::new()
            .name(format!("fencewatch-{name}"))
            .spawn(move || worker_loop(&engine, &rx))
            .map_err(|e| FenceError::internal(format!("failed to spawn ingest worker: {e}")))?;

        Ok(Self {
            name,
            tx,
            worker,
            queue_capacity,
        })
    }

    fn try_submit(&self, job: Job) -> FenceResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(FenceError::Execution(ExecutionError::QueueFull {
                path: self.name.clone(),
                capacity: self.queue_capacity,
            })),
            Err(TrySendError::Disconnected(_)) => Err(FenceError::Execution(ExecutionError::Disconnected {
                path: self.name.clone(),
            })),
        }
    }
}

fn worker_loop(engine: &GeofenceEngine, rx: &Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Process { position, reply } => {
                let result = engine.process_position(&position);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            warn!(device_id = %position.device_id, error = %err, "sample rejected");
                        }
                    }
                }
            }

            #[cfg(test)]
            Job::Sleep { duration, reply } => {
                thread::sleep(duration);
                let _ = reply.send(());
            }
        }
    }
}

/// Handle returned by `submit_async`.
pub struct IngestHandle {
    lane: String,
    rx: Receiver<FenceResult<Vec<GeofenceEvent>>>,
}

impl IngestHandle {
    /// Name of the worker lane the sample was routed to.
    #[must_use]
    pub fn lane(&self) -> &str {
        &self.lane
    }

    /// Waits for the sample to be processed.
    pub fn join(self) -> FenceResult<Vec<GeofenceEvent>> {
        self.rx
            .recv()
            .map_err(|_| FenceError::Execution(ExecutionError::Disconnected { path: self.lane }))?
    }

    /// Waits for the sample to be processed with a timeout.
    pub fn join_timeout(self, timeout: Duration) -> FenceResult<Vec<GeofenceEvent>> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => FenceError::Execution(ExecutionError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }),
            RecvTimeoutError::Disconnected => {
                FenceError::Execution(ExecutionError::Disconnected { path: self.lane })
            }
        })?
    }
}

/// Device-sharded worker pool in front of a `GeofenceEngine`.
pub struct IngestRuntime {
    engine: Arc<GeofenceEngine>,
    lanes: Vec<Lane>,
}

impl IngestRuntime {
    /// Starts one worker per configured lane.
    pub fn start(engine: Arc<GeofenceEngine>, cfg: &IngestConfig) -> FenceResult<Self> {
        let workers = cfg.workers.max(1);
        let lanes = (0..workers)
            .map(|idx| Lane::start(idx, cfg.queue_capacity, Arc::clone(&engine)))
            .collect::<FenceResult<Vec<_>>>()?;
        debug!(workers, queue_capacity = cfg.queue_capacity, "ingest runtime started");
        Ok(Self { engine, lanes })
    }

    fn lane_for(&self, position: &DevicePosition) -> &Lane {
        &self.lanes[shard_for(&position.device_id, self.lanes.len())]
    }

    /// Fire-and-forget submission. Processing errors are logged by the worker.
    ///
    /// # Errors
    ///
    /// `QueueFull` when the device's lane is saturated; the sample is dropped.
    pub fn submit(&self, position: DevicePosition) -> FenceResult<()> {
        self.lane_for(&position).try_submit(Job::Process { position, reply: None })
    }

    /// Submits a sample and returns a handle for its events.
    pub fn submit_async(&self, position: DevicePosition) -> FenceResult<IngestHandle> {
        let lane = self.lane_for(&position);
        let (tx, rx) = bounded::<FenceResult<Vec<GeofenceEvent>>>(1);
        lane.try_submit(Job::Process {
            position,
            reply: Some(tx),
        })?;
        Ok(IngestHandle {
            lane: lane.name.clone(),
            rx,
        })
    }

    /// Submits a sample and waits for its events.
    pub fn process(&self, position: DevicePosition) -> FenceResult<Vec<GeofenceEvent>> {
        self.submit_async(position)?.join()
    }

    /// Returns the underlying engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<GeofenceEngine> {
        &self.engine
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.lanes.len()
    }

    #[cfg(test)]
    fn submit_sleep(&self, lane: usize, duration: Duration) -> FenceResult<Receiver<()>> {
        let (tx, rx) = bounded::<()>(1);
        self.lanes[lane].try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

impl Drop for IngestRuntime {
    fn drop(&mut self) {
        // Closing each queue lets its worker drain what is queued and exit.
        for lane in self.lanes.drain(..) {
            let Lane { tx, worker, .. } = lane;
            drop(tx);
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration as ChronoDuration, Utc};

    use crate::channel::EventHub;
    use crate::config::FenceConfig;
    use crate::geofence::Geofence;
    use crate::geometry::{destination, Geometry, LatLng};
    use crate::position::DeviceId;
    use crate::storage::{GeofenceStore, InMemoryGeofenceStore, LatestPositions};

    const CENTER: LatLng = LatLng::new(40.4168, -3.7038);

    fn engine_with_fence(devices: &[&str]) -> Arc<GeofenceEngine> {
        let store = Arc::new(InMemoryGeofenceStore::new());
        store
            .upsert(Geofence::new(
                "plaza",
                Geometry::Circle {
                    center: CENTER,
                    radius_meters: 300.0,
                },
            ))
            .unwrap();
        for device in devices {
            store.assign(&"plaza".into(), (*device).into()).unwrap();
        }
        Arc::new(GeofenceEngine::new(
            &FenceConfig::default(),
            store,
            Arc::new(LatestPositions::new()),
            Arc::new(EventHub::default()),
        ))
    }

    fn sample(device: &str, inside: bool, secs: i64) -> DevicePosition {
        let base = Utc::now() - ChronoDuration::hours(1);
        let p = if inside { CENTER } else { destination(CENTER, 90.0, 1_000.0) };
        DevicePosition::new(device, p.latitude, p.longitude, base + ChronoDuration::seconds(secs))
    }

    #[test]
    fn samples_of_one_device_keep_their_order() {
        let runtime = IngestRuntime::start(engine_with_fence(&["d"]), &IngestConfig::default()).unwrap();

        let handles: Vec<_> = (0..6)
            .map(|i| runtime.submit_async(sample("d", i % 2 == 1, i)).unwrap())
            .collect();
        let lanes: std::collections::HashSet<_> = handles.iter().map(|h| h.lane().to_string()).collect();
        assert_eq!(lanes.len(), 1);

        let counts: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap().len()).collect();
        // First sample only seeds; every later sample flips the state.
        assert_eq!(counts, vec![0, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn full_lane_rejects_instead_of_blocking() {
        let runtime = IngestRuntime::start(
            engine_with_fence(&["d"]),
            &IngestConfig {
                workers: 1,
                queue_capacity: 1,
            },
        )
        .unwrap();

        let sleeping = runtime.submit_sleep(0, Duration::from_millis(200)).unwrap();
        // Give the worker time to pick up the sleep job.
        thread::sleep(Duration::from_millis(20));
        runtime.submit(sample("d", false, 0)).unwrap();

        let err = runtime.submit(sample("d", true, 1)).unwrap_err();
        let FenceError::Execution(ExecutionError::QueueFull { path, capacity }) = err else {
            panic!("expected QueueFull, got {err:?}");
        };
        assert_eq!(path, "ingest-0");
        assert_eq!(capacity, 1);

        sleeping.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn join_timeout_reports_timeout_while_lane_is_busy() {
        let runtime = IngestRuntime::start(
            engine_with_fence(&["d"]),
            &IngestConfig {
                workers: 1,
                queue_capacity: 4,
            },
        )
        .unwrap();
        let sleeping = runtime.submit_sleep(0, Duration::from_millis(150)).unwrap();
        let handle = runtime.submit_async(sample("d", true, 0)).unwrap();
        let err = handle.join_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, FenceError::Execution(ExecutionError::Timeout { duration_ms: 10 })));
        sleeping.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn join_reports_disconnected_when_reply_sender_dropped() {
        let (tx, rx) = bounded::<FenceResult<Vec<GeofenceEvent>>>(1);
        drop(tx);
        let handle = IngestHandle {
            lane: "ingest-3".to_string(),
            rx,
        };
        let err = handle.join().unwrap_err();
        let FenceError::Execution(ExecutionError::Disconnected { path }) = err else {
            panic!("expected Disconnected, got {err:?}");
        };
        assert_eq!(path, "ingest-3");
    }

    #[test]
    fn drop_drains_queued_samples() {
        let engine = engine_with_fence(&["a", "b", "c"]);
        {
            let runtime = IngestRuntime::start(Arc::clone(&engine), &IngestConfig::default()).unwrap();
            for device in ["a", "b", "c"] {
                runtime.submit(sample(device, true, 0)).unwrap();
            }
        }
        for device in ["a", "b", "c"] {
            let state = engine
                .tracker()
                .state(&DeviceId::from(device), &"plaza".into())
                .unwrap();
            assert!(state.is_some_and(|s| s.is_inside), "device {device}");
        }
    }
}
