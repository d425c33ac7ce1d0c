//! # fencewatch - Geofence containment and event engine
//!
//! fencewatch turns a stream of device position samples into geofence
//! ENTRY/EXIT events. It decides whether a point lies inside a circle,
//! polygon or rectangle, remembers per (device, geofence) containment,
//! applies per-geofence notification policy, and pushes the resulting events
//! to live subscribers that reconnect on their own.
//!
//! ## Core Concepts
//!
//! - **Geometry**: circle (haversine distance) or polygon/rectangle (ray casting)
//! - **ContainmentTracker**: per-pair state, transition detection, cooldown gate
//! - **EventHub / Subscriber**: non-blocking fan-out with reconnect and no replay
//! - **BatchRunner**: manual `checkNow` over many devices
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fencewatch::{EventHub, FenceConfig, Geofence, GeofenceEngine, Geometry, LatLng};
//! use fencewatch::{GeofenceStore, InMemoryGeofenceStore, LatestPositions, DevicePosition};
//!
//! let store = Arc::new(InMemoryGeofenceStore::new());
//! store.upsert(Geofence::new("depot", Geometry::Circle {
//!     center: LatLng::new(19.4326, -99.1332),
//!     radius_meters: 500.0,
//! }))?;
//! store.assign(&"depot".into(), "truck-7".into())?;
//!
//! let hub = Arc::new(EventHub::default());
//! let engine = GeofenceEngine::new(&FenceConfig::default(), store, Arc::new(LatestPositions::new()), hub);
//! let events = engine.process_position(&DevicePosition::new("truck-7", 19.4326, -99.1332, chrono::Utc::now()))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod event;
pub mod geofence;
pub mod geometry;
pub mod position;

// State, delivery, and orchestration
pub mod batch;
pub mod channel;
pub mod config;
pub mod engine;
pub mod storage;
pub mod tracker;

pub use batch::{BatchConfig, BatchControl, BatchResult, BatchRunner, CancelToken, CheckNowReport};
pub use channel::{
    CloseCode, Connection, ConnectionState, EventHub, EventPublisher, HubConfig, HubStats, Subscriber,
    SubscriberConfig, Transport,
};
pub use config::FenceConfig;
pub use engine::runtime::{IngestConfig, IngestHandle, IngestRuntime};
pub use engine::GeofenceEngine;
pub use error::{
    ExecutionError, FenceError, FenceResult, GeometryError, InvalidPositionError, TransportError, ValidationError,
};
pub use event::{EventType, GeofenceEvent, Transition};
pub use geofence::{Geofence, GeofenceId};
pub use geometry::{contains, haversine_meters, Geometry, LatLng};
pub use position::{DeviceId, DevicePosition};
pub use storage::{GeofenceStore, InMemoryGeofenceStore, LatestPositions, PositionProvider, StorageError};
pub use tracker::{ContainmentState, ContainmentTracker, CooldownDecision, CooldownPolicy};
