//! Storage collaborators for fencewatch.
//!
//! The core does not define a persistence engine. These traits describe what
//! it needs from the surrounding service: geofence definitions with their
//! device assignments, and the latest known position per device. In-memory
//! implementations are provided for embedded use and tests.

mod memory;
mod traits;

pub use memory::{InMemoryGeofenceStore, LatestPositions};
pub use traits::{GeofenceStore, PositionProvider, StorageError};
