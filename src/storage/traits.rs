//! Abstract storage traits.

use thiserror::Error;

use crate::error::{ExecutionError, FenceError};
use crate::geofence::{Geofence, GeofenceId};
use crate::position::{DeviceId, DevicePosition};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Geofence not found.
    #[error("Geofence not found: {0}")]
    GeofenceNotFound(GeofenceId),

    /// Definition rejected by validation.
    #[error("Invalid geofence: {0}")]
    Invalid(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

impl From<StorageError> for FenceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::GeofenceNotFound(id) => Self::Execution(ExecutionError::GeofenceNotFound {
                id: id.to_string(),
            }),
            other => Self::Execution(ExecutionError::Storage {
                message: other.to_string(),
            }),
        }
    }
}

/// Source of geofence definitions and device assignments.
///
/// Implementations must be safe to share across evaluation threads.
pub trait GeofenceStore: Send + Sync {
    /// Insert or replace a geofence. Returns the previous definition, if any.
    fn upsert(&self, geofence: Geofence) -> Result<Option<Geofence>, StorageError>;

    /// Get a geofence by ID.
    fn get(&self, id: &GeofenceId) -> Result<Option<Geofence>, StorageError>;

    /// Remove a geofence and its assignments.
    fn remove(&self, id: &GeofenceId) -> Result<Option<Geofence>, StorageError>;

    /// All geofences, ordered by ID.
    fn list(&self) -> Result<Vec<Geofence>, StorageError>;

    /// Associate a device with a geofence.
    ///
    /// # Errors
    /// - `GeofenceNotFound` if the geofence does not exist.
    fn assign(&self, id: &GeofenceId, device_id: DeviceId) -> Result<(), StorageError>;

    /// Remove a device association. Returns false if it did not exist.
    fn unassign(&self, id: &GeofenceId, device_id: &DeviceId) -> Result<bool, StorageError>;

    /// Devices associated with a geofence, ordered by ID.
    fn devices_for(&self, id: &GeofenceId) -> Result<Vec<DeviceId>, StorageError>;

    /// Geofences a device is associated with, ordered by ID.
    fn geofences_for_device(&self, device_id: &DeviceId) -> Result<Vec<Geofence>, StorageError>;
}

/// Latest known position per device, supplied by the ingestion collaborator.
pub trait PositionProvider: Send + Sync {
    /// Newest position for a device, if any.
    fn latest(&self, device_id: &DeviceId) -> Result<Option<DevicePosition>, StorageError>;
}
