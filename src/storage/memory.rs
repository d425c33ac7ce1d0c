//! In-memory storage backend.
//!
//! Thread-safe implementations of the storage traits, intended for embedded
//! usage, tests and the replay tool.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use crate::geofence::{Geofence, GeofenceId};
use crate::position::{DeviceId, DevicePosition};
use crate::storage::traits::{GeofenceStore, PositionProvider, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct GeofenceState {
    by_id: BTreeMap<GeofenceId, Geofence>,
    devices: HashMap<GeofenceId, BTreeSet<DeviceId>>,
    by_device: HashMap<DeviceId, BTreeSet<GeofenceId>>,
}

/// Thread-safe in-memory geofence registry.
#[derive(Debug, Default)]
pub struct InMemoryGeofenceStore {
    state: RwLock<GeofenceState>,
}

impl InMemoryGeofenceStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl GeofenceStore for InMemoryGeofenceStore {
    fn upsert(&self, geofence: Geofence) -> Result<Option<Geofence>, StorageError> {
        geofence
            .validate()
            .map_err(|e| StorageError::Invalid(e.to_string()))?;
        let mut state = self.state.write().map_err(|_| lock_err("geofence.upsert"))?;
        Ok(state.by_id.insert(geofence.id.clone(), geofence))
    }

    fn get(&self, id: &GeofenceId) -> Result<Option<Geofence>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("geofence.get"))?;
        Ok(state.by_id.get(id).cloned())
    }

    fn remove(&self, id: &GeofenceId) -> Result<Option<Geofence>, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("geofence.remove"))?;
        let removed = state.by_id.remove(id);
        if let Some(devices) = state.devices.remove(id) {
            for device in devices {
                if let Some(fences) = state.by_device.get_mut(&device) {
                    fences.remove(id);
                    if fences.is_empty() {
                        state.by_device.remove(&device);
                    }
                }
            }
        }
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<Geofence>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("geofence.list"))?;
        Ok(state.by_id.values().cloned().collect())
    }

    fn assign(&self, id: &GeofenceId, device_id: DeviceId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("geofence.assign"))?;
        if !state.by_id.contains_key(id) {
            return Err(StorageError::GeofenceNotFound(id.clone()));
        }
        state
            .by_device
            .entry(device_id.clone())
            .or_default()
            .insert(id.clone());
        state.devices.entry(id.clone()).or_default().insert(device_id);
        Ok(())
    }

    fn unassign(&self, id: &GeofenceId, device_id: &DeviceId) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("geofence.unassign"))?;
        let removed = state
            .devices
            .get_mut(id)
            .is_some_and(|devices| devices.remove(device_id));
        if let Some(fences) = state.by_device.get_mut(device_id) {
            fences.remove(id);
            if fences.is_empty() {
                state.by_device.remove(device_id);
            }
        }
        Ok(removed)
    }

    fn devices_for(&self, id: &GeofenceId) -> Result<Vec<DeviceId>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("geofence.devices_for"))?;
        if !state.by_id.contains_key(id) {
            return Err(StorageError::GeofenceNotFound(id.clone()));
        }
        Ok(state
            .devices
            .get(id)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn geofences_for_device(&self, device_id: &DeviceId) -> Result<Vec<Geofence>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("geofence.geofences_for_device"))?;
        Ok(state
            .by_device
            .get(device_id)
            .map(|ids| ids.iter().filter_map(|id| state.by_id.get(id).cloned()).collect())
            .unwrap_or_default())
    }
}

/// Latest position per device.
///
/// `record` keeps the newest sample by timestamp; older samples are ignored.
#[derive(Debug, Default)]
pub struct LatestPositions {
    by_device: RwLock<HashMap<DeviceId, DevicePosition>>,
}

impl LatestPositions {
    /// Create a new empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sample. Returns false if a newer one is already stored.
    pub fn record(&self, position: DevicePosition) -> Result<bool, StorageError> {
        let mut by_device = self.by_device.write().map_err(|_| lock_err("positions.record"))?;
        match by_device.get(&position.device_id) {
            Some(existing) if existing.timestamp > position.timestamp => Ok(false),
            _ => {
                by_device.insert(position.device_id.clone(), position);
                Ok(true)
            }
        }
    }
}

impl PositionProvider for LatestPositions {
    fn latest(&self, device_id: &DeviceId) -> Result<Option<DevicePosition>, StorageError> {
        let by_device = self.by_device.read().map_err(|_| lock_err("positions.latest"))?;
        Ok(by_device.get(device_id).cloned())
    }
}
