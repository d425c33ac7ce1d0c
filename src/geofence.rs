//! Geofence definitions.
//!
//! A geofence is a named area plus the notification policy that decides which
//! of its containment transitions become events. Definitions arrive from an
//! external CRUD collaborator as JSON:
//!
//! ```json
//! {
//!   "id": "warehouse-north",
//!   "geometry": {"type": "circle", "coordinates": [{"lat": 19.4326, "lng": -99.1332}], "radius": 500},
//!   "isActive": true,
//!   "notifyOnEntry": true,
//!   "notifyOnExit": true,
//!   "notificationCooldownSeconds": 300
//! }
//! ```

use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{GeometryError, ValidationError};
use crate::geometry::Geometry;

/// Identifier of a geofence, assigned by the external CRUD collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeofenceId(String);

impl GeofenceId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeofenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GeofenceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

const fn default_true() -> bool {
    true
}

/// A geofence and its notification policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    pub id: GeofenceId,
    pub geometry: Geometry,
    /// Inactive geofences still track containment but never emit events.
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub notify_on_entry: bool,
    #[serde(default = "default_true")]
    pub notify_on_exit: bool,
    #[serde(default)]
    pub notification_cooldown_seconds: u32,
}

impl Geofence {
    /// Active geofence that notifies on both directions without cooldown.
    #[must_use]
    pub fn new(id: impl Into<GeofenceId>, geometry: Geometry) -> Self {
        Self {
            id: id.into(),
            geometry,
            is_active: true,
            notify_on_entry: true,
            notify_on_exit: true,
            notification_cooldown_seconds: 0,
        }
    }

    #[must_use]
    pub const fn with_cooldown_seconds(mut self, seconds: u32) -> Self {
        self.notification_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_notifications(mut self, on_entry: bool, on_exit: bool) -> Self {
        self.notify_on_entry = on_entry;
        self.notify_on_exit = on_exit;
        self
    }

    #[must_use]
    pub const fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Cooldown window as a duration.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::seconds(i64::from(self.notification_cooldown_seconds))
    }

    /// Validates the id and geometry.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "id".to_string(),
            });
        }
        self.geometry
            .validate()
            .map_err(|e: GeometryError| ValidationError::InvalidDefinition {
                reason: format!("geofence {}: {e}", self.id),
            })
    }

    /// Parses and validates a JSON array of geofence definitions.
    pub fn list_from_json(json: &str) -> Result<Vec<Self>, ValidationError> {
        let fences: Vec<Self> = serde_json::from_str(json).map_err(|e| ValidationError::InvalidDefinition {
            reason: format!("invalid geofence list: {e}"),
        })?;
        for fence in &fences {
            fence.validate()?;
        }
        Ok(fences)
    }
}

impl From<String> for GeofenceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
