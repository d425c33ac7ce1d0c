//! Geofence events.
//!
//! Events are immutable once created and serialize to the delivery format
//! `{geofenceId, deviceId, eventType, position: {latitude, longitude}, timestamp}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geofence::GeofenceId;
use crate::geometry::LatLng;
use crate::position::DeviceId;

/// Raw containment change detected by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Outside on the previous sample, inside now.
    Entered,
    /// Inside on the previous sample, outside now.
    Exited,
}

impl Transition {
    #[must_use]
    pub const fn event_type(self) -> EventType {
        match self {
            Self::Entered => EventType::Entry,
            Self::Exited => EventType::Exit,
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Entry,
    Exit,
}

/// An emitted ENTRY/EXIT event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceEvent {
    pub event_id: Uuid,
    pub geofence_id: GeofenceId,
    pub device_id: DeviceId,
    pub event_type: EventType,
    pub position: LatLng,
    pub timestamp: DateTime<Utc>,
}

impl GeofenceEvent {
    #[must_use]
    pub fn new(
        geofence_id: GeofenceId,
        device_id: DeviceId,
        event_type: EventType,
        position: LatLng,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            geofence_id,
            device_id,
            event_type,
            position,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_to_delivery_format() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc);
        let ev = GeofenceEvent::new(
            GeofenceId::new("depot"),
            DeviceId::new("truck-7"),
            EventType::Entry,
            LatLng::new(19.4326, -99.1332),
            ts,
        );
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["geofenceId"], "depot");
        assert_eq!(json["deviceId"], "truck-7");
        assert_eq!(json["eventType"], "ENTRY");
        assert_eq!(json["position"]["latitude"], 19.4326);
        assert_eq!(json["position"]["longitude"], -99.1332);
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn transition_maps_to_event_type() {
        assert_eq!(Transition::Entered.event_type(), EventType::Entry);
        assert_eq!(Transition::Exited.event_type(), EventType::Exit);
    }
}
