//! Device position samples.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidPositionError;
use crate::geometry::LatLng;

/// Identifier of a tracked device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single position report: `{deviceId, latitude, longitude, timestamp}`
/// with an RFC 3339 timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePosition {
    pub device_id: DeviceId,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl DevicePosition {
    #[must_use]
    pub fn new(device_id: impl Into<DeviceId>, latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            latitude,
            longitude,
            timestamp,
        }
    }

    #[must_use]
    pub const fn point(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }

    /// Re-checks the coordinate ranges guaranteed upstream.
    ///
    /// NaN fails both range checks.
    pub fn validate(&self) -> Result<(), InvalidPositionError> {
        if self.device_id.as_str().trim().is_empty() {
            return Err(InvalidPositionError::EmptyDeviceId);
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(InvalidPositionError::LatitudeOutOfRange { value: self.latitude });
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(InvalidPositionError::LongitudeOutOfRange { value: self.longitude });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_wire_format() {
        let json = r#"{"deviceId":"truck-7","latitude":19.43,"longitude":-99.13,"timestamp":"2024-05-01T12:00:00Z"}"#;
        let p: DevicePosition = serde_json::from_str(json).unwrap();
        assert_eq!(p.device_id.as_str(), "truck-7");
        assert_eq!(p.timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");
        assert!(p.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_and_nan() {
        let now = Utc::now();
        assert_eq!(
            DevicePosition::new("d", 90.5, 0.0, now).validate(),
            Err(InvalidPositionError::LatitudeOutOfRange { value: 90.5 })
        );
        assert_eq!(
            DevicePosition::new("d", 0.0, -180.01, now).validate(),
            Err(InvalidPositionError::LongitudeOutOfRange { value: -180.01 })
        );
        assert!(DevicePosition::new("d", f64::NAN, 0.0, now).validate().is_err());
        assert_eq!(
            DevicePosition::new("", 0.0, 0.0, now).validate(),
            Err(InvalidPositionError::EmptyDeviceId)
        );
    }

    #[test]
    fn validate_accepts_extremes() {
        let now = Utc::now();
        assert!(DevicePosition::new("d", -90.0, 180.0, now).validate().is_ok());
        assert!(DevicePosition::new("d", 90.0, -180.0, now).validate().is_ok());
    }
}
