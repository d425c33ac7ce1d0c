//! Error types for fencewatch.
//!
//! All errors are strongly typed using thiserror. Every error condition is
//! scoped to a single (device, geofence) unit of work; nothing here is meant
//! to be fatal to the host process.

use thiserror::Error;

/// Malformed geofence geometry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Polygon has {count} vertices, at least 3 are required")]
    DegeneratePolygon {
        count: usize,
    },

    #[error("Circle radius {radius_meters}m must be positive and finite")]
    InvalidRadius {
        radius_meters: f64,
    },

    #[error("Vertex {index} has non-finite coordinates")]
    NonFiniteVertex {
        index: usize,
    },
}

/// A position sample that should never have reached the core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidPositionError {
    #[error("Latitude {value} is out of range [-90, 90]")]
    LatitudeOutOfRange {
        value: f64,
    },

    #[error("Longitude {value} is out of range [-180, 180]")]
    LongitudeOutOfRange {
        value: f64,
    },

    #[error("Device id cannot be empty")]
    EmptyDeviceId,
}

/// Validation errors for wire definitions and registry input.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Unknown geometry type '{kind}'")]
    UnknownGeometryType {
        kind: String,
    },

    #[error("Invalid geofence definition: {reason}")]
    InvalidDefinition {
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors that occur while running the pipeline.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Geofence not found: {id}")]
    GeofenceNotFound {
        id: String,
    },

    #[error("Queue '{path}' is full (capacity {capacity})")]
    QueueFull {
        path: String,
        capacity: usize,
    },

    #[error("Channel '{path}' is disconnected")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },
}

/// Transport errors for the event channel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
    },

    #[error("Connection closed (code {code})")]
    Closed {
        code: u16,
    },
}

/// Top-level error type for fencewatch.
#[derive(Debug, Error)]
pub enum FenceError {
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Invalid position: {0}")]
    InvalidPosition(#[from] InvalidPositionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl FenceError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a geometry error.
    #[must_use]
    pub const fn is_geometry(&self) -> bool {
        matches!(self, Self::Geometry(_))
    }

    /// Returns true if this is an invalid position error.
    #[must_use]
    pub const fn is_invalid_position(&self) -> bool {
        matches!(self, Self::InvalidPosition(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Geometry(_) | Self::InvalidPosition(_) | Self::Validation(_) => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::Timeout { .. } | ExecutionError::QueueFull { .. }
            ),
            Self::Transport(e) => match e {
                TransportError::ConnectionFailed { .. } => true,
                // 1000 is a deliberate close, everything else is worth a retry.
                TransportError::Closed { code } => *code != 1000,
            },
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for fencewatch operations.
pub type FenceResult<T> = Result<T, FenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_error_degenerate() {
        let err = GeometryError::DegeneratePolygon { count: 2 };
        let msg = format!("{err}");
        assert!(msg.contains("2 vertices"));
        assert!(msg.contains("at least 3"));
    }

    #[test]
    fn test_geometry_error_radius() {
        let err = GeometryError::InvalidRadius { radius_meters: -5.0 };
        let msg = format!("{err}");
        assert!(msg.contains("-5m"));
    }

    #[test]
    fn test_invalid_position_latitude() {
        let err = InvalidPositionError::LatitudeOutOfRange { value: 91.5 };
        let msg = format!("{err}");
        assert!(msg.contains("91.5"));
        assert!(msg.contains("[-90, 90]"));
    }

    #[test]
    fn test_execution_error_timeout() {
        let err = ExecutionError::Timeout { duration_ms: 5000 };
        let msg = format!("{err}");
        assert!(msg.contains("5000ms"));
    }

    #[test]
    fn test_fence_error_from_geometry() {
        let err: FenceError = GeometryError::DegeneratePolygon { count: 0 }.into();
        assert!(err.is_geometry());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_fence_error_from_position() {
        let err: FenceError = InvalidPositionError::EmptyDeviceId.into();
        assert!(err.is_invalid_position());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_fence_error_retryable() {
        let queue_full: FenceError = ExecutionError::QueueFull {
            path: "ingest-0".to_string(),
            capacity: 8,
        }
        .into();
        assert!(queue_full.is_execution());
        assert!(queue_full.is_retryable());

        let normal: FenceError = TransportError::Closed { code: 1000 }.into();
        assert!(normal.is_transport());
        assert!(!normal.is_retryable());

        let abnormal: FenceError = TransportError::Closed { code: 1006 }.into();
        assert!(abnormal.is_retryable());

        let missing: FenceError = ExecutionError::GeofenceNotFound {
            id: "depot".to_string(),
        }
        .into();
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_fence_error_internal() {
        let err = FenceError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("unexpected state"));
    }
}
