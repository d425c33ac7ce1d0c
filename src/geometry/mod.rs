//! Geometry evaluator.
//!
//! Pure point-in-shape membership for circle, polygon and rectangle
//! geofences. Nothing here holds state, so every function is safe to call
//! from any number of evaluation threads.

use serde::{Deserialize, Serialize};

use crate::error::{GeometryError, ValidationError};

/// Great-circle distance helpers.
pub mod distance;
/// Ray-casting point-in-polygon.
pub mod polygon;

pub use distance::{destination, haversine_meters, EARTH_RADIUS_METERS};

/// A latitude/longitude pair in decimal degrees.
///
/// Accepts both `latitude`/`longitude` and the short `lat`/`lng` keys on input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lng")]
    pub longitude: f64,
}

impl LatLng {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    fn is_finite(self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// Shape of a geofence.
///
/// On the wire this is `{"type": "circle"|"polygon"|"rectangle", "coordinates": [...], "radius": m}`.
/// A circle carries its center as the single coordinate. A rectangle may be
/// given as two opposite corners, which are expanded to four vertices.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GeometryDef", into = "GeometryDef")]
pub enum Geometry {
    Circle { center: LatLng, radius_meters: f64 },
    Polygon { vertices: Vec<LatLng> },
    Rectangle { vertices: Vec<LatLng> },
}

impl Geometry {
    /// Checks the structural invariants: at least 3 finite vertices for
    /// polygons and rectangles, not counting a trailing copy of the first
    /// vertex, and a positive finite radius for circles.
    pub fn validate(&self) -> Result<(), GeometryError> {
        match self {
            Self::Circle { center, radius_meters } => {
                if !center.is_finite() {
                    return Err(GeometryError::NonFiniteVertex { index: 0 });
                }
                if !radius_meters.is_finite() || *radius_meters <= 0.0 {
                    return Err(GeometryError::InvalidRadius {
                        radius_meters: *radius_meters,
                    });
                }
                Ok(())
            }
            Self::Polygon { vertices } | Self::Rectangle { vertices } => {
                validate_ring(vertices).map(|_| ())
            }
        }
    }

    /// Short lowercase name of the shape, as used on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Circle { .. } => "circle",
            Self::Polygon { .. } => "polygon",
            Self::Rectangle { .. } => "rectangle",
        }
    }
}

fn validate_ring(vertices: &[LatLng]) -> Result<&[LatLng], GeometryError> {
    let ring = polygon::open_ring(vertices);
    if ring.len() < 3 {
        return Err(GeometryError::DegeneratePolygon { count: ring.len() });
    }
    if let Some(index) = ring.iter().position(|v| !v.is_finite()) {
        return Err(GeometryError::NonFiniteVertex { index });
    }
    Ok(ring)
}

/// Decides whether `point` lies within `geometry`.
///
/// Boundary points are inside for every shape. Malformed geometry is an
/// error, never a silent `false`.
pub fn contains(geometry: &Geometry, point: LatLng) -> Result<bool, GeometryError> {
    match geometry {
        Geometry::Circle { center, radius_meters } => {
            geometry.validate()?;
            Ok(haversine_meters(*center, point) <= *radius_meters)
        }
        Geometry::Polygon { vertices } | Geometry::Rectangle { vertices } => {
            let ring = validate_ring(vertices)?;
            Ok(polygon::ray_cast(point, ring))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeometryDef {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Vec<LatLng>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    radius: Option<f64>,
}

impl TryFrom<GeometryDef> for Geometry {
    type Error = ValidationError;

    fn try_from(def: GeometryDef) -> Result<Self, Self::Error> {
        let geometry = match def.kind.trim().to_ascii_lowercase().as_str() {
            "circle" => {
                let [center] = def.coordinates.as_slice() else {
                    return Err(ValidationError::InvalidDefinition {
                        reason: format!(
                            "circle needs exactly one center coordinate, got {}",
                            def.coordinates.len()
                        ),
                    });
                };
                let radius_meters = def.radius.ok_or_else(|| ValidationError::MissingField {
                    field: "radius".to_string(),
                })?;
                Self::Circle {
                    center: *center,
                    radius_meters,
                }
            }
            "polygon" => Self::Polygon {
                vertices: def.coordinates,
            },
            "rectangle" => Self::Rectangle {
                vertices: expand_corners(def.coordinates),
            },
            other => {
                return Err(ValidationError::UnknownGeometryType {
                    kind: other.to_string(),
                })
            }
        };

        geometry.validate().map_err(|e| ValidationError::InvalidDefinition {
            reason: e.to_string(),
        })?;
        Ok(geometry)
    }
}

impl From<Geometry> for GeometryDef {
    fn from(geometry: Geometry) -> Self {
        let kind = geometry.kind().to_string();
        match geometry {
            Geometry::Circle { center, radius_meters } => Self {
                kind,
                coordinates: vec![center],
                radius: Some(radius_meters),
            },
            Geometry::Polygon { vertices } | Geometry::Rectangle { vertices } => Self {
                kind,
                coordinates: vertices,
                radius: None,
            },
        }
    }
}

/// Two opposite corners become the four vertices of the bounding box.
fn expand_corners(coordinates: Vec<LatLng>) -> Vec<LatLng> {
    let [a, b] = coordinates.as_slice() else {
        return coordinates;
    };
    let (south, north) = (a.latitude.min(b.latitude), a.latitude.max(b.latitude));
    let (west, east) = (a.longitude.min(b.longitude), a.longitude.max(b.longitude));
    vec![
        LatLng::new(south, west),
        LatLng::new(north, west),
        LatLng::new(north, east),
        LatLng::new(south, east),
    ]
}
