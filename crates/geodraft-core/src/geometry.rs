//! GeoJSON geometry values.
//!
//! Geometry is treated as an opaque, immutable value: edits replace it
//! wholesale and nothing in the engine patches coordinates in place.

use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A position as `[longitude, latitude]`, optionally followed by altitude.
pub type Position = Vec<f64>;

/// Failure to extract or decode a geometry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct GeometryError(pub String);

impl From<serde_json::Error> for GeometryError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// A GeoJSON geometry object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<Geometry> },
}

impl Geometry {
    /// Create a point.
    pub fn point(lon: f64, lat: f64) -> Self {
        Geometry::Point {
            coordinates: vec![lon, lat],
        }
    }

    /// Create a line string from `[lon, lat]` pairs.
    pub fn line_string(points: &[[f64; 2]]) -> Self {
        Geometry::LineString {
            coordinates: points.iter().map(|p| p.to_vec()).collect(),
        }
    }

    /// Create a polygon with a single exterior ring.
    ///
    /// The ring is closed if the last point differs from the first.
    pub fn polygon(ring: &[[f64; 2]]) -> Self {
        let mut coords: Vec<Position> = ring.iter().map(|p| p.to_vec()).collect();
        if coords.first() != coords.last() {
            if let Some(first) = coords.first().cloned() {
                coords.push(first);
            }
        }
        Geometry::Polygon {
            coordinates: vec![coords],
        }
    }

    /// The GeoJSON type name.
    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Point { .. } => "Point",
            Geometry::MultiPoint { .. } => "MultiPoint",
            Geometry::LineString { .. } => "LineString",
            Geometry::MultiLineString { .. } => "MultiLineString",
            Geometry::Polygon { .. } => "Polygon",
            Geometry::MultiPolygon { .. } => "MultiPolygon",
            Geometry::GeometryCollection { .. } => "GeometryCollection",
        }
    }

    /// Visit every position in the geometry.
    pub fn for_each_position(&self, f: &mut impl FnMut(&Position)) {
        match self {
            Geometry::Point { coordinates } => f(coordinates),
            Geometry::MultiPoint { coordinates } | Geometry::LineString { coordinates } => {
                coordinates.iter().for_each(|p| f(p))
            }
            Geometry::MultiLineString { coordinates } | Geometry::Polygon { coordinates } => {
                coordinates.iter().flatten().for_each(|p| f(p))
            }
            Geometry::MultiPolygon { coordinates } => {
                coordinates.iter().flatten().flatten().for_each(|p| f(p))
            }
            Geometry::GeometryCollection { geometries } => {
                for geometry in geometries {
                    geometry.for_each_position(f);
                }
            }
        }
    }

    /// Bounding box in `(lon, lat)` space, or `None` for an empty geometry.
    ///
    /// Positions with fewer than two ordinates are ignored.
    pub fn bounds(&self) -> Option<Rect> {
        let mut result: Option<Rect> = None;
        self.for_each_position(&mut |p: &Position| {
            if p.len() < 2 {
                return;
            }
            let (x, y) = (p[0], p[1]);
            result = Some(match result {
                Some(r) => r.union_pt(Point::new(x, y)),
                None => Rect::new(x, y, x, y),
            });
        });
        result
    }

    /// Serialize to GeoJSON text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse GeoJSON geometry text.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
