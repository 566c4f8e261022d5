//! Individually persisted shapes.

use log::warn;

use crate::attributes::{AttributeChange, AttributeEdit, AttributeError, AttributeMap};
use crate::geometry::Geometry;
use crate::remote::{ShapeId, ShapeRecord, ShapeUpdate};
use crate::warning::ReconcileWarning;

/// Geometry of a stored shape.
///
/// Text that does not parse is kept as-is so submitting the shape writes it
/// back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeGeometry {
    Parsed(Geometry),
    Raw(String),
}

impl ShapeGeometry {
    pub fn parsed(&self) -> Option<&Geometry> {
        match self {
            ShapeGeometry::Parsed(g) => Some(g),
            ShapeGeometry::Raw(_) => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            ShapeGeometry::Parsed(g) => g.to_json(),
            ShapeGeometry::Raw(text) => Ok(text.clone()),
        }
    }
}

/// A shape as held by editors.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub id: ShapeId,
    pub name: String,
    pub geometry: ShapeGeometry,
    pub attributes: AttributeMap,
    /// Stored attribute text that could not be parsed. Submitted unchanged
    /// until the attributes are edited.
    pub unreadable_attributes: Option<String>,
}

impl Shape {
    /// Decode a wire record.
    ///
    /// Unreadable geometry or attributes never fail the load; they come back
    /// as warnings.
    pub fn from_record(record: ShapeRecord) -> (Self, Vec<ReconcileWarning>) {
        let mut warnings = Vec::new();
        let geometry = match Geometry::from_json(&record.geometry) {
            Ok(g) => ShapeGeometry::Parsed(g),
            Err(e) => {
                let warning = ReconcileWarning::ParseFailure {
                    what: "shape geometry",
                    message: format!("shape {}: {e}", record.id),
                };
                warn!("{warning}");
                warnings.push(warning);
                ShapeGeometry::Raw(record.geometry)
            }
        };
        let (attributes, warning) = AttributeMap::parse_lenient(&record.attributes);
        let unreadable_attributes = warning.is_some().then_some(record.attributes);
        warnings.extend(warning);
        let shape = Self {
            id: record.id,
            name: record.name,
            geometry,
            attributes,
            unreadable_attributes,
        };
        (shape, warnings)
    }

    /// Apply an attribute edit. Any change replaces unreadable stored text.
    pub fn edit_attributes(&mut self, edit: AttributeEdit) -> Result<AttributeChange, AttributeError> {
        let change = self.attributes.apply(edit)?;
        if change != AttributeChange::Unchanged {
            self.unreadable_attributes = None;
        }
        Ok(change)
    }

    /// Full update carrying name, geometry and attributes.
    pub fn to_update(&self) -> Result<ShapeUpdate, serde_json::Error> {
        let attributes = match &self.unreadable_attributes {
            Some(text) => text.clone(),
            None => self.attributes.to_json()?,
        };
        Ok(ShapeUpdate {
            name: Some(self.name.clone()),
            geometry: Some(self.geometry.to_json()?),
            attributes: Some(attributes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(geometry: &str, attributes: &str) -> ShapeRecord {
        ShapeRecord {
            id: ShapeId(5),
            name: "Lot".into(),
            geometry: geometry.into(),
            attributes: attributes.into(),
        }
    }

    #[test]
    fn test_from_record() {
        let (shape, warnings) = Shape::from_record(record(
            r#"{"type":"Point","coordinates":[1,2]}"#,
            r#"{"x":"1"}"#,
        ));
        assert!(warnings.is_empty());
        assert_eq!(shape.geometry.parsed(), Some(&Geometry::point(1.0, 2.0)));
        assert_eq!(shape.attributes.get("x"), Some("1"));
    }

    #[test]
    fn test_bad_geometry_is_kept_raw() {
        let (shape, warnings) = Shape::from_record(record("POINT(1 2)", ""));
        assert_eq!(shape.geometry, ShapeGeometry::Raw("POINT(1 2)".into()));
        assert_eq!(warnings.len(), 1);

        let update = shape.to_update().unwrap();
        assert_eq!(update.geometry.as_deref(), Some("POINT(1 2)"));
    }

    #[test]
    fn test_bad_attributes_warn_and_empty() {
        let (shape, warnings) =
            Shape::from_record(record(r#"{"type":"Point","coordinates":[0,0]}"#, "{oops"));
        assert!(shape.attributes.is_empty());
        assert!(matches!(
            warnings.as_slice(),
            [ReconcileWarning::ParseFailure { what: "attributes", .. }]
        ));
    }

    #[test]
    fn test_bad_attributes_are_written_back_until_edited() {
        let (mut shape, _) =
            Shape::from_record(record(r#"{"type":"Point","coordinates":[0,0]}"#, "{oops"));
        shape.name = "Renamed".into();
        assert_eq!(shape.to_update().unwrap().attributes.as_deref(), Some("{oops"));

        shape.edit_attributes(AttributeEdit::Add).unwrap();
        assert_eq!(
            shape.to_update().unwrap().attributes.as_deref(),
            Some(r#"{"new_0":""}"#)
        );
    }

    #[test]
    fn test_to_update_carries_all_fields() {
        let (shape, _) = Shape::from_record(record(
            r#"{"type":"Point","coordinates":[1,2]}"#,
            r#"{"y":"2"}"#,
        ));
        let update = shape.to_update().unwrap();
        assert_eq!(update.name.as_deref(), Some("Lot"));
        assert_eq!(update.attributes.as_deref(), Some(r#"{"y":"2"}"#));
    }
}
