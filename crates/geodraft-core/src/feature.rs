//! Canonical feature model.
//!
//! A [`FeatureCollection`] is the in-memory form of a GeoJSON
//! `FeatureCollection`. Features are addressed by their GeoJSON `id` when they
//! have one and by a session-local [`FeatureKey`] otherwise.

use std::collections::HashSet;
use std::fmt;

use kurbo::Rect;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::attributes::{AttributeChange, AttributeEdit, AttributeError, AttributeMap};
use crate::geometry::Geometry;
use crate::remote::ShapeId;

/// GeoJSON feature identifier: any JSON number or string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureId {
    Number(Number),
    Text(String),
}

impl FeatureId {
    /// Interpret the identifier as a stored shape id.
    pub fn as_shape_id(&self) -> Option<ShapeId> {
        match self {
            FeatureId::Number(n) => n.as_u64().map(ShapeId),
            FeatureId::Text(s) => s.parse().ok().map(ShapeId),
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureId::Number(n) => write!(f, "{n}"),
            FeatureId::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<u64> for FeatureId {
    fn from(n: u64) -> Self {
        FeatureId::Number(n.into())
    }
}

impl From<i64> for FeatureId {
    fn from(n: i64) -> Self {
        FeatureId::Number(n.into())
    }
}

impl From<&str> for FeatureId {
    fn from(s: &str) -> Self {
        FeatureId::Text(s.to_string())
    }
}

impl From<String> for FeatureId {
    fn from(s: String) -> Self {
        FeatureId::Text(s)
    }
}

impl From<ShapeId> for FeatureId {
    fn from(id: ShapeId) -> Self {
        FeatureId::Number(id.0.into())
    }
}

/// Session-local identity of an in-memory feature. Never serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureKey(Uuid);

impl FeatureKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FeatureKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local:{}", self.0)
    }
}

/// Reference to a feature: by stored id, or by local key before one exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeatureRef {
    Persisted(FeatureId),
    Local(FeatureKey),
}

impl fmt::Display for FeatureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureRef::Persisted(id) => write!(f, "{id}"),
            FeatureRef::Local(key) => write!(f, "{key}"),
        }
    }
}

impl From<FeatureId> for FeatureRef {
    fn from(id: FeatureId) -> Self {
        FeatureRef::Persisted(id)
    }
}

impl From<FeatureKey> for FeatureRef {
    fn from(key: FeatureKey) -> Self {
        FeatureRef::Local(key)
    }
}

/// Feature model errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("feature {0} not found")]
    NotFound(FeatureRef),
    #[error("a feature with id {0} already exists")]
    DuplicateId(FeatureId),
    #[error(transparent)]
    Attribute(#[from] AttributeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
enum FeatureTag {
    #[default]
    Feature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
enum CollectionTag {
    #[default]
    FeatureCollection,
}

/// One geometry with its attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default)]
    kind: FeatureTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FeatureId>,
    /// `None` for an unlocated feature (`"geometry": null`).
    pub geometry: Option<Geometry>,
    #[serde(rename = "properties", default)]
    pub attributes: AttributeMap,
    /// Members other than the standard ones (`bbox`, extensions), kept for write-back.
    #[serde(flatten)]
    foreign: serde_json::Map<String, Value>,
    #[serde(skip)]
    key: FeatureKey,
}

impl Feature {
    /// A new, not yet persisted feature.
    pub fn new(geometry: Geometry) -> Self {
        Self {
            kind: FeatureTag::Feature,
            id: None,
            geometry: Some(geometry),
            attributes: AttributeMap::new(),
            foreign: serde_json::Map::new(),
            key: FeatureKey::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<FeatureId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_attributes(mut self, attributes: AttributeMap) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn key(&self) -> FeatureKey {
        self.key
    }

    /// Preferred reference: the stored id if any, else the local key.
    pub fn reference(&self) -> FeatureRef {
        match &self.id {
            Some(id) => FeatureRef::Persisted(id.clone()),
            None => FeatureRef::Local(self.key),
        }
    }

    fn matches(&self, target: &FeatureRef) -> bool {
        match target {
            FeatureRef::Persisted(id) => self.id.as_ref() == Some(id),
            FeatureRef::Local(key) => self.key == *key,
        }
    }
}

/// Result of parsing stored collection text.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCollection {
    Valid(FeatureCollection),
    /// The text is not a usable feature collection.
    Unparseable { error: String },
}

impl ParsedCollection {
    pub fn is_valid(&self) -> bool {
        matches!(self, ParsedCollection::Valid(_))
    }
}

/// Ordered collection of features with unique ids.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    kind: CollectionTag,
    #[serde(default)]
    features: Vec<Feature>,
    /// Top-level members other than `type` and `features`, kept for write-back.
    #[serde(flatten)]
    foreign: serde_json::Map<String, Value>,
}

impl FeatureCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection, rejecting duplicate ids.
    pub fn from_features(features: Vec<Feature>) -> Result<Self, ModelError> {
        let mut collection = Self::new();
        for feature in features {
            collection.insert(feature)?;
        }
        Ok(collection)
    }

    /// Parse stored text.
    ///
    /// Blank text is a valid empty collection. Malformed JSON, a document that
    /// is not a `FeatureCollection`, or duplicate feature ids are reported as
    /// [`ParsedCollection::Unparseable`].
    pub fn parse(text: &str) -> ParsedCollection {
        if text.trim().is_empty() {
            return ParsedCollection::Valid(Self::new());
        }
        let collection: Self = match serde_json::from_str(text) {
            Ok(c) => c,
            Err(e) => {
                return ParsedCollection::Unparseable {
                    error: e.to_string(),
                };
            }
        };
        if let Some(id) = collection.first_duplicate_id() {
            return ParsedCollection::Unparseable {
                error: format!("duplicate feature id {id}"),
            };
        }
        ParsedCollection::Valid(collection)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn first_duplicate_id(&self) -> Option<&FeatureId> {
        let mut seen = HashSet::new();
        self.features
            .iter()
            .filter_map(|f| f.id.as_ref())
            .find(|id| !seen.insert(*id))
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, target: &FeatureRef) -> Option<&Feature> {
        self.features.iter().find(|f| f.matches(target))
    }

    /// Apply an attribute edit to a referenced feature.
    pub fn edit_attributes(
        &mut self,
        target: &FeatureRef,
        edit: AttributeEdit,
    ) -> Result<AttributeChange, ModelError> {
        let index = self
            .index_of(target)
            .ok_or_else(|| ModelError::NotFound(target.clone()))?;
        Ok(self.features[index].attributes.apply(edit)?)
    }

    fn index_of(&self, target: &FeatureRef) -> Option<usize> {
        self.features.iter().position(|f| f.matches(target))
    }

    /// Append a feature, rejecting a duplicate id.
    pub fn insert(&mut self, feature: Feature) -> Result<FeatureKey, ModelError> {
        if let Some(id) = &feature.id {
            if self.index_of(&FeatureRef::Persisted(id.clone())).is_some() {
                return Err(ModelError::DuplicateId(id.clone()));
            }
        }
        let key = feature.key;
        self.features.push(feature);
        Ok(key)
    }

    /// Append a new identifier-less feature.
    pub fn apply_create(&mut self, geometry: Geometry) -> &Feature {
        let index = self.features.len();
        self.features.push(Feature::new(geometry));
        &self.features[index]
    }

    /// Replace the geometry of the feature with `id`. Never creates.
    pub fn apply_edit(&mut self, id: &FeatureId, geometry: Geometry) -> Result<&Feature, ModelError> {
        self.edit(&FeatureRef::Persisted(id.clone()), geometry)
    }

    /// Remove the feature with `id`.
    pub fn apply_delete(&mut self, id: &FeatureId) -> Result<Feature, ModelError> {
        self.delete(&FeatureRef::Persisted(id.clone()))
    }

    /// Replace the geometry of a referenced feature.
    pub fn edit(&mut self, target: &FeatureRef, geometry: Geometry) -> Result<&Feature, ModelError> {
        let index = self
            .index_of(target)
            .ok_or_else(|| ModelError::NotFound(target.clone()))?;
        self.features[index].geometry = Some(geometry);
        Ok(&self.features[index])
    }

    /// Remove a referenced feature.
    pub fn delete(&mut self, target: &FeatureRef) -> Result<Feature, ModelError> {
        let index = self
            .index_of(target)
            .ok_or_else(|| ModelError::NotFound(target.clone()))?;
        Ok(self.features.remove(index))
    }

    /// Bounding box of all features.
    pub fn bounds(&self) -> Option<Rect> {
        self.features
            .iter()
            .filter_map(|f| f.geometry.as_ref().and_then(Geometry::bounds))
            .reduce(|a, b| a.union(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FeatureCollection {
        FeatureCollection::from_features(vec![
            Feature::new(Geometry::point(0.0, 0.0))
                .with_id(1u64)
                .with_attributes([("name", "a")].into_iter().collect()),
            Feature::new(Geometry::point(1.0, 1.0)).with_id(2u64),
        ])
        .unwrap()
    }

    #[test]
    fn test_apply_create_appends_idless_feature() {
        let mut collection = sample();
        let geometry = Geometry::line_string(&[[0.0, 0.0], [3.0, 4.0]]);
        let created = collection.apply_create(geometry.clone());
        assert_eq!(created.id, None);
        assert_eq!(created.geometry, Some(geometry));
        assert_eq!(collection.len(), 3);
    }

    #[test]
    fn test_apply_edit_changes_only_target() {
        let mut collection = sample();
        let before = collection.clone();
        let moved = Geometry::point(9.0, 9.0);

        collection.apply_edit(&FeatureId::from(2u64), moved.clone()).unwrap();

        assert_eq!(collection.features()[0], before.features()[0]);
        assert_eq!(collection.features()[1].geometry, Some(moved));
        assert_eq!(collection.features()[1].attributes, before.features()[1].attributes);
    }

    #[test]
    fn test_missing_targets_leave_collection_unchanged() {
        let mut collection = sample();
        let before = collection.to_json().unwrap();

        let edit = collection.apply_edit(&FeatureId::from(7u64), Geometry::point(5.0, 5.0));
        assert_eq!(
            edit.unwrap_err(),
            ModelError::NotFound(FeatureRef::Persisted(FeatureId::from(7u64)))
        );
        let delete = collection.apply_delete(&FeatureId::from(7u64));
        assert!(matches!(delete, Err(ModelError::NotFound(_))));

        assert_eq!(collection.to_json().unwrap(), before);
    }

    #[test]
    fn test_edit_and_delete_by_local_key() {
        let mut collection = FeatureCollection::new();
        let key = collection.apply_create(Geometry::point(0.0, 0.0)).key();
        collection
            .edit(&FeatureRef::Local(key), Geometry::point(2.0, 2.0))
            .unwrap();
        assert_eq!(collection.features()[0].geometry, Some(Geometry::point(2.0, 2.0)));
        collection.delete(&FeatureRef::Local(key)).unwrap();
        assert!(collection.is_empty());
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let mut collection = sample();
        let result = collection.insert(Feature::new(Geometry::point(0.0, 0.0)).with_id(1u64));
        assert_eq!(result, Err(ModelError::DuplicateId(FeatureId::from(1u64))));
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn test_parse_keeps_foreign_members() {
        let text = r#"{"type":"FeatureCollection","name":"parcels","features":[{"type":"Feature","id":"a","geometry":{"type":"Point","coordinates":[1.0,2.0]},"properties":{"k":"v"}}]}"#;
        let ParsedCollection::Valid(collection) = FeatureCollection::parse(text) else {
            panic!("expected a valid collection");
        };
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.features()[0].id, Some(FeatureId::from("a")));

        let written = collection.to_json().unwrap();
        let value: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["name"], "parcels");
        assert_eq!(value["features"][0]["properties"]["k"], "v");
    }

    #[test]
    fn test_parse_null_properties() {
        let text = r#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":{"type":"Point","coordinates":[0,0]},"properties":null}]}"#;
        let parsed = FeatureCollection::parse(text);
        assert!(parsed.is_valid());
    }

    #[test]
    fn test_parse_distinguishes_empty_from_unparseable() {
        let empty = FeatureCollection::parse(r#"{"type":"FeatureCollection","features":[]}"#);
        assert_eq!(empty, ParsedCollection::Valid(FeatureCollection::new()));
        assert!(FeatureCollection::parse("").is_valid());

        let kml = FeatureCollection::parse("<kml><Document/></kml>");
        assert!(matches!(kml, ParsedCollection::Unparseable { .. }));

        let wrong_type = FeatureCollection::parse(r#"{"type":"Feature","features":[]}"#);
        assert!(!wrong_type.is_valid());
    }

    #[test]
    fn test_parse_rejects_duplicate_ids() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","id":3,"geometry":{"type":"Point","coordinates":[0,0]},"properties":{}},
            {"type":"Feature","id":3,"geometry":{"type":"Point","coordinates":[1,1]},"properties":{}}
        ]}"#;
        match FeatureCollection::parse(text) {
            ParsedCollection::Unparseable { error } => assert!(error.contains("duplicate")),
            other => panic!("expected unparseable, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_accepts_null_geometry_and_any_numeric_id() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","id":-3,"geometry":null,"properties":{}},
            {"type":"Feature","id":2.5,"geometry":{"type":"Point","coordinates":[1,1]},"properties":{}}
        ]}"#;
        let ParsedCollection::Valid(collection) = FeatureCollection::parse(text) else {
            panic!("expected a valid collection");
        };
        assert_eq!(collection.features()[0].geometry, None);
        assert_eq!(collection.features()[0].id, Some(FeatureId::from(-3i64)));
        assert_eq!(collection.bounds(), Some(Rect::new(1.0, 1.0, 1.0, 1.0)));

        let written: Value = serde_json::from_str(&collection.to_json().unwrap()).unwrap();
        assert_eq!(written["features"][0]["geometry"], Value::Null);
        assert_eq!(written["features"][0]["id"], -3);
        assert_eq!(written["features"][1]["id"], 2.5);
        assert_eq!(FeatureId::from(-3i64).as_shape_id(), None);
    }

    #[test]
    fn test_feature_foreign_members_survive_write_back() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","id":1,"bbox":[0,0,1,1],"geometry":{"type":"Point","coordinates":[0.5,0.5]},"properties":{"height":4.5,"ok":true}}
        ]}"#;
        let ParsedCollection::Valid(collection) = FeatureCollection::parse(text) else {
            panic!("expected a valid collection");
        };
        let before: Value = serde_json::from_str(text).unwrap();
        let after: Value = serde_json::from_str(&collection.to_json().unwrap()).unwrap();
        assert_eq!(after, before);
    }

    #[test]
    fn test_bounds_spans_features() {
        let collection = sample();
        assert_eq!(collection.bounds(), Some(Rect::new(0.0, 0.0, 1.0, 1.0)));
        assert_eq!(FeatureCollection::new().bounds(), None);
    }

    #[test]
    fn test_shape_id_from_feature_id() {
        assert_eq!(FeatureId::from(5u64).as_shape_id(), Some(ShapeId(5)));
        assert_eq!(FeatureId::from("12").as_shape_id(), Some(ShapeId(12)));
        assert_eq!(FeatureId::from("abc").as_shape_id(), None);
    }

    #[test]
    fn test_edit_attributes_on_feature() {
        let mut collection = sample();
        let target = FeatureRef::Persisted(FeatureId::from(1u64));
        let change = collection
            .edit_attributes(
                &target,
                AttributeEdit::SetValue {
                    key: "name".into(),
                    value: "b".into(),
                },
            )
            .unwrap();
        assert_eq!(change, AttributeChange::Updated);
        assert_eq!(collection.get(&target).unwrap().attributes.get("name"), Some("b"));

        let missing = FeatureRef::Persisted(FeatureId::from(7u64));
        assert!(collection.edit_attributes(&missing, AttributeEdit::Add).is_err());
    }
}
