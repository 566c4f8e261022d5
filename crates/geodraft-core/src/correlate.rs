//! Correlation between drawing-surface layers and canonical features.
//!
//! The surface owns its layer objects; the engine only sees a [`LayerHandle`]
//! per layer. A [`Correlator`] keeps an explicit side table from handles to
//! [`FeatureRef`]s for the duration of an edit session, so that edit and
//! delete events can be applied to the right record without relying on
//! properties stashed on the layer.

use std::collections::{HashMap, HashSet};
use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::feature::{FeatureCollection, FeatureId, FeatureKey, FeatureRef};
use crate::geometry::{Geometry, GeometryError};
use crate::warning::ReconcileWarning;

/// Opaque identifier of a layer on the drawing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerHandle(pub u64);

impl fmt::Display for LayerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the engine needs from a surface layer.
pub trait SurfaceLayer {
    /// Stable handle of the layer on the surface.
    fn handle(&self) -> LayerHandle;

    /// Extract the layer's current geometry.
    fn geometry(&self) -> Result<Geometry, GeometryError>;

    /// Feature id the layer was drawn from, if any.
    fn feature_id(&self) -> Option<FeatureId>;
}

/// A layer whose geometry has already been extracted.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawnLayer {
    pub handle: LayerHandle,
    pub geometry: Geometry,
    pub feature_id: Option<FeatureId>,
}

impl DrawnLayer {
    pub fn new(handle: u64, geometry: Geometry) -> Self {
        Self {
            handle: LayerHandle(handle),
            geometry,
            feature_id: None,
        }
    }

    pub fn with_feature_id(mut self, id: impl Into<FeatureId>) -> Self {
        self.feature_id = Some(id.into());
        self
    }
}

impl SurfaceLayer for DrawnLayer {
    fn handle(&self) -> LayerHandle {
        self.handle
    }

    fn geometry(&self) -> Result<Geometry, GeometryError> {
        Ok(self.geometry.clone())
    }

    fn feature_id(&self) -> Option<FeatureId> {
        self.feature_id.clone()
    }
}

/// A layer as exported by the surface: GeoJSON `Feature` (or bare geometry) text.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoJsonLayer {
    pub handle: LayerHandle,
    pub json: String,
}

impl GeoJsonLayer {
    pub fn new(handle: u64, json: impl Into<String>) -> Self {
        Self {
            handle: LayerHandle(handle),
            json: json.into(),
        }
    }

    fn value(&self) -> Result<Value, GeometryError> {
        Ok(serde_json::from_str(&self.json)?)
    }
}

impl SurfaceLayer for GeoJsonLayer {
    fn handle(&self) -> LayerHandle {
        self.handle
    }

    fn geometry(&self) -> Result<Geometry, GeometryError> {
        let mut value = self.value()?;
        if value.get("type").and_then(Value::as_str) == Some("Feature") {
            value = value
                .get_mut("geometry")
                .map(Value::take)
                .ok_or_else(|| GeometryError("feature has no geometry".into()))?;
        }
        Ok(serde_json::from_value(value)?)
    }

    fn feature_id(&self) -> Option<FeatureId> {
        let mut value = self.value().ok()?;
        let id = value.get_mut("id").map(Value::take)?;
        serde_json::from_value(id).ok()
    }
}

/// An event emitted by the drawing surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent<L> {
    Created(L),
    Edited(Vec<L>),
    Deleted(Vec<L>),
}

impl<L> SurfaceEvent<L> {
    pub fn kind(&self) -> &'static str {
        match self {
            SurfaceEvent::Created(_) => "create",
            SurfaceEvent::Edited(_) => "edit",
            SurfaceEvent::Deleted(_) => "delete",
        }
    }
}

/// An edit resolved to its target feature.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEdit {
    pub target: FeatureRef,
    pub layer: LayerHandle,
    pub geometry: Geometry,
}

/// A deletion resolved to its target feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDelete {
    pub target: FeatureRef,
    pub layer: LayerHandle,
}

/// What one surface event did to a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub created: Vec<FeatureKey>,
    pub edited: Vec<FeatureRef>,
    pub deleted: Vec<FeatureRef>,
    pub warnings: Vec<ReconcileWarning>,
}

impl ReconcileReport {
    /// True if the event changed the collection.
    pub fn changed(&self) -> bool {
        !(self.created.is_empty() && self.edited.is_empty() && self.deleted.is_empty())
    }

    pub(crate) fn warn(&mut self, warning: ReconcileWarning) {
        warn!("{warning}");
        self.warnings.push(warning);
    }
}

/// Session-scoped table from layer handles to features.
#[derive(Debug, Clone, Default)]
pub struct Correlator {
    table: HashMap<LayerHandle, FeatureRef>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Associate a layer with a feature, returning the previous association.
    pub fn bind(&mut self, handle: LayerHandle, target: FeatureRef) -> Option<FeatureRef> {
        self.table.insert(handle, target)
    }

    pub fn unbind(&mut self, handle: LayerHandle) -> Option<FeatureRef> {
        self.table.remove(&handle)
    }

    pub fn lookup(&self, handle: LayerHandle) -> Option<&FeatureRef> {
        self.table.get(&handle)
    }

    /// Every association, in no particular order.
    pub fn bindings(&self) -> impl Iterator<Item = (LayerHandle, &FeatureRef)> {
        self.table.iter().map(|(handle, target)| (*handle, target))
    }

    /// Drop every association to `target`, returning how many were dropped.
    pub fn unbind_target(&mut self, target: &FeatureRef) -> usize {
        let before = self.table.len();
        self.table.retain(|_, bound| bound != target);
        before - self.table.len()
    }

    /// Drop every association (session end).
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Drop associations to features that were never persisted.
    pub fn forget_local(&mut self) {
        self.table
            .retain(|_, target| matches!(target, FeatureRef::Persisted(_)));
    }

    /// Resolve a layer: the correlation table first, then the id the layer carries.
    pub fn resolve<L: SurfaceLayer>(&self, layer: &L) -> Option<FeatureRef> {
        self.table
            .get(&layer.handle())
            .cloned()
            .or_else(|| layer.feature_id().map(FeatureRef::Persisted))
    }

    /// Resolve an edit batch.
    ///
    /// Layers without a target or without a readable geometry are skipped with
    /// a warning. When several layers target the same feature the last one in
    /// the batch wins; survivors keep their input order.
    pub fn resolve_edits<L: SurfaceLayer>(
        &self,
        layers: &[L],
    ) -> (Vec<ResolvedEdit>, Vec<ReconcileWarning>) {
        let mut warnings = Vec::new();
        let mut candidates = Vec::with_capacity(layers.len());
        for layer in layers {
            let handle = layer.handle();
            let Some(target) = self.resolve(layer) else {
                warnings.push(ReconcileWarning::Unresolvable(handle));
                continue;
            };
            match layer.geometry() {
                Ok(geometry) => candidates.push(ResolvedEdit {
                    target,
                    layer: handle,
                    geometry,
                }),
                Err(e) => warnings.push(ReconcileWarning::BadGeometry {
                    layer: handle,
                    message: e.to_string(),
                }),
            }
        }

        let mut last: HashMap<&FeatureRef, usize> = HashMap::new();
        for (i, edit) in candidates.iter().enumerate() {
            last.insert(&edit.target, i);
        }
        let keep: Vec<bool> = candidates
            .iter()
            .enumerate()
            .map(|(i, edit)| last[&edit.target] == i)
            .collect();
        for (i, edit) in candidates.iter().enumerate() {
            if !keep[i] {
                warnings.push(ReconcileWarning::DuplicateTarget {
                    target: edit.target.clone(),
                    dropped: edit.layer,
                    kept: candidates[last[&edit.target]].layer,
                });
            }
        }

        let resolved = candidates
            .into_iter()
            .zip(keep)
            .filter_map(|(edit, keep)| keep.then_some(edit))
            .collect();
        (resolved, warnings)
    }

    /// Resolve a delete batch into distinct targets in first-seen order.
    pub fn resolve_deletes<L: SurfaceLayer>(
        &self,
        layers: &[L],
    ) -> (Vec<ResolvedDelete>, Vec<ReconcileWarning>) {
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for layer in layers {
            let handle = layer.handle();
            match self.resolve(layer) {
                Some(target) => {
                    if seen.insert(target.clone()) {
                        resolved.push(ResolvedDelete {
                            target,
                            layer: handle,
                        });
                    }
                }
                None => warnings.push(ReconcileWarning::Unresolvable(handle)),
            }
        }
        (resolved, warnings)
    }

    /// Fold a surface event into `collection`.
    pub fn reconcile<L: SurfaceLayer>(
        &mut self,
        event: SurfaceEvent<L>,
        collection: &mut FeatureCollection,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        match event {
            SurfaceEvent::Created(layer) => match layer.geometry() {
                Ok(geometry) => {
                    let key = collection.apply_create(geometry).key();
                    self.bind(layer.handle(), FeatureRef::Local(key));
                    debug!("layer {} created feature {key}", layer.handle());
                    report.created.push(key);
                }
                Err(e) => report.warn(ReconcileWarning::BadGeometry {
                    layer: layer.handle(),
                    message: e.to_string(),
                }),
            },
            SurfaceEvent::Edited(layers) => {
                let (edits, warnings) = self.resolve_edits(&layers);
                warnings.into_iter().for_each(|w| report.warn(w));
                for edit in edits {
                    match collection.edit(&edit.target, edit.geometry) {
                        Ok(_) => report.edited.push(edit.target),
                        Err(_) => report.warn(ReconcileWarning::NotFound(edit.target)),
                    }
                }
            }
            SurfaceEvent::Deleted(layers) => {
                let (deletes, warnings) = self.resolve_deletes(&layers);
                warnings.into_iter().for_each(|w| report.warn(w));
                for delete in deletes {
                    self.unbind_target(&delete.target);
                    match collection.delete(&delete.target) {
                        Ok(_) => report.deleted.push(delete.target),
                        Err(_) => debug!("feature {} already absent; delete ignored", delete.target),
                    }
                }
            }
        }
        report
    }
}
