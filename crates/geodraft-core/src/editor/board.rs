//! Shape list driven directly by the drawing surface.
//!
//! Every surface operation is persisted on its own, in event order. After a
//! batch in which at least one operation succeeded the list is refetched; the
//! board never merges server responses into local state by hand.

use log::{debug, info};

use crate::correlate::{Correlator, LayerHandle, SurfaceEvent, SurfaceLayer};
use crate::feature::{FeatureId, FeatureRef};
use crate::geometry::Geometry;
use crate::remote::{RemoteStore, ShapeId};
use crate::shape::Shape;
use crate::sync::{SyncError, Synchronizer};
use crate::warning::ReconcileWarning;

/// A store operation issued for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeOperation {
    Create,
    Update(ShapeId),
    Delete(ShapeId),
}

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub operation: ShapeOperation,
    pub layer: LayerHandle,
    pub outcome: Result<(), SyncError>,
}

/// What a surface event did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardReport {
    pub operations: Vec<OperationResult>,
    /// Result of the follow-up refetch (shape count), if one was made.
    pub refresh: Option<Result<usize, SyncError>>,
    pub warnings: Vec<ReconcileWarning>,
}

impl BoardReport {
    pub fn succeeded(&self) -> usize {
        self.operations.iter().filter(|op| op.outcome.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.operations.iter().filter(|op| op.outcome.is_err())
    }

    fn warn(&mut self, warning: ReconcileWarning) {
        log::warn!("{warning}");
        self.warnings.push(warning);
    }
}

/// Locally known shapes plus the layers drawing them.
#[derive(Debug, Clone, Default)]
pub struct ShapeBoard {
    shapes: Vec<Shape>,
    correlator: Correlator,
    issued: u64,
    applied: u64,
}

impl ShapeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn get(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.iter().find(|s| s.id == id)
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Shapes with a readable geometry, for drawing.
    pub fn renderable(&self) -> impl Iterator<Item = (ShapeId, &Geometry)> {
        self.shapes
            .iter()
            .filter_map(|s| s.geometry.parsed().map(|g| (s.id, g)))
    }

    /// Record that the surface draws shape `id` as `handle`.
    pub fn bind_layer(&mut self, handle: LayerHandle, id: ShapeId) {
        self.correlator
            .bind(handle, FeatureRef::Persisted(FeatureId::from(id)));
    }

    /// Start a refetch, returning its generation.
    pub fn begin_refresh(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    /// Install a refetched list.
    ///
    /// Returns `false` and changes nothing if a newer refetch was started or
    /// applied since `generation` was issued.
    pub fn apply_refresh(&mut self, generation: u64, shapes: Vec<Shape>) -> bool {
        if generation != self.issued || generation <= self.applied {
            debug!("dropping refetch {generation}; latest is {}", self.issued);
            return false;
        }
        self.applied = generation;
        self.shapes = shapes;
        let live: Vec<ShapeId> = self.shapes.iter().map(|s| s.id).collect();
        let stale: Vec<LayerHandle> = self
            .bound_layers()
            .filter(|(_, id)| !live.contains(id))
            .map(|(handle, _)| handle)
            .collect();
        for handle in stale {
            self.correlator.unbind(handle);
        }
        true
    }

    fn bound_layers(&self) -> impl Iterator<Item = (LayerHandle, ShapeId)> + '_ {
        self.correlator.bindings().filter_map(|(handle, target)| match target {
            FeatureRef::Persisted(fid) => fid.as_shape_id().map(|id| (handle, id)),
            FeatureRef::Local(_) => None,
        })
    }

    /// Refetch the shape list, returning any decoding warnings.
    pub async fn refresh<S: RemoteStore + ?Sized>(
        &mut self,
        sync: &Synchronizer<S>,
    ) -> Result<Vec<ReconcileWarning>, SyncError> {
        let generation = self.begin_refresh();
        let list = sync.refresh_shapes().await?;
        self.apply_refresh(generation, list.shapes);
        Ok(list.warnings)
    }

    /// Persist a surface event, then refetch if anything was written.
    pub async fn handle_event<S, L>(
        &mut self,
        sync: &Synchronizer<S>,
        event: SurfaceEvent<L>,
    ) -> BoardReport
    where
        S: RemoteStore + ?Sized,
        L: SurfaceLayer,
    {
        let mut report = BoardReport::default();
        match event {
            SurfaceEvent::Created(layer) => self.create(sync, &layer, &mut report).await,
            SurfaceEvent::Edited(layers) => self.update(sync, &layers, &mut report).await,
            SurfaceEvent::Deleted(layers) => self.delete(sync, &layers, &mut report).await,
        }

        if report.succeeded() > 0 {
            let refresh = match self.refresh(sync).await {
                Ok(warnings) => {
                    warnings.into_iter().for_each(|w| report.warn(w));
                    Ok(self.shapes.len())
                }
                Err(e) => Err(e),
            };
            report.refresh = Some(refresh);
        }
        let failed = report.failures().count();
        if failed > 0 {
            info!(
                "{} of {} shape operations failed",
                failed,
                report.operations.len()
            );
        }
        report
    }

    async fn create<S, L>(&mut self, sync: &Synchronizer<S>, layer: &L, report: &mut BoardReport)
    where
        S: RemoteStore + ?Sized,
        L: SurfaceLayer,
    {
        let handle = layer.handle();
        let geometry = match layer.geometry() {
            Ok(g) => g,
            Err(e) => {
                report.warn(ReconcileWarning::BadGeometry {
                    layer: handle,
                    message: e.to_string(),
                });
                return;
            }
        };
        let outcome = sync.create_shape(&geometry, None).await.map(|id| {
            self.bind_layer(handle, id);
        });
        report.operations.push(OperationResult {
            operation: ShapeOperation::Create,
            layer: handle,
            outcome,
        });
    }

    async fn update<S, L>(&mut self, sync: &Synchronizer<S>, layers: &[L], report: &mut BoardReport)
    where
        S: RemoteStore + ?Sized,
        L: SurfaceLayer,
    {
        let (edits, warnings) = self.correlator.resolve_edits(layers);
        warnings.into_iter().for_each(|w| report.warn(w));
        for edit in edits {
            let Some(id) = shape_id(&edit.target) else {
                report.warn(ReconcileWarning::Unresolvable(edit.layer));
                continue;
            };
            let outcome = sync.update_shape_geometry(id, &edit.geometry).await;
            report.operations.push(OperationResult {
                operation: ShapeOperation::Update(id),
                layer: edit.layer,
                outcome,
            });
        }
    }

    async fn delete<S, L>(&mut self, sync: &Synchronizer<S>, layers: &[L], report: &mut BoardReport)
    where
        S: RemoteStore + ?Sized,
        L: SurfaceLayer,
    {
        let (deletes, warnings) = self.correlator.resolve_deletes(layers);
        warnings.into_iter().for_each(|w| report.warn(w));
        for delete in deletes {
            let Some(id) = shape_id(&delete.target) else {
                report.warn(ReconcileWarning::Unresolvable(delete.layer));
                continue;
            };
            let outcome = sync.delete_shape(id).await;
            if outcome.is_ok() {
                self.correlator.unbind_target(&delete.target);
            }
            report.operations.push(OperationResult {
                operation: ShapeOperation::Delete(id),
                layer: delete.layer,
                outcome,
            });
        }
    }
}

fn shape_id(target: &FeatureRef) -> Option<ShapeId> {
    match target {
        FeatureRef::Persisted(fid) => fid.as_shape_id(),
        FeatureRef::Local(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::correlate::DrawnLayer;
    use crate::remote::{MemoryStore, RemoteCall, RemoteError, RemoteOp};
    use crate::sync::DEFAULT_SHAPE_NAME;

    const POINT: &str = r#"{"type":"Point","coordinates":[0,0]}"#;

    fn setup() -> (Arc<MemoryStore>, Synchronizer<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let sync = Synchronizer::new(Arc::clone(&store));
        (store, sync)
    }

    fn ops(calls: &[RemoteCall]) -> Vec<RemoteOp> {
        calls.iter().map(RemoteCall::op).collect()
    }

    #[tokio::test]
    async fn test_create_persists_binds_and_refetches() {
        let (store, sync) = setup();
        let mut board = ShapeBoard::new();

        let report = board
            .handle_event(
                &sync,
                SurfaceEvent::Created(DrawnLayer::new(7, Geometry::point(1.0, 2.0))),
            )
            .await;

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.refresh, Some(Ok(1)));
        assert_eq!(board.shapes()[0].name, DEFAULT_SHAPE_NAME);
        let id = board.shapes()[0].id;
        assert_eq!(
            board.correlator().lookup(LayerHandle(7)),
            Some(&FeatureRef::Persisted(FeatureId::from(id)))
        );
        assert_eq!(
            ops(&store.calls()),
            vec![RemoteOp::CreateShape, RemoteOp::Shapes]
        );
    }

    #[tokio::test]
    async fn test_edit_sends_geometry_for_bound_layer() {
        let (store, sync) = setup();
        let id = store.insert_shape("Lot", POINT, r#"{"x":"1"}"#).unwrap();
        let mut board = ShapeBoard::new();
        board.refresh(&sync).await.unwrap();
        board.bind_layer(LayerHandle(3), id);
        store.clear_calls();

        let report = board
            .handle_event(
                &sync,
                SurfaceEvent::Edited(vec![DrawnLayer::new(3, Geometry::point(5.0, 5.0))]),
            )
            .await;

        assert_eq!(report.operations[0].operation, ShapeOperation::Update(id));
        assert_eq!(
            board.get(id).unwrap().geometry.parsed(),
            Some(&Geometry::point(5.0, 5.0))
        );
        assert_eq!(board.get(id).unwrap().attributes.get("x"), Some("1"));
        assert_eq!(
            ops(&store.calls()),
            vec![RemoteOp::UpdateShape, RemoteOp::Shapes]
        );
    }

    #[tokio::test]
    async fn test_delete_batch_with_unknown_id() {
        let (store, sync) = setup();
        let first = store.insert_shape("one", POINT, "").unwrap();
        let second = store.insert_shape("two", POINT, "").unwrap();
        let mut board = ShapeBoard::new();
        board.refresh(&sync).await.unwrap();

        let report = board
            .handle_event(
                &sync,
                SurfaceEvent::Deleted(vec![
                    DrawnLayer::new(1, Geometry::point(0.0, 0.0)).with_feature_id(second),
                    DrawnLayer::new(2, Geometry::point(0.0, 0.0)).with_feature_id(9u64),
                ]),
            )
            .await;

        assert_eq!(report.failures().count(), 0);
        let ids: Vec<_> = board.shapes().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![first]);
    }

    #[tokio::test]
    async fn test_delete_unbinds_every_layer_of_the_shape() {
        let (store, sync) = setup();
        let id = store.insert_shape("a", POINT, "").unwrap();
        let mut board = ShapeBoard::new();
        board.refresh(&sync).await.unwrap();
        board.bind_layer(LayerHandle(1), id);
        board.bind_layer(LayerHandle(2), id);
        store.fail_next(
            RemoteOp::Shapes,
            RemoteError::Status {
                status: 403,
                message: "forbidden".into(),
            },
        );

        let report = board
            .handle_event(
                &sync,
                SurfaceEvent::Deleted(vec![
                    DrawnLayer::new(1, Geometry::point(0.0, 0.0)),
                    DrawnLayer::new(2, Geometry::point(0.0, 0.0)),
                ]),
            )
            .await;

        assert_eq!(report.succeeded(), 1);
        assert!(matches!(report.refresh, Some(Err(_))));
        assert!(board.correlator().is_empty());
    }

    #[tokio::test]
    async fn test_failed_create_reports_and_skips_refetch() {
        let (store, sync) = setup();
        store.fail_next(
            RemoteOp::CreateShape,
            RemoteError::Status {
                status: 500,
                message: "db down".into(),
            },
        );
        let mut board = ShapeBoard::new();

        let report = board
            .handle_event(
                &sync,
                SurfaceEvent::Created(DrawnLayer::new(1, Geometry::point(0.0, 0.0))),
            )
            .await;

        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.refresh, None);
        assert!(board.correlator().is_empty());
        assert_eq!(ops(&store.calls()), vec![RemoteOp::CreateShape]);
    }

    #[tokio::test]
    async fn test_failures_are_reported_per_operation() {
        let (store, sync) = setup();
        let a = store.insert_shape("a", POINT, "").unwrap();
        let b = store.insert_shape("b", POINT, "").unwrap();
        let mut board = ShapeBoard::new();
        board.refresh(&sync).await.unwrap();
        store.fail_next(
            RemoteOp::UpdateShape,
            RemoteError::Status {
                status: 422,
                message: "invalid".into(),
            },
        );

        let report = board
            .handle_event(
                &sync,
                SurfaceEvent::Edited(vec![
                    DrawnLayer::new(1, Geometry::point(1.0, 1.0)).with_feature_id(a),
                    DrawnLayer::new(2, Geometry::point(2.0, 2.0)).with_feature_id(b),
                ]),
            )
            .await;

        assert!(report.operations[0].outcome.is_err());
        assert!(report.operations[1].outcome.is_ok());
        assert_eq!(report.refresh, Some(Ok(2)));
        assert_eq!(
            board.get(b).unwrap().geometry.parsed(),
            Some(&Geometry::point(2.0, 2.0))
        );
        assert_eq!(
            board.get(a).unwrap().geometry.parsed(),
            Some(&Geometry::point(0.0, 0.0))
        );
    }

    #[tokio::test]
    async fn test_stale_refetch_is_ignored() {
        let (store, sync) = setup();
        store.insert_shape("a", POINT, "").unwrap();
        let mut board = ShapeBoard::new();

        let older = board.begin_refresh();
        let old_list = sync.refresh_shapes().await.unwrap();
        store.insert_shape("b", POINT, "").unwrap();
        let newer = board.begin_refresh();
        let new_list = sync.refresh_shapes().await.unwrap();

        assert!(board.apply_refresh(newer, new_list.shapes));
        assert!(!board.apply_refresh(older, old_list.shapes));
        assert_eq!(board.shapes().len(), 2);
    }

    #[tokio::test]
    async fn test_refetch_drops_bindings_to_vanished_shapes() {
        let (store, sync) = setup();
        let id = store.insert_shape("a", POINT, "").unwrap();
        let mut board = ShapeBoard::new();
        board.refresh(&sync).await.unwrap();
        board.bind_layer(LayerHandle(1), id);

        store.delete_shape(id).await.unwrap();
        board.refresh(&sync).await.unwrap();

        assert!(board.correlator().is_empty());
        assert_eq!(board.renderable().count(), 0);
    }
}
