//! Bulk editor for a file-backed feature collection.

use log::{debug, info};

use super::EditorError;
use crate::attributes::{AttributeChange, AttributeEdit};
use crate::correlate::{Correlator, LayerHandle, ReconcileReport, SurfaceEvent, SurfaceLayer};
use crate::feature::{FeatureCollection, FeatureRef, ParsedCollection};
use crate::remote::{FileId, FileMeta, RemoteStore};
use crate::session::{EditSession, Epoch, SaveOutcome, SessionError, SessionState};
use crate::sync::{SyncError, Synchronizer};

/// Whether the stored document could be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentStatus {
    Loaded,
    /// The stored text is not a feature collection. The editor shows the last
    /// good collection (empty if there never was one) and refuses to edit.
    Unparseable { error: String },
}

/// A save in flight, detached from the editor.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    file_id: FileId,
    epoch: Epoch,
    collection: FeatureCollection,
}

impl SaveRequest {
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn collection(&self) -> &FeatureCollection {
        &self.collection
    }

    /// Write the collection to the store.
    pub async fn send<S: RemoteStore + ?Sized>(self, sync: &Synchronizer<S>) -> SaveResponse {
        let result = sync.save_collection(self.file_id, &self.collection).await;
        SaveResponse {
            epoch: self.epoch,
            collection: self.collection,
            result,
        }
    }
}

/// Result of a [`SaveRequest`], to be handed back to the editor.
#[derive(Debug, Clone)]
pub struct SaveResponse {
    epoch: Epoch,
    collection: FeatureCollection,
    result: Result<(), SyncError>,
}

impl SaveResponse {
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn result(&self) -> &Result<(), SyncError> {
        &self.result
    }
}

/// Editor for one stored feature collection.
///
/// Surface events apply to a working copy; saving replaces the whole stored
/// document and, on success, makes the submitted copy the confirmed state.
#[derive(Debug, Clone)]
pub struct FileEditor {
    file: FileMeta,
    status: DocumentStatus,
    session: EditSession<FeatureCollection>,
    correlator: Correlator,
    /// Correlation table as it was when the current edit session started.
    bindings_at_edit: Option<Correlator>,
}

impl FileEditor {
    pub fn new(file: FileMeta, parsed: ParsedCollection) -> Self {
        let (collection, status) = match parsed {
            ParsedCollection::Valid(collection) => (collection, DocumentStatus::Loaded),
            ParsedCollection::Unparseable { error } => {
                (FeatureCollection::new(), DocumentStatus::Unparseable { error })
            }
        };
        Self {
            file,
            status,
            session: EditSession::new(collection),
            correlator: Correlator::new(),
            bindings_at_edit: None,
        }
    }

    /// Fetch a file and open it.
    pub async fn load<S: RemoteStore + ?Sized>(
        sync: &Synchronizer<S>,
        file_id: FileId,
    ) -> Result<Self, EditorError> {
        let (file, parsed) = sync.load_collection(file_id).await?;
        info!("opened file {} ({})", file.id, file.name);
        Ok(Self::new(file, parsed))
    }

    /// Refetch the stored document. Only allowed while viewing.
    pub async fn reload<S: RemoteStore + ?Sized>(
        &mut self,
        sync: &Synchronizer<S>,
    ) -> Result<(), EditorError> {
        self.ensure_viewing("reload")?;
        let (file, parsed) = sync.load_collection(self.file.id).await?;
        self.file = file;
        self.apply_content(parsed)
    }

    /// Replace the confirmed state with freshly fetched content.
    ///
    /// Unparseable content keeps the last good collection on display.
    pub fn apply_content(&mut self, parsed: ParsedCollection) -> Result<(), EditorError> {
        self.ensure_viewing("reload")?;
        match parsed {
            ParsedCollection::Valid(collection) => {
                self.session.replace_confirmed(collection)?;
                self.status = DocumentStatus::Loaded;
            }
            ParsedCollection::Unparseable { error } => {
                self.status = DocumentStatus::Unparseable { error };
            }
        }
        self.correlator.forget_local();
        Ok(())
    }

    fn ensure_viewing(&self, action: &'static str) -> Result<(), SessionError> {
        match self.session.state() {
            SessionState::Viewing => Ok(()),
            state => Err(SessionError::InvalidTransition { state, action }),
        }
    }

    pub fn file(&self) -> &FileMeta {
        &self.file
    }

    pub fn status(&self) -> &DocumentStatus {
        &self.status
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &EditSession<FeatureCollection> {
        &self.session
    }

    /// The collection to render.
    pub fn collection(&self) -> &FeatureCollection {
        self.session.current()
    }

    pub fn is_dirty(&self) -> bool {
        self.session.is_dirty()
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.session.last_error()
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Start editing a copy of the confirmed collection.
    pub fn begin_edit(&mut self) -> Result<(), EditorError> {
        if let DocumentStatus::Unparseable { error } = &self.status {
            return Err(EditorError::Unparseable {
                error: error.clone(),
            });
        }
        let starting = self.session.state() == SessionState::Viewing;
        self.session.begin_edit()?;
        if starting {
            self.bindings_at_edit = Some(self.correlator.clone());
        }
        Ok(())
    }

    /// Record which feature a layer drawn by the surface shows.
    pub fn bind_layer(&mut self, handle: LayerHandle, target: FeatureRef) -> Option<FeatureRef> {
        self.correlator.bind(handle, target)
    }

    /// Fold a surface event into the working copy.
    pub fn handle_event<L: SurfaceLayer>(
        &mut self,
        event: SurfaceEvent<L>,
    ) -> Result<ReconcileReport, EditorError> {
        let working = self.session.working_mut()?;
        let report = self.correlator.reconcile(event, working);
        debug!(
            "file {}: {} created, {} edited, {} deleted, {} warnings",
            self.file.id,
            report.created.len(),
            report.edited.len(),
            report.deleted.len(),
            report.warnings.len()
        );
        Ok(report)
    }

    /// Edit the attributes of a feature in the working copy.
    pub fn edit_attributes(
        &mut self,
        target: &FeatureRef,
        edit: AttributeEdit,
    ) -> Result<AttributeChange, EditorError> {
        let working = self.session.working_mut()?;
        Ok(working.edit_attributes(target, edit)?)
    }

    /// Hand the working copy out for saving.
    pub fn prepare_save(&mut self) -> Result<SaveRequest, EditorError> {
        let ticket = self.session.begin_save()?;
        Ok(SaveRequest {
            file_id: self.file.id,
            epoch: ticket.epoch,
            collection: ticket.value,
        })
    }

    /// Deliver a save response.
    pub fn complete_save(&mut self, response: SaveResponse) -> SaveOutcome {
        let result = response.result.map(|()| response.collection);
        let outcome = self.session.finish_save(response.epoch, result);
        if outcome.is_committed() {
            self.bindings_at_edit = None;
            info!(
                "saved file {} ({} features)",
                self.file.id,
                self.session.confirmed().len()
            );
        }
        outcome
    }

    /// Save and wait for the result.
    pub async fn save<S: RemoteStore + ?Sized>(
        &mut self,
        sync: &Synchronizer<S>,
    ) -> Result<SaveOutcome, EditorError> {
        let request = self.prepare_save()?;
        let response = request.send(sync).await;
        Ok(self.complete_save(response))
    }

    /// Drop the working copy and restore the layer bindings it started with.
    /// A save in flight will be discarded on arrival.
    pub fn cancel(&mut self) {
        self.session.cancel();
        match self.bindings_at_edit.take() {
            Some(bindings) => self.correlator = bindings,
            None => self.correlator.forget_local(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::correlate::DrawnLayer;
    use crate::feature::{Feature, FeatureId};
    use crate::geometry::Geometry;
    use crate::remote::{MemoryStore, RemoteCall, RemoteError, RemoteOp};
    use crate::sync::SyncConfig;
    use std::time::Duration;

    fn setup(content: &str) -> (Arc<MemoryStore>, Synchronizer<MemoryStore>, FileId) {
        let store = Arc::new(MemoryStore::new());
        let file = store.insert_file("parcels.geojson", content).unwrap();
        let config = SyncConfig {
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let sync = Synchronizer::with_config(Arc::clone(&store), config);
        (store, sync, file)
    }

    fn stored(store: &MemoryStore, file: FileId) -> FeatureCollection {
        match FeatureCollection::parse(&store.file_text(file).unwrap()) {
            ParsedCollection::Valid(c) => c,
            other => panic!("stored text is not a collection: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_then_save_commits_working_copy() {
        let (store, sync, file) = setup(r#"{"type":"FeatureCollection","features":[]}"#);
        let mut editor = FileEditor::load(&sync, file).await.unwrap();
        let g1 = Geometry::point(13.4, 52.5);

        editor.begin_edit().unwrap();
        let report = editor
            .handle_event(SurfaceEvent::Created(DrawnLayer::new(1, g1.clone())))
            .unwrap();
        assert_eq!(report.created.len(), 1);
        let working = editor.session().working().unwrap();
        assert_eq!(working.len(), 1);
        assert_eq!(working.features()[0].id, None);
        assert_eq!(working.features()[0].geometry, Some(g1.clone()));
        let expected = working.clone();

        let outcome = editor.save(&sync).await.unwrap();

        assert_eq!(outcome, SaveOutcome::Committed);
        assert_eq!(editor.state(), SessionState::Viewing);
        assert_eq!(editor.session().confirmed(), &expected);
        assert_eq!(stored(&store, file).features()[0].geometry, Some(g1));
    }

    #[tokio::test]
    async fn test_failed_save_keeps_edits_for_retry() {
        let (store, sync, file) = setup("");
        let mut editor = FileEditor::load(&sync, file).await.unwrap();
        editor.begin_edit().unwrap();
        editor
            .handle_event(SurfaceEvent::Created(DrawnLayer::new(
                1,
                Geometry::point(1.0, 1.0),
            )))
            .unwrap();
        store.fail_next(
            RemoteOp::PutFileContent,
            RemoteError::Status {
                status: 400,
                message: "bad request".into(),
            },
        );

        let outcome = editor.save(&sync).await.unwrap();

        assert!(matches!(outcome, SaveOutcome::Failed(_)));
        assert_eq!(editor.state(), SessionState::Editing);
        assert_eq!(editor.collection().len(), 1);
        assert!(editor.last_error().is_some());
        assert_eq!(store.file_text(file).unwrap(), "");

        assert!(editor.save(&sync).await.unwrap().is_committed());
        assert_eq!(stored(&store, file).len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_save_discards_response() {
        let (store, sync, file) = setup("");
        let mut editor = FileEditor::load(&sync, file).await.unwrap();
        editor.begin_edit().unwrap();
        editor
            .handle_event(SurfaceEvent::Created(DrawnLayer::new(
                1,
                Geometry::point(1.0, 1.0),
            )))
            .unwrap();

        let request = editor.prepare_save().unwrap();
        editor.cancel();
        let response = request.send(&sync).await;

        assert_eq!(editor.complete_save(response), SaveOutcome::Discarded);
        assert!(editor.collection().is_empty());
        assert_eq!(editor.state(), SessionState::Viewing);
        assert!(editor.correlator().is_empty());
        // The write itself already happened; only the local commit is dropped.
        assert_eq!(stored(&store, file).len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_document_is_read_only() {
        let (_store, sync, file) = setup("<kml><Document/></kml>");
        let mut editor = FileEditor::load(&sync, file).await.unwrap();

        assert!(matches!(editor.status(), DocumentStatus::Unparseable { .. }));
        assert!(editor.collection().is_empty());
        assert!(matches!(
            editor.begin_edit(),
            Err(EditorError::Unparseable { .. })
        ));
    }

    #[tokio::test]
    async fn test_reload_keeps_last_good_collection() {
        let (store, sync, file) = setup(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","id":1,"geometry":{"type":"Point","coordinates":[0,0]},"properties":{}}
            ]}"#,
        );
        let mut editor = FileEditor::load(&sync, file).await.unwrap();
        store.put_file_content(file, "{broken".into()).await.unwrap();

        editor.reload(&sync).await.unwrap();

        assert!(matches!(editor.status(), DocumentStatus::Unparseable { .. }));
        assert_eq!(editor.collection().len(), 1);
    }

    #[tokio::test]
    async fn test_reload_refused_while_editing() {
        let (_store, sync, file) = setup("");
        let mut editor = FileEditor::load(&sync, file).await.unwrap();
        editor.begin_edit().unwrap();

        assert!(matches!(
            editor.reload(&sync).await,
            Err(EditorError::Session(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_batch_ignores_unknown_ids() {
        let collection = FeatureCollection::from_features(vec![
            Feature::new(Geometry::point(0.0, 0.0)).with_id(1u64),
            Feature::new(Geometry::point(1.0, 1.0)).with_id(2u64),
        ])
        .unwrap();
        let (store, sync, file) = setup(&collection.to_json().unwrap());
        let mut editor = FileEditor::load(&sync, file).await.unwrap();

        editor.begin_edit().unwrap();
        let report = editor
            .handle_event(SurfaceEvent::Deleted(vec![
                DrawnLayer::new(10, Geometry::point(1.0, 1.0)).with_feature_id(2u64),
                DrawnLayer::new(11, Geometry::point(9.0, 9.0)).with_feature_id(9u64),
            ]))
            .unwrap();

        assert!(report.warnings.is_empty());
        let ids: Vec<_> = editor.collection().features().iter().map(|f| f.id.clone()).collect();
        assert_eq!(ids, vec![Some(FeatureId::from(1u64))]);

        store.clear_calls();
        assert!(editor.save(&sync).await.unwrap().is_committed());
        assert!(matches!(
            store.calls().as_slice(),
            [RemoteCall::PutFileContent(id, _)] if *id == file
        ));
    }

    #[tokio::test]
    async fn test_attribute_edit_on_feature() {
        let collection = FeatureCollection::from_features(vec![
            Feature::new(Geometry::point(0.0, 0.0)).with_id(1u64),
        ])
        .unwrap();
        let (store, sync, file) = setup(&collection.to_json().unwrap());
        let mut editor = FileEditor::load(&sync, file).await.unwrap();
        let target = FeatureRef::Persisted(FeatureId::from(1u64));

        assert!(editor.edit_attributes(&target, AttributeEdit::Add).is_err());
        editor.begin_edit().unwrap();
        let change = editor.edit_attributes(&target, AttributeEdit::Add).unwrap();
        assert_eq!(change, AttributeChange::Added("new_0".into()));
        editor.save(&sync).await.unwrap();

        assert!(stored(&store, file).features()[0].attributes.contains_key("new_0"));
    }

    #[tokio::test]
    async fn test_cancel_restores_collection_and_bindings() {
        let collection = FeatureCollection::from_features(vec![
            Feature::new(Geometry::point(0.0, 0.0)).with_id(1u64),
            Feature::new(Geometry::point(1.0, 1.0)).with_id(2u64),
        ])
        .unwrap();
        let (_store, sync, file) = setup(&collection.to_json().unwrap());
        let mut editor = FileEditor::load(&sync, file).await.unwrap();
        editor.bind_layer(LayerHandle(4), FeatureRef::Persisted(FeatureId::from(1u64)));
        editor.bind_layer(LayerHandle(5), FeatureRef::Persisted(FeatureId::from(2u64)));
        let snapshot = editor.collection().clone();

        editor.begin_edit().unwrap();
        editor
            .handle_event(SurfaceEvent::Created(DrawnLayer::new(
                6,
                Geometry::point(3.0, 3.0),
            )))
            .unwrap();
        editor
            .handle_event(SurfaceEvent::Edited(vec![DrawnLayer::new(
                5,
                Geometry::point(7.0, 7.0),
            )]))
            .unwrap();
        editor
            .handle_event(SurfaceEvent::Deleted(vec![DrawnLayer::new(
                4,
                Geometry::point(0.0, 0.0),
            )]))
            .unwrap();
        assert_eq!(editor.collection().len(), 2);
        assert!(editor.correlator().lookup(LayerHandle(4)).is_none());

        editor.cancel();

        assert_eq!(editor.collection(), &snapshot);
        assert_eq!(editor.session().confirmed(), &snapshot);
        assert_eq!(
            editor.correlator().lookup(LayerHandle(4)),
            Some(&FeatureRef::Persisted(FeatureId::from(1u64)))
        );
        assert!(editor.correlator().lookup(LayerHandle(6)).is_none());
        assert_eq!(editor.correlator().len(), 2);

        editor.begin_edit().unwrap();
        let report = editor
            .handle_event(SurfaceEvent::Edited(vec![DrawnLayer::new(
                4,
                Geometry::point(9.0, 9.0),
            )]))
            .unwrap();
        assert!(report.warnings.is_empty());
        assert_eq!(report.edited, vec![FeatureRef::Persisted(FeatureId::from(1u64))]);
    }

    #[tokio::test]
    async fn test_save_preserves_property_value_types() {
        let text = r#"{"type":"FeatureCollection","features":[{"type":"Feature","id":1,"geometry":{"type":"Point","coordinates":[0.5,0.5]},"properties":{"height":4.5,"ok":true,"tags":["a"],"note":null,"name":"lot"}}]}"#;
        let (store, sync, file) = setup(text);
        let mut editor = FileEditor::load(&sync, file).await.unwrap();

        editor.begin_edit().unwrap();
        assert!(editor.save(&sync).await.unwrap().is_committed());

        let before: serde_json::Value = serde_json::from_str(text).unwrap();
        let after: serde_json::Value =
            serde_json::from_str(&store.file_text(file).unwrap()).unwrap();
        assert_eq!(after, before);
    }
}
