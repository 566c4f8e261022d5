//! Drives the HTTP store and the editors against a live router.

use std::sync::Arc;

use geodraft_core::{
    DrawnLayer, FeatureCollection, FeatureId, FileEditor, Geometry, HttpStore, HttpStoreConfig,
    LayerHandle, ParsedCollection, RemoteError, RemoteStore, SessionState, ShapeBoard,
    ShapeEditor, ShapeId, SurfaceEvent, Synchronizer,
};
use geodraft_server::{AppState, router};

const POINT: &str = r#"{"type":"Point","coordinates":[0.0,0.0]}"#;

async fn spawn(state: Arc<AppState>) -> HttpStore {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    HttpStore::new(HttpStoreConfig::new(format!("http://{addr}"))).unwrap()
}

#[tokio::test]
async fn file_editor_saves_whole_collection() {
    let state = Arc::new(AppState::new());
    let file = state.add_file("parcels.geojson", "");
    let sync = Synchronizer::new(Arc::new(spawn(Arc::clone(&state)).await));

    let mut editor = FileEditor::load(&sync, file).await.unwrap();
    editor.begin_edit().unwrap();
    editor
        .handle_event(SurfaceEvent::Created(DrawnLayer::new(
            1,
            Geometry::point(13.4, 52.5),
        )))
        .unwrap();
    let outcome = editor.save(&sync).await.unwrap();

    assert!(outcome.is_committed());
    assert_eq!(editor.state(), SessionState::Viewing);
    let ParsedCollection::Valid(saved) =
        FeatureCollection::parse(&state.file_content(file).unwrap())
    else {
        panic!("server holds an unparseable document");
    };
    assert_eq!(saved.len(), 1);
    assert_eq!(saved.features()[0].geometry, Some(Geometry::point(13.4, 52.5)));
}

#[tokio::test]
async fn missing_resources_map_to_not_found() {
    let store = spawn(Arc::new(AppState::new())).await;

    assert_eq!(
        store.shape(ShapeId(99)).await.unwrap_err(),
        RemoteError::NotFound("Shape not found".into())
    );
    assert!(matches!(
        store.put_file_content(geodraft_core::FileId(4), "{}".into()).await,
        Err(RemoteError::NotFound(_))
    ));
    store.delete_shape(ShapeId(99)).await.unwrap();
}

#[tokio::test]
async fn shape_editor_submits_attributes() {
    let state = Arc::new(AppState::new());
    for i in 1..5 {
        state.add_shape(&format!("filler {i}"), POINT, "");
    }
    let id = state.add_shape("A", POINT, r#"{"x":"1"}"#);
    assert_eq!(id, ShapeId(5));
    let sync = Synchronizer::new(Arc::new(spawn(Arc::clone(&state)).await));

    let (mut editor, _) = ShapeEditor::load(&sync, id).await.unwrap();
    editor.begin_edit().unwrap();
    editor.rename_attribute("x", "y").unwrap();
    editor.set_attribute("y", "2").unwrap();
    assert!(editor.submit(&sync).await.unwrap().is_committed());

    let record = state.shape(id).unwrap();
    assert_eq!(record.attributes, r#"{"y":"2"}"#);
    assert_eq!(record.name, "A");
}

#[tokio::test]
async fn board_round_trip() {
    let state = Arc::new(AppState::new());
    let kept = state.add_shape("kept", POINT, "");
    let sync = Synchronizer::new(Arc::new(spawn(Arc::clone(&state)).await));
    let mut board = ShapeBoard::new();
    board.refresh(&sync).await.unwrap();

    let report = board
        .handle_event(
            &sync,
            SurfaceEvent::Created(DrawnLayer::new(10, Geometry::point(1.0, 1.0))),
        )
        .await;
    assert_eq!(report.refresh, Some(Ok(2)));
    let created = board
        .shapes()
        .iter()
        .map(|s| s.id)
        .find(|id| *id != kept)
        .unwrap();
    assert_eq!(state.shape(created).unwrap().name, "New Shape");

    board
        .handle_event(
            &sync,
            SurfaceEvent::Edited(vec![DrawnLayer::new(10, Geometry::point(2.0, 2.0))]),
        )
        .await;
    assert_eq!(
        Geometry::from_json(&state.shape(created).unwrap().geometry).unwrap(),
        Geometry::point(2.0, 2.0)
    );

    let report = board
        .handle_event(
            &sync,
            SurfaceEvent::Deleted(vec![
                DrawnLayer::new(10, Geometry::point(2.0, 2.0)),
                DrawnLayer::new(11, Geometry::point(0.0, 0.0)).with_feature_id(FeatureId::from(9u64)),
            ]),
        )
        .await;
    assert_eq!(report.failures().count(), 0);
    assert_eq!(state.shape_count(), 1);
    assert!(board.correlator().lookup(LayerHandle(10)).is_none());
    assert_eq!(board.shapes().len(), 1);
}
