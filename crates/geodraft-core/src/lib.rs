//! GeoDraft Core Library
//!
//! Reconciliation engine for map drawing: interprets create/edit/delete events
//! from a drawing surface, folds them into an in-memory feature collection and
//! persists the result to a remote store.

pub mod attributes;
pub mod correlate;
pub mod editor;
pub mod feature;
pub mod geometry;
pub mod remote;
pub mod session;
pub mod shape;
pub mod sync;
pub mod warning;

pub use attributes::{AttributeChange, AttributeEdit, AttributeError, AttributeMap};
pub use correlate::{
    Correlator, DrawnLayer, GeoJsonLayer, LayerHandle, ReconcileReport, SurfaceEvent, SurfaceLayer,
};
pub use editor::{
    BoardReport, DocumentStatus, EditorError, FileEditor, OperationResult, SaveRequest,
    SaveResponse, ShapeBoard, ShapeEditor, ShapeOperation, SubmitRequest, SubmitResponse,
};
pub use feature::{
    Feature, FeatureCollection, FeatureId, FeatureKey, FeatureRef, ModelError, ParsedCollection,
};
pub use geometry::{Geometry, GeometryError, Position};
pub use remote::{
    FileContent, FileId, FileMeta, HttpStore, HttpStoreConfig, MemoryStore, NewShape, RemoteError,
    RemoteResult, RemoteStore, ShapeId, ShapeRecord, ShapeUpdate,
};
pub use session::{EditSession, Epoch, SaveOutcome, SaveTicket, SessionError, SessionState};
pub use shape::{Shape, ShapeGeometry};
pub use sync::{Operation, ShapeList, SyncConfig, SyncError, Synchronizer};
pub use warning::ReconcileWarning;
