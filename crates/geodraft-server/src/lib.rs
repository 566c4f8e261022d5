//! GeoDraft reference server
//!
//! Serves stored files and shapes from memory over the routes the geodraft
//! HTTP store speaks:
//!
//! ```text
//! GET    /files
//! GET    /files/{id}/content      -> {"file": {"ID", "Name", "Type"}, "content"}
//! PUT    /files/{id}/content      <- {"content"}
//! GET    /shapes
//! POST   /shapes                  <- {"name", "geometry"}
//! GET    /shape/{id}
//! PUT    /shapes/{id}             <- any of {"name", "geometry", "attributes"}
//! DELETE /shapes/{id}
//! ```
//!
//! Errors are returned as `{"error": "<message>"}`.

pub mod config;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Json, Router,
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use dashmap::DashMap;
use geodraft_core::remote::{
    ContentUpdate, FileContent, FileId, FileMeta, NewShape, ShapeId, ShapeRecord, ShapeUpdate,
    file_kind,
};
use serde::Serialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Extensions of files loaded from a seed directory.
const SEED_EXTENSIONS: &[&str] = &["geojson", "json", "kml"];

struct StoredFile {
    meta: FileMeta,
    content: String,
}

/// Shared application state.
#[derive(Default)]
pub struct AppState {
    files: DashMap<FileId, StoredFile>,
    shapes: DashMap<ShapeId, ShapeRecord>,
    last_file_id: AtomicU64,
    last_shape_id: AtomicU64,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a file, returning its id.
    pub fn add_file(&self, name: &str, content: impl Into<String>) -> FileId {
        let id = FileId(self.last_file_id.fetch_add(1, Ordering::Relaxed) + 1);
        let meta = FileMeta {
            id,
            name: name.to_string(),
            kind: file_kind(name).to_string(),
        };
        self.files.insert(
            id,
            StoredFile {
                meta,
                content: content.into(),
            },
        );
        id
    }

    /// Store a shape, returning its id.
    pub fn add_shape(&self, name: &str, geometry: &str, attributes: &str) -> ShapeId {
        let id = ShapeId(self.last_shape_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.shapes.insert(
            id,
            ShapeRecord {
                id,
                name: name.to_string(),
                geometry: geometry.to_string(),
                attributes: attributes.to_string(),
            },
        );
        id
    }

    pub fn file_content(&self, id: FileId) -> Option<String> {
        self.files.get(&id).map(|f| f.content.clone())
    }

    pub fn shape(&self, id: ShapeId) -> Option<ShapeRecord> {
        self.shapes.get(&id).map(|s| s.clone())
    }

    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    /// Load every `.geojson`, `.json` and `.kml` file in `dir`, in name order.
    pub fn load_seed_dir(&self, dir: &Path) -> std::io::Result<usize> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let seedable = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| SEED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if path.is_file() && seedable {
                paths.push(path);
            }
        }
        paths.sort();

        for path in &paths {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!("skipping seed file with non-UTF-8 name: {}", path.display());
                continue;
            };
            let content = std::fs::read_to_string(path)?;
            let id = self.add_file(name, content);
            debug!("seeded file {} as {}", name, id);
        }
        info!("Loaded {} files from {}", paths.len(), dir.display());
        Ok(paths.len())
    }

    fn sorted_files(&self) -> Vec<FileMeta> {
        let mut files: Vec<FileMeta> = self.files.iter().map(|f| f.meta.clone()).collect();
        files.sort_by_key(|f| f.id);
        files
    }

    fn sorted_shapes(&self) -> Vec<ShapeRecord> {
        let mut shapes: Vec<ShapeRecord> = self.shapes.iter().map(|s| s.clone()).collect();
        shapes.sort_by_key(|s| s.id);
        shapes
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// An error response with a JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/files", get(list_files))
        .route("/files/{id}/content", get(file_content).put(put_file_content))
        .route("/shapes", get(list_shapes).post(create_shape))
        .route("/shape/{id}", get(get_shape))
        .route("/shapes/{id}", put(update_shape).delete(delete_shape))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

async fn list_files(State(state): State<Arc<AppState>>) -> Json<Vec<FileMeta>> {
    Json(state.sorted_files())
}

async fn file_content(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<u64>,
) -> Result<Json<FileContent>, ApiError> {
    let file = state
        .files
        .get(&FileId(id))
        .ok_or_else(|| ApiError::not_found("File not found"))?;
    Ok(Json(FileContent {
        file: file.meta.clone(),
        content: file.content.clone(),
    }))
}

async fn put_file_content(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<u64>,
    Json(update): Json<ContentUpdate>,
) -> Result<Json<Value>, ApiError> {
    let mut file = state
        .files
        .get_mut(&FileId(id))
        .ok_or_else(|| ApiError::not_found("File not found"))?;
    file.content = update.content;
    info!("File {} updated ({} bytes)", id, file.content.len());
    Ok(Json(json!({"message": "File content updated successfully"})))
}

async fn list_shapes(State(state): State<Arc<AppState>>) -> Json<Vec<ShapeRecord>> {
    Json(state.sorted_shapes())
}

async fn get_shape(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<u64>,
) -> Result<Json<ShapeRecord>, ApiError> {
    state
        .shape(ShapeId(id))
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Shape not found"))
}

async fn create_shape(
    State(state): State<Arc<AppState>>,
    Json(shape): Json<NewShape>,
) -> (StatusCode, Json<ShapeRecord>) {
    let id = state.add_shape(&shape.name, &shape.geometry, "");
    info!("Shape {} created", id);
    let record = ShapeRecord {
        id,
        name: shape.name,
        geometry: shape.geometry,
        attributes: String::new(),
    };
    (StatusCode::CREATED, Json(record))
}

async fn update_shape(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<u64>,
    Json(update): Json<ShapeUpdate>,
) -> Result<Json<Value>, ApiError> {
    let mut shape = state
        .shapes
        .get_mut(&ShapeId(id))
        .ok_or_else(|| ApiError::not_found("Shape not found"))?;
    update.apply_to(&mut shape);
    info!("Shape {} updated", id);
    Ok(Json(json!({"message": "Shape updated successfully"})))
}

/// Deleting a missing shape succeeds.
async fn delete_shape(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<u64>,
) -> Json<Value> {
    if state.shapes.remove(&ShapeId(id)).is_some() {
        info!("Shape {} deleted", id);
    } else {
        debug!("Shape {} already absent", id);
    }
    Json(json!({"message": "Shape deleted successfully"}))
}
