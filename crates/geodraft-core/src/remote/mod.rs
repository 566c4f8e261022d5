//! Remote store abstraction.
//!
//! The store exposes whole-document access for file-backed feature
//! collections and per-entity CRUD for shapes. Geometry and attributes cross
//! the boundary as JSON text.

mod http;
mod memory;

pub use http::{HttpStore, HttpStoreConfig};
pub use memory::{MemoryStore, RemoteCall, RemoteOp};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Remote store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("store error: {0}")]
    Other(String),
}

impl RemoteError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout(_) => true,
            RemoteError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Boxed future for store operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identifier of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a stored shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeId(pub u64);

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stored type of a file, derived from its name.
pub fn file_kind(name: &str) -> &'static str {
    if name.ends_with("kml") {
        "kml"
    } else {
        "geo.json"
    }
}

/// File metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    #[serde(rename = "ID", alias = "id")]
    pub id: FileId,
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    /// `geo.json` or `kml`.
    #[serde(rename = "Type", alias = "type")]
    pub kind: String,
}

/// File metadata with its stored text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub file: FileMeta,
    pub content: String,
}

/// Body of a whole-document replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUpdate {
    pub content: String,
}

/// A stored shape as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeRecord {
    #[serde(rename = "ID", alias = "id")]
    pub id: ShapeId,
    #[serde(default, alias = "Name")]
    pub name: String,
    /// GeoJSON geometry text.
    #[serde(default, alias = "Geometry")]
    pub geometry: String,
    /// JSON object text.
    #[serde(default, alias = "Attributes")]
    pub attributes: String,
}

/// Body of a shape creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewShape {
    pub name: String,
    pub geometry: String,
}

/// Body of a shape update; only present, non-empty fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<String>,
}

impl ShapeUpdate {
    /// Apply to a record with the store's partial-update rules.
    pub fn apply_to(&self, record: &mut ShapeRecord) {
        let fields = [
            (&self.name, &mut record.name),
            (&self.geometry, &mut record.geometry),
            (&self.attributes, &mut record.attributes),
        ];
        for (update, field) in fields {
            if let Some(value) = update.as_deref().filter(|v| !v.is_empty()) {
                *field = value.to_string();
            }
        }
    }
}

/// Trait for remote store backends.
///
/// Implementations must be `Send + Sync`; every call is independent.
pub trait RemoteStore: Send + Sync {
    /// List stored files.
    fn list_files(&self) -> BoxFuture<'_, RemoteResult<Vec<FileMeta>>>;

    /// Fetch a file with its text.
    fn file_content(&self, id: FileId) -> BoxFuture<'_, RemoteResult<FileContent>>;

    /// Replace a file's text.
    fn put_file_content(&self, id: FileId, content: String) -> BoxFuture<'_, RemoteResult<()>>;

    /// List all shapes.
    fn shapes(&self) -> BoxFuture<'_, RemoteResult<Vec<ShapeRecord>>>;

    /// Fetch one shape.
    fn shape(&self, id: ShapeId) -> BoxFuture<'_, RemoteResult<ShapeRecord>>;

    /// Create a shape; the store assigns its id.
    fn create_shape(&self, shape: NewShape) -> BoxFuture<'_, RemoteResult<ShapeRecord>>;

    /// Partially update a shape.
    fn update_shape(&self, id: ShapeId, update: ShapeUpdate) -> BoxFuture<'_, RemoteResult<()>>;

    /// Delete a shape.
    fn delete_shape(&self, id: ShapeId) -> BoxFuture<'_, RemoteResult<()>>;
}
