//! Persistence synchronizer.
//!
//! Pushes local changes to a [`RemoteStore`] and pulls confirmed state back.
//! Every store call runs under a timeout; transient failures of idempotent
//! operations are retried with a linear backoff. Each operation reports its
//! own result.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;

use crate::feature::{FeatureCollection, ParsedCollection};
use crate::geometry::Geometry;
use crate::remote::{
    FileId, FileMeta, NewShape, RemoteError, RemoteResult, RemoteStore, ShapeId, ShapeUpdate,
};
use crate::shape::Shape;
use crate::warning::ReconcileWarning;

/// Default per-call timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of attempts for idempotent calls.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry, in milliseconds.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;

/// Name given to shapes created from the drawing surface.
pub const DEFAULT_SHAPE_NAME: &str = "New Shape";

/// Synchronizer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Delay before retry `n` is `retry_backoff * n`.
    pub retry_backoff: Duration,
    pub default_shape_name: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            default_shape_name: DEFAULT_SHAPE_NAME.to_string(),
        }
    }
}

/// A persistence operation, carried in errors for context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ListFiles,
    LoadCollection(FileId),
    SaveCollection(FileId),
    LoadShape(ShapeId),
    RefreshShapes,
    CreateShape,
    UpdateShape(ShapeId),
    SubmitShape(ShapeId),
    DeleteShape(ShapeId),
}

impl Operation {
    /// Whether repeating the call has the same effect as making it once.
    pub fn is_idempotent(self) -> bool {
        !matches!(self, Operation::CreateShape)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::ListFiles => write!(f, "list files"),
            Operation::LoadCollection(id) => write!(f, "load file {id}"),
            Operation::SaveCollection(id) => write!(f, "save file {id}"),
            Operation::LoadShape(id) => write!(f, "load shape {id}"),
            Operation::RefreshShapes => write!(f, "refresh shapes"),
            Operation::CreateShape => write!(f, "create shape"),
            Operation::UpdateShape(id) => write!(f, "update shape {id}"),
            Operation::SubmitShape(id) => write!(f, "submit shape {id}"),
            Operation::DeleteShape(id) => write!(f, "delete shape {id}"),
        }
    }
}

/// Persistence errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Remote {
        operation: Operation,
        attempts: u32,
        source: RemoteError,
    },
    #[error("{operation}: could not encode payload: {message}")]
    Encode { operation: Operation, message: String },
}

impl SyncError {
    pub fn operation(&self) -> Operation {
        match self {
            SyncError::Remote { operation, .. } | SyncError::Encode { operation, .. } => *operation,
        }
    }

    /// The store error, if the failure came from the store.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            SyncError::Remote { source, .. } => Some(source),
            SyncError::Encode { .. } => None,
        }
    }

    fn encode(operation: Operation, e: serde_json::Error) -> Self {
        SyncError::Encode {
            operation,
            message: e.to_string(),
        }
    }
}

/// Shapes returned by a list refetch, with any decoding warnings.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeList {
    pub shapes: Vec<Shape>,
    pub warnings: Vec<ReconcileWarning>,
}

/// Pushes and pulls state through a remote store.
pub struct Synchronizer<S: ?Sized> {
    store: Arc<S>,
    config: SyncConfig,
}

impl<S: ?Sized> Clone for Synchronizer<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: RemoteStore + ?Sized> Synchronizer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, SyncConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run a store call with timeout and retries.
    async fn call<T, F, Fut>(&self, operation: Operation, mut request: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let max_attempts = if operation.is_idempotent() {
            self.config.max_attempts.max(1)
        } else {
            1
        };
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::time::timeout(self.config.timeout, request())
                .await
                .unwrap_or(Err(RemoteError::Timeout(self.config.timeout)));
            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{operation} succeeded on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!("{operation} attempt {attempt}/{max_attempts} failed: {e}; retrying");
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                Err(source) => {
                    warn!("{operation} failed: {source}");
                    return Err(SyncError::Remote {
                        operation,
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    pub async fn list_files(&self) -> Result<Vec<FileMeta>, SyncError> {
        self.call(Operation::ListFiles, || self.store.list_files()).await
    }

    /// Fetch and parse a stored collection.
    pub async fn load_collection(
        &self,
        file_id: FileId,
    ) -> Result<(FileMeta, ParsedCollection), SyncError> {
        let content = self
            .call(Operation::LoadCollection(file_id), || {
                self.store.file_content(file_id)
            })
            .await?;
        let parsed = FeatureCollection::parse(&content.content);
        if let ParsedCollection::Unparseable { error } = &parsed {
            warn!("file {file_id} is not a usable feature collection: {error}");
        }
        Ok((content.file, parsed))
    }

    /// Replace a stored collection with `collection`.
    pub async fn save_collection(
        &self,
        file_id: FileId,
        collection: &FeatureCollection,
    ) -> Result<(), SyncError> {
        let operation = Operation::SaveCollection(file_id);
        let text = collection
            .to_json()
            .map_err(|e| SyncError::encode(operation, e))?;
        self.call(operation, || self.store.put_file_content(file_id, text.clone()))
            .await?;
        debug!("saved {} features to file {file_id}", collection.len());
        Ok(())
    }

    pub async fn load_shape(&self, id: ShapeId) -> Result<(Shape, Vec<ReconcileWarning>), SyncError> {
        let record = self
            .call(Operation::LoadShape(id), || self.store.shape(id))
            .await?;
        Ok(Shape::from_record(record))
    }

    /// Fetch every shape.
    pub async fn refresh_shapes(&self) -> Result<ShapeList, SyncError> {
        let records = self
            .call(Operation::RefreshShapes, || self.store.shapes())
            .await?;
        let mut list = ShapeList {
            shapes: Vec::with_capacity(records.len()),
            warnings: Vec::new(),
        };
        for record in records {
            let (shape, warnings) = Shape::from_record(record);
            list.shapes.push(shape);
            list.warnings.extend(warnings);
        }
        Ok(list)
    }

    /// Create a shape, returning the id the store assigned.
    ///
    /// `name` defaults to [`SyncConfig::default_shape_name`]. Never retried.
    pub async fn create_shape(
        &self,
        geometry: &Geometry,
        name: Option<&str>,
    ) -> Result<ShapeId, SyncError> {
        let operation = Operation::CreateShape;
        let shape = NewShape {
            name: name.unwrap_or(self.config.default_shape_name.as_str()).to_string(),
            geometry: geometry
                .to_json()
                .map_err(|e| SyncError::encode(operation, e))?,
        };
        let record = self
            .call(operation, || self.store.create_shape(shape.clone()))
            .await?;
        debug!("created shape {}", record.id);
        Ok(record.id)
    }

    /// Replace only the geometry of a shape.
    pub async fn update_shape_geometry(
        &self,
        id: ShapeId,
        geometry: &Geometry,
    ) -> Result<(), SyncError> {
        let operation = Operation::UpdateShape(id);
        let update = ShapeUpdate {
            geometry: Some(
                geometry
                    .to_json()
                    .map_err(|e| SyncError::encode(operation, e))?,
            ),
            ..Default::default()
        };
        self.call(operation, || self.store.update_shape(id, update.clone()))
            .await
    }

    /// Delete a shape. A shape the store no longer has counts as deleted.
    pub async fn delete_shape(&self, id: ShapeId) -> Result<(), SyncError> {
        match self
            .call(Operation::DeleteShape(id), || self.store.delete_shape(id))
            .await
        {
            Err(SyncError::Remote {
                source: RemoteError::NotFound(_),
                ..
            }) => {
                debug!("shape {id} already gone");
                Ok(())
            }
            result => result,
        }
    }

    /// Write name, geometry and attributes of a shape.
    pub async fn submit_shape(&self, shape: &Shape) -> Result<(), SyncError> {
        let operation = Operation::SubmitShape(shape.id);
        let update = shape
            .to_update()
            .map_err(|e| SyncError::encode(operation, e))?;
        self.call(operation, || self.store.update_shape(shape.id, update.clone()))
            .await
    }
}
