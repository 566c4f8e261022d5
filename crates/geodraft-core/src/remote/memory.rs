//! In-memory store implementation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{
    BoxFuture, FileContent, FileId, FileMeta, NewShape, RemoteError, RemoteResult, RemoteStore,
    ShapeId, ShapeRecord, ShapeUpdate, file_kind,
};

/// Kind of store operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    ListFiles,
    FileContent,
    PutFileContent,
    Shapes,
    Shape,
    CreateShape,
    UpdateShape,
    DeleteShape,
}

/// A call received by the store, recorded for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    ListFiles,
    FileContent(FileId),
    PutFileContent(FileId, String),
    Shapes,
    Shape(ShapeId),
    CreateShape(NewShape),
    UpdateShape(ShapeId, ShapeUpdate),
    DeleteShape(ShapeId),
}

impl RemoteCall {
    pub fn op(&self) -> RemoteOp {
        match self {
            RemoteCall::ListFiles => RemoteOp::ListFiles,
            RemoteCall::FileContent(_) => RemoteOp::FileContent,
            RemoteCall::PutFileContent(..) => RemoteOp::PutFileContent,
            RemoteCall::Shapes => RemoteOp::Shapes,
            RemoteCall::Shape(_) => RemoteOp::Shape,
            RemoteCall::CreateShape(_) => RemoteOp::CreateShape,
            RemoteCall::UpdateShape(..) => RemoteOp::UpdateShape,
            RemoteCall::DeleteShape(_) => RemoteOp::DeleteShape,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    files: BTreeMap<FileId, (FileMeta, String)>,
    shapes: BTreeMap<ShapeId, ShapeRecord>,
    last_file_id: u64,
    last_shape_id: u64,
    calls: Vec<RemoteCall>,
    failures: VecDeque<(RemoteOp, RemoteError)>,
    delay: Option<Duration>,
}

impl Inner {
    fn next_file_id(&mut self) -> FileId {
        self.last_file_id += 1;
        FileId(self.last_file_id)
    }

    fn next_shape_id(&mut self) -> ShapeId {
        self.last_shape_id += 1;
        ShapeId(self.last_shape_id)
    }
}

/// In-memory store for tests and offline use.
///
/// Mirrors the reference server: partial shape updates skip empty fields and
/// deleting a missing shape succeeds. Failures can be queued per operation and
/// every call is recorded.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RemoteResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| RemoteError::Other(format!("lock error: {e}")))
    }

    /// Add a file, returning its id.
    pub fn insert_file(&self, name: &str, content: &str) -> RemoteResult<FileId> {
        let mut inner = self.lock()?;
        let id = inner.next_file_id();
        let meta = FileMeta {
            id,
            name: name.to_string(),
            kind: file_kind(name).to_string(),
        };
        inner.files.insert(id, (meta, content.to_string()));
        Ok(id)
    }

    /// Add a shape, returning its id.
    pub fn insert_shape(&self, name: &str, geometry: &str, attributes: &str) -> RemoteResult<ShapeId> {
        let mut inner = self.lock()?;
        let id = inner.next_shape_id();
        inner.shapes.insert(
            id,
            ShapeRecord {
                id,
                name: name.to_string(),
                geometry: geometry.to_string(),
                attributes: attributes.to_string(),
            },
        );
        Ok(id)
    }

    /// Stored text of a file.
    pub fn file_text(&self, id: FileId) -> Option<String> {
        self.lock().ok()?.files.get(&id).map(|(_, text)| text.clone())
    }

    /// Stored shape record.
    pub fn shape_record(&self, id: ShapeId) -> Option<ShapeRecord> {
        self.lock().ok()?.shapes.get(&id).cloned()
    }

    pub fn shape_count(&self) -> usize {
        self.lock().map(|inner| inner.shapes.len()).unwrap_or(0)
    }

    /// Calls received so far, oldest first.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().map(|inner| inner.calls.clone()).unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.calls.clear();
        }
    }

    /// Make the next call of kind `op` fail with `error`.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        if let Ok(mut inner) = self.lock() {
            inner.failures.push_back((op, error));
        }
    }

    /// Delay every call by `delay` before it takes effect.
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut inner) = self.lock() {
            inner.delay = delay;
        }
    }

    /// Wait out the configured delay, then record the call and consume a
    /// queued failure for its operation if there is one.
    async fn enter(&self, call: RemoteCall) -> RemoteResult<()> {
        let delay = self.lock()?.delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.lock()?;
        let op = call.op();
        inner.calls.push(call);
        match inner.failures.iter().position(|(o, _)| *o == op) {
            Some(i) => match inner.failures.remove(i) {
                Some((_, error)) => Err(error),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }
}

impl RemoteStore for MemoryStore {
    fn list_files(&self) -> BoxFuture<'_, RemoteResult<Vec<FileMeta>>> {
        Box::pin(async move {
            self.enter(RemoteCall::ListFiles).await?;
            let inner = self.lock()?;
            Ok(inner.files.values().map(|(meta, _)| meta.clone()).collect())
        })
    }

    fn file_content(&self, id: FileId) -> BoxFuture<'_, RemoteResult<FileContent>> {
        Box::pin(async move {
            self.enter(RemoteCall::FileContent(id)).await?;
            let inner = self.lock()?;
            inner
                .files
                .get(&id)
                .map(|(meta, content)| FileContent {
                    file: meta.clone(),
                    content: content.clone(),
                })
                .ok_or_else(|| RemoteError::NotFound(format!("file {id}")))
        })
    }

    fn put_file_content(&self, id: FileId, content: String) -> BoxFuture<'_, RemoteResult<()>> {
        Box::pin(async move {
            self.enter(RemoteCall::PutFileContent(id, content.clone())).await?;
            let mut inner = self.lock()?;
            let (_, stored) = inner
                .files
                .get_mut(&id)
                .ok_or_else(|| RemoteError::NotFound(format!("file {id}")))?;
            *stored = content;
            Ok(())
        })
    }

    fn shapes(&self) -> BoxFuture<'_, RemoteResult<Vec<ShapeRecord>>> {
        Box::pin(async move {
            self.enter(RemoteCall::Shapes).await?;
            let inner = self.lock()?;
            Ok(inner.shapes.values().cloned().collect())
        })
    }

    fn shape(&self, id: ShapeId) -> BoxFuture<'_, RemoteResult<ShapeRecord>> {
        Box::pin(async move {
            self.enter(RemoteCall::Shape(id)).await?;
            let inner = self.lock()?;
            inner
                .shapes
                .get(&id)
                .cloned()
                .ok_or_else(|| RemoteError::NotFound(format!("shape {id}")))
        })
    }

    fn create_shape(&self, shape: NewShape) -> BoxFuture<'_, RemoteResult<ShapeRecord>> {
        Box::pin(async move {
            self.enter(RemoteCall::CreateShape(shape.clone())).await?;
            let mut inner = self.lock()?;
            let id = inner.next_shape_id();
            let record = ShapeRecord {
                id,
                name: shape.name,
                geometry: shape.geometry,
                attributes: String::new(),
            };
            inner.shapes.insert(id, record.clone());
            Ok(record)
        })
    }

    fn update_shape(&self, id: ShapeId, update: ShapeUpdate) -> BoxFuture<'_, RemoteResult<()>> {
        Box::pin(async move {
            self.enter(RemoteCall::UpdateShape(id, update.clone())).await?;
            let mut inner = self.lock()?;
            let record = inner
                .shapes
                .get_mut(&id)
                .ok_or_else(|| RemoteError::NotFound(format!("shape {id}")))?;
            update.apply_to(record);
            Ok(())
        })
    }

    fn delete_shape(&self, id: ShapeId) -> BoxFuture<'_, RemoteResult<()>> {
        Box::pin(async move {
            self.enter(RemoteCall::DeleteShape(id)).await?;
            self.lock()?.shapes.remove(&id);
            Ok(())
        })
    }
}
