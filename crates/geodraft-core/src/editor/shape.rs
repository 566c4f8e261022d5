//! Field-level editor for a single shape.

use log::{debug, info};

use super::EditorError;
use crate::attributes::{AttributeChange, AttributeEdit};
use crate::correlate::{Correlator, LayerHandle, ReconcileReport, SurfaceEvent, SurfaceLayer};
use crate::feature::{FeatureId, FeatureRef};
use crate::remote::{RemoteStore, ShapeId};
use crate::session::{EditSession, Epoch, SaveOutcome, SessionError, SessionState};
use crate::shape::{Shape, ShapeGeometry};
use crate::sync::{SyncError, Synchronizer};
use crate::warning::ReconcileWarning;

/// A shape submission in flight.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    epoch: Epoch,
    shape: Shape,
}

impl SubmitRequest {
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Write name, geometry and attributes to the store.
    pub async fn send<S: RemoteStore + ?Sized>(self, sync: &Synchronizer<S>) -> SubmitResponse {
        let result = sync.submit_shape(&self.shape).await;
        SubmitResponse {
            epoch: self.epoch,
            shape: self.shape,
            result,
        }
    }
}

/// Result of a [`SubmitRequest`].
#[derive(Debug, Clone)]
pub struct SubmitResponse {
    epoch: Epoch,
    shape: Shape,
    result: Result<(), SyncError>,
}

impl SubmitResponse {
    pub fn result(&self) -> &Result<(), SyncError> {
        &self.result
    }
}

/// Editor for one stored shape.
#[derive(Debug, Clone)]
pub struct ShapeEditor {
    session: EditSession<Shape>,
    correlator: Correlator,
}

impl ShapeEditor {
    pub fn new(shape: Shape) -> Self {
        Self {
            session: EditSession::new(shape),
            correlator: Correlator::new(),
        }
    }

    /// Fetch a shape and open it.
    pub async fn load<S: RemoteStore + ?Sized>(
        sync: &Synchronizer<S>,
        id: ShapeId,
    ) -> Result<(Self, Vec<ReconcileWarning>), EditorError> {
        let (shape, warnings) = sync.load_shape(id).await?;
        Ok((Self::new(shape), warnings))
    }

    /// Refetch the shape. Only allowed while viewing.
    pub async fn reload<S: RemoteStore + ?Sized>(
        &mut self,
        sync: &Synchronizer<S>,
    ) -> Result<Vec<ReconcileWarning>, EditorError> {
        if self.state() != SessionState::Viewing {
            return Err(SessionError::InvalidTransition {
                state: self.state(),
                action: "reload",
            }
            .into());
        }
        let (shape, warnings) = sync.load_shape(self.id()).await?;
        self.session.replace_confirmed(shape)?;
        Ok(warnings)
    }

    pub fn id(&self) -> ShapeId {
        self.session.confirmed().id
    }

    /// The shape to render.
    pub fn shape(&self) -> &Shape {
        self.session.current()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &EditSession<Shape> {
        &self.session
    }

    pub fn is_dirty(&self) -> bool {
        self.session.is_dirty()
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.session.last_error()
    }

    pub fn begin_edit(&mut self) -> Result<(), EditorError> {
        self.session.begin_edit()?;
        Ok(())
    }

    /// Record that the surface draws this shape as `handle`.
    pub fn bind_layer(&mut self, handle: LayerHandle) {
        let target = FeatureRef::Persisted(FeatureId::from(self.id()));
        self.correlator.bind(handle, target);
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), EditorError> {
        self.session.working_mut()?.name = name.into();
        Ok(())
    }

    pub fn edit_attributes(&mut self, edit: AttributeEdit) -> Result<AttributeChange, EditorError> {
        Ok(self.session.working_mut()?.edit_attributes(edit)?)
    }

    /// Add a generated key, returning it.
    pub fn add_attribute(&mut self) -> Result<String, EditorError> {
        match self.edit_attributes(AttributeEdit::Add)? {
            AttributeChange::Added(key) => Ok(key),
            _ => Ok(String::new()),
        }
    }

    pub fn rename_attribute(&mut self, from: &str, to: &str) -> Result<AttributeChange, EditorError> {
        self.edit_attributes(AttributeEdit::Rename {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    pub fn set_attribute(
        &mut self,
        key: &str,
        value: impl Into<String>,
    ) -> Result<AttributeChange, EditorError> {
        self.edit_attributes(AttributeEdit::SetValue {
            key: key.to_string(),
            value: value.into(),
        })
    }

    pub fn remove_attribute(&mut self, key: &str) -> Result<AttributeChange, EditorError> {
        self.edit_attributes(AttributeEdit::Remove {
            key: key.to_string(),
        })
    }

    /// Apply geometry edits from the surface to the working copy.
    ///
    /// Only edits resolving to this shape are applied; the last one wins.
    /// Create and delete events belong to the shape list and are ignored here.
    pub fn handle_event<L: SurfaceLayer>(
        &mut self,
        event: SurfaceEvent<L>,
    ) -> Result<ReconcileReport, EditorError> {
        let id = self.id();
        let shape = self.session.working_mut()?;
        let mut report = ReconcileReport::default();
        let layers = match event {
            SurfaceEvent::Edited(layers) => layers,
            other => {
                report.warn(ReconcileWarning::Unsupported(other.kind()));
                return Ok(report);
            }
        };
        let (edits, warnings) = self.correlator.resolve_edits(&layers);
        warnings.into_iter().for_each(|w| report.warn(w));
        for edit in edits {
            let own = match &edit.target {
                FeatureRef::Persisted(fid) => fid.as_shape_id() == Some(id),
                FeatureRef::Local(_) => false,
            };
            if !own {
                report.warn(ReconcileWarning::NotFound(edit.target));
                continue;
            }
            debug!("shape {id}: geometry replaced from layer {}", edit.layer);
            shape.geometry = ShapeGeometry::Parsed(edit.geometry);
            if !report.edited.contains(&edit.target) {
                report.edited.push(edit.target);
            }
        }
        Ok(report)
    }

    pub fn prepare_submit(&mut self) -> Result<SubmitRequest, EditorError> {
        let ticket = self.session.begin_save()?;
        Ok(SubmitRequest {
            epoch: ticket.epoch,
            shape: ticket.value,
        })
    }

    pub fn complete_submit(&mut self, response: SubmitResponse) -> SaveOutcome {
        let result = response.result.map(|()| response.shape);
        let outcome = self.session.finish_save(response.epoch, result);
        if outcome.is_committed() {
            info!("submitted shape {}", self.id());
        }
        outcome
    }

    /// Submit and wait for the result.
    pub async fn submit<S: RemoteStore + ?Sized>(
        &mut self,
        sync: &Synchronizer<S>,
    ) -> Result<SaveOutcome, EditorError> {
        let request = self.prepare_submit()?;
        let response = request.send(sync).await;
        Ok(self.complete_submit(response))
    }

    pub fn cancel(&mut self) {
        self.session.cancel();
    }
}
