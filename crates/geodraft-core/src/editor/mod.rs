//! Editors tying a drawing surface to an edit session and the synchronizer.
//!
//! - [`FileEditor`]: a whole feature collection saved as one document.
//! - [`ShapeEditor`]: one shape with its name and attributes.
//! - [`ShapeBoard`]: the shape list, where each surface operation is persisted
//!   on its own and followed by a refetch.

mod board;
mod file;
mod shape;

pub use board::{BoardReport, OperationResult, ShapeBoard, ShapeOperation};
pub use file::{DocumentStatus, FileEditor, SaveRequest, SaveResponse};
pub use shape::{ShapeEditor, SubmitRequest, SubmitResponse};

use thiserror::Error;

use crate::attributes::AttributeError;
use crate::feature::ModelError;
use crate::session::SessionError;
use crate::sync::SyncError;

/// Editor errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditorError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Attribute(#[from] AttributeError),
    /// The stored document could not be parsed, so it is read-only.
    #[error("document is not editable: {error}")]
    Unparseable { error: String },
}
