//! Non-fatal reconciliation warnings.
//!
//! Parsing and correlation problems never abort an operation; they are
//! collected as warnings and shown to the user.

use thiserror::Error;

use crate::correlate::LayerHandle;
use crate::feature::FeatureRef;

/// A recoverable problem found while reconciling surface, model and store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileWarning {
    /// Stored text could not be parsed; a fallback value is in use.
    #[error("could not parse {what}: {message}")]
    ParseFailure { what: &'static str, message: String },

    /// A layer carries no identifier and is not in the correlation table.
    #[error("layer {0} has no resolvable feature id; skipped")]
    Unresolvable(LayerHandle),

    /// The surface could not produce a geometry for a layer.
    #[error("layer {layer}: unreadable geometry: {message}")]
    BadGeometry { layer: LayerHandle, message: String },

    /// An edit targeted a feature that is not in the collection.
    #[error("feature {0} not found; edit skipped")]
    NotFound(FeatureRef),

    /// Several layers in one batch targeted the same feature.
    #[error("layer {dropped} discarded: layer {kept} also targets feature {target}")]
    DuplicateTarget {
        target: FeatureRef,
        dropped: LayerHandle,
        kept: LayerHandle,
    },

    /// The event kind is not handled by this editor.
    #[error("{0} events are not handled here; ignored")]
    Unsupported(&'static str),
}
