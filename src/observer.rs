//! Collaborators the session reports to
//!
//! The editor surface implements [`Renderer`]; whatever shows errors to the
//! performers implements [`ErrorSink`]. [`LogObserver`] implements both on
//! top of `tracing` for headless use.

use tracing::{debug, error, warn};

use crate::document::DocumentId;
use crate::error::DrawError;
use crate::eval::MiniLocation;
use crate::pattern::{Hap, Value};

pub trait Renderer: Send + Sync {
    /// Events of `doc` sounding at `phase`. Called once per known document
    /// every frame, with an empty slice when nothing is active.
    fn on_highlight(
        &self,
        doc: DocumentId,
        phase: f64,
        haps: &[Hap<Value>],
    ) -> Result<(), DrawError>;

    /// Source spans of the latest evaluation of `doc`.
    fn on_update_mini_locations(&self, doc: DocumentId, locations: &[MiniLocation]);

    /// Highlighting was switched off; drop whatever is still shown.
    fn clear_highlights(&self) {}
}

pub trait ErrorSink: Send + Sync {
    /// An evaluation of `doc` failed.
    fn on_error(&self, message: &str, doc: DocumentId);

    /// A highlight frame failed.
    fn on_draw_error(&self, error: &DrawError);
}

/// Writes everything to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Renderer for LogObserver {
    fn on_highlight(
        &self,
        doc: DocumentId,
        phase: f64,
        haps: &[Hap<Value>],
    ) -> Result<(), DrawError> {
        if !haps.is_empty() {
            let values: Vec<String> = haps.iter().map(|hap| hap.value.to_string()).collect();
            debug!(doc = %doc, phase, active = ?values, "highlight");
        }
        Ok(())
    }

    fn on_update_mini_locations(&self, doc: DocumentId, locations: &[MiniLocation]) {
        debug!(doc = %doc, count = locations.len(), "mini locations updated");
    }

    fn clear_highlights(&self) {
        debug!("highlights cleared");
    }
}

impl ErrorSink for LogObserver {
    fn on_error(&self, message: &str, doc: DocumentId) {
        error!(doc = %doc, "{}", message);
    }

    fn on_draw_error(&self, error: &DrawError) {
        warn!("draw error: {}", error);
    }
}
