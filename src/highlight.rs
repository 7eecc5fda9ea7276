//! Highlight frame loop
//!
//! Once per rendered frame the loop asks the scheduler for the current
//! phase, queries the committed composite over the short window since the
//! previous frame, and tells the renderer which events of each document are
//! sounding. The loop never advances time.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::document::{DocumentId, DOC_ID_CONTEXT_KEY};
use crate::error::{panic_message, DrawError};
use crate::observer::{ErrorSink, Renderer};
use crate::pattern::{Fraction, Hap, Value};
use crate::registry::DocumentSet;
use crate::scheduler::SchedulerAdapter;

/// Widest window (in cycles) a single frame may query.
pub const MAX_WINDOW: f64 = 0.1;

/// Frames per second used when the requested rate is unusable.
pub const DEFAULT_FRAME_RATE: f64 = 60.0;

/// Added to the query end so events starting exactly at the phase are found.
const FRAME_EPSILON: f64 = 1e-6;

/// The span of session time one frame looked at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameWindow {
    pub begin: f64,
    pub end: f64,
}

impl FrameWindow {
    pub fn width(&self) -> f64 {
        self.end - self.begin
    }
}

/// What a call to [`HighlightLoop::tick`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The loop is stopped.
    Idle,
    /// First frame after start: phase recorded, nothing drawn.
    Primed { phase: f64 },
    /// The scheduler has no composite yet.
    NoPattern { phase: f64 },
    Drawn {
        phase: f64,
        window: FrameWindow,
        active: usize,
    },
    /// Something went wrong; already reported to the error sink.
    Failed { phase: f64 },
}

pub struct HighlightLoop {
    scheduler: Arc<SchedulerAdapter>,
    documents: DocumentSet,
    renderer: Arc<dyn Renderer>,
    errors: Arc<dyn ErrorSink>,
    max_window: f64,
    last_frame: Option<f64>,
    running: bool,
}

impl HighlightLoop {
    pub fn new(
        scheduler: Arc<SchedulerAdapter>,
        documents: DocumentSet,
        renderer: Arc<dyn Renderer>,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            scheduler,
            documents,
            renderer,
            errors,
            max_window: MAX_WINDOW,
            last_frame: None,
            running: false,
        }
    }

    pub fn with_max_window(mut self, max_window: f64) -> Self {
        self.max_window = max_window;
        self
    }

    /// Begin drawing. The next frame only records the phase.
    pub fn start(&mut self) {
        self.running = true;
        self.last_frame = None;
    }

    /// Stop drawing and forget the previous frame.
    pub fn stop(&mut self) {
        self.running = false;
        self.last_frame = None;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn last_frame(&self) -> Option<f64> {
        self.last_frame
    }

    /// Run one frame. Failures are reported and never stop the loop.
    pub fn tick(&mut self) -> Frame {
        if !self.running {
            return Frame::Idle;
        }

        let phase = self.scheduler.now();
        let Some(last_frame) = self.last_frame.replace(phase) else {
            return Frame::Primed { phase };
        };

        match self.draw(last_frame, phase) {
            Ok(frame) => frame,
            Err(err) => {
                self.errors.on_draw_error(&err);
                Frame::Failed { phase }
            }
        }
    }

    fn draw(&self, last_frame: f64, phase: f64) -> Result<Frame, DrawError> {
        let Some(pattern) = self.scheduler.pattern() else {
            return Ok(Frame::NoPattern { phase });
        };

        // The previous frame may lie ahead of us after the scheduler restarted.
        let begin = last_frame.max(phase - self.max_window).min(phase);
        let window = FrameWindow { begin, end: phase };

        let haps = catch_unwind(AssertUnwindSafe(|| {
            pattern.query_arc(window.begin, window.end + FRAME_EPSILON)
        }))
        .map_err(|payload| DrawError::QueryPanicked(panic_message(payload)))?;

        let now = Fraction::from_float(phase);
        let mut by_document: BTreeMap<DocumentId, Vec<Hap<Value>>> = BTreeMap::new();
        let mut active = 0;
        for hap in haps.into_iter().filter(|hap| hap.is_active_at(now)) {
            let source = hap
                .context
                .get(DOC_ID_CONTEXT_KEY)
                .and_then(|id| id.parse::<DocumentId>().ok());
            if let Some(doc) = source {
                by_document.entry(doc).or_default().push(hap);
                active += 1;
            }
        }

        let mut failure = None;
        for doc in self.documents.load().iter() {
            let haps = by_document.remove(doc).unwrap_or_default();
            if let Err(err) = self.renderer.on_highlight(*doc, phase, &haps) {
                debug!(doc = %doc, "highlight renderer failed: {}", err);
                failure.get_or_insert(err);
            }
        }
        trace!(phase, begin = window.begin, active, "frame drawn");

        match failure {
            Some(err) => Err(err),
            None => Ok(Frame::Drawn {
                phase,
                window,
                active,
            }),
        }
    }

    /// Drive the loop from a tokio interval at `frame_rate` frames per
    /// second. `enabled` decides whether it starts drawing right away.
    /// A rate that is not a positive number falls back to
    /// [`DEFAULT_FRAME_RATE`].
    pub fn spawn(mut self, frame_rate: f64, enabled: bool) -> HighlightHandle {
        let (toggle, mut enabled_rx) = watch::channel(enabled);
        let period = frame_period(frame_rate).unwrap_or_else(|| {
            warn!(frame_rate, "unusable frame rate, using {}", DEFAULT_FRAME_RATE);
            Duration::from_secs_f64(1.0 / DEFAULT_FRAME_RATE)
        });

        let task = tokio::spawn(async move {
            if *enabled_rx.borrow_and_update() {
                self.start();
            }
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = enabled_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let enabled = *enabled_rx.borrow_and_update();
                        if enabled && !self.is_running() {
                            debug!("highlighting enabled");
                            self.start();
                        } else if !enabled && self.is_running() {
                            debug!("highlighting disabled");
                            self.stop();
                            self.renderer.clear_highlights();
                        }
                    }
                    _ = ticker.tick() => {
                        self.tick();
                    }
                }
            }
        });

        HighlightHandle { toggle, task }
    }
}

/// Time between frames, `None` unless `frame_rate` gives a positive,
/// representable period.
fn frame_period(frame_rate: f64) -> Option<Duration> {
    if !(frame_rate.is_finite() && frame_rate > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / frame_rate)
        .ok()
        .filter(|period| !period.is_zero())
}

/// Controls a spawned [`HighlightLoop`].
pub struct HighlightHandle {
    toggle: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HighlightHandle {
    pub fn start(&self) {
        self.toggle.send_replace(true);
    }

    pub fn stop(&self) {
        self.toggle.send_replace(false);
    }

    pub fn is_enabled(&self) -> bool {
        *self.toggle.borrow()
    }

    /// Stop the driver task.
    pub async fn shutdown(self) {
        drop(self.toggle);
        let _ = self.task.await;
    }
}
