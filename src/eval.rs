//! Evaluation building blocks
//!
//! The pattern runtime executes source text with an [`EvalScope`]: the set of
//! session capabilities one evaluation may use (binding voices, muting,
//! registering a global transform, changing tempo). What the runtime returns
//! is turned into the document's effective pattern by
//! [`resolve_effective_pattern`].

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bindings::BindingTable;
use crate::document::DocumentId;
use crate::error::{panic_message, EvalError};
use crate::pattern::{ControlPattern, Pattern, Value};
use crate::scheduler::{BoxFuture, SchedulerAdapter};

/// Analysis channel tagged onto payloads when auto-analysis is on.
pub const DEFAULT_ANALYZE_CHANNEL: &str = "flok-master";

/// Payload key naming the analysis channel.
pub const ANALYZE_KEY: &str = "analyze";

/// Function applied to every document's effective pattern (`all`).
pub type Transform = Arc<dyn Fn(ControlPattern) -> ControlPattern + Send + Sync>;

/// Byte range of source text that produced part of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniLocation {
    pub start: usize,
    pub end: usize,
}

impl MiniLocation {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Whatever the evaluated code produced as its final expression.
#[derive(Debug, Clone)]
pub enum ReturnValue {
    Pattern(ControlPattern),
    Value(Value),
    Undefined,
}

/// Output of one run of the pattern runtime.
#[derive(Debug, Clone)]
pub struct Evaluated {
    pub result: ReturnValue,
    pub mini_locations: Vec<MiniLocation>,
}

/// The external pattern language.
pub trait PatternRuntime: Send + Sync {
    fn evaluate<'a>(
        &'a self,
        code: &'a str,
        scope: &'a mut EvalScope<'_>,
    ) -> BoxFuture<'a, Result<Evaluated, EvalError>>;
}

/// Per-session evaluation state: the binding table and the global transform.
#[derive(Default)]
pub struct EvalState {
    pub bindings: BindingTable,
    transform: Option<Transform>,
}

impl fmt::Debug for EvalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalState")
            .field("bindings", &self.bindings)
            .field("transform", &self.transform.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl EvalState {
    /// Forget bindings, the anonymous counter and the global transform.
    pub fn reset(&mut self) {
        self.bindings.reset();
        self.transform = None;
    }

    pub fn transform(&self) -> Option<&Transform> {
        self.transform.as_ref()
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = Some(transform);
    }
}

/// Capabilities handed to the runtime for a single evaluation.
pub struct EvalScope<'s> {
    document: DocumentId,
    state: &'s mut EvalState,
    scheduler: &'s SchedulerAdapter,
}

impl<'s> EvalScope<'s> {
    pub fn new(
        document: DocumentId,
        state: &'s mut EvalState,
        scheduler: &'s SchedulerAdapter,
    ) -> Self {
        Self {
            document,
            state,
            scheduler,
        }
    }

    /// The document being evaluated.
    pub fn document(&self) -> DocumentId {
        self.document
    }

    /// Register a voice (`pattern.p(name)`); see [`BindingTable::bind`].
    pub fn bind(&mut self, name: &str, pattern: ControlPattern) -> ControlPattern {
        self.state.bindings.bind(name, pattern)
    }

    /// Silence in place of `pattern`, nothing bound (`pattern.q()`).
    pub fn mute(&self, _pattern: ControlPattern) -> ControlPattern {
        self.state.bindings.allow_silent_bind()
    }

    pub fn allow_silent_bind(&self) -> ControlPattern {
        self.state.bindings.allow_silent_bind()
    }

    /// Apply `transform` to the effective pattern (`all(f)`).
    pub fn all(
        &mut self,
        transform: impl Fn(ControlPattern) -> ControlPattern + Send + Sync + 'static,
    ) -> ControlPattern {
        self.state.set_transform(Arc::new(transform));
        Pattern::silence()
    }

    pub fn set_cps(&self, cps: f64) -> Result<(), EvalError> {
        self.scheduler.set_tempo(cps)?;
        Ok(())
    }

    /// Cycles per minute.
    pub fn set_cpm(&self, cpm: f64) -> Result<(), EvalError> {
        self.set_cps(cpm / 60.0)
    }

    /// Drop everything bound so far in this evaluation.
    pub fn hush(&mut self) -> ControlPattern {
        self.state.reset();
        Pattern::silence()
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.state.bindings
    }
}

/// Decide which pattern a finished evaluation commits.
///
/// Bound voices win over the returned value. Without bindings the returned
/// value is used if it is a pattern, otherwise the document falls silent.
/// The global transform and analysis tagging are applied last.
pub fn resolve_effective_pattern(
    document: DocumentId,
    result: ReturnValue,
    state: &EvalState,
    analyze_channel: Option<&str>,
) -> ControlPattern {
    let pattern = match state.bindings.merged() {
        Some(merged) => merged,
        None => match result {
            ReturnValue::Pattern(pattern) => pattern,
            ReturnValue::Value(_) | ReturnValue::Undefined => {
                warn!(
                    doc = %document,
                    "no pattern found, falling back to silence (bind voices with `$:`)"
                );
                Pattern::silence()
            }
        },
    };

    let pattern = match state.transform() {
        Some(transform) => transform(pattern),
        None => pattern,
    };

    match analyze_channel {
        Some(channel) => tag_analysis(pattern, channel),
        None => pattern,
    }
}

/// Add `analyze: channel` to object payloads that do not name a channel.
pub fn tag_analysis(pattern: ControlPattern, channel: &str) -> ControlPattern {
    let channel = Value::String(channel.to_string());
    pattern.fmap(move |mut value| {
        if let Value::Object(controls) = &mut value {
            let entry = controls.entry(ANALYZE_KEY).or_insert(Value::Null);
            if entry.is_null() {
                *entry = channel.clone();
            }
        }
        value
    })
}

/// Future adapter turning a panic while polling into [`EvalError::Panicked`].
pub struct CatchPanic<F> {
    inner: Pin<Box<F>>,
}

impl<F> CatchPanic<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl<F, T> Future for CatchPanic<F>
where
    F: Future<Output = Result<T, EvalError>>,
{
    type Output = Result<T, EvalError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.inner.as_mut();
        match catch_unwind(AssertUnwindSafe(|| inner.poll(cx))) {
            Ok(poll) => poll,
            Err(payload) => Poll::Ready(Err(EvalError::Panicked(panic_message(payload)))),
        }
    }
}
