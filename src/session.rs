//! The live session
//!
//! A [`Session`] owns everything one collaborative performance shares: the
//! document registry, the binding table, the global transform and the handle
//! to the scheduler. Evaluations run one at a time; [`Session::spawn`] moves
//! the session onto a tokio task fed through a [`SessionHandle`] so that
//! editors on other tasks can submit code without further coordination.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionSettings;
use crate::document::DocumentId;
use crate::error::{panic_message, EvalError, SchedulerError, SessionError};
use crate::eval::{resolve_effective_pattern, CatchPanic, EvalScope, EvalState, PatternRuntime};
use crate::highlight::HighlightLoop;
use crate::observer::{ErrorSink, Renderer};
use crate::pattern::{ControlPattern, Pattern};
use crate::registry::{DocumentRegistry, DocumentSet, Staged};
use crate::scheduler::SchedulerAdapter;

/// Commands waiting for the session task before senders are held back.
const COMMAND_QUEUE: usize = 64;

pub struct Session {
    settings: SessionSettings,
    runtime: Arc<dyn PatternRuntime>,
    scheduler: Arc<SchedulerAdapter>,
    registry: DocumentRegistry,
    state: EvalState,
    renderer: Arc<dyn Renderer>,
    errors: Arc<dyn ErrorSink>,
}

impl Session {
    pub fn new(
        settings: SessionSettings,
        runtime: Arc<dyn PatternRuntime>,
        scheduler: Arc<SchedulerAdapter>,
        renderer: Arc<dyn Renderer>,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            settings,
            runtime,
            scheduler,
            registry: DocumentRegistry::new(),
            state: EvalState::default(),
            renderer,
            errors,
        }
    }

    /// Evaluate `code` for `doc` and commit the result.
    ///
    /// Never fails: errors are reported to the error sink once and the
    /// document keeps playing its previous pattern. Returns whether a new
    /// pattern was committed.
    pub async fn evaluate(&mut self, doc: DocumentId, code: &str, conversational: bool) -> bool {
        match self.try_evaluate(doc, code, conversational).await {
            Ok(()) => true,
            Err(err) => {
                warn!(doc = %doc, "evaluation failed: {}", err);
                self.errors.on_error(&err.to_string(), doc);
                false
            }
        }
    }

    /// Like [`Session::evaluate`] but hands the error back instead of
    /// reporting it.
    pub async fn try_evaluate(
        &mut self,
        doc: DocumentId,
        code: &str,
        conversational: bool,
    ) -> Result<(), EvalError> {
        if !conversational {
            self.state.reset();
        }

        let evaluated = {
            let mut scope = EvalScope::new(doc, &mut self.state, &self.scheduler);
            CatchPanic::new(self.runtime.evaluate(code, &mut scope)).await?
        };

        // An empty list clears the marks of the previous evaluation.
        self.renderer
            .on_update_mini_locations(doc, &evaluated.mini_locations);

        let analyze_channel = self
            .settings
            .auto_analyze
            .then_some(self.settings.analyze_channel.as_str());
        let state = &self.state;
        let pattern = catch_unwind(AssertUnwindSafe(|| {
            resolve_effective_pattern(doc, evaluated.result, state, analyze_channel)
        }))
        .map_err(|payload| EvalError::Panicked(panic_message(payload)))?;

        self.set_document_pattern(doc, pattern).await?;
        debug!(doc = %doc, bindings = self.state.bindings.len(), "evaluated");
        Ok(())
    }

    /// Replace the pattern of `doc` and push the new composite.
    ///
    /// The registry is only updated once the scheduler accepted the
    /// composite.
    pub async fn set_document_pattern(
        &mut self,
        doc: DocumentId,
        pattern: ControlPattern,
    ) -> Result<(), SchedulerError> {
        let staged = self.registry.stage_set(doc, pattern);
        self.push(staged, true).await
    }

    /// Tear `doc` down. Unknown documents are ignored.
    pub async fn remove_document(&mut self, doc: DocumentId) -> Result<(), SchedulerError> {
        match self.registry.stage_remove(doc) {
            Some(staged) => self.push(staged, false).await,
            None => Ok(()),
        }
    }

    /// Silence `doc` while keeping it registered.
    pub async fn stop_document(&mut self, doc: DocumentId) -> Result<(), SchedulerError> {
        info!(doc = %doc, "stopping document");
        self.set_document_pattern(doc, Pattern::silence()).await
    }

    /// Reset the evaluation state and silence every document.
    pub async fn hush(&mut self) -> Result<(), SchedulerError> {
        info!("hush");
        self.state.reset();
        for doc in self.registry.documents() {
            self.set_document_pattern(doc, Pattern::silence()).await?;
        }
        Ok(())
    }

    /// Forget bindings, the anonymous counter and the global transform.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    async fn push(&mut self, staged: Staged, reset_phase: bool) -> Result<(), SchedulerError> {
        self.scheduler
            .set_pattern(staged.composite().clone(), reset_phase)
            .await?;
        self.registry.commit(staged);
        Ok(())
    }

    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    pub fn state(&self) -> &EvalState {
        &self.state
    }

    pub fn scheduler(&self) -> &Arc<SchedulerAdapter> {
        &self.scheduler
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// A frame loop drawing this session's composite to its renderer.
    pub fn highlight_loop(&self) -> HighlightLoop {
        HighlightLoop::new(
            self.scheduler.clone(),
            self.registry.document_set(),
            self.renderer.clone(),
            self.errors.clone(),
        )
    }

    /// Run the session on its own task. The task ends once every handle was
    /// dropped or [`SessionHandle::shutdown`] was called, and yields the
    /// session back.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<Session>) {
        let (commands, mut inbox) = mpsc::channel(COMMAND_QUEUE);
        let handle = SessionHandle {
            commands,
            scheduler: self.scheduler.clone(),
            documents: self.registry.document_set(),
        };

        let task = tokio::spawn(async move {
            let mut session = self;
            while let Some(command) = inbox.recv().await {
                match command {
                    SessionCommand::Evaluate {
                        doc,
                        code,
                        conversational,
                        reply,
                    } => {
                        let committed = session.evaluate(doc, &code, conversational).await;
                        let _ = reply.send(committed);
                    }
                    SessionCommand::StopDocument { doc, reply } => {
                        let _ = reply.send(session.stop_document(doc).await);
                    }
                    SessionCommand::RemoveDocument { doc, reply } => {
                        let _ = reply.send(session.remove_document(doc).await);
                    }
                    SessionCommand::Hush { reply } => {
                        let _ = reply.send(session.hush().await);
                    }
                    SessionCommand::Shutdown => break,
                }
            }
            debug!("session task finished");
            session
        });

        (handle, task)
    }
}

enum SessionCommand {
    Evaluate {
        doc: DocumentId,
        code: String,
        conversational: bool,
        reply: oneshot::Sender<bool>,
    },
    StopDocument {
        doc: DocumentId,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    RemoveDocument {
        doc: DocumentId,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    Hush {
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    Shutdown,
}

/// Cloneable access to a spawned [`Session`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    scheduler: Arc<SchedulerAdapter>,
    documents: DocumentSet,
}

impl SessionHandle {
    /// Queue an evaluation and wait for it to finish. `Ok(false)` means the
    /// evaluation failed and was reported to the error sink.
    pub async fn evaluate(
        &self,
        doc: DocumentId,
        code: impl Into<String>,
        conversational: bool,
    ) -> Result<bool, SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Evaluate {
            doc,
            code: code.into(),
            conversational,
            reply,
        })
        .await?;
        response.await.map_err(|_| SessionError::Closed)
    }

    pub async fn stop_document(&self, doc: DocumentId) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::StopDocument { doc, reply }).await?;
        response.await.map_err(|_| SessionError::Closed)??;
        Ok(())
    }

    pub async fn remove_document(&self, doc: DocumentId) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::RemoveDocument { doc, reply }).await?;
        response.await.map_err(|_| SessionError::Closed)??;
        Ok(())
    }

    pub async fn hush(&self) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Hush { reply }).await?;
        response.await.map_err(|_| SessionError::Closed)??;
        Ok(())
    }

    /// Ask the session task to stop after the commands already queued.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown).await
    }

    pub fn scheduler(&self) -> &Arc<SchedulerAdapter> {
        &self.scheduler
    }

    /// Documents with a committed pattern.
    pub fn documents(&self) -> Vec<DocumentId> {
        self.documents.load().to_vec()
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }
}
