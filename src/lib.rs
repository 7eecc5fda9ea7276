//! # Nudel - Live Pattern Session Runtime
//!
//! Nudel is the session-level engine of a collaborative live coding
//! environment. Several performers edit up to eight code panes at once; each
//! pane evaluates to a pattern, the patterns are layered into one composite
//! timeline that a cyclic scheduler plays, and a frame loop reports back which
//! events of which pane are sounding right now so editors can highlight them.
//!
//! ## Core Pieces
//!
//! - **Patterns**: the query contract of a pattern value ([`pattern`])
//! - **Evaluation**: source text to effective pattern, with named voices,
//!   muting and a global transform ([`eval`], [`bindings`])
//! - **Registry**: one active pattern per document, merged into a composite
//!   ([`registry`])
//! - **Scheduler**: serialized, latest-wins pattern updates on an external
//!   cyclic scheduler ([`scheduler`])
//! - **Highlighting**: per-frame active events per document ([`highlight`])
//! - **Session**: ties it all together on a tokio task ([`session`])
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use nudel::config::SessionSettings;
//! use nudel::document::DocumentId;
//! use nudel::observer::LogObserver;
//! use nudel::runtime::LineRuntime;
//! use nudel::scheduler::{SchedulerAdapter, VirtualCyclist, DEFAULT_CPS};
//! use nudel::session::Session;
//!
//! # tokio_test_block(async {
//! let cyclist = Arc::new(VirtualCyclist::silent(DEFAULT_CPS));
//! let scheduler = Arc::new(SchedulerAdapter::new(cyclist.clone()));
//! let mut session = Session::new(
//!     SessionSettings::default(),
//!     Arc::new(LineRuntime),
//!     scheduler,
//!     Arc::new(LogObserver),
//!     Arc::new(LogObserver),
//! );
//!
//! let doc = DocumentId::new(1).unwrap();
//! assert!(session.evaluate(doc, "$: bd ~ sn ~", false).await);
//! assert_eq!(cyclist.advance(2.0), 2);
//! # });
//! # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod bindings;
pub mod config;
pub mod document;
pub mod error;
pub mod eval;
pub mod highlight;
pub mod observer;
pub mod pattern;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod session;

pub use config::SessionConfig;
pub use document::DocumentId;
pub use error::{ConfigError, DrawError, EvalError, SchedulerError, SessionError};
pub use eval::{EvalScope, Evaluated, MiniLocation, PatternRuntime, ReturnValue};
pub use highlight::{Frame, HighlightHandle, HighlightLoop};
pub use observer::{ErrorSink, LogObserver, Renderer};
pub use pattern::{ControlPattern, Hap, Pattern, Value};
pub use scheduler::{Cyclist, SchedulerAdapter, VirtualCyclist};
pub use session::{Session, SessionHandle};
