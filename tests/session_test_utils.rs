//! Shared fixtures for session integration tests
//!
//! Builds a session on the line runtime and a virtual scheduler, with a
//! recorder standing in for both the editor renderer and the error display.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use nudel::config::SessionSettings;
use nudel::document::{DocumentId, DOC_ID_CONTEXT_KEY};
use nudel::error::DrawError;
use nudel::eval::MiniLocation;
use nudel::observer::{ErrorSink, Renderer};
use nudel::pattern::{ControlPattern, Hap, Value};
use nudel::runtime::LineRuntime;
use nudel::scheduler::{SchedulerAdapter, VirtualCyclist, DEFAULT_CPS};
use nudel::session::Session;

/// One `on_highlight` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    pub doc: DocumentId,
    pub phase: f64,
    pub sounds: Vec<String>,
}

#[derive(Default)]
pub struct Recorder {
    pub highlights: Mutex<Vec<Highlight>>,
    pub errors: Mutex<Vec<(String, DocumentId)>>,
    pub draw_errors: Mutex<Vec<DrawError>>,
    pub mini_locations: Mutex<Vec<(DocumentId, Vec<MiniLocation>)>>,
    pub cleared: Mutex<usize>,
}

impl Recorder {
    pub fn errors(&self) -> Vec<(String, DocumentId)> {
        self.errors.lock().unwrap().clone()
    }

    pub fn highlights(&self) -> Vec<Highlight> {
        self.highlights.lock().unwrap().clone()
    }

    pub fn mini_locations(&self) -> Vec<(DocumentId, Vec<MiniLocation>)> {
        self.mini_locations.lock().unwrap().clone()
    }
}

impl Renderer for Recorder {
    fn on_highlight(
        &self,
        doc: DocumentId,
        phase: f64,
        haps: &[Hap<Value>],
    ) -> Result<(), DrawError> {
        self.highlights.lock().unwrap().push(Highlight {
            doc,
            phase,
            sounds: haps.iter().map(sound).collect(),
        });
        Ok(())
    }

    fn on_update_mini_locations(&self, doc: DocumentId, locations: &[MiniLocation]) {
        self.mini_locations
            .lock()
            .unwrap()
            .push((doc, locations.to_vec()));
    }

    fn clear_highlights(&self) {
        *self.cleared.lock().unwrap() += 1;
    }
}

impl ErrorSink for Recorder {
    fn on_error(&self, message: &str, doc: DocumentId) {
        self.errors.lock().unwrap().push((message.to_string(), doc));
    }

    fn on_draw_error(&self, error: &DrawError) {
        self.draw_errors.lock().unwrap().push(error.clone());
    }
}

pub struct Fixture {
    pub session: Session,
    pub cyclist: Arc<VirtualCyclist>,
    pub recorder: Arc<Recorder>,
}

pub fn fixture() -> Fixture {
    fixture_with(SessionSettings::default())
}

pub fn fixture_with(settings: SessionSettings) -> Fixture {
    let cyclist = Arc::new(VirtualCyclist::silent(DEFAULT_CPS));
    let scheduler = Arc::new(SchedulerAdapter::new(cyclist.clone()));
    let recorder = Arc::new(Recorder::default());
    let session = Session::new(
        settings,
        Arc::new(LineRuntime),
        scheduler,
        recorder.clone(),
        recorder.clone(),
    );
    Fixture {
        session,
        cyclist,
        recorder,
    }
}

pub fn doc(slot: u8) -> DocumentId {
    DocumentId::new(slot).unwrap()
}

/// Sound name of an event, with the sample index if there is one.
pub fn sound(hap: &Hap<Value>) -> String {
    match (hap.value["s"].as_str(), hap.value.get("n")) {
        (Some(s), Some(n)) => format!("{}:{}", s, n),
        (Some(s), None) => s.to_string(),
        _ => hap.value.to_string(),
    }
}

/// Sorted `(document, sound)` pairs of one cycle of `pattern`.
pub fn cycle_contents(pattern: &ControlPattern, cycle: f64) -> Vec<(String, String)> {
    let mut contents: Vec<(String, String)> = pattern
        .query_arc(cycle, cycle + 1.0)
        .iter()
        .map(|hap| {
            (
                hap.context.get(DOC_ID_CONTEXT_KEY).cloned().unwrap_or_default(),
                sound(hap),
            )
        })
        .collect();
    contents.sort();
    contents
}

/// What the scheduler plays in the first cycle.
pub fn playing(fixture: &Fixture) -> Vec<(String, String)> {
    fixture
        .session
        .scheduler()
        .pattern()
        .map(|pattern| cycle_contents(&pattern, 0.0))
        .unwrap_or_default()
}

pub fn pair(doc: &str, sound: &str) -> (String, String) {
    (doc.to_string(), sound.to_string())
}
