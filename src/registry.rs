//! Document pattern registry
//!
//! Holds the active pattern of every document and the composite built from
//! them. Changes are staged first so the session can hand the new composite
//! to the scheduler and only commit once it was accepted.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::document::{DocumentId, DOC_ID_CONTEXT_KEY};
use crate::pattern::{ControlPattern, Pattern};

/// Known documents, readable without locking from the highlight loop.
pub type DocumentSet = Arc<ArcSwap<Vec<DocumentId>>>;

#[derive(Debug, Clone)]
enum Change {
    Set(DocumentId, ControlPattern),
    Remove(DocumentId),
}

/// A registry change together with the composite it would produce.
#[derive(Debug, Clone)]
pub struct Staged {
    change: Change,
    composite: ControlPattern,
}

impl Staged {
    pub fn composite(&self) -> &ControlPattern {
        &self.composite
    }

    pub fn document(&self) -> DocumentId {
        match self.change {
            Change::Set(doc, _) | Change::Remove(doc) => doc,
        }
    }
}

#[derive(Debug)]
pub struct DocumentRegistry {
    patterns: BTreeMap<DocumentId, ControlPattern>,
    documents: DocumentSet,
}

impl Default for DocumentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self {
            patterns: BTreeMap::new(),
            documents: Arc::new(ArcSwap::from_pointee(Vec::new())),
        }
    }

    /// Mark every event of `pattern` as coming from `doc`.
    pub fn tag(doc: DocumentId, pattern: ControlPattern) -> ControlPattern {
        pattern.with_context(DOC_ID_CONTEXT_KEY, &doc.to_string())
    }

    /// Prepare replacing (or creating) the pattern of `doc`.
    pub fn stage_set(&self, doc: DocumentId, pattern: ControlPattern) -> Staged {
        let tagged = Self::tag(doc, pattern);
        let mut patterns = self.patterns.clone();
        patterns.insert(doc, tagged.clone());
        Staged {
            change: Change::Set(doc, tagged),
            composite: merge(&patterns),
        }
    }

    /// Prepare tearing down `doc`; `None` if it was never registered.
    pub fn stage_remove(&self, doc: DocumentId) -> Option<Staged> {
        if !self.patterns.contains_key(&doc) {
            return None;
        }
        let mut patterns = self.patterns.clone();
        patterns.remove(&doc);
        Some(Staged {
            change: Change::Remove(doc),
            composite: merge(&patterns),
        })
    }

    pub fn commit(&mut self, staged: Staged) {
        match staged.change {
            Change::Set(doc, pattern) => {
                debug!(doc = %doc, "document pattern committed");
                self.patterns.insert(doc, pattern);
            }
            Change::Remove(doc) => {
                debug!(doc = %doc, "document removed");
                self.patterns.remove(&doc);
            }
        }
        self.documents
            .store(Arc::new(self.patterns.keys().copied().collect()));
    }

    /// Replace the pattern of `doc` and return the new composite.
    pub fn set(&mut self, doc: DocumentId, pattern: ControlPattern) -> ControlPattern {
        let staged = self.stage_set(doc, pattern);
        let composite = staged.composite.clone();
        self.commit(staged);
        composite
    }

    /// Remove `doc` and return the new composite.
    pub fn remove(&mut self, doc: DocumentId) -> ControlPattern {
        if let Some(staged) = self.stage_remove(doc) {
            self.commit(staged);
        }
        self.composite()
    }

    /// Stack of every registered document pattern.
    pub fn composite(&self) -> ControlPattern {
        merge(&self.patterns)
    }

    pub fn get(&self, doc: DocumentId) -> Option<&ControlPattern> {
        self.patterns.get(&doc)
    }

    pub fn contains(&self, doc: DocumentId) -> bool {
        self.patterns.contains_key(&doc)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn documents(&self) -> Vec<DocumentId> {
        self.patterns.keys().copied().collect()
    }

    /// Shared view of the registered documents.
    pub fn document_set(&self) -> DocumentSet {
        self.documents.clone()
    }
}

fn merge(patterns: &BTreeMap<DocumentId, ControlPattern>) -> ControlPattern {
    Pattern::stack(patterns.values().cloned().collect())
}
