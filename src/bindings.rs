//! Named-binding table
//!
//! One evaluation may register any number of voices under names (`$:` in the
//! pattern language). When the table is non-empty its merged contents replace
//! the evaluation's top-level result.

use std::collections::BTreeMap;

use tracing::debug;

use crate::pattern::{ControlPattern, Pattern};

/// A name starting or ending with this marker is muted.
pub const MUTE_MARKER: char = '_';

/// Name rewritten to a fresh `$<n>` on every use.
pub const ANONYMOUS_MARKER: &str = "$";

/// True for `_name` and `name_`.
pub fn is_muted(name: &str) -> bool {
    name.starts_with(MUTE_MARKER) || name.ends_with(MUTE_MARKER)
}

#[derive(Debug, Default)]
pub struct BindingTable {
    bindings: BTreeMap<String, ControlPattern>,
    anonymous_index: usize,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pattern` under `name` and hand it back unchanged.
    ///
    /// Muted names store and return silence; they still occupy their slot so
    /// the evaluation counts as having bound something.
    pub fn bind(&mut self, name: &str, pattern: ControlPattern) -> ControlPattern {
        if is_muted(name) {
            debug!(name, "muted binding");
            self.bindings.insert(name.to_string(), Pattern::silence());
            return Pattern::silence();
        }

        let name = if name == ANONYMOUS_MARKER {
            let generated = format!("{}{}", ANONYMOUS_MARKER, self.anonymous_index);
            self.anonymous_index += 1;
            generated
        } else {
            name.to_string()
        };

        debug!(name = %name, "binding pattern");
        self.bindings.insert(name, pattern.clone());
        pattern
    }

    /// Silence that binds nothing.
    pub fn allow_silent_bind(&self) -> ControlPattern {
        Pattern::silence()
    }

    /// Drop every binding and restart anonymous naming at zero.
    pub fn reset(&mut self) {
        self.bindings.clear();
        self.anonymous_index = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ControlPattern> {
        self.bindings.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn anonymous_index(&self) -> usize {
        self.anonymous_index
    }

    /// Stack of every binding, or `None` when nothing was bound.
    pub fn merged(&self) -> Option<ControlPattern> {
        if self.bindings.is_empty() {
            None
        } else {
            Some(Pattern::stack(self.bindings.values().cloned().collect()))
        }
    }
}
