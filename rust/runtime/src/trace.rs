//! Execution traces.
//!
//! [`VisibleTrace`] is the externally observable projection of a run, used
//! to compare two runs as black boxes. [`TraceLog`] is the human-readable
//! diagnostic log. Neither takes part in state hashing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One externally visible action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisibleAction {
    /// Interface or event name.
    pub name: String,
    /// Rendered payload.
    pub payload: String,
}

/// Ordered visible actions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibleTrace {
    actions: Vec<VisibleAction>,
}

impl VisibleTrace {
    /// Empty trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action.
    pub fn add_action(&mut self, name: impl Into<String>, payload: impl Into<String>) {
        self.actions.push(VisibleAction {
            name: name.into(),
            payload: payload.into(),
        });
    }

    /// Recorded actions in order.
    #[must_use]
    pub fn actions(&self) -> &[VisibleAction] {
        &self.actions
    }

    /// Number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Append-only diagnostic log.
#[derive(Debug, Clone, Default)]
pub struct TraceLog {
    enabled: bool,
    lines: Vec<String>,
}

impl TraceLog {
    /// New log; when `enabled` is false every line is discarded.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            lines: Vec::new(),
        }
    }

    /// Append one line.
    pub fn line(&mut self, line: impl FnOnce() -> String) {
        if self.enabled {
            self.lines.push(line());
        }
    }

    /// Recorded lines.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Lines carrying `tag`, e.g. `"<StateLog>"`.
    pub fn tagged<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.lines
            .iter()
            .filter(move |l| l.starts_with(tag))
            .map(String::as_str)
    }

    /// Drop all recorded lines.
    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl fmt::Display for TraceLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}
