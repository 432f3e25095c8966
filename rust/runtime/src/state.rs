//! Control states and the explicit control stack.
//!
//! [`State`]s are immutable after their machine definition is built and are
//! shared by `Arc` across every instance and every clone. Each frame of a
//! [`StateStack`] caches the effective deferred and action sets for its state,
//! derived from the frame beneath it when pushed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::fun::FunRef;

/// Index of a state within its machine definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateId(pub usize);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Liveness temperature of a state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Temperature {
    /// May rest here forever.
    Cold,
    /// Neutral.
    #[default]
    Warm,
    /// Must not be the final resting state.
    Hot,
}

/// In-state action for an event.
#[derive(Debug, Clone)]
pub enum DoHandler {
    /// Drop the event.
    Ignore,
    /// Run the function with the event payload.
    Fun(FunRef),
}

/// Event-triggered transition.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Target state.
    pub target: StateId,
    /// Function run between exit and entry (goto transitions only).
    pub fun: Option<FunRef>,
    /// Push the target on top instead of replacing the current state.
    pub is_push: bool,
}

/// A control state.
#[derive(Debug, Clone)]
pub struct State {
    /// State name.
    pub name: String,
    /// Entry function.
    pub entry: Option<FunRef>,
    /// Exit function.
    pub exit: Option<FunRef>,
    /// Transitions keyed by event.
    pub transitions: BTreeMap<Event, Transition>,
    /// Do-handlers keyed by event.
    pub dos: BTreeMap<Event, DoHandler>,
    /// Locally declared deferred events.
    pub deferred: BTreeSet<Event>,
    /// Whether a null-event transition exists.
    pub has_null_transition: bool,
    /// Liveness temperature.
    pub temperature: Temperature,
}

impl State {
    /// Create an empty warm state.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: None,
            exit: None,
            transitions: BTreeMap::new(),
            dos: BTreeMap::new(),
            deferred: BTreeSet::new(),
            has_null_transition: false,
            temperature: Temperature::Warm,
        }
    }

    /// Set the entry function.
    #[must_use]
    pub fn on_entry(mut self, fun: FunRef) -> Self {
        self.entry = Some(fun);
        self
    }

    /// Set the exit function.
    #[must_use]
    pub fn on_exit(mut self, fun: FunRef) -> Self {
        self.exit = Some(fun);
        self
    }

    /// `on event goto target [with fun]`.
    #[must_use]
    pub fn on_goto(mut self, event: &Event, target: StateId, fun: Option<FunRef>) -> Self {
        if event.is_null() {
            self.has_null_transition = true;
        }
        self.transitions.insert(
            event.clone(),
            Transition {
                target,
                fun,
                is_push: false,
            },
        );
        self
    }

    /// `on event push target`.
    #[must_use]
    pub fn on_push(mut self, event: &Event, target: StateId) -> Self {
        if event.is_null() {
            self.has_null_transition = true;
        }
        self.transitions.insert(
            event.clone(),
            Transition {
                target,
                fun: None,
                is_push: true,
            },
        );
        self
    }

    /// `on event do fun`.
    #[must_use]
    pub fn on_do(mut self, event: &Event, fun: FunRef) -> Self {
        self.dos.insert(event.clone(), DoHandler::Fun(fun));
        self
    }

    /// `ignore event`.
    #[must_use]
    pub fn ignore(mut self, event: &Event) -> Self {
        self.dos.insert(event.clone(), DoHandler::Ignore);
        self
    }

    /// `defer event`.
    #[must_use]
    pub fn defer(mut self, event: &Event) -> Self {
        self.deferred.insert(event.clone());
        self
    }

    /// Set the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: Temperature) -> Self {
        self.temperature = temperature;
        self
    }

    /// Mark hot.
    #[must_use]
    pub fn hot(self) -> Self {
        self.with_temperature(Temperature::Hot)
    }

    /// Mark cold.
    #[must_use]
    pub fn cold(self) -> Self {
        self.with_temperature(Temperature::Cold)
    }
}

/// How the top state treats an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Stays queued.
    Deferred,
    /// Handled by an inherited or local do-handler.
    Actionable,
    /// Triggers a local transition.
    Transition,
    /// Not handled here; the state is popped.
    Unhandled,
}

/// One control-stack frame with its derived sets.
#[derive(Debug, Clone)]
pub struct StateFrame {
    /// The state.
    pub state: Arc<State>,
    /// Effective deferred set.
    pub deferred: BTreeSet<Event>,
    /// Effective action set.
    pub actions: BTreeSet<Event>,
}

impl Hash for StateFrame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.state.name.hash(state);
        self.state.temperature.hash(state);
    }
}

/// Explicit stack of active states.
#[derive(Debug, Clone, Default, Hash)]
pub struct StateStack {
    frames: Vec<StateFrame>,
}

impl StateStack {
    /// Create an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Top frame.
    #[must_use]
    pub fn top(&self) -> Option<&StateFrame> {
        self.frames.last()
    }

    /// Frames from top to bottom.
    pub fn iter_top_down(&self) -> impl Iterator<Item = &StateFrame> {
        self.frames.iter().rev()
    }

    /// Depth of the stack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the stack is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Push `state`, deriving its sets from the current top.
    ///
    /// Deferred: inherited ∪ own deferrals, minus own do-handlers and
    /// transitions. Actions: inherited minus own deferrals, plus own
    /// do-handlers, minus own transitions.
    pub fn push(&mut self, state: Arc<State>) {
        let mut deferred = self
            .top()
            .map(|f| f.deferred.clone())
            .unwrap_or_default();
        deferred.extend(state.deferred.iter().cloned());
        for ev in state.dos.keys().chain(state.transitions.keys()) {
            deferred.remove(ev);
        }

        let mut actions = self.top().map(|f| f.actions.clone()).unwrap_or_default();
        for ev in &state.deferred {
            actions.remove(ev);
        }
        actions.extend(state.dos.keys().cloned());
        for ev in state.transitions.keys() {
            actions.remove(ev);
        }

        self.frames.push(StateFrame {
            state,
            deferred,
            actions,
        });
    }

    /// Pop the top frame.
    pub fn pop(&mut self) -> Option<StateFrame> {
        self.frames.pop()
    }

    /// Whether the top state has a null transition or a null action.
    #[must_use]
    pub fn has_null_transition_or_action(&self) -> bool {
        self.top().is_some_and(|f| {
            f.state.has_null_transition || f.actions.iter().any(Event::is_null)
        })
    }

    /// Classify `event` against the top frame.
    #[must_use]
    pub fn disposition(&self, event: &Event) -> EventDisposition {
        let Some(top) = self.top() else {
            return EventDisposition::Unhandled;
        };
        if top.state.transitions.contains_key(event) {
            EventDisposition::Transition
        } else if top.actions.contains(event) {
            EventDisposition::Actionable
        } else if top.deferred.contains(event) {
            EventDisposition::Deferred
        } else {
            EventDisposition::Unhandled
        }
    }
}
