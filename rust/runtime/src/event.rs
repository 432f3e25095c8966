//! Event descriptors.
//!
//! An [`Event`] is a cheap shared handle to an immutable [`EventDecl`].
//! Equality, ordering, and hashing go by name, so two handles to
//! separately declared events with the same name are the same event.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::PrtType;

/// Name of the distinguished null event.
pub const NULL_EVENT: &str = "null";

/// Name of the distinguished halt event.
pub const HALT_EVENT: &str = "halt";

/// Static declaration of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDecl {
    /// Event name.
    pub name: String,
    /// Declared payload type.
    pub payload_type: PrtType,
    /// Maximum number of queued instances per mailbox (`None` = unbounded).
    pub max_instances: Option<usize>,
    /// Whether exceeding `max_instances` prunes the path instead of failing.
    pub assume: bool,
}

impl EventDecl {
    /// Declare an unbounded event.
    #[must_use]
    pub fn new(name: impl Into<String>, payload_type: PrtType) -> Self {
        Self {
            name: name.into(),
            payload_type,
            max_instances: None,
            assume: false,
        }
    }

    /// Bound the number of queued instances (`assert n`).
    #[must_use]
    pub fn with_max_instances(mut self, max: usize) -> Self {
        self.max_instances = Some(max);
        self
    }

    /// Bound the number of queued instances as an assumption (`assume n`).
    #[must_use]
    pub fn with_assumed_max_instances(mut self, max: usize) -> Self {
        self.max_instances = Some(max);
        self.assume = true;
        self
    }

    /// Finish the declaration.
    #[must_use]
    pub fn build(self) -> Event {
        Event(Arc::new(self))
    }
}

/// Shared handle to an event declaration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Arc<EventDecl>);

impl Event {
    /// Declare an unbounded event with the given payload type.
    #[must_use]
    pub fn new(name: impl Into<String>, payload_type: PrtType) -> Self {
        EventDecl::new(name, payload_type).build()
    }

    /// The null event, used for null transitions and never sendable.
    #[must_use]
    pub fn null() -> Self {
        Self::new(NULL_EVENT, PrtType::Null)
    }

    /// The halt event. An unhandled halt terminates the machine.
    #[must_use]
    pub fn halt() -> Self {
        Self::new(HALT_EVENT, PrtType::Any)
    }

    /// Event name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Declared payload type.
    #[must_use]
    pub fn payload_type(&self) -> &PrtType {
        &self.0.payload_type
    }

    /// Maximum queued instances, if bounded.
    #[must_use]
    pub fn max_instances(&self) -> Option<usize> {
        self.0.max_instances
    }

    /// Whether the instance bound is an assumption.
    #[must_use]
    pub fn is_assumed(&self) -> bool {
        self.0.assume
    }

    /// Whether this is the null event.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.name() == NULL_EVENT
    }

    /// Whether this is the halt event.
    #[must_use]
    pub fn is_halt(&self) -> bool {
        self.name() == HALT_EVENT
    }

    /// Full declaration.
    #[must_use]
    pub fn decl(&self) -> &EventDecl {
        &self.0
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.name() == other.name()
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name().cmp(other.name())
    }
}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({})", self.name())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
