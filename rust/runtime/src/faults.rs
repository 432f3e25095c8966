//! Fault taxonomy and machine-readable mapping helpers.
//!
//! A [`Fault`] terminates the execution branch it occurs on. The explorer
//! decides what to do with it by [`classify_fault`]: infeasible branches are
//! discarded silently, defects are reported, internal faults indicate a bug
//! in the runtime or in the translated program tables.

use serde::{Deserialize, Serialize};

/// Run-terminating fault raised while executing machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum Fault {
    /// Null event, non-handle target, or forbidden event in a send/announce.
    #[error("illegal enqueue: {message}")]
    IllegalEnqueue {
        /// Why the enqueue was rejected.
        message: String,
    },
    /// Payload does not inhabit the event's declared type.
    #[error("inhabits type failure: {message}")]
    InhabitsType {
        /// Description of the mismatch.
        message: String,
    },
    /// Explicit `pop` with nothing left on the control stack.
    #[error("{machine} executed pop with an empty state stack")]
    InvalidPopStatement {
        /// Display name of the machine.
        machine: String,
    },
    /// Control stack exhausted while handling a non-halt event.
    #[error("{machine} failed to handle event {event}")]
    UnhandledEvent {
        /// Display name of the machine.
        machine: String,
        /// Name of the unhandled event.
        event: String,
    },
    /// Mailbox multiplicity bound exceeded.
    #[error("attempting to enqueue event {event} more than max instance of {max}")]
    MaxInstancesExceeded {
        /// Event name.
        event: String,
        /// Declared bound.
        max: usize,
    },
    /// Per-machine mailbox size bound exceeded.
    #[error("{machine} exceeded max buffer size of {max}")]
    MaxBufferSizeExceeded {
        /// Display name of the machine.
        machine: String,
        /// Declared bound.
        max: usize,
    },
    /// An assumed bound was exceeded: the path is infeasible.
    #[error("assume failure on event {event}")]
    AssumeFailure {
        /// Event whose assumed bound was exceeded.
        event: String,
    },
    /// A program assertion failed.
    #[error("assertion failed in {machine}: {message}")]
    AssertionFailed {
        /// Display name of the machine.
        machine: String,
        /// Assertion message.
        message: String,
    },
    /// Runtime invariant violation.
    #[error("internal runtime error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

impl Fault {
    /// Build an internal fault.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Build an illegal-enqueue fault.
    #[must_use]
    pub fn illegal_enqueue(message: impl Into<String>) -> Self {
        Self::IllegalEnqueue {
            message: message.into(),
        }
    }

    /// Taxonomy class of this fault.
    #[must_use]
    pub fn class(&self) -> FaultClass {
        classify_fault(self)
    }

    /// Whether the branch should be discarded rather than reported.
    #[must_use]
    pub fn is_infeasible(&self) -> bool {
        self.class() == FaultClass::Infeasible
    }
}

/// Stable fault taxonomy used by explorers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultClass {
    /// The path violates a stated assumption. Discard, do not report.
    Infeasible,
    /// A property violation in the program under test. Report.
    Defect,
    /// A runtime or translation bug.
    Internal,
}

/// Classify a concrete fault into the stable taxonomy.
#[must_use]
pub fn classify_fault(fault: &Fault) -> FaultClass {
    match fault {
        Fault::AssumeFailure { .. } => FaultClass::Infeasible,
        Fault::Internal { .. } => FaultClass::Internal,
        Fault::IllegalEnqueue { .. }
        | Fault::InhabitsType { .. }
        | Fault::InvalidPopStatement { .. }
        | Fault::UnhandledEvent { .. }
        | Fault::MaxInstancesExceeded { .. }
        | Fault::MaxBufferSizeExceeded { .. }
        | Fault::AssertionFailed { .. } => FaultClass::Defect,
    }
}

/// Stable machine-readable code for a concrete fault.
#[must_use]
pub fn fault_code(fault: &Fault) -> &'static str {
    match fault {
        Fault::IllegalEnqueue { .. } => "prt.fault.illegal_enqueue",
        Fault::InhabitsType { .. } => "prt.fault.inhabits_type",
        Fault::InvalidPopStatement { .. } => "prt.fault.invalid_pop",
        Fault::UnhandledEvent { .. } => "prt.fault.unhandled_event",
        Fault::MaxInstancesExceeded { .. } => "prt.fault.max_instances",
        Fault::MaxBufferSizeExceeded { .. } => "prt.fault.max_buffer_size",
        Fault::AssumeFailure { .. } => "prt.fault.assume",
        Fault::AssertionFailed { .. } => "prt.fault.assertion",
        Fault::Internal { .. } => "prt.fault.internal",
    }
}
