//! Runtime values and their types.
//!
//! Values are plain data: cloning a value never shares mutable state, which
//! is what lets a whole runtime be snapshotted by `Clone`. Machine references
//! are carried as [`InterfaceValue`] handles that pair the target id with the
//! events the holder is allowed to send through it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::machine::MachineId;

/// Runtime value stored in fields, locals, and payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// The null value (also the absent payload).
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// String.
    Str(String),
    /// Event value.
    Event(Event),
    /// Capability-restricted machine handle.
    Machine(InterfaceValue),
    /// Fixed-arity tuple.
    Tuple(Vec<Value>),
    /// Homogeneous sequence.
    Seq(Vec<Value>),
}

impl Value {
    /// Whether this is the null value.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Boolean content, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer content, if this is an `Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Event content, if this is an `Event`.
    #[must_use]
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Self::Event(e) => Some(e),
            _ => None,
        }
    }

    /// Machine handle, if this is a `Machine`.
    #[must_use]
    pub fn as_machine(&self) -> Option<&InterfaceValue> {
        match self {
            Self::Machine(m) => Some(m),
            _ => None,
        }
    }

    /// Runtime type-membership check.
    #[must_use]
    pub fn inhabits(&self, ty: &PrtType) -> bool {
        inhabits_type(self, ty)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "\"{s}\""),
            Self::Event(e) => write!(f, "{e}"),
            Self::Machine(m) => write!(f, "{m}"),
            Self::Tuple(items) => {
                write!(f, "(")?;
                write_joined(f, items)?;
                write!(f, ")")
            }
            Self::Seq(items) => {
                write!(f, "[")?;
                write_joined(f, items)?;
                write!(f, "]")
            }
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Declared type of a field, local, or event payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrtType {
    /// No payload. Only `null` inhabits it.
    Null,
    /// Any value.
    Any,
    /// Booleans.
    Bool,
    /// Integers.
    Int,
    /// Strings.
    Str,
    /// Events (or null).
    Event,
    /// Machine handles (or null).
    Machine,
    /// Tuples with the given component types.
    Tuple(Vec<PrtType>),
    /// Sequences with the given element type.
    Seq(Box<PrtType>),
}

impl fmt::Display for PrtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Any => write!(f, "any"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Str => write!(f, "string"),
            Self::Event => write!(f, "event"),
            Self::Machine => write!(f, "machine"),
            Self::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Self::Seq(elem) => write!(f, "seq[{elem}]"),
        }
    }
}

/// Whether `value` is a member of `ty`.
#[must_use]
pub fn inhabits_type(value: &Value, ty: &PrtType) -> bool {
    match (ty, value) {
        (PrtType::Any, _) => true,
        (PrtType::Null, Value::Null) => true,
        (PrtType::Bool, Value::Bool(_)) => true,
        (PrtType::Int, Value::Int(_)) => true,
        (PrtType::Str, Value::Str(_)) => true,
        (PrtType::Event, Value::Event(_) | Value::Null) => true,
        (PrtType::Machine, Value::Machine(_) | Value::Null) => true,
        (PrtType::Tuple(types), Value::Tuple(items)) => {
            types.len() == items.len()
                && types.iter().zip(items).all(|(t, v)| inhabits_type(v, t))
        }
        (PrtType::Seq(elem), Value::Seq(items)) => items.iter().all(|v| inhabits_type(v, elem)),
        _ => false,
    }
}

/// Handle to a machine, restricted to a permitted event set.
///
/// Permissions are fixed when the handle is created; every send through the
/// handle is checked against them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceValue {
    machine: MachineId,
    permissions: Arc<BTreeSet<Event>>,
}

impl InterfaceValue {
    /// Create a handle to `machine` allowing `permissions`.
    #[must_use]
    pub fn new(machine: MachineId, permissions: Arc<BTreeSet<Event>>) -> Self {
        Self {
            machine,
            permissions,
        }
    }

    /// Target machine.
    #[must_use]
    pub fn machine(&self) -> MachineId {
        self.machine
    }

    /// Events that may be sent through this handle.
    #[must_use]
    pub fn permissions(&self) -> &BTreeSet<Event> {
        &self.permissions
    }

    /// Whether `event` may be sent through this handle.
    #[must_use]
    pub fn permits(&self, event: &Event) -> bool {
        self.permissions.contains(event)
    }
}

impl fmt::Display for InterfaceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<machine {}>", self.machine)
    }
}
