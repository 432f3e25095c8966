//! Resumable functions and the explicit call stack.
//!
//! Machines never run translated code on the host stack across a suspension
//! point. A function body is a small state machine keyed by the frame's
//! `return_to` location: on entry it pops its own frame, jumps to that
//! location, and before suspending it pushes a frame recording where to
//! resume and which locals are live. Because the whole call stack is plain
//! data, a machine can be cloned at any suspension point and the clone
//! resumes exactly where the original would.
//!
//! The stack is *inverted*: when a callee suspends, it pushes its frame
//! first and the caller pushes its own frame on top. Resuming runs the
//! outermost caller, which re-enters the callee.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::exec::ExecContext;
use crate::faults::Fault;
use crate::value::Value;

/// A unit of translated sequential code.
///
/// # Contract
///
/// `execute` must start by popping its own frame
/// ([`ExecContext::pop_frame`]) and must end by setting a continuation:
/// return, raise, goto, pop, or one of the suspending operations.
pub trait Fun: fmt::Debug + Send + Sync {
    /// Function name, used in diagnostics.
    fn name(&self) -> &str;

    /// Anonymous functions (handlers written inline) receive the current
    /// payload as their argument and are not logged on entry.
    fn is_anon(&self) -> bool {
        false
    }

    /// Build the initial local-variable vector from call arguments.
    fn create_locals(&self, args: &[Value]) -> Vec<Value>;

    /// Run until the function returns or must suspend.
    ///
    /// # Errors
    ///
    /// Returns a [`Fault`] if the body performs an illegal operation.
    fn execute(&self, cx: &mut ExecContext<'_>) -> Result<(), Fault>;
}

/// Shared reference to a function.
pub type FunRef = Arc<dyn Fun>;

/// Body of a [`BlockFun`]: receives the context and the popped frame.
pub type BlockBody = dyn Fn(&mut ExecContext<'_>, FunFrame) -> Result<(), Fault> + Send + Sync;

/// A function whose body is a host closure dispatching on the resume
/// location. This is the shape translated code takes.
pub struct BlockFun {
    name: String,
    anon: bool,
    num_locals: usize,
    body: Box<BlockBody>,
}

impl BlockFun {
    /// Anonymous handler with `num_locals` local slots.
    #[must_use]
    pub fn anon<F>(name: impl Into<String>, num_locals: usize, body: F) -> FunRef
    where
        F: Fn(&mut ExecContext<'_>, FunFrame) -> Result<(), Fault> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            anon: true,
            num_locals,
            body: Box::new(body),
        })
    }

    /// Named function with `num_locals` local slots.
    #[must_use]
    pub fn named<F>(name: impl Into<String>, num_locals: usize, body: F) -> FunRef
    where
        F: Fn(&mut ExecContext<'_>, FunFrame) -> Result<(), Fault> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            anon: false,
            num_locals,
            body: Box::new(body),
        })
    }
}

impl fmt::Debug for BlockFun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockFun")
            .field("name", &self.name)
            .field("anon", &self.anon)
            .field("num_locals", &self.num_locals)
            .finish_non_exhaustive()
    }
}

impl Fun for BlockFun {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_anon(&self) -> bool {
        self.anon
    }

    fn create_locals(&self, args: &[Value]) -> Vec<Value> {
        let mut locals = args.to_vec();
        if locals.len() < self.num_locals {
            locals.resize(self.num_locals, Value::Null);
        }
        locals
    }

    fn execute(&self, cx: &mut ExecContext<'_>) -> Result<(), Fault> {
        let frame = cx.pop_frame()?;
        (self.body)(cx, frame)
    }
}

/// One activation record on the call stack.
#[derive(Debug, Clone)]
pub struct FunFrame {
    /// The function this frame belongs to.
    pub fun: FunRef,
    /// Live local values.
    pub locals: Vec<Value>,
    /// Resume location, interpreted by the function.
    pub return_to: usize,
}

impl FunFrame {
    /// Fresh frame starting at location 0.
    #[must_use]
    pub fn new(fun: FunRef, locals: Vec<Value>) -> Self {
        Self {
            fun,
            locals,
            return_to: 0,
        }
    }

    /// Same frame, resuming at `location`.
    #[must_use]
    pub fn resume_at(mut self, location: usize) -> Self {
        self.return_to = location;
        self
    }

    /// Read a local, `Null` if out of range.
    #[must_use]
    pub fn local(&self, index: usize) -> Value {
        self.locals.get(index).cloned().unwrap_or_default()
    }

    /// Write a local, growing the vector if needed.
    pub fn set_local(&mut self, index: usize, value: Value) {
        if index >= self.locals.len() {
            self.locals.resize(index + 1, Value::Null);
        }
        self.locals[index] = value;
    }
}

impl Hash for FunFrame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fun.name().hash(state);
        self.return_to.hash(state);
        self.locals.hash(state);
    }
}

/// Explicit call stack.
#[derive(Debug, Clone, Default, Hash)]
pub struct FunStack {
    frames: Vec<FunFrame>,
}

impl FunStack {
    /// Create an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame.
    pub fn push(&mut self, frame: FunFrame) {
        self.frames.push(frame);
    }

    /// Pop the top frame.
    pub fn pop(&mut self) -> Option<FunFrame> {
        self.frames.pop()
    }

    /// Top frame.
    #[must_use]
    pub fn top(&self) -> Option<&FunFrame> {
        self.frames.last()
    }

    /// Number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the stack is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop all frames.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Why a machine's code last stopped running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContinuationReason {
    /// Function returned.
    #[default]
    Return,
    /// Waiting for a nondeterministic boolean.
    Nondet,
    /// Executed a `pop` statement.
    Pop,
    /// Raised an event.
    Raise,
    /// Blocked on a selective receive.
    Receive,
    /// Sent an event (scheduling point).
    Send,
    /// Created a machine (scheduling point).
    NewMachine,
    /// Executed a `goto` statement.
    Goto,
}

/// The record of why a machine suspended and what it needs to resume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Continuation {
    /// Why execution stopped.
    pub reason: ContinuationReason,
    /// Returned value (for `Return`).
    pub ret_val: Value,
    /// Locals to restore into the caller.
    pub ret_locals: Vec<Value>,
    nondet: bool,
}

impl Continuation {
    /// Reset reason and return data. The nondet choice survives.
    pub fn reset(&mut self) {
        self.reason = ContinuationReason::Return;
        self.ret_val = Value::Null;
        self.ret_locals.clear();
    }

    /// Record a return.
    pub fn set_return(&mut self, ret_val: Value, ret_locals: Vec<Value>) {
        self.reason = ContinuationReason::Return;
        self.ret_val = ret_val;
        self.ret_locals = ret_locals;
    }

    /// Store the choice for the pending nondet point.
    pub fn set_nondet(&mut self, choice: bool) {
        self.nondet = choice;
    }

    /// Consume the stored choice.
    pub fn take_nondet(&mut self) -> bool {
        std::mem::take(&mut self.nondet)
    }

    /// Peek at the stored choice without consuming it.
    #[must_use]
    pub fn nondet(&self) -> bool {
        self.nondet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> FunRef {
        BlockFun::named("noop", 2, |cx, frame| cx.ret(frame.locals))
    }

    #[test]
    fn test_create_locals_pads_to_declared_size() {
        let f = noop();
        assert_eq!(f.create_locals(&[Value::Int(1)]), vec![Value::Int(1), Value::Null]);
        assert_eq!(f.create_locals(&[]).len(), 2);
    }

    #[test]
    fn test_cloned_frames_are_independent() {
        let mut stack = FunStack::new();
        stack.push(FunFrame::new(noop(), vec![Value::Int(1)]).resume_at(3));
        let mut copy = stack.clone();
        if let Some(mut frame) = copy.pop() {
            frame.set_local(0, Value::Int(99));
            copy.push(frame);
        }
        assert_eq!(stack.top().map(|f| f.local(0)), Some(Value::Int(1)));
        assert_eq!(copy.top().map(|f| f.local(0)), Some(Value::Int(99)));
        assert_eq!(copy.top().map(|f| f.return_to), Some(3));
    }

    #[test]
    fn test_nondet_survives_reset_and_is_consumed_once() {
        let mut k = Continuation::default();
        k.set_nondet(true);
        k.reason = ContinuationReason::Nondet;
        k.reset();
        assert_eq!(k.reason, ContinuationReason::Return);
        assert!(k.take_nondet());
        assert!(!k.take_nondet());
    }
}
