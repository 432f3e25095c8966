//! The operations available to function bodies.
//!
//! A function receives an [`ExecContext`] naming the machine it runs on and
//! giving mutable access to the container, so a body can touch its own
//! machine and route side effects (sends, creations, announcements) through
//! the container in the same step.
//!
//! Terminal operations ([`ExecContext::ret`], [`ExecContext::raise`],
//! [`ExecContext::goto`], [`ExecContext::pop`]) only set the continuation.
//! Suspending operations (`cont_*`) also push the caller's resume frame;
//! the body must return immediately after calling one.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::trace;

use crate::event::Event;
use crate::faults::Fault;
use crate::fun::{ContinuationReason, FunFrame, FunRef};
use crate::machine::{Machine, MachineRef};
use crate::runtime::{check_payload, RuntimeState};
use crate::state::StateId;
use crate::value::{InterfaceValue, Value};

/// Result of calling a nested function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// The callee returned this value.
    Returned(Value),
    /// The callee suspended at a scheduling point. The caller must push its
    /// own resume frame with [`ExecContext::suspend_caller`] and return.
    Suspended,
    /// The callee raised, popped, or executed a goto. The caller must return
    /// without pushing a frame.
    Unwound,
}

/// Execution context of one function activation.
pub struct ExecContext<'a> {
    rt: &'a mut RuntimeState,
    me: MachineRef,
}

impl<'a> ExecContext<'a> {
    pub(crate) fn new(rt: &'a mut RuntimeState, me: MachineRef) -> Self {
        Self { rt, me }
    }

    /// The running machine's reference.
    #[must_use]
    pub fn me(&self) -> MachineRef {
        self.me
    }

    /// Read-only view of the container.
    #[must_use]
    pub fn runtime(&self) -> &RuntimeState {
        &*self.rt
    }

    /// The running machine.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] if the reference is dangling.
    pub fn machine(&self) -> Result<&Machine, Fault> {
        self.rt.machine_ref(self.me)
    }

    fn machine_mut(&mut self) -> Result<&mut Machine, Fault> {
        self.rt.machine_mut(self.me)
    }

    fn impl_only(&self, op: &str) -> Result<(), Fault> {
        match self.me {
            MachineRef::Impl(_) => Ok(()),
            MachineRef::Spec(_) => Err(Fault::internal(format!(
                "monitor {} cannot {op}",
                self.machine()?.display_name()
            ))),
        }
    }

    /// Pop this activation's frame. Every body starts with this.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] if the call stack is empty.
    pub fn pop_frame(&mut self) -> Result<FunFrame, Fault> {
        let m = self.machine_mut()?;
        let name = m.display_name();
        m.fun_stack
            .pop()
            .ok_or_else(|| Fault::internal(format!("{name} executed with an empty call stack")))
    }

    /// Push a frame. Named functions are logged on entry.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] if the machine reference is dangling.
    pub fn push_frame(&mut self, frame: FunFrame) -> Result<(), Fault> {
        push_fun_frame(self.rt, self.me, frame)
    }

    /// Handle to the running machine, exposing its declared permissions.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] when called by a monitor.
    pub fn this(&self) -> Result<Value, Fault> {
        match self.me {
            MachineRef::Impl(id) => {
                let perms = Arc::clone(self.machine()?.def().permissions());
                Ok(Value::Machine(InterfaceValue::new(id, perms)))
            }
            MachineRef::Spec(_) => Err(Fault::internal("monitors have no handle")),
        }
    }

    /// Read a field.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] if the machine reference is dangling.
    pub fn field(&self, index: usize) -> Result<Value, Fault> {
        Ok(self.machine()?.field(index))
    }

    /// Write a field.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] if the machine reference is dangling.
    pub fn set_field(&mut self, index: usize, value: Value) -> Result<(), Fault> {
        self.machine_mut()?.set_field(index, value);
        Ok(())
    }

    /// Current payload.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] if the machine reference is dangling.
    pub fn payload(&self) -> Result<Value, Fault> {
        Ok(self.machine()?.payload().clone())
    }

    /// Current trigger event.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] if the machine reference is dangling.
    pub fn trigger(&self) -> Result<Event, Fault> {
        Ok(self.machine()?.trigger().clone())
    }

    /// Return with no value.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] if the machine reference is dangling.
    pub fn ret(&mut self, locals: Vec<Value>) -> Result<(), Fault> {
        self.ret_value(Value::Null, locals)
    }

    /// Return `value`.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] if the machine reference is dangling.
    pub fn ret_value(&mut self, value: Value, locals: Vec<Value>) -> Result<(), Fault> {
        self.machine_mut()?.continuation.set_return(value, locals);
        Ok(())
    }

    /// Raise `event` to be handled before anything else in the mailbox.
    ///
    /// # Errors
    ///
    /// [`Fault::IllegalEnqueue`] for a null or non-event value,
    /// [`Fault::InhabitsType`] for a payload outside the event's type.
    pub fn raise(&mut self, event: &Value, payload: Value) -> Result<(), Fault> {
        let ev = require_event(event, "raised")?;
        check_payload(&ev, &payload)?;
        let m = self.machine_mut()?;
        let name = m.display_name();
        let state = m.current_state_name().to_string();
        m.current_trigger = Some(ev.clone());
        m.current_payload = payload;
        m.continuation.reason = ContinuationReason::Raise;
        self.rt
            .trace
            .line(|| format!("<RaiseLog> Machine {name} raised Event {ev} in state {state}"));
        Ok(())
    }

    /// `goto state, payload`.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] if `state` is not in this machine's definition.
    pub fn goto(&mut self, state: StateId, payload: Value) -> Result<(), Fault> {
        let m = self.machine_mut()?;
        let target = m
            .def()
            .state(state)
            .map(|s| s.name.clone())
            .ok_or_else(|| Fault::internal(format!("{} has no state {state}", m.name())))?;
        let name = m.display_name();
        m.dest_of_goto = Some(state);
        m.current_payload = payload;
        m.continuation.reason = ContinuationReason::Goto;
        self.rt
            .trace
            .line(|| format!("<GotoLog> Machine {name} goes to {target}"));
        Ok(())
    }

    /// `pop`: leave the current state and resume the one beneath.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] if the machine reference is dangling.
    pub fn pop(&mut self) -> Result<(), Fault> {
        let m = self.machine_mut()?;
        let name = m.display_name();
        let state = m.current_state_name().to_string();
        m.continuation.reason = ContinuationReason::Pop;
        self.rt
            .trace
            .line(|| format!("<PopLog> Machine {name} popped from state {state}"));
        Ok(())
    }

    /// Enqueue `event` at `target`. Follow with [`ExecContext::cont_send`].
    ///
    /// # Errors
    ///
    /// [`Fault::IllegalEnqueue`] for a non-handle target, a null event, or
    /// an event the sender or the handle does not permit;
    /// [`Fault::InhabitsType`] for a bad payload; mailbox bound faults.
    pub fn send(&mut self, target: &Value, event: &Value, payload: Value) -> Result<(), Fault> {
        self.impl_only("send")?;
        let Value::Machine(handle) = target else {
            return Err(Fault::illegal_enqueue(format!(
                "send target {target} is not a machine"
            )));
        };
        let ev = require_event(event, "sent")?;
        let (sender, sender_display) = {
            let me = self.machine()?;
            if let Some(sends) = me.def().sends() {
                if !sends.contains(&ev) {
                    return Err(Fault::illegal_enqueue(format!(
                        "{} is not allowed to send {ev}",
                        me.display_name()
                    )));
                }
            }
            (me.sender_info(), me.display_name())
        };
        if !handle.permits(&ev) {
            return Err(Fault::illegal_enqueue(format!(
                "{ev} is not permitted by {handle}"
            )));
        }
        check_payload(&ev, &payload)?;

        let target_machine = self.rt.machine_mut(MachineRef::Impl(handle.machine()))?;
        let target_display = target_machine.display_name();
        let accepted = target_machine.enqueue(ev.clone(), payload.clone(), sender)?;
        let size = target_machine.mailbox().len();
        self.rt.trace.line(|| {
            if accepted {
                format!(
                    "<EnqueueLog> Enqueued Event <{ev}, {payload}> in Machine {target_display} by {sender_display}"
                )
            } else {
                format!(
                    "<EnqueueLog> Dropped Event <{ev}, {payload}> to halted Machine {target_display}"
                )
            }
        });
        trace!(event = %ev, target = %target_display, size, accepted, "enqueue");

        if self.rt.registry().is_visible_event(&ev) {
            self.rt.visible_trace.add_action(ev.name(), payload.to_string());
        }
        self.rt.announce(event, &payload, self.me)
    }

    /// Create a machine through `interface` and return its handle. Follow
    /// with [`ExecContext::cont_new_machine`].
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] for a missing link or definition, or when called
    /// by a monitor.
    pub fn create(&mut self, interface: &str, payload: Value) -> Result<Value, Fault> {
        self.impl_only("create machines")?;
        let handle = self.rt.instantiate_interface(self.me, interface, payload)?;
        Ok(Value::Machine(handle))
    }

    /// Announce `event` to observing monitors.
    ///
    /// # Errors
    ///
    /// Same as [`RuntimeState::announce`].
    pub fn announce(&mut self, event: &Value, payload: Value) -> Result<(), Fault> {
        self.rt.announce(event, &payload, self.me)
    }

    /// `assert cond, message`.
    ///
    /// # Errors
    ///
    /// [`Fault::AssertionFailed`] when `cond` is false.
    pub fn assert(&self, cond: bool, message: impl Into<String>) -> Result<(), Fault> {
        if cond {
            return Ok(());
        }
        Err(Fault::AssertionFailed {
            machine: self.machine()?.display_name(),
            message: message.into(),
        })
    }

    /// Suspend after a send; resume at `resume` in `frame`.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] when called by a monitor.
    pub fn cont_send(&mut self, frame: FunFrame, resume: usize) -> Result<(), Fault> {
        self.impl_only("send")?;
        self.suspend(frame, resume, ContinuationReason::Send)
    }

    /// Suspend after creating a machine.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] when called by a monitor.
    pub fn cont_new_machine(&mut self, frame: FunFrame, resume: usize) -> Result<(), Fault> {
        self.impl_only("create machines")?;
        self.suspend(frame, resume, ContinuationReason::NewMachine)
    }

    /// Block until one of `events` is dequeued. On resume the received event
    /// and payload are the current trigger and payload.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] when called by a monitor or with no events.
    pub fn cont_receive(
        &mut self,
        frame: FunFrame,
        resume: usize,
        events: impl IntoIterator<Item = Event>,
    ) -> Result<(), Fault> {
        self.impl_only("receive")?;
        let events: BTreeSet<Event> = events.into_iter().collect();
        if events.is_empty() {
            return Err(Fault::internal("receive with an empty event set"));
        }
        self.machine_mut()?.set_receive_set(events)?;
        self.suspend(frame, resume, ContinuationReason::Receive)
    }

    /// Suspend for a nondeterministic choice. On resume read it with
    /// [`ExecContext::take_nondet`].
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] when called by a monitor.
    pub fn cont_nondet(&mut self, frame: FunFrame, resume: usize) -> Result<(), Fault> {
        self.impl_only("choose")?;
        self.suspend(frame, resume, ContinuationReason::Nondet)
    }

    /// Consume the pending nondeterministic choice.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] if the machine reference is dangling.
    pub fn take_nondet(&mut self) -> Result<bool, Fault> {
        Ok(self.machine_mut()?.continuation.take_nondet())
    }

    fn suspend(&mut self, frame: FunFrame, resume: usize, reason: ContinuationReason) -> Result<(), Fault> {
        let m = self.machine_mut()?;
        m.fun_stack.push(frame.resume_at(resume));
        m.continuation.reason = reason;
        Ok(())
    }

    /// Push the caller's resume frame after a callee suspended, keeping the
    /// callee's suspension reason.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] if the machine reference is dangling.
    pub fn suspend_caller(&mut self, frame: FunFrame, resume: usize) -> Result<(), Fault> {
        self.machine_mut()?.fun_stack.push(frame.resume_at(resume));
        Ok(())
    }

    /// Call `fun` with `args`.
    ///
    /// # Errors
    ///
    /// Propagates faults from the callee.
    pub fn call(&mut self, fun: &FunRef, args: &[Value]) -> Result<CallOutcome, Fault> {
        let locals = fun.create_locals(args);
        self.push_frame(FunFrame::new(Arc::clone(fun), locals))?;
        self.run_callee(fun)
    }

    /// Re-enter the callee that suspended, after the caller popped its own
    /// frame.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] if no callee frame is left.
    pub fn resume_call(&mut self) -> Result<CallOutcome, Fault> {
        let fun = self
            .machine()?
            .fun_stack
            .top()
            .map(|f| Arc::clone(&f.fun))
            .ok_or_else(|| Fault::internal("resume_call with an empty call stack"))?;
        self.run_callee(&fun)
    }

    /// Call `fun` and require that it returns without suspending.
    ///
    /// # Errors
    ///
    /// [`Fault::Internal`] if the callee suspends or unwinds.
    pub fn execute_to_completion(&mut self, fun: &FunRef, args: &[Value]) -> Result<Value, Fault> {
        match self.call(fun, args)? {
            CallOutcome::Returned(v) => Ok(v),
            CallOutcome::Suspended | CallOutcome::Unwound => Err(Fault::internal(format!(
                "{} did not run to completion",
                fun.name()
            ))),
        }
    }

    fn run_callee(&mut self, fun: &FunRef) -> Result<CallOutcome, Fault> {
        fun.execute(self)?;
        let k = &mut self.machine_mut()?.continuation;
        Ok(match k.reason {
            ContinuationReason::Return => {
                let value = std::mem::take(&mut k.ret_val);
                k.reset();
                CallOutcome::Returned(value)
            }
            ContinuationReason::Send
            | ContinuationReason::NewMachine
            | ContinuationReason::Receive
            | ContinuationReason::Nondet => CallOutcome::Suspended,
            ContinuationReason::Raise | ContinuationReason::Goto | ContinuationReason::Pop => {
                CallOutcome::Unwound
            }
        })
    }
}

/// Push `frame` on `me`'s call stack, logging named functions.
pub(crate) fn push_fun_frame(rt: &mut RuntimeState, me: MachineRef, frame: FunFrame) -> Result<(), Fault> {
    let m = rt.machine_mut(me)?;
    let name = m.display_name();
    let anon = frame.fun.is_anon();
    let fun_name = frame.fun.name().to_string();
    m.fun_stack.push(frame);
    if !anon {
        rt.trace
            .line(|| format!("<FunctionLog> Machine {name} executing Function {fun_name}"));
        trace!(machine = %name, function = %fun_name, "push function");
    }
    Ok(())
}

fn require_event(value: &Value, what: &str) -> Result<Event, Fault> {
    match value {
        Value::Event(ev) if !ev.is_null() => Ok(ev.clone()),
        Value::Null | Value::Event(_) => {
            Err(Fault::illegal_enqueue(format!("{what} event must not be null")))
        }
        other => Err(Fault::illegal_enqueue(format!(
            "{what} value {other} is not an event"
        ))),
    }
}
