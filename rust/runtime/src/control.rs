//! The machine run loop.
//!
//! [`run`] advances one machine through its phases until it reaches a
//! scheduling point: a send or machine creation, a nondeterministic choice,
//! a null-event trigger, an empty mailbox, or halting. Where to resume is
//! recorded in the machine's `next_op`, and why a state's exit function is
//! running in its `exit_reason`, so a cloned machine continues exactly where
//! the original would.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::event::Event;
use crate::exec::{push_fun_frame, ExecContext};
use crate::faults::Fault;
use crate::fun::{ContinuationReason, FunFrame, FunRef};
use crate::machine::{MachineRef, MachineStatus, NextOperation, StateExitReason};
use crate::runtime::RuntimeState;
use crate::state::{DoHandler, State, StateId};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    ExecuteFunction,
    CheckLastOperation,
    Dequeue,
    HandleEvent,
    Receive,
}

enum Flow {
    Next(Phase),
    Yield,
}

/// Run `me` until it yields to the scheduler.
pub(crate) fn run(rt: &mut RuntimeState, me: MachineRef) -> Result<(), Fault> {
    let m = rt.machine_ref(me)?;
    if m.is_halted() {
        return Ok(());
    }
    let mut phase = match m.next_op {
        NextOperation::ExecuteFunction => Phase::ExecuteFunction,
        NextOperation::Dequeue => Phase::Dequeue,
        NextOperation::HandleEvent => Phase::HandleEvent,
        NextOperation::Receive => Phase::Receive,
    };
    // Bounds phases between two deliveries, so only raise/goto cycles that
    // never consume the mailbox trip it.
    let limit = rt.config().max_steps_per_run;
    let mut steps = 0;
    loop {
        if steps >= limit {
            return Err(Fault::internal(format!(
                "{} made no mailbox progress within {limit} steps",
                rt.machine_ref(me)?.display_name()
            )));
        }
        steps += 1;
        let flow = match phase {
            Phase::ExecuteFunction => execute_function(rt, me)?,
            Phase::CheckLastOperation => check_last_operation(rt, me)?,
            Phase::Dequeue => dequeue(rt, me)?,
            Phase::HandleEvent => handle_event(rt, me)?,
            Phase::Receive => receive(rt, me)?,
        };
        match flow {
            Flow::Next(next) => {
                if matches!(phase, Phase::Dequeue | Phase::Receive) {
                    steps = 0;
                }
                phase = next;
            }
            Flow::Yield => return Ok(()),
        }
    }
}

fn current_state(rt: &RuntimeState, me: MachineRef) -> Result<Arc<State>, Fault> {
    let m = rt.machine_ref(me)?;
    m.current_state().cloned().ok_or_else(|| {
        Fault::internal(format!("{} has an empty state stack", m.display_name()))
    })
}

fn execute_function(rt: &mut RuntimeState, me: MachineRef) -> Result<Flow, Fault> {
    let m = rt.machine_mut(me)?;
    m.next_op = NextOperation::ExecuteFunction;
    if m.fun_stack.is_empty() {
        let name = m.display_name();
        let state = current_state(rt, me)?;
        rt.trace
            .line(|| format!("<StateLog> Machine {name} entering State {}", state.name));
        debug!(machine = %name, state = %state.name, "enter state");
        match &state.entry {
            Some(entry) => push_handler(rt, me, Arc::clone(entry))?,
            None => return returned_immediately(rt, me),
        }
    }

    let m = rt.machine_mut(me)?;
    let fun = m
        .fun_stack
        .top()
        .map(|f| Arc::clone(&f.fun))
        .ok_or_else(|| Fault::internal("nothing to execute"))?;
    m.continuation.reset();
    fun.execute(&mut ExecContext::new(rt, me))?;
    Ok(Flow::Next(Phase::CheckLastOperation))
}

/// An absent entry, exit, or transition function behaves as one that
/// returns at once.
fn returned_immediately(rt: &mut RuntimeState, me: MachineRef) -> Result<Flow, Fault> {
    rt.machine_mut(me)?
        .continuation
        .set_return(Value::Null, Vec::new());
    Ok(Flow::Next(Phase::CheckLastOperation))
}

/// Push an entry, exit, transition, or do function. Anonymous functions
/// receive the current payload.
fn push_handler(rt: &mut RuntimeState, me: MachineRef, fun: FunRef) -> Result<(), Fault> {
    let locals = if fun.is_anon() {
        let payload = rt.machine_ref(me)?.current_payload.clone();
        fun.create_locals(&[payload])
    } else {
        fun.create_locals(&[])
    };
    push_fun_frame(rt, me, FunFrame::new(fun, locals))
}

fn push_exit(rt: &mut RuntimeState, me: MachineRef) -> Result<Flow, Fault> {
    let name = rt.machine_ref(me)?.display_name();
    let state = current_state(rt, me)?;
    rt.trace
        .line(|| format!("<StateLog> Machine {name} exiting State {}", state.name));
    debug!(machine = %name, state = %state.name, "exit state");
    match &state.exit {
        Some(exit) => {
            push_handler(rt, me, Arc::clone(exit))?;
            Ok(Flow::Next(Phase::ExecuteFunction))
        }
        None => returned_immediately(rt, me),
    }
}

fn check_last_operation(rt: &mut RuntimeState, me: MachineRef) -> Result<Flow, Fault> {
    let m = rt.machine_mut(me)?;
    match m.continuation.reason {
        ContinuationReason::Receive => Ok(Flow::Next(Phase::Receive)),
        ContinuationReason::Raise => Ok(Flow::Next(Phase::HandleEvent)),
        ContinuationReason::Send | ContinuationReason::NewMachine => {
            m.next_op = NextOperation::ExecuteFunction;
            Ok(Flow::Yield)
        }
        ContinuationReason::Nondet => {
            let choice = rt.next_choice();
            let m = rt.machine_mut(me)?;
            m.continuation.set_nondet(choice);
            m.next_op = NextOperation::ExecuteFunction;
            Ok(Flow::Yield)
        }
        ContinuationReason::Goto => {
            m.exit_reason = StateExitReason::OnGotoStatement;
            push_exit(rt, me)
        }
        ContinuationReason::Pop => {
            m.exit_reason = StateExitReason::OnPopStatement;
            push_exit(rt, me)
        }
        ContinuationReason::Return => after_return(rt, me),
    }
}

fn after_return(rt: &mut RuntimeState, me: MachineRef) -> Result<Flow, Fault> {
    let m = rt.machine_mut(me)?;
    match m.exit_reason {
        StateExitReason::NotExit => Ok(Flow::Next(Phase::Dequeue)),
        StateExitReason::OnPopStatement => {
            m.exit_reason = StateExitReason::NotExit;
            if pop_state(rt, me, true)? {
                Ok(Flow::Yield)
            } else {
                Ok(Flow::Next(Phase::Dequeue))
            }
        }
        StateExitReason::OnGotoStatement => {
            m.exit_reason = StateExitReason::NotExit;
            let name = m.display_name();
            let dest = m
                .dest_of_goto
                .take()
                .ok_or_else(|| Fault::internal(format!("{name} exited for goto without a target")))?;
            change_state(rt, me, dest, "goto")?;
            Ok(Flow::Next(Phase::ExecuteFunction))
        }
        StateExitReason::OnUnhandledEvent => {
            m.exit_reason = StateExitReason::NotExit;
            if pop_state(rt, me, false)? {
                Ok(Flow::Yield)
            } else {
                Ok(Flow::Next(Phase::HandleEvent))
            }
        }
        StateExitReason::OnTransition => {
            m.exit_reason = StateExitReason::OnTransitionAfterExit;
            let ev = m.event_value.clone();
            let state = current_state(rt, me)?;
            match state.transitions.get(&ev).and_then(|t| t.fun.clone()) {
                Some(fun) => {
                    push_handler(rt, me, fun)?;
                    Ok(Flow::Next(Phase::ExecuteFunction))
                }
                None => returned_immediately(rt, me),
            }
        }
        StateExitReason::OnTransitionAfterExit => {
            m.exit_reason = StateExitReason::NotExit;
            let ev = m.event_value.clone();
            let state = current_state(rt, me)?;
            let target = state
                .transitions
                .get(&ev)
                .map(|t| t.target)
                .ok_or_else(|| {
                    Fault::internal(format!("no transition on {ev} in state {}", state.name))
                })?;
            change_state(rt, me, target, "transition")?;
            Ok(Flow::Next(Phase::ExecuteFunction))
        }
    }
}

fn dequeue(rt: &mut RuntimeState, me: MachineRef) -> Result<Flow, Fault> {
    let m = rt.machine_mut(me)?;
    m.next_op = NextOperation::Dequeue;
    m.current_trigger = None;
    m.current_payload = Value::Null;
    if m.dequeue() {
        m.status = MachineStatus::Enabled;
        delivered(rt, me)?;
        return Ok(Flow::Next(Phase::HandleEvent));
    }
    if m.state_stack.has_null_transition_or_action() {
        m.current_trigger = Some(Event::null());
        m.next_op = NextOperation::HandleEvent;
    } else {
        m.status = MachineStatus::Blocked;
    }
    Ok(Flow::Yield)
}

fn receive(rt: &mut RuntimeState, me: MachineRef) -> Result<Flow, Fault> {
    let m = rt.machine_mut(me)?;
    m.next_op = NextOperation::Receive;
    if !m.dequeue() {
        m.status = MachineStatus::Blocked;
        return Ok(Flow::Yield);
    }
    m.status = MachineStatus::Enabled;
    m.set_receive_set(BTreeSet::new())?;
    m.next_op = NextOperation::ExecuteFunction;
    delivered(rt, me)?;
    Ok(Flow::Next(Phase::ExecuteFunction))
}

/// Log a successful dequeue and notify the observer.
fn delivered(rt: &mut RuntimeState, me: MachineRef) -> Result<(), Fault> {
    let m = rt.machine_ref(me)?;
    let name = m.display_name();
    let ev = m.trigger().clone();
    let payload = m.payload().clone();
    let sender = m.trigger_sender().clone();
    let state = m.current_state_name().to_string();
    if let (Some(observer), MachineRef::Impl(_)) = (&rt.observer, me) {
        observer.event_dequeued(m, ev.name(), &sender.machine, &sender.state);
    }
    rt.trace.line(|| {
        format!(
            "<DequeueLog> Dequeued Event <{ev}, {payload}> at Machine {name} in State {state} sent by {}",
            sender.machine
        )
    });
    debug!(machine = %name, event = %ev, "dequeue");
    Ok(())
}

fn handle_event(rt: &mut RuntimeState, me: MachineRef) -> Result<Flow, Fault> {
    let m = rt.machine_mut(me)?;
    m.next_op = NextOperation::HandleEvent;
    let ev = m.current_trigger.take().unwrap_or_else(|| m.event_value.clone());
    m.event_value = ev.clone();
    let name = m.display_name();
    let state = current_state(rt, me)?;

    if let Some(tr) = state.transitions.get(&ev) {
        if tr.is_push {
            push_state(rt, me, tr.target)?;
            return Ok(Flow::Next(Phase::ExecuteFunction));
        }
        rt.machine_mut(me)?.exit_reason = StateExitReason::OnTransition;
        return push_exit(rt, me);
    }

    let m = rt.machine_mut(me)?;
    if !m.is_action_installed(&ev) {
        m.exit_reason = StateExitReason::OnUnhandledEvent;
        return push_exit(rt, me);
    }
    match m.find_action_handler(&ev)? {
        DoHandler::Ignore => {
            rt.trace.line(|| {
                format!("<ActionLog> Machine {name} ignored Event {ev} in State {}", state.name)
            });
            Ok(Flow::Next(Phase::Dequeue))
        }
        DoHandler::Fun(fun) => {
            rt.trace.line(|| {
                format!(
                    "<ActionLog> Machine {name} executed action {} for Event {ev} in State {}",
                    fun.name(),
                    state.name
                )
            });
            push_handler(rt, me, fun)?;
            Ok(Flow::Next(Phase::ExecuteFunction))
        }
    }
}

fn push_state(rt: &mut RuntimeState, me: MachineRef, target: StateId) -> Result<(), Fault> {
    let m = rt.machine_mut(me)?;
    let from = m.current_state_name().to_string();
    m.push_state(target)?;
    notify_transition(rt, me, &from, "push")
}

fn change_state(rt: &mut RuntimeState, me: MachineRef, target: StateId, reason: &str) -> Result<(), Fault> {
    let m = rt.machine_mut(me)?;
    let from = m.current_state_name().to_string();
    m.change_state(target)?;
    notify_transition(rt, me, &from, reason)
}

/// Pop the control stack. Returns whether the machine halted.
fn pop_state(rt: &mut RuntimeState, me: MachineRef, is_pop_statement: bool) -> Result<bool, Fault> {
    let m = rt.machine_mut(me)?;
    let from = m.current_state_name().to_string();
    if !m.pop_state(is_pop_statement)? {
        notify_transition(rt, me, &from, "pop")?;
        return Ok(false);
    }
    let name = m.display_name();
    let queued = m.mailbox().len();
    rt.trace
        .line(|| format!("<HaltLog> Machine {name} HALTED with {queued} events in the queue"));
    debug!(machine = %name, queued, "halted");
    Ok(true)
}

fn notify_transition(rt: &RuntimeState, me: MachineRef, from: &str, reason: &str) -> Result<(), Fault> {
    if let (Some(observer), MachineRef::Impl(_)) = (&rt.observer, me) {
        let m = rt.machine_ref(me)?;
        observer.state_transitioned(m, from, m.current_state_name(), reason);
    }
    Ok(())
}
