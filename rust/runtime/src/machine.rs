//! Machine definitions and per-instance execution state.
//!
//! A [`MachineDef`] is the static, shared description a translator emits for
//! one machine type. A [`Machine`] is one running instance: its control
//! stack, call stack, continuation, mailbox, and the bookkeeping the run loop
//! in [`crate::control`] needs to resume it. Every field is plain data so a
//! machine deep-copies with `Clone`.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::buffer::{DeliveryFilter, EventBuffer, SenderInfo};
use crate::event::Event;
use crate::faults::Fault;
use crate::fun::{Continuation, FunStack};
use crate::runtime::RuntimeError;
use crate::state::{DoHandler, State, StateId, StateStack, Temperature};
use crate::value::Value;

static NO_EVENTS: BTreeSet<Event> = BTreeSet::new();

/// Index of an implementation machine within its container.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MachineId(pub usize);

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to any machine in a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineRef {
    /// Implementation machine.
    Impl(MachineId),
    /// Monitor, by registration index.
    Spec(usize),
}

/// Scheduling status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineStatus {
    /// Can make progress.
    #[default]
    Enabled,
    /// Waiting for a deliverable event.
    Blocked,
    /// Terminated. No further transitions.
    Halted,
}

/// What the run loop does next when the machine is resumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NextOperation {
    /// Run (or resume) the function on top of the call stack.
    #[default]
    ExecuteFunction,
    /// Take the next event from the mailbox.
    Dequeue,
    /// Dispatch the current trigger.
    HandleEvent,
    /// Retry a pending selective receive.
    Receive,
}

/// Why the current state's exit function is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateExitReason {
    /// Not exiting.
    #[default]
    NotExit,
    /// Exiting for a goto transition.
    OnTransition,
    /// Running the transition function after exit.
    OnTransitionAfterExit,
    /// Exiting for a `pop` statement.
    OnPopStatement,
    /// Exiting for a `goto` statement.
    OnGotoStatement,
    /// Exiting because the trigger is unhandled here.
    OnUnhandledEvent,
}

/// Implementation machine or monitor, as declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefKind {
    /// Ordinary machine.
    Impl,
    /// Monitor observing the given events.
    Spec {
        /// Events this monitor consumes when announced.
        observes: BTreeSet<Event>,
    },
}

/// Static description of a machine type.
#[derive(Debug)]
pub struct MachineDef {
    name: String,
    states: Vec<Arc<State>>,
    start: StateId,
    fields: Vec<Value>,
    sends: Option<BTreeSet<Event>>,
    permissions: Arc<BTreeSet<Event>>,
    kind: DefKind,
    max_buffer_size: Option<usize>,
    assume_buffer_size: bool,
}

impl MachineDef {
    /// Start building a definition.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> MachineDefBuilder {
        MachineDefBuilder::new(name)
    }

    /// Concrete machine type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// State by id.
    #[must_use]
    pub fn state(&self, id: StateId) -> Option<&Arc<State>> {
        self.states.get(id.0)
    }

    /// Look up a state id by name.
    #[must_use]
    pub fn state_id(&self, name: &str) -> Option<StateId> {
        self.states.iter().position(|s| s.name == name).map(StateId)
    }

    /// Start state.
    #[must_use]
    pub fn start(&self) -> StateId {
        self.start
    }

    /// Initial field values.
    #[must_use]
    pub fn initial_fields(&self) -> &[Value] {
        &self.fields
    }

    /// Events this machine may send, if restricted.
    #[must_use]
    pub fn sends(&self) -> Option<&BTreeSet<Event>> {
        self.sends.as_ref()
    }

    /// Events receivable through a handle naming the machine directly.
    #[must_use]
    pub fn permissions(&self) -> &Arc<BTreeSet<Event>> {
        &self.permissions
    }

    /// Declared kind.
    #[must_use]
    pub fn kind(&self) -> &DefKind {
        &self.kind
    }

    /// Whether this is a monitor definition.
    #[must_use]
    pub fn is_spec(&self) -> bool {
        matches!(self.kind, DefKind::Spec { .. })
    }

    /// Whether a monitor of this type consumes `event`.
    #[must_use]
    pub fn observes(&self, event: &Event) -> bool {
        match &self.kind {
            DefKind::Spec { observes } => observes.contains(event),
            DefKind::Impl => false,
        }
    }

    /// Mailbox size bound and whether it is an assumption.
    #[must_use]
    pub fn max_buffer_size(&self) -> Option<(usize, bool)> {
        self.max_buffer_size.map(|n| (n, self.assume_buffer_size))
    }
}

/// Builder for [`MachineDef`].
#[derive(Debug)]
pub struct MachineDefBuilder {
    name: String,
    states: Vec<State>,
    start: StateId,
    fields: Vec<Value>,
    sends: Option<BTreeSet<Event>>,
    permissions: BTreeSet<Event>,
    kind: DefKind,
    max_buffer_size: Option<usize>,
    assume_buffer_size: bool,
}

impl MachineDefBuilder {
    /// New builder with no states.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
            start: StateId(0),
            fields: Vec::new(),
            sends: None,
            permissions: BTreeSet::new(),
            kind: DefKind::Impl,
            max_buffer_size: None,
            assume_buffer_size: false,
        }
    }

    /// Append a state. Its id is its position.
    #[must_use]
    pub fn state(mut self, state: State) -> Self {
        self.states.push(state);
        self
    }

    /// Set the start state (default: the first state).
    #[must_use]
    pub fn start(mut self, start: StateId) -> Self {
        self.start = start;
        self
    }

    /// Set the initial field vector.
    #[must_use]
    pub fn fields(mut self, fields: Vec<Value>) -> Self {
        self.fields = fields;
        self
    }

    /// Restrict the events this machine may send.
    #[must_use]
    pub fn sends(mut self, events: impl IntoIterator<Item = Event>) -> Self {
        self.sends = Some(events.into_iter().collect());
        self
    }

    /// Events accepted through a handle that names this machine directly.
    #[must_use]
    pub fn receives(mut self, events: impl IntoIterator<Item = Event>) -> Self {
        self.permissions.extend(events);
        self
    }

    /// Make this a monitor consuming `events`.
    #[must_use]
    pub fn observes(mut self, events: impl IntoIterator<Item = Event>) -> Self {
        self.kind = DefKind::Spec {
            observes: events.into_iter().collect(),
        };
        self
    }

    /// Bound the mailbox size (`assert n`).
    #[must_use]
    pub fn max_buffer_size(mut self, max: usize) -> Self {
        self.max_buffer_size = Some(max);
        self.assume_buffer_size = false;
        self
    }

    /// Bound the mailbox size as an assumption (`assume n`).
    #[must_use]
    pub fn assumed_max_buffer_size(mut self, max: usize) -> Self {
        self.max_buffer_size = Some(max);
        self.assume_buffer_size = true;
        self
    }

    /// Validate and freeze the definition.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidDefinition`] when the machine has no
    /// states, duplicate state names, or a start or transition target that
    /// does not exist.
    pub fn build(self) -> Result<Arc<MachineDef>, RuntimeError> {
        let invalid = |reason: String| RuntimeError::InvalidDefinition {
            machine: self.name.clone(),
            reason,
        };
        if self.states.is_empty() {
            return Err(invalid("no states".to_string()));
        }
        if self.start.0 >= self.states.len() {
            return Err(invalid(format!("start state {} out of range", self.start)));
        }
        let mut names = BTreeSet::new();
        for state in &self.states {
            if !names.insert(state.name.as_str()) {
                return Err(invalid(format!("duplicate state {}", state.name)));
            }
            if let Some((ev, tr)) = state
                .transitions
                .iter()
                .find(|(_, tr)| tr.target.0 >= self.states.len())
            {
                return Err(invalid(format!(
                    "transition on {ev} in {} targets unknown state {}",
                    state.name, tr.target
                )));
            }
        }
        Ok(Arc::new(MachineDef {
            name: self.name,
            states: self.states.into_iter().map(Arc::new).collect(),
            start: self.start,
            fields: self.fields,
            sends: self.sends,
            permissions: Arc::new(self.permissions),
            kind: self.kind,
            max_buffer_size: self.max_buffer_size,
            assume_buffer_size: self.assume_buffer_size,
        }))
    }
}

/// Variant-specific machine state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MachineKind {
    /// Implementation machine.
    Impl {
        /// Active selective-receive set; empty when not receiving.
        receive_set: BTreeSet<Event>,
    },
    /// Monitor.
    Spec,
}

/// One running machine instance.
#[derive(Debug, Clone)]
pub struct Machine {
    pub(crate) def: Arc<MachineDef>,
    pub(crate) renamed_name: String,
    pub(crate) is_safe: bool,
    pub(crate) instance_number: usize,
    pub(crate) fields: Vec<Value>,
    pub(crate) event_value: Event,
    pub(crate) state_stack: StateStack,
    pub(crate) fun_stack: FunStack,
    pub(crate) continuation: Continuation,
    pub(crate) status: MachineStatus,
    pub(crate) next_op: NextOperation,
    pub(crate) exit_reason: StateExitReason,
    pub(crate) current_trigger: Option<Event>,
    pub(crate) current_payload: Value,
    pub(crate) trigger_sender: SenderInfo,
    pub(crate) dest_of_goto: Option<StateId>,
    pub(crate) mailbox: EventBuffer,
    pub(crate) kind: MachineKind,
}

impl Machine {
    /// Fresh instance positioned to run the start state's entry function.
    pub(crate) fn new(
        def: Arc<MachineDef>,
        renamed_name: impl Into<String>,
        instance_number: usize,
        is_safe: bool,
        payload: Value,
    ) -> Result<Self, Fault> {
        let start = def
            .state(def.start())
            .cloned()
            .ok_or_else(|| Fault::internal(format!("{} has no start state", def.name())))?;
        let mut state_stack = StateStack::new();
        state_stack.push(start);
        let kind = if def.is_spec() {
            MachineKind::Spec
        } else {
            MachineKind::Impl {
                receive_set: BTreeSet::new(),
            }
        };
        Ok(Self {
            fields: def.initial_fields().to_vec(),
            def,
            renamed_name: renamed_name.into(),
            is_safe,
            instance_number,
            event_value: Event::null(),
            state_stack,
            fun_stack: FunStack::new(),
            continuation: Continuation::default(),
            status: MachineStatus::Enabled,
            next_op: NextOperation::ExecuteFunction,
            exit_reason: StateExitReason::NotExit,
            current_trigger: None,
            current_payload: payload,
            trigger_sender: SenderInfo::default(),
            dest_of_goto: None,
            mailbox: EventBuffer::new(),
            kind,
        })
    }

    /// Concrete type name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.def.name()
    }

    /// Name this instance was linked under.
    #[must_use]
    pub fn renamed_name(&self) -> &str {
        &self.renamed_name
    }

    /// `Name-instance`, used in traces and fault messages.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{}-{}", self.def.name(), self.instance_number)
    }

    /// Definition.
    #[must_use]
    pub fn def(&self) -> &Arc<MachineDef> {
        &self.def
    }

    /// 1-based ordinal among instances of the same type.
    #[must_use]
    pub fn instance_number(&self) -> usize {
        self.instance_number
    }

    /// Per-instance safety flag from the linkage tables.
    #[must_use]
    pub fn is_safe(&self) -> bool {
        self.is_safe
    }

    /// Whether this is a monitor.
    #[must_use]
    pub fn is_spec(&self) -> bool {
        matches!(self.kind, MachineKind::Spec)
    }

    /// Scheduling status.
    #[must_use]
    pub fn status(&self) -> MachineStatus {
        self.status
    }

    /// Whether the machine has halted.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.status == MachineStatus::Halted
    }

    /// Next run-loop operation.
    #[must_use]
    pub fn next_operation(&self) -> NextOperation {
        self.next_op
    }

    /// Why the machine last suspended.
    #[must_use]
    pub fn continuation(&self) -> &Continuation {
        &self.continuation
    }

    /// Top of the control stack.
    #[must_use]
    pub fn current_state(&self) -> Option<&Arc<State>> {
        self.state_stack.top().map(|f| &f.state)
    }

    /// Name of the current state, empty when the stack is empty.
    #[must_use]
    pub fn current_state_name(&self) -> &str {
        self.current_state().map_or("", |s| s.name.as_str())
    }

    /// Temperature of the current state.
    #[must_use]
    pub fn temperature(&self) -> Temperature {
        self.current_state()
            .map_or(Temperature::Warm, |s| s.temperature)
    }

    /// Control stack.
    #[must_use]
    pub fn state_stack(&self) -> &StateStack {
        &self.state_stack
    }

    /// Call stack.
    #[must_use]
    pub fn fun_stack(&self) -> &FunStack {
        &self.fun_stack
    }

    /// Mailbox.
    #[must_use]
    pub fn mailbox(&self) -> &EventBuffer {
        &self.mailbox
    }

    /// Field vector.
    #[must_use]
    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    /// Read a field, `Null` if out of range.
    #[must_use]
    pub fn field(&self, index: usize) -> Value {
        self.fields.get(index).cloned().unwrap_or_default()
    }

    /// Write a field, growing the vector if needed.
    pub fn set_field(&mut self, index: usize, value: Value) {
        if index >= self.fields.len() {
            self.fields.resize(index + 1, Value::Null);
        }
        self.fields[index] = value;
    }

    /// Event currently being handled or just received.
    #[must_use]
    pub fn trigger(&self) -> &Event {
        self.current_trigger.as_ref().unwrap_or(&self.event_value)
    }

    /// Payload of the current trigger.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.current_payload
    }

    /// Sender of the last dequeued event.
    #[must_use]
    pub fn trigger_sender(&self) -> &SenderInfo {
        &self.trigger_sender
    }

    /// Active receive filter.
    #[must_use]
    pub fn receive_set(&self) -> &BTreeSet<Event> {
        match &self.kind {
            MachineKind::Impl { receive_set } => receive_set,
            MachineKind::Spec => &NO_EVENTS,
        }
    }

    pub(crate) fn set_receive_set(&mut self, events: BTreeSet<Event>) -> Result<(), Fault> {
        match &mut self.kind {
            MachineKind::Impl { receive_set } => {
                *receive_set = events;
                Ok(())
            }
            MachineKind::Spec => Err(Fault::internal(format!(
                "monitor {} cannot receive",
                self.def.name()
            ))),
        }
    }

    fn filter(&self) -> DeliveryFilter<'_> {
        delivery_filter(&self.state_stack, &self.kind)
    }

    /// Identity stamped on events this machine sends.
    #[must_use]
    pub fn sender_info(&self) -> SenderInfo {
        SenderInfo::new(self.display_name(), self.current_state_name())
    }

    /// Push `state` on the control stack.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::Internal`] if `state` is not in this machine's definition.
    pub fn push_state(&mut self, state: StateId) -> Result<(), Fault> {
        let st = self.lookup_state(state)?;
        self.state_stack.push(st);
        Ok(())
    }

    /// Replace the top of the control stack with `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::Internal`] if the stack is empty or `state` is unknown.
    pub fn change_state(&mut self, state: StateId) -> Result<(), Fault> {
        let st = self.lookup_state(state)?;
        if self.state_stack.pop().is_none() {
            return Err(Fault::internal(format!(
                "{} changed state with an empty state stack",
                self.display_name()
            )));
        }
        self.state_stack.push(st);
        Ok(())
    }

    /// Pop the control stack. Returns whether the machine is now halted.
    ///
    /// # Errors
    ///
    /// An emptied stack is [`Fault::InvalidPopStatement`] for an explicit
    /// pop and [`Fault::UnhandledEvent`] unless the event being handled is
    /// `halt`.
    pub fn pop_state(&mut self, is_pop_statement: bool) -> Result<bool, Fault> {
        self.state_stack.pop();
        if self.state_stack.is_empty() {
            if is_pop_statement {
                return Err(Fault::InvalidPopStatement {
                    machine: self.display_name(),
                });
            }
            if !self.event_value.is_halt() {
                return Err(Fault::UnhandledEvent {
                    machine: self.display_name(),
                    event: self.event_value.name().to_string(),
                });
            }
            self.status = MachineStatus::Halted;
            self.fun_stack.clear();
        }
        Ok(self.is_halted())
    }

    fn lookup_state(&self, state: StateId) -> Result<Arc<State>, Fault> {
        self.def.state(state).cloned().ok_or_else(|| {
            Fault::internal(format!("{} has no state {state}", self.def.name()))
        })
    }

    /// Whether the top frame's action set contains `event`.
    #[must_use]
    pub fn is_action_installed(&self, event: &Event) -> bool {
        self.state_stack
            .top()
            .is_some_and(|f| f.actions.contains(event))
    }

    /// Whether the current state has a transition on `event`.
    #[must_use]
    pub fn is_transition_present(&self, event: &Event) -> bool {
        self.current_state()
            .is_some_and(|s| s.transitions.contains_key(event))
    }

    /// Innermost do-handler for `event`.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::Internal`] if no frame declares one. Only call after
    /// [`Machine::is_action_installed`] succeeded.
    pub fn find_action_handler(&self, event: &Event) -> Result<DoHandler, Fault> {
        self.state_stack
            .iter_top_down()
            .find_map(|f| f.state.dos.get(event).cloned())
            .ok_or_else(|| {
                Fault::internal(format!(
                    "{} has no handler for installed action {event}",
                    self.display_name()
                ))
            })
    }

    /// Whether the mailbox holds an event deliverable right now.
    #[must_use]
    pub fn is_enabled_to_dequeue(&self) -> bool {
        self.mailbox.is_enabled(self.filter())
    }

    /// Append to the mailbox. Returns `false` if the machine has halted and
    /// the event was dropped.
    ///
    /// # Errors
    ///
    /// Fails on an exceeded event-instance or mailbox-size bound.
    pub fn enqueue(&mut self, event: Event, payload: Value, sender: SenderInfo) -> Result<bool, Fault> {
        if self.is_halted() {
            return Ok(false);
        }
        if let Some((max, assume)) = self.def.max_buffer_size() {
            if self.mailbox.len() >= max {
                return Err(if assume {
                    Fault::AssumeFailure {
                        event: format!("{} mailbox", self.display_name()),
                    }
                } else {
                    Fault::MaxBufferSizeExceeded {
                        machine: self.display_name(),
                        max,
                    }
                });
            }
        }
        self.mailbox.enqueue(event, payload, sender)?;
        if self.status == MachineStatus::Blocked && self.is_enabled_to_dequeue() {
            self.status = MachineStatus::Enabled;
        }
        Ok(true)
    }

    /// Dequeue the first deliverable event into the current trigger.
    /// Returns whether one was found.
    pub fn dequeue(&mut self) -> bool {
        let filter = delivery_filter(&self.state_stack, &self.kind);
        let Some(node) = self.mailbox.dequeue(filter) else {
            return false;
        };
        self.current_trigger = Some(node.event);
        self.current_payload = node.payload;
        self.trigger_sender = node.sender;
        true
    }
}

fn delivery_filter<'a>(stack: &'a StateStack, kind: &'a MachineKind) -> DeliveryFilter<'a> {
    let deferred = match stack.top() {
        Some(frame) => &frame.deferred,
        None => &NO_EVENTS,
    };
    let receive = match kind {
        MachineKind::Impl { receive_set } => receive_set,
        MachineKind::Spec => &NO_EVENTS,
    };
    DeliveryFilter { deferred, receive }
}

impl Hash for Machine {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.renamed_name.hash(state);
        self.is_safe.hash(state);
        self.instance_number.hash(state);
        self.fields.hash(state);
        self.event_value.hash(state);
        self.state_stack.hash(state);
        self.fun_stack.hash(state);
        self.continuation.hash(state);
        self.status.hash(state);
        self.next_op.hash(state);
        self.exit_reason.hash(state);
        self.current_trigger.hash(state);
        self.current_payload.hash(state);
        self.dest_of_goto.hash(state);
        self.mailbox.hash(state);
        self.kind.hash(state);
    }
}
