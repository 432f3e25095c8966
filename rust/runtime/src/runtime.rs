//! The container that owns every machine of one execution branch.
//!
//! A [`RuntimeState`] is the unit an explorer clones. Machines hold no
//! reference back to their container, so `Clone` is a complete deep copy of
//! the mutable state; only the read-only [`Registry`], the config, and the
//! installed callbacks are shared by `Arc`.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::choice::{ChoiceProvider, Fallback};
use crate::config::RuntimeConfig;
use crate::control;
use crate::event::Event;
use crate::faults::Fault;
use crate::fingerprint::Fingerprint;
use crate::machine::{Machine, MachineDef, MachineId, MachineRef, MachineStatus};
use crate::observer::RuntimeObserver;
use crate::registry::Registry;
use crate::state::Temperature;
use crate::trace::{TraceLog, VisibleTrace};
use crate::value::{InterfaceValue, Value};

/// Host-level runtime errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// No machine definition under this name.
    #[error("no machine definition named {name}")]
    UnknownDefinition {
        /// Requested name.
        name: String,
    },
    /// The caller has no link for the requested interface.
    #[error("{caller} has no link for interface {interface}")]
    UnknownLink {
        /// Renamed name of the creating machine.
        caller: String,
        /// Requested interface.
        interface: String,
    },
    /// No machine with this id.
    #[error("no machine with id {0}")]
    UnknownMachine(MachineId),
    /// The machine cannot be scheduled.
    #[error("machine {id} is {status:?}, not enabled")]
    NotEnabled {
        /// Machine id.
        id: MachineId,
        /// Its current status.
        status: MachineStatus,
    },
    /// A machine or registry definition is malformed.
    #[error("invalid definition of {machine}: {reason}")]
    InvalidDefinition {
        /// Machine name.
        machine: String,
        /// What is wrong.
        reason: String,
    },
    /// A fault ended this branch during the current call.
    #[error("execution faulted: {0}")]
    Faulted(Arc<Fault>),
    /// A fault ended this branch earlier; no further steps are allowed.
    #[error("branch already terminated by: {0}")]
    Terminated(Arc<Fault>),
}

/// Container of all machines for one execution branch.
#[derive(Clone)]
pub struct RuntimeState {
    registry: Arc<Registry>,
    config: Arc<RuntimeConfig>,
    pub(crate) impl_machines: Vec<Machine>,
    pub(crate) spec_machines: Vec<Machine>,
    fault: Option<Arc<Fault>>,
    pub(crate) visible_trace: VisibleTrace,
    pub(crate) trace: TraceLog,
    choice: Option<Arc<dyn ChoiceProvider>>,
    fallback: Fallback,
    pub(crate) observer: Option<Arc<dyn RuntimeObserver>>,
}

impl fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeState")
            .field("impl_machines", &self.impl_machines.len())
            .field("spec_machines", &self.spec_machines.len())
            .field("fault", &self.fault)
            .field("visible_trace", &self.visible_trace.len())
            .finish_non_exhaustive()
    }
}

impl RuntimeState {
    /// Empty container over `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>, config: RuntimeConfig) -> Self {
        let fallback = Fallback::new(config.fallback_seed);
        Self {
            registry,
            trace: TraceLog::new(config.record_trace),
            config: Arc::new(config),
            impl_machines: Vec::new(),
            spec_machines: Vec::new(),
            fault: None,
            visible_trace: VisibleTrace::new(),
            choice: None,
            fallback,
            observer: None,
        }
    }

    /// Linkage tables.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Install the choice provider used at nondeterministic choice points.
    pub fn set_choice_provider(&mut self, provider: Arc<dyn ChoiceProvider>) {
        self.choice = Some(provider);
    }

    /// Install lifecycle callbacks.
    pub fn set_observer(&mut self, observer: Arc<dyn RuntimeObserver>) {
        self.observer = Some(observer);
    }

    /// Create the main machine under the renamed name `interface`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::UnknownDefinition`] if `interface` does not
    /// resolve to an implementation machine.
    pub fn create_main_machine(&mut self, interface: &str) -> Result<MachineId, RuntimeError> {
        self.check_live()?;
        let def = self
            .registry
            .resolve(interface)
            .filter(|d| !d.is_spec())
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownDefinition {
                name: interface.to_string(),
            })?;
        let id = self
            .spawn(&def, interface, Value::Null)
            .map_err(|f| RuntimeError::Faulted(self.record_fault(f)))?;
        self.trace.line(|| {
            format!(
                "<CreateLog> Main machine {} was created by machine Runtime",
                def.name()
            )
        });
        debug!(machine = %def.name(), renamed = interface, "main machine created");
        Ok(id)
    }

    /// Create a machine on behalf of `caller` through `interface`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::UnknownLink`] if the caller has no link for
    /// `interface`.
    pub fn create_interface(
        &mut self,
        caller: MachineId,
        interface: &str,
        payload: Value,
    ) -> Result<InterfaceValue, RuntimeError> {
        self.check_live()?;
        let caller_renamed = self
            .machine(caller)
            .ok_or(RuntimeError::UnknownMachine(caller))?
            .renamed_name()
            .to_string();
        if self.registry.link(&caller_renamed, interface).is_none() {
            return Err(RuntimeError::UnknownLink {
                caller: caller_renamed,
                interface: interface.to_string(),
            });
        }
        self.instantiate_interface(MachineRef::Impl(caller), interface, payload)
            .map_err(|f| RuntimeError::Faulted(self.record_fault(f)))
    }

    /// Create a machine through `interface` as executed by `caller`'s code.
    pub(crate) fn instantiate_interface(
        &mut self,
        caller: MachineRef,
        interface: &str,
        payload: Value,
    ) -> Result<InterfaceValue, Fault> {
        let (caller_renamed, caller_display) = {
            let m = self.machine_ref(caller)?;
            (m.renamed_name().to_string(), m.display_name())
        };
        if self.registry.is_visible_interface(interface) {
            self.visible_trace.add_action(interface, payload.to_string());
        }
        let renamed = self
            .registry
            .link(&caller_renamed, interface)
            .map(str::to_string)
            .ok_or_else(|| {
                Fault::internal(format!("{caller_renamed} has no link for interface {interface}"))
            })?;
        let def = self
            .registry
            .resolve(&renamed)
            .cloned()
            .ok_or_else(|| Fault::internal(format!("no machine definition for {renamed}")))?;
        let permissions = self
            .registry
            .interface(interface)
            .cloned()
            .unwrap_or_else(|| Arc::clone(def.permissions()));

        let id = self.spawn(&def, &renamed, payload)?;
        if let Some(observer) = &self.observer {
            observer.machine_created(&self.impl_machines[id.0]);
        }
        let created = self.impl_machines[id.0].display_name();
        self.trace.line(|| {
            format!("<CreateLog> Machine {created} was created by machine {caller_display}")
        });
        debug!(machine = %created, by = %caller_display, interface, "machine created");
        Ok(InterfaceValue::new(id, permissions))
    }

    fn spawn(&mut self, def: &Arc<MachineDef>, renamed: &str, payload: Value) -> Result<MachineId, Fault> {
        let instance = self.next_instance_number(def.name());
        let machine = Machine::new(
            Arc::clone(def),
            renamed,
            instance,
            self.registry.is_safe(renamed),
            payload,
        )?;
        let id = MachineId(self.impl_machines.len());
        self.impl_machines.push(machine);
        Ok(id)
    }

    /// Create the monitor registered as `name` and run it to quiescence.
    ///
    /// # Errors
    ///
    /// Fails if `name` is not a monitor definition, was already created, or
    /// faults while running its start state.
    pub fn create_spec_machine(&mut self, name: &str) -> Result<usize, RuntimeError> {
        self.check_live()?;
        let def = self
            .registry
            .resolve(name)
            .filter(|d| d.is_spec())
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownDefinition {
                name: name.to_string(),
            })?;
        if self.monitor(name).is_some() {
            return Err(RuntimeError::InvalidDefinition {
                machine: name.to_string(),
                reason: "monitor already created".to_string(),
            });
        }
        self.trace
            .line(|| format!("<CreateLog> Spec Machine {name} was created by machine Runtime"));
        debug!(monitor = name, "monitor created");
        let instance = self
            .spec_machines
            .iter()
            .filter(|m| m.name() == def.name())
            .count()
            + 1;
        let machine = Machine::new(def, name, instance, self.registry.is_safe(name), Value::Null)
            .map_err(|f| RuntimeError::Faulted(self.record_fault(f)))?;
        self.spec_machines.push(machine);
        self.run_monitors()?;
        Ok(self.spec_machines.len() - 1)
    }

    /// Instance number the next machine of type `def_name` receives.
    #[must_use]
    pub fn next_instance_number(&self, def_name: &str) -> usize {
        self.impl_machines
            .iter()
            .filter(|m| m.name() == def_name)
            .count()
            + 1
    }

    /// Deliver `event` to every monitor observing both the event and the
    /// source machine's type. Delivery is an enqueue; monitors run when the
    /// container next drains them.
    ///
    /// # Errors
    ///
    /// [`Fault::IllegalEnqueue`] for a null or non-event value,
    /// [`Fault::InhabitsType`] for a payload outside the declared type.
    pub fn announce(&mut self, event: &Value, payload: &Value, source: MachineRef) -> Result<(), Fault> {
        let ev = match event {
            Value::Event(ev) if !ev.is_null() => ev.clone(),
            Value::Null | Value::Event(_) => {
                return Err(Fault::illegal_enqueue("announced event must not be null"))
            }
            other => {
                return Err(Fault::illegal_enqueue(format!(
                    "announced value {other} is not an event"
                )))
            }
        };
        check_payload(&ev, payload)?;

        let (source_renamed, sender) = {
            let m = self.machine_ref(source)?;
            (m.renamed_name().to_string(), m.sender_info())
        };
        let registry = Arc::clone(&self.registry);
        for monitor in registry.monitors_of(&source_renamed) {
            let Some(idx) = self
                .spec_machines
                .iter()
                .position(|m| m.renamed_name() == monitor)
            else {
                continue;
            };
            let mon = &mut self.spec_machines[idx];
            if !mon.def().observes(&ev) {
                continue;
            }
            let mon_name = mon.display_name();
            mon.enqueue(ev.clone(), payload.clone(), sender.clone())?;
            self.trace.line(|| {
                format!("<AnnounceLog> Enqueued Event <{ev}, {payload}> to Spec Machine {mon_name}")
            });
            trace!(event = %ev, monitor = %mon_name, "announced");
        }
        Ok(())
    }

    /// No implementation machine is enabled and some monitor is hot.
    #[must_use]
    pub fn deadlock(&self) -> bool {
        let enabled = self
            .impl_machines
            .iter()
            .any(|m| m.status() == MachineStatus::Enabled);
        let hot = self
            .spec_machines
            .iter()
            .any(|m| m.temperature() == Temperature::Hot);
        !enabled && hot
    }

    /// Ids of enabled implementation machines, in creation order.
    #[must_use]
    pub fn enabled_machines(&self) -> Vec<MachineId> {
        self.impl_machines
            .iter()
            .enumerate()
            .filter(|(_, m)| m.status() == MachineStatus::Enabled)
            .map(|(i, _)| MachineId(i))
            .collect()
    }

    /// Run machine `id` until it yields, then drain the monitors.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Terminated`] if the branch already faulted,
    /// [`RuntimeError::Faulted`] if this step faulted, and
    /// [`RuntimeError::NotEnabled`] / [`RuntimeError::UnknownMachine`] for a
    /// bad id.
    pub fn run_machine(&mut self, id: MachineId) -> Result<(), RuntimeError> {
        self.check_live()?;
        let status = self
            .machine(id)
            .ok_or(RuntimeError::UnknownMachine(id))?
            .status();
        if status != MachineStatus::Enabled {
            return Err(RuntimeError::NotEnabled { id, status });
        }
        control::run(self, MachineRef::Impl(id))
            .map_err(|f| RuntimeError::Faulted(self.record_fault(f)))?;
        self.run_monitors()
    }

    /// Run enabled monitors until none is enabled.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Faulted`] if a monitor faults or never quiesces.
    pub fn run_monitors(&mut self) -> Result<(), RuntimeError> {
        self.check_live()?;
        let mut rounds = 0;
        loop {
            let enabled: Vec<usize> = self
                .spec_machines
                .iter()
                .enumerate()
                .filter(|(_, m)| m.status() == MachineStatus::Enabled)
                .map(|(i, _)| i)
                .collect();
            if enabled.is_empty() {
                return Ok(());
            }
            rounds += 1;
            if rounds > self.config.max_steps_per_run {
                let fault = Fault::internal("monitors did not quiesce");
                return Err(RuntimeError::Faulted(self.record_fault(fault)));
            }
            for idx in enabled {
                control::run(self, MachineRef::Spec(idx))
                    .map_err(|f| RuntimeError::Faulted(self.record_fault(f)))?;
            }
        }
    }

    /// Ad hoc driver: repeatedly run the first enabled machine. Returns the
    /// number of steps taken.
    ///
    /// # Errors
    ///
    /// Propagates the first fault.
    pub fn run(&mut self, max_steps: usize) -> Result<usize, RuntimeError> {
        let mut steps = 0;
        while steps < max_steps {
            let Some(&id) = self.enabled_machines().first() else {
                break;
            };
            self.run_machine(id)?;
            steps += 1;
        }
        Ok(steps)
    }

    /// Fault that ended this branch, if any.
    #[must_use]
    pub fn fault(&self) -> Option<&Arc<Fault>> {
        self.fault.as_ref()
    }

    fn record_fault(&mut self, fault: Fault) -> Arc<Fault> {
        if let Some(existing) = &self.fault {
            return Arc::clone(existing);
        }
        debug!(%fault, class = ?fault.class(), "branch faulted");
        let fault = Arc::new(fault);
        self.fault = Some(Arc::clone(&fault));
        fault
    }

    fn check_live(&self) -> Result<(), RuntimeError> {
        match &self.fault {
            Some(f) => Err(RuntimeError::Terminated(Arc::clone(f))),
            None => Ok(()),
        }
    }

    pub(crate) fn next_choice(&mut self) -> bool {
        match &self.choice {
            Some(provider) => provider.next_bool(),
            None => {
                warn!("no choice provider installed; using fallback generator");
                self.fallback.next_bool()
            }
        }
    }

    /// SHA-256 fingerprint of the runtime-relevant state.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }

    /// 64-bit hash of the runtime-relevant state.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Implementation machine by id.
    #[must_use]
    pub fn machine(&self, id: MachineId) -> Option<&Machine> {
        self.impl_machines.get(id.0)
    }

    /// All implementation machines in creation order.
    #[must_use]
    pub fn machines(&self) -> &[Machine] {
        &self.impl_machines
    }

    /// All monitors in creation order.
    #[must_use]
    pub fn monitors(&self) -> &[Machine] {
        &self.spec_machines
    }

    /// Monitor by registered name.
    #[must_use]
    pub fn monitor(&self, name: &str) -> Option<&Machine> {
        self.spec_machines.iter().find(|m| m.renamed_name() == name)
    }

    /// Visible-trace projection.
    #[must_use]
    pub fn visible_trace(&self) -> &VisibleTrace {
        &self.visible_trace
    }

    /// Diagnostic log.
    #[must_use]
    pub fn trace(&self) -> &TraceLog {
        &self.trace
    }

    pub(crate) fn machine_ref(&self, r: MachineRef) -> Result<&Machine, Fault> {
        let found = match r {
            MachineRef::Impl(id) => self.impl_machines.get(id.0),
            MachineRef::Spec(idx) => self.spec_machines.get(idx),
        };
        found.ok_or_else(|| Fault::internal(format!("dangling machine reference {r:?}")))
    }

    pub(crate) fn machine_mut(&mut self, r: MachineRef) -> Result<&mut Machine, Fault> {
        let found = match r {
            MachineRef::Impl(id) => self.impl_machines.get_mut(id.0),
            MachineRef::Spec(idx) => self.spec_machines.get_mut(idx),
        };
        found.ok_or_else(|| Fault::internal(format!("dangling machine reference {r:?}")))
    }
}

impl Hash for RuntimeState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.impl_machines.hash(state);
        self.spec_machines.hash(state);
    }
}

/// Payload check shared by send, raise, and announce. A null payload type
/// admits only the null value.
pub(crate) fn check_payload(ev: &Event, payload: &Value) -> Result<(), Fault> {
    let ty = ev.payload_type();
    if !payload.inhabits(ty) {
        return Err(Fault::InhabitsType {
            message: format!("payload {payload} does not match type {ty} of event {ev}"),
        });
    }
    Ok(())
}
