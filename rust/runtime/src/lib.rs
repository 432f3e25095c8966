//! Execution engine for compiled P state-machine programs.
//!
//! A P program is a set of communicating state machines. The compiler lowers
//! each machine to a [`MachineDef`] whose states carry entry, exit,
//! transition, and do functions written against [`ExecContext`]. This crate
//! runs those definitions inside a [`RuntimeState`]: a container that a test
//! driver or model checker steps one machine at a time, clones at choice
//! points, and hashes to detect revisited states.
//!
//! # Architecture
//!
//! - **Registry** ([`Registry`]): link map, renames, interfaces, monitor
//!   observation lists, and visible-trace filters. Read-only and shared.
//! - **Machines** ([`Machine`]): state stack with derived deferred and
//!   action sets, a function stack, a continuation, and a mailbox.
//! - **Run loop** (`control`): advances one machine to its next scheduling
//!   point; resume position lives in the machine so clones continue
//!   identically.
//! - **Execution surface** ([`ExecContext`]): the operations compiled
//!   function bodies call: send, raise, goto, pop, announce, create, receive,
//!   and nondeterministic choice.
//! - **Faults** ([`Fault`]): every error a program can hit. A fault ends the
//!   branch; [`Fault::AssumeFailure`] marks it infeasible rather than buggy.
//!
//! Monitors (spec machines) observe announced events and are drained after
//! every implementation step. [`RuntimeState::deadlock`] reports a hot
//! monitor with no enabled implementation machine.
//!
//! # Usage
//!
//! ```ignore
//! use prt_runtime::{Registry, RuntimeConfig, RuntimeState};
//!
//! let registry = Registry::builder().define(main_def).build()?;
//! let mut rt = RuntimeState::new(registry, RuntimeConfig::default());
//! let main = rt.create_main_machine("Main")?;
//! while let Some(&id) = rt.enabled_machines().first() {
//!     let mut branch = rt.clone();
//!     branch.run_machine(id)?;
//!     rt = branch;
//! }
//! ```

pub mod buffer;
pub mod choice;
pub mod config;
mod control;
pub mod event;
pub mod exec;
pub mod faults;
pub mod fingerprint;
pub mod fun;
pub mod machine;
pub mod observer;
pub mod registry;
pub mod runtime;
pub mod state;
pub mod trace;
pub mod value;

pub use buffer::{EventBuffer, EventNode, SenderInfo};
pub use choice::{ChoiceProvider, EntropyChoice, ScriptedChoice, SeededChoice};
pub use config::RuntimeConfig;
pub use event::{Event, EventDecl, HALT_EVENT, NULL_EVENT};
pub use exec::{CallOutcome, ExecContext};
pub use faults::{classify_fault, fault_code, Fault, FaultClass};
pub use fingerprint::Fingerprint;
pub use fun::{BlockFun, Continuation, ContinuationReason, Fun, FunFrame, FunRef, FunStack};
pub use machine::{
    DefKind, Machine, MachineDef, MachineDefBuilder, MachineId, MachineRef, MachineStatus,
    NextOperation, StateExitReason,
};
pub use observer::{NoopObserver, RuntimeObserver};
pub use registry::{Registry, RegistryBuilder};
pub use runtime::{RuntimeError, RuntimeState};
pub use state::{DoHandler, EventDisposition, State, StateId, StateStack, Temperature};
pub use trace::{TraceLog, VisibleAction, VisibleTrace};
pub use value::{inhabits_type, InterfaceValue, PrtType, Value};
