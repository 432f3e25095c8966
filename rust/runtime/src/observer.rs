//! Lifecycle callbacks.

use crate::machine::Machine;

/// Synchronous hooks invoked by the container. Implementations must not
/// block; they run in the middle of a machine step.
pub trait RuntimeObserver: Send + Sync {
    /// A machine was created through an interface. The main machine is
    /// not reported.
    fn machine_created(&self, _machine: &Machine) {}

    /// `machine` dequeued `event` sent by `sender` from `sender_state`.
    fn event_dequeued(&self, _machine: &Machine, _event: &str, _sender: &str, _sender_state: &str) {}

    /// `machine` moved from `from` to `to`.
    fn state_transitioned(&self, _machine: &Machine, _from: &str, _to: &str, _reason: &str) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RuntimeObserver for NoopObserver {}
