//! Per-machine mailboxes.
//!
//! An [`EventBuffer`] is FIFO modulo filtering: dequeue takes the first entry
//! the owner is currently willing to accept, skipping deferred events (or,
//! during a selective receive, events outside the receive set).

use std::collections::{BTreeSet, VecDeque};
use std::hash::{Hash, Hasher};

use crate::event::Event;
use crate::faults::Fault;
use crate::value::Value;

/// Identity of the machine that sent an event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderInfo {
    /// Display name of the sender (`Name-instance`).
    pub machine: String,
    /// Sender's state at send time.
    pub state: String,
}

impl SenderInfo {
    /// Create sender info.
    #[must_use]
    pub fn new(machine: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            machine: machine.into(),
            state: state.into(),
        }
    }
}

/// A queued event.
#[derive(Debug, Clone)]
pub struct EventNode {
    /// The event.
    pub event: Event,
    /// Its payload.
    pub payload: Value,
    /// Who sent it. Diagnostic only, not part of the hash.
    pub sender: SenderInfo,
}

impl Hash for EventNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.event.hash(state);
        self.payload.hash(state);
    }
}

/// Which events a machine is willing to take right now.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryFilter<'a> {
    /// Effective deferred set of the owner's top state frame.
    pub deferred: &'a BTreeSet<Event>,
    /// Active selective-receive set; empty when not receiving.
    pub receive: &'a BTreeSet<Event>,
}

impl DeliveryFilter<'_> {
    /// Whether `event` can be delivered under this filter.
    #[must_use]
    pub fn admits(&self, event: &Event) -> bool {
        if self.receive.is_empty() {
            !self.deferred.contains(event)
        } else {
            self.receive.contains(event)
        }
    }
}

/// Ordered mailbox of pending events.
#[derive(Debug, Clone, Default, Hash)]
pub struct EventBuffer {
    events: VecDeque<EventNode>,
}

impl EventBuffer {
    /// Create an empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the mailbox is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of queued instances of `event`.
    #[must_use]
    pub fn instances_of(&self, event: &Event) -> usize {
        self.events.iter().filter(|n| &n.event == event).count()
    }

    /// Iterate queued entries head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &EventNode> {
        self.events.iter()
    }

    /// Append an event, enforcing its declared instance bound.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::AssumeFailure`] if the bound is an assumption and
    /// would be exceeded, [`Fault::MaxInstancesExceeded`] otherwise.
    pub fn enqueue(&mut self, event: Event, payload: Value, sender: SenderInfo) -> Result<(), Fault> {
        if let Some(max) = event.max_instances() {
            if self.instances_of(&event) >= max {
                return Err(if event.is_assumed() {
                    Fault::AssumeFailure {
                        event: event.name().to_string(),
                    }
                } else {
                    Fault::MaxInstancesExceeded {
                        event: event.name().to_string(),
                        max,
                    }
                });
            }
        }
        self.events.push_back(EventNode {
            event,
            payload,
            sender,
        });
        Ok(())
    }

    /// Remove and return the first entry admitted by `filter`.
    pub fn dequeue(&mut self, filter: DeliveryFilter<'_>) -> Option<EventNode> {
        let pos = self.events.iter().position(|n| filter.admits(&n.event))?;
        self.events.remove(pos)
    }

    /// Whether some entry is admitted by `filter`.
    #[must_use]
    pub fn is_enabled(&self, filter: DeliveryFilter<'_>) -> bool {
        self.events.iter().any(|n| filter.admits(&n.event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PrtType;
    use assert_matches::assert_matches;

    fn ev(name: &str) -> Event {
        Event::new(name, PrtType::Any)
    }

    fn sender() -> SenderInfo {
        SenderInfo::new("Main-1", "Init")
    }

    #[test]
    fn test_fifo_without_filtering() {
        let mut buf = EventBuffer::new();
        for name in ["e1", "e2", "e3"] {
            buf.enqueue(ev(name), Value::Null, sender()).unwrap();
        }
        let none = BTreeSet::new();
        let filter = DeliveryFilter {
            deferred: &none,
            receive: &none,
        };
        let order: Vec<String> = std::iter::from_fn(|| buf.dequeue(filter))
            .map(|n| n.event.name().to_string())
            .collect();
        assert_eq!(order, vec!["e1", "e2", "e3"]);
    }

    #[test]
    fn test_deferred_events_are_skipped_in_place() {
        let mut buf = EventBuffer::new();
        buf.enqueue(ev("a"), Value::Int(1), sender()).unwrap();
        buf.enqueue(ev("b"), Value::Int(2), sender()).unwrap();
        let deferred: BTreeSet<Event> = [ev("a")].into_iter().collect();
        let none = BTreeSet::new();
        let filter = DeliveryFilter {
            deferred: &deferred,
            receive: &none,
        };

        let node = buf.dequeue(filter).unwrap();
        assert_eq!(node.event.name(), "b");
        assert!(!buf.is_enabled(filter));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_receive_set_overrides_deferral() {
        let mut buf = EventBuffer::new();
        buf.enqueue(ev("a"), Value::Null, sender()).unwrap();
        buf.enqueue(ev("b"), Value::Null, sender()).unwrap();
        let deferred: BTreeSet<Event> = [ev("b")].into_iter().collect();
        let receive: BTreeSet<Event> = [ev("b")].into_iter().collect();
        let filter = DeliveryFilter {
            deferred: &deferred,
            receive: &receive,
        };
        assert_eq!(buf.dequeue(filter).unwrap().event.name(), "b");
        assert!(!buf.is_enabled(filter));
    }

    #[test]
    fn test_instance_bound() {
        let bounded = crate::event::EventDecl::new("x", PrtType::Null)
            .with_max_instances(2)
            .build();
        let assumed = crate::event::EventDecl::new("y", PrtType::Null)
            .with_assumed_max_instances(2)
            .build();
        let mut buf = EventBuffer::new();
        for _ in 0..2 {
            buf.enqueue(bounded.clone(), Value::Null, sender()).unwrap();
            buf.enqueue(assumed.clone(), Value::Null, sender()).unwrap();
        }
        assert_matches!(
            buf.enqueue(bounded, Value::Null, sender()),
            Err(Fault::MaxInstancesExceeded { max: 2, .. })
        );
        assert_matches!(
            buf.enqueue(assumed, Value::Null, sender()),
            Err(Fault::AssumeFailure { .. })
        );
        assert_eq!(buf.len(), 4);
    }
}
