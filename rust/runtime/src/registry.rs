//! Read-only linkage tables.
//!
//! A translator populates a [`RegistryBuilder`] once; the frozen [`Registry`]
//! is shared by `Arc` with every container and every clone and is never
//! mutated afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::event::Event;
use crate::machine::MachineDef;
use crate::runtime::RuntimeError;

/// Frozen linkage tables.
#[derive(Debug, Default)]
pub struct Registry {
    definitions: BTreeMap<String, Arc<MachineDef>>,
    machine_defs: BTreeMap<String, String>,
    is_safe: BTreeMap<String, bool>,
    links: BTreeMap<String, BTreeMap<String, String>>,
    monitors: Vec<(String, BTreeSet<String>)>,
    interfaces: BTreeMap<String, Arc<BTreeSet<Event>>>,
    visible_events: BTreeSet<String>,
    visible_interfaces: BTreeSet<String>,
}

impl Registry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Concrete definition behind a renamed machine name.
    #[must_use]
    pub fn resolve(&self, renamed: &str) -> Option<&Arc<MachineDef>> {
        let concrete = self.machine_defs.get(renamed)?;
        self.definitions.get(concrete)
    }

    /// Renamed machine that `interface` denotes when created by `caller`.
    #[must_use]
    pub fn link(&self, caller: &str, interface: &str) -> Option<&str> {
        self.links
            .get(caller)
            .and_then(|m| m.get(interface))
            .map(String::as_str)
    }

    /// Safety flag of a renamed machine (false when unlisted).
    #[must_use]
    pub fn is_safe(&self, renamed: &str) -> bool {
        self.is_safe.get(renamed).copied().unwrap_or(false)
    }

    /// Permission set declared for `interface`.
    #[must_use]
    pub fn interface(&self, interface: &str) -> Option<&Arc<BTreeSet<Event>>> {
        self.interfaces.get(interface)
    }

    /// Monitors in registration order, with the renamed machines each observes.
    pub fn monitors(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.monitors.iter().map(|(name, obs)| (name.as_str(), obs))
    }

    /// Monitors observing the renamed machine `source`, in registration order.
    pub fn monitors_of<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.monitors
            .iter()
            .filter(move |(_, obs)| obs.contains(source))
            .map(|(name, _)| name.as_str())
    }

    /// Whether sends of `event` are recorded in the visible trace.
    #[must_use]
    pub fn is_visible_event(&self, event: &Event) -> bool {
        self.visible_events.contains(event.name())
    }

    /// Whether creations through `interface` are recorded in the visible trace.
    #[must_use]
    pub fn is_visible_interface(&self, interface: &str) -> bool {
        self.visible_interfaces.contains(interface)
    }
}

/// Builder for [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    inner: Registry,
}

impl RegistryBuilder {
    /// Register a machine definition under its own name. The definition is
    /// also reachable under that name as a renamed machine.
    #[must_use]
    pub fn define(mut self, def: Arc<MachineDef>) -> Self {
        let name = def.name().to_string();
        self.inner
            .machine_defs
            .entry(name.clone())
            .or_insert_with(|| name.clone());
        self.inner.definitions.insert(name, def);
        self
    }

    /// Make `renamed` an alias of the concrete machine `concrete`.
    #[must_use]
    pub fn rename(mut self, renamed: impl Into<String>, concrete: impl Into<String>) -> Self {
        self.inner.machine_defs.insert(renamed.into(), concrete.into());
        self
    }

    /// Set the safety flag of a renamed machine.
    #[must_use]
    pub fn safe(mut self, renamed: impl Into<String>, is_safe: bool) -> Self {
        self.inner.is_safe.insert(renamed.into(), is_safe);
        self
    }

    /// Let `caller` create `renamed` through `interface`.
    #[must_use]
    pub fn link(
        mut self,
        caller: impl Into<String>,
        interface: impl Into<String>,
        renamed: impl Into<String>,
    ) -> Self {
        self.inner
            .links
            .entry(caller.into())
            .or_default()
            .insert(interface.into(), renamed.into());
        self
    }

    /// Register a monitor observing the given renamed machines.
    #[must_use]
    pub fn monitor<I, S>(mut self, name: impl Into<String>, observed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let observed: BTreeSet<String> = observed.into_iter().map(Into::into).collect();
        if let Some(entry) = self.inner.monitors.iter_mut().find(|(n, _)| *n == name) {
            entry.1.extend(observed);
        } else {
            self.inner.monitors.push((name, observed));
        }
        self
    }

    /// Declare an interface and its permitted events.
    #[must_use]
    pub fn interface(
        mut self,
        name: impl Into<String>,
        events: impl IntoIterator<Item = Event>,
    ) -> Self {
        self.inner
            .interfaces
            .insert(name.into(), Arc::new(events.into_iter().collect()));
        self
    }

    /// Record sends of `event` in the visible trace.
    #[must_use]
    pub fn visible_event(mut self, event: impl Into<String>) -> Self {
        self.inner.visible_events.insert(event.into());
        self
    }

    /// Record creations through `interface` in the visible trace.
    #[must_use]
    pub fn visible_interface(mut self, interface: impl Into<String>) -> Self {
        self.inner.visible_interfaces.insert(interface.into());
        self
    }

    /// Validate cross references and freeze.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::UnknownDefinition`] if a renaming, link, or
    /// monitor names a machine that was never defined, and
    /// [`RuntimeError::InvalidDefinition`] if a monitor entry is not a
    /// monitor definition.
    pub fn build(self) -> Result<Arc<Registry>, RuntimeError> {
        let reg = self.inner;
        for (renamed, concrete) in &reg.machine_defs {
            if !reg.definitions.contains_key(concrete) {
                return Err(RuntimeError::UnknownDefinition {
                    name: format!("{renamed} -> {concrete}"),
                });
            }
        }
        for target in reg.links.values().flat_map(BTreeMap::values) {
            if !reg.machine_defs.contains_key(target) {
                return Err(RuntimeError::UnknownDefinition {
                    name: target.clone(),
                });
            }
        }
        for (name, _) in &reg.monitors {
            let def = reg.resolve(name).ok_or_else(|| RuntimeError::UnknownDefinition {
                name: name.clone(),
            })?;
            if !def.is_spec() {
                return Err(RuntimeError::InvalidDefinition {
                    machine: name.clone(),
                    reason: "registered as a monitor but declares no observed events"
                        .to_string(),
                });
            }
        }
        Ok(Arc::new(reg))
    }
}
