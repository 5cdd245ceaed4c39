//! Explicit registration table mapping type names to factories.
//!
//! The engine receives a registry by handle; nothing here is global.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{Action, Component, ComponentError, Event, Params};

/// Whether a component needs a stored setup profile before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    /// Works without configuration (formatters, local hubs).
    BuiltIn,
    /// Talks to a third party and must be set up from a profile.
    ThirdParty,
}

type ComponentFactory = Arc<dyn Fn() -> Box<dyn Component> + Send + Sync>;
type ActionFactory =
    Arc<dyn Fn(Arc<dyn Component>, Params) -> Result<Box<dyn Action>, ComponentError> + Send + Sync>;
type EventFactory =
    Arc<dyn Fn(Arc<dyn Component>, Params) -> Result<Arc<dyn Event>, ComponentError> + Send + Sync>;

struct ComponentEntry {
    kind: ComponentKind,
    factory: ComponentFactory,
}

struct BoundEntry<F> {
    component: String,
    factory: F,
}

/// Maps component, action and event type names to constructors.
#[derive(Default)]
pub struct ComponentRegistry {
    components: BTreeMap<String, ComponentEntry>,
    actions: BTreeMap<String, BoundEntry<ActionFactory>>,
    events: BTreeMap<String, BoundEntry<EventFactory>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component type. A later registration replaces an earlier one.
    pub fn register_component<F>(&mut self, name: impl Into<String>, kind: ComponentKind, factory: F)
    where
        F: Fn() -> Box<dyn Component> + Send + Sync + 'static,
    {
        self.components.insert(
            name.into(),
            ComponentEntry {
                kind,
                factory: Arc::new(factory),
            },
        );
    }

    /// Register an action type (conventionally `component.action`).
    pub fn register_action<F>(
        &mut self,
        component: impl Into<String>,
        action_type: impl Into<String>,
        factory: F,
    ) where
        F: Fn(Arc<dyn Component>, Params) -> Result<Box<dyn Action>, ComponentError>
            + Send
            + Sync
            + 'static,
    {
        self.actions.insert(
            action_type.into(),
            BoundEntry {
                component: component.into(),
                factory: Arc::new(factory),
            },
        );
    }

    /// Register an event type (conventionally `component.event`).
    pub fn register_event<F>(
        &mut self,
        component: impl Into<String>,
        event_type: impl Into<String>,
        factory: F,
    ) where
        F: Fn(Arc<dyn Component>, Params) -> Result<Arc<dyn Event>, ComponentError>
            + Send
            + Sync
            + 'static,
    {
        self.events.insert(
            event_type.into(),
            BoundEntry {
                component: component.into(),
                factory: Arc::new(factory),
            },
        );
    }

    pub fn component_kind(&self, name: &str) -> Option<ComponentKind> {
        self.components.get(name).map(|e| e.kind)
    }

    /// Fresh, not-yet-set-up instance of the named component.
    pub fn create_component(&self, name: &str) -> Result<Box<dyn Component>, ComponentError> {
        self.components
            .get(name)
            .map(|e| (e.factory)())
            .ok_or_else(|| ComponentError::unknown("component", name))
    }

    pub fn create_action(
        &self,
        action_type: &str,
        component: Arc<dyn Component>,
        params: Params,
    ) -> Result<Box<dyn Action>, ComponentError> {
        let entry = self
            .actions
            .get(action_type)
            .ok_or_else(|| ComponentError::unknown("action", action_type))?;
        check_binding("action", action_type, &entry.component, component.as_ref())?;
        (entry.factory)(component, params)
    }

    pub fn create_event(
        &self,
        event_type: &str,
        component: Arc<dyn Component>,
        params: Params,
    ) -> Result<Arc<dyn Event>, ComponentError> {
        let entry = self
            .events
            .get(event_type)
            .ok_or_else(|| ComponentError::unknown("event", event_type))?;
        check_binding("event", event_type, &entry.component, component.as_ref())?;
        (entry.factory)(component, params)
    }

    pub fn component_names(&self) -> Vec<&str> {
        self.components.keys().map(String::as_str).collect()
    }

    pub fn action_types_for(&self, component: &str) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|(_, e)| e.component == component)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn event_types_for(&self, component: &str) -> Vec<&str> {
        self.events
            .iter()
            .filter(|(_, e)| e.component == component)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

fn check_binding(
    kind: &'static str,
    type_name: &str,
    expected: &str,
    component: &dyn Component,
) -> Result<(), ComponentError> {
    if component.name() == expected {
        Ok(())
    } else {
        Err(ComponentError::InvalidConfig(format!(
            "{kind} '{type_name}' belongs to component '{expected}', not '{}'",
            component.name()
        )))
    }
}
