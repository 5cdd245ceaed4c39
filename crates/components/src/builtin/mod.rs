//! Built-in components shipped with the workflow manager.

pub mod formatter;
pub mod inbox;
pub mod webhook;

use std::sync::Arc;

use crate::{Action, Component, ComponentKind, ComponentRegistry, Event};

pub use inbox::{InboxHub, InboxMessage};

impl ComponentRegistry {
    /// A registry pre-populated with `formatter`, `inbox` and `webhook`.
    ///
    /// `inbox` events subscribe to `hub`; publish to it to drive them.
    pub fn with_builtins(hub: &InboxHub) -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry, hub);
        registry
    }
}

/// Register every built-in component, action and event into `registry`.
pub fn register_builtins(registry: &mut ComponentRegistry, hub: &InboxHub) {
    registry.register_component(formatter::NAME, ComponentKind::BuiltIn, || {
        Box::new(formatter::Formatter) as Box<dyn Component>
    });
    registry.register_action(formatter::NAME, formatter::TEXT_ACTION, |_, params| {
        Ok(Box::new(formatter::TextAction::new(params)) as Box<dyn Action>)
    });
    registry.register_action(formatter::NAME, formatter::NUMBER_ACTION, |_, params| {
        Ok(Box::new(formatter::NumberAction::new(params)) as Box<dyn Action>)
    });

    // Third-party so a stored profile can supply the default channel; a
    // missing profile leaves it unset.
    let hub = hub.clone();
    registry.register_component(inbox::NAME, ComponentKind::ThirdParty, move || {
        Box::new(inbox::Inbox::new(hub.clone())) as Box<dyn Component>
    });
    registry.register_event(inbox::NAME, inbox::RECEIVE_EVENT, |component, params| {
        inbox::ReceiveMessageEvent::from_component(component.as_ref(), params)
            .map(|e| Arc::new(e) as Arc<dyn Event>)
    });
    registry.register_action(inbox::NAME, inbox::SEND_ACTION, |component, params| {
        inbox::SendMessageAction::from_component(component.as_ref(), params)
            .map(|a| Box::new(a) as Box<dyn Action>)
    });

    registry.register_component(webhook::NAME, ComponentKind::BuiltIn, || {
        Box::new(webhook::Webhook::default()) as Box<dyn Component>
    });
    registry.register_action(webhook::NAME, webhook::GET_ACTION, |_, params| {
        Ok(Box::new(webhook::RequestAction::get(params)?) as Box<dyn Action>)
    });
    registry.register_action(webhook::NAME, webhook::POST_ACTION, |_, params| {
        Ok(Box::new(webhook::RequestAction::post(params)?) as Box<dyn Action>)
    });
}
