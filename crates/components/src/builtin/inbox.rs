//! `inbox`: an in-process message hub standing in for an inbound chat source.
//!
//! Messages published to an [`InboxHub`] are fanned out to every subscribed
//! `inbox.receive_message` event. A message published while nobody listens
//! is dropped. Replies sent by `inbox.send_message` go to the hub's outbox,
//! never back to the inbound side.

use std::any::Any;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    Action, Component, ComponentError, Event, EventCallback, Params, ReadySignal, ResultMap,
    SharedContext,
};

pub const NAME: &str = "inbox";
pub const RECEIVE_EVENT: &str = "inbox.receive_message";
pub const SEND_ACTION: &str = "inbox.send_message";

/// `user_id` stamped on outgoing messages.
pub const BOT_USER: &str = "workflow-manager";

const HUB_CAPACITY: usize = 256;

/// One inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxMessage {
    pub message_text: String,
    pub user_id: String,
    pub channel: String,
    pub timestamp: String,
}

impl InboxMessage {
    pub fn new(
        channel: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            message_text: text.into(),
            user_id: user_id.into(),
            channel: channel.into(),
            timestamp: format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros()),
        }
    }

    fn into_result(self) -> ResultMap {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => ResultMap::new(),
        }
    }
}

/// Fan-out hub shared by the publisher and every inbox component.
#[derive(Debug, Clone)]
pub struct InboxHub {
    tx: broadcast::Sender<InboxMessage>,
    outbox: broadcast::Sender<InboxMessage>,
}

impl Default for InboxHub {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        let (outbox, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx, outbox }
    }
}

impl InboxHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `message` to current subscribers; returns how many received it.
    pub fn publish(&self, message: InboxMessage) -> usize {
        match self.tx.send(message) {
            Ok(n) => n,
            Err(_) => {
                debug!("inbox message dropped: no subscribers");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn subscribe(&self) -> broadcast::Receiver<InboxMessage> {
        self.tx.subscribe()
    }

    /// Receive every message sent by `inbox.send_message` from now on.
    pub fn subscribe_outbox(&self) -> broadcast::Receiver<InboxMessage> {
        self.outbox.subscribe()
    }

    fn send(&self, message: InboxMessage) {
        if self.outbox.send(message).is_err() {
            debug!("outgoing inbox message has no reader");
        }
    }
}

/// The `inbox` component. Its optional setup profile may name a default
/// `channel`.
#[derive(Debug, Clone)]
pub struct Inbox {
    hub: InboxHub,
    default_channel: Option<String>,
}

impl Inbox {
    pub fn new(hub: InboxHub) -> Self {
        Self {
            hub,
            default_channel: None,
        }
    }
}

impl Component for Inbox {
    fn name(&self) -> &str {
        NAME
    }

    fn setup(&mut self, profile: &Params) -> Result<(), ComponentError> {
        self.default_channel = profile
            .get("channel")
            .and_then(Value::as_str)
            .map(str::to_owned);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `inbox.receive_message`: filter by `channel` and an optional `keyword`.
#[derive(Debug)]
pub struct ReceiveMessageEvent {
    hub: InboxHub,
    channel: Option<String>,
    keyword: Option<String>,
}

impl ReceiveMessageEvent {
    pub fn from_component(component: &dyn Component, params: Params) -> Result<Self, ComponentError> {
        let inbox = component
            .as_any()
            .downcast_ref::<Inbox>()
            .ok_or_else(|| {
                ComponentError::InvalidConfig(format!(
                    "'{RECEIVE_EVENT}' needs an inbox component, got '{}'",
                    component.name()
                ))
            })?;

        let text = |key: &str| {
            params
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };

        Ok(Self {
            hub: inbox.hub.clone(),
            channel: text("channel").or_else(|| inbox.default_channel.clone()),
            keyword: text("keyword"),
        })
    }

    fn accepts(&self, message: &InboxMessage) -> bool {
        let channel_ok = self
            .channel
            .as_deref()
            .map_or(true, |c| c == message.channel);
        let keyword_ok = self
            .keyword
            .as_deref()
            .map_or(true, |k| message.message_text.contains(k));
        channel_ok && keyword_ok
    }

    async fn next_match(
        &self,
        rx: &mut broadcast::Receiver<InboxMessage>,
    ) -> Option<InboxMessage> {
        loop {
            match rx.recv().await {
                Ok(message) if self.accepts(&message) => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "inbox listener lagged; messages were missed");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
impl Event for ReceiveMessageEvent {
    async fn execute(&self, _ctx: &SharedContext) -> Result<ResultMap, ComponentError> {
        let mut rx = self.hub.subscribe();
        match self.next_match(&mut rx).await {
            Some(message) => Ok(message.into_result()),
            None => Err(ComponentError::Fault("inbox hub closed".into())),
        }
    }

    async fn listen(
        &self,
        callback: EventCallback,
        cancel: CancellationToken,
        mut ready: ReadySignal,
    ) -> Result<(), ComponentError> {
        let mut rx = self.hub.subscribe();
        ready.notify();
        debug!(channel = ?self.channel, keyword = ?self.keyword, "inbox listener subscribed");

        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                message = self.next_match(&mut rx) => message,
            };
            match message {
                Some(message) => callback(message.into_result()).await,
                None => return Ok(()),
            }
        }
    }
}

/// `inbox.send_message`: post `message` to `channel` (or the profile's
/// default channel).
///
/// A missing message or channel is a well-formed failure, not a fault.
#[derive(Debug)]
pub struct SendMessageAction {
    hub: InboxHub,
    channel: Option<String>,
    message: String,
}

impl SendMessageAction {
    pub fn from_component(component: &dyn Component, params: Params) -> Result<Self, ComponentError> {
        let inbox = component
            .as_any()
            .downcast_ref::<Inbox>()
            .ok_or_else(|| {
                ComponentError::InvalidConfig(format!(
                    "'{SEND_ACTION}' needs an inbox component, got '{}'",
                    component.name()
                ))
            })?;

        let channel = params
            .get("channel")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .or_else(|| inbox.default_channel.clone());
        let message = match params.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        Ok(Self {
            hub: inbox.hub.clone(),
            channel,
            message,
        })
    }
}

#[async_trait]
impl Action for SendMessageAction {
    async fn execute(&self, _ctx: &SharedContext) -> Result<ResultMap, ComponentError> {
        let channel = self.channel.clone().unwrap_or_default();
        let failed = |error: &str| {
            let mut out = ResultMap::new();
            out.insert("message_ts".into(), Value::String(String::new()));
            out.insert("channel".into(), Value::String(channel.clone()));
            out.insert("success".into(), Value::Bool(false));
            out.insert("error".into(), Value::String(error.to_owned()));
            out
        };
        if self.message.is_empty() {
            return Ok(failed("message is required"));
        }
        if channel.is_empty() {
            return Ok(failed("channel is required (in the step or the inbox setup)"));
        }

        let message = InboxMessage::new(channel.as_str(), BOT_USER, self.message.as_str());
        let timestamp = message.timestamp.clone();
        self.hub.send(message);
        debug!(channel = %channel, "inbox message sent");

        let mut out = ResultMap::new();
        out.insert("message_ts".into(), Value::String(timestamp));
        out.insert("channel".into(), Value::String(channel));
        out.insert("success".into(), Value::Bool(true));
        Ok(out)
    }
}
