//! The capability traits every component, action and event must fulfil.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{ComponentError, SharedContext};

/// Free-form step parameters (values may embed `{{alias}}` placeholders).
pub type Params = Map<String, Value>;

/// The keyed result produced by an action or event.
///
/// A map carrying `"success": false` is a well-formed failure; any other
/// map (including one with no `success` key) counts as success.
pub type ResultMap = Map<String, Value>;

/// Invoked by a persistent listener for every event it receives.
///
/// The returned future is awaited in-line on the listener's own task, so a
/// listener never has two callbacks in flight at once.
pub type EventCallback = Arc<dyn Fn(ResultMap) -> BoxFuture<'static, ()> + Send + Sync>;

/// A constructible integration (e.g. a chat platform client).
pub trait Component: Send + Sync + 'static {
    /// Registry name of the component.
    fn name(&self) -> &str;

    /// Apply a stored setup profile. Built-in components accept anything.
    fn setup(&mut self, profile: &Params) -> Result<(), ComponentError>;

    /// Lets actions reach their concrete component type.
    fn as_any(&self) -> &dyn Any;
}

/// A unit of work bound to a component instance and a parameter map.
#[async_trait]
pub trait Action: Send + Sync {
    /// Run the action against the current shared context.
    async fn execute(&self, ctx: &SharedContext) -> Result<ResultMap, ComponentError>;

    /// Allowed values for `field_name`, for interactive workflow builders.
    fn field_choices(&self, _field_name: &str, _field_config: &Value) -> Vec<String> {
        Vec::new()
    }
}

/// Something that happens outside the workflow and starts it.
#[async_trait]
pub trait Event: Send + Sync {
    /// Wait for a single occurrence and return its payload.
    ///
    /// May wait forever; the engine bounds it with the step's timeout.
    async fn execute(&self, ctx: &SharedContext) -> Result<ResultMap, ComponentError>;

    /// Listen until `cancel` fires, invoking `callback` for every occurrence.
    ///
    /// Implementations must call [`ReadySignal::notify`] once the underlying
    /// source is subscribed, and must only observe `cancel` between
    /// callbacks so an in-flight cycle is allowed to finish.
    async fn listen(
        &self,
        _callback: EventCallback,
        _cancel: CancellationToken,
        _ready: ReadySignal,
    ) -> Result<(), ComponentError> {
        Err(ComponentError::Unsupported("persistent listening".into()))
    }
}

/// One-shot notification that a listener is subscribed and able to deliver.
#[derive(Debug)]
pub struct ReadySignal(Option<oneshot::Sender<()>>);

impl ReadySignal {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }

    /// Confirm readiness. Calling it more than once is harmless.
    pub fn notify(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// Whether a result map reports success.
pub fn is_success(result: &ResultMap) -> bool {
    result
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

/// The `error` text of a failed result map, if any.
pub fn error_message(result: &ResultMap) -> Option<String> {
    match result.get("error") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> ResultMap {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn success_defaults_to_true() {
        assert!(is_success(&map(json!({ "value": 1 }))));
        assert!(is_success(&map(json!({ "success": true }))));
        assert!(!is_success(&map(json!({ "success": false }))));
    }

    #[test]
    fn error_message_reads_error_field() {
        assert_eq!(
            error_message(&map(json!({ "success": false, "error": "nope" }))),
            Some("nope".into())
        );
        assert_eq!(error_message(&map(json!({ "success": false }))), None);
    }

    #[tokio::test]
    async fn ready_signal_fires_once() {
        let (mut ready, rx) = ReadySignal::new();
        ready.notify();
        ready.notify();
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn dropped_ready_signal_is_observable() {
        let (ready, rx) = ReadySignal::new();
        drop(ready);
        assert!(rx.await.is_err());
    }
}
