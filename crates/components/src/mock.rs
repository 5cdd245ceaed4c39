//! Test doubles for components, actions and events.
//!
//! Useful in unit and integration tests where a real integration is either
//! unavailable or irrelevant. Every double records what it was asked to do.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    Action, Component, ComponentError, ComponentRegistry, Event, EventCallback, Params,
    ReadySignal, ResultMap, SharedContext,
};

fn to_map(value: Value) -> ResultMap {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = ResultMap::new();
            map.insert("value".into(), other);
            map
        }
    }
}

// ---------------------------------------------------------------------------
// MockComponent
// ---------------------------------------------------------------------------

/// A component that stores whatever profile it is set up with.
#[derive(Debug, Clone)]
pub struct MockComponent {
    name: String,
    required_key: Option<String>,
    profile: Option<Params>,
}

impl MockComponent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required_key: None,
            profile: None,
        }
    }

    /// A component whose setup is rejected unless the profile carries `key`.
    pub fn requiring(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            required_key: Some(key.into()),
            ..Self::new(name)
        }
    }

    /// The profile applied by the last successful `setup`, if any.
    pub fn profile(&self) -> Option<&Params> {
        self.profile.as_ref()
    }
}

impl Component for MockComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, profile: &Params) -> Result<(), ComponentError> {
        if let Some(key) = &self.required_key {
            if !profile.contains_key(key) {
                return Err(ComponentError::Setup(format!(
                    "'{key}' is required to set up {}",
                    self.name
                )));
            }
        }
        self.profile = Some(profile.clone());
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// MockAction
// ---------------------------------------------------------------------------

/// Behaviour injected into `MockAction` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return a specific result map.
    ReturnValue(ResultMap),
    /// Return the resolved parameters as the result.
    Echo,
    /// Return the profile the bound `MockComponent` was set up with.
    EchoSetup,
    /// Return a well-formed `success: false` result.
    ReportFailure(String),
    /// Raise a fault.
    FailFatal(String),
    /// Sleep, then return an empty successful result.
    Sleep(Duration),
}

/// A mock action that records the parameters of every call and how many
/// of its executions overlapped.
#[derive(Clone)]
pub struct MockAction {
    behaviour: MockBehaviour,
    params: Params,
    component: Option<Arc<dyn Component>>,
    calls: Arc<Mutex<Vec<Params>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockAction {
    fn with_behaviour(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            params: Params::new(),
            component: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(value: Value) -> Self {
        Self::with_behaviour(MockBehaviour::ReturnValue(to_map(value)))
    }

    pub fn echoing() -> Self {
        Self::with_behaviour(MockBehaviour::Echo)
    }

    pub fn echoing_setup() -> Self {
        Self::with_behaviour(MockBehaviour::EchoSetup)
    }

    pub fn reporting_failure(msg: impl Into<String>) -> Self {
        Self::with_behaviour(MockBehaviour::ReportFailure(msg.into()))
    }

    /// Create a mock that always raises a fault.
    pub fn failing_fatal(msg: impl Into<String>) -> Self {
        Self::with_behaviour(MockBehaviour::FailFatal(msg.into()))
    }

    pub fn sleeping(duration: Duration) -> Self {
        Self::with_behaviour(MockBehaviour::Sleep(duration))
    }

    /// Register this mock under `action_type`. Every instance the registry
    /// builds shares this mock's call log.
    pub fn register(&self, registry: &mut ComponentRegistry, component: &str, action_type: &str) {
        let template = self.clone();
        registry.register_action(component, action_type, move |component, params| {
            let mut action = template.clone();
            action.params = params;
            action.component = Some(component);
            Ok(Box::new(action) as Box<dyn Action>)
        });
    }

    /// Number of times this action has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Parameters seen by each execution, in call order.
    pub fn calls(&self) -> Vec<Params> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Executions currently in progress.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of executions that were ever in progress at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> Result<ResultMap, ComponentError> {
        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v.clone()),
            MockBehaviour::Echo => Ok(self.params.clone()),
            MockBehaviour::EchoSetup => {
                let profile = self
                    .component
                    .as_ref()
                    .and_then(|c| c.as_any().downcast_ref::<MockComponent>())
                    .and_then(MockComponent::profile)
                    .cloned();
                Ok(to_map(json!({ "profile": profile })))
            }
            MockBehaviour::ReportFailure(msg) => {
                Ok(to_map(json!({ "success": false, "error": msg })))
            }
            MockBehaviour::FailFatal(msg) => Err(ComponentError::Fault(msg.clone())),
            MockBehaviour::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(ResultMap::new())
            }
        }
    }
}

/// Decrements the in-progress count even when the execution is cancelled.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Action for MockAction {
    async fn execute(&self, _ctx: &SharedContext) -> Result<ResultMap, ComponentError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.params.clone());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _running = InFlight(self.running.clone());
        self.respond().await
    }

    fn field_choices(&self, field_name: &str, _field_config: &Value) -> Vec<String> {
        match field_name {
            "mode" => vec!["fast".into(), "slow".into()],
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// MockEvent
// ---------------------------------------------------------------------------

/// In-process event source feeding every `MockEvent` registered with it.
#[derive(Debug, Clone)]
pub struct MockEventSource {
    tx: broadcast::Sender<ResultMap>,
}

impl Default for MockEventSource {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }
}

impl MockEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a payload to every subscribed listener; returns how many got it.
    pub fn emit(&self, payload: Value) -> usize {
        self.tx.send(to_map(payload)).unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// How a `MockEvent` behaves.
#[derive(Debug, Clone)]
pub enum MockEventBehaviour {
    /// `execute` returns this payload immediately.
    Fire(ResultMap),
    /// `execute` never returns.
    Never,
    /// Listen on the source (and have `execute` wait for its next payload).
    Listen,
    /// Refuse to start listening with this fault.
    RefuseListen(String),
    /// Confirm readiness, then ignore cancellation forever.
    IgnoreCancel,
    /// Listen on the source like `Listen` but never confirm readiness.
    ListenSilently,
}

/// A mock event counting how often it was executed or started.
#[derive(Clone)]
pub struct MockEvent {
    behaviour: MockEventBehaviour,
    source: MockEventSource,
    starts: Arc<AtomicUsize>,
}

impl MockEvent {
    fn with_behaviour(behaviour: MockEventBehaviour) -> Self {
        Self {
            behaviour,
            source: MockEventSource::new(),
            starts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn firing(payload: Value) -> Self {
        Self::with_behaviour(MockEventBehaviour::Fire(to_map(payload)))
    }

    pub fn never() -> Self {
        Self::with_behaviour(MockEventBehaviour::Never)
    }

    pub fn listening(source: &MockEventSource) -> Self {
        Self {
            source: source.clone(),
            ..Self::with_behaviour(MockEventBehaviour::Listen)
        }
    }

    pub fn listening_silently(source: &MockEventSource) -> Self {
        Self {
            source: source.clone(),
            ..Self::with_behaviour(MockEventBehaviour::ListenSilently)
        }
    }

    pub fn refusing(msg: impl Into<String>) -> Self {
        Self::with_behaviour(MockEventBehaviour::RefuseListen(msg.into()))
    }

    pub fn ignoring_cancel() -> Self {
        Self::with_behaviour(MockEventBehaviour::IgnoreCancel)
    }

    pub fn register(&self, registry: &mut ComponentRegistry, component: &str, event_type: &str) {
        let template = self.clone();
        registry.register_event(component, event_type, move |_component, _params| {
            Ok(Arc::new(template.clone()) as Arc<dyn Event>)
        });
    }

    /// Number of `execute` or `listen` calls so far.
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Event for MockEvent {
    async fn execute(&self, _ctx: &SharedContext) -> Result<ResultMap, ComponentError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            MockEventBehaviour::Fire(payload) => Ok(payload.clone()),
            MockEventBehaviour::Listen | MockEventBehaviour::ListenSilently => {
                let mut rx = self.source.tx.subscribe();
                rx.recv()
                    .await
                    .map_err(|e| ComponentError::Fault(format!("event source closed: {e}")))
            }
            _ => futures::future::pending().await,
        }
    }

    async fn listen(
        &self,
        callback: EventCallback,
        cancel: CancellationToken,
        mut ready: ReadySignal,
    ) -> Result<(), ComponentError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            MockEventBehaviour::Listen => {
                let rx = self.source.tx.subscribe();
                ready.notify();
                relay(rx, callback, cancel).await
            }
            MockEventBehaviour::ListenSilently => {
                // Held, never notified: dropping it would fail startup.
                let _ready = ready;
                relay(self.source.tx.subscribe(), callback, cancel).await
            }
            MockEventBehaviour::RefuseListen(msg) => Err(ComponentError::Fault(msg.clone())),
            MockEventBehaviour::IgnoreCancel => {
                ready.notify();
                futures::future::pending().await
            }
            _ => Err(ComponentError::Unsupported("persistent listening".into())),
        }
    }
}

async fn relay(
    mut rx: broadcast::Receiver<ResultMap>,
    callback: EventCallback,
    cancel: CancellationToken,
) -> Result<(), ComponentError> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            received = rx.recv() => match received {
                Ok(payload) => callback(payload).await,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}
