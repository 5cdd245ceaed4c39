//! Reactive mode: persistent trigger listeners and callback-driven cycles.
//!
//! Each persistent trigger gets one tokio task running [`Event::listen`].
//! The callback is built and handed over before that task exists, so the
//! very first event already has somewhere to go. On every event the
//! callback runs a cycle in-line on the listener's task: publish the payload
//! under the trigger's aliases, then run every ordinary action in order.
//!
//! [`Event::listen`]: components::Event::listen

use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use components::{EventCallback, ReadySignal, ResultMap};

use crate::error::EngineError;
use crate::executor::{RunCore, StepFailure};
use crate::lifecycle::{ListenerHandle, ListenerState, StateCell};
use crate::report::CycleRecord;

impl RunCore {
    /// Start the listener for `trigger_id` and wait until it is ready.
    ///
    /// Readiness is confirmed by the listener itself; if it stays silent for
    /// `listener_ready_grace` the trigger is reported active anyway. A
    /// listener that exits before confirming fails startup.
    pub(crate) async fn start_listener(
        self: &Arc<Self>,
        trigger_id: &str,
        state: StateCell,
        parent: &CancellationToken,
    ) -> Result<ListenerHandle, EngineError> {
        state.set(ListenerState::Starting);
        let started = self.spawn_listener(trigger_id, &state, parent).await;
        match &started {
            Ok(_) => {
                if state.transition(ListenerState::Starting, ListenerState::Listening) {
                    info!(trigger = trigger_id, "persistent trigger listening");
                }
            }
            Err(_) => state.set(ListenerState::Stopped),
        }
        started
    }

    async fn spawn_listener(
        self: &Arc<Self>,
        trigger_id: &str,
        state: &StateCell,
        parent: &CancellationToken,
    ) -> Result<ListenerHandle, EngineError> {
        let step = self.step(trigger_id)?;
        let component = self.materialize(trigger_id, step).await?;
        let params = self.context.resolve_params(&step.config);
        let event_type = step.event_type.as_deref().unwrap_or_default();
        let event = self
            .registry
            .create_event(event_type, component, params)
            .map_err(|e| EngineError::from_component(trigger_id, e))?;

        let callback = self.callback_for(trigger_id);
        let cancel = parent.child_token();
        let (ready, ready_rx) = ReadySignal::new();

        let span = info_span!("listener", trigger = %trigger_id, run_id = %self.run_id);
        let task_state = state.clone();
        let task_cancel = cancel.clone();
        let mut task = tokio::spawn(
            async move {
                let outcome = event.listen(callback, task_cancel, ready).await;
                task_state.set(ListenerState::Stopped);
                outcome
            }
            .instrument(span),
        );

        match tokio::time::timeout(self.config.listener_ready_grace, ready_rx).await {
            Ok(Ok(())) => {}
            // Ready signal dropped unconfirmed: the listener gave up.
            Ok(Err(_)) => {
                cancel.cancel();
                let message =
                    match tokio::time::timeout(self.config.listener_stop_timeout, &mut task).await {
                        Ok(Ok(Err(e))) => e.to_string(),
                        Ok(Ok(Ok(()))) => "listener exited before it was ready".to_owned(),
                        Ok(Err(join)) => join.to_string(),
                        Err(_) => {
                            task.abort();
                            "listener dropped its ready signal".to_owned()
                        }
                    };
                return Err(EngineError::ListenerStartup {
                    step_id: trigger_id.to_owned(),
                    message,
                });
            }
            Err(_) => warn!(
                trigger = trigger_id,
                grace = ?self.config.listener_ready_grace,
                "listener did not confirm readiness; treating it as active"
            ),
        }

        Ok(ListenerHandle {
            trigger_id: trigger_id.to_owned(),
            state: state.clone(),
            cancel,
            task,
        })
    }

    /// The callback bound to `trigger_id`'s listener.
    ///
    /// Holds the run weakly: a listener that outlives its run (leaked on
    /// cleanup) only drops events.
    fn callback_for(self: &Arc<Self>, trigger_id: &str) -> EventCallback {
        let core = Arc::downgrade(self);
        let trigger = trigger_id.to_owned();
        Arc::new(move |payload: ResultMap| {
            let core = core.clone();
            let trigger = trigger.clone();
            async move {
                match core.upgrade() {
                    Some(core) => core.run_cycle(&trigger, payload).await,
                    None => warn!(trigger = %trigger, "event received after the run ended"),
                }
            }
            .boxed()
        })
    }

    /// One reactive cycle. Faults end the cycle, never the listener.
    pub(crate) async fn run_cycle(&self, trigger_id: &str, payload: ResultMap) {
        let _gate = if self.config.serialize_cycles {
            Some(self.cycle_gate.lock().await)
        } else {
            None
        };
        let span = info_span!("cycle", trigger = %trigger_id, run_id = %self.run_id);
        self.cycle_body(trigger_id, payload).instrument(span).await
    }

    async fn cycle_body(&self, trigger_id: &str, payload: ResultMap) {
        info!("trigger fired, running actions");
        if let Ok(step) = self.step(trigger_id) {
            self.publish(step, &payload);
        }

        let mut steps = Vec::new();
        let mut error = None;
        for action_id in self.plan.actions() {
            match self.run_step(action_id).await {
                Ok(record) => {
                    if !record.success {
                        warn!(step_id = action_id, error = ?record.error, "action reported failure");
                    }
                    steps.push(record);
                }
                Err(StepFailure { error: e, record }) => {
                    warn!(step_id = action_id, "cycle aborted: {}", e);
                    steps.push(record);
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        let success = error.is_none() && steps.iter().all(|r| r.success);
        let cycle = self.record_cycle(CycleRecord {
            trigger: trigger_id.to_owned(),
            cycle: 0,
            success,
            error,
            steps,
        });
        info!(cycle, success, "cycle completed");
    }
}
