//! Listener lifecycle: state tracking and bounded shutdown.
//!
//! Every persistent trigger runs as one tokio task. The run keeps the
//! [`ListenerHandle`] it got at start time and stops listeners through it,
//! so cleanup never has to rebuild a component to find its listener again.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use components::ComponentError;

use crate::error::EngineError;

/// `Idle → Starting → Listening → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Idle,
    Starting,
    /// Subscribed; callbacks fire without leaving this state.
    Listening,
    Stopping,
    Stopped,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// A listener's state, shared between the run and the listener task.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<Mutex<ListenerState>>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(ListenerState::Idle)))
    }

    pub(crate) fn get(&self) -> ListenerState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set(&self, state: ListenerState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Move to `to` only if currently in `from`.
    pub(crate) fn transition(&self, from: ListenerState, to: ListenerState) -> bool {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }
}

/// What the run retains for one started listener.
pub(crate) struct ListenerHandle {
    pub(crate) trigger_id: String,
    pub(crate) state: StateCell,
    pub(crate) cancel: CancellationToken,
    pub(crate) task: JoinHandle<Result<(), ComponentError>>,
}

/// Outcome of [`crate::WorkflowRun::cleanup`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Triggers whose listener exited within the bound.
    pub stopped: Vec<String>,
    /// Triggers whose listener had to be abandoned.
    pub leaked: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.leaked.is_empty()
    }
}

/// Signal every listener, then join each one for at most `wait`.
///
/// Listeners only observe cancellation between callbacks, so the join also
/// waits for an in-flight cycle. A listener still running after `wait` is
/// aborted and reported as leaked; it is not retried.
pub(crate) async fn stop_all(handles: Vec<ListenerHandle>, wait: Duration) -> CleanupReport {
    for handle in &handles {
        handle.state.set(ListenerState::Stopping);
        handle.cancel.cancel();
    }

    let mut report = CleanupReport::default();
    for mut handle in handles {
        match tokio::time::timeout(wait, &mut handle.task).await {
            Ok(joined) => {
                if let Ok(Err(e)) = &joined {
                    error!(trigger = %handle.trigger_id, "listener exited with error: {}", e);
                }
                info!(trigger = %handle.trigger_id, "listener stopped");
                report.stopped.push(handle.trigger_id.clone());
            }
            Err(_) => {
                handle.task.abort();
                let err = EngineError::Cleanup {
                    step_id: handle.trigger_id.clone(),
                    waited: wait,
                };
                error!(trigger = %handle.trigger_id, "{}; abandoning it", err);
                report.leaked.push(handle.trigger_id.clone());
            }
        }
        handle.state.set(ListenerState::Stopped);
    }
    report
}
