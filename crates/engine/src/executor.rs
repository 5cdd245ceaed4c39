//! Workflow execution engine.
//!
//! `WorkflowEngine` turns stored or in-memory definitions into
//! [`WorkflowRun`]s. A run:
//! 1. Is planned up front: steps classified, dependencies inferred, order fixed.
//! 2. In batch mode, executes every step once in order, publishing aliased
//!    outputs into its shared context. A fault aborts the run.
//! 3. In reactive mode, waits on one-shot triggers, then starts one listener
//!    task per persistent trigger (see [`crate::reactive`]). Every event
//!    re-runs the ordinary actions. [`WorkflowRun::cleanup`] stops them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use components::{Component, ComponentKind, ComponentRegistry, Params, ResultMap, SharedContext};
use store::{StoreError, WorkflowStore, DEFAULT_PROFILE};

use crate::dependency::{DependencyGraph, DependencyInference, PlaceholderInference};
use crate::error::{ConstructionError, EngineError};
use crate::lifecycle::{stop_all, CleanupReport, ListenerHandle, ListenerState, StateCell};
use crate::models::{StepClass, StepConfig, WorkflowDefinition};
use crate::plan::ExecutionPlan;
use crate::report::{CycleRecord, ExecutionReport, RunMode, StepRecord};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single action execution, batch or reactive.
    pub action_timeout: Duration,
    /// How long reactive startup waits for a listener to confirm readiness.
    pub listener_ready_grace: Duration,
    /// Bounded join per listener during cleanup.
    pub listener_stop_timeout: Duration,
    /// Run at most one reactive cycle at a time per workflow run.
    pub serialize_cycles: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(30),
            listener_ready_grace: Duration::from_secs(2),
            listener_stop_timeout: Duration::from_secs(5),
            serialize_cycles: true,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Builds runs from definitions. Holds no per-run state, so one engine can
/// serve any number of runs.
pub struct WorkflowEngine {
    registry: Arc<ComponentRegistry>,
    store: Arc<dyn WorkflowStore>,
    inference: Arc<dyn DependencyInference>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<ComponentRegistry>,
        store: Arc<dyn WorkflowStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            store,
            inference: Arc::new(PlaceholderInference),
            config,
        }
    }

    /// Replace the placeholder-based dependency model.
    pub fn with_inference(mut self, inference: Arc<dyn DependencyInference>) -> Self {
        self.inference = inference;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Validate and order a definition without creating a run.
    pub fn plan(&self, definition: &WorkflowDefinition) -> Result<ExecutionPlan, ConstructionError> {
        ExecutionPlan::build_with(definition, self.inference.as_ref())
    }

    /// Load `name` for `owner` from the store and instantiate it.
    ///
    /// # Errors
    /// [`EngineError::Store`] if the document is missing or malformed,
    /// [`EngineError::Construction`] if it cannot be planned.
    #[instrument(skip(self))]
    pub async fn load(&self, owner: &str, name: &str) -> Result<WorkflowRun, EngineError> {
        let document = self.store.load_workflow(owner, name).await?;
        let definition = WorkflowDefinition::from_value(document)
            .map_err(|e| StoreError::InvalidDocument(format!("workflow '{name}': {e}")))?;
        self.instantiate(owner, definition)
    }

    /// Plan `definition` and wrap it in a fresh run with an empty context.
    pub fn instantiate(
        &self,
        owner: &str,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowRun, EngineError> {
        let plan = self.plan(&definition)?;
        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            owner,
            workflow = %definition.name,
            mode = ?plan.mode(),
            "workflow instantiated"
        );

        let core = RunCore {
            run_id,
            owner: owner.to_owned(),
            definition,
            plan,
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            context: SharedContext::new(),
            cycles: AtomicU64::new(0),
            last_cycle: Mutex::new(None),
            cycle_gate: tokio::sync::Mutex::new(()),
        };
        Ok(WorkflowRun {
            core: Arc::new(core),
            listeners: tokio::sync::Mutex::new(Vec::new()),
            states: Mutex::new(BTreeMap::new()),
            cancel: CancellationToken::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// RunCore: state shared by the run handle and its listener tasks
// ---------------------------------------------------------------------------

/// A step that raised instead of returning a result.
pub(crate) struct StepFailure {
    pub(crate) error: EngineError,
    pub(crate) record: StepRecord,
}

pub(crate) struct RunCore {
    pub(crate) run_id: Uuid,
    pub(crate) owner: String,
    pub(crate) definition: WorkflowDefinition,
    pub(crate) plan: ExecutionPlan,
    pub(crate) registry: Arc<ComponentRegistry>,
    pub(crate) store: Arc<dyn WorkflowStore>,
    pub(crate) config: EngineConfig,
    pub(crate) context: SharedContext,
    pub(crate) cycles: AtomicU64,
    pub(crate) last_cycle: Mutex<Option<CycleRecord>>,
    pub(crate) cycle_gate: tokio::sync::Mutex<()>,
}

impl RunCore {
    pub(crate) fn step(&self, step_id: &str) -> Result<&StepConfig, EngineError> {
        self.definition
            .steps
            .get(step_id)
            .ok_or_else(|| EngineError::ConfigResolution {
                step_id: step_id.to_owned(),
                message: "step is not part of the workflow".into(),
            })
    }

    /// Build the step's component, applying its setup profile when the
    /// component talks to a third party. A missing profile leaves the
    /// component un-configured.
    pub(crate) async fn materialize(
        &self,
        step_id: &str,
        step: &StepConfig,
    ) -> Result<Arc<dyn Component>, EngineError> {
        let mut component = self
            .registry
            .create_component(&step.component)
            .map_err(|e| EngineError::from_component(step_id, e))?;

        if self.registry.component_kind(&step.component) == Some(ComponentKind::ThirdParty) {
            let profile_name = step.setup_name.as_deref().unwrap_or(DEFAULT_PROFILE);
            match self
                .store
                .load_setup_profile(&self.owner, &step.component, profile_name)
                .await
            {
                Ok(profile) => {
                    component.setup(&profile).map_err(|e| EngineError::Setup {
                        step_id: step_id.to_owned(),
                        component: step.component.clone(),
                        message: e.to_string(),
                    })?;
                    debug!(step_id, component = %step.component, profile = profile_name, "setup applied");
                }
                Err(e) if e.is_not_found() => {
                    debug!(step_id, component = %step.component, profile = profile_name, "no setup profile stored");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Arc::from(component))
    }

    /// Copy the declared result keys into the context under their aliases.
    pub(crate) fn publish(&self, step: &StepConfig, output: &ResultMap) {
        self.context.update(
            step.output_mapping
                .iter()
                .filter_map(|(key, alias)| output.get(key).map(|v| (alias.clone(), v.clone()))),
        );
    }

    /// Execute one action or one-shot trigger against the current context.
    pub(crate) async fn run_step(&self, step_id: &str) -> Result<StepRecord, StepFailure> {
        let started_at: DateTime<Utc> = Utc::now();
        let mut resolved = Params::new();
        match self.dispatch(step_id, &mut resolved).await {
            Ok(output) => Ok(StepRecord::completed(step_id, output, resolved, started_at)),
            Err(error) => Err(StepFailure {
                record: StepRecord::failed(step_id, &error, resolved, started_at),
                error,
            }),
        }
    }

    async fn dispatch(&self, step_id: &str, resolved: &mut Params) -> Result<ResultMap, EngineError> {
        let step = self.step(step_id)?;
        let class = step.classify(step_id)?;
        let component = self.materialize(step_id, step).await?;

        *resolved = self.context.resolve_params(&step.config);
        debug!(step_id, params = ?resolved, "parameters resolved");

        let output = match class {
            StepClass::Action => {
                let action_type = step.action_type.as_deref().unwrap_or_default();
                let action = self
                    .registry
                    .create_action(action_type, component, resolved.clone())
                    .map_err(|e| EngineError::from_component(step_id, e))?;

                let bound = self.config.action_timeout;
                match tokio::time::timeout(bound, action.execute(&self.context)).await {
                    Ok(result) => result.map_err(|e| EngineError::fault(step_id, e))?,
                    Err(_) => return Err(EngineError::timeout(step_id, bound)),
                }
            }
            StepClass::OneShotTrigger(wait) => {
                let event_type = step.event_type.as_deref().unwrap_or_default();
                let event = self
                    .registry
                    .create_event(event_type, component, resolved.clone())
                    .map_err(|e| EngineError::from_component(step_id, e))?;

                match tokio::time::timeout(wait, event.execute(&self.context)).await {
                    Ok(result) => result.map_err(|e| EngineError::fault(step_id, e))?,
                    Err(_) => {
                        let message =
                            format!("{} waiting for an event", EngineError::timeout(step_id, wait));
                        warn!(step_id, "{}", message);
                        failure_result(message)
                    }
                }
            }
            StepClass::PersistentTrigger => {
                return Err(EngineError::ConfigResolution {
                    step_id: step_id.to_owned(),
                    message: "persistent triggers run as listeners, not as steps".into(),
                })
            }
        };

        self.publish(step, &output);
        Ok(output)
    }

    /// Run the one-shot triggers (and, in batch mode, the actions) in order.
    ///
    /// Returns `false` once the report has been marked as failed.
    async fn run_sequence(&self, steps: &[&str], report: &mut ExecutionReport) -> bool {
        for &step_id in steps {
            match self.run_step(step_id).await {
                Ok(record) => {
                    let is_trigger = self.plan.class_of(step_id).is_some_and(StepClass::is_trigger);
                    if record.success {
                        info!(step_id, "step succeeded");
                    } else {
                        warn!(step_id, error = ?record.error, "step reported failure");
                    }
                    let error = record.error.clone();
                    report.steps.insert(step_id.to_owned(), record);

                    // Nothing downstream can run without the event that starts it.
                    if is_trigger && error.is_some() {
                        report.error = Some(format!(
                            "trigger '{step_id}' failed: {}",
                            error.unwrap_or_default()
                        ));
                        return false;
                    }
                }
                Err(StepFailure { error: e, record }) => {
                    error!(step_id, "step failed: {}", e);
                    report.steps.insert(step_id.to_owned(), record);
                    report.error = Some(e.to_string());
                    return false;
                }
            }
        }
        true
    }

    async fn run_batch(&self) -> ExecutionReport {
        let mut report = self.new_report(RunMode::Batch);
        let order: Vec<&str> = self.plan.order().iter().map(String::as_str).collect();

        if !self.run_sequence(&order, &mut report).await {
            return self.finish(report, false);
        }

        let failed = report.steps.values().find(|r| !r.success);
        if let Some(record) = failed {
            report.error = Some(format!(
                "step '{}' reported failure: {}",
                record.step_id,
                record.error.as_deref().unwrap_or("unknown error")
            ));
        }
        let success = report.error.is_none();
        self.finish(report, success)
    }

    pub(crate) fn new_report(&self, mode: RunMode) -> ExecutionReport {
        ExecutionReport {
            run_id: self.run_id,
            workflow: self.definition.name.clone(),
            mode,
            success: false,
            error: None,
            steps: BTreeMap::new(),
            active_triggers: Vec::new(),
            managed_actions: Vec::new(),
            context: Default::default(),
        }
    }

    pub(crate) fn finish(&self, mut report: ExecutionReport, success: bool) -> ExecutionReport {
        report.success = success;
        report.context = self.context.snapshot();
        match &report.error {
            None => info!(mode = ?report.mode, "workflow run completed"),
            Some(e) => error!(mode = ?report.mode, "workflow run failed: {}", e),
        }
        report
    }

    pub(crate) fn record_cycle(&self, mut record: CycleRecord) -> u64 {
        let mut last = self.last_cycle.lock().unwrap_or_else(PoisonError::into_inner);
        let cycle = self.cycles.load(Ordering::SeqCst) + 1;
        record.cycle = cycle;
        *last = Some(record);
        self.cycles.store(cycle, Ordering::SeqCst);
        cycle
    }
}

fn failure_result(message: String) -> ResultMap {
    match json!({ "success": false, "error": message }) {
        Value::Object(map) => map,
        _ => ResultMap::new(),
    }
}

// ---------------------------------------------------------------------------
// WorkflowRun
// ---------------------------------------------------------------------------

/// One instantiated workflow: its plan, its shared context and, in reactive
/// mode, its listeners. Dropping the run cancels any listener still active.
pub struct WorkflowRun {
    core: Arc<RunCore>,
    listeners: tokio::sync::Mutex<Vec<ListenerHandle>>,
    states: Mutex<BTreeMap<String, StateCell>>,
    cancel: CancellationToken,
}

impl WorkflowRun {
    pub fn run_id(&self) -> Uuid {
        self.core.run_id
    }

    pub fn owner(&self) -> &str {
        &self.core.owner
    }

    pub fn name(&self) -> &str {
        &self.core.definition.name
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.core.definition
    }

    pub fn mode(&self) -> RunMode {
        self.core.plan.mode()
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.core.plan
    }

    pub fn order(&self) -> &[String] {
        self.core.plan.order()
    }

    pub fn dependencies(&self) -> &DependencyGraph {
        self.core.plan.dependencies()
    }

    pub fn context(&self) -> &SharedContext {
        &self.core.context
    }

    /// Run the workflow.
    ///
    /// Batch runs return when every step has run (or one faulted). Reactive
    /// runs return as soon as every persistent trigger is listening; call
    /// [`cleanup`](Self::cleanup) to stop them.
    #[instrument(
        skip(self),
        fields(
            owner = %self.core.owner,
            workflow = %self.core.definition.name,
            run_id = %self.core.run_id
        )
    )]
    pub async fn execute(&self) -> ExecutionReport {
        match self.mode() {
            RunMode::Batch => self.core.run_batch().await,
            RunMode::Reactive => self.start_reactive().await,
        }
    }

    async fn start_reactive(&self) -> ExecutionReport {
        let core = &self.core;
        let mut report = core.new_report(RunMode::Reactive);
        let mut listeners = self.listeners.lock().await;
        if !listeners.is_empty() {
            report.error = Some("workflow is already listening".into());
            return core.finish(report, false);
        }

        if !core.run_sequence(&core.plan.one_shot_triggers(), &mut report).await {
            return core.finish(report, false);
        }

        for trigger_id in core.plan.persistent_triggers() {
            let state = StateCell::new();
            self.lock_states().insert(trigger_id.to_owned(), state.clone());

            match core.start_listener(trigger_id, state, &self.cancel).await {
                Ok(handle) => listeners.push(handle),
                Err(e) => {
                    error!(trigger = trigger_id, "{}", e);
                    let started = std::mem::take(&mut *listeners);
                    let cleanup = stop_all(started, core.config.listener_stop_timeout).await;
                    debug!(?cleanup, "listeners started before the failure were stopped");
                    report.error = Some(e.to_string());
                    return core.finish(report, false);
                }
            }
        }

        report.active_triggers = listeners.iter().map(|h| h.trigger_id.clone()).collect();
        report.managed_actions = core.plan.actions().into_iter().map(str::to_owned).collect();
        info!(
            triggers = ?report.active_triggers,
            actions = ?report.managed_actions,
            "reactive workflow started"
        );
        core.finish(report, true)
    }

    /// Stop every listener this run started.
    ///
    /// Idempotent: a second call, or a call on a batch or never-started run,
    /// returns an empty report.
    #[instrument(skip(self), fields(workflow = %self.core.definition.name, run_id = %self.core.run_id))]
    pub async fn cleanup(&self) -> CleanupReport {
        let handles = std::mem::take(&mut *self.listeners.lock().await);
        if handles.is_empty() {
            debug!("no active listeners");
            return CleanupReport::default();
        }

        info!("stopping {} listener(s)", handles.len());
        let report = stop_all(handles, self.core.config.listener_stop_timeout).await;
        if !report.is_clean() {
            warn!(leaked = ?report.leaked, "some listeners did not stop in time");
        }
        report
    }

    /// State of every persistent trigger; `Idle` until the run starts it.
    pub fn listener_states(&self) -> BTreeMap<String, ListenerState> {
        let states = self.lock_states();
        self.core
            .plan
            .persistent_triggers()
            .into_iter()
            .map(|id| {
                let state = states.get(id).map_or(ListenerState::Idle, StateCell::get);
                (id.to_owned(), state)
            })
            .collect()
    }

    /// Reactive cycles finished so far, across all triggers.
    pub fn cycles_completed(&self) -> u64 {
        self.core.cycles.load(Ordering::SeqCst)
    }

    pub fn last_cycle(&self) -> Option<CycleRecord> {
        self.core
            .last_cycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_states(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StateCell>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WorkflowRun {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
