//! End-to-end tests for the workflow engine.
//!
//! Every test wires `MockAction`/`MockEvent` doubles into a fresh registry
//! and runs against a `MemoryStore`, so nothing touches the network or disk.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use components::mock::{MockAction, MockComponent, MockEvent, MockEventSource};
use components::{Component, ComponentKind, ComponentRegistry};
use store::{MemoryStore, SetupProfile, WorkflowStore};

use crate::{
    ConstructionError, EngineConfig, EngineError, ListenerState, RunMode, StepConfig,
    WorkflowDefinition, WorkflowEngine, WorkflowRun,
};

const OWNER: &str = "tester";

/// A registry with a built-in `mock` component and a third-party `crm` one.
fn registry() -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    registry.register_component("mock", ComponentKind::BuiltIn, || {
        Box::new(MockComponent::new("mock")) as Box<dyn Component>
    });
    registry.register_component("crm", ComponentKind::ThirdParty, || {
        Box::new(MockComponent::requiring("crm", "api_key")) as Box<dyn Component>
    });
    registry
}

fn engine(registry: ComponentRegistry) -> WorkflowEngine {
    engine_with(registry, Arc::new(MemoryStore::new()), EngineConfig::default())
}

fn engine_with(
    registry: ComponentRegistry,
    store: Arc<MemoryStore>,
    config: EngineConfig,
) -> WorkflowEngine {
    WorkflowEngine::new(Arc::new(registry), store, config)
}

fn run(engine: &WorkflowEngine, definition: WorkflowDefinition) -> WorkflowRun {
    engine
        .instantiate(OWNER, definition)
        .expect("workflow should instantiate")
}

async fn wait_for_cycles(run: &WorkflowRun, n: u64) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while run.cycles_completed() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("reactive cycles did not complete in time");
}

fn profile(v: serde_json::Value) -> SetupProfile {
    serde_json::from_value(v).unwrap()
}

// ============================================================
// Construction
// ============================================================

#[test]
fn cyclic_placeholders_fail_construction() {
    // A←C, B←A, C←B
    let mut r = registry();
    MockAction::echoing().register(&mut r, "mock", "mock.echo");
    let def = WorkflowDefinition::new("loop")
        .with_step(
            "a",
            StepConfig::action("mock", "mock.echo")
                .with_param("in", "{{c_out}}")
                .with_output("in", "a_out"),
        )
        .with_step(
            "b",
            StepConfig::action("mock", "mock.echo")
                .with_param("in", "{{a_out}}")
                .with_output("in", "b_out"),
        )
        .with_step(
            "c",
            StepConfig::action("mock", "mock.echo")
                .with_param("in", "{{b_out}}")
                .with_output("in", "c_out"),
        );

    match engine(r).instantiate(OWNER, def) {
        Err(EngineError::Construction(ConstructionError::CircularDependency { steps })) => {
            assert_eq!(steps, vec!["a", "b", "c"]);
        }
        Err(other) => panic!("expected a circular dependency, got {other}"),
        Ok(_) => panic!("expected a circular dependency"),
    }
}

#[test]
fn empty_workflow_fails_construction() {
    let err = engine(registry())
        .instantiate(OWNER, WorkflowDefinition::new("nothing"))
        .err()
        .unwrap();
    assert!(matches!(
        err,
        EngineError::Construction(ConstructionError::EmptyWorkflow(_))
    ));
}

#[tokio::test]
async fn workflow_is_loaded_from_the_store() {
    let store = Arc::new(MemoryStore::new());
    let def = WorkflowDefinition::new("stored").with_step(
        "only",
        StepConfig::action("mock", "mock.value").with_output("value", "v"),
    );
    store
        .save_workflow(OWNER, "stored", &def.to_value().unwrap())
        .await
        .unwrap();

    let mut r = registry();
    MockAction::returning(json!({ "value": 7 })).register(&mut r, "mock", "mock.value");
    let engine = engine_with(r, store, EngineConfig::default());

    let run = engine.load(OWNER, "stored").await.unwrap();
    assert_eq!(run.definition(), &def);
    let report = run.execute().await;
    assert!(report.success);
    assert_eq!(report.context["v"], 7);

    assert!(matches!(
        engine.load(OWNER, "missing").await,
        Err(EngineError::Store(e)) if e.is_not_found()
    ));
}

// ============================================================
// Batch mode
// ============================================================

#[tokio::test]
async fn batch_passes_outputs_through_placeholders() {
    let mut r = registry();
    MockAction::returning(json!({ "value": "A" })).register(&mut r, "mock", "mock.value");
    let echo = MockAction::echoing();
    echo.register(&mut r, "mock", "mock.echo");

    // The consumer sorts first by id, so only the inferred edge orders them.
    let def = WorkflowDefinition::new("pipe")
        .with_step(
            "b",
            StepConfig::action("mock", "mock.echo")
                .with_param("text", "{{out_A}}")
                .with_param("untouched", "{{nobody}}")
                .with_output("text", "out_B"),
        )
        .with_step(
            "z_producer",
            StepConfig::action("mock", "mock.value").with_output("value", "out_A"),
        );
    let run = run(&engine(r), def);
    assert_eq!(run.order().to_vec(), vec!["z_producer", "b"]);

    let report = run.execute().await;
    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.mode, RunMode::Batch);
    assert_eq!(report.steps["b"].resolved_params["text"], "A");
    assert_eq!(report.steps["b"].resolved_params["untouched"], "{{nobody}}");
    assert_eq!(report.context["out_B"], "A");
    assert_eq!(echo.call_count(), 1);
    assert!(report.active_triggers.is_empty());
}

#[tokio::test]
async fn fault_aborts_the_batch_and_keeps_partial_results() {
    let mut r = registry();
    MockAction::returning(json!({ "value": 1 })).register(&mut r, "mock", "mock.value");
    MockAction::failing_fatal("boom").register(&mut r, "mock", "mock.fail");
    let after = MockAction::echoing();
    after.register(&mut r, "mock", "mock.echo");

    let def = WorkflowDefinition::new("abort")
        .with_step(
            "first",
            StepConfig::action("mock", "mock.value").with_output("value", "one"),
        )
        .with_step(
            "second",
            StepConfig::action("mock", "mock.fail")
                .with_param("x", "{{one}}")
                .with_output("value", "two"),
        )
        .with_step(
            "third",
            StepConfig::action("mock", "mock.echo").with_param("x", "{{two}}"),
        );

    let report = run(&engine(r), def).execute().await;
    assert!(!report.success);
    assert!(report.error.as_deref().unwrap().contains("boom"));
    assert!(report.steps["first"].success);
    assert!(!report.steps["second"].success);
    assert_eq!(report.steps["second"].resolved_params["x"], "1");
    assert!(!report.steps.contains_key("third"));
    assert_eq!(after.call_count(), 0);
    assert_eq!(report.context["one"], 1);
}

#[tokio::test]
async fn reported_failure_does_not_abort_the_batch() {
    let mut r = registry();
    MockAction::reporting_failure("quota exceeded").register(&mut r, "mock", "mock.soft");
    let other = MockAction::returning(json!({ "ok": true }));
    other.register(&mut r, "mock", "mock.value");

    let def = WorkflowDefinition::new("soft")
        .with_step("a", StepConfig::action("mock", "mock.soft"))
        .with_step("b", StepConfig::action("mock", "mock.value"));

    let report = run(&engine(r), def).execute().await;
    assert!(!report.success);
    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.steps["a"].error.as_deref(), Some("quota exceeded"));
    assert!(report.steps["b"].success);
    assert_eq!(other.call_count(), 1);
}

#[tokio::test]
async fn hung_action_is_bounded_by_the_action_timeout() {
    let mut r = registry();
    MockAction::sleeping(Duration::from_secs(5)).register(&mut r, "mock", "mock.slow");
    let config = EngineConfig {
        action_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let engine = engine_with(r, Arc::new(MemoryStore::new()), config);

    let def = WorkflowDefinition::new("slow").with_step("s", StepConfig::action("mock", "mock.slow"));
    let report = run(&engine, def).execute().await;
    assert!(!report.success);
    assert_eq!(
        report.error.as_deref(),
        Some("step 's' timed out after 0.05s")
    );
}

#[tokio::test]
async fn unknown_action_type_is_a_resolution_failure() {
    let def = WorkflowDefinition::new("typo")
        .with_step("s", StepConfig::action("mock", "mock.does_not_exist"));
    let report = run(&engine(registry()), def).execute().await;
    assert!(!report.success);
    assert!(report
        .error
        .as_deref()
        .unwrap()
        .starts_with("config resolution failed for step 's'"));
}

#[tokio::test]
async fn ambiguous_alias_orders_consumer_after_every_producer() {
    let mut r = registry();
    MockAction::returning(json!({ "value": "one" })).register(&mut r, "mock", "mock.one");
    MockAction::returning(json!({ "value": "two" })).register(&mut r, "mock", "mock.two");
    MockAction::echoing().register(&mut r, "mock", "mock.echo");

    let def = WorkflowDefinition::new("clash")
        .with_step("c", StepConfig::action("mock", "mock.echo").with_param("v", "{{x}}"))
        .with_step("p1", StepConfig::action("mock", "mock.one").with_output("value", "x"))
        .with_step("p2", StepConfig::action("mock", "mock.two").with_output("value", "x"));
    let run = run(&engine(r), def);

    let graph = run.dependencies();
    assert!(graph.depends_on("c", "p1") && graph.depends_on("c", "p2"));
    assert!(graph.ambiguous_aliases().contains_key("x"));
    assert_eq!(run.order().to_vec(), vec!["p1", "p2", "c"]);

    // Last writer wins in the context.
    let report = run.execute().await;
    assert_eq!(report.steps["c"].resolved_params["v"], "two");
}

// ============================================================
// Setup profiles
// ============================================================

#[tokio::test]
async fn third_party_component_gets_its_named_profile() {
    let store = Arc::new(MemoryStore::new());
    store
        .save_setup_profile(OWNER, "crm", "work", &profile(json!({ "api_key": "k-1" })))
        .await
        .unwrap();
    let mut r = registry();
    MockAction::echoing_setup().register(&mut r, "crm", "crm.whoami");
    let engine = engine_with(r, store, EngineConfig::default());

    let def = WorkflowDefinition::new("crm").with_step(
        "who",
        StepConfig::action("crm", "crm.whoami")
            .with_setup("work")
            .with_output("profile", "who"),
    );
    let report = run(&engine, def).execute().await;
    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.context["who"]["api_key"], "k-1");
}

#[tokio::test]
async fn rejected_setup_fails_the_step() {
    let store = Arc::new(MemoryStore::new());
    store
        .save_setup_profile(OWNER, "crm", "default", &profile(json!({ "user": "x" })))
        .await
        .unwrap();
    let mut r = registry();
    let action = MockAction::echoing_setup();
    action.register(&mut r, "crm", "crm.whoami");
    let engine = engine_with(r, store, EngineConfig::default());

    let def = WorkflowDefinition::new("crm").with_step("who", StepConfig::action("crm", "crm.whoami"));
    let report = run(&engine, def).execute().await;
    assert!(!report.success);
    assert!(report
        .error
        .as_deref()
        .unwrap()
        .starts_with("setup of component 'crm' failed for step 'who'"));
    assert_eq!(action.call_count(), 0);
}

#[tokio::test]
async fn missing_profile_leaves_component_unconfigured() {
    let mut r = registry();
    MockAction::echoing_setup().register(&mut r, "crm", "crm.whoami");
    let def = WorkflowDefinition::new("crm").with_step(
        "who",
        StepConfig::action("crm", "crm.whoami").with_output("profile", "who"),
    );
    let report = run(&engine(r), def).execute().await;
    assert!(report.success);
    assert!(report.context["who"].is_null());
}

// ============================================================
// One-shot triggers
// ============================================================

#[tokio::test]
async fn one_shot_trigger_timeout_is_a_reported_failure() {
    let mut r = registry();
    MockEvent::never().register(&mut r, "mock", "mock.wait");
    let downstream = MockAction::echoing();
    downstream.register(&mut r, "mock", "mock.echo");

    let def = WorkflowDefinition::new("quiet")
        .with_step(
            "wait",
            StepConfig::trigger("mock", "mock.wait")
                .with_param("timeout", 0.1)
                .with_output("text", "msg"),
        )
        .with_step(
            "use",
            StepConfig::action("mock", "mock.echo").with_param("t", "{{msg}}"),
        );

    let report = run(&engine(r), def).execute().await;
    assert!(!report.success);
    let record = &report.steps["wait"];
    assert!(!record.success);
    assert!(record.error.as_deref().unwrap().contains("0.1"));
    assert!(report.error.as_deref().unwrap().starts_with("trigger 'wait' failed"));
    assert_eq!(downstream.call_count(), 0);
}

#[tokio::test]
async fn one_shot_trigger_feeds_the_batch() {
    let mut r = registry();
    MockEvent::firing(json!({ "text": "ping" })).register(&mut r, "mock", "mock.wait");
    MockAction::echoing().register(&mut r, "mock", "mock.echo");

    let def = WorkflowDefinition::new("once")
        .with_step(
            "wait",
            StepConfig::trigger("mock", "mock.wait")
                .with_param("timeout", 1)
                .with_output("text", "msg"),
        )
        .with_step(
            "use",
            StepConfig::action("mock", "mock.echo")
                .with_param("t", "got {{msg}}")
                .with_output("t", "result"),
        );

    let report = run(&engine(r), def).execute().await;
    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.mode, RunMode::Batch);
    assert_eq!(report.context["result"], "got ping");
}

// ============================================================
// Reactive mode
// ============================================================

fn reactive_definition() -> WorkflowDefinition {
    WorkflowDefinition::new("chatbot")
        .with_step(
            "listen",
            StepConfig::trigger("mock", "mock.listen").with_output("text", "msg"),
        )
        .with_step(
            "respond",
            StepConfig::action("mock", "mock.echo")
                .with_param("reply", "you said {{msg}}")
                .with_output("reply", "answer"),
        )
}

#[tokio::test]
async fn reactive_run_returns_promptly_and_reacts_to_events() {
    let source = MockEventSource::new();
    let mut r = registry();
    MockEvent::listening(&source).register(&mut r, "mock", "mock.listen");
    let respond = MockAction::echoing();
    respond.register(&mut r, "mock", "mock.echo");

    let run = run(&engine(r), reactive_definition());
    assert_eq!(run.listener_states()["listen"], ListenerState::Idle);

    let report = tokio::time::timeout(Duration::from_secs(1), run.execute())
        .await
        .expect("reactive start must not block");
    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.mode, RunMode::Reactive);
    assert_eq!(report.active_triggers, vec!["listen"]);
    assert_eq!(report.managed_actions, vec!["respond"]);
    assert_eq!(respond.call_count(), 0);
    assert_eq!(run.listener_states()["listen"], ListenerState::Listening);

    assert_eq!(source.emit(json!({ "text": "hi" })), 1);
    wait_for_cycles(&run, 1).await;
    assert_eq!(run.context().snapshot()["answer"], "you said hi");

    source.emit(json!({ "text": "again" }));
    wait_for_cycles(&run, 2).await;
    assert_eq!(run.context().get("answer"), Some(json!("you said again")));
    assert_eq!(respond.call_count(), 2);
    let cycle = run.last_cycle().unwrap();
    assert_eq!((cycle.cycle, cycle.success), (2, true));

    let cleanup = run.cleanup().await;
    assert_eq!(cleanup.stopped, vec!["listen"]);
    assert_eq!(run.listener_states()["listen"], ListenerState::Stopped);
    assert_eq!(source.listener_count(), 0);
}

#[tokio::test]
async fn cleanup_twice_is_a_no_op() {
    let source = MockEventSource::new();
    let mut r = registry();
    MockEvent::listening(&source).register(&mut r, "mock", "mock.listen");
    MockAction::echoing().register(&mut r, "mock", "mock.echo");

    let run = run(&engine(r), reactive_definition());
    assert!(run.execute().await.success);

    let first = run.cleanup().await;
    let second = run.cleanup().await;
    assert_eq!(first.stopped, vec!["listen"]);
    assert!(second.stopped.is_empty() && second.leaked.is_empty());
    assert_eq!(run.listener_states()["listen"], ListenerState::Stopped);
}

#[tokio::test]
async fn cleanup_on_batch_run_does_nothing() {
    let mut r = registry();
    MockAction::returning(json!({})).register(&mut r, "mock", "mock.value");
    let def = WorkflowDefinition::new("b").with_step("s", StepConfig::action("mock", "mock.value"));
    let run = run(&engine(r), def);
    assert!(run.cleanup().await.stopped.is_empty());
    assert!(run.execute().await.success);
    assert!(run.cleanup().await.stopped.is_empty());
}

#[tokio::test]
async fn fault_in_a_cycle_keeps_the_listener_up() {
    let source = MockEventSource::new();
    let mut r = registry();
    MockEvent::listening(&source).register(&mut r, "mock", "mock.listen");
    let failing = MockAction::failing_fatal("downstream down");
    failing.register(&mut r, "mock", "mock.echo");

    let run = run(&engine(r), reactive_definition());
    assert!(run.execute().await.success);

    source.emit(json!({ "text": "one" }));
    wait_for_cycles(&run, 1).await;
    let cycle = run.last_cycle().unwrap();
    assert!(!cycle.success);
    assert!(cycle.error.as_deref().unwrap().contains("downstream down"));
    assert_eq!(run.listener_states()["listen"], ListenerState::Listening);

    source.emit(json!({ "text": "two" }));
    wait_for_cycles(&run, 2).await;
    assert_eq!(failing.call_count(), 2);
    // The trigger payload is still published even though the action failed.
    assert_eq!(run.context().get("msg"), Some(json!("two")));

    run.cleanup().await;
}

#[tokio::test]
async fn refused_listener_fails_startup_and_stops_the_others() {
    let source = MockEventSource::new();
    let mut r = registry();
    MockEvent::listening(&source).register(&mut r, "mock", "mock.listen");
    MockEvent::refusing("no bot token").register(&mut r, "mock", "mock.refuse");
    MockAction::echoing().register(&mut r, "mock", "mock.echo");

    let def = reactive_definition().with_step(
        "z_broken",
        StepConfig::trigger("mock", "mock.refuse").with_output("text", "msg"),
    );
    let run = run(&engine(r), def);
    let report = run.execute().await;

    assert!(!report.success);
    assert!(report.active_triggers.is_empty());
    let error = report.error.unwrap();
    assert!(error.contains("z_broken") && error.contains("no bot token"), "{error}");
    assert_eq!(run.listener_states()["listen"], ListenerState::Stopped);
    assert_eq!(run.listener_states()["z_broken"], ListenerState::Stopped);
    assert_eq!(source.listener_count(), 0);
    assert!(run.cleanup().await.stopped.is_empty());
}

#[tokio::test]
async fn listener_ignoring_cancellation_is_reported_as_leaked() {
    let mut r = registry();
    MockEvent::ignoring_cancel().register(&mut r, "mock", "mock.listen");
    MockAction::echoing().register(&mut r, "mock", "mock.echo");
    let config = EngineConfig {
        listener_stop_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let engine = engine_with(r, Arc::new(MemoryStore::new()), config);

    let run = run(&engine, reactive_definition());
    assert!(run.execute().await.success);

    let cleanup = run.cleanup().await;
    assert_eq!(cleanup.leaked, vec!["listen"]);
    assert!(!cleanup.is_clean());
    assert_eq!(run.listener_states()["listen"], ListenerState::Stopped);
}

#[tokio::test]
async fn second_execute_while_listening_is_refused() {
    let source = MockEventSource::new();
    let mut r = registry();
    MockEvent::listening(&source).register(&mut r, "mock", "mock.listen");
    MockAction::echoing().register(&mut r, "mock", "mock.echo");

    let run = run(&engine(r), reactive_definition());
    assert!(run.execute().await.success);
    let again = run.execute().await;
    assert!(!again.success);
    assert_eq!(source.listener_count(), 1);
    run.cleanup().await;
}

#[tokio::test]
async fn dropping_the_run_stops_its_listeners() {
    let source = MockEventSource::new();
    let mut r = registry();
    MockEvent::listening(&source).register(&mut r, "mock", "mock.listen");
    MockAction::echoing().register(&mut r, "mock", "mock.echo");

    let run = run(&engine(r), reactive_definition());
    assert!(run.execute().await.success);
    assert_eq!(source.listener_count(), 1);
    drop(run);

    tokio::time::timeout(Duration::from_secs(1), async {
        while source.listener_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("listener should exit once the run is dropped");
}

/// Two persistent triggers on separate sources sharing one slow action.
fn two_trigger_run(serialize_cycles: bool) -> (WorkflowRun, MockAction, MockEventSource, MockEventSource) {
    let (a, b) = (MockEventSource::new(), MockEventSource::new());
    let mut r = registry();
    MockEvent::listening(&a).register(&mut r, "mock", "mock.tick_a");
    MockEvent::listening(&b).register(&mut r, "mock", "mock.tick_b");
    let slow = MockAction::sleeping(Duration::from_millis(150));
    slow.register(&mut r, "mock", "mock.slow");

    let config = EngineConfig {
        serialize_cycles,
        ..EngineConfig::default()
    };
    let engine = engine_with(r, Arc::new(MemoryStore::new()), config);
    let def = WorkflowDefinition::new("twins")
        .with_step("tick_a", StepConfig::trigger("mock", "mock.tick_a").with_output("n", "a_n"))
        .with_step("tick_b", StepConfig::trigger("mock", "mock.tick_b").with_output("n", "b_n"))
        .with_step("slow", StepConfig::action("mock", "mock.slow"));
    (run(&engine, def), slow, a, b)
}

#[tokio::test]
async fn serialized_cycles_never_overlap() {
    let (run, slow, a, b) = two_trigger_run(true);
    let report = run.execute().await;
    assert_eq!(report.active_triggers, vec!["tick_a", "tick_b"]);

    a.emit(json!({ "n": 1 }));
    b.emit(json!({ "n": 2 }));
    wait_for_cycles(&run, 2).await;
    assert_eq!(slow.call_count(), 2);
    assert_eq!(slow.peak_concurrency(), 1);
    assert_eq!(run.context().get("a_n"), Some(json!(1)));
    assert_eq!(run.context().get("b_n"), Some(json!(2)));
    run.cleanup().await;
}

#[tokio::test]
async fn unserialized_cycles_may_overlap() {
    let (run, slow, a, b) = two_trigger_run(false);
    assert!(run.execute().await.success);

    a.emit(json!({ "n": 1 }));
    b.emit(json!({ "n": 2 }));
    wait_for_cycles(&run, 2).await;
    assert_eq!(slow.call_count(), 2);
    assert_eq!(slow.peak_concurrency(), 2);
    run.cleanup().await;
}

#[tokio::test]
async fn cleanup_waits_for_the_cycle_in_flight() {
    let source = MockEventSource::new();
    let mut r = registry();
    MockEvent::listening(&source).register(&mut r, "mock", "mock.listen");
    let slow = MockAction::sleeping(Duration::from_millis(200));
    slow.register(&mut r, "mock", "mock.echo");

    let run = run(&engine(r), reactive_definition());
    assert!(run.execute().await.success);

    source.emit(json!({ "text": "busy" }));
    tokio::time::timeout(Duration::from_secs(2), async {
        while slow.running() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("cycle did not start");
    assert_eq!(run.cycles_completed(), 0);

    let cleanup = run.cleanup().await;
    assert!(cleanup.is_clean());
    assert_eq!(cleanup.stopped, vec!["listen"]);
    assert_eq!(run.cycles_completed(), 1);
    assert!(run.last_cycle().unwrap().success);
    assert_eq!(slow.running(), 0);
    assert_eq!(run.listener_states()["listen"], ListenerState::Stopped);
}

#[tokio::test]
async fn silent_listener_is_reported_active_after_the_grace_period() {
    let source = MockEventSource::new();
    let mut r = registry();
    MockEvent::listening_silently(&source).register(&mut r, "mock", "mock.listen");
    MockAction::echoing().register(&mut r, "mock", "mock.echo");
    let config = EngineConfig {
        listener_ready_grace: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let engine = engine_with(r, Arc::new(MemoryStore::new()), config);

    let run = run(&engine, reactive_definition());
    let report = tokio::time::timeout(Duration::from_secs(1), run.execute())
        .await
        .expect("grace period must bound startup");
    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.active_triggers, vec!["listen"]);
    assert_eq!(run.listener_states()["listen"], ListenerState::Listening);

    source.emit(json!({ "text": "late" }));
    wait_for_cycles(&run, 1).await;
    assert_eq!(run.context().get("answer"), Some(json!("you said late")));
    assert!(run.cleanup().await.is_clean());
}

// ============================================================
// Built-in components
// ============================================================

#[tokio::test]
async fn inbox_messages_drive_the_formatter() {
    use components::builtin::{InboxHub, InboxMessage};

    let hub = InboxHub::new();
    let engine = engine(ComponentRegistry::with_builtins(&hub));
    let def = WorkflowDefinition::new("echo-bot")
        .with_step(
            "incoming",
            StepConfig::trigger("inbox", "inbox.receive_message")
                .with_param("channel", "support")
                .with_output("message_text", "msg")
                .with_output("user_id", "who"),
        )
        .with_step(
            "shout",
            StepConfig::action("formatter", "formatter.text")
                .with_param("operation", "replace")
                .with_param("input", "{{who}}: {{msg}}")
                .with_param("old_value", "help")
                .with_param("new_value", "HELP")
                .with_output("formatted_text", "reply"),
        );
    let run = run(&engine, def);
    let report = run.execute().await;
    assert!(report.success, "{:?}", report.error);
    assert_eq!(hub.subscriber_count(), 1);

    // Other channels are ignored by the trigger.
    hub.publish(InboxMessage::new("random", "bob", "help?"));
    hub.publish(InboxMessage::new("support", "ana", "please help"));
    wait_for_cycles(&run, 1).await;
    assert_eq!(run.context().get("reply"), Some(json!("ana: please HELP")));

    run.cleanup().await;
    assert_eq!(hub.subscriber_count(), 0);
}

#[tokio::test]
async fn inbox_default_channel_comes_from_its_setup_profile() {
    use components::builtin::{InboxHub, InboxMessage};

    let hub = InboxHub::new();
    let store = Arc::new(MemoryStore::new());
    store
        .save_setup_profile(OWNER, "inbox", "default", &profile(json!({ "channel": "alerts" })))
        .await
        .unwrap();
    let engine = engine_with(ComponentRegistry::with_builtins(&hub), store, EngineConfig::default());
    let def = WorkflowDefinition::new("alerts")
        .with_step(
            "incoming",
            StepConfig::trigger("inbox", "inbox.receive_message").with_output("message_text", "msg"),
        )
        .with_step(
            "copy",
            StepConfig::action("formatter", "formatter.text")
                .with_param("operation", "urlencode")
                .with_param("input", "{{msg}}")
                .with_output("formatted_text", "reply"),
        );
    let run = run(&engine, def);
    assert!(run.execute().await.success);

    hub.publish(InboxMessage::new("other-channel", "bob", "should be filtered"));
    hub.publish(InboxMessage::new("alerts", "ana", "disk full"));
    wait_for_cycles(&run, 1).await;
    assert_eq!(run.context().get("reply"), Some(json!("disk%20full")));
    assert_eq!(run.cycles_completed(), 1);
    run.cleanup().await;
}

#[tokio::test]
async fn inbox_receive_format_send_round_trip() {
    use components::builtin::{InboxHub, InboxMessage};

    let hub = InboxHub::new();
    let mut outbox = hub.subscribe_outbox();
    let engine = engine(ComponentRegistry::with_builtins(&hub));
    let def = WorkflowDefinition::new("echo-bot")
        .with_step(
            "incoming",
            StepConfig::trigger("inbox", "inbox.receive_message")
                .with_param("keyword", "ping")
                .with_output("message_text", "msg")
                .with_output("channel", "chan"),
        )
        .with_step(
            "format",
            StepConfig::action("formatter", "formatter.text")
                .with_param("operation", "replace")
                .with_param("input", "{{msg}}")
                .with_param("old_value", "ping")
                .with_param("new_value", "pong")
                .with_output("formatted_text", "reply"),
        )
        .with_step(
            "answer",
            StepConfig::action("inbox", "inbox.send_message")
                .with_param("channel", "{{chan}}")
                .with_param("message", "{{reply}}")
                .with_output("message_ts", "sent_ts"),
        );
    let run = run(&engine, def);
    assert_eq!(run.order().to_vec(), vec!["incoming", "format", "answer"]);
    assert!(run.execute().await.success);

    hub.publish(InboxMessage::new("ops", "ana", "ping from ana"));
    let sent = tokio::time::timeout(Duration::from_secs(2), outbox.recv())
        .await
        .expect("no reply was sent")
        .unwrap();
    assert_eq!(sent.channel, "ops");
    assert_eq!(sent.message_text, "pong from ana");

    wait_for_cycles(&run, 1).await;
    assert!(run.last_cycle().unwrap().success);
    assert_eq!(run.context().get("sent_ts"), Some(json!(sent.timestamp)));
    run.cleanup().await;
}
