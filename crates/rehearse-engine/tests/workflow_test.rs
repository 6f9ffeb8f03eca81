mod common;

use async_trait::async_trait;
use common::MockBackend;
use rehearse_engine::backend::Backend;
use rehearse_engine::executor::ActionExecutor;
use rehearse_engine::protocol::{ActionResult, Selector, Strategy, Target};
use rehearse_engine::resolution::ResolutionEngine;
use rehearse_engine::workflow::{
    CancelToken, ItemRotation, Navigate, Perform, Reload, StateMachine, Step, StepAction,
    StopReason, WorkItem, WorkflowDefinition, WorkflowError, WorkflowOptions, WorkflowState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn executor() -> ActionExecutor {
    ActionExecutor::new(
        ResolutionEngine::with_tick(Duration::from_millis(1)),
        Duration::from_millis(200),
    )
}

fn target(css: &str) -> Target {
    Target::new(css, vec![Strategy::css(css).with_timeout(Duration::ZERO)])
}

fn click(css: &str) -> Step {
    Step::new(css, Perform::click(target(css)))
}

fn css(query: &str) -> Selector {
    Selector::Css(query.to_string())
}

fn definition(cycle: Vec<Step>, completion: &[&str], recovery: Step) -> WorkflowDefinition {
    WorkflowDefinition {
        name: "test".into(),
        setup: Vec::new(),
        cycle,
        completion: completion.iter().map(|c| target(c)).collect(),
        recovery,
        rotation: None,
    }
}

fn options(max_steps: usize, max_iterations: u64) -> WorkflowOptions {
    WorkflowOptions {
        max_steps_per_cycle: max_steps,
        max_consecutive_failures: 3,
        max_iterations: Some(max_iterations),
    }
}

/// Fails except on every `period`-th call.
struct Flaky {
    calls: AtomicUsize,
    period: usize,
}

#[async_trait]
impl StepAction for Flaky {
    async fn run(&self, _backend: &mut dyn Backend, _executor: &ActionExecutor) -> ActionResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % self.period == 0 {
            ActionResult::success()
        } else {
            ActionResult::failed(format!("attempt {}", call))
        }
    }

    fn describe(&self) -> String {
        "flaky".into()
    }
}

/// Cancels the run from inside a step.
struct CancelNow(CancelToken);

#[async_trait]
impl StepAction for CancelNow {
    async fn run(&self, _backend: &mut dyn Backend, _executor: &ActionExecutor) -> ActionResult {
        self.0.cancel();
        ActionResult::success()
    }

    fn describe(&self) -> String {
        "cancel".into()
    }
}

#[tokio::test]
async fn completion_goes_straight_to_recovery() {
    let mut backend = MockBackend::new();
    let doc = backend.document.clone();
    for id in ["a", "b", "c", "#restart"] {
        doc.add_css(id);
    }
    doc.add(css("#done"), false);
    doc.reveal_on_click(css("b"), css("#done"));
    doc.hide_on_click(css("#restart"), css("#done"));

    let def = definition(
        vec![click("a"), click("b"), click("c")],
        &["#done"],
        click("#restart"),
    );
    let mut machine = StateMachine::new(def, options(10, 2), executor()).unwrap();
    let summary = machine
        .run(&mut backend, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(
        backend.events.all(),
        vec!["click a", "click b", "click #restart", "click a", "click b", "click #restart"]
    );
    assert_eq!(summary.iterations, 2);
    assert_eq!(summary.recoveries, 2);
    assert_eq!(summary.stop_reason, StopReason::IterationLimit);
    assert!(machine.history().contains(&WorkflowState::Completing));
    assert!(machine.history().contains(&WorkflowState::Restarting));
    assert_eq!(machine.state(), WorkflowState::Stopped);
}

#[tokio::test]
async fn spent_budget_starts_a_new_pass_without_failing() {
    let mut backend = MockBackend::new();
    backend.document.add_css("a");
    backend.document.add_css("b");

    let def = definition(vec![click("a"), click("b")], &["#never"], click("#restart"));
    let mut machine = StateMachine::new(def, options(3, 2), executor()).unwrap();
    let summary = machine
        .run(&mut backend, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(
        backend.events.all(),
        vec!["click a", "click b", "click a", "click a", "click b", "click a"]
    );
    assert_eq!(summary.steps_executed, 6);
    assert_eq!(summary.recoveries, 0);
    assert!(!machine.history().contains(&WorkflowState::Failing));
    assert!(!machine.history().contains(&WorkflowState::Completing));
}

#[tokio::test]
async fn repeated_recovery_failure_exhausts_the_workflow() {
    let mut backend = MockBackend::new();
    backend.document.add_css("a");
    backend.document.add_css("#done");

    let def = definition(vec![click("a")], &["#done"], click("#restart"));
    let mut machine = StateMachine::new(def, WorkflowOptions::default(), executor()).unwrap();
    let err = machine
        .run(&mut backend, &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::WorkflowExhausted { failures: 4 }));
    assert_eq!(machine.cycle_state().iteration, 4);
    assert_eq!(backend.events.count("click a"), 4);
    assert_eq!(machine.state(), WorkflowState::Stopped);
    let failing = machine
        .history()
        .iter()
        .filter(|s| **s == WorkflowState::Failing)
        .count();
    assert_eq!(failing, 4);
}

#[tokio::test]
async fn successful_recovery_resets_the_failure_count() {
    let mut backend = MockBackend::new();
    backend.document.add_css("a");
    backend.document.add_css("#done");

    let recovery = Step::new(
        "flaky_restart",
        Flaky {
            calls: AtomicUsize::new(0),
            period: 4,
        },
    );
    let def = definition(vec![click("a")], &["#done"], recovery);
    let mut machine = StateMachine::new(def, options(10, 12), executor()).unwrap();
    let summary = machine
        .run(&mut backend, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.stop_reason, StopReason::IterationLimit);
    assert_eq!(summary.iterations, 12);
    assert_eq!(summary.recoveries, 3);
    assert_eq!(machine.cycle_state().consecutive_failures, 0);
}

#[tokio::test]
async fn step_terminal_check_signals_completion() {
    let mut backend = MockBackend::new();
    let doc = backend.document.clone();
    doc.add_css("play");
    doc.add_css("pause");
    doc.add_css("#restart");
    doc.add(css("#finished"), false);
    doc.reveal_on_click(css("play"), css("#finished"));
    doc.hide_on_click(css("#restart"), css("#finished"));

    let play = click("play").with_terminal_check(target("#finished"));
    let def = definition(vec![play, click("pause")], &[], click("#restart"));
    let mut machine = StateMachine::new(def, options(10, 1), executor()).unwrap();
    machine
        .run(&mut backend, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(backend.events.all(), vec!["click play", "click #restart"]);
    assert!(machine.cycle_state().last_completion_check);
}

#[tokio::test]
async fn required_setup_failure_stops_the_machine() {
    let mut backend = MockBackend::new();
    backend.document.add_css("a");

    let mut def = definition(vec![click("a")], &[], click("#restart"));
    def.setup = vec![
        Step::new(
            "open",
            Navigate {
                url: "https://example.com/login".into(),
            },
        ),
        click("#login"),
    ];
    let mut machine = StateMachine::new(def, WorkflowOptions::default(), executor()).unwrap();
    let err = machine
        .run(&mut backend, &CancelToken::new())
        .await
        .unwrap_err();

    match err {
        WorkflowError::SetupFailed { step, .. } => assert_eq!(step, "#login"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.events.all(), vec!["navigate https://example.com/login"]);
    assert!(!machine.history().contains(&WorkflowState::Running));
}

#[tokio::test]
async fn optional_setup_steps_may_fail() {
    let mut backend = MockBackend::new();
    backend.document.add_css("#login");
    backend.document.add_css("a");

    let mut def = definition(vec![click("a")], &[], click("#restart"));
    def.setup = vec![click("#cookie-banner").optional(), click("#login")];
    let mut machine = StateMachine::new(def, options(1, 1), executor()).unwrap();
    let summary = machine
        .run(&mut backend, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(backend.events.all(), vec!["click #login", "click a"]);
    assert_eq!(summary.step_failures, 0);
}

#[tokio::test]
async fn cancellation_is_observed_at_the_next_step_boundary() {
    let mut backend = MockBackend::new();
    backend.document.add_css("b");

    let cancel = CancelToken::new();
    let def = definition(
        vec![Step::new("stop", CancelNow(cancel.clone())), click("b")],
        &[],
        click("#restart"),
    );
    let mut machine = StateMachine::new(
        def,
        WorkflowOptions {
            max_iterations: None,
            ..WorkflowOptions::default()
        },
        executor(),
    )
    .unwrap();
    let summary = machine.run(&mut backend, &cancel).await.unwrap();

    assert_eq!(summary.stop_reason, StopReason::Cancelled);
    assert_eq!(summary.steps_executed, 1);
    assert_eq!(backend.events.count("click b"), 0);
}

#[tokio::test]
async fn cancellation_interrupts_a_settle_pause() {
    let mut backend = MockBackend::new();
    backend.document.add_css("a");

    let slow = click("a").with_settle(Duration::from_secs(30));
    let def = definition(vec![slow], &[], click("#restart"));
    let mut machine = StateMachine::new(def, WorkflowOptions::default(), executor()).unwrap();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let summary = tokio::time::timeout(Duration::from_secs(5), machine.run(&mut backend, &cancel))
        .await
        .expect("settle must not outlive cancellation")
        .unwrap();
    assert_eq!(summary.stop_reason, StopReason::Cancelled);
    assert_eq!(backend.events.count("click a"), 1);
}

#[tokio::test]
async fn empty_cycle_is_rejected() {
    let def = definition(Vec::new(), &[], click("#restart"));
    let result = StateMachine::new(def, WorkflowOptions::default(), executor());
    assert!(matches!(result, Err(WorkflowError::InvalidDefinition(_))));
}

#[tokio::test]
async fn history_starts_idle_then_setup() {
    let mut backend = MockBackend::new();
    backend.document.add_css("a");
    let def = definition(vec![click("a")], &[], click("#restart"));
    let mut machine = StateMachine::new(def, options(1, 1), executor()).unwrap();
    machine
        .run(&mut backend, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(
        machine.history(),
        &[
            WorkflowState::Idle,
            WorkflowState::Setup,
            WorkflowState::Running,
            WorkflowState::Stopped
        ]
    );
}

#[tokio::test]
async fn hung_navigation_fails_within_its_budget() {
    let mut backend = MockBackend::new();
    backend.hang_navigation = true;
    let executor = executor().with_navigation_timeout(Duration::from_millis(50));

    let navigate = Navigate {
        url: "https://example.com/stories".into(),
    };
    let started = std::time::Instant::now();
    let result = navigate.run(&mut backend, &executor).await;
    assert!(!result.ok);
    assert!(result.to_string().contains("timed out"), "{}", result);

    let result = Reload.run(&mut backend, &executor).await;
    assert!(!result.ok);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(backend.events.all().is_empty());
}

#[tokio::test]
async fn hung_recovery_navigation_counts_as_a_failed_recovery() {
    let mut backend = MockBackend::new();
    backend.hang_navigation = true;
    backend.document.add_css("#play");
    backend.document.add_css("#done");

    let recovery = Step::new(
        "return",
        Navigate {
            url: "https://example.com/".into(),
        },
    );
    let definition = definition(vec![click("#play")], &["#done"], recovery);
    let options = WorkflowOptions {
        max_steps_per_cycle: 1,
        max_consecutive_failures: 1,
        max_iterations: None,
    };
    let mut machine = StateMachine::new(
        definition,
        options,
        executor().with_navigation_timeout(Duration::from_millis(20)),
    )
    .unwrap();

    let err = machine
        .run(&mut backend, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::WorkflowExhausted { failures: 2 }));
}

fn rotation(names: &[&str], passes: u32) -> ItemRotation {
    ItemRotation {
        items: names
            .iter()
            .map(|name| WorkItem {
                name: name.to_string(),
                enter: vec![click(name)],
            })
            .collect(),
        passes_per_item: passes,
    }
}

#[tokio::test]
async fn rotation_definitions_are_validated() {
    let mut def = definition(vec![click("#play")], &[], click("#back"));
    def.rotation = Some(rotation(&[], 1));
    assert!(StateMachine::new(def.clone(), options(1, 1), executor()).is_err());

    def.rotation = Some(rotation(&["#a"], 0));
    assert!(StateMachine::new(def.clone(), options(1, 1), executor()).is_err());

    let mut empty_entry = rotation(&["#a"], 1);
    empty_entry.items[0].enter.clear();
    def.rotation = Some(empty_entry);
    assert!(StateMachine::new(def, options(1, 1), executor()).is_err());
}

#[tokio::test]
async fn item_without_completion_is_left_after_its_passes() {
    let mut backend = MockBackend::new();
    for css in ["#a", "#b", "#play", "#back"] {
        backend.document.add_css(css);
    }

    let mut def = definition(vec![click("#play")], &["#done"], click("#back"));
    def.rotation = Some(rotation(&["#a", "#b"], 2));
    let mut machine = StateMachine::new(def, options(10, 4), executor()).unwrap();
    let summary = machine
        .run(&mut backend, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.stop_reason, StopReason::IterationLimit);
    assert_eq!(summary.items_entered, 2);
    assert_eq!(summary.recoveries, 2);
    assert_eq!(
        backend.events.all(),
        vec![
            "click #a",
            "click #play",
            "click #play",
            "click #back",
            "click #b",
            "click #play",
            "click #play",
            "click #back",
        ]
    );
    assert_eq!(machine.current_item(), None);
}

#[tokio::test]
async fn no_enterable_item_exhausts_the_workflow() {
    let mut backend = MockBackend::new();
    backend.document.add_css("#play");
    backend.document.add_css("#back");

    let mut def = definition(vec![click("#play")], &[], click("#back"));
    def.rotation = Some(rotation(&["#gone", "#missing"], 1));
    let options = WorkflowOptions {
        max_steps_per_cycle: 1,
        max_consecutive_failures: 1,
        max_iterations: None,
    };
    let mut machine = StateMachine::new(def, options, executor()).unwrap();

    let err = machine
        .run(&mut backend, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::WorkflowExhausted { failures: 2 }));
    assert_eq!(backend.events.count("click #play"), 0);
    assert_eq!(machine.state(), WorkflowState::Stopped);
}

#[tokio::test]
async fn failed_later_entry_step_backs_out_before_skipping() {
    let mut backend = MockBackend::new();
    for css in ["#a", "#b", "#play", "#back"] {
        backend.document.add_css(css);
    }

    let mut rot = rotation(&["#a", "#b"], 1);
    rot.items[0].enter.push(click("#listen"));
    let mut def = definition(vec![click("#play")], &[], click("#back"));
    def.rotation = Some(rot);
    let mut machine = StateMachine::new(def, options(1, 1), executor()).unwrap();
    let summary = machine
        .run(&mut backend, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.items_entered, 1);
    let events = backend.events.all();
    assert_eq!(&events[..4], &["click #a", "click #back", "click #b", "click #play"]);
}
