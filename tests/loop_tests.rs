mod common;

use common::{config, Call, FakeDesktop, ScriptedReasoner};
use sandbox_pilot::{
    ActionKind, Agent, AgentConfig, AgentError, HistoryEntry, MouseButton, RunEvent, RunOutcome, StopFlag,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

fn agent(
    desktop: &FakeDesktop,
    reasoner: &Arc<ScriptedReasoner>,
    cfg: AgentConfig,
) -> Agent<FakeDesktop, Arc<ScriptedReasoner>> {
    Agent::new(desktop.clone(), Arc::clone(reasoner), cfg)
}

#[tokio::test]
async fn done_on_first_step_completes() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let reasoner = Arc::new(ScriptedReasoner::new(vec![json!({ "action": "DONE" })]));

    let report = agent(&desktop, &reasoner, config(dir.path()))
        .run("open the terminal", &StopFlag::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.reason, "done");
    assert_eq!(report.final_step, 1);
    assert_eq!(report.objective, "open the terminal");
    assert!(!report.run_id.is_empty());
    assert_eq!(report.metrics.steps, 0);
    assert!(desktop.calls().is_empty());
    assert_eq!(desktop.captures(), 1);
    assert!(dir.path().join("screen.png").exists());
}

#[tokio::test]
async fn legacy_terminal_word_is_done() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let reasoner = Arc::new(ScriptedReasoner::new(vec![json!({ "action": "bitti" })]));

    let report = agent(&desktop, &reasoner, config(dir.path()))
        .run("anything", &StopFlag::new())
        .await
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.final_step, 1);
}

#[tokio::test]
async fn click_then_type_executes_in_order_with_preview() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let reasoner = Arc::new(ScriptedReasoner::new(vec![
        json!({ "action": "CLICK", "x": 0.25, "y": 0.75, "why_short": "search box" }),
        json!({ "action": "TYPE", "text": "hello" }),
        json!({ "action": "DONE" }),
    ]));

    let report = agent(&desktop, &reasoner, config(dir.path()))
        .run("search for hello", &StopFlag::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.final_step, 3);
    assert_eq!(
        desktop.calls(),
        vec![
            Call::Move(0.25, 0.75),
            Call::Down(MouseButton::Primary),
            Call::Up(MouseButton::Primary),
            Call::Type("hello".into()),
        ]
    );
    assert_eq!(report.metrics.steps, 2);
    assert_eq!(report.metrics.clicks, 1);
    assert_eq!(report.metrics.types, 1);
    assert!(dir.path().join("preview_1.png").exists());
    assert!(!dir.path().join("preview_2.png").exists());

    let first = report.history[0].executed().unwrap();
    assert_eq!(first.kind, ActionKind::Click);
    assert_eq!(first.detail.as_deref(), Some("search box"));
}

#[tokio::test]
async fn three_invalid_clicks_end_in_error() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let bad = json!({ "action": "CLICK", "x": 1.5, "y": 0.2 });
    let reasoner = Arc::new(ScriptedReasoner::new(vec![bad.clone(), bad.clone(), bad]));

    let report = agent(&desktop, &reasoner, config(dir.path()))
        .run("click the icon", &StopFlag::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Error);
    assert!(report.reason.contains("no valid action"), "{}", report.reason);
    assert_eq!(report.final_step, 1);
    assert_eq!(report.metrics.invalid_coords, 3);
    assert_eq!(report.history.len(), 3);
    assert!(report
        .history
        .iter()
        .all(|e| matches!(e, HistoryEntry::InvalidCoords { .. })));
    assert!(desktop.calls().is_empty());
    assert!(!dir.path().join("preview_1.png").exists());

    // Each retry sees the rejections so far.
    let seen = reasoner.seen();
    assert_eq!(seen.len(), 3);
    assert!(seen[0].is_empty());
    assert_eq!(seen[2].len(), 2);
    assert_eq!(seen[1][0]["action"], "INVALID_COORDS");
}

#[tokio::test]
async fn invalid_coordinates_are_retried_within_the_step() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let reasoner = Arc::new(ScriptedReasoner::new(vec![
        json!({ "action": "CLICK", "x": -0.2, "y": 0.5 }),
        json!({ "action": "CLICK", "position": [0.3, 0.3] }),
        json!({ "action": "DONE" }),
    ]));

    let report = agent(&desktop, &reasoner, config(dir.path()))
        .run("click", &StopFlag::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.final_step, 2);
    assert!(matches!(report.history[0], HistoryEntry::InvalidCoords { .. }));
    let clicked = report.history[1].executed().unwrap();
    assert_eq!((clicked.x, clicked.y), (Some(0.3), Some(0.3)));
    assert_eq!(desktop.calls()[0], Call::Move(0.3, 0.3));
    assert!(dir.path().join("preview_1.png").exists());
}

#[tokio::test]
async fn missing_coordinates_default_to_center() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let reasoner = Arc::new(ScriptedReasoner::new(vec![json!({ "action": "CLICK" })]));

    let report = agent(&desktop, &reasoner, config(dir.path()))
        .run("click somewhere", &StopFlag::new())
        .await
        .unwrap();

    assert_eq!(report.metrics.defaulted_coords, 1);
    assert_eq!(report.metrics.invalid_coords, 0);
    assert_eq!(desktop.calls()[0], Call::Move(0.5, 0.5));
}

#[tokio::test]
async fn repeated_clicks_trip_the_guard() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let click = json!({ "action": "CLICK", "x": 0.4, "y": 0.4 });
    let reasoner = Arc::new(ScriptedReasoner::new(vec![
        click.clone(),
        json!({ "action": "CLICK", "x": 0.402, "y": 0.399 }),
        click,
    ]));

    let report = agent(&desktop, &reasoner, config(dir.path()))
        .run("press the button", &StopFlag::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(report.reason.starts_with("repeat-guard"), "{}", report.reason);
    assert_eq!(report.final_step, 3);
    assert_eq!(report.metrics.steps, 2);
    assert_eq!(desktop.calls().len(), 6);
}

#[tokio::test]
async fn step_budget_is_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let replies = (1..=5).map(|i| json!({ "action": "TYPE", "text": format!("t{i}") })).collect();
    let reasoner = Arc::new(ScriptedReasoner::new(replies));
    let cfg = AgentConfig { max_steps: 3, ..config(dir.path()) };

    let report = agent(&desktop, &reasoner, cfg)
        .run("type forever", &StopFlag::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::MaxSteps);
    assert_eq!(report.final_step, 3);
    assert_eq!(report.metrics.steps, 3);
    assert_eq!(
        desktop.calls(),
        vec![Call::Type("t1".into()), Call::Type("t2".into()), Call::Type("t3".into())]
    );
}

#[tokio::test]
async fn stop_before_first_step() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let reasoner = Arc::new(ScriptedReasoner::new(vec![]));
    let stop = StopFlag::new();
    stop.stop();

    let report = agent(&desktop, &reasoner, config(dir.path()))
        .run("never starts", &stop)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert_eq!(report.final_step, 1);
    assert_eq!(desktop.captures(), 0);
    assert!(reasoner.seen().is_empty());
}

#[tokio::test]
async fn stop_is_observed_at_the_next_step_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let stop = StopFlag::new();
    let reasoner = Arc::new(
        ScriptedReasoner::new(vec![
            json!({ "action": "CLICK", "x": 0.1, "y": 0.1 }),
            json!({ "action": "CLICK", "x": 0.9, "y": 0.9 }),
            json!({ "action": "CLICK", "x": 0.5, "y": 0.5 }),
        ])
        .stopping_at(2, stop.clone()),
    );

    let report = agent(&desktop, &reasoner, config(dir.path()))
        .run("click around", &stop)
        .await
        .unwrap();

    // The in-flight step still executes.
    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert_eq!(report.final_step, 3);
    assert_eq!(report.metrics.steps, 2);
    assert_eq!(reasoner.seen().len(), 2);
}

#[tokio::test]
async fn unknown_kinds_are_no_ops_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let reasoner = Arc::new(ScriptedReasoner::new(vec![json!({ "action": "TELEPORT" })]));

    let report = agent(&desktop, &reasoner, config(dir.path()))
        .run("go", &StopFlag::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.final_step, 2);
    let first = report.history[0].executed().unwrap();
    assert_eq!(first.kind, ActionKind::Unknown("TELEPORT".into()));
    assert!(desktop.calls().is_empty());
}

#[tokio::test]
async fn unknown_kinds_can_consume_retries() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let reasoner = Arc::new(ScriptedReasoner::new(vec![
        json!({ "action": "TELEPORT" }),
        json!({ "action": "TYPE", "text": "ok" }),
    ]));
    let cfg = AgentConfig { retry_on_invalid_action: true, ..config(dir.path()) };

    let report = agent(&desktop, &reasoner, cfg)
        .run("go", &StopFlag::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(matches!(&report.history[0], HistoryEntry::InvalidAction { kind, .. } if kind == "TELEPORT"));
    assert_eq!(desktop.calls(), vec![Call::Type("ok".into())]);
    assert_eq!(reasoner.seen()[1][0]["action"], "INVALID_ACTION");
}

#[tokio::test]
async fn every_kind_reaches_the_actuator() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let reasoner = Arc::new(ScriptedReasoner::new(vec![
        json!({ "action": "DOUBLE_CLICK", "x": 0.1, "y": 0.2 }),
        json!({ "action": "RIGHT_CLICK", "x": [0.8, 0.8, 1.0, 1.0] }),
        json!({ "action": "SCROLL", "direction": "down" }),
        json!({ "action": "HOTKEY", "keys": "Ctrl+L" }),
        json!({ "action": "PRESS", "key": "Enter" }),
        json!({ "action": "WAIT", "seconds": 0.01 }),
        json!({ "action": "NOOP" }),
        json!({ "action": "DONE" }),
    ]));

    let report = agent(&desktop, &reasoner, config(dir.path()))
        .run("exercise", &StopFlag::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.final_step, 8);
    assert_eq!(report.metrics.clicks, 2);
    assert_eq!(
        desktop.calls(),
        vec![
            Call::Move(0.1, 0.2),
            Call::Down(MouseButton::Primary),
            Call::Up(MouseButton::Primary),
            Call::Down(MouseButton::Primary),
            Call::Up(MouseButton::Primary),
            Call::Move(0.9, 0.9),
            Call::Down(MouseButton::Secondary),
            Call::Up(MouseButton::Secondary),
            Call::Scroll(-360),
            Call::Hotkey(vec!["ctrl".into(), "l".into()]),
            Call::Press("enter".into()),
        ]
    );
}

#[tokio::test]
async fn model_sees_only_the_trailing_window() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let replies = (1..=8).map(|i| json!({ "action": "TYPE", "text": format!("t{i}") })).collect();
    let reasoner = Arc::new(ScriptedReasoner::new(replies));

    let report = agent(&desktop, &reasoner, config(dir.path()))
        .run("type", &StopFlag::new())
        .await
        .unwrap();

    assert_eq!(report.history.len(), 8);
    let seen = reasoner.seen();
    assert_eq!(seen.len(), 9);
    let last = &seen[8];
    assert_eq!(last.len(), 6);
    assert_eq!(last[0]["text"], "t3");
    assert_eq!(last[5]["text"], "t8");
    assert_eq!(last[5]["action"], "TYPE");
}

#[tokio::test]
async fn capture_failure_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::failing();
    let reasoner = Arc::new(ScriptedReasoner::new(vec![]));

    let err = agent(&desktop, &reasoner, config(dir.path()))
        .run("anything", &StopFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Capture(_)));
    assert!(reasoner.seen().is_empty());
}

#[tokio::test]
async fn model_failure_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let reasoner = Arc::new(ScriptedReasoner::failing());

    let err = agent(&desktop, &reasoner, config(dir.path()))
        .run("anything", &StopFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Reasoner(_)));
}

#[tokio::test]
async fn events_describe_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let reasoner = Arc::new(ScriptedReasoner::new(vec![
        json!({ "action": "CLICK", "x": 2.0, "y": 0.5 }),
        json!({ "action": "CLICK", "x": 0.2, "y": 0.5 }),
        json!({ "action": "DONE" }),
    ]));
    let (tx, mut rx) = mpsc::unbounded_channel();

    agent(&desktop, &reasoner, config(dir.path()))
        .with_events(tx)
        .run("click", &StopFlag::new())
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    assert!(matches!(events.first(), Some(RunEvent::StepStarted { step: 1 })));
    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::InvalidCoords { step: 1, attempt: 0, .. })));
    assert!(events.iter().any(|e| matches!(e, RunEvent::Preview { step: 1, .. })));
    assert!(matches!(
        events.last(),
        Some(RunEvent::Finished { outcome: RunOutcome::Completed, .. })
    ));
}

#[tokio::test]
async fn actuation_failure_propagates_without_recording_the_step() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::failing_input();
    let reasoner = Arc::new(ScriptedReasoner::new(vec![
        json!({ "action": "CLICK", "x": 0.4, "y": 0.6 }),
        json!({ "action": "TYPE", "text": "never asked" }),
    ]));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let err = agent(&desktop, &reasoner, config(dir.path()))
        .with_events(tx)
        .run("click once", &StopFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Actuation(_)));
    assert_eq!(reasoner.seen().len(), 1);
    assert!(desktop.calls().is_empty());

    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    assert!(!events.iter().any(|e| matches!(e, RunEvent::StepStarted { step: 2 })));
    assert!(!events.iter().any(|e| matches!(e, RunEvent::Finished { .. })));
}

#[tokio::test]
async fn oversized_wait_is_capped() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let reasoner = Arc::new(ScriptedReasoner::new(vec![json!({ "action": "WAIT", "seconds": 1e20 })]));
    let cfg = AgentConfig { max_wait: std::time::Duration::from_millis(5), ..config(dir.path()) };

    let report = agent(&desktop, &reasoner, cfg).run("wait", &StopFlag::new()).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.metrics.steps, 1);
    assert!(matches!(report.history.first(), Some(HistoryEntry::Executed(a)) if a.kind == ActionKind::Wait));
}
