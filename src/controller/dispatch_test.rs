use super::*;
use crate::config::DEFAULT_WEIGHT_ANNOTATION;
use crate::controller::report::Outcome;
use crate::orchestrator::mock::{healthy_pods, unready_pods, MockOrchestrator};
use crate::state::{MemoryStateStore, ReleaseState, VersionTarget};
use std::sync::Arc;

fn dispatcher(
    mock: MockOrchestrator,
    state: ReleaseState,
) -> (Dispatcher, Arc<MockOrchestrator>, Arc<MemoryStateStore>) {
    let (ctx, mock, store) = Context::new_mock(mock, state);
    (Dispatcher::new(ctx), mock, store)
}

fn invalid(req: ActionRequest) -> String {
    match Command::parse(&req) {
        Err(ControllerError::InvalidInput(msg)) => msg,
        other => panic!("expected invalid input for {req:?}, got {other:?}"),
    }
}

#[test]
fn test_parse_every_action() {
    assert_eq!(
        Command::parse(&ActionRequest::new("status")).unwrap(),
        Command::Status
    );
    assert_eq!(
        Command::parse(&ActionRequest::new("blue-green-deploy").target("green").image("web:2")).unwrap(),
        Command::BlueGreenDeploy {
            target: Color::Green,
            image: "web:2".to_string()
        }
    );
    assert_eq!(
        Command::parse(&ActionRequest::new("blue-green-switch").target("blue")).unwrap(),
        Command::BlueGreenSwitch {
            target: Color::Blue
        }
    );
    assert_eq!(
        Command::parse(&ActionRequest::new("canary-deploy").image("web:3")).unwrap(),
        Command::CanaryDeploy {
            image: "web:3".to_string()
        }
    );
    assert_eq!(
        Command::parse(&ActionRequest::new("canary-set-weight").weight("50")).unwrap(),
        Command::CanarySetWeight {
            weight: LadderWeight::try_from(50).unwrap()
        }
    );
    for (action, expected) in [
        ("canary-promote", Command::CanaryPromote),
        ("canary-rollback", Command::CanaryRollback),
        ("health-check", Command::HealthCheck),
    ] {
        assert_eq!(Command::parse(&ActionRequest::new(action)).unwrap(), expected);
    }
}

#[test]
fn test_every_listed_action_parses_to_its_name() {
    for action in ACTIONS {
        let req = match action {
            "blue-green-deploy" => ActionRequest::new(action).target("blue").image("x"),
            "blue-green-switch" => ActionRequest::new(action).target("blue"),
            "canary-deploy" => ActionRequest::new(action).image("x"),
            "canary-set-weight" => ActionRequest::new(action).weight("0"),
            _ => ActionRequest::new(action),
        };
        assert_eq!(Command::parse(&req).unwrap().name(), action);
    }
}

#[test]
fn test_parse_rejects_out_of_domain_input() {
    assert!(invalid(ActionRequest::new("rollout")).contains("unknown action"));
    assert!(invalid(ActionRequest::new("blue-green-switch").target("canary")).contains("blue or green"));
    assert!(invalid(ActionRequest::new("blue-green-switch").target("Blue")).contains("blue or green"));
    assert!(invalid(ActionRequest::new("canary-set-weight").weight("30")).contains("got 30"));
    assert!(invalid(ActionRequest::new("canary-set-weight").weight("-10")).contains("weight"));
    assert!(invalid(ActionRequest::new("canary-set-weight").weight("ten")).contains("weight"));
    assert!(invalid(ActionRequest::new("canary-deploy").image("")).contains("image"));
    assert!(invalid(ActionRequest::new("canary-deploy").image("web 2")).contains("image"));
}

#[test]
fn test_parse_requires_and_limits_params() {
    assert_eq!(
        invalid(ActionRequest::new("blue-green-switch")),
        "blue-green-switch requires --target"
    );
    assert_eq!(
        invalid(ActionRequest::new("blue-green-deploy").target("green")),
        "blue-green-deploy requires --image"
    );
    assert_eq!(
        invalid(ActionRequest::new("canary-promote").weight("25")),
        "canary-promote does not take --weight"
    );
    assert_eq!(
        invalid(ActionRequest::new("status").target("blue")),
        "status does not take --target"
    );
}

#[test]
fn test_read_only_commands_are_not_mutating() {
    assert!(!Command::Status.is_mutating());
    assert!(!Command::HealthCheck.is_mutating());
    assert!(Command::CanaryRollback.is_mutating());
    assert!(Command::CanaryPromote.is_mutating());
}

#[tokio::test]
async fn test_invalid_input_touches_nothing() {
    let (d, mock, store) = dispatcher(MockOrchestrator::new(), ReleaseState::default());

    for req in [
        ActionRequest::new("canary-set-weight").weight("33"),
        ActionRequest::new("blue-green-switch").target("purple"),
        ActionRequest::new("launch"),
    ] {
        let result = d.dispatch(&req).await;
        assert!(matches!(result, Err(ControllerError::InvalidInput(_))));
    }

    assert!(mock.calls().is_empty());
    assert_eq!(store.snapshot(), Some(ReleaseState::default()));
}

#[tokio::test]
async fn test_dispatch_returns_controller_report_unmodified() {
    let mock = MockOrchestrator::new();
    mock.set_pods("canary", healthy_pods("web-canary", 1));
    let (d, _mock, store) = dispatcher(mock, ReleaseState::default());

    let response = d
        .dispatch(&ActionRequest::new("canary-set-weight").weight("25"))
        .await
        .unwrap();

    let report = response.operation().unwrap();
    assert_eq!(report.operation, "canary-set-weight");
    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(report.after, store.snapshot().unwrap());
    assert!(response.is_success());
}

#[tokio::test]
async fn test_concurrent_promotes_are_serialized() {
    let mock = MockOrchestrator::new();
    mock.set_pods("canary", healthy_pods("web-canary", 1));
    mock.set_annotation("web-canary", DEFAULT_WEIGHT_ANNOTATION, "0");
    let (d, mock, store) = dispatcher(mock, ReleaseState::default());
    let req = ActionRequest::new("canary-promote");

    let (a, b) = tokio::join!(d.dispatch(&req), d.dispatch(&req));

    assert_eq!(a.unwrap().operation().unwrap().outcome, Outcome::Completed);
    assert_eq!(b.unwrap().operation().unwrap().outcome, Outcome::Completed);
    let annotates: Vec<String> = mock
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("annotate"))
        .collect();
    assert_eq!(annotates, vec!["annotate web-canary 10", "annotate web-canary 25"]);
    assert_eq!(store.snapshot().unwrap().canary.weight().percent(), 25);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_service_switch_to_unhealthy_green() {
    let mock = MockOrchestrator::new()
        .with_deployment("web-blue", 2, "web:1.0")
        .with_deployment("web-green", 2, "web:2.0");
    mock.set_selector("web", "version", "blue");
    mock.set_pods("blue", healthy_pods("web-blue", 2));
    mock.set_pods("green", unready_pods("web-green", 2));
    let (ctx, mock, _store) = Context::new_mock(mock, ReleaseState::default());
    let store = Arc::new(MemoryStateStore::new());
    let ctx = Context {
        store: store.clone(),
        ..ctx
    };
    let d = Dispatcher::new(ctx);

    let response = d
        .dispatch(&ActionRequest::new("blue-green-switch").target("green"))
        .await
        .unwrap();

    assert!(!response.is_success());
    assert_eq!(
        response.operation().unwrap().outcome,
        Outcome::HealthCheckFailed
    );
    assert_eq!(mock.selector("web", "version").as_deref(), Some("blue"));
    assert!(store.snapshot().is_none(), "no record written for a failed switch");
}

#[tokio::test]
async fn test_fresh_record_switch_follows_live_selector() {
    let mock = MockOrchestrator::new()
        .with_deployment("web-blue", 2, "web:1.0")
        .with_deployment("web-green", 2, "web:2.0");
    mock.set_selector("web", "version", "green");
    mock.set_pods("blue", healthy_pods("web-blue", 2));
    let (ctx, mock, _store) = Context::new_mock(mock, ReleaseState::default());
    let store = Arc::new(MemoryStateStore::new());
    let d = Dispatcher::new(Context {
        store: store.clone(),
        ..ctx
    });

    let response = d
        .dispatch(&ActionRequest::new("blue-green-switch").target("blue"))
        .await
        .unwrap();

    assert_eq!(response.operation().unwrap().outcome, Outcome::Completed);
    assert_eq!(mock.selector("web", "version").as_deref(), Some("blue"));
    assert_eq!(mock.deployment("web-green").unwrap().replicas, 0);
    assert_eq!(store.snapshot().unwrap().active_color(), Color::Blue);
}

#[tokio::test]
async fn test_status_reports_record_and_live_view() {
    let mock = MockOrchestrator::new()
        .with_deployment("web-blue", 2, "web:1.0")
        .with_deployment("web-green", 0, "web:0.9")
        .with_deployment("web-canary", 0, "web:0.9");
    mock.set_selector("web", "version", "blue");
    mock.set_annotation("web-canary", DEFAULT_WEIGHT_ANNOTATION, "0");
    let (d, mock, _store) = dispatcher(mock, ReleaseState::default());

    let Response::Status(status) = d.dispatch(&ActionRequest::new("status")).await.unwrap() else {
        panic!("expected a status response");
    };

    assert_eq!(status.live_selector.as_deref(), Some("blue"));
    assert_eq!(status.deployments.len(), 3);
    assert_eq!(status.deployments[0].image.as_deref(), Some("web:1.0"));
    assert!(status.drift.is_empty(), "unexpected drift: {:?}", status.drift);
    assert!(mock.mutations().is_empty());
}

#[tokio::test]
async fn test_status_tolerates_missing_deployments() {
    let mock = MockOrchestrator::new();
    mock.set_selector("web", "version", "blue");
    let (d, _mock, _store) = dispatcher(mock, ReleaseState::default());

    let Response::Status(status) = d.dispatch(&ActionRequest::new("status")).await.unwrap() else {
        panic!("expected a status response");
    };

    assert!(status.deployments.iter().all(|d| d.error.is_some()));
    assert!(status.to_string().contains("not found"));
}

#[tokio::test]
async fn test_health_check_reports_every_target() {
    let mock = MockOrchestrator::new();
    mock.set_pods("blue", healthy_pods("web-blue", 2));
    mock.set_pods("canary", unready_pods("web-canary", 1));
    let (d, mock, _store) = dispatcher(mock, ReleaseState::default());

    let response = d.dispatch(&ActionRequest::new("health-check")).await.unwrap();
    let Response::Health(health) = &response else {
        panic!("expected a health response");
    };

    assert!(response.is_success());
    assert_eq!(health.active_color, Color::Blue);
    let summary: Vec<(VersionTarget, usize, usize)> = health
        .targets
        .iter()
        .map(|t| (t.target, t.ready, t.total))
        .collect();
    assert_eq!(
        summary,
        vec![
            (VersionTarget::Blue, 2, 2),
            (VersionTarget::Green, 0, 0),
            (VersionTarget::Canary, 0, 1),
        ]
    );
    assert!(mock.mutations().is_empty());
}

#[tokio::test]
async fn test_health_check_fails_when_active_color_has_no_pods() {
    let (d, _mock, _store) = dispatcher(MockOrchestrator::new(), ReleaseState::default());

    let response = d.dispatch(&ActionRequest::new("health-check")).await.unwrap();

    assert!(!response.is_success());
}

#[tokio::test]
async fn test_response_json_is_tagged() {
    let (d, _mock, _store) = dispatcher(MockOrchestrator::new(), ReleaseState::default());

    let response = d.dispatch(&ActionRequest::new("canary-rollback")).await.unwrap();
    let json = serde_json::to_value(&response).unwrap();

    assert_eq!(json["kind"], "operation");
    assert_eq!(json["operation"], "canary-rollback");
    assert_eq!(json["after"]["canary"]["canaryEnabled"], false);
}
