use super::*;
use switchyard::state::StateError;

#[test]
fn test_cli_parses_action_and_flags() {
    let cli = Cli::try_parse_from([
        "switchyard",
        "blue-green-deploy",
        "--target",
        "green",
        "--image",
        "web:2.0",
        "--namespace",
        "shop",
        "--app",
        "web",
        "--output",
        "json",
    ])
    .unwrap();

    assert_eq!(cli.output, OutputFormat::Json);
    assert_eq!(cli.namespace.as_deref(), Some("shop"));
    assert!(!cli.memory_state);
    assert_eq!(
        cli.request(),
        ActionRequest::new("blue-green-deploy")
            .target("green")
            .image("web:2.0")
    );
}

#[test]
fn test_cli_defaults_to_text_output() {
    let cli = Cli::try_parse_from(["switchyard", "status", "--memory-state"]).unwrap();
    assert_eq!(cli.output, OutputFormat::Text);
    assert!(cli.memory_state);
}

#[test]
fn test_cli_hands_raw_weight_to_dispatcher() {
    // Domain checks belong to Command::parse, not clap
    let cli = Cli::try_parse_from(["switchyard", "canary-set-weight", "--weight", "-5"]).unwrap();
    assert_eq!(cli.request().weight.as_deref(), Some("-5"));
    assert!(matches!(
        Command::parse(&cli.request()),
        Err(ControllerError::InvalidInput(_))
    ));
}

#[test]
fn test_cli_requires_an_action() {
    assert!(Cli::try_parse_from(["switchyard"]).is_err());
    assert!(Cli::try_parse_from(["switchyard", "status", "--output", "yaml"]).is_err());
}

#[test]
fn test_error_exit_codes() {
    assert_eq!(
        error_exit_code(&ControllerError::InvalidInput("bad".into())),
        EXIT_INVALID
    );
    assert_eq!(
        error_exit_code(&ControllerError::InconsistentLiveState("30".into())),
        EXIT_FAILED
    );
    assert_eq!(
        error_exit_code(&ControllerError::State(StateError::Corrupt("x".into()))),
        EXIT_FAILED
    );
}

#[test]
fn test_memory_state_warns_for_mutating_actions() {
    let switch = Command::BlueGreenSwitch {
        target: switchyard::state::Color::Blue,
    };
    let caveat = memory_state_warning(&switch).unwrap();
    assert!(caveat.starts_with("blue-green-switch starts from the default record"));
    assert!(memory_state_warning(&Command::CanaryRollback).is_some());
    assert_eq!(memory_state_warning(&Command::Status), None);
    assert_eq!(memory_state_warning(&Command::HealthCheck), None);
}
