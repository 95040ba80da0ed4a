//! Tests for external command execution.

use std::time::{Duration, Instant};

use rstest::rstest;

use super::*;

fn shell(script: &str) -> ExternalCommand {
    ExternalCommand::new("sh").arg("-c").arg(script)
}

#[test]
fn display_joins_program_and_arguments() {
    let command = ExternalCommand::new("docker")
        .args(["rm", "-fv"])
        .arg("kiln-buildkitd");
    assert_eq!(command.to_string(), "docker rm -fv kiln-buildkitd");
    assert_eq!(command.subcommand(), Some("rm"));
}

#[rstest]
#[case(ExitDescription(Some(3)), "exit code 3")]
#[case(ExitDescription(None), "termination by signal")]
fn exit_description_renders(#[case] status: ExitDescription, #[case] expected: &str) {
    assert_eq!(status.to_string(), expected);
}

#[cfg(unix)]
#[test]
fn success_returns_both_streams() {
    let output = SystemCommandRunner
        .run(&shell("printf out; printf err >&2"), &Cancellation::new())
        .expect("command succeeds");
    assert_eq!(output, "outerr");
}

#[cfg(unix)]
#[test]
fn combined_output_keeps_write_order() {
    let error = SystemCommandRunner
        .run(
            &shell("echo first-stderr >&2; sleep 0.2; echo second-stdout; exit 1"),
            &Cancellation::new(),
        )
        .expect_err("command fails");
    assert_eq!(error.output(), Some("first-stderr\nsecond-stdout\n"));
}

#[cfg(unix)]
#[test]
fn abandoned_child_is_killed_and_reaped() {
    let mut child = Command::new("sleep")
        .arg("5")
        .spawn()
        .expect("spawn sleep");
    let started = Instant::now();

    abandon(&mut child);

    let status = child.try_wait().expect("query child");
    assert!(status.is_some_and(|exit| !exit.success()), "{status:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[cfg(unix)]
#[test]
fn failure_carries_exit_code_and_output() {
    let error = SystemCommandRunner
        .run(&shell("printf boom >&2; exit 3"), &Cancellation::new())
        .expect_err("command fails");
    match &error {
        CommandError::Failed { status, output, .. } => {
            assert_eq!(*status, ExitDescription(Some(3)));
            assert_eq!(output, "boom");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(error.output(), Some("boom"));
}

#[test]
fn missing_program_is_a_spawn_error() {
    let error = SystemCommandRunner
        .run(
            &ExternalCommand::new("kiln-test-no-such-program"),
            &Cancellation::new(),
        )
        .expect_err("spawn fails");
    assert!(matches!(error, CommandError::Spawn { .. }), "{error:?}");
}

#[test]
fn cancelled_token_skips_spawning() {
    let cancel = Cancellation::new();
    cancel.cancel();
    let error = SystemCommandRunner
        .run(&ExternalCommand::new("kiln-test-no-such-program"), &cancel)
        .expect_err("cancelled");
    assert!(matches!(error, CommandError::Cancelled { .. }), "{error:?}");
}

#[cfg(unix)]
#[test]
fn cancellation_kills_running_child() {
    let cancel = Cancellation::new().with_timeout(Duration::from_millis(100));
    let started = Instant::now();
    let error = SystemCommandRunner
        .run(&ExternalCommand::new("sleep").arg("5"), &cancel)
        .expect_err("cancelled");
    assert!(matches!(error, CommandError::Cancelled { .. }), "{error:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}
