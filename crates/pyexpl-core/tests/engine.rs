use pyexpl_core::engine::{execute, Invocation, StreamMode};
use pyexpl_core::result::{TERMINATED_EXIT_CODE, TRUNCATION_MARKER};
use pyexpl_core::{ExecutionLimits, PyexplError};
use std::time::Duration;

fn sh(script: &str) -> Invocation {
    Invocation::new(["sh", "-c", script])
}

fn limits(ceiling: usize) -> ExecutionLimits {
    ExecutionLimits::default().with_max_output_bytes(ceiling)
}

#[test]
fn clean_exit_reports_output_and_status() {
    let result = execute(&sh("printf hello"), &limits(10_000)).unwrap();

    assert_eq!(result.stdout, b"hello");
    assert_eq!(result.exit_code, 0);
    assert!(!result.truncated);
    assert!(!result.timed_out);
}

#[test]
fn empty_output_is_a_normal_result() {
    let result = execute(&sh("true"), &limits(10_000)).unwrap();

    assert!(result.stdout.is_empty());
    assert!(result.stderr.is_empty());
    assert_eq!(result.exit_code, 0);
    assert!(result.is_success());
}

#[test]
fn non_zero_exit_passes_through() {
    let result = execute(&sh("echo oops >&2; exit 3"), &limits(10_000)).unwrap();

    assert_eq!(result.exit_code, 3);
    assert_eq!(result.stdout, b"oops\n");
    assert!(result.stderr.is_empty());
    assert!(!result.truncated);
}

#[test]
fn signal_death_maps_above_128() {
    let result = execute(&sh("kill -SEGV $$"), &limits(10_000)).unwrap();

    assert_eq!(result.exit_code, 128 + 11);
    assert!(!result.truncated);
}

#[test]
fn runaway_output_is_cut_at_the_ceiling() {
    let script = "while :; do printf '%0200d' 0; done";
    let result = execute(&sh(script), &limits(10_000)).unwrap();

    let expected = format!("{}{TRUNCATION_MARKER}", "0".repeat(10_000));
    assert_eq!(result.stdout_str(), expected);
    assert_eq!(result.exit_code, TERMINATED_EXIT_CODE);
    assert!(result.truncated);
}

#[test]
fn output_never_exceeds_ceiling_plus_marker() {
    for ceiling in [1, 37, 250, 4096] {
        let result = execute(&sh("while :; do echo y; done"), &limits(ceiling)).unwrap();

        assert!(result.truncated, "ceiling {ceiling}");
        assert!(result.stdout.len() <= ceiling + TRUNCATION_MARKER.len());
        assert!(result.stdout.ends_with(TRUNCATION_MARKER.as_bytes()));
        assert_eq!(
            result.stdout_str().matches(TRUNCATION_MARKER).count(),
            1,
            "ceiling {ceiling}"
        );
    }
}

#[test]
fn output_below_ceiling_is_not_truncated() {
    let result = execute(&sh("printf '%0999d' 0"), &limits(1000)).unwrap();

    assert_eq!(result.stdout.len(), 999);
    assert!(!result.truncated);
    assert_eq!(result.exit_code, 0);
}

#[test]
fn leftovers_after_a_clean_exit_are_capped_without_truncation() {
    // One-byte reads keep the loop busy long after the child has exited, so
    // the ceiling is only reached while draining.
    let limits = ExecutionLimits {
        chunk_size: 1,
        max_output_bytes: 20_000,
        ..ExecutionLimits::default()
    };
    let result = execute(&sh("printf '%030000d' 0; exit 7"), &limits).unwrap();

    assert_eq!(result.exit_code, 7);
    assert!(!result.truncated);
    assert_eq!(result.stdout.len(), 20_000);
    assert!(!result.stdout.ends_with(TRUNCATION_MARKER.as_bytes()));
}

#[test]
fn separate_streams_are_kept_apart() {
    let invocation = sh("echo out; echo err >&2").streams(StreamMode::Separate);
    let result = execute(&invocation, &limits(10_000)).unwrap();

    assert_eq!(result.stdout, b"out\n");
    assert_eq!(result.stderr, b"err\n");
}

#[test]
fn separate_stderr_is_bounded_on_its_own() {
    let invocation =
        sh("echo fine; while :; do echo noise >&2; done").streams(StreamMode::Separate);
    let result = execute(&invocation, &limits(500)).unwrap();

    assert_eq!(result.stdout, b"fine\n");
    assert!(result.truncated);
    assert!(result.stderr.ends_with(TRUNCATION_MARKER.as_bytes()));
    assert!(result.stderr.len() <= 500 + TRUNCATION_MARKER.len());
}

#[test]
fn stdin_is_delivered() {
    let invocation = Invocation::new(["cat"]).stdin("import os, sys\n");
    let result = execute(&invocation, &limits(10_000)).unwrap();

    assert_eq!(result.stdout, b"import os, sys\n");
    assert_eq!(result.exit_code, 0);
}

#[test]
fn unread_stdin_does_not_block() {
    let invocation = sh("exit 0").stdin(vec![b'x'; 1024 * 1024]);
    let result = execute(&invocation, &limits(10_000)).unwrap();

    assert_eq!(result.exit_code, 0);
}

#[test]
fn missing_binary_is_a_spawn_failure() {
    let invocation = Invocation::new(["/nonexistent/pyexpl-launcher", "--", "true"]);
    let err = execute(&invocation, &limits(10_000)).unwrap_err();

    assert!(matches!(
        err,
        PyexplError::Spawn { ref program, .. } if program == "/nonexistent/pyexpl-launcher"
    ));
}

#[test]
fn wall_clock_limit_terminates() {
    let limits = limits(10_000).with_timeout_ms(200);
    let result = execute(&sh("sleep 10"), &limits).unwrap();

    assert!(result.timed_out);
    assert!(!result.truncated);
    assert_eq!(result.exit_code, TERMINATED_EXIT_CODE);
    assert!(result.duration < Duration::from_secs(5));
}

#[test]
fn sigterm_resistant_process_is_killed() {
    let limits = ExecutionLimits {
        kill_grace_ms: 100,
        ..limits(1000)
    };
    let result = execute(&sh("trap '' TERM; while :; do echo x; done"), &limits).unwrap();

    assert!(result.truncated);
    assert_eq!(result.exit_code, TERMINATED_EXIT_CODE);
    assert!(result.duration < Duration::from_secs(5));
}

#[test]
fn closed_output_still_waits_for_exit() {
    let result = execute(&sh("exec >&- 2>&-; sleep 0.2; exit 4"), &limits(10_000)).unwrap();

    assert_eq!(result.exit_code, 4);
    assert!(result.stdout.is_empty());
}
