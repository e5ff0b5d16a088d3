mod common;

use common::*;
use std::process::Command;

fn cli_command() -> Command {
    Command::new(env!("CARGO_BIN_EXE_stepflow"))
}

#[test]
fn test_cli_help() {
    let output = cli_command().arg("--help").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Run declarative automation workflows"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("validate"));
    assert!(stdout.contains("list"));
    assert!(stdout.contains("serve"));
}

#[test]
fn test_cli_version() {
    let output = cli_command().arg("--version").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("stepflow"));
}

#[test]
fn test_cli_run_help() {
    let output = cli_command().args(["run", "--help"]).output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Run a single workflow file"));
    assert!(stdout.contains("--var"));
    assert!(stdout.contains("--timeout"));
}

#[test]
fn test_cli_run_single_workflow() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "test.yaml", &simple_workflow("test"));

    let output = cli_command()
        .args(["run", dir.path().join("test.yaml").to_str().unwrap()])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Status: completed"));
    assert!(stdout.contains("✓ compute"));
    assert!(stdout.contains("✓ announce"));
}

#[test]
fn test_cli_run_with_vars() {
    let dir = create_test_dir();
    write_workflow(
        dir.path(),
        "gated.yaml",
        r#"
id: gated
name: Gated
version: "1"
steps:
  - id: check
    type: condition
    parameters:
      condition: "count > 3 and mode == 'fast'"
      true_value: {verdict: "go"}
      false_value: {verdict: "stop"}
  - id: only_when_go
    type: notification
    condition: "verdict == 'go'"
    parameters:
      message: "going"
"#,
    );
    let file = dir.path().join("gated.yaml");

    let output = cli_command()
        .args(["run", file.to_str().unwrap(), "--var", "count=5", "--var", "mode=fast"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("✓ only_when_go"));

    let output = cli_command()
        .args(["run", file.to_str().unwrap(), "--var", "count=1", "--var", "mode=fast"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("- only_when_go"));
}

#[test]
fn test_cli_run_failing_workflow() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "bad.yaml", &failing_workflow("bad"));

    let output = cli_command()
        .args(["run", dir.path().join("bad.yaml").to_str().unwrap()])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Status: failed"));
    assert!(stdout.contains("Division by zero"));
}

#[test]
fn test_cli_run_nonexistent_file() {
    let output = cli_command()
        .args(["run", "/nonexistent/workflow.yaml"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_cli_run_bad_var() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "test.yaml", &simple_workflow("test"));

    let output = cli_command()
        .args([
            "run",
            dir.path().join("test.yaml").to_str().unwrap(),
            "--var",
            "novalue",
        ])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("expected KEY=VALUE"));
}

#[test]
fn test_cli_list_workflows() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "a.yaml", &simple_workflow("alpha"));
    write_workflow(
        dir.path(),
        "b.yaml",
        "id: beta\nname: Beta\nversion: '3'\nschedule: {type: daily, time: '09:30'}\nsteps: [{id: a, type: delay}]\n",
    );

    let output = cli_command()
        .args(["list", dir.path().to_str().unwrap()])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("alpha - alpha v1 (2 steps)"));
    assert!(stdout.contains("beta - Beta v3 (1 steps) [schedule: daily]"));
}

#[test]
fn test_cli_list_empty_directory() {
    let dir = create_test_dir();

    let output = cli_command()
        .args(["list", dir.path().to_str().unwrap()])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No workflows found"));
}

#[test]
fn test_cli_validate_directory() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "a.yaml", &simple_workflow("a"));
    write_workflow(dir.path(), "b.yaml", &simple_workflow("b"));

    let output = cli_command()
        .args(["validate", dir.path().to_str().unwrap()])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2/2 definitions valid"));
}

#[test]
fn test_cli_validate_invalid_definition() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "good.yaml", &simple_workflow("good"));
    write_workflow(dir.path(), "bad.yaml", "id: bad\nname: Bad\nsteps: []\n");

    let output = cli_command()
        .args(["validate", dir.path().to_str().unwrap()])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Missing required field 'version'"));
    assert!(stdout.contains("1/2 definitions valid"));
}

#[test]
fn test_cli_validate_reports_lint_warnings() {
    let dir = create_test_dir();
    write_workflow(
        dir.path(),
        "goto.yaml",
        "id: g\nname: G\nversion: '1'\nerror_handling: goto\nsteps: [{id: a, type: delay}]\n",
    );

    let output = cli_command()
        .args(["validate", dir.path().join("goto.yaml").to_str().unwrap()])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("error_goto_step is not set"));
}

#[test]
fn test_cli_verbose_flag() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "test.yaml", &simple_workflow("test"));

    let output = cli_command()
        .args(["--verbose", "run", dir.path().join("test.yaml").to_str().unwrap()])
        .output()
        .unwrap();

    assert!(output.status.success());
}

#[test]
fn test_cli_unknown_command() {
    let output = cli_command().arg("unknown-command").output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_cli_serve_requires_directory() {
    let output = cli_command().arg("serve").output().unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no definitions_dir configured"));
}
