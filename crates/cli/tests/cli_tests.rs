//! CLI integration tests

use std::process::Command;

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = Command::new("cargo")
        .args(["run", "-p", "cli", "--", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("fabric control plane"),
        "Should show app description"
    );
    assert!(stdout.contains("weights"), "Should show weights command");
    assert!(stdout.contains("stats"), "Should show stats command");
    assert!(stdout.contains("alerts"), "Should show alerts command");
    assert!(stdout.contains("sync"), "Should show sync command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = Command::new("cargo")
        .args(["run", "-p", "cli", "--", "--version"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("fcp"), "Should show binary name");
}

/// Test weights subcommand help
#[test]
fn test_weights_help() {
    let output = Command::new("cargo")
        .args(["run", "-p", "cli", "--", "weights", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Weights help should succeed");
    assert!(stdout.contains("--route"), "Should show route filter option");
}

/// Test alerts subcommand help
#[test]
fn test_alerts_help() {
    let output = Command::new("cargo")
        .args(["run", "-p", "cli", "--", "alerts", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Alerts help should succeed");
    assert!(stdout.contains("list"), "Should show list subcommand");
    assert!(stdout.contains("ack"), "Should show ack subcommand");
    assert!(stdout.contains("dismiss"), "Should show dismiss subcommand");
}
