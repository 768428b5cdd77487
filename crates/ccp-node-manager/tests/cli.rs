//! The `ccp` binary over files written to a temporary directory

use ccp_model::{Configuration, ConfigurationId, ConfigurationState};
use ccp_test_utils::{feed_packages, test_configuration};
use pretty_assertions::assert_eq;
use serde::Serialize;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

fn write_json(dir: &TempDir, name: &str, value: &impl Serialize) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

fn ccp(args: &[&str], paths: &[&PathBuf]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_ccp"));
    command.env("RUST_LOG", "warn");
    let mut paths = paths.iter();
    for arg in args {
        if *arg == "{}" {
            command.arg(paths.next().unwrap());
        } else {
            command.arg(arg);
        }
    }
    command.output().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

#[test]
fn valid_configuration_lists_packages_per_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let configuration = write_json(&dir, "configuration.json", &test_configuration());
    let feed = write_json(&dir, "feed.json", &feed_packages());

    let output = ccp(
        &["check", "--configuration", "{}", "--feed", "{}"],
        &[&configuration, &feed],
    );

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.starts_with("configuration is valid\n"));
    assert!(text.contains("worker\n"));
    assert!(text.contains(": dp1 1.0.0, dp2 1.0.0, p1 1.0.0, p2 1.0.0\n"));
}

#[test]
fn broken_configuration_fails_with_json_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut broken = test_configuration();
    broken.settings.packages.retain(|p| p.id != "dp2");
    let configuration = write_json(&dir, "configuration.json", &broken);
    let feed = write_json(&dir, "feed.json", &feed_packages());

    let output = ccp(
        &["check", "--configuration", "{}", "--feed", "{}", "--json"],
        &[&configuration, &feed],
    );

    assert!(!output.status.success());
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let messages: Vec<&str> = report["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["message"].as_str().unwrap())
        .collect();
    assert_eq!(messages[0], "Package is not defined");
    assert_eq!(messages.len(), 3);
}

#[test]
fn compatible_lists_unchanged_templates() {
    let dir = tempfile::tempdir().unwrap();
    let mut history = Vec::new();
    for id in 1..=2 {
        let mut earlier = test_configuration();
        earlier.id = ConfigurationId(id);
        earlier.state = ConfigurationState::Obsolete;
        history.push(earlier);
    }
    let mut current: Configuration = test_configuration();
    current.id = ConfigurationId(3);
    let configuration = write_json(&dir, "configuration.json", &current);
    let history = write_json(&dir, "history.json", &history);

    let output = ccp(
        &["compatible", "--configuration", "{}", "--history", "{}"],
        &[&configuration, &history],
    );

    assert!(output.status.success());
    assert_eq!(stdout(&output), "worker 2\nworker 1\n");
}

#[test]
fn print_config_applies_the_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let settings = dir.path().join("ccp.toml");
    let text = "notification_capacity = 8\n\n[coordinator]\nupgradable_part_percent = 25\n";
    std::fs::write(&settings, text).unwrap();

    let output = ccp(&["--config", "{}", "print-config"], &[&settings]);

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("notification_capacity = 8"));
    assert!(text.contains("upgradable_part_percent = 25"));
}

#[test]
fn unsupported_runtime_in_settings_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let settings = dir.path().join("ccp.toml");
    std::fs::write(&settings, "current_runtime = \"mono\"\n").unwrap();

    let output = ccp(&["--config", "{}", "print-config"], &[&settings]);

    assert!(!output.status.success());
    let errors = String::from_utf8(output.stderr).unwrap();
    assert!(errors.contains("runtime mono is not among the supported runtimes"));
}
