//! Integration tests for the `playback` binary.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

fn playback(args: &[&str]) -> Output {
	Command::new(env!("CARGO_BIN_EXE_playback"))
		.args(args)
		.env_remove("RUST_LOG")
		.output()
		.expect("failed to execute playback")
}

fn json_lines(output: &Output) -> Vec<Value> {
	String::from_utf8_lossy(&output.stdout)
		.lines()
		.map(|line| serde_json::from_str(line).unwrap_or_else(|e| panic!("not JSON ({e}): {line}")))
		.collect()
}

fn write_script(dir: &Path, name: &str, body: &str) -> String {
	let path = dir.join(name);
	std::fs::write(&path, body).unwrap();
	path.to_string_lossy().into_owned()
}

const VALID: &str = r##"{
	"id": "checkout",
	"tasks": [
		{ "id": "cart", "steps": [{ "action": "click", "selector": "#add" }, { "action": "hover", "selector": "#cart" }] },
		{ "id": "pay", "dependsOn": ["cart"], "steps": [{ "action": "type", "selector": "#card", "text": "4242" }] }
	]
}"##;

#[test]
fn validate_reports_summary_for_valid_script() {
	let dir = tempfile::tempdir().unwrap();
	let script = write_script(dir.path(), "checkout.json", VALID);

	let output = playback(&["validate", &script]);

	assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
	let lines = json_lines(&output);
	assert_eq!(lines.len(), 1);
	assert_eq!(lines[0]["type"], "script-summary");
	assert_eq!(lines[0]["scriptId"], "checkout");
	assert_eq!(lines[0]["tasks"], 2);
	assert_eq!(lines[0]["steps"], 3);
	assert_eq!(lines[0]["valid"], true);
}

#[test]
fn validate_fails_on_unknown_dependency() {
	let dir = tempfile::tempdir().unwrap();
	let script = write_script(
		dir.path(),
		"broken.json",
		r#"{ "id": "broken", "tasks": [{ "id": "a", "dependsOn": ["ghost"], "steps": [] }] }"#,
	);

	let output = playback(&["validate", &script]);

	assert_eq!(output.status.code(), Some(1));
	let lines = json_lines(&output);
	assert_eq!(lines[0]["valid"], false);
	assert!(lines[0]["error"].as_str().unwrap().contains("ghost"));
}

#[test]
fn validate_missing_file_exits_nonzero() {
	let output = playback(&["validate", "/nonexistent/script.json"]);

	assert_eq!(output.status.code(), Some(1));
	assert!(String::from_utf8_lossy(&output.stderr).contains("Script not found"));
	assert!(output.stdout.is_empty());
}

#[test]
fn run_with_unlaunchable_driver_reports_error_state() {
	let dir = tempfile::tempdir().unwrap();
	let script = write_script(dir.path(), "checkout.json", VALID);

	let output = playback(&["run", &script, "--driver", "/nonexistent/driver"]);

	assert_eq!(output.status.code(), Some(1));
	let lines = json_lines(&output);
	assert!(lines.iter().any(|line| {
		line["sessionId"] == "session-1" && line["event"]["type"] == "session-state" && line["event"]["state"] == "error"
	}));
	assert!(String::from_utf8_lossy(&output.stderr).contains("Initialization failed"));
}

#[test]
fn run_requires_a_surface() {
	let output = playback(&["run", "script.json"]);

	assert_eq!(output.status.code(), Some(2));
}
