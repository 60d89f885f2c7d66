use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn arbiter() -> Command {
    let mut cmd = Command::cargo_bin("arbiter").unwrap();
    cmd.env_remove("ARBITER_CONFIG").env("RUST_LOG", "warn");
    cmd
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

const SUM_SOURCE: &str = "def total(nums):\n    return sum(nums)\n";

#[test]
fn grade_reports_all_passing() {
    let dir = TempDir::new().unwrap();
    let source = write(dir.path(), "solution.py", SUM_SOURCE);
    let tests = write(
        dir.path(),
        "tests.json",
        &json!([
            {"input": [[1, 2, 3]], "expected": 6, "description": "small"},
            {"input": [[10, -10]], "expected": 0, "description": "cancel", "hidden": true}
        ])
        .to_string(),
    );

    let output = arbiter()
        .arg("grade")
        .arg("--source")
        .arg(&source)
        .arg("--tests")
        .arg(&tests)
        .output()
        .unwrap();

    assert!(output.status.success());
    let report = stdout_json(&output);
    assert_eq!(report["execution"]["success"], json!(true));
    assert_eq!(report["execution"]["passedTests"], json!(2));
    assert_eq!(report["execution"]["hiddenTests"], json!(1));
    assert_eq!(report["execution"]["testResults"].as_array().unwrap().len(), 1);
    assert_eq!(report["quality"]["complexity"], json!(1));
}

#[test]
fn grade_exits_nonzero_on_failed_test() {
    let dir = TempDir::new().unwrap();
    let source = write(dir.path(), "solution.py", SUM_SOURCE);
    let tests = write(
        dir.path(),
        "tests.json",
        r#"[{"input": [[1, 2]], "expected": 4, "description": "wrong"}]"#,
    );

    arbiter()
        .args(["grade", "-s"])
        .arg(&source)
        .arg("-t")
        .arg(&tests)
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"success\": false"))
        .stdout(predicate::str::contains("\"actual\": \"3\""));
}

#[test]
fn grade_task_uses_task_tests() {
    let dir = TempDir::new().unwrap();
    let source = write(dir.path(), "solution.py", "def double(x):\n    return x * 2\n");
    let task = write(
        dir.path(),
        "task.json",
        &json!({
            "taskId": "double",
            "title": "Double it",
            "language": "python",
            "testCases": [
                {"input": 2, "expected": 4, "description": "two"},
                {"input": 5, "expected": 10, "description": "five"}
            ],
            "timeLimit": 2.0,
            "memoryLimit": 32
        })
        .to_string(),
    );

    let output = arbiter()
        .arg("grade")
        .arg("--source")
        .arg(&source)
        .arg("--task")
        .arg(&task)
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report = stdout_json(&output);
    assert_eq!(report["execution"]["totalTests"], json!(2));
    assert_eq!(report["score"], json!(8.8));
}

#[test]
fn grade_builtin_task() {
    let dir = TempDir::new().unwrap();
    let source = write(dir.path(), "solution.py", "def sum_numbers(numbers):\n    return sum(numbers)\n");

    let output = arbiter()
        .args(["grade", "--task", "builtin:fallback_python_junior", "--source"])
        .arg(&source)
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report = stdout_json(&output);
    assert_eq!(report["execution"]["totalTests"], json!(5));
    assert_eq!(report["execution"]["passedTests"], json!(5));
    assert_eq!(report["execution"]["hiddenTests"], json!(2));
}

#[test]
fn grade_unknown_builtin_task_fails() {
    let dir = TempDir::new().unwrap();
    let source = write(dir.path(), "solution.py", SUM_SOURCE);

    arbiter()
        .args(["grade", "--task", "builtin:nope", "--source"])
        .arg(&source)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown built-in task 'nope'"));
}

#[test]
fn tasks_list_names_builtins() {
    let output = arbiter().args(["tasks", "list"]).output().unwrap();

    assert!(output.status.success());
    let listed = stdout_json(&output);
    let ids: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["taskId"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"fallback_python_junior"));
    assert!(ids.contains(&"python_middle_merge_sort"));
}

#[test]
fn tasks_show_hides_hidden_cases() {
    let output = arbiter()
        .args(["tasks", "show", "builtin:fallback_python_middle"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let view = stdout_json(&output);
    assert_eq!(view["testCases"].as_array().unwrap().len(), 3);
    assert_eq!(view["hiddenTestCount"], json!(2));
    assert_eq!(view["timeLimit"], json!(3.0));
    assert_eq!(view["memoryLimit"], json!(128));
    assert_eq!(view["testCases"][0]["call"], json!("single"));
}

#[test]
fn tasks_plan_for_junior() {
    let output = arbiter()
        .args(["tasks", "plan", "--level", "junior", "--total", "4"])
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(stdout_json(&output), json!(["easy", "easy", "medium", "medium"]));
}

#[test]
fn grade_requires_tests_or_task() {
    let dir = TempDir::new().unwrap();
    let source = write(dir.path(), "solution.py", SUM_SOURCE);

    arbiter()
        .arg("grade")
        .arg("--source")
        .arg(&source)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--tests"));
}

#[test]
fn validate_rejects_denied_module() {
    let dir = TempDir::new().unwrap();
    let source = write(dir.path(), "bad.py", "import os\ndef f():\n    return 1\n");

    arbiter()
        .arg("validate")
        .arg("--source")
        .arg(&source)
        .assert()
        .failure()
        .stdout(predicate::str::contains("Use of 'os' is not allowed"));
}

#[test]
fn validate_with_analysis() {
    let dir = TempDir::new().unwrap();
    let source = write(dir.path(), "ok.py", "def sign(x):\n    if x > 0:\n        return 1\n    return 0\n");

    let output = arbiter()
        .args(["validate", "--analyze", "--source"])
        .arg(&source)
        .output()
        .unwrap();

    assert!(output.status.success());
    let verdict = stdout_json(&output);
    assert_eq!(verdict["valid"], json!(true));
    assert_eq!(verdict["message"], json!("Code is valid"));
    assert_eq!(verdict["analysis"]["complexity"], json!(2));
}

#[test]
fn analyze_prints_quality_report() {
    let dir = TempDir::new().unwrap();
    let source = write(dir.path(), "empty.py", "# nothing yet\n");

    let output = arbiter().arg("analyze").arg("--source").arg(&source).output().unwrap();

    assert!(output.status.success());
    let report = stdout_json(&output);
    assert_eq!(report["qualityScore"], json!(0));
    assert_eq!(report["codeSmells"], json!(["Empty code"]));
}

#[test]
fn unknown_language_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    let source = write(dir.path(), "x.rb", "puts 1");

    arbiter()
        .args(["analyze", "--language", "ruby", "--source"])
        .arg(&source)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown language 'ruby'"));
}

#[test]
fn config_file_from_environment() {
    let dir = TempDir::new().unwrap();
    let config = write(
        dir.path(),
        "engine.json",
        r#"{"limits": {"time_limit_seconds": 2, "memory_limit_mb": 64}, "memory_backend": "none"}"#,
    );

    let output = arbiter()
        .arg("config")
        .env("ARBITER_CONFIG", &config)
        .output()
        .unwrap();

    assert!(output.status.success());
    let shown = stdout_json(&output);
    assert_eq!(shown["memory_backend"], json!("none"));
    assert_eq!(shown["limits"]["memory_limit_mb"], json!(64));
    assert_eq!(shown["languages"][0]["name"], json!("python"));
}

#[test]
fn invalid_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let config = write(dir.path(), "engine.json", r#"{"limits": {"time_limit_seconds": 0}}"#);

    arbiter()
        .arg("--config")
        .arg(&config)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("time_limit_seconds must be a positive number"));
}
