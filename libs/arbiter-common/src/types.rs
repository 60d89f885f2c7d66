use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::render::render_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Python,
    #[serde(alias = "js")]
    JavaScript,
}

impl Language {
    pub fn all_variants() -> &'static [Language] {
        &[Language::Python, Language::JavaScript]
    }

    /// Parse a user-supplied language name. Accepts the usual short forms.
    pub fn parse(name: &str) -> Option<Language> {
        match name.trim().to_ascii_lowercase().as_str() {
            "python" | "py" | "python3" => Some(Language::Python),
            "javascript" | "js" | "node" => Some(Language::JavaScript),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::JavaScript => write!(f, "javascript"),
        }
    }
}

/// How a test case's `input` becomes the argument list of the entry function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallConvention {
    /// Array of one element: that element is the single argument.
    /// Longer arrays are spread. Anything else is passed as one argument.
    #[default]
    Auto,
    /// The whole input is one argument, arrays included.
    Single,
    /// The input must be an array; its elements are the arguments.
    Spread,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: Value,
    #[serde(rename = "expected", alias = "expected_output", alias = "expectedOutput")]
    pub expected_output: Value,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "is_hidden", alias = "isHidden")]
    pub hidden: bool,
    #[serde(default)]
    pub call: CallConvention,
}

impl TestCase {
    pub fn new(input: Value, expected_output: Value, description: impl Into<String>) -> Self {
        Self {
            input,
            expected_output,
            description: description.into(),
            hidden: false,
            call: CallConvention::Auto,
        }
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_call(mut self, call: CallConvention) -> Self {
        self.call = call;
        self
    }

    /// Description shown in reports; falls back to "Test".
    pub fn label(&self) -> &str {
        if self.description.is_empty() {
            "Test"
        } else {
            &self.description
        }
    }
}

/// Why a test case failed before its output could be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    Timeout,
    ResourceLimit,
    RuntimeFault,
    RecursionFault,
    MissingEntryPoint,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::ResourceLimit => "resource-limit",
            FailureReason::RuntimeFault => "runtime-fault",
            FailureReason::RecursionFault => "recursion-fault",
            FailureReason::MissingEntryPoint => "missing-entry-point",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerTestOutcome {
    pub index: usize,
    pub test_case: TestCase,
    pub passed: bool,
    pub actual_output: Option<Value>,
    pub failure: Option<FailureReason>,
    pub error: Option<String>,
    pub stdout: String,
    pub elapsed_ms: u64,
}

impl PerTestOutcome {
    /// A failed outcome for a test that never produced a value.
    pub fn failed(
        index: usize,
        test_case: &TestCase,
        reason: FailureReason,
        error: impl Into<String>,
    ) -> Self {
        Self {
            index,
            test_case: test_case.clone(),
            passed: false,
            actual_output: None,
            failure: Some(reason),
            error: Some(error.into()),
            stdout: String::new(),
            elapsed_ms: 0,
        }
    }
}

/// Aggregate result of running one submission against its test cases.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub submission_id: Uuid,
    pub language: Language,
    pub outcomes: Vec<PerTestOutcome>,
    pub total_count: usize,
    pub passed_count: usize,
    pub hidden_count: usize,
    pub overall_success: bool,
    pub elapsed: Duration,
    /// Set when the source was refused before anything ran.
    pub rejection_reason: Option<String>,
    /// Submission-level error, such as a missing entry point.
    pub error: Option<String>,
    pub memory_limit_enforced: bool,
}

impl ExecutionResult {
    pub fn from_outcomes(
        submission_id: Uuid,
        language: Language,
        cases: &[TestCase],
        outcomes: Vec<PerTestOutcome>,
        elapsed: Duration,
        error: Option<String>,
        memory_limit_enforced: bool,
    ) -> Self {
        let passed_count = outcomes.iter().filter(|o| o.passed).count();
        let total_count = cases.len();
        Self {
            submission_id,
            language,
            outcomes,
            total_count,
            passed_count,
            hidden_count: cases.iter().filter(|c| c.hidden).count(),
            overall_success: passed_count == total_count,
            elapsed,
            rejection_reason: None,
            error,
            memory_limit_enforced,
        }
    }

    /// Result for a submission refused by the safety validator. Nothing ran.
    pub fn rejected(
        submission_id: Uuid,
        language: Language,
        cases: &[TestCase],
        reason: impl Into<String>,
        memory_limit_enforced: bool,
    ) -> Self {
        let reason = reason.into();
        Self {
            submission_id,
            language,
            outcomes: Vec::new(),
            total_count: cases.len(),
            passed_count: 0,
            hidden_count: cases.iter().filter(|c| c.hidden).count(),
            overall_success: false,
            elapsed: Duration::ZERO,
            rejection_reason: Some(reason.clone()),
            error: Some(reason),
            memory_limit_enforced,
        }
    }

    /// Result for a language with no execution backend.
    pub fn unsupported(submission_id: Uuid, language: Language, cases: &[TestCase], message: impl Into<String>) -> Self {
        Self {
            submission_id,
            language,
            outcomes: Vec::new(),
            total_count: cases.len(),
            passed_count: 0,
            hidden_count: cases.iter().filter(|c| c.hidden).count(),
            overall_success: false,
            elapsed: Duration::ZERO,
            rejection_reason: None,
            error: Some(message.into()),
            memory_limit_enforced: false,
        }
    }

    /// Percentage of passed tests, rounded to one decimal. Zero when there are no tests.
    pub fn pass_rate(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        round_to(self.passed_count as f64 / self.total_count as f64 * 100.0, 1)
    }

    pub fn visible_outcomes(&self) -> impl Iterator<Item = &PerTestOutcome> {
        self.outcomes.iter().filter(|o| !o.test_case.hidden)
    }

    /// Caller-facing view. Hidden test cases contribute to the counts only.
    pub fn report(&self) -> ExecutionReport {
        ExecutionReport {
            submission_id: self.submission_id,
            success: self.overall_success,
            error: self.error.clone(),
            execution_time: round_to(self.elapsed.as_secs_f64(), 3),
            passed_tests: self.passed_count,
            total_tests: self.total_count,
            pass_rate: self.pass_rate(),
            hidden_tests: self.hidden_count,
            memory_limit_enforced: self.memory_limit_enforced,
            test_results: self.visible_outcomes().map(TestResultView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub submission_id: Uuid,
    pub success: bool,
    pub error: Option<String>,
    /// Seconds.
    pub execution_time: f64,
    pub passed_tests: usize,
    pub total_tests: usize,
    pub pass_rate: f64,
    pub hidden_tests: usize,
    pub memory_limit_enforced: bool,
    pub test_results: Vec<TestResultView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResultView {
    pub description: String,
    pub passed: bool,
    pub input: String,
    pub expected: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
}

impl From<&PerTestOutcome> for TestResultView {
    fn from(outcome: &PerTestOutcome) -> Self {
        Self {
            description: outcome.test_case.label().to_string(),
            passed: outcome.passed,
            input: render_value(&outcome.test_case.input),
            expected: render_value(&outcome.test_case.expected_output),
            actual: outcome.actual_output.as_ref().map(render_value),
            error: outcome.error.clone(),
            reason: outcome.failure,
            stdout: outcome.stdout.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeQualityReport {
    pub lines_of_code: usize,
    pub total_lines: usize,
    pub comment_lines: usize,
    #[serde(rename = "complexity", alias = "cyclomaticComplexity")]
    pub cyclomatic_complexity: u32,
    pub code_smells: Vec<String>,
    pub quality_score: u32,
    pub readability_score: u32,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub valid: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<CodeQualityReport>,
}

impl ValidationVerdict {
    pub fn accepted() -> Self {
        Self {
            valid: true,
            message: "Code is valid".to_string(),
            analysis: None,
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
            analysis: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

/// A coding task as stored by the question bank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CodingTask {
    #[serde(alias = "task_id")]
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub language: Language,
    #[serde(alias = "test_cases")]
    pub test_cases: Vec<TestCase>,
    #[serde(alias = "solution_template")]
    pub solution_template: String,
    /// Seconds per test case.
    #[serde(alias = "time_limit")]
    pub time_limit: Option<f64>,
    /// Megabytes.
    #[serde(alias = "memory_limit")]
    pub memory_limit: Option<u64>,
    pub hints: Vec<String>,
    pub tags: Vec<String>,
}

/// What a candidate sees of a task: hidden cases are replaced by a count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub language: Language,
    pub test_cases: Vec<TestCase>,
    pub hidden_test_count: usize,
    pub solution_template: String,
    /// Seconds per test case.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<f64>,
    /// Megabytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<u64>,
    pub hints: Vec<String>,
    pub tags: Vec<String>,
}

impl CodingTask {
    pub fn hidden_test_count(&self) -> usize {
        self.test_cases.iter().filter(|t| t.hidden).count()
    }

    pub fn public_view(&self) -> TaskView {
        TaskView {
            task_id: self.task_id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            difficulty: self.difficulty,
            language: self.language,
            test_cases: self.test_cases.iter().filter(|t| !t.hidden).cloned().collect(),
            hidden_test_count: self.hidden_test_count(),
            solution_template: self.solution_template.clone(),
            time_limit: self.time_limit,
            memory_limit: self.memory_limit,
            hints: self.hints.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Final score out of 10: six points for correctness, four for code quality.
pub fn combined_score(result: &ExecutionResult, quality: &CodeQualityReport) -> f64 {
    let correctness = if result.total_count == 0 {
        0.0
    } else {
        result.passed_count as f64 / result.total_count as f64
    };
    let quality = quality.quality_score.min(100) as f64 / 100.0;
    round_to(correctness * 6.0 + quality * 4.0, 1)
}

fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcome(index: usize, case: TestCase, passed: bool) -> PerTestOutcome {
        PerTestOutcome {
            index,
            actual_output: Some(case.expected_output.clone()),
            test_case: case,
            passed,
            failure: None,
            error: None,
            stdout: String::new(),
            elapsed_ms: 1,
        }
    }

    #[test]
    fn test_case_accepts_legacy_field_names() {
        let case: TestCase = serde_json::from_value(json!({
            "input": [[1, 2, 3]],
            "expected_output": 6,
            "is_hidden": true
        }))
        .unwrap();
        assert_eq!(case.expected_output, json!(6));
        assert!(case.hidden);
        assert_eq!(case.call, CallConvention::Auto);
        assert_eq!(case.label(), "Test");
    }

    #[test]
    fn call_convention_parses_lowercase() {
        let case: TestCase = serde_json::from_value(json!({
            "input": [1, 2],
            "expected": 3,
            "call": "spread"
        }))
        .unwrap();
        assert_eq!(case.call, CallConvention::Spread);
    }

    #[test]
    fn report_hides_hidden_cases_but_counts_them() {
        let visible = TestCase::new(json!([[1, 2]]), json!(3), "visible");
        let hidden = TestCase::new(json!([[4]]), json!(4), "secret").with_hidden(true);
        let cases = vec![visible.clone(), hidden.clone()];
        let result = ExecutionResult::from_outcomes(
            Uuid::new_v4(),
            Language::Python,
            &cases,
            vec![outcome(0, visible, true), outcome(1, hidden, false)],
            Duration::from_millis(1500),
            None,
            true,
        );

        let report = result.report();
        assert_eq!(report.total_tests, 2);
        assert_eq!(report.passed_tests, 1);
        assert_eq!(report.hidden_tests, 1);
        assert_eq!(report.pass_rate, 50.0);
        assert_eq!(report.execution_time, 1.5);
        assert_eq!(report.test_results.len(), 1);
        assert_eq!(report.test_results[0].input, "[[1, 2]]");
        assert!(!report.success);
    }

    #[test]
    fn report_serializes_camel_case() {
        let result = ExecutionResult::unsupported(Uuid::new_v4(), Language::JavaScript, &[], "nope");
        let value = serde_json::to_value(result.report()).unwrap();
        assert!(value.get("passRate").is_some());
        assert!(value.get("memoryLimitEnforced").is_some());
        assert_eq!(value["passRate"], json!(0.0));
    }

    #[test]
    fn rejected_result_has_no_outcomes() {
        let cases = vec![TestCase::new(json!(1), json!(1), "a"), TestCase::new(json!(2), json!(2), "b")];
        let result = ExecutionResult::rejected(Uuid::new_v4(), Language::Python, &cases, "Use of 'os' is not allowed", true);
        assert_eq!(result.total_count, 2);
        assert_eq!(result.passed_count, 0);
        assert!(result.outcomes.is_empty());
        assert!(!result.overall_success);
        assert_eq!(result.rejection_reason.as_deref(), Some("Use of 'os' is not allowed"));
    }

    #[test]
    fn public_view_strips_hidden_cases() {
        let task = CodingTask {
            task_id: "sum".into(),
            test_cases: vec![
                TestCase::new(json!(1), json!(1), "shown"),
                TestCase::new(json!(2), json!(2), "hidden").with_hidden(true),
            ],
            ..CodingTask::default()
        };
        let view = task.public_view();
        assert_eq!(view.test_cases.len(), 1);
        assert_eq!(view.hidden_test_count, 1);
    }

    #[test]
    fn public_view_carries_task_limits() {
        let task = CodingTask {
            task_id: "fib".into(),
            time_limit: Some(2.5),
            memory_limit: Some(64),
            ..CodingTask::default()
        };
        let view = serde_json::to_value(task.public_view()).unwrap();
        assert_eq!(view["timeLimit"], json!(2.5));
        assert_eq!(view["memoryLimit"], json!(64));

        let unlimited = serde_json::to_value(CodingTask::default().public_view()).unwrap();
        assert!(unlimited.get("timeLimit").is_none());
    }

    #[test]
    fn quality_report_uses_complexity_key() {
        let report = CodeQualityReport {
            cyclomatic_complexity: 3,
            ..CodeQualityReport::default()
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["complexity"], json!(3));
        assert!(value.get("cyclomaticComplexity").is_none());
        assert!(value.get("linesOfCode").is_some());
    }

    #[test]
    fn combined_score_weights_correctness_and_quality() {
        let cases = vec![TestCase::new(json!(1), json!(1), ""), TestCase::new(json!(2), json!(2), "")];
        let mut result = ExecutionResult::from_outcomes(
            Uuid::new_v4(),
            Language::Python,
            &cases,
            Vec::new(),
            Duration::ZERO,
            None,
            true,
        );
        result.passed_count = 1;
        let quality = CodeQualityReport {
            quality_score: 85,
            ..CodeQualityReport::default()
        };
        assert_eq!(combined_score(&result, &quality), 6.4);
    }

    #[test]
    fn language_parse_accepts_aliases() {
        assert_eq!(Language::parse("py"), Some(Language::Python));
        assert_eq!(Language::parse("JavaScript"), Some(Language::JavaScript));
        assert_eq!(Language::parse("cobol"), None);
    }
}
