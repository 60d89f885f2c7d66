//! Test Evaluator
//!
//! **Core Responsibility:**
//! Turn raw execution outputs into per-test verdicts and aggregate them.
//!
//! **Critical Properties:**
//! - Knows nothing about how code ran
//! - Pure function: (execution outputs, test cases) → outcomes
//!
//! **Verdict Rules:**
//! - a fault (timeout, resource limit, runtime, recursion) always fails the test
//! - a returned value passes when the comparator accepts it
//! - overall success requires every case, hidden ones included, to pass

use std::time::Duration;

use arbiter_common::types::{ExecutionResult, FailureReason, Language, PerTestOutcome, TestCase};
use tracing::{debug, info};
use uuid::Uuid;

use crate::comparator::outputs_match;
use crate::engine::TestExecutionOutput;

/// Message used when a submission defines no function.
pub const MISSING_ENTRY_POINT: &str = "No function found to test";

/// Evaluate a single test case execution output.
pub fn evaluate_test(output: TestExecutionOutput, test_case: &TestCase) -> PerTestOutcome {
    let (passed, actual_output, failure, error) = match output.result {
        Ok(actual) => (outputs_match(&actual, &test_case.expected_output), Some(actual), None, None),
        Err(fault) => (false, None, Some(fault.reason), Some(fault.message)),
    };

    debug!(
        test_index = output.index,
        passed,
        reason = ?failure,
        elapsed_ms = output.elapsed_ms,
        "Evaluated test"
    );

    PerTestOutcome {
        index: output.index,
        test_case: test_case.clone(),
        passed,
        actual_output,
        failure,
        error,
        stdout: output.stdout,
        elapsed_ms: output.elapsed_ms,
    }
}

/// Every case fails with the same reason; nothing ran.
pub fn missing_entry_point(cases: &[TestCase]) -> Vec<PerTestOutcome> {
    cases
        .iter()
        .enumerate()
        .map(|(i, case)| PerTestOutcome::failed(i, case, FailureReason::MissingEntryPoint, MISSING_ENTRY_POINT))
        .collect()
}

/// Aggregate per-test outcomes into the final execution result.
pub fn aggregate_results(
    submission_id: Uuid,
    language: Language,
    cases: &[TestCase],
    outcomes: Vec<PerTestOutcome>,
    elapsed: Duration,
    error: Option<String>,
    memory_limit_enforced: bool,
) -> ExecutionResult {
    let result = ExecutionResult::from_outcomes(
        submission_id,
        language,
        cases,
        outcomes,
        elapsed,
        error,
        memory_limit_enforced,
    );

    info!(
        submission_id = %submission_id,
        passed = result.passed_count,
        total = result.total_count,
        hidden = result.hidden_count,
        success = result.overall_success,
        "Evaluation complete"
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Fault;
    use serde_json::json;

    fn output(result: Result<serde_json::Value, Fault>) -> TestExecutionOutput {
        TestExecutionOutput {
            index: 0,
            result,
            stdout: "debug\n".into(),
            elapsed_ms: 3,
        }
    }

    #[test]
    fn returned_value_is_compared() {
        let case = TestCase::new(json!([[1, 2, 3, 4, 5]]), json!(15), "sum");
        let outcome = evaluate_test(output(Ok(json!(15.0))), &case);
        assert!(outcome.passed);
        assert_eq!(outcome.actual_output, Some(json!(15.0)));
        assert_eq!(outcome.stdout, "debug\n");

        let outcome = evaluate_test(output(Ok(json!(14))), &case);
        assert!(!outcome.passed);
        assert!(outcome.failure.is_none());
    }

    #[test]
    fn faults_fail_the_test() {
        let case = TestCase::new(json!(1), json!(1), "loop");
        let fault = Fault::new(FailureReason::Timeout, "Execution time exceeded (2s)");
        let outcome = evaluate_test(output(Err(fault)), &case);
        assert!(!outcome.passed);
        assert_eq!(outcome.failure, Some(FailureReason::Timeout));
        assert!(outcome.actual_output.is_none());
        assert_eq!(outcome.error.as_deref(), Some("Execution time exceeded (2s)"));
    }

    #[test]
    fn missing_entry_point_marks_every_case() {
        let cases = vec![TestCase::new(json!(1), json!(1), "a"), TestCase::new(json!(2), json!(2), "b")];
        let outcomes = missing_entry_point(&cases);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| o.failure == Some(FailureReason::MissingEntryPoint) && !o.passed));
        assert_eq!(outcomes[1].index, 1);
    }

    #[test]
    fn aggregate_counts_passes() {
        let cases = vec![TestCase::new(json!(1), json!(1), "a"), TestCase::new(json!(2), json!(2), "b")];
        let outcomes = vec![
            evaluate_test(output(Ok(json!(1))), &cases[0]),
            evaluate_test(output(Ok(json!(3))), &cases[1]),
        ];
        let result = aggregate_results(Uuid::new_v4(), Language::Python, &cases, outcomes, Duration::ZERO, None, true);
        assert_eq!(result.passed_count, 1);
        assert_eq!(result.total_count, 2);
        assert!(!result.overall_success);
    }
}
