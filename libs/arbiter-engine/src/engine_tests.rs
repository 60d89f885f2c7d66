use std::sync::Arc;

use arbiter_common::config::{EngineConfig, Limits, MemoryBackend};
use arbiter_common::tasks;
use arbiter_common::types::{CallConvention, CodingTask, FailureReason, Language, TestCase};
use serde_json::json;

use crate::evaluator::MISSING_ENTRY_POINT;
use crate::executor::{Grader, JAVASCRIPT_UNSUPPORTED};

fn grader() -> Grader {
    Grader::new(Arc::new(EngineConfig::default())).unwrap()
}

fn quick_limits() -> Limits {
    Limits::default().with_time_limit_seconds(1.0)
}

#[tokio::test]
async fn test_sum_list() {
    let source = "def solve(nums):\n    return sum(nums)\n";
    let cases = vec![TestCase::new(json!([[1, 2, 3, 4, 5]]), json!(15), "sum")];

    let result = grader().grade(Language::Python, source, &cases, &quick_limits()).await;

    assert!(result.overall_success, "{:?}", result);
    assert_eq!(result.passed_count, 1);
    assert_eq!(result.outcomes[0].actual_output, Some(json!(15)));
    assert!(result.memory_limit_enforced);
}

#[tokio::test]
async fn test_duplicates_first_seen_order() {
    let source = "\
def find_duplicates(nums):
    seen = set()
    dups = []
    for n in nums:
        if n in seen and n not in dups:
            dups.append(n)
        seen.add(n)
    return dups
";
    let cases = vec![TestCase::new(json!([[1, 2, 3, 2, 4, 3]]), json!([2, 3]), "dups")];

    let result = grader().grade(Language::Python, source, &cases, &quick_limits()).await;

    assert!(result.overall_success, "{:?}", result.outcomes);
    assert_eq!(result.outcomes[0].actual_output, Some(json!([2, 3])));
}

#[tokio::test]
async fn test_set_result_matches_in_any_order() {
    let source = "def unique(nums):\n    return list(set(nums))\n";
    let cases = vec![TestCase::new(json!([[3, 1, 3, 2]]), json!([3, 2, 1]), "unique")];

    let result = grader().grade(Language::Python, source, &cases, &quick_limits()).await;

    assert!(result.overall_success, "{:?}", result.outcomes);
}

#[tokio::test]
async fn test_forbidden_module_is_rejected() {
    let source = "import subprocess\ndef f():\n    return 1\n";
    let cases = vec![TestCase::new(json!([]), json!(1), "never runs")];

    let result = grader().grade(Language::Python, source, &cases, &quick_limits()).await;

    assert!(!result.overall_success);
    assert!(result.outcomes.is_empty());
    assert_eq!(result.total_count, 1);
    assert_eq!(result.rejection_reason.as_deref(), Some("Use of 'subprocess' is not allowed"));
}

#[tokio::test]
async fn test_syntax_error_is_rejected() {
    let source = "def f(:\n    return 1\n";
    let cases = vec![TestCase::new(json!([]), json!(1), "never runs")];

    let result = grader().grade(Language::Python, source, &cases, &quick_limits()).await;

    assert!(result.outcomes.is_empty());
    assert!(result.rejection_reason.unwrap().starts_with("Syntax error"));
}

#[tokio::test]
async fn test_missing_entry_point() {
    let source = "x = 5\nprint(x)\n";
    let cases = vec![
        TestCase::new(json!(1), json!(1), "first"),
        TestCase::new(json!(2), json!(2), "second"),
    ];

    let result = grader().grade(Language::Python, source, &cases, &quick_limits()).await;

    assert!(!result.overall_success);
    assert_eq!(result.error.as_deref(), Some(MISSING_ENTRY_POINT));
    assert_eq!(result.outcomes.len(), 2);
    assert!(result
        .outcomes
        .iter()
        .all(|o| o.failure == Some(FailureReason::MissingEntryPoint)));
}

#[tokio::test]
async fn test_timeout_does_not_affect_sibling_case() {
    let source = "\
def solve(n):
    if n < 0:
        while True:
            pass
    return n * 2
";
    let cases = vec![
        TestCase::new(json!(-1), json!(0), "hangs"),
        TestCase::new(json!(21), json!(42), "doubles"),
    ];
    let limits = Limits::default().with_time_limit_seconds(0.5);

    let started = std::time::Instant::now();
    let result = grader().grade(Language::Python, source, &cases, &limits).await;
    assert!(started.elapsed() < std::time::Duration::from_secs(3));

    assert_eq!(result.outcomes[0].failure, Some(FailureReason::Timeout));
    assert_eq!(result.outcomes[0].error.as_deref(), Some("Execution time exceeded (0.5s)"));
    assert!(result.outcomes[1].passed);
    assert_eq!(result.passed_count, 1);
}

#[tokio::test]
async fn test_memory_limit() {
    let source = "def grow(n):\n    data = [0] * n\n    return len(data)\n";
    let cases = vec![
        TestCase::new(json!(100_000_000), json!(100_000_000), "huge"),
        TestCase::new(json!(10), json!(10), "small"),
    ];
    let limits = quick_limits().with_memory_limit_mb(16);

    let result = grader().grade(Language::Python, source, &cases, &limits).await;

    assert_eq!(result.outcomes[0].failure, Some(FailureReason::ResourceLimit));
    assert_eq!(result.outcomes[0].error.as_deref(), Some("Memory limit exceeded (16 MB)"));
    assert!(result.outcomes[1].passed, "the ceiling resets between cases");
}

#[tokio::test]
async fn test_unbounded_recursion() {
    let source = "def down(n):\n    return down(n + 1)\n";
    let cases = vec![TestCase::new(json!(0), json!(0), "deep")];

    let result = grader().grade(Language::Python, source, &cases, &quick_limits()).await;

    assert_eq!(result.outcomes[0].failure, Some(FailureReason::RecursionFault));
}

#[tokio::test]
async fn test_bounded_recursion_fits() {
    let source = "def depth(n):\n    if n == 0:\n        return 0\n    return 1 + depth(n - 1)\n";
    let cases = vec![TestCase::new(json!(400), json!(400), "deep but fine")];

    let result = grader().grade(Language::Python, source, &cases, &quick_limits()).await;

    assert!(result.overall_success, "{:?}", result.outcomes);
}

#[tokio::test]
async fn test_recursion_within_default_depth() {
    let source = "def depth(n):\n    if n == 0:\n        return 0\n    return 1 + depth(n - 1)\n";
    let cases = vec![TestCase::new(json!(900), json!(900), "near the default depth")];

    let result = grader().grade(Language::Python, source, &cases, &Limits::default()).await;

    assert!(result.overall_success, "{:?}", result.outcomes);
}

#[tokio::test]
async fn test_dropping_deep_nesting_does_not_crash_worker() {
    let source = "\
def nest(n):
    a = []
    for i in range(n):
        a = [a]
    return 1
";
    let cases = vec![
        TestCase::new(json!(2_000_000), json!(1), "two million levels"),
        TestCase::new(json!(3), json!(1), "worker still serves"),
    ];
    let limits = Limits::default().with_time_limit_seconds(60.0).with_memory_limit_mb(512);

    let result = grader().grade(Language::Python, source, &cases, &limits).await;

    assert!(result.overall_success, "{:?}", result.outcomes);
}

#[tokio::test]
async fn test_deep_comparison_is_a_recursion_fault() {
    let source = "\
def deep(n, mode):
    a = []
    b = []
    for i in range(n):
        a = [a]
        b = [b]
    if mode == 'eq':
        return a == b
    return len(str(a))
";
    let cases = vec![
        TestCase::new(json!([200_000, "eq"]), json!(true), "equality"),
        TestCase::new(json!([200_000, "str"]), json!(0), "str"),
    ];
    let limits = Limits::default().with_time_limit_seconds(10.0);

    let result = grader().grade(Language::Python, source, &cases, &limits).await;

    for outcome in &result.outcomes {
        assert_eq!(outcome.failure, Some(FailureReason::RecursionFault), "{:?}", outcome);
    }
}

#[tokio::test]
async fn test_integers_grow_past_64_bits() {
    let source = "\
def compute(kind):
    if kind == 'fact':
        r = 1
        for i in range(2, 22):
            r = r * i
        return str(r)
    if kind == 'fib':
        a, b = 0, 1
        for i in range(100):
            a, b = b, a + b
        return str(a)
    if kind == 'edge':
        return 2 ** 62 + 2 ** 62 - 1
    return 2 ** 64 - 1
";
    let cases = vec![
        TestCase::new(json!("fact"), json!("51090942171709440000"), "21!"),
        TestCase::new(json!("fib"), json!("354224848179261915075"), "fib(100)"),
        TestCase::new(json!("edge"), json!(9223372036854775807i64), "back into i64"),
        TestCase::new(json!("max"), json!(18446744073709551615u64), "u64 max"),
    ];

    let result = grader().grade(Language::Python, source, &cases, &quick_limits()).await;

    assert!(result.overall_success, "{:?}", result.outcomes);
}

#[tokio::test]
async fn test_auto_convention_spreads_long_lists() {
    let source = "def sum_numbers(numbers):\n    return sum(numbers)\n";
    let auto = vec![TestCase::new(json!([1, 2, 3, 4, 5]), json!(15), "spread")];

    let result = grader().grade(Language::Python, source, &auto, &quick_limits()).await;

    let outcome = &result.outcomes[0];
    assert_eq!(outcome.failure, Some(FailureReason::RuntimeFault));
    assert!(outcome
        .error
        .as_deref()
        .unwrap()
        .contains("takes 1 positional argument but 5 were given"));

    let single = vec![TestCase::new(json!([1, 2, 3, 4, 5]), json!(15), "whole list").with_call(CallConvention::Single)];
    let result = grader().grade(Language::Python, source, &single, &quick_limits()).await;
    assert!(result.overall_success, "{:?}", result.outcomes);
}

#[tokio::test]
async fn test_builtin_task_grades_reference_solution() {
    let task = tasks::builtin_task("builtin:fallback_python_middle").unwrap();
    let source = "\
def find_duplicates(arr):
    result = []
    for x in arr:
        if arr.count(x) > 1 and x not in result:
            result.append(x)
    return result
";

    let graded = grader().grade_task(&task, source).await;

    assert!(graded.result.overall_success, "{:?}", graded.result.outcomes);
    assert_eq!(graded.result.total_count, 5);
    assert_eq!(graded.report().execution.test_results.len(), 3);
}

#[tokio::test]
async fn test_runtime_error_is_reported() {
    let source = "def solve(xs):\n    return xs[10]\n";
    let cases = vec![TestCase::new(json!([[1, 2]]), json!(0), "out of range")];

    let result = grader().grade(Language::Python, source, &cases, &quick_limits()).await;

    let outcome = &result.outcomes[0];
    assert_eq!(outcome.failure, Some(FailureReason::RuntimeFault));
    assert!(outcome.error.as_deref().unwrap().starts_with("Execution error: IndexError"));
}

#[tokio::test]
async fn test_stdout_is_captured_per_case() {
    let source = "def echo(x):\n    print('got', x)\n    return x\n";
    let cases = vec![
        TestCase::new(json!(1), json!(1), "one"),
        TestCase::new(json!(2), json!(2), "two"),
    ];

    let result = grader().grade(Language::Python, source, &cases, &quick_limits()).await;

    assert_eq!(result.outcomes[0].stdout, "got 1\n");
    assert_eq!(result.outcomes[1].stdout, "got 2\n");
}

#[tokio::test]
async fn test_hidden_cases_count_but_are_not_reported() {
    let source = "def square(x):\n    return x * x\n";
    let cases = vec![
        TestCase::new(json!(3), json!(9), "visible"),
        TestCase::new(json!(4), json!(15), "secret").with_hidden(true),
    ];

    let result = grader().grade(Language::Python, source, &cases, &quick_limits()).await;
    let report = result.report();

    assert!(!report.success);
    assert_eq!(report.total_tests, 2);
    assert_eq!(report.hidden_tests, 1);
    assert_eq!(report.passed_tests, 1);
    assert_eq!(report.test_results.len(), 1);
    assert_eq!(report.test_results[0].description, "visible");
}

#[tokio::test]
async fn test_float_tolerance_and_single_convention() {
    let source = "def mean(xs):\n    return sum(xs) / len(xs)\n";
    let cases = vec![TestCase::new(json!([0.1, 0.2]), json!(0.15), "mean").with_call(CallConvention::Single)];

    let result = grader().grade(Language::Python, source, &cases, &quick_limits()).await;

    assert!(result.overall_success, "{:?}", result.outcomes);
}

#[tokio::test]
async fn test_entry_point_is_first_function() {
    let source = "def helper(x):\n    return x + 1\n\ndef solve(x):\n    return helper(x) * 10\n";
    let cases = vec![TestCase::new(json!(1), json!(2), "helper runs")];

    let result = grader().grade(Language::Python, source, &cases, &quick_limits()).await;

    assert!(result.overall_success);
}

#[tokio::test]
async fn test_javascript_is_unsupported() {
    let cases = vec![TestCase::new(json!(1), json!(1), "js")];

    let result = grader()
        .grade(Language::JavaScript, "function f(x) { return x; }", &cases, &quick_limits())
        .await;

    assert!(!result.overall_success);
    assert!(result.outcomes.is_empty());
    assert_eq!(result.error.as_deref(), Some(JAVASCRIPT_UNSUPPORTED));
}

#[tokio::test]
async fn test_degraded_memory_backend_is_reported() {
    let config = EngineConfig {
        memory_backend: MemoryBackend::None,
        ..EngineConfig::default()
    };
    let grader = Grader::new(Arc::new(config)).unwrap();
    let cases = vec![TestCase::new(json!(1), json!(1), "identity")];

    let result = grader
        .grade(Language::Python, "def same(x):\n    return x\n", &cases, &quick_limits())
        .await;

    assert!(result.overall_success);
    assert!(!result.memory_limit_enforced);
    assert!(!result.report().memory_limit_enforced);
}

#[tokio::test]
async fn test_empty_test_list_succeeds() {
    let result = grader()
        .grade(Language::Python, "def f(x):\n    return x\n", &[], &quick_limits())
        .await;

    assert!(result.overall_success);
    assert_eq!(result.total_count, 0);
    assert_eq!(result.pass_rate(), 0.0);
}

#[tokio::test]
async fn test_grade_task_applies_task_limits_and_scores() {
    let task = CodingTask {
        task_id: "reverse".into(),
        title: "Reverse a string".into(),
        language: Language::Python,
        test_cases: vec![
            TestCase::new(json!(["abc"]), json!("cba"), "short"),
            TestCase::new(json!(["racecar"]), json!("racecar"), "palindrome").with_hidden(true),
        ],
        time_limit: Some(2.0),
        memory_limit: Some(64),
        ..CodingTask::default()
    };

    let graded = grader().grade_task(&task, "def reverse_text(s):\n    return s[::-1]\n").await;

    assert!(graded.result.overall_success);
    assert_eq!(graded.quality.quality_score, 70);
    // 6 for correctness + 4 * 0.7 for quality
    assert_eq!(graded.score, 8.8);
    let report = graded.report();
    assert_eq!(report.execution.test_results.len(), 1);
}
