//! Built-in coding tasks and the difficulty progression of an interview.
//!
//! These are the tasks handed out when no task bank is reachable. List inputs
//! are tagged [`CallConvention::Single`] so a list is always one argument.

use serde_json::json;

use crate::types::{CallConvention, CodingTask, Difficulty, Language, TestCase};

/// Prefix that selects a built-in task where a task file path is expected.
pub const BUILTIN_PREFIX: &str = "builtin:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateLevel {
    Junior,
    Middle,
    Senior,
    TeamLead,
}

impl CandidateLevel {
    pub fn parse(name: &str) -> Option<CandidateLevel> {
        match name.trim().to_ascii_lowercase().replace(['-', '_'], " ").as_str() {
            "junior" => Some(CandidateLevel::Junior),
            "middle" => Some(CandidateLevel::Middle),
            "senior" => Some(CandidateLevel::Senior),
            "team lead" | "teamlead" | "lead" => Some(CandidateLevel::TeamLead),
            _ => None,
        }
    }
}

/// Difficulty of task `task_number` (1-based) out of `total_tasks`.
///
/// Juniors never get hard tasks and seniors never get easy ones. An unknown
/// level follows the middle progression. Zero total counts as one.
pub fn difficulty_for_task(task_number: usize, total_tasks: usize, level: Option<CandidateLevel>) -> Difficulty {
    let progress = task_number as f64 / total_tasks.max(1) as f64;
    match level {
        Some(CandidateLevel::Junior) if progress <= 0.5 => Difficulty::Easy,
        Some(CandidateLevel::Junior) => Difficulty::Medium,
        Some(CandidateLevel::Senior | CandidateLevel::TeamLead) if progress <= 0.3 => Difficulty::Medium,
        Some(CandidateLevel::Senior | CandidateLevel::TeamLead) => Difficulty::Hard,
        Some(CandidateLevel::Middle) | None if progress <= 0.3 => Difficulty::Easy,
        Some(CandidateLevel::Middle) | None if progress <= 0.7 => Difficulty::Medium,
        Some(CandidateLevel::Middle) | None => Difficulty::Hard,
    }
}

/// Difficulties for a whole interview of `total_tasks` tasks.
pub fn difficulty_plan(total_tasks: usize, level: Option<CandidateLevel>) -> Vec<Difficulty> {
    (1..=total_tasks)
        .map(|n| difficulty_for_task(n, total_tasks, level))
        .collect()
}

fn case(input: serde_json::Value, expected: serde_json::Value, description: &str) -> TestCase {
    TestCase::new(input, expected, description).with_call(CallConvention::Single)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn sum_numbers() -> CodingTask {
    CodingTask {
        task_id: "fallback_python_junior".into(),
        title: "Sum of a list".into(),
        description: "Write sum_numbers(numbers) that returns the sum of a list of numbers.\n\n\
                      sum_numbers([1, 2, 3, 4, 5]) -> 15\n\
                      sum_numbers([]) -> 0"
            .into(),
        difficulty: Difficulty::Easy,
        language: Language::Python,
        test_cases: vec![
            case(json!([1, 2, 3, 4, 5]), json!(15), "Sum of positive numbers"),
            case(json!([]), json!(0), "Empty list"),
            case(json!([-1, 1, -2, 2]), json!(0), "Numbers that cancel out"),
            case(json!([100]), json!(100), "Single element").with_hidden(true),
            case(json!([0, 0, 0]), json!(0), "Only zeros").with_hidden(true),
        ],
        solution_template: "def sum_numbers(numbers):\n    pass".into(),
        time_limit: Some(2.0),
        memory_limit: Some(64),
        hints: strings(&["Try the built-in sum()", "Remember the empty list"]),
        tags: strings(&["lists", "basic operations"]),
    }
}

fn find_duplicates() -> CodingTask {
    CodingTask {
        task_id: "fallback_python_middle".into(),
        title: "Find duplicates".into(),
        description: "Write find_duplicates(arr) that returns the values occurring more than once, \
                      in the order they first appear.\n\n\
                      find_duplicates([1, 2, 3, 2, 4, 3]) -> [2, 3]\n\
                      find_duplicates([1, 2, 3, 4, 5]) -> []"
            .into(),
        difficulty: Difficulty::Medium,
        language: Language::Python,
        test_cases: vec![
            case(json!([1, 2, 3, 2, 4, 3]), json!([2, 3]), "Two duplicates"),
            case(json!([1, 2, 3, 4, 5]), json!([]), "No duplicates"),
            case(json!([1, 1, 1, 1]), json!([1]), "One value repeated"),
            case(json!([]), json!([]), "Empty list").with_hidden(true),
            case(json!([5, 4, 3, 2, 1, 2, 3, 4, 5]), json!([5, 4, 3, 2]), "Mirrored list").with_hidden(true),
        ],
        solution_template: "def find_duplicates(arr):\n    pass".into(),
        time_limit: Some(3.0),
        memory_limit: Some(128),
        hints: strings(&["A set remembers what was seen", "Keep the result in order"]),
        tags: strings(&["arrays", "hash tables", "algorithms"]),
    }
}

fn is_palindrome() -> CodingTask {
    CodingTask {
        task_id: "fallback_js_basic".into(),
        title: "Palindrome check".into(),
        description: "Write isPalindrome(str) that tells whether a string reads the same backwards.".into(),
        difficulty: Difficulty::Easy,
        language: Language::JavaScript,
        test_cases: vec![
            case(json!("radar"), json!(true), "Palindrome"),
            case(json!("hello"), json!(false), "Not a palindrome"),
            case(json!(""), json!(true), "Empty string"),
            case(json!("a"), json!(true), "Single character").with_hidden(true),
            case(json!("racecar"), json!(true), "Odd length").with_hidden(true),
        ],
        solution_template: "function isPalindrome(str) {\n}".into(),
        time_limit: Some(2.0),
        memory_limit: Some(64),
        hints: strings(&["Compare the string with its reverse"]),
        tags: strings(&["strings"]),
    }
}

fn fibonacci() -> CodingTask {
    CodingTask {
        task_id: "python_junior_fibonacci".into(),
        title: "Fibonacci".into(),
        description: "Write fibonacci(n) that returns the n-th Fibonacci number, with fibonacci(0) = 0.".into(),
        difficulty: Difficulty::Easy,
        language: Language::Python,
        test_cases: vec![
            case(json!(0), json!(0), "First number"),
            case(json!(1), json!(1), "Second number"),
            case(json!(10), json!(55), "Tenth number"),
            case(json!(15), json!(610), "Fifteenth number").with_hidden(true),
        ],
        solution_template: "def fibonacci(n):\n    pass".into(),
        time_limit: Some(2.0),
        memory_limit: Some(64),
        hints: strings(&["Iterate instead of recursing"]),
        tags: strings(&["math", "loops"]),
    }
}

fn merge_sort() -> CodingTask {
    CodingTask {
        task_id: "python_middle_merge_sort".into(),
        title: "Merge sort".into(),
        description: "Write merge_sort(arr) that returns a sorted copy of arr using merge sort.".into(),
        difficulty: Difficulty::Medium,
        language: Language::Python,
        test_cases: vec![
            case(json!([3, 1, 4, 1, 5, 9, 2, 6]), json!([1, 1, 2, 3, 4, 5, 6, 9]), "Unsorted list"),
            case(json!([]), json!([]), "Empty list"),
            case(json!([1]), json!([1]), "Single element").with_hidden(true),
        ],
        solution_template: "def merge_sort(arr):\n    pass".into(),
        time_limit: Some(3.0),
        memory_limit: Some(128),
        hints: strings(&["Split in halves, sort each, then merge"]),
        tags: strings(&["sorting", "recursion", "algorithms"]),
    }
}

/// Every built-in task.
pub fn builtin_tasks() -> Vec<CodingTask> {
    vec![sum_numbers(), find_duplicates(), is_palindrome(), fibonacci(), merge_sort()]
}

/// Look up a built-in task by id. The `builtin:` prefix is optional.
pub fn builtin_task(id: &str) -> Option<CodingTask> {
    let id = id.strip_prefix(BUILTIN_PREFIX).unwrap_or(id);
    builtin_tasks().into_iter().find(|task| task.task_id == id)
}

/// Task handed out when no task bank answers.
pub fn fallback_task(level: Option<CandidateLevel>, language: Language) -> CodingTask {
    match (language, level) {
        (Language::Python, Some(CandidateLevel::Junior)) => sum_numbers(),
        (Language::Python, _) => find_duplicates(),
        (Language::JavaScript, _) => is_palindrome(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn junior_progression_never_reaches_hard() {
        let plan = difficulty_plan(10, Some(CandidateLevel::Junior));
        assert_eq!(plan[..5], [Difficulty::Easy; 5]);
        assert_eq!(plan[5..], [Difficulty::Medium; 5]);
    }

    #[test]
    fn middle_progression_covers_all_difficulties() {
        let plan = difficulty_plan(10, Some(CandidateLevel::Middle));
        assert_eq!(plan[..3], [Difficulty::Easy; 3]);
        assert_eq!(plan[3..7], [Difficulty::Medium; 4]);
        assert_eq!(plan[7..], [Difficulty::Hard; 3]);
        assert_eq!(difficulty_plan(10, None), plan);
    }

    #[test]
    fn senior_and_lead_start_at_medium() {
        for level in [CandidateLevel::Senior, CandidateLevel::TeamLead] {
            let plan = difficulty_plan(10, Some(level));
            assert_eq!(plan[..3], [Difficulty::Medium; 3]);
            assert_eq!(plan[3..], [Difficulty::Hard; 7]);
        }
    }

    #[test]
    fn zero_total_does_not_divide_by_zero() {
        assert_eq!(difficulty_for_task(1, 0, Some(CandidateLevel::Junior)), Difficulty::Medium);
        assert!(difficulty_plan(0, None).is_empty());
    }

    #[test]
    fn level_names_parse() {
        assert_eq!(CandidateLevel::parse("Team Lead"), Some(CandidateLevel::TeamLead));
        assert_eq!(CandidateLevel::parse("team-lead"), Some(CandidateLevel::TeamLead));
        assert_eq!(CandidateLevel::parse(" junior "), Some(CandidateLevel::Junior));
        assert_eq!(CandidateLevel::parse("intern"), None);
    }

    #[test]
    fn builtin_lookup_accepts_prefix() {
        assert_eq!(builtin_task("builtin:fallback_python_junior").unwrap().title, "Sum of a list");
        assert!(builtin_task("python_middle_merge_sort").is_some());
        assert!(builtin_task("builtin:missing").is_none());
    }

    #[test]
    fn list_inputs_are_single_arguments() {
        for task in builtin_tasks() {
            assert!(!task.test_cases.is_empty(), "{}", task.task_id);
            assert!(task.hidden_test_count() > 0, "{}", task.task_id);
            assert!(task.test_cases.iter().all(|c| c.call == CallConvention::Single));
        }
    }

    #[test]
    fn task_ids_are_unique() {
        let mut ids: Vec<_> = builtin_tasks().into_iter().map(|t| t.task_id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), builtin_tasks().len());
    }

    #[test]
    fn fallback_follows_language_and_level() {
        assert_eq!(fallback_task(Some(CandidateLevel::Junior), Language::Python).task_id, "fallback_python_junior");
        assert_eq!(fallback_task(Some(CandidateLevel::Senior), Language::Python).task_id, "fallback_python_middle");
        assert_eq!(fallback_task(None, Language::JavaScript).task_id, "fallback_js_basic");
    }
}
