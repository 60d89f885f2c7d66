// CLI commands for Arbiter
use anyhow::{anyhow, Context, Result};
use arbiter_common::config::{EngineConfig, Limits};
use arbiter_common::tasks::{self, CandidateLevel, BUILTIN_PREFIX};
use arbiter_common::types::{CodingTask, Difficulty, Language, TestCase};
use arbiter_engine::Grader;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Per-run limit overrides from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LimitOverrides {
    pub time_limit: Option<f64>,
    pub memory_limit: Option<u64>,
}

impl LimitOverrides {
    fn apply(self, mut limits: Limits) -> Limits {
        if let Some(seconds) = self.time_limit {
            limits = limits.with_time_limit_seconds(seconds);
        }
        if let Some(megabytes) = self.memory_limit {
            limits = limits.with_memory_limit_mb(megabytes);
        }
        limits
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read source file {}", path.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {} {}", what, path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {} {}", what, path.display()))
}

fn load_task(path: &Path) -> Result<CodingTask> {
    match path.to_str().and_then(|p| p.strip_prefix(BUILTIN_PREFIX)) {
        Some(id) => tasks::builtin_task(id).ok_or_else(|| anyhow!("Unknown built-in task '{}'", id)),
        None => read_json(path, "task file"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", rendered);
    Ok(())
}

/// Grade a source file against a test case file. Returns whether every test passed.
pub async fn grade(
    config: Option<&Path>,
    source_path: &Path,
    language: Language,
    tests_path: &Path,
    overrides: LimitOverrides,
) -> Result<bool> {
    let grader = Grader::load(config)?;
    let source = read_source(source_path)?;
    let cases: Vec<TestCase> = read_json(tests_path, "test file")?;
    let limits = overrides.apply(grader.config().limits);
    info!(tests = cases.len(), %language, "Grading {}", source_path.display());

    let graded = grader.grade_submission(language, &source, &cases, &limits).await;
    print_json(&graded.report())?;
    Ok(graded.result.overall_success)
}

/// Grade a source file against a stored coding task. Command line limits win over the task's.
pub async fn grade_task(
    config: Option<&Path>,
    source_path: &Path,
    task_path: &Path,
    overrides: LimitOverrides,
) -> Result<bool> {
    let grader = Grader::load(config)?;
    let source = read_source(source_path)?;
    let mut task = load_task(task_path)?;
    task.time_limit = overrides.time_limit.or(task.time_limit);
    task.memory_limit = overrides.memory_limit.or(task.memory_limit);
    info!(task_id = %task.task_id, tests = task.test_cases.len(), "Grading task");

    let graded = grader.grade_task(&task, &source).await;
    print_json(&graded.report())?;
    Ok(graded.result.overall_success)
}

pub fn validate(config: Option<&Path>, source_path: &Path, language: Language, analyze: bool) -> Result<bool> {
    let grader = Grader::load(config)?;
    let source = read_source(source_path)?;

    let verdict = if analyze {
        grader.validate_and_analyze(language, &source)
    } else {
        grader.validate(language, &source)
    };
    debug!(valid = verdict.valid, "Validation finished");

    print_json(&verdict)?;
    Ok(verdict.valid)
}

pub fn analyze(config: Option<&Path>, source_path: &Path, language: Language) -> Result<bool> {
    let grader = Grader::load(config)?;
    let source = read_source(source_path)?;
    print_json(&grader.analyze(language, &source))?;
    Ok(true)
}

pub fn show_config(config: Option<&Path>) -> Result<bool> {
    let config = EngineConfig::resolve(config)?;
    info!("Configured languages: {:?}", config.list_languages());
    print_json(&config)?;
    Ok(true)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskSummary {
    task_id: String,
    title: String,
    difficulty: Difficulty,
    language: Language,
    test_count: usize,
}

pub fn list_tasks() -> Result<bool> {
    let summaries: Vec<TaskSummary> = tasks::builtin_tasks()
        .into_iter()
        .map(|task| TaskSummary {
            test_count: task.test_cases.len(),
            task_id: task.task_id,
            title: task.title,
            difficulty: task.difficulty,
            language: task.language,
        })
        .collect();
    print_json(&summaries)?;
    Ok(true)
}

pub fn show_task(id: &str) -> Result<bool> {
    let task = tasks::builtin_task(id).ok_or_else(|| anyhow!("Unknown built-in task '{}'", id))?;
    print_json(&task.public_view())?;
    Ok(true)
}

pub fn plan_tasks(level: Option<&str>, total: usize) -> Result<bool> {
    let parsed = level.and_then(CandidateLevel::parse);
    if let (Some(name), None) = (level, parsed) {
        warn!(level = name, "Unknown candidate level, using the default progression");
    }
    print_json(&tasks::difficulty_plan(total, parsed))?;
    Ok(true)
}
