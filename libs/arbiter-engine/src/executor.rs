//! Grading Orchestrator
//!
//! **Responsibility:**
//! Coordinate validator, engine and evaluator into one terminal answer per
//! submission, and attach the static quality report.
//!
//! **Flow:**
//! 1. Safety Validator, once. A rejection ends the run with no outcomes.
//! 2. Entry point lookup. Without one every case fails with the same reason.
//! 3. Engine, once per test case, sequentially and in the order supplied.
//! 4. Evaluator verdicts, then aggregation.
//!
//! This module is the glue layer. It knows nothing about:
//! - How code executes (engine's job)
//! - How outputs are judged (evaluator's job)

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use arbiter_common::config::{EngineConfig, Limits};
use arbiter_common::types::{
    combined_score, CodeQualityReport, CodingTask, ExecutionReport, ExecutionResult, Language, TestCase,
    ValidationVerdict,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::analyzer;
use crate::engine::{ScriptEngine, TestRun};
use crate::evaluator::{self, MISSING_ENTRY_POINT};
use crate::governor::ResourceGovernor;
use crate::validator::{PolicyError, SafetyValidator};

pub const JAVASCRIPT_UNSUPPORTED: &str = "JavaScript execution is not supported yet; use Python";

/// Execution result, quality report and the combined 0-10 score.
#[derive(Debug, Clone)]
pub struct GradedSubmission {
    pub result: ExecutionResult,
    pub quality: CodeQualityReport,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedReport {
    pub execution: ExecutionReport,
    pub quality: CodeQualityReport,
    pub score: f64,
}

impl GradedSubmission {
    pub fn report(&self) -> GradedReport {
        GradedReport {
            execution: self.result.report(),
            quality: self.quality.clone(),
            score: self.score,
        }
    }
}

/// Entry point of the engine for callers.
#[derive(Debug, Clone)]
pub struct Grader {
    config: Arc<EngineConfig>,
    validator: SafetyValidator,
    engine: ScriptEngine,
}

impl Grader {
    pub fn new(config: Arc<EngineConfig>) -> Result<Self, PolicyError> {
        let engine = ScriptEngine::new(Arc::clone(&config));
        Self::assemble(config, engine)
    }

    pub fn with_governor(config: Arc<EngineConfig>, governor: Arc<dyn ResourceGovernor>) -> Result<Self, PolicyError> {
        let engine = ScriptEngine::with_governor(Arc::clone(&config), governor);
        Self::assemble(config, engine)
    }

    fn assemble(config: Arc<EngineConfig>, engine: ScriptEngine) -> Result<Self, PolicyError> {
        let validator = SafetyValidator::new(&config.sandbox, config.limits.max_source_bytes)?;
        Ok(Self {
            config,
            validator,
            engine,
        })
    }

    /// Load configuration from `path`, the default file, or built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = EngineConfig::resolve(path)?;
        Self::new(Arc::new(config)).context("Failed to build the safety validator")
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn memory_limit_enforced(&self) -> bool {
        self.engine.memory_capability().is_enforced()
    }

    pub fn validate(&self, language: Language, source: &str) -> ValidationVerdict {
        self.validator.verdict(language, source)
    }

    /// Validate, and attach the quality report when the code is valid.
    pub fn validate_and_analyze(&self, language: Language, source: &str) -> ValidationVerdict {
        let mut verdict = self.validate(language, source);
        if verdict.valid {
            verdict.analysis = Some(self.analyze(language, source));
        }
        verdict
    }

    pub fn analyze(&self, language: Language, source: &str) -> CodeQualityReport {
        analyzer::analyze(language, source)
    }

    /// Grade `source` against `cases`. Always returns a complete result.
    #[instrument(skip_all, fields(submission_id = tracing::field::Empty, language = %language, test_count = cases.len()))]
    pub async fn grade(&self, language: Language, source: &str, cases: &[TestCase], limits: &Limits) -> ExecutionResult {
        let submission_id = Uuid::new_v4();
        tracing::Span::current().record("submission_id", tracing::field::display(submission_id));
        let enforced = self.memory_limit_enforced();

        if !self.config.is_enabled(language) {
            let message = match language {
                Language::JavaScript => JAVASCRIPT_UNSUPPORTED.to_string(),
                other => format!("{} execution is disabled", other),
            };
            warn!(%message, "Language not available");
            return ExecutionResult::unsupported(submission_id, language, cases, message);
        }

        // the parsed module is not Send; keep only the entry point name
        let entry_point = match self.validator.validate(source) {
            Ok(module) => module.first_function().map(|def| def.name.clone()),
            Err(rejection) => {
                warn!(reason = %rejection, "Submission rejected");
                return ExecutionResult::rejected(submission_id, language, cases, rejection.to_string(), enforced);
            }
        };

        if !enforced {
            warn!("Running without a memory ceiling");
        }

        let start = Instant::now();
        let Some(entry_point) = entry_point else {
            warn!("Submission defines no function");
            return evaluator::aggregate_results(
                submission_id,
                language,
                cases,
                evaluator::missing_entry_point(cases),
                start.elapsed(),
                Some(MISSING_ENTRY_POINT.to_string()),
                enforced,
            );
        };

        info!(entry_point = %entry_point, "Starting grading");

        let source: Arc<str> = Arc::from(source);
        let mut outcomes = Vec::with_capacity(cases.len());
        for (index, test_case) in cases.iter().enumerate() {
            let output = self
                .engine
                .execute(TestRun {
                    index,
                    source: &source,
                    entry_point: &entry_point,
                    test_case,
                    limits,
                })
                .await;
            outcomes.push(evaluator::evaluate_test(output, test_case));
        }

        evaluator::aggregate_results(submission_id, language, cases, outcomes, start.elapsed(), None, enforced)
    }

    /// Grade with the configured limits.
    pub async fn grade_default(&self, language: Language, source: &str, cases: &[TestCase]) -> ExecutionResult {
        let limits = self.config.limits;
        self.grade(language, source, cases, &limits).await
    }

    /// Grade a stored task. Its own time and memory limits override the configured ones.
    pub async fn grade_task(&self, task: &CodingTask, source: &str) -> GradedSubmission {
        let mut limits = self.config.limits;
        if let Some(seconds) = task.time_limit {
            limits = limits.with_time_limit_seconds(seconds);
        }
        if let Some(megabytes) = task.memory_limit {
            limits = limits.with_memory_limit_mb(megabytes);
        }

        self.grade_submission(task.language, source, &task.test_cases, &limits).await
    }

    /// Grade and analyze, then combine both into the 0-10 score.
    pub async fn grade_submission(
        &self,
        language: Language,
        source: &str,
        cases: &[TestCase],
        limits: &Limits,
    ) -> GradedSubmission {
        let result = self.grade(language, source, cases, limits).await;
        let quality = self.analyze(language, source);
        let score = combined_score(&result, &quality);
        GradedSubmission { result, quality, score }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_and_analyze_attaches_report_only_when_valid() {
        let grader = Grader::new(Arc::new(EngineConfig::default())).unwrap();
        let verdict = grader.validate_and_analyze(Language::Python, "def add(a, b):\n    return a + b\n");
        assert!(verdict.valid);
        assert_eq!(verdict.analysis.unwrap().cyclomatic_complexity, 1);

        let verdict = grader.validate_and_analyze(Language::Python, "import os\n");
        assert!(!verdict.valid);
        assert!(verdict.analysis.is_none());
    }

    #[test]
    fn memory_capability_follows_backend() {
        let mut config = EngineConfig::default();
        assert!(Grader::new(Arc::new(config.clone())).unwrap().memory_limit_enforced());
        config.memory_backend = arbiter_common::config::MemoryBackend::None;
        assert!(!Grader::new(Arc::new(config)).unwrap().memory_limit_enforced());
    }
}
