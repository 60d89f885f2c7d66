//! Execution Engine - Sandboxed Executor
//!
//! **Core Responsibility:**
//! Run the entry function of a validated submission against one test input and
//! hand back the raw value it returned, or the reason it failed.
//!
//! **Architectural Boundary:**
//! - Engine knows HOW to execute (worker thread, interpreter, limits)
//! - Engine does NOT judge correctness; the evaluator does
//!
//! **Isolation per test case:**
//! - a fresh interpreter whose only globals are the allowlisted builtins
//! - a dedicated OS thread with a large stack, joined under a wall-clock deadline
//! - a memory ceiling installed on that thread and removed when the case ends
//! - containers left in reference cycles are emptied when the case ends
//!
//! Past the deadline the outcome is a timeout at once. The abandoned worker sees
//! its interrupt flag at the next step and unwinds on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arbiter_common::config::{EngineConfig, Limits};
use arbiter_common::types::{CallConvention, FailureReason, TestCase};
use serde_json::Value as Json;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use crate::governor::{governor_for, MemoryCapability, ResourceGovernor};
use crate::script::arena::Arena;
use crate::script::ast::Module;
use crate::script::{parse_module, ErrorKind, Interpreter, InterpreterOptions, ScriptError, Value};

/// Stack for worker threads. Deep but bounded recursion must fit.
const WORKER_STACK_BYTES: usize = 256 * 1024 * 1024;

/// Why a test case produced no value.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub reason: FailureReason,
    pub message: String,
}

impl Fault {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    fn from_script(err: &ScriptError, limits: &Limits) -> Self {
        match err.kind {
            ErrorKind::Interrupted => Self::timeout(limits.time_limit()),
            ErrorKind::MemoryError => Self::new(
                FailureReason::ResourceLimit,
                format!("Memory limit exceeded ({} MB)", limits.memory_limit_mb),
            ),
            ErrorKind::RecursionError => Self::new(FailureReason::RecursionFault, "Maximum recursion depth exceeded"),
            _ => Self::new(FailureReason::RuntimeFault, format!("Execution error: {}", err)),
        }
    }

    fn timeout(limit: Duration) -> Self {
        Self::new(
            FailureReason::Timeout,
            format!("Execution time exceeded ({}s)", limit.as_secs_f64()),
        )
    }
}

/// Raw output for a single test case, consumed by the evaluator.
#[derive(Debug, Clone)]
pub struct TestExecutionOutput {
    pub index: usize,
    pub result: Result<Json, Fault>,
    pub stdout: String,
    pub elapsed_ms: u64,
}

/// One test case to run.
#[derive(Debug, Clone, Copy)]
pub struct TestRun<'a> {
    pub index: usize,
    pub source: &'a Arc<str>,
    pub entry_point: &'a str,
    pub test_case: &'a TestCase,
    pub limits: &'a Limits,
}

/// Executes submissions in the embedded interpreter.
#[derive(Debug, Clone)]
pub struct ScriptEngine {
    config: Arc<EngineConfig>,
    governor: Arc<dyn ResourceGovernor>,
}

impl ScriptEngine {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        let governor = governor_for(config.memory_backend);
        Self::with_governor(config, governor)
    }

    pub fn with_governor(config: Arc<EngineConfig>, governor: Arc<dyn ResourceGovernor>) -> Self {
        if governor.capability() == MemoryCapability::Degraded {
            warn!(governor = governor.name(), "Memory limits are not enforced by this governor");
        }
        Self { config, governor }
    }

    pub fn memory_capability(&self) -> MemoryCapability {
        self.governor.capability()
    }

    /// Run one test case to completion, timeout or fault. Never fails.
    #[instrument(skip_all, fields(test_index = run.index))]
    pub async fn execute(&self, run: TestRun<'_>) -> TestExecutionOutput {
        let start = Instant::now();
        let deadline = run.limits.time_limit();
        let interrupt = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();

        let job = WorkerJob {
            source: Arc::clone(run.source),
            entry_point: run.entry_point.to_string(),
            input: run.test_case.input.clone(),
            call: run.test_case.call,
            config: Arc::clone(&self.config),
            governor: Arc::clone(&self.governor),
            limits: *run.limits,
            interrupt: Arc::clone(&interrupt),
        };

        let spawned = std::thread::Builder::new()
            .name(format!("arbiter-test-{}", run.index))
            .stack_size(WORKER_STACK_BYTES)
            .spawn(move || {
                // the receiver is gone once the deadline passed
                let _ = tx.send(job.run());
            });

        let (result, stdout) = match spawned {
            Err(e) => {
                warn!(error = %e, "Failed to start worker thread");
                (
                    Err(Fault::new(FailureReason::RuntimeFault, format!("Execution error: {}", e))),
                    String::new(),
                )
            }
            Ok(_handle) => match tokio::time::timeout(deadline, rx).await {
                Ok(Ok(finished)) => finished,
                Ok(Err(_)) => {
                    warn!("Worker thread ended without reporting");
                    (
                        Err(Fault::new(FailureReason::RuntimeFault, "Execution error: worker thread panicked")),
                        String::new(),
                    )
                }
                Err(_) => {
                    interrupt.store(true, Ordering::Relaxed);
                    (Err(Fault::timeout(deadline)), String::new())
                }
            },
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(elapsed_ms, "Test case returned"),
            Err(fault) => debug!(elapsed_ms, reason = %fault.reason, "Test case failed"),
        }

        TestExecutionOutput {
            index: run.index,
            result,
            stdout,
            elapsed_ms,
        }
    }
}

/// Everything the worker thread owns.
struct WorkerJob {
    source: Arc<str>,
    entry_point: String,
    input: Json,
    call: CallConvention,
    config: Arc<EngineConfig>,
    governor: Arc<dyn ResourceGovernor>,
    limits: Limits,
    interrupt: Arc<AtomicBool>,
}

impl WorkerJob {
    fn run(self) -> (Result<Json, Fault>, String) {
        let _scope = self.governor.install(self.limits.memory_limit_bytes());
        // declared after `_scope` so it drops while the meter is still installed
        let _arena = Arena::open();

        let module = match parse_module(&self.source) {
            Ok(module) => module,
            Err(e) => return (Err(Fault::from_script(&e, &self.limits)), String::new()),
        };

        let options = InterpreterOptions {
            max_recursion_depth: self.limits.max_recursion_depth,
            max_output_bytes: self.limits.max_output_bytes,
            interrupt: Some(self.interrupt.clone()),
        };
        let mut interp = Interpreter::new(&self.config.sandbox, options);

        let outcome = self.call_entry_point(&mut interp, &module);
        let stdout = interp.take_output();
        drop(interp);
        (outcome, stdout)
    }

    fn call_entry_point(&self, interp: &mut Interpreter, module: &Module) -> Result<Json, Fault> {
        let fault = |e: ScriptError| Fault::from_script(&e, &self.limits);

        interp.run_module(module).map_err(fault)?;
        let function = interp.global(&self.entry_point).ok_or_else(|| {
            Fault::new(
                FailureReason::RuntimeFault,
                format!("Function '{}' not found", self.entry_point),
            )
        })?;
        let args = call_arguments(&self.input, self.call)?;
        let returned = interp.call_value(&function, args, None).map_err(fault)?;
        returned.to_json().map_err(fault)
    }
}

/// Shape a test input into positional arguments.
pub fn call_arguments(input: &Json, call: CallConvention) -> Result<Vec<Value>, Fault> {
    match (call, input) {
        (CallConvention::Single, single) => Ok(vec![Value::from_json(single)]),
        (CallConvention::Spread, Json::Array(items)) => Ok(items.iter().map(Value::from_json).collect()),
        (CallConvention::Spread, other) => Err(Fault::new(
            FailureReason::RuntimeFault,
            format!("Execution error: spread input must be an array, got {}", other),
        )),
        (CallConvention::Auto, Json::Array(items)) if items.len() == 1 => Ok(vec![Value::from_json(&items[0])]),
        (CallConvention::Auto, Json::Array(items)) if items.len() > 1 => Ok(items.iter().map(Value::from_json).collect()),
        (CallConvention::Auto, single) => Ok(vec![Value::from_json(single)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shapes(input: Json, call: CallConvention) -> Vec<String> {
        call_arguments(&input, call)
            .unwrap()
            .iter()
            .map(Value::repr)
            .collect()
    }

    #[test]
    fn auto_convention_follows_input_shape() {
        assert_eq!(shapes(json!([[1, 2, 3]]), CallConvention::Auto), vec!["[1, 2, 3]"]);
        assert_eq!(shapes(json!([1, "a"]), CallConvention::Auto), vec!["1", "'a'"]);
        assert_eq!(shapes(json!(7), CallConvention::Auto), vec!["7"]);
        assert_eq!(shapes(json!([]), CallConvention::Auto), vec!["[]"]);
    }

    #[test]
    fn tagged_conventions() {
        assert_eq!(shapes(json!([5]), CallConvention::Single), vec!["[5]"]);
        assert_eq!(shapes(json!([5]), CallConvention::Spread), vec!["5"]);
        assert!(shapes(json!([]), CallConvention::Spread).is_empty());
        let err = call_arguments(&json!(5), CallConvention::Spread).unwrap_err();
        assert_eq!(err.reason, FailureReason::RuntimeFault);
    }

    #[test]
    fn script_errors_map_to_failure_reasons() {
        let limits = Limits::default();
        let reason = |kind| Fault::from_script(&ScriptError::new(kind, "x"), &limits).reason;
        assert_eq!(reason(ErrorKind::Interrupted), FailureReason::Timeout);
        assert_eq!(reason(ErrorKind::MemoryError), FailureReason::ResourceLimit);
        assert_eq!(reason(ErrorKind::RecursionError), FailureReason::RecursionFault);
        assert_eq!(reason(ErrorKind::KeyError), FailureReason::RuntimeFault);
        let message = Fault::from_script(&ScriptError::value_error("bad").at(2), &limits).message;
        assert_eq!(message, "Execution error: ValueError: bad (line 2)");
    }
}
