//! Arbiter grading engine: validates, runs and scores candidate code against
//! test cases inside an embedded interpreter.

pub mod analyzer;
pub mod comparator;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod governor;
pub mod script;
pub mod sort;
pub mod validator;

#[cfg(test)]
mod engine_tests;

pub use engine::{Fault, ScriptEngine, TestExecutionOutput, TestRun};
pub use executor::{GradedReport, GradedSubmission, Grader};
pub use governor::{MemoryCapability, ResourceGovernor};
pub use validator::{PolicyError, Rejection, SafetyValidator};
