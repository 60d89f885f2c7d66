//! Static Analyzer
//!
//! Derives a [`CodeQualityReport`] from source text alone. Nothing is executed.
//! Cyclomatic complexity is a decision-point count over the parse tree: one per
//! `if`/`elif`, loop and `except` clause, plus `operands - 1` for every
//! `and`/`or` chain.

use std::collections::VecDeque;

use arbiter_common::types::{CodeQualityReport, Language};
use tracing::debug;

use crate::script::ast::{Arg, Block, Expr, FPart, Module, Stmt, StmtKind};
use crate::script::parse_module;

const BASELINE_SCORE: i32 = 70;
const MAX_LINE_CHARS: usize = 100;
const HIGH_COMPLEXITY: u32 = 10;
const MODERATE_COMPLEXITY: u32 = 5;
const MIN_FUNCTION_NAME_CHARS: usize = 3;
const MIN_COMMENT_RATIO: f64 = 0.1;
const COMMENT_CHECK_MIN_LINES: usize = 10;

pub fn analyze(language: Language, source: &str) -> CodeQualityReport {
    match language {
        Language::Python => analyze_python(source),
        Language::JavaScript => CodeQualityReport::default(),
    }
}

pub fn analyze_python(source: &str) -> CodeQualityReport {
    let lines: Vec<&str> = source.split('\n').collect();
    let comment_lines = lines.iter().filter(|l| l.trim().starts_with('#')).count();
    let lines_of_code = lines
        .iter()
        .filter(|l| !l.trim().is_empty() && !l.trim().starts_with('#'))
        .count();

    let mut report = CodeQualityReport {
        lines_of_code,
        total_lines: lines.len(),
        comment_lines,
        cyclomatic_complexity: 1,
        quality_score: BASELINE_SCORE as u32,
        readability_score: BASELINE_SCORE as u32,
        ..CodeQualityReport::default()
    };

    let module = match parse_module(source) {
        Ok(module) => module,
        Err(e) => {
            debug!(error = %e, "Analysis fell back to the minimal report");
            return report;
        }
    };
    report.cyclomatic_complexity = cyclomatic_complexity(&module);

    if lines_of_code == 0 {
        report.code_smells.push("Empty code".to_string());
        report.quality_score = 0;
        return report;
    }

    let mut quality = BASELINE_SCORE;
    let mut readability = BASELINE_SCORE;

    let ratio = comment_lines as f64 / lines.len() as f64;
    if ratio < MIN_COMMENT_RATIO && lines.len() > COMMENT_CHECK_MIN_LINES {
        report.suggestions.push("Add comments to improve readability".to_string());
        readability -= 10;
    }

    let long_lines = lines.iter().filter(|l| l.chars().count() > MAX_LINE_CHARS).count();
    if long_lines > 0 {
        report.code_smells.push(format!("Lines too long: {}", long_lines));
        readability -= 5;
    }

    if report.cyclomatic_complexity > HIGH_COMPLEXITY {
        report.code_smells.push("High cyclomatic complexity".to_string());
        report.suggestions.push("Split the function into smaller pieces".to_string());
        quality -= 15;
    } else if report.cyclomatic_complexity > MODERATE_COMPLEXITY {
        quality -= 5;
    }

    if first_function_name(&module).is_some_and(|name| name.chars().count() < MIN_FUNCTION_NAME_CHARS) {
        report.suggestions.push("Use more descriptive function names".to_string());
        readability -= 5;
    }

    report.quality_score = quality.clamp(0, 100) as u32;
    report.readability_score = readability.clamp(0, 100) as u32;
    report
}

pub fn cyclomatic_complexity(module: &Module) -> u32 {
    1 + block_points(&module.body)
}

/// Name of the first `def` in breadth-first order.
fn first_function_name(module: &Module) -> Option<&str> {
    let mut queue: VecDeque<&Stmt> = module.body.iter().collect();
    while let Some(stmt) = queue.pop_front() {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => return Some(def.name.as_str()),
            StmtKind::If { body, orelse, .. }
            | StmtKind::While { body, orelse, .. }
            | StmtKind::For { body, orelse, .. } => {
                queue.extend(body.iter().chain(orelse));
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                queue.extend(body.iter());
                queue.extend(handlers.iter().flat_map(|h| h.body.iter()));
                queue.extend(orelse.iter().chain(finalbody));
            }
            _ => {}
        }
    }
    None
}

fn block_points(block: &Block) -> u32 {
    block.iter().map(stmt_points).sum()
}

fn stmt_points(stmt: &Stmt) -> u32 {
    match &stmt.kind {
        StmtKind::FunctionDef(def) => {
            let defaults: u32 = def.params.iter().filter_map(|p| p.default.as_ref()).map(expr_points).sum();
            defaults + block_points(&def.body)
        }
        StmtKind::Return(value) | StmtKind::Raise(value) => value.as_ref().map_or(0, expr_points),
        StmtKind::Assign { targets, value } => targets.iter().map(expr_points).sum::<u32>() + expr_points(value),
        StmtKind::AugAssign { target, value, .. } => expr_points(target) + expr_points(value),
        StmtKind::Expr(expr) => expr_points(expr),
        StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
            1 + expr_points(test) + block_points(body) + block_points(orelse)
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => 1 + expr_points(target) + expr_points(iter) + block_points(body) + block_points(orelse),
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            let handler_points: u32 = handlers
                .iter()
                .map(|h| 1 + h.kind.as_ref().map_or(0, expr_points) + block_points(&h.body))
                .sum();
            block_points(body) + handler_points + block_points(orelse) + block_points(finalbody)
        }
        StmtKind::Assert { test, msg } => expr_points(test) + msg.as_ref().map_or(0, expr_points),
        StmtKind::Delete(targets) => targets.iter().map(expr_points).sum(),
        StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Import(_)
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Pass => 0,
    }
}

fn exprs_points(exprs: &[Expr]) -> u32 {
    exprs.iter().map(expr_points).sum()
}

fn boxed_points(expr: &Option<Box<Expr>>) -> u32 {
    expr.as_deref().map_or(0, expr_points)
}

fn expr_points(expr: &Expr) -> u32 {
    match expr {
        Expr::Const(_) | Expr::Name(_) => 0,
        Expr::FString(parts) => parts
            .iter()
            .map(|part| match part {
                FPart::Value { expr, .. } => expr_points(expr),
                FPart::Literal(_) => 0,
            })
            .sum(),
        Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => exprs_points(items),
        Expr::Dict(entries) => entries
            .iter()
            .map(|(k, v)| k.as_ref().map_or(0, expr_points) + expr_points(v))
            .sum(),
        Expr::BinOp { left, right, .. } => expr_points(left) + expr_points(right),
        Expr::Unary { operand, .. } => expr_points(operand),
        Expr::BoolOp { values, .. } => values.len().saturating_sub(1) as u32 + exprs_points(values),
        Expr::Compare { left, comparators, .. } => expr_points(left) + exprs_points(comparators),
        Expr::Call { func, args } => {
            expr_points(func)
                + args
                    .iter()
                    .map(|arg| match arg {
                        Arg::Positional(e) | Arg::Star(e) | Arg::Keyword(_, e) | Arg::DoubleStar(e) => {
                            expr_points(e)
                        }
                    })
                    .sum::<u32>()
        }
        Expr::Attribute { value, .. } => expr_points(value),
        Expr::Subscript { value, index } => expr_points(value) + expr_points(index),
        Expr::Slice { lower, upper, step } => boxed_points(lower) + boxed_points(upper) + boxed_points(step),
        Expr::IfExp { test, body, orelse } => expr_points(test) + expr_points(body) + expr_points(orelse),
        Expr::Lambda(def) => {
            let defaults: u32 = def.params.iter().filter_map(|p| p.default.as_ref()).map(expr_points).sum();
            defaults + block_points(&def.body)
        }
        Expr::Comp {
            elt,
            value,
            generators,
            ..
        } => {
            expr_points(elt)
                + boxed_points(value)
                + generators
                    .iter()
                    .map(|g| expr_points(&g.target) + expr_points(&g.iter) + exprs_points(&g.ifs))
                    .sum::<u32>()
        }
        Expr::Starred(inner) => expr_points(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complexity(source: &str) -> u32 {
        analyze_python(source).cyclomatic_complexity
    }

    #[test]
    fn straight_line_code_is_one() {
        assert_eq!(complexity("def f(x):\n    return x + 1\n"), 1);
    }

    #[test]
    fn each_branch_adds_one() {
        let one_if = "def f(x):\n    if x:\n        return 1\n    return 0\n";
        let two_ifs = "def f(x, y):\n    if x:\n        return 1\n    if y:\n        return 2\n    return 0\n";
        let looped = "def f(xs, y):\n    for x in xs:\n        if x:\n            return 1\n        if y:\n            return 2\n    return 0\n";
        assert_eq!(complexity(one_if), 2);
        assert_eq!(complexity(two_ifs), 3);
        assert_eq!(complexity(looped), 4);
    }

    #[test]
    fn elif_handlers_and_bool_chains() {
        let source = "\
def f(a, b, c):
    if a and b and c:
        return 1
    elif a or b:
        return 2
    try:
        while a:
            a -= 1
    except ValueError:
        pass
    except KeyError:
        pass
    return [x for x in range(3) if x and a]
";
        // if + elif + while + 2 handlers + (3-1) + (2-1) + (2-1)
        assert_eq!(complexity(source), 1 + 5 + 2 + 1 + 1);
    }

    #[test]
    fn empty_code() {
        let report = analyze_python("# just a comment\n\n");
        assert_eq!(report.lines_of_code, 0);
        assert_eq!(report.comment_lines, 1);
        assert_eq!(report.total_lines, 3);
        assert_eq!(report.quality_score, 0);
        assert_eq!(report.code_smells, vec!["Empty code"]);
    }

    #[test]
    fn penalties_and_suggestions() {
        let mut source = String::from("def f(xs):\n    total = 0\n");
        for i in 0..11 {
            source.push_str(&format!("    if xs[{}]:\n        total += {}\n", i, i));
        }
        source.push_str(&format!("    return total  {}\n", " ".repeat(100)));
        let report = analyze_python(&source);
        assert_eq!(report.cyclomatic_complexity, 12);
        assert_eq!(report.quality_score, 55);
        assert_eq!(report.readability_score, 50);
        assert_eq!(
            report.code_smells,
            vec!["Lines too long: 1", "High cyclomatic complexity"]
        );
        assert_eq!(
            report.suggestions,
            vec![
                "Add comments to improve readability",
                "Split the function into smaller pieces",
                "Use more descriptive function names",
            ]
        );
    }

    #[test]
    fn moderate_complexity_penalty() {
        let mut source = String::from("def solve(x):\n");
        for i in 0..5 {
            source.push_str(&format!("    if x == {}:\n        return {}\n", i, i));
        }
        source.push_str("    return -1\n");
        let report = analyze_python(&source);
        assert_eq!(report.cyclomatic_complexity, 6);
        assert_eq!(report.quality_score, 65);
    }

    #[test]
    fn parse_failure_gives_minimal_report() {
        let report = analyze_python("def f(:\n    return\n");
        assert_eq!(report.cyclomatic_complexity, 1);
        assert!(report.code_smells.is_empty());
        assert!(report.suggestions.is_empty());
        assert_eq!(report.quality_score, 70);
        assert_eq!(report.lines_of_code, 2);
    }

    #[test]
    fn javascript_gets_an_empty_report() {
        assert_eq!(analyze(Language::JavaScript, "function f() {}"), CodeQualityReport::default());
    }
}
