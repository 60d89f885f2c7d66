//! Safety Validator
//!
//! A coarse pre-filter run before any candidate code executes:
//! 1. size guard
//! 2. denied identifiers, whole words, first hit in table order
//! 3. dangerous patterns (regular expressions)
//! 4. the source must parse
//!
//! This is pattern matching on text, not a capability sandbox. Containment comes
//! from the interpreter, which has no host primitives to reach.

use arbiter_common::config::SandboxPolicy;
use arbiter_common::types::{Language, ValidationVerdict};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::script::ast::Module;
use crate::script::{parse_module, ScriptError};

/// Why a submission was refused.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("Source is {size} bytes; the limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },
    #[error("Use of '{0}' is not allowed")]
    DeniedIdentifier(String),
    #[error("Potentially dangerous code detected: {description} ({pattern})")]
    DangerousPattern { pattern: String, description: String },
    #[error("Syntax error: {0}")]
    Syntax(ScriptError),
}

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("invalid denied pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
struct Rule {
    regex: Regex,
    text: String,
    description: String,
}

/// Validator built once from the immutable sandbox policy.
#[derive(Debug, Clone)]
pub struct SafetyValidator {
    identifiers: Vec<Rule>,
    patterns: Vec<Rule>,
    max_source_bytes: usize,
}

impl SafetyValidator {
    pub fn new(policy: &SandboxPolicy, max_source_bytes: usize) -> Result<Self, PolicyError> {
        let compile = |pattern: String, text: &str, description: &str| {
            Regex::new(&pattern)
                .map(|regex| Rule {
                    regex,
                    text: text.to_string(),
                    description: description.to_string(),
                })
                .map_err(|source| PolicyError::Pattern { pattern, source })
        };

        let identifiers = policy
            .denied_identifiers
            .iter()
            .map(|ident| compile(format!(r"\b{}\b", regex::escape(ident)), ident.as_str(), ident.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        let patterns = policy
            .denied_patterns
            .iter()
            .map(|p| compile(p.pattern.clone(), p.pattern.as_str(), p.description.as_str()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            identifiers,
            patterns,
            max_source_bytes,
        })
    }

    /// Check Python source and hand back its tree.
    pub fn validate(&self, source: &str) -> Result<Module, Rejection> {
        if source.len() > self.max_source_bytes {
            return Err(Rejection::TooLarge {
                size: source.len(),
                limit: self.max_source_bytes,
            });
        }

        if let Some(rule) = self.identifiers.iter().find(|r| r.regex.is_match(source)) {
            debug!(identifier = %rule.text, "Denied identifier");
            return Err(Rejection::DeniedIdentifier(rule.text.clone()));
        }

        if let Some(rule) = self.patterns.iter().find(|r| r.regex.is_match(source)) {
            debug!(pattern = %rule.text, "Dangerous pattern");
            return Err(Rejection::DangerousPattern {
                pattern: rule.text.clone(),
                description: rule.description.clone(),
            });
        }

        parse_module(source).map_err(Rejection::Syntax)
    }

    /// The standalone `{valid, message}` contract.
    pub fn verdict(&self, language: Language, source: &str) -> ValidationVerdict {
        match language {
            Language::Python => match self.validate(source) {
                Ok(_) => ValidationVerdict::accepted(),
                Err(rejection) => ValidationVerdict::refused(rejection.to_string()),
            },
            // no checks are defined for the stubbed language
            Language::JavaScript => ValidationVerdict::accepted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_common::config::DeniedPattern;

    fn validator() -> SafetyValidator {
        SafetyValidator::new(&SandboxPolicy::default(), 1024).unwrap()
    }

    #[test]
    fn accepts_plain_function() {
        let module = validator()
            .validate("def total(xs):\n    return sum(xs)\n")
            .unwrap();
        assert_eq!(module.first_function().unwrap().name, "total");
    }

    #[test]
    fn denied_identifier_is_whole_word() {
        let err = validator()
            .validate("import subprocess\nsubprocess.run(['ls'])\n")
            .unwrap_err();
        assert_eq!(err, Rejection::DeniedIdentifier("subprocess".into()));
        assert_eq!(err.to_string(), "Use of 'subprocess' is not allowed");

        // substrings of longer words are fine
        assert!(validator().validate("def costs(posx):\n    return posx\n").is_ok());
    }

    #[test]
    fn first_identifier_in_table_order_wins() {
        let err = validator().validate("open(x)\nos.remove(x)\n").unwrap_err();
        assert_eq!(err, Rejection::DeniedIdentifier("os".into()));
    }

    #[test]
    fn dangerous_patterns() {
        let err = validator().validate("x = ().__class__\n").unwrap_err();
        assert!(matches!(err, Rejection::DangerousPattern { ref description, .. } if description == "dunder access"));
        assert!(validator().validate("print(globals ())\n").is_err());
    }

    #[test]
    fn split_dunder_names_are_caught() {
        let err = validator()
            .validate("name = \"__\" \"class__\"\nattr = '__' + 'dict__'\n")
            .unwrap_err();
        assert_eq!(
            err,
            Rejection::DangerousPattern {
                pattern: "__.*__".into(),
                description: "dunder access".into(),
            }
        );
        assert!(validator().validate("def f(x):\n    return '__' + x\n").is_ok());
    }

    #[test]
    fn syntax_errors_are_rejections() {
        let err = validator().validate("def broken(:\n    pass\n").unwrap_err();
        assert!(matches!(err, Rejection::Syntax(_)));
        assert!(err.to_string().starts_with("Syntax error:"));
    }

    #[test]
    fn oversized_source() {
        let source = format!("x = '{}'\n", "a".repeat(2048));
        assert!(matches!(validator().validate(&source), Err(Rejection::TooLarge { .. })));
    }

    #[test]
    fn invalid_policy_pattern() {
        let mut policy = SandboxPolicy::default();
        policy.denied_patterns.push(DeniedPattern {
            pattern: "(".into(),
            description: "broken".into(),
        });
        assert!(SafetyValidator::new(&policy, 1024).is_err());
    }

    #[test]
    fn verdict_for_both_languages() {
        let v = validator();
        assert!(!v.verdict(Language::Python, "exec('1')").valid);
        assert!(v.verdict(Language::JavaScript, "require('fs')").valid);
        assert_eq!(v.verdict(Language::Python, "def f():\n    return 1\n").message, "Code is valid");
    }
}
