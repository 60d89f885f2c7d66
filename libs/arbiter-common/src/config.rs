// Engine configuration for Arbiter
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::types::Language;

pub const DEFAULT_CONFIG_PATH: &str = "config/engine.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: Language,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A raw-text pattern the validator refuses, with the text shown to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeniedPattern {
    pub pattern: String,
    pub description: String,
}

/// What candidate code may reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxPolicy {
    /// Matched as whole words against the raw source, in order.
    pub denied_identifiers: Vec<String>,
    /// Regular expressions matched against the raw source, in order.
    pub denied_patterns: Vec<DeniedPattern>,
    /// The only global names candidate code can resolve besides its own.
    pub allowed_builtins: Vec<String>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        let denied_identifiers = [
            "os", "sys", "subprocess", "eval", "exec", "__import__", "open", "file", "input",
            "compile", "execfile", "reload",
        ];
        let denied_patterns = [
            (r"__.*__", "dunder access"),
            (r"eval\s*\(", "eval call"),
            (r"exec\s*\(", "exec call"),
            (r"compile\s*\(", "compile call"),
            (r"globals\s*\(", "globals call"),
            (r"locals\s*\(", "locals call"),
            (r"vars\s*\(", "vars call"),
        ];
        let allowed_builtins = [
            "range", "len", "str", "int", "float", "list", "dict", "set", "tuple", "bool", "abs",
            "max", "min", "sum", "sorted", "enumerate", "zip", "map", "filter", "print", "reversed",
            "any", "all", "round", "Exception", "ValueError", "TypeError", "KeyError", "IndexError",
            "ZeroDivisionError", "RuntimeError", "ArithmeticError", "LookupError", "AssertionError",
        ];

        Self {
            denied_identifiers: denied_identifiers.iter().map(|s| s.to_string()).collect(),
            denied_patterns: denied_patterns
                .iter()
                .map(|(pattern, description)| DeniedPattern {
                    pattern: pattern.to_string(),
                    description: description.to_string(),
                })
                .collect(),
            allowed_builtins: allowed_builtins.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SandboxPolicy {
    pub fn allows_builtin(&self, name: &str) -> bool {
        self.allowed_builtins.iter().any(|b| b == name)
    }
}

/// Per-test resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub time_limit_seconds: f64,
    pub memory_limit_mb: u64,
    pub max_recursion_depth: usize,
    pub max_output_bytes: usize,
    pub max_source_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            time_limit_seconds: 5.0,
            memory_limit_mb: 128,
            max_recursion_depth: 1000,
            max_output_bytes: 64 * 1024,
            max_source_bytes: 1024 * 1024,
        }
    }
}

impl Limits {
    /// Wall-clock budget per test. Invalid values fall back to the default.
    pub fn time_limit(&self) -> Duration {
        Duration::try_from_secs_f64(self.time_limit_seconds)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs(5))
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb.saturating_mul(1024 * 1024)
    }

    pub fn with_time_limit_seconds(mut self, seconds: f64) -> Self {
        self.time_limit_seconds = seconds;
        self
    }

    pub fn with_memory_limit_mb(mut self, megabytes: u64) -> Self {
        self.memory_limit_mb = megabytes;
        self
    }
}

/// Which memory governor backs the memory limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackend {
    /// Account live interpreter allocations against the limit.
    #[default]
    HeapMeter,
    /// No enforcement. Results report `memoryLimitEnforced: false`.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_languages")]
    pub languages: Vec<LanguageConfig>,
    #[serde(default)]
    pub sandbox: SandboxPolicy,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub memory_backend: MemoryBackend,
}

fn default_languages() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig {
            name: Language::Python,
            enabled: true,
            note: None,
        },
        LanguageConfig {
            name: Language::JavaScript,
            enabled: false,
            note: Some("execution not implemented".to_string()),
        },
    ]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            sandbox: SandboxPolicy::default(),
            limits: Limits::default(),
            memory_backend: MemoryBackend::default(),
        }
    }
}

impl EngineConfig {
    /// Load engine configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Engine config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: EngineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load with default path (config/engine.json)
    pub fn load_default() -> Result<Self> {
        Self::load(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Load from an explicit path, or the default path when it exists, or built-in defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load_default(),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if !limits.time_limit_seconds.is_finite() || limits.time_limit_seconds <= 0.0 {
            bail!("limits.time_limit_seconds must be a positive number");
        }
        if limits.memory_limit_mb == 0 {
            bail!("limits.memory_limit_mb must be positive");
        }
        if limits.max_recursion_depth == 0 {
            bail!("limits.max_recursion_depth must be positive");
        }
        if limits.max_source_bytes == 0 {
            bail!("limits.max_source_bytes must be positive");
        }
        if let Some(empty) = self.sandbox.denied_identifiers.iter().find(|s| s.trim().is_empty()) {
            bail!("sandbox.denied_identifiers contains an empty entry: {:?}", empty);
        }
        Ok(())
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: Language) -> Result<&LanguageConfig> {
        self.languages
            .iter()
            .find(|l| l.name == language)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", language))
    }

    pub fn is_enabled(&self, language: Language) -> bool {
        self.get_config(language).map(|c| c.enabled).unwrap_or(false)
    }

    /// List all configured languages
    pub fn list_languages(&self) -> Vec<String> {
        self.languages.iter().map(|l| l.name.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config() {
        // Only meaningful when run from the workspace root
        match EngineConfig::load_default() {
            Ok(config) => {
                assert!(config.is_enabled(Language::Python));
            }
            Err(e) => {
                println!("Config not found (expected in test environment): {}", e);
            }
        }
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("arbiter-config-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, r#"{{ "limits": {{ "time_limit_seconds": 2.5 }}, "memory_backend": "none" }}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.limits.time_limit(), Duration::from_millis(2500));
        assert_eq!(config.limits.memory_limit_mb, 128);
        assert_eq!(config.memory_backend, MemoryBackend::None);
        assert!(config.sandbox.allows_builtin("sorted"));
        assert!(!config.sandbox.allows_builtin("open"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = EngineConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn rejects_non_positive_time_limit() {
        let mut config = EngineConfig::default();
        config.limits.time_limit_seconds = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn javascript_is_disabled_by_default() {
        let config = EngineConfig::default();
        assert!(!config.is_enabled(Language::JavaScript));
        assert_eq!(config.list_languages(), vec!["python", "javascript"]);
    }
}
