use std::fmt;

use thiserror::Error;

/// Exception classes known to the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Exception,
    SyntaxError,
    NameError,
    TypeError,
    ValueError,
    AttributeError,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    IndexError,
    KeyError,
    AssertionError,
    ImportError,
    RuntimeError,
    RecursionError,
    MemoryError,
    /// Raised when the engine's deadline flag is observed. Not visible to scripts.
    Interrupted,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Exception => "Exception",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::NameError => "NameError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::ArithmeticError => "ArithmeticError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::OverflowError => "OverflowError",
            ErrorKind::LookupError => "LookupError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::AssertionError => "AssertionError",
            ErrorKind::ImportError => "ImportError",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::RecursionError => "RecursionError",
            ErrorKind::MemoryError => "MemoryError",
            ErrorKind::Interrupted => "Interrupted",
        }
    }

    /// Look up a script-visible exception class by name.
    pub fn from_name(name: &str) -> Option<ErrorKind> {
        let kind = match name {
            "Exception" => ErrorKind::Exception,
            "SyntaxError" => ErrorKind::SyntaxError,
            "NameError" => ErrorKind::NameError,
            "TypeError" => ErrorKind::TypeError,
            "ValueError" => ErrorKind::ValueError,
            "AttributeError" => ErrorKind::AttributeError,
            "ArithmeticError" => ErrorKind::ArithmeticError,
            "ZeroDivisionError" => ErrorKind::ZeroDivisionError,
            "OverflowError" => ErrorKind::OverflowError,
            "LookupError" => ErrorKind::LookupError,
            "IndexError" => ErrorKind::IndexError,
            "KeyError" => ErrorKind::KeyError,
            "AssertionError" => ErrorKind::AssertionError,
            "ImportError" => ErrorKind::ImportError,
            "RuntimeError" => ErrorKind::RuntimeError,
            "RecursionError" => ErrorKind::RecursionError,
            "MemoryError" => ErrorKind::MemoryError,
            _ => return None,
        };
        Some(kind)
    }

    fn parent(self) -> Option<ErrorKind> {
        match self {
            ErrorKind::Exception | ErrorKind::Interrupted => None,
            ErrorKind::ZeroDivisionError | ErrorKind::OverflowError => Some(ErrorKind::ArithmeticError),
            ErrorKind::IndexError | ErrorKind::KeyError => Some(ErrorKind::LookupError),
            ErrorKind::RecursionError => Some(ErrorKind::RuntimeError),
            _ => Some(ErrorKind::Exception),
        }
    }

    pub fn is_subclass_of(self, other: ErrorKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    /// Resource faults end the run; `except` clauses never see them.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::RecursionError | ErrorKind::MemoryError | ErrorKind::Interrupted)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}{}", headline(.kind, .message), line_suffix(.line))]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
    pub line: Option<usize>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self {
            kind: ErrorKind::SyntaxError,
            message: message.into(),
            line: Some(line),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IndexError, message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::KeyError, message)
    }

    pub fn overflow() -> Self {
        Self::new(ErrorKind::OverflowError, "integer result out of range")
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ZeroDivisionError, message)
    }

    pub fn recursion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RecursionError, message)
    }

    pub fn memory() -> Self {
        Self::new(ErrorKind::MemoryError, "memory limit exceeded")
    }

    /// Attach a line number unless an inner frame already did.
    pub fn at(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }
}

fn headline(kind: &ErrorKind, message: &str) -> String {
    if message.is_empty() {
        kind.to_string()
    } else {
        format!("{}: {}", kind, message)
    }
}

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|line| format!(" (line {})", line)).unwrap_or_default()
}

pub type ScriptResult<T> = Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_matches_handlers() {
        assert!(ErrorKind::ZeroDivisionError.is_subclass_of(ErrorKind::ArithmeticError));
        assert!(ErrorKind::KeyError.is_subclass_of(ErrorKind::LookupError));
        assert!(ErrorKind::KeyError.is_subclass_of(ErrorKind::Exception));
        assert!(!ErrorKind::KeyError.is_subclass_of(ErrorKind::IndexError));
        assert!(!ErrorKind::Interrupted.is_subclass_of(ErrorKind::Exception));
    }

    #[test]
    fn display_includes_line() {
        let err = ScriptError::value_error("bad").at(3).at(7);
        assert_eq!(err.to_string(), "ValueError: bad (line 3)");
    }
}
