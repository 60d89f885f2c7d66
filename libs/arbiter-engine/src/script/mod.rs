//! The embedded scripting language: a Python 3 subset run by a tree-walking
//! interpreter. It has no file, network, process or import primitives; the
//! only capabilities are the allowlisted builtins.

pub mod arena;
pub mod ast;
pub mod builtins;
pub mod error;
pub mod format;
pub mod heap;
pub mod interp;
pub mod lexer;
pub mod ops;
pub mod parser;
pub mod value;

pub use error::{ErrorKind, ScriptError, ScriptResult};
pub use interp::{Interpreter, InterpreterOptions};
pub use parser::parse_module;
pub use value::Value;
