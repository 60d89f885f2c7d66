//! Tree-walking evaluator.
//!
//! The interpreter owns no host capabilities: names resolve through local,
//! enclosing and global scopes and finally the builtin table built from the
//! sandbox allowlist. Every statement, loop iteration and call passes through
//! [`Interpreter::tick`], which turns the engine's interrupt flag and the heap
//! meter's latch into fatal errors.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::mem::size_of;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arbiter_common::config::SandboxPolicy;

use super::ast::{
    Arg, BinOp, BoolOpKind, CompKind, Comprehension, Const, Expr, FPart, FunctionDef, Handler, Module, Stmt,
    StmtKind,
};
use super::builtins::{self, Builtin};
use super::error::{ErrorKind, ScriptError, ScriptResult};
use super::format::format_value;
use super::heap;
use super::ops::{self, SliceSpec};
use super::value::{BoundMethod, Closure, DictObj, ExceptionObj, ListObj, RangeObj, SetObj, Value};

/// A namespace. Function calls and comprehensions get a child of the scope
/// they were defined in; the chain always ends at the module globals.
#[derive(Default)]
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
    global_names: RefCell<HashSet<String>>,
    nonlocal_names: RefCell<HashSet<String>>,
}

impl Scope {
    fn child(parent: &Rc<Scope>) -> Self {
        Self {
            parent: Some(parent.clone()),
            ..Self::default()
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        let previous = self.vars.borrow_mut().insert(name.to_string(), value);
        drop(previous);
    }

    fn remove(&self, name: &str) -> Option<Value> {
        self.vars.borrow_mut().remove(name)
    }

    fn has(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    fn clear(&self) {
        let vars = std::mem::take(&mut *self.vars.borrow_mut());
        drop(vars);
    }
}

#[derive(Debug, Clone)]
pub struct InterpreterOptions {
    pub max_recursion_depth: usize,
    pub max_output_bytes: usize,
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            max_recursion_depth: 1000,
            max_output_bytes: 64 * 1024,
            interrupt: None,
        }
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Iteration over a value. Ranges are lazy and lists are read live by index;
/// everything else iterates over a snapshot.
pub(crate) enum Iter {
    Range { range: RangeObj, next: usize, len: usize },
    List { list: Rc<RefCell<ListObj>>, next: usize },
    Items(std::vec::IntoIter<Value>),
}

impl Iter {
    pub(crate) fn new(value: &Value) -> ScriptResult<Self> {
        Ok(match value {
            Value::Range(range) => Iter::Range {
                range: *range,
                next: 0,
                len: range.len(),
            },
            Value::List(list) => Iter::List {
                list: list.clone(),
                next: 0,
            },
            other => Iter::Items(other.to_items()?.into_iter()),
        })
    }
}

impl Iterator for Iter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            Iter::Range { range, next, len } => {
                if *next >= *len {
                    return None;
                }
                let value = range.get(*next);
                *next += 1;
                Some(Value::Int(value))
            }
            Iter::List { list, next } => {
                let item = list.borrow().items().get(*next).cloned();
                *next += 1;
                item
            }
            Iter::Items(items) => items.next(),
        }
    }
}

pub struct Interpreter {
    globals: Rc<Scope>,
    builtins: HashMap<String, Value>,
    options: InterpreterOptions,
    depth: usize,
    output: String,
    truncated: bool,
    scopes: Vec<Weak<Scope>>,
    prune_at: usize,
    handling: Vec<ScriptError>,
}

impl Interpreter {
    pub fn new(policy: &SandboxPolicy, options: InterpreterOptions) -> Self {
        let builtins = policy
            .allowed_builtins
            .iter()
            .filter_map(|name| {
                let value = Builtin::from_name(name)
                    .map(Value::Builtin)
                    .or_else(|| ErrorKind::from_name(name).map(Value::ExceptionType))?;
                Some((name.clone(), value))
            })
            .collect();
        Self {
            globals: Rc::new(Scope::default()),
            builtins,
            options,
            depth: 0,
            output: String::new(),
            truncated: false,
            scopes: Vec::new(),
            prune_at: 64,
            handling: Vec::new(),
        }
    }

    /// Execute the module body in the global scope.
    pub fn run_module(&mut self, module: &Module) -> ScriptResult<()> {
        let globals = self.globals.clone();
        match self.exec_block(&module.body, &globals)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(ScriptError::new(ErrorKind::SyntaxError, "'return' outside function")),
            Flow::Break => Err(ScriptError::new(ErrorKind::SyntaxError, "'break' outside loop")),
            Flow::Continue => Err(ScriptError::new(ErrorKind::SyntaxError, "'continue' not properly in loop")),
        }
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name)
    }

    pub fn take_output(&mut self) -> String {
        self.truncated = false;
        std::mem::take(&mut self.output)
    }

    pub(crate) fn tick(&self) -> ScriptResult<()> {
        if let Some(flag) = &self.options.interrupt {
            if flag.load(Ordering::Relaxed) {
                return Err(ScriptError::new(ErrorKind::Interrupted, "execution interrupted"));
            }
        }
        if heap::exceeded() {
            return Err(ScriptError::memory());
        }
        Ok(())
    }

    /// Append to the capture buffer, cutting at `max_output_bytes`.
    pub(crate) fn write_output(&mut self, text: &str) {
        if self.truncated {
            return;
        }
        let room = self.options.max_output_bytes.saturating_sub(self.output.len());
        if text.len() <= room {
            self.output.push_str(text);
            return;
        }
        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.output.push_str(&text[..cut]);
        self.output.push_str("\n[output truncated]");
        self.truncated = true;
    }

    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>, kwargs: Option<DictObj>) -> ScriptResult<Value> {
        match callee {
            Value::Function(closure) => self.call_closure(closure, args, kwargs),
            Value::Builtin(builtin) => builtins::call_builtin(self, *builtin, args, kwargs),
            Value::Method(method) => builtins::call_method(self, &method.receiver, &method.name, args, kwargs),
            Value::ExceptionType(kind) => {
                let message = match args.as_slice() {
                    [] => String::new(),
                    [one] => one.to_str(),
                    many => Value::tuple(many.to_vec()).repr(),
                };
                Ok(Value::Exception(Rc::new(ExceptionObj { kind: *kind, message })))
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_closure(&mut self, closure: &Closure, args: Vec<Value>, kwargs: Option<DictObj>) -> ScriptResult<Value> {
        self.tick()?;
        if self.depth >= self.options.max_recursion_depth {
            return Err(ScriptError::new(
                ErrorKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let scope = self.new_scope(&closure.scope);
        self.bind_arguments(closure, args, kwargs, &scope)?;
        self.depth += 1;
        let result = self.exec_block(&closure.def.body, &scope);
        self.depth -= 1;
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn new_scope(&mut self, parent: &Rc<Scope>) -> Rc<Scope> {
        let scope = Rc::new(Scope::child(parent));
        if self.scopes.len() >= self.prune_at {
            self.scopes.retain(|s| s.strong_count() > 0);
            self.prune_at = (self.scopes.len() * 2).max(64);
        }
        self.scopes.push(Rc::downgrade(&scope));
        scope
    }

    fn bind_arguments(
        &mut self,
        closure: &Closure,
        args: Vec<Value>,
        kwargs: Option<DictObj>,
        scope: &Rc<Scope>,
    ) -> ScriptResult<()> {
        let def = &closure.def;
        let positional = def.positional_count();
        let mut slots: Vec<Option<Value>> = vec![None; def.params.len()];
        let mut extra = Vec::new();
        let given = args.len();
        for (i, arg) in args.into_iter().enumerate() {
            if i < positional {
                slots[i] = Some(arg);
            } else if def.vararg.is_some() {
                extra.push(arg);
            } else {
                return Err(ScriptError::type_error(format!(
                    "{}() takes {} positional argument{} but {} were given",
                    def.name,
                    positional,
                    if positional == 1 { "" } else { "s" },
                    given
                )));
            }
        }

        let mut extra_keywords = DictObj::new();
        for (key, value) in kwargs.map(|k| k.items()).unwrap_or_default() {
            let name = key.to_str();
            match def.params.iter().position(|p| p.name == name) {
                Some(i) if slots[i].is_some() => {
                    return Err(ScriptError::type_error(format!(
                        "{}() got multiple values for argument '{}'",
                        def.name, name
                    )))
                }
                Some(i) => slots[i] = Some(value),
                None if def.kwarg.is_some() => extra_keywords.insert(key, value)?,
                None => {
                    return Err(ScriptError::type_error(format!(
                        "{}() got an unexpected keyword argument '{}'",
                        def.name, name
                    )))
                }
            }
        }

        for ((param, slot), default) in def.params.iter().zip(slots).zip(&closure.defaults) {
            let value = match (slot, default) {
                (Some(value), _) => value,
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(ScriptError::type_error(format!(
                        "{}() missing 1 required {}argument: '{}'",
                        def.name,
                        if param.kw_only { "keyword-only " } else { "positional " },
                        param.name
                    )))
                }
            };
            scope.set(&param.name, value);
        }
        if let Some(name) = &def.vararg {
            scope.set(name, Value::tuple(extra));
        }
        if let Some(name) = &def.kwarg {
            scope.set(name, Value::dict(extra_keywords));
        }
        Ok(())
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>, scope: &Rc<Scope>) -> ScriptResult<Value> {
        let defaults = def
            .params
            .iter()
            .map(|p| p.default.as_ref().map(|e| self.eval(e, scope)).transpose())
            .collect::<ScriptResult<Vec<_>>>()?;
        Ok(Value::Function(Rc::new(Closure {
            def: def.clone(),
            defaults,
            scope: scope.clone(),
        })))
    }

    fn exec_block(&mut self, block: &[Stmt], scope: &Rc<Scope>) -> ScriptResult<Flow> {
        for stmt in block {
            match self.exec(stmt, scope).map_err(|e| e.at(stmt.line))? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> ScriptResult<Flow> {
        self.tick()?;
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                let function = self.make_function(def, scope)?;
                self.set_name(&def.name, function, scope)?;
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, scope)?;
                for target in targets {
                    self.assign(target, value.clone(), scope)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, scope)?,
            StmtKind::Expr(expr) => {
                self.eval(expr, scope)?;
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test, scope)?.truthy() { body } else { orelse };
                return self.exec_block(branch, scope);
            }
            StmtKind::While { test, body, orelse } => loop {
                self.tick()?;
                if !self.eval(test, scope)?.truthy() {
                    return self.exec_block(orelse, scope);
                }
                match self.exec_block(body, scope)? {
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter, scope)?;
                for item in Iter::new(&iterable)? {
                    self.tick()?;
                    self.assign(target, item, scope)?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse, scope);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody, scope),
            StmtKind::Raise(value) => return Err(self.raise(value.as_ref(), scope)?),
            StmtKind::Assert { test, msg } => {
                if !self.eval(test, scope)?.truthy() {
                    let message = match msg {
                        Some(msg) => self.eval(msg, scope)?.to_str(),
                        None => String::new(),
                    };
                    return Err(ScriptError::new(ErrorKind::AssertionError, message));
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target, scope)?;
                }
            }
            StmtKind::Global(names) => {
                if !Rc::ptr_eq(scope, &self.globals) {
                    scope.global_names.borrow_mut().extend(names.iter().cloned());
                }
            }
            StmtKind::Nonlocal(names) => {
                if Rc::ptr_eq(scope, &self.globals) {
                    return Err(ScriptError::new(
                        ErrorKind::SyntaxError,
                        "nonlocal declaration not allowed at module level",
                    ));
                }
                for name in names {
                    if self.enclosing_binding(name, scope).is_none() {
                        return Err(ScriptError::new(
                            ErrorKind::SyntaxError,
                            format!("no binding for nonlocal '{}' found", name),
                        ));
                    }
                    scope.nonlocal_names.borrow_mut().insert(name.clone());
                }
            }
            StmtKind::Import(names) => {
                return Err(ScriptError::new(
                    ErrorKind::ImportError,
                    format!(
                        "import of '{}' is not allowed",
                        names.first().map(String::as_str).unwrap_or_default()
                    ),
                ))
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        scope: &Rc<Scope>,
    ) -> ScriptResult<Flow> {
        let outcome = match self.exec_block(body, scope) {
            Ok(Flow::Normal) => self.exec_block(orelse, scope),
            Err(err) if !err.kind.is_fatal() && !handlers.is_empty() => self.handle(err, handlers, scope),
            other => other,
        };
        if finalbody.is_empty() || matches!(&outcome, Err(e) if e.kind.is_fatal()) {
            return outcome;
        }
        match self.exec_block(finalbody, scope)? {
            Flow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    fn handle(&mut self, err: ScriptError, handlers: &[Handler], scope: &Rc<Scope>) -> ScriptResult<Flow> {
        for handler in handlers {
            if !self.handler_matches(handler, &err, scope)? {
                continue;
            }
            if let Some(name) = &handler.name {
                let exception = Value::Exception(Rc::new(ExceptionObj::from(&err)));
                self.set_name(name, exception, scope)?;
            }
            self.handling.push(err);
            let result = self.exec_block(&handler.body, scope);
            self.handling.pop();
            return result;
        }
        Err(err)
    }

    fn handler_matches(&mut self, handler: &Handler, err: &ScriptError, scope: &Rc<Scope>) -> ScriptResult<bool> {
        let Some(kind) = &handler.kind else {
            return Ok(true);
        };
        let matches = |value: &Value| match value {
            Value::ExceptionType(kind) => Ok(err.kind.is_subclass_of(*kind)),
            _ => Err(ScriptError::type_error(
                "catching classes that do not inherit from BaseException is not allowed",
            )),
        };
        match self.eval(kind, scope)? {
            Value::Tuple(kinds) => {
                for kind in kinds.items() {
                    if matches(kind)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            other => matches(&other),
        }
    }

    fn raise(&mut self, value: Option<&Expr>, scope: &Rc<Scope>) -> ScriptResult<ScriptError> {
        let Some(expr) = value else {
            return Ok(self
                .handling
                .last()
                .cloned()
                .unwrap_or_else(|| ScriptError::new(ErrorKind::RuntimeError, "No active exception to reraise")));
        };
        Ok(match self.eval(expr, scope)? {
            Value::ExceptionType(kind) => ScriptError::new(kind, ""),
            Value::Exception(exception) => exception.to_error(),
            _ => ScriptError::type_error("exceptions must derive from BaseException"),
        })
    }

    pub(crate) fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> ScriptResult<Value> {
        match expr {
            Expr::Const(constant) => Ok(match constant {
                Const::None => Value::None,
                Const::Bool(b) => Value::Bool(*b),
                Const::Int(i) => Value::Int(*i),
                Const::BigInt(b) => Value::int(b.clone()),
                Const::Float(f) => Value::Float(*f),
                Const::Str(s) => Value::str(s.clone()),
            }),
            Expr::Name(name) => self.lookup(name, scope),
            Expr::FString(parts) => self.fstring(parts, scope),
            Expr::List(items) => Ok(Value::list(self.eval_items(items, scope)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_items(items, scope)?)),
            Expr::Set(items) => Ok(Value::set(SetObj::from_values(self.eval_items(items, scope)?)?)),
            Expr::Dict(entries) => {
                let mut dict = DictObj::new();
                for (key, value) in entries {
                    match key {
                        Some(key) => {
                            let key = self.eval(key, scope)?;
                            let value = self.eval(value, scope)?;
                            dict.insert(key, value)?;
                        }
                        None => {
                            for (k, v) in self.mapping_items(value, scope)? {
                                dict.insert(k, v)?;
                            }
                        }
                    }
                }
                Ok(Value::dict(dict))
            }
            Expr::BinOp { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                ops::binary(*op, &left, &right)
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand, scope)?;
                ops::unary(*op, &operand)
            }
            Expr::BoolOp { op, values } => {
                let mut result = Value::None;
                for value in values {
                    result = self.eval(value, scope)?;
                    let done = match op {
                        BoolOpKind::And => !result.truthy(),
                        BoolOpKind::Or => result.truthy(),
                    };
                    if done {
                        break;
                    }
                }
                Ok(result)
            }
            Expr::Compare {
                left,
                ops: operators,
                comparators,
            } => {
                let mut current = self.eval(left, scope)?;
                for (op, right) in operators.iter().zip(comparators) {
                    let next = self.eval(right, scope)?;
                    if !ops::compare(*op, &current, &next)? {
                        return Ok(Value::Bool(false));
                    }
                    current = next;
                }
                Ok(Value::Bool(true))
            }
            Expr::Call { func, args } => {
                let callee = self.eval(func, scope)?;
                let (positional, keywords) = self.eval_args(args, scope)?;
                self.call_value(&callee, positional, keywords)
            }
            Expr::Attribute { value, attr } => {
                let receiver = self.eval(value, scope)?;
                attribute(receiver, attr)
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value, scope)?;
                match index.as_ref() {
                    Expr::Slice { lower, upper, step } => {
                        let slice = self.slice_spec(lower, upper, step, scope)?;
                        ops::get_slice(&container, &slice)
                    }
                    index => {
                        let key = self.eval(index, scope)?;
                        ops::get_item(&container, &key)
                    }
                }
            }
            Expr::Slice { .. } => Err(ScriptError::new(ErrorKind::SyntaxError, "slice outside of a subscript")),
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(body, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
            Expr::Lambda(def) => self.make_function(def, scope),
            Expr::Comp {
                kind,
                elt,
                value,
                generators,
            } => {
                let inner = self.new_scope(scope);
                let out = match kind {
                    CompKind::List | CompKind::Generator => Value::list(Vec::new()),
                    CompKind::Set => Value::set(SetObj::new()),
                    CompKind::Dict => Value::dict(DictObj::new()),
                };
                self.comprehension(elt, value.as_deref(), generators, &inner, &out)?;
                Ok(out)
            }
            Expr::Starred(_) => Err(ScriptError::new(
                ErrorKind::SyntaxError,
                "can't use starred expression here",
            )),
        }
    }

    fn comprehension(
        &mut self,
        elt: &Expr,
        value: Option<&Expr>,
        generators: &[Comprehension],
        scope: &Rc<Scope>,
        out: &Value,
    ) -> ScriptResult<()> {
        let Some((first, rest)) = generators.split_first() else {
            let item = self.eval(elt, scope)?;
            match out {
                Value::List(list) => list.borrow_mut().update(|items| items.push(item)),
                Value::Set(set) => set.borrow_mut().add(item)?,
                Value::Dict(dict) => {
                    let value = match value {
                        Some(value) => self.eval(value, scope)?,
                        None => Value::None,
                    };
                    dict.borrow_mut().insert(item, value)?;
                }
                _ => {}
            }
            return Ok(());
        };
        let iterable = self.eval(&first.iter, scope)?;
        'items: for item in Iter::new(&iterable)? {
            self.tick()?;
            self.assign(&first.target, item, scope)?;
            for condition in &first.ifs {
                if !self.eval(condition, scope)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehension(elt, value, rest, scope, out)?;
        }
        Ok(())
    }

    fn eval_items(&mut self, items: &[Expr], scope: &Rc<Scope>) -> ScriptResult<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Expr::Starred(inner) => out.extend(self.eval(inner, scope)?.to_items()?),
                other => out.push(self.eval(other, scope)?),
            }
        }
        Ok(out)
    }

    fn mapping_items(&mut self, expr: &Expr, scope: &Rc<Scope>) -> ScriptResult<Vec<(Value, Value)>> {
        match self.eval(expr, scope)? {
            Value::Dict(dict) => {
                let items = dict.borrow().items();
                Ok(items)
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not a mapping",
                other.type_name()
            ))),
        }
    }

    fn eval_args(&mut self, args: &[Arg], scope: &Rc<Scope>) -> ScriptResult<(Vec<Value>, Option<DictObj>)> {
        let mut positional = Vec::new();
        let mut keywords: Option<DictObj> = None;
        for arg in args {
            match arg {
                Arg::Positional(expr) => positional.push(self.eval(expr, scope)?),
                Arg::Star(expr) => positional.extend(self.eval(expr, scope)?.to_items()?),
                Arg::Keyword(name, expr) => {
                    let value = self.eval(expr, scope)?;
                    let keywords = keywords.get_or_insert_with(DictObj::new);
                    let key = Value::str(name.clone());
                    if keywords.contains(&key.hash_key()?) {
                        return Err(ScriptError::type_error(format!("keyword argument repeated: {}", name)));
                    }
                    keywords.insert(key, value)?;
                }
                Arg::DoubleStar(expr) => {
                    for (key, value) in self.mapping_items(expr, scope)? {
                        if key.as_str().is_none() {
                            return Err(ScriptError::type_error("keywords must be strings"));
                        }
                        keywords.get_or_insert_with(DictObj::new).insert(key, value)?;
                    }
                }
            }
        }
        Ok((positional, keywords))
    }

    fn slice_spec(
        &mut self,
        lower: &Option<Box<Expr>>,
        upper: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
        scope: &Rc<Scope>,
    ) -> ScriptResult<SliceSpec> {
        let mut bound = |expr: &Option<Box<Expr>>| -> ScriptResult<Option<i64>> {
            match expr {
                Some(expr) => {
                    let value = self.eval(expr, scope)?;
                    SliceSpec::bound(Some(&value))
                }
                None => Ok(None),
            }
        };
        Ok(SliceSpec {
            lower: bound(lower)?,
            upper: bound(upper)?,
            step: bound(step)?,
        })
    }

    fn fstring(&mut self, parts: &[FPart], scope: &Rc<Scope>) -> ScriptResult<Value> {
        let mut out = String::new();
        for part in parts {
            match part {
                FPart::Literal(text) => out.push_str(text),
                FPart::Value { expr, conversion, spec } => {
                    let value = self.eval(expr, scope)?;
                    let value = match conversion {
                        Some('r') | Some('a') => Value::str(value.checked_repr()?),
                        Some('s') => Value::str(value.checked_str()?),
                        _ => value,
                    };
                    out.push_str(&format_value(&value, spec.as_deref().unwrap_or(""))?);
                }
            }
        }
        Ok(Value::str(out))
    }

    fn assign(&mut self, target: &Expr, value: Value, scope: &Rc<Scope>) -> ScriptResult<()> {
        match target {
            Expr::Name(name) => self.set_name(name, value, scope),
            Expr::Tuple(targets) | Expr::List(targets) => self.unpack(targets, value, scope),
            Expr::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container, scope)?;
                match index.as_ref() {
                    Expr::Slice { lower, upper, step } => {
                        let slice = self.slice_spec(lower, upper, step, scope)?;
                        ops::set_slice(&container, &slice, value.to_items()?)
                    }
                    index => {
                        let key = self.eval(index, scope)?;
                        ops::set_item(&container, key, value)
                    }
                }
            }
            Expr::Attribute { value: receiver, attr } => {
                let receiver = self.eval(receiver, scope)?;
                Err(ScriptError::new(
                    ErrorKind::AttributeError,
                    format!("'{}' object attribute '{}' is read-only", receiver.type_name(), attr),
                ))
            }
            _ => Err(ScriptError::new(ErrorKind::SyntaxError, "cannot assign to expression")),
        }
    }

    fn unpack(&mut self, targets: &[Expr], value: Value, scope: &Rc<Scope>) -> ScriptResult<()> {
        let mut items = value.to_items().map_err(|e| match e.kind {
            ErrorKind::TypeError => ScriptError::type_error(format!(
                "cannot unpack non-iterable {} object",
                value.type_name()
            )),
            _ => e,
        })?;
        let Some(star) = targets.iter().position(|t| matches!(t, Expr::Starred(_))) else {
            if items.len() != targets.len() {
                let message = if items.len() > targets.len() {
                    format!("too many values to unpack (expected {})", targets.len())
                } else {
                    format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )
                };
                return Err(ScriptError::value_error(message));
            }
            for (target, item) in targets.iter().zip(items) {
                self.assign(target, item, scope)?;
            }
            return Ok(());
        };

        let after = targets.len() - star - 1;
        if items.len() < star + after {
            return Err(ScriptError::value_error(format!(
                "not enough values to unpack (expected at least {}, got {})",
                star + after,
                items.len()
            )));
        }
        let tail = items.split_off(items.len() - after);
        let middle = items.split_off(star);
        for (target, item) in targets[..star].iter().zip(items) {
            self.assign(target, item, scope)?;
        }
        if let Expr::Starred(inner) = &targets[star] {
            self.assign(inner, Value::list(middle), scope)?;
        }
        for (target, item) in targets[star + 1..].iter().zip(tail) {
            self.assign(target, item, scope)?;
        }
        Ok(())
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr, scope: &Rc<Scope>) -> ScriptResult<()> {
        match target {
            Expr::Name(name) => {
                let current = self.lookup(name, scope)?;
                let rhs = self.eval(value, scope)?;
                let updated = augmented(op, current, &rhs)?;
                self.set_name(name, updated, scope)
            }
            Expr::Subscript {
                value: container,
                index,
            } if !matches!(index.as_ref(), Expr::Slice { .. }) => {
                let container = self.eval(container, scope)?;
                let key = self.eval(index, scope)?;
                let current = ops::get_item(&container, &key)?;
                let rhs = self.eval(value, scope)?;
                let updated = augmented(op, current, &rhs)?;
                ops::set_item(&container, key, updated)
            }
            _ => Err(ScriptError::new(
                ErrorKind::SyntaxError,
                "illegal expression for augmented assignment",
            )),
        }
    }

    fn delete(&mut self, target: &Expr, scope: &Rc<Scope>) -> ScriptResult<()> {
        match target {
            Expr::Name(name) => {
                let owner = if scope.global_names.borrow().contains(name.as_str()) {
                    self.globals.clone()
                } else {
                    scope.clone()
                };
                owner
                    .remove(name)
                    .map(|_| ())
                    .ok_or_else(|| ScriptError::new(ErrorKind::NameError, format!("name '{}' is not defined", name)))
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value, scope)?;
                match index.as_ref() {
                    Expr::Slice { lower, upper, step } => {
                        let slice = self.slice_spec(lower, upper, step, scope)?;
                        ops::del_slice(&container, &slice)
                    }
                    index => {
                        let key = self.eval(index, scope)?;
                        ops::del_item(&container, &key)
                    }
                }
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                for target in targets {
                    self.delete(target, scope)?;
                }
                Ok(())
            }
            _ => Err(ScriptError::new(ErrorKind::SyntaxError, "cannot delete expression")),
        }
    }

    fn lookup(&self, name: &str, scope: &Rc<Scope>) -> ScriptResult<Value> {
        let found = if scope.global_names.borrow().contains(name) {
            self.globals.get(name)
        } else {
            let mut current = Some(scope);
            let mut found = None;
            while let Some(s) = current {
                if let Some(value) = s.get(name) {
                    found = Some(value);
                    break;
                }
                current = s.parent.as_ref();
            }
            found
        };
        found
            .or_else(|| self.builtins.get(name).cloned())
            .ok_or_else(|| ScriptError::new(ErrorKind::NameError, format!("name '{}' is not defined", name)))
    }

    fn set_name(&self, name: &str, value: Value, scope: &Rc<Scope>) -> ScriptResult<()> {
        if scope.global_names.borrow().contains(name) {
            self.globals.set(name, value);
            return Ok(());
        }
        if scope.nonlocal_names.borrow().contains(name) {
            let owner = self.enclosing_binding(name, scope).ok_or_else(|| {
                ScriptError::new(ErrorKind::SyntaxError, format!("no binding for nonlocal '{}' found", name))
            })?;
            owner.set(name, value);
            return Ok(());
        }
        scope.set(name, value);
        Ok(())
    }

    /// Nearest enclosing function scope that binds `name`.
    fn enclosing_binding<'a>(&self, name: &str, scope: &'a Rc<Scope>) -> Option<&'a Rc<Scope>> {
        let mut current = scope.parent.as_ref();
        while let Some(s) = current {
            if Rc::ptr_eq(s, &self.globals) {
                return None;
            }
            if s.has(name) {
                return Some(s);
            }
            current = s.parent.as_ref();
        }
        None
    }
}

impl Drop for Interpreter {
    // Closures stored in a scope keep that scope alive.
    fn drop(&mut self) {
        self.globals.clear();
        for scope in std::mem::take(&mut self.scopes) {
            if let Some(scope) = scope.upgrade() {
                scope.clear();
            }
        }
    }
}

fn attribute(receiver: Value, attr: &str) -> ScriptResult<Value> {
    if !attr.starts_with("__") && builtins::has_method(&receiver, attr) {
        return Ok(Value::Method(Rc::new(BoundMethod {
            receiver,
            name: attr.to_string(),
        })));
    }
    if let (Value::Exception(exception), "args") = (&receiver, attr) {
        return Ok(Value::tuple(if exception.message.is_empty() {
            Vec::new()
        } else {
            vec![Value::str(exception.message.clone())]
        }));
    }
    Err(ScriptError::new(
        ErrorKind::AttributeError,
        format!("'{}' object has no attribute '{}'", receiver.type_name(), attr),
    ))
}

/// In-place forms mutate lists and sets so aliases observe the change.
fn augmented(op: BinOp, current: Value, rhs: &Value) -> ScriptResult<Value> {
    match (op, &current, rhs) {
        (BinOp::Add, Value::List(list), _) => {
            let extra = rhs.to_items()?;
            heap::reserve(extra.len().saturating_mul(size_of::<Value>()))?;
            list.borrow_mut().update(|items| items.extend(extra));
            Ok(current)
        }
        (BinOp::BitOr, Value::Set(set), Value::Set(other)) => {
            let extra = other.borrow().values();
            let mut set = set.borrow_mut();
            for value in extra {
                set.add(value)?;
            }
            drop(set);
            Ok(current)
        }
        _ => ops::binary(op, &current, rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse_module;

    fn run(source: &str) -> Interpreter {
        let module = parse_module(source).unwrap();
        let mut interp = Interpreter::new(&SandboxPolicy::default(), InterpreterOptions::default());
        interp.run_module(&module).unwrap();
        interp
    }

    fn global(source: &str, name: &str) -> String {
        run(source).global(name).unwrap().repr()
    }

    fn run_err(source: &str) -> ScriptError {
        let module = parse_module(source).unwrap();
        let mut interp = Interpreter::new(&SandboxPolicy::default(), InterpreterOptions::default());
        interp.run_module(&module).unwrap_err()
    }

    #[test]
    fn closures_capture_enclosing_scope() {
        let src = "\
def counter():
    n = 0
    def bump():
        nonlocal n
        n += 1
        return n
    return bump
c = counter()
c()
result = c()
";
        assert_eq!(global(src, "result"), "2");
    }

    #[test]
    fn default_and_keyword_arguments() {
        let src = "\
def f(a, b=10, *rest, scale=1, **extra):
    return (a + b) * scale, rest, extra
r = f(1, scale=2)
s = f(1, 2, 3, 4, tag='x')
";
        let interp = run(src);
        assert_eq!(interp.global("r").unwrap().repr(), "(22, (), {})");
        assert_eq!(interp.global("s").unwrap().repr(), "(3, (3, 4), {'tag': 'x'})");
    }

    #[test]
    fn unpacking_with_star() {
        assert_eq!(global("first, *mid, last = range(5)\nr = (first, mid, last)\n", "r"), "(0, [1, 2, 3], 4)");
        let err = run_err("a, b = [1, 2, 3]\n");
        assert_eq!(err.kind, ErrorKind::ValueError);
    }

    #[test]
    fn exceptions_are_caught_by_hierarchy() {
        let src = "\
log = []
try:
    {}['missing']
except LookupError as e:
    log.append('lookup')
else:
    log.append('else')
finally:
    log.append('finally')
";
        assert_eq!(global(src, "log"), "['lookup', 'finally']");
    }

    #[test]
    fn finally_return_overrides() {
        let src = "\
def f():
    try:
        raise ValueError('x')
    finally:
        return 'done'
r = f()
";
        assert_eq!(global(src, "r"), "'done'");
    }

    #[test]
    fn recursion_limit_is_not_catchable() {
        let src = "\
def f(n):
    try:
        return f(n + 1)
    except Exception:
        return -1
f(0)
";
        let module = parse_module(src).unwrap();
        let options = InterpreterOptions {
            max_recursion_depth: 40,
            ..InterpreterOptions::default()
        };
        let mut interp = Interpreter::new(&SandboxPolicy::default(), options);
        assert_eq!(interp.run_module(&module).unwrap_err().kind, ErrorKind::RecursionError);
    }

    #[test]
    fn interrupt_flag_stops_loops() {
        let flag = Arc::new(AtomicBool::new(true));
        let module = parse_module("while True:\n    pass\n").unwrap();
        let options = InterpreterOptions {
            interrupt: Some(flag),
            ..InterpreterOptions::default()
        };
        let mut interp = Interpreter::new(&SandboxPolicy::default(), options);
        assert_eq!(interp.run_module(&module).unwrap_err().kind, ErrorKind::Interrupted);
    }

    #[test]
    fn comprehensions_and_fstrings() {
        let src = "\
squares = {x: x * x for x in range(4) if x % 2 == 0}
pairs = [(a, b) for a in 'ab' for b in (1, 2)]
name = 'Ada'
msg = f'{name!r} has {len(pairs):03d} pairs, {3.14159:.2f}'
";
        let interp = run(src);
        assert_eq!(interp.global("squares").unwrap().repr(), "{0: 0, 2: 4}");
        assert_eq!(interp.global("pairs").unwrap().repr(), "[('a', 1), ('a', 2), ('b', 1), ('b', 2)]");
        assert_eq!(interp.global("msg").unwrap().to_str(), "'Ada' has 004 pairs, 3.14");
    }

    #[test]
    fn list_augmented_assignment_mutates_in_place() {
        assert_eq!(global("a = [1]\nb = a\na += [2]\n", "b"), "[1, 2]");
    }

    #[test]
    fn import_is_refused() {
        assert_eq!(run_err("import os\n").kind, ErrorKind::ImportError);
    }

    #[test]
    fn unknown_names_raise() {
        let err = run_err("open('x')\n");
        assert_eq!(err.kind, ErrorKind::NameError);
        assert_eq!(err.line, Some(1));
    }

    #[test]
    fn print_output_is_bounded() {
        let module = parse_module("for i in range(100):\n    print('abcdefghij')\n").unwrap();
        let options = InterpreterOptions {
            max_output_bytes: 50,
            ..InterpreterOptions::default()
        };
        let mut interp = Interpreter::new(&SandboxPolicy::default(), options);
        interp.run_module(&module).unwrap();
        let out = interp.take_output();
        assert!(out.starts_with("abcdefghij\n"));
        assert!(out.ends_with("[output truncated]"));
    }
}
