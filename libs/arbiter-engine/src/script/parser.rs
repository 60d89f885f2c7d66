//! Recursive-descent parser for the supported Python subset.
//!
//! Constructs outside the subset are rejected here with a syntax error
//! naming the construct, so the interpreter never sees them.

use std::rc::Rc;

use super::ast::*;
use super::error::{ScriptError, ScriptResult};
use super::lexer::{tokenize, unescape, Tok, Token};

/// Combined depth of nested blocks, brackets and unary chains.
const MAX_NESTING: usize = 64;
/// Binary operators, comparisons and trailers allowed in one statement.
const MAX_OPS_PER_STATEMENT: usize = 2_000;

const BINARY_LEVELS: &[&[(&str, BinOp)]] = &[
    &[("|", BinOp::BitOr)],
    &[("^", BinOp::BitXor)],
    &[("&", BinOp::BitAnd)],
    &[("<<", BinOp::LShift), (">>", BinOp::RShift)],
    &[("+", BinOp::Add), ("-", BinOp::Sub)],
    &[
        ("*", BinOp::Mul),
        ("/", BinOp::Div),
        ("//", BinOp::FloorDiv),
        ("%", BinOp::Mod),
        ("@", BinOp::MatMul),
    ],
];

static END: Tok = Tok::Eof;

pub fn parse_module(source: &str) -> ScriptResult<Module> {
    let tokens = tokenize(source)?;
    Parser::new(tokens, 0).module()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    ops: usize,
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Name(n) => format!("'{}'", n),
        Tok::Keyword(k) => format!("'{}'", k),
        Tok::Int(_) | Tok::BigInt(_) | Tok::Float(_) => "number".to_string(),
        Tok::Str(_) | Tok::FStr { .. } => "string".to_string(),
        Tok::Op(o) => format!("'{}'", o),
        Tok::Newline => "end of line".to_string(),
        Tok::Indent => "unexpected indent".to_string(),
        Tok::Dedent => "unindent".to_string(),
        Tok::Eof => "end of input".to_string(),
    }
}

impl Parser {
    fn new(tokens: Vec<Token>, depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth,
            ops: 0,
        }
    }

    fn peek(&self) -> &Tok {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &Tok {
        match self.tokens.get(self.pos + n).or_else(|| self.tokens.last()) {
            Some(token) => &token.tok,
            None => &END,
        }
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> ScriptResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", op)))
        }
    }

    fn check_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Keyword(k) if *k == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> ScriptResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", kw)))
        }
    }

    fn expect_name(&mut self) -> ScriptResult<String> {
        match self.peek() {
            Tok::Name(_) => match self.advance() {
                Tok::Name(name) => Ok(name),
                _ => Err(self.unexpected("a name")),
            },
            _ => Err(self.unexpected("a name")),
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(message, self.line())
    }

    fn unexpected(&self, wanted: &str) -> ScriptError {
        self.error(format!("invalid syntax: expected {}, found {}", wanted, describe(self.peek())))
    }

    fn enter(&mut self) -> ScriptResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("too many nested blocks or expressions"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn note_op(&mut self) -> ScriptResult<()> {
        self.ops += 1;
        if self.ops > MAX_OPS_PER_STATEMENT {
            return Err(self.error("statement is too complex"));
        }
        Ok(())
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof) || self.check_op(";")
    }

    fn at_expression_end(&self) -> bool {
        match self.peek() {
            Tok::Newline | Tok::Eof => true,
            Tok::Op(op) => {
                matches!(*op, "=" | ")" | "]" | "}" | ";" | ":") || BinOp::from_augmented(op).is_some()
            }
            _ => false,
        }
    }

    // ---- statements ----

    fn module(mut self) -> ScriptResult<Module> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => {
                    self.advance();
                }
                Tok::Indent => return Err(self.error("unexpected indent")),
                _ => body.extend(self.statement()?),
            }
        }
        Ok(Module { body })
    }

    fn statement(&mut self) -> ScriptResult<Vec<Stmt>> {
        self.ops = 0;
        let line = self.line();
        let keyword = match self.peek() {
            Tok::Keyword(k) => Some(*k),
            _ => None,
        };
        match keyword {
            Some("def") => return Ok(vec![self.function_def()?]),
            Some("if") => {
                self.advance();
                return Ok(vec![self.if_statement(line)?]);
            }
            Some("while") => {
                self.advance();
                let test = self.test()?;
                let body = self.block()?;
                let orelse = if self.eat_kw("else") { self.block()? } else { Vec::new() };
                return Ok(vec![Stmt {
                    line,
                    kind: StmtKind::While { test, body, orelse },
                }]);
            }
            Some("for") => {
                self.advance();
                let target = self.target_list()?;
                self.check_target(&target)?;
                self.expect_kw("in")?;
                let iter = self.testlist_star()?;
                let body = self.block()?;
                let orelse = if self.eat_kw("else") { self.block()? } else { Vec::new() };
                return Ok(vec![Stmt {
                    line,
                    kind: StmtKind::For {
                        target,
                        iter,
                        body,
                        orelse,
                    },
                }]);
            }
            Some("try") => {
                self.advance();
                return Ok(vec![self.try_statement(line)?]);
            }
            Some("class") => return Err(self.error("class definitions are not supported")),
            Some("with") => return Err(self.error("'with' statements are not supported")),
            Some("async") | Some("await") => return Err(self.error("async code is not supported")),
            _ => {}
        }
        if self.check_op("@") {
            return Err(self.error("decorators are not supported"));
        }
        self.simple_statements()
    }

    fn block(&mut self) -> ScriptResult<Block> {
        self.expect_op(":")?;
        self.enter()?;
        let body = if matches!(self.peek(), Tok::Newline) {
            self.advance();
            if !matches!(self.peek(), Tok::Indent) {
                return Err(self.error("expected an indented block"));
            }
            self.advance();
            let mut body = Vec::new();
            loop {
                match self.peek() {
                    Tok::Dedent => {
                        self.advance();
                        break;
                    }
                    Tok::Eof => break,
                    Tok::Newline => {
                        self.advance();
                    }
                    _ => body.extend(self.statement()?),
                }
            }
            body
        } else {
            self.simple_statements()?
        };
        self.leave();
        Ok(body)
    }

    fn function_def(&mut self) -> ScriptResult<Stmt> {
        let line = self.line();
        self.expect_kw("def")?;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let (params, vararg, kwarg) = self.parameters(")", true)?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.test()?;
        }
        let body = self.block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::FunctionDef(Rc::new(FunctionDef {
                name,
                line,
                params,
                vararg,
                kwarg,
                body,
            })),
        })
    }

    #[allow(clippy::type_complexity)]
    fn parameters(
        &mut self,
        close: &str,
        annotations: bool,
    ) -> ScriptResult<(Vec<Param>, Option<String>, Option<String>)> {
        let mut params: Vec<Param> = Vec::new();
        let mut vararg = None;
        let mut kwarg = None;
        let mut kw_only = false;
        let mut seen_default = false;

        while !self.check_op(close) {
            if kwarg.is_some() {
                return Err(self.error("arguments cannot follow var-keyword argument"));
            }
            if self.eat_op("**") {
                kwarg = Some(self.expect_name()?);
                self.annotation(annotations)?;
            } else if self.eat_op("*") {
                if kw_only {
                    return Err(self.error("* argument may appear only once"));
                }
                kw_only = true;
                if matches!(self.peek(), Tok::Name(_)) {
                    vararg = Some(self.expect_name()?);
                    self.annotation(annotations)?;
                }
            } else if self.eat_op("/") {
                // positional-only marker; all parameters bind positionally anyway
            } else {
                let name = self.expect_name()?;
                self.annotation(annotations)?;
                let default = if self.eat_op("=") { Some(self.test()?) } else { None };
                if default.is_some() {
                    seen_default |= !kw_only;
                } else if seen_default && !kw_only {
                    return Err(self.error("non-default argument follows default argument"));
                }
                if params.iter().any(|p| p.name == name) {
                    return Err(self.error(format!("duplicate argument '{}' in function definition", name)));
                }
                params.push(Param {
                    name,
                    default,
                    kw_only,
                });
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok((params, vararg, kwarg))
    }

    fn annotation(&mut self, allowed: bool) -> ScriptResult<()> {
        if allowed && self.eat_op(":") {
            self.test()?;
        }
        Ok(())
    }

    fn if_statement(&mut self, line: usize) -> ScriptResult<Stmt> {
        let mut branches = vec![(line, self.test()?, self.block()?)];
        let mut orelse = Vec::new();
        loop {
            if self.check_kw("elif") {
                let elif_line = self.line();
                self.advance();
                let test = self.test()?;
                let body = self.block()?;
                branches.push((elif_line, test, body));
            } else {
                if self.eat_kw("else") {
                    orelse = self.block()?;
                }
                break;
            }
        }

        let mut chain = orelse;
        let mut first = None;
        while let Some((line, test, body)) = branches.pop() {
            let stmt = Stmt {
                line,
                kind: StmtKind::If {
                    test,
                    body,
                    orelse: chain,
                },
            };
            if branches.is_empty() {
                first = Some(stmt);
                break;
            }
            chain = vec![stmt];
        }
        first.ok_or_else(|| self.error("invalid if statement"))
    }

    fn try_statement(&mut self, line: usize) -> ScriptResult<Stmt> {
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.check_kw("except") {
            let handler_line = self.line();
            self.advance();
            let (kind, name) = if self.check_op(":") {
                (None, None)
            } else {
                let kind = self.test()?;
                let name = if self.eat_kw("as") { Some(self.expect_name()?) } else { None };
                (Some(kind), name)
            };
            let body = self.block()?;
            handlers.push(Handler {
                line: handler_line,
                kind,
                name,
                body,
            });
        }
        let orelse = if !handlers.is_empty() && self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw("finally") { self.block()? } else { Vec::new() };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.unexpected("'except' or 'finally' block"));
        }
        Ok(Stmt {
            line,
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
        })
    }

    fn simple_statements(&mut self) -> ScriptResult<Vec<Stmt>> {
        let mut stmts = vec![self.simple_statement()?];
        while self.eat_op(";") {
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
            stmts.push(self.simple_statement()?);
        }
        match self.peek() {
            Tok::Newline => {
                self.advance();
            }
            Tok::Eof => {}
            _ => return Err(self.unexpected("end of line")),
        }
        Ok(stmts)
    }

    fn simple_statement(&mut self) -> ScriptResult<Stmt> {
        let line = self.line();
        let keyword = match self.peek() {
            Tok::Keyword(k) => Some(*k),
            _ => None,
        };
        let kind = match keyword {
            Some("pass") => {
                self.advance();
                StmtKind::Pass
            }
            Some("break") => {
                self.advance();
                StmtKind::Break
            }
            Some("continue") => {
                self.advance();
                StmtKind::Continue
            }
            Some("return") => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.testlist_star()?))
                }
            }
            Some("raise") => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Raise(None)
                } else {
                    let exc = self.test()?;
                    if self.eat_kw("from") {
                        self.test()?;
                    }
                    StmtKind::Raise(Some(exc))
                }
            }
            Some("assert") => {
                self.advance();
                let test = self.test()?;
                let msg = if self.eat_op(",") { Some(self.test()?) } else { None };
                StmtKind::Assert { test, msg }
            }
            Some("del") => {
                self.advance();
                let mut targets = Vec::new();
                loop {
                    let target = self.bit_or()?;
                    if !matches!(target, Expr::Name(_) | Expr::Subscript { .. }) {
                        return Err(self.error("cannot delete expression"));
                    }
                    targets.push(target);
                    if !self.eat_op(",") || self.at_statement_end() {
                        break;
                    }
                }
                StmtKind::Delete(targets)
            }
            Some("global") | Some("nonlocal") => {
                self.advance();
                let mut names = vec![self.expect_name()?];
                while self.eat_op(",") {
                    names.push(self.expect_name()?);
                }
                if keyword == Some("global") {
                    StmtKind::Global(names)
                } else {
                    StmtKind::Nonlocal(names)
                }
            }
            Some("import") => {
                self.advance();
                let mut modules = Vec::new();
                loop {
                    modules.push(self.dotted_name()?);
                    if self.eat_kw("as") {
                        self.expect_name()?;
                    }
                    if !self.eat_op(",") {
                        break;
                    }
                }
                StmtKind::Import(modules)
            }
            Some("from") => {
                self.advance();
                let mut module = String::new();
                while self.check_op(".") || self.check_op("...") {
                    if let Tok::Op(dots) = self.advance() {
                        module.push_str(dots);
                    }
                }
                if matches!(self.peek(), Tok::Name(_)) {
                    module.push_str(&self.dotted_name()?);
                }
                self.expect_kw("import")?;
                if !self.eat_op("*") {
                    let parenthesized = self.eat_op("(");
                    loop {
                        self.expect_name()?;
                        if self.eat_kw("as") {
                            self.expect_name()?;
                        }
                        if !self.eat_op(",") || (parenthesized && self.check_op(")")) {
                            break;
                        }
                    }
                    if parenthesized {
                        self.expect_op(")")?;
                    }
                }
                StmtKind::Import(vec![module])
            }
            Some("yield") => return Err(self.error("'yield' is not supported")),
            _ => self.expression_statement()?,
        };
        Ok(Stmt { line, kind })
    }

    fn dotted_name(&mut self) -> ScriptResult<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn expression_statement(&mut self) -> ScriptResult<StmtKind> {
        let first = self.testlist_star()?;

        if self.check_op("=") {
            let mut exprs = vec![first];
            while self.eat_op("=") {
                exprs.push(self.testlist_star()?);
            }
            let value = exprs.pop().ok_or_else(|| self.error("invalid assignment"))?;
            for target in &exprs {
                self.check_target(target)?;
            }
            return Ok(StmtKind::Assign { targets: exprs, value });
        }

        let augmented = match self.peek() {
            Tok::Op(op) => BinOp::from_augmented(op),
            _ => None,
        };
        if let Some(op) = augmented {
            if !matches!(first, Expr::Name(_) | Expr::Subscript { .. } | Expr::Attribute { .. }) {
                return Err(self.error("illegal expression for augmented assignment"));
            }
            self.advance();
            let value = self.testlist_star()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }

        if self.check_op(":") {
            if !matches!(first, Expr::Name(_) | Expr::Subscript { .. } | Expr::Attribute { .. }) {
                return Err(self.error("illegal target for annotation"));
            }
            self.advance();
            self.test()?;
            if self.eat_op("=") {
                let value = self.testlist_star()?;
                return Ok(StmtKind::Assign {
                    targets: vec![first],
                    value,
                });
            }
            return Ok(StmtKind::Pass);
        }

        if let Expr::Starred(_) = first {
            return Err(self.error("can't use starred expression here"));
        }
        Ok(StmtKind::Expr(first))
    }

    fn check_target(&self, target: &Expr) -> ScriptResult<()> {
        if !target.is_assignable() {
            return Err(self.error("cannot assign to expression"));
        }
        if let Expr::Tuple(items) | Expr::List(items) = target {
            let starred = items.iter().filter(|i| matches!(i, Expr::Starred(_))).count();
            if starred > 1 {
                return Err(self.error("multiple starred expressions in assignment"));
            }
            for item in items {
                match item {
                    Expr::Starred(inner) => self.check_target(inner)?,
                    other => self.check_target(other)?,
                }
            }
        }
        Ok(())
    }

    fn target_list(&mut self) -> ScriptResult<Expr> {
        let first = self.target_item()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_kw("in") || self.check_op("=") {
                break;
            }
            items.push(self.target_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn target_item(&mut self) -> ScriptResult<Expr> {
        if self.eat_op("*") {
            Ok(Expr::Starred(Box::new(self.bit_or()?)))
        } else {
            self.bit_or()
        }
    }

    // ---- expressions ----

    fn testlist_star(&mut self) -> ScriptResult<Expr> {
        let first = self.star_or_test()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_expression_end() {
                break;
            }
            items.push(self.star_or_test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn star_or_test(&mut self) -> ScriptResult<Expr> {
        if self.eat_op("*") {
            Ok(Expr::Starred(Box::new(self.bit_or()?)))
        } else {
            self.test()
        }
    }

    fn test(&mut self) -> ScriptResult<Expr> {
        self.enter()?;
        let expr = if self.check_kw("lambda") {
            self.lambda()?
        } else {
            let body = self.or_test()?;
            if self.eat_kw("if") {
                let test = self.or_test()?;
                self.expect_kw("else")?;
                let orelse = self.test()?;
                Expr::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                }
            } else {
                body
            }
        };
        if self.check_op(":=") {
            return Err(self.error("assignment expressions (:=) are not supported"));
        }
        self.leave();
        Ok(expr)
    }

    fn lambda(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        self.expect_kw("lambda")?;
        let (params, vararg, kwarg) = self.parameters(":", false)?;
        self.expect_op(":")?;
        let body = self.test()?;
        Ok(Expr::Lambda(Rc::new(FunctionDef {
            name: "<lambda>".to_string(),
            line,
            params,
            vararg,
            kwarg,
            body: vec![Stmt {
                line,
                kind: StmtKind::Return(Some(body)),
            }],
        })))
    }

    fn or_test(&mut self) -> ScriptResult<Expr> {
        self.bool_chain("or", BoolOpKind::Or)
    }

    fn bool_chain(&mut self, keyword: &str, op: BoolOpKind) -> ScriptResult<Expr> {
        let first = match op {
            BoolOpKind::Or => self.bool_chain("and", BoolOpKind::And)?,
            BoolOpKind::And => self.not_test()?,
        };
        if !self.check_kw(keyword) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(keyword) {
            self.note_op()?;
            values.push(match op {
                BoolOpKind::Or => self.bool_chain("and", BoolOpKind::And)?,
                BoolOpKind::And => self.not_test()?,
            });
        }
        Ok(Expr::BoolOp { op, values })
    }

    fn not_test(&mut self) -> ScriptResult<Expr> {
        if self.eat_kw("not") {
            self.enter()?;
            let operand = self.not_test()?;
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> ScriptResult<Expr> {
        let left = self.bit_or()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Keyword("in") => CmpOp::In,
                Tok::Keyword("not") if matches!(self.peek_nth(1), Tok::Keyword("in")) => {
                    self.advance();
                    CmpOp::NotIn
                }
                Tok::Keyword("is") => {
                    if matches!(self.peek_nth(1), Tok::Keyword("not")) {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            self.note_op()?;
            ops.push(op);
            comparators.push(self.bit_or()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::Compare {
            left: Box::new(left),
            ops,
            comparators,
        })
    }

    fn bit_or(&mut self) -> ScriptResult<Expr> {
        self.binary_level(0)
    }

    fn binary_level(&mut self, level: usize) -> ScriptResult<Expr> {
        let Some(ops) = BINARY_LEVELS.get(level) else {
            return self.factor();
        };
        let mut left = self.binary_level(level + 1)?;
        loop {
            let op = match self.peek() {
                Tok::Op(o) => ops.iter().find(|(symbol, _)| *symbol == *o).map(|(_, op)| *op),
                _ => None,
            };
            let Some(op) = op else { break };
            self.advance();
            self.note_op()?;
            let right = self.binary_level(level + 1)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn factor(&mut self) -> ScriptResult<Expr> {
        let op = match self.peek() {
            Tok::Op("-") => Some(UnaryOp::Neg),
            Tok::Op("+") => Some(UnaryOp::Pos),
            Tok::Op("~") => Some(UnaryOp::Invert),
            _ => None,
        };
        let Some(op) = op else {
            return self.power();
        };
        self.advance();
        self.enter()?;
        let operand = self.factor()?;
        self.leave();

        if op == UnaryOp::Neg {
            match operand {
                Expr::Const(Const::Int(i)) if i != i64::MIN => return Ok(Expr::Const(Const::Int(-i))),
                Expr::Const(Const::Float(f)) => return Ok(Expr::Const(Const::Float(-f))),
                _ => {}
            }
        }
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> ScriptResult<Expr> {
        let base = self.primary()?;
        if self.eat_op("**") {
            self.note_op()?;
            self.enter()?;
            let exponent = self.factor()?;
            self.leave();
            return Ok(Expr::BinOp {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn primary(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                self.note_op()?;
                let args = self.call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else if self.eat_op("[") {
                self.note_op()?;
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_op(".") {
                self.note_op()?;
                let attr = self.expect_name()?;
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn subscript(&mut self) -> ScriptResult<Expr> {
        let first = self.slice_item()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("]") {
                break;
            }
            items.push(self.slice_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn slice_item(&mut self) -> ScriptResult<Expr> {
        let lower = if self.check_op(":") {
            None
        } else {
            let expr = self.test()?;
            if !self.check_op(":") {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect_op(":")?;
        let bound_end = |p: &Self| p.check_op(":") || p.check_op("]") || p.check_op(",");
        let upper = if bound_end(&*self) { None } else { Some(Box::new(self.test()?)) };
        let step = if self.eat_op(":") {
            if bound_end(&*self) {
                None
            } else {
                Some(Box::new(self.test()?))
            }
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn call_args(&mut self) -> ScriptResult<Vec<Arg>> {
        let mut args = Vec::new();
        while !self.check_op(")") {
            if self.eat_op("*") {
                args.push(Arg::Star(self.test()?));
            } else if self.eat_op("**") {
                args.push(Arg::DoubleStar(self.test()?));
            } else if matches!(self.peek(), Tok::Name(_)) && matches!(self.peek_nth(1), Tok::Op("=")) {
                let name = self.expect_name()?;
                self.advance();
                args.push(Arg::Keyword(name, self.test()?));
            } else {
                let value = self.test()?;
                if self.check_kw("for") {
                    let generators = self.comp_for()?;
                    args.push(Arg::Positional(Expr::Comp {
                        kind: CompKind::Generator,
                        elt: Box::new(value),
                        value: None,
                        generators,
                    }));
                } else {
                    args.push(Arg::Positional(value));
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(args)
    }

    fn comp_for(&mut self) -> ScriptResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.eat_kw("for") {
            let target = self.target_list()?;
            self.check_target(&target)?;
            self.expect_kw("in")?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw("if") {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        if self.check_kw("async") {
            return Err(self.error("async code is not supported"));
        }
        Ok(generators)
    }

    fn atom(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        match self.advance() {
            Tok::Name(name) => Ok(Expr::Name(name)),
            Tok::Int(i) => Ok(Expr::Const(Const::Int(i))),
            Tok::BigInt(b) => Ok(Expr::Const(Const::BigInt(b))),
            Tok::Float(f) => Ok(Expr::Const(Const::Float(f))),
            Tok::Keyword("True") => Ok(Expr::Const(Const::Bool(true))),
            Tok::Keyword("False") => Ok(Expr::Const(Const::Bool(false))),
            Tok::Keyword("None") => Ok(Expr::Const(Const::None)),
            tok @ (Tok::Str(_) | Tok::FStr { .. }) => self.strings(tok),
            Tok::Op("(") => self.paren(),
            Tok::Op("[") => self.list_display(),
            Tok::Op("{") => self.brace_display(),
            Tok::Op("...") => Err(ScriptError::syntax("Ellipsis is not supported", line)),
            Tok::Keyword("yield") => Err(ScriptError::syntax("'yield' is not supported", line)),
            Tok::Keyword("await") | Tok::Keyword("async") => {
                Err(ScriptError::syntax("async code is not supported", line))
            }
            other => Err(ScriptError::syntax(format!("invalid syntax near {}", describe(&other)), line)),
        }
    }

    fn strings(&mut self, first: Tok) -> ScriptResult<Expr> {
        let mut parts = Vec::new();
        let mut formatted = false;
        self.string_parts(first, &mut parts, &mut formatted)?;
        while matches!(self.peek(), Tok::Str(_) | Tok::FStr { .. }) {
            let tok = self.advance();
            self.string_parts(tok, &mut parts, &mut formatted)?;
        }

        if formatted {
            return Ok(Expr::FString(parts));
        }
        let mut text = String::new();
        for part in parts {
            if let FPart::Literal(s) = part {
                text.push_str(&s);
            }
        }
        Ok(Expr::Const(Const::Str(text)))
    }

    fn string_parts(&mut self, tok: Tok, parts: &mut Vec<FPart>, formatted: &mut bool) -> ScriptResult<()> {
        match tok {
            Tok::Str(s) => parts.push(FPart::Literal(s)),
            Tok::FStr { body, raw } => {
                *formatted = true;
                self.fstring(&body, raw, parts)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn fstring(&mut self, body: &str, raw: bool, parts: &mut Vec<FPart>) -> ScriptResult<()> {
        let chars: Vec<char> = body.chars().collect();
        let mut literal = String::new();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c == '}' {
                if chars.get(i + 1) == Some(&'}') {
                    literal.push('}');
                    i += 2;
                    continue;
                }
                return Err(self.error("f-string: single '}' is not allowed"));
            }
            if c != '{' {
                literal.push(c);
                i += 1;
                continue;
            }
            if chars.get(i + 1) == Some(&'{') {
                literal.push('{');
                i += 2;
                continue;
            }

            self.flush_literal(&mut literal, raw, parts)?;

            let start = i + 1;
            let mut j = start;
            let mut depth = 0usize;
            let mut quote: Option<char> = None;
            while j < chars.len() {
                let ch = chars[j];
                if let Some(q) = quote {
                    if ch == q {
                        quote = None;
                    }
                } else {
                    match ch {
                        '\'' | '"' => quote = Some(ch),
                        '(' | '[' | '{' => depth += 1,
                        ')' | ']' | '}' if depth > 0 => depth -= 1,
                        '}' | ':' if depth == 0 => break,
                        '!' if depth == 0 && chars.get(j + 1) != Some(&'=') => break,
                        _ => {}
                    }
                }
                j += 1;
            }
            if j >= chars.len() {
                return Err(self.error("f-string: expecting '}'"));
            }

            let text: String = chars[start..j].iter().collect();
            if text.trim().is_empty() {
                return Err(self.error("f-string: empty expression not allowed"));
            }

            let mut conversion = None;
            if chars[j] == '!' {
                match chars.get(j + 1).copied() {
                    Some(conv) if matches!(conv, 'r' | 's' | 'a') => {
                        conversion = Some(conv);
                        j += 2;
                    }
                    _ => return Err(self.error("f-string: invalid conversion character")),
                }
            }

            let mut spec = None;
            if chars.get(j) == Some(&':') {
                let spec_start = j + 1;
                let mut k = spec_start;
                while k < chars.len() && chars[k] != '}' {
                    if chars[k] == '{' {
                        return Err(self.error("f-string: nested replacement fields are not supported"));
                    }
                    k += 1;
                }
                spec = Some(chars[spec_start..k.min(chars.len())].iter().collect());
                j = k;
            }
            if chars.get(j) != Some(&'}') {
                return Err(self.error("f-string: expecting '}'"));
            }

            let expr = self.fragment(text.trim())?;
            parts.push(FPart::Value {
                expr: Box::new(expr),
                conversion,
                spec,
            });
            i = j + 1;
        }

        self.flush_literal(&mut literal, raw, parts)
    }

    fn flush_literal(&self, literal: &mut String, raw: bool, parts: &mut Vec<FPart>) -> ScriptResult<()> {
        if literal.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(literal);
        let text = if raw { text } else { unescape(&text).map_err(|m| self.error(m))? };
        parts.push(FPart::Literal(text));
        Ok(())
    }

    fn fragment(&mut self, text: &str) -> ScriptResult<Expr> {
        let line = self.line();
        let relocate = |mut e: ScriptError| {
            e.message = format!("f-string: {}", e.message);
            e.line = Some(line);
            e
        };
        let tokens = tokenize(text).map_err(relocate)?;
        let mut inner = Parser::new(tokens, self.depth);
        inner.enter().map_err(relocate)?;
        let expr = inner.testlist_star().map_err(relocate)?;
        if !matches!(inner.peek(), Tok::Newline | Tok::Eof) {
            return Err(self.error("f-string: invalid expression"));
        }
        Ok(expr)
    }

    fn paren(&mut self) -> ScriptResult<Expr> {
        if self.eat_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.star_or_test()?;
        if self.check_kw("for") {
            let generators = self.comp_for()?;
            self.expect_op(")")?;
            return Ok(Expr::Comp {
                kind: CompKind::Generator,
                elt: Box::new(first),
                value: None,
                generators,
            });
        }
        if self.eat_op(")") {
            if let Expr::Starred(_) = first {
                return Err(self.error("can't use starred expression here"));
            }
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op(")") {
                break;
            }
            items.push(self.star_or_test()?);
        }
        self.expect_op(")")?;
        Ok(Expr::Tuple(items))
    }

    fn list_display(&mut self) -> ScriptResult<Expr> {
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.star_or_test()?;
        if self.check_kw("for") {
            let generators = self.comp_for()?;
            self.expect_op("]")?;
            return Ok(Expr::Comp {
                kind: CompKind::List,
                elt: Box::new(first),
                value: None,
                generators,
            });
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("]") {
                break;
            }
            items.push(self.star_or_test()?);
        }
        self.expect_op("]")?;
        Ok(Expr::List(items))
    }

    fn brace_display(&mut self) -> ScriptResult<Expr> {
        if self.eat_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }
        if self.eat_op("**") {
            let mapping = self.bit_or()?;
            return self.dict_rest(vec![(None, mapping)]);
        }

        let first = self.star_or_test()?;
        if self.eat_op(":") {
            let value = self.test()?;
            if self.check_kw("for") {
                let generators = self.comp_for()?;
                self.expect_op("}")?;
                return Ok(Expr::Comp {
                    kind: CompKind::Dict,
                    elt: Box::new(first),
                    value: Some(Box::new(value)),
                    generators,
                });
            }
            return self.dict_rest(vec![(Some(first), value)]);
        }

        if self.check_kw("for") {
            let generators = self.comp_for()?;
            self.expect_op("}")?;
            return Ok(Expr::Comp {
                kind: CompKind::Set,
                elt: Box::new(first),
                value: None,
                generators,
            });
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("}") {
                break;
            }
            items.push(self.star_or_test()?);
        }
        self.expect_op("}")?;
        Ok(Expr::Set(items))
    }

    fn dict_rest(&mut self, mut entries: Vec<(Option<Expr>, Expr)>) -> ScriptResult<Expr> {
        while self.eat_op(",") {
            if self.check_op("}") {
                break;
            }
            if self.eat_op("**") {
                entries.push((None, self.bit_or()?));
            } else {
                let key = self.test()?;
                self.expect_op(":")?;
                let value = self.test()?;
                entries.push((Some(key), value));
            }
        }
        self.expect_op("}")?;
        Ok(Expr::Dict(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Module {
        parse_module(source).unwrap_or_else(|e| panic!("parse failed: {}", e))
    }

    fn parse_err(source: &str) -> String {
        parse_module(source).unwrap_err().to_string()
    }

    #[test]
    fn parses_function_with_defaults_and_star_args() {
        let module = parse("def f(a, b=2, *rest, key=None, **extra):\n    return a\n");
        let def = module.first_function().unwrap();
        assert_eq!(def.name, "f");
        assert_eq!(def.params.len(), 3);
        assert_eq!(def.vararg.as_deref(), Some("rest"));
        assert_eq!(def.kwarg.as_deref(), Some("extra"));
        assert!(def.params[2].kw_only);
        assert_eq!(def.positional_count(), 2);
    }

    #[test]
    fn elif_chain_nests_in_orelse() {
        let module = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        match &module.body[0].kind {
            StmtKind::If { orelse, .. } => {
                assert_eq!(orelse.len(), 1);
                assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn comprehensions_and_lambdas() {
        parse("squares = [x * x for x in range(10) if x % 2 == 0]\n");
        parse("pairs = {k: v for k, v in items}\n");
        parse("total = sum(x for x in data)\n");
        parse("key = lambda item: (item[1], -item[0])\n");
    }

    #[test]
    fn fstrings_with_conversion_and_spec() {
        let module = parse("s = f'{name!r}: {value:>8.2f} {{literal}}'\n");
        match &module.body[0].kind {
            StmtKind::Assign { value: Expr::FString(parts), .. } => {
                assert!(parts.iter().any(|p| matches!(p, FPart::Value { conversion: Some('r'), .. })));
                assert!(parts.iter().any(|p| matches!(p, FPart::Value { spec: Some(s), .. } if s == ">8.2f")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn slices_and_chained_comparisons() {
        parse("y = x[1:-1:2]\nz = x[::-1]\nok = 0 <= i < n\n");
    }

    #[test]
    fn imports_parse_but_are_statements() {
        let module = parse("import math\nfrom collections import deque, Counter\n");
        assert!(matches!(module.body[0].kind, StmtKind::Import(_)));
        assert!(matches!(module.body[1].kind, StmtKind::Import(_)));
    }

    #[test]
    fn rejects_unsupported_constructs_by_name() {
        assert!(parse_err("class A:\n    pass\n").contains("class"));
        assert!(parse_err("with x as y:\n    pass\n").contains("with"));
        assert!(parse_err("def g():\n    yield 1\n").contains("yield"));
        assert!(parse_err("@dec\ndef f():\n    pass\n").contains("decorators"));
        assert!(parse_err("if (n := 10) > 5:\n    pass\n").contains(":="));
    }

    #[test]
    fn reports_syntax_errors_with_line() {
        let err = parse_module("x = 1\ndef f(:\n    pass\n").unwrap_err();
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let source = format!("x = {}1{}\n", "(".repeat(200), ")".repeat(200));
        assert!(parse_err(&source).contains("nested"));
    }

    #[test]
    fn try_requires_handler_or_finally() {
        parse("try:\n    x = 1\nexcept (ValueError, KeyError) as e:\n    x = 2\nelse:\n    x = 3\nfinally:\n    x = 4\n");
        assert!(parse_module("try:\n    x = 1\nx = 2\n").is_err());
    }
}
