use std::rc::Rc;

use num_bigint::BigInt;

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone)]
pub struct Module {
    pub body: Block,
}

impl Module {
    /// The first function defined directly at the top level.
    pub fn first_function(&self) -> Option<&FunctionDef> {
        self.body.iter().find_map(|stmt| match &stmt.kind {
            StmtKind::FunctionDef(def) => Some(def.as_ref()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    FunctionDef(Rc<FunctionDef>),
    Return(Option<Expr>),
    Assign { targets: Vec<Expr>, value: Expr },
    AugAssign { target: Expr, op: BinOp, value: Expr },
    Expr(Expr),
    If { test: Expr, body: Block, orelse: Block },
    While { test: Expr, body: Block, orelse: Block },
    For { target: Expr, iter: Expr, body: Block, orelse: Block },
    Try { body: Block, handlers: Vec<Handler>, orelse: Block, finalbody: Block },
    Raise(Option<Expr>),
    Assert { test: Expr, msg: Option<Expr> },
    Delete(Vec<Expr>),
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Import(Vec<String>),
    Break,
    Continue,
    Pass,
}

#[derive(Debug, Clone)]
pub struct Handler {
    pub line: usize,
    pub kind: Option<Expr>,
    pub name: Option<String>,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub line: usize,
    pub params: Vec<Param>,
    pub vararg: Option<String>,
    pub kwarg: Option<String>,
    pub body: Block,
}

impl FunctionDef {
    pub fn positional_count(&self) -> usize {
        self.params.iter().filter(|p| !p.kw_only).count()
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
    pub kw_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    MatMul,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "** or pow()",
            BinOp::MatMul => "@",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitAnd => "&",
        }
    }

    /// Operator for an augmented assignment token such as `+=`.
    pub fn from_augmented(op: &str) -> Option<BinOp> {
        let op = match op {
            "+=" => BinOp::Add,
            "-=" => BinOp::Sub,
            "*=" => BinOp::Mul,
            "/=" => BinOp::Div,
            "//=" => BinOp::FloorDiv,
            "%=" => BinOp::Mod,
            "**=" => BinOp::Pow,
            "@=" => BinOp::MatMul,
            "<<=" => BinOp::LShift,
            ">>=" => BinOp::RShift,
            "|=" => BinOp::BitOr,
            "^=" => BinOp::BitXor,
            "&=" => BinOp::BitAnd,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Invert,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    None,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompKind {
    List,
    Set,
    Dict,
    /// Generator expressions are evaluated eagerly into a list.
    Generator,
}

#[derive(Debug, Clone)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub enum Arg {
    Positional(Expr),
    Star(Expr),
    Keyword(String, Expr),
    DoubleStar(Expr),
}

#[derive(Debug, Clone)]
pub enum FPart {
    Literal(String),
    Value {
        expr: Box<Expr>,
        conversion: Option<char>,
        spec: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub enum Expr {
    Const(Const),
    Name(String),
    FString(Vec<FPart>),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    /// `None` keys are `**mapping` entries.
    Dict(Vec<(Option<Expr>, Expr)>),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOpKind,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Arg>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda(Rc<FunctionDef>),
    Comp {
        kind: CompKind,
        elt: Box<Expr>,
        value: Option<Box<Expr>>,
        generators: Vec<Comprehension>,
    },
    Starred(Box<Expr>),
}

impl Expr {
    pub fn is_assignable(&self) -> bool {
        match self {
            Expr::Name(_) | Expr::Subscript { .. } | Expr::Attribute { .. } => true,
            Expr::Tuple(items) | Expr::List(items) => items.iter().all(|item| match item {
                Expr::Starred(inner) => inner.is_assignable(),
                other => other.is_assignable(),
            }),
            _ => false,
        }
    }
}
