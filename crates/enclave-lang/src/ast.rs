//! Owned AST for the sandboxed language subset.
//!
//! Every node carries a [`Span`] so the validator can report precise
//! locations and snippets. The `IterationCheckpoint` statement and
//! `AllocDebit` expression variants are produced only by the
//! instrumentation pass, never by the parser.

use crate::span::Span;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Let,
    Const,
    Var,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub pattern: Pattern,
    pub init: Option<Expr>,
    pub span: Span,
}

/// Binding / destructuring patterns.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Ident { name: String, span: Span },
    Array { elements: Vec<Option<PatternElem>>, span: Span },
    Object { props: Vec<ObjectPatternProp>, span: Span },
}

impl Pattern {
    pub fn span(&self) -> Span {
        match self {
            Pattern::Ident { span, .. } => *span,
            Pattern::Array { span, .. } => *span,
            Pattern::Object { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternElem {
    pub pattern: Pattern,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPatternProp {
    pub key: PropKey,
    pub binding: Pattern,
    pub default: Option<Expr>,
    pub span: Span,
}

/// Property keys in object literals and object patterns.
#[derive(Debug, Clone, PartialEq)]
pub enum PropKey {
    Ident(String),
    Str(String),
    Num(f64),
    Computed(Box<Expr>),
}

impl PropKey {
    /// Statically-known key name, if any.
    pub fn literal_name(&self) -> Option<String> {
        match self {
            PropKey::Ident(name) | PropKey::Str(name) => Some(name.clone()),
            PropKey::Num(n) => Some(crate::ast::number_to_key(*n)),
            PropKey::Computed(_) => None,
        }
    }
}

/// Canonical property-key spelling of a number (mirrors JS ToString for
/// the integer cases that appear as keys).
pub fn number_to_key(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// `None` for arrows and anonymous function expressions
    pub name: Option<String>,
    pub params: Vec<PatternElem>,
    pub body: Vec<Stmt>,
    /// Body was a bare expression (`x => x + 1`); `body` holds a single Return
    pub expression_body: bool,
    pub is_arrow: bool,
    pub is_async: bool,
    pub is_generator: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr { expr: Expr, span: Span },
    VarDecl { kind: DeclKind, decls: Vec<Declarator>, span: Span },
    FunctionDecl { func: Box<Function>, span: Span },
    Return { arg: Option<Expr>, span: Span },
    If { test: Expr, consequent: Box<Stmt>, alternate: Option<Box<Stmt>>, span: Span },
    Block { body: Vec<Stmt>, span: Span },
    While { test: Expr, body: Box<Stmt>, span: Span },
    DoWhile { body: Box<Stmt>, test: Expr, span: Span },
    For {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
        span: Span,
    },
    ForOf {
        decl_kind: Option<DeclKind>,
        pattern: Pattern,
        iterable: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    ForIn {
        decl_kind: Option<DeclKind>,
        pattern: Pattern,
        object: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    Break { span: Span },
    Continue { span: Span },
    Throw { arg: Expr, span: Span },
    Try {
        block: Vec<Stmt>,
        param: Option<Pattern>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
        span: Span,
    },
    Empty { span: Span },
    /// Inserted at loop-body heads by the instrumentation pass
    IterationCheckpoint,
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr { span, .. }
            | Stmt::VarDecl { span, .. }
            | Stmt::FunctionDecl { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::If { span, .. }
            | Stmt::Block { span, .. }
            | Stmt::While { span, .. }
            | Stmt::DoWhile { span, .. }
            | Stmt::For { span, .. }
            | Stmt::ForOf { span, .. }
            | Stmt::ForIn { span, .. }
            | Stmt::Break { span }
            | Stmt::Continue { span }
            | Stmt::Throw { span, .. }
            | Stmt::Try { span, .. }
            | Stmt::Empty { span } => *span,
            Stmt::IterationCheckpoint => Span::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    VarDecl { kind: DeclKind, decls: Vec<Declarator> },
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Minus,
    Plus,
    Not,
    BitNot,
    Typeof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Exp,
    EqLoose,
    NeLoose,
    EqStrict,
    NeStrict,
    Lt,
    Gt,
    LtEq,
    GtEq,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Exp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Incr,
    Decr,
}

/// Assignment targets; `Pattern` covers destructuring assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Ident { name: String, span: Span },
    Member {
        object: Box<Expr>,
        property: MemberProp,
        span: Span,
    },
    Pattern(Pattern),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberProp {
    Ident(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayElem {
    Expr(Expr),
    Spread(Expr),
    Hole,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectProp {
    KeyValue { key: PropKey, value: Expr, span: Span },
    Shorthand { name: String, span: Span },
    Spread { arg: Expr, span: Span },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Expr(Expr),
    Spread(Expr),
}

/// Allocation classes debited by instrumented expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocKind {
    /// Debit by the produced string's length
    StringResult,
    /// Debit by the produced array's length
    ArrayResult,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number { value: f64, span: Span },
    BigInt { value: i128, span: Span },
    Str { value: String, span: Span },
    Bool { value: bool, span: Span },
    Null { span: Span },
    Undefined { span: Span },
    Template { quasis: Vec<String>, exprs: Vec<Expr>, span: Span },
    TaggedTemplate { tag: Box<Expr>, quasis: Vec<String>, exprs: Vec<Expr>, span: Span },
    Regex { pattern: String, flags: String, span: Span },
    Ident { name: String, span: Span },
    Array { elements: Vec<ArrayElem>, span: Span },
    Object { props: Vec<ObjectProp>, span: Span },
    Function { func: Box<Function>, span: Span },
    Unary { op: UnaryOp, arg: Box<Expr>, span: Span },
    Update { op: UpdateOp, prefix: bool, target: Box<AssignTarget>, span: Span },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr>, span: Span },
    Logical { op: LogicalOp, left: Box<Expr>, right: Box<Expr>, span: Span },
    Assign { op: AssignOp, target: AssignTarget, value: Box<Expr>, span: Span },
    Cond { test: Box<Expr>, consequent: Box<Expr>, alternate: Box<Expr>, span: Span },
    Call { callee: Box<Expr>, args: Vec<Arg>, optional: bool, span: Span },
    New { callee: Box<Expr>, args: Vec<Arg>, span: Span },
    Member { object: Box<Expr>, property: MemberProp, optional: bool, span: Span },
    Await { arg: Box<Expr>, span: Span },
    Yield { arg: Option<Box<Expr>>, span: Span },
    /// Inserted by the instrumentation pass around allocation-producing
    /// expressions; evaluates `inner`, then debits by the result size
    AllocDebit { kind: AllocKind, inner: Box<Expr> },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Number { span, .. }
            | Expr::BigInt { span, .. }
            | Expr::Str { span, .. }
            | Expr::Bool { span, .. }
            | Expr::Null { span }
            | Expr::Undefined { span }
            | Expr::Template { span, .. }
            | Expr::TaggedTemplate { span, .. }
            | Expr::Regex { span, .. }
            | Expr::Ident { span, .. }
            | Expr::Array { span, .. }
            | Expr::Object { span, .. }
            | Expr::Function { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Update { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Logical { span, .. }
            | Expr::Assign { span, .. }
            | Expr::Cond { span, .. }
            | Expr::Call { span, .. }
            | Expr::New { span, .. }
            | Expr::Member { span, .. }
            | Expr::Await { span, .. }
            | Expr::Yield { span, .. } => *span,
            Expr::AllocDebit { inner, .. } => inner.span(),
        }
    }
}
