use crate::lexer::Span;

use super::{Statement, TypeName};

/// Infix operators in source order of the precedence ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum InfixOperator {
    Plus,
    Minus,
    Multiply,
    Divide,
    Remainder,
    Power,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eq,
    NotEq,
    And,
    Or,
}

impl InfixOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            InfixOperator::Plus => "+",
            InfixOperator::Minus => "-",
            InfixOperator::Multiply => "*",
            InfixOperator::Divide => "/",
            InfixOperator::Remainder => "%",
            InfixOperator::Power => "**",
            InfixOperator::Shl => "<<",
            InfixOperator::Shr => ">>",
            InfixOperator::BitAnd => "&",
            InfixOperator::BitOr => "|",
            InfixOperator::BitXor => "^",
            InfixOperator::Lt => "<",
            InfixOperator::LtEq => "<=",
            InfixOperator::Gt => ">",
            InfixOperator::GtEq => ">=",
            InfixOperator::Eq => "==",
            InfixOperator::NotEq => "!=",
            InfixOperator::And => "&&",
            InfixOperator::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PrefixOperator {
    /// `-e` numeric negation
    Neg,
    /// `!e` boolean negation
    Not,
    /// `?e` wraps into `some(e)`
    Some,
}

/// Compound assignment operators desugar to their infix counterpart
/// applied to the previous value of the assignment place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AssignOperator {
    Assign,
    Plus,
    Minus,
    Multiply,
    Divide,
    Remainder,
    Power,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
}

impl AssignOperator {
    /// The infix operator a compound assignment reuses, if any.
    pub fn infix(&self) -> Option<InfixOperator> {
        match self {
            AssignOperator::Assign => None,
            AssignOperator::Plus => Some(InfixOperator::Plus),
            AssignOperator::Minus => Some(InfixOperator::Minus),
            AssignOperator::Multiply => Some(InfixOperator::Multiply),
            AssignOperator::Divide => Some(InfixOperator::Divide),
            AssignOperator::Remainder => Some(InfixOperator::Remainder),
            AssignOperator::Power => Some(InfixOperator::Power),
            AssignOperator::Shl => Some(InfixOperator::Shl),
            AssignOperator::Shr => Some(InfixOperator::Shr),
            AssignOperator::BitAnd => Some(InfixOperator::BitAnd),
            AssignOperator::BitOr => Some(InfixOperator::BitOr),
            AssignOperator::BitXor => Some(InfixOperator::BitXor),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Expression<T> {
    Int(IntLiteral<T>),
    Float(FloatLiteral<T>),
    Bool(BoolLiteral<T>),
    Str(StringLiteral<T>),
    Null(NullLiteral<T>),
    NoneLiteral(NoneLiteral<T>),
    Range(Box<RangeExpression<T>>),
    List(ListLiteral<T>),
    Object(ObjectLiteral<T>),
    FnLiteral(Box<FnLiteral<T>>),
    Ident(IdentExpression<T>),
    SingletonIdent(SingletonIdentExpression<T>),
    Grouped(Box<GroupedExpression<T>>),
    Prefix(Box<PrefixExpression<T>>),
    Infix(Box<InfixExpression<T>>),
    Assign(Box<AssignExpression<T>>),
    Call(Box<CallExpression<T>>),
    Index(Box<IndexExpression<T>>),
    Member(Box<MemberExpression<T>>),
    Cast(Box<CastExpression<T>>),
    Block(Box<Block<T>>),
    If(Box<IfExpression<T>>),
    Match(Box<MatchExpression<T>>),
    Try(Box<TryExpression<T>>),
}

impl<T> Expression<T>
where
    T: Clone,
{
    pub fn span(&self) -> Span {
        match self {
            Expression::Int(node) => node.span.clone(),
            Expression::Float(node) => node.span.clone(),
            Expression::Bool(node) => node.span.clone(),
            Expression::Str(node) => node.span.clone(),
            Expression::Null(node) => node.span.clone(),
            Expression::NoneLiteral(node) => node.span.clone(),
            Expression::Range(node) => node.span.clone(),
            Expression::List(node) => node.span.clone(),
            Expression::Object(node) => node.span.clone(),
            Expression::FnLiteral(node) => node.span.clone(),
            Expression::Ident(node) => node.span.clone(),
            Expression::SingletonIdent(node) => node.span.clone(),
            Expression::Grouped(node) => node.span.clone(),
            Expression::Prefix(node) => node.span.clone(),
            Expression::Infix(node) => node.span.clone(),
            Expression::Assign(node) => node.span.clone(),
            Expression::Call(node) => node.span.clone(),
            Expression::Index(node) => node.span.clone(),
            Expression::Member(node) => node.span.clone(),
            Expression::Cast(node) => node.span.clone(),
            Expression::Block(node) => node.span.clone(),
            Expression::If(node) => node.span.clone(),
            Expression::Match(node) => node.span.clone(),
            Expression::Try(node) => node.span.clone(),
        }
    }

    pub fn get_info(&self) -> T {
        match self {
            Expression::Int(node) => node.info.clone(),
            Expression::Float(node) => node.info.clone(),
            Expression::Bool(node) => node.info.clone(),
            Expression::Str(node) => node.info.clone(),
            Expression::Null(node) => node.info.clone(),
            Expression::NoneLiteral(node) => node.info.clone(),
            Expression::Range(node) => node.info.clone(),
            Expression::List(node) => node.info.clone(),
            Expression::Object(node) => node.info.clone(),
            Expression::FnLiteral(node) => node.info.clone(),
            Expression::Ident(node) => node.info.clone(),
            Expression::SingletonIdent(node) => node.info.clone(),
            Expression::Grouped(node) => node.info.clone(),
            Expression::Prefix(node) => node.info.clone(),
            Expression::Infix(node) => node.info.clone(),
            Expression::Assign(node) => node.info.clone(),
            Expression::Call(node) => node.info.clone(),
            Expression::Index(node) => node.info.clone(),
            Expression::Member(node) => node.info.clone(),
            Expression::Cast(node) => node.info.clone(),
            Expression::Block(node) => node.info.clone(),
            Expression::If(node) => node.info.clone(),
            Expression::Match(node) => node.info.clone(),
            Expression::Try(node) => node.info.clone(),
        }
    }

    /// Whether this expression carries its own block structure, in which
    /// case a trailing semicolon is optional in statement position.
    pub fn is_block_like(&self) -> bool {
        matches!(
            self,
            Expression::Block(_) | Expression::If(_) | Expression::Match(_) | Expression::Try(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IntLiteral<T> {
    pub value: i64,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FloatLiteral<T> {
    pub value: f64,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoolLiteral<T> {
    pub value: bool,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StringLiteral<T> {
    pub value: String,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NullLiteral<T> {
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NoneLiteral<T> {
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RangeExpression<T> {
    pub start: Expression<T>,
    pub end: Expression<T>,
    /// `..=` includes the upper bound, `..` excludes it.
    pub inclusive: bool,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ListLiteral<T> {
    pub elements: Vec<Expression<T>>,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ObjectLiteral<T> {
    pub fields: Vec<ObjectLiteralField<T>>,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ObjectLiteralField<T> {
    pub name: String,
    pub value: Expression<T>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FnLiteral<T> {
    pub params: Vec<super::Parameter>,
    pub return_type: Option<TypeName>,
    pub body: Block<T>,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IdentExpression<T> {
    pub name: String,
    /// Filled in by the analyzer: the name resolved to a module global.
    pub is_global: bool,
    /// Filled in by the analyzer: the name resolved to a module function.
    pub is_function: bool,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SingletonIdentExpression<T> {
    pub name: String,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GroupedExpression<T> {
    pub inner: Expression<T>,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PrefixExpression<T> {
    pub operator: PrefixOperator,
    pub operand: Expression<T>,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InfixExpression<T> {
    pub operator: InfixOperator,
    pub left: Expression<T>,
    pub right: Expression<T>,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AssignExpression<T> {
    pub place: Expression<T>,
    pub operator: AssignOperator,
    pub value: Expression<T>,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CallExpression<T> {
    pub callee: Expression<T>,
    pub args: Vec<Expression<T>>,
    /// `spawn f(...)` runs the call as a fire-and-forget task.
    pub is_spawn: bool,
    /// Filled in by the analyzer: the callee is a plain module-level
    /// function (enables direct dispatch in the backends).
    pub is_normal_function: bool,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IndexExpression<T> {
    pub base: Expression<T>,
    pub index: Expression<T>,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MemberExpression<T> {
    pub base: Expression<T>,
    pub member: String,
    pub member_span: Span,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CastExpression<T> {
    pub base: Expression<T>,
    pub type_name: TypeName,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Block<T> {
    pub statements: Vec<Statement<T>>,
    /// A trailing expression without semicolon is the block's value.
    pub trailing: Option<Expression<T>>,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IfExpression<T> {
    pub condition: Expression<T>,
    pub then_block: Block<T>,
    /// Either another `If` (an `else if` chain) or a `Block`.
    pub else_branch: Option<Expression<T>>,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MatchExpression<T> {
    pub control: Expression<T>,
    pub arms: Vec<MatchArm<T>>,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MatchArm<T> {
    pub pattern: MatchPattern<T>,
    pub body: Expression<T>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum MatchPattern<T> {
    Literal(Expression<T>),
    /// `_` makes the match total.
    Wildcard(Span),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TryExpression<T> {
    pub try_block: Block<T>,
    pub catch_ident: String,
    pub catch_block: Block<T>,
    pub info: T,
    pub span: Span,
}
