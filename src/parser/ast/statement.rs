use crate::lexer::Span;

use super::{Block, Expression, TypeName};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Statement<T> {
    Let(LetStatement<T>),
    Return(ReturnStatement<T>),
    Break(BreakStatement),
    Continue(ContinueStatement),
    Loop(LoopStatement<T>),
    While(WhileStatement<T>),
    For(ForStatement<T>),
    Trigger(TriggerStatement<T>),
    Expression(ExpressionStatement<T>),
}

impl<T> Statement<T>
where
    T: Clone,
{
    pub fn span(&self) -> Span {
        match self {
            Statement::Let(node) => node.span.clone(),
            Statement::Return(node) => node.span.clone(),
            Statement::Break(node) => node.span.clone(),
            Statement::Continue(node) => node.span.clone(),
            Statement::Loop(node) => node.span.clone(),
            Statement::While(node) => node.span.clone(),
            Statement::For(node) => node.span.clone(),
            Statement::Trigger(node) => node.span.clone(),
            Statement::Expression(node) => node.span.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LetStatement<T> {
    pub ident: String,
    pub type_name: Option<TypeName>,
    pub value: Expression<T>,
    pub info: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReturnStatement<T> {
    pub value: Option<Expression<T>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BreakStatement {
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ContinueStatement {
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LoopStatement<T> {
    pub body: Block<T>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WhileStatement<T> {
    pub condition: Expression<T>,
    pub body: Block<T>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ForStatement<T> {
    pub ident: String,
    pub iterable: Expression<T>,
    pub body: Block<T>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TriggerMode {
    On,
    At,
}

/// Declarative subscription of a callback to a host-emitted event. The
/// core pipeline only parses and type checks it; dispatch is host business.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TriggerStatement<T> {
    pub callee: String,
    pub callee_span: Span,
    pub args: Vec<Expression<T>>,
    pub mode: TriggerMode,
    pub event: Expression<T>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExpressionStatement<T> {
    pub expression: Expression<T>,
    pub span: Span,
}
