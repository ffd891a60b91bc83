use crate::lexer::Span;

use super::{Block, LetStatement, TypeName};

/// A parsed module: a named list of top level items.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Program<T> {
    pub name: String,
    pub items: Vec<Item<T>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Item<T> {
    Import(ImportItem),
    Singleton(SingletonDecl),
    TypeAlias(TypeAlias),
    /// A module global; its initializer is evaluated lazily on first use.
    Global(LetStatement<T>),
    Function(FunctionDefinition<T>),
    Impl(ImplBlock<T>),
}

impl<T> Item<T>
where
    T: Clone,
{
    pub fn span(&self) -> Span {
        match self {
            Item::Import(node) => node.span.clone(),
            Item::Singleton(node) => node.span.clone(),
            Item::TypeAlias(node) => node.span.clone(),
            Item::Global(node) => node.span.clone(),
            Item::Function(node) => node.span.clone(),
            Item::Impl(node) => node.span.clone(),
        }
    }
}

/// `import { a, type B } from module;`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImportItem {
    pub module: String,
    pub module_span: Span,
    pub symbols: Vec<ImportSymbol>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImportSymbol {
    /// Prefixed with the `type` keyword in the import list.
    pub type_import: bool,
    pub name: String,
    pub span: Span,
}

/// `let $Name: Type;` — a host-backed, process-lifetime value. The host
/// provides the initial value at module load.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SingletonDecl {
    pub name: String,
    pub type_name: TypeName,
    pub span: Span,
}

/// `type Name = T;`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TypeAlias {
    pub name: String,
    pub type_name: TypeName,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Parameter {
    pub name: String,
    pub type_name: Option<TypeName>,
    /// `@Name binding` — the runtime binds this parameter to the named
    /// singleton's current value at call time. Extractor parameters must
    /// precede ordinary ones.
    pub singleton_extractor: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionDefinition<T> {
    pub name: String,
    pub params: Vec<Parameter>,
    pub return_type: Option<TypeName>,
    pub body: Block<T>,
    pub is_pub: bool,
    pub is_event: bool,
    pub info: T,
    pub span: Span,
}

/// `impl Template with { cap, ... } for $Singleton { fns }`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImplBlock<T> {
    pub template: String,
    pub template_span: Span,
    pub capabilities: Vec<String>,
    pub singleton: String,
    pub singleton_span: Span,
    pub functions: Vec<FunctionDefinition<T>>,
    pub span: Span,
}
