use std::fmt::Display;

use crate::lexer::Span;

/// A syntactic type annotation as written in the source. Conversion into a
/// semantic `Type` happens in the analyzer, where user aliases and
/// singleton names are resolved.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum TypeName {
    /// `int`, `str`, `MyAlias`, ...
    Literal(String, Span),
    /// `[T]`
    List(Box<TypeName>, Span),
    /// `{ name: T, ... }`
    Object(Vec<ObjectTypeField>, Span),
    /// `{ ? }` — the dynamic string→any map
    AnyObject(Span),
    /// `?T`
    Option(Box<TypeName>, Span),
    /// `fn(T, U) -> R`; a `..T` tail marks a variadic signature
    Function {
        params: Vec<TypeName>,
        variadic: Option<Box<TypeName>>,
        return_type: Option<Box<TypeName>>,
        span: Span,
    },
    /// `$Name` used in type position
    Singleton(String, Span),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ObjectTypeField {
    pub name: String,
    pub type_name: TypeName,
    pub span: Span,
}

impl TypeName {
    pub fn span(&self) -> Span {
        match self {
            TypeName::Literal(_, span)
            | TypeName::List(_, span)
            | TypeName::Object(_, span)
            | TypeName::AnyObject(span)
            | TypeName::Option(_, span)
            | TypeName::Function { span, .. }
            | TypeName::Singleton(_, span) => span.clone(),
        }
    }
}

impl Display for TypeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeName::Literal(name, _) => f.write_str(name),
            TypeName::List(inner, _) => write!(f, "[{inner}]"),
            TypeName::Object(fields, _) => {
                let fields = fields
                    .iter()
                    .map(|field| format!("{}: {}", field.name, field.type_name))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{{ {fields} }}")
            }
            TypeName::AnyObject(_) => f.write_str("{ ? }"),
            TypeName::Option(inner, _) => write!(f, "?{inner}"),
            TypeName::Function {
                params,
                variadic,
                return_type,
                ..
            } => {
                let mut params = params
                    .iter()
                    .map(|p| format!("{p}"))
                    .collect::<Vec<_>>();
                if let Some(variadic) = variadic {
                    params.push(format!("..{variadic}"));
                }
                write!(f, "fn({})", params.join(", "))?;
                if let Some(return_type) = return_type {
                    write!(f, " -> {return_type}")?;
                }
                Ok(())
            }
            TypeName::Singleton(name, _) => write!(f, "${name}"),
        }
    }
}
