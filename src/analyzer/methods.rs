//! Static signatures of the per-kind builtin methods.
//!
//! The runtime dispatch lives in `value::fields`; the two tables must
//! stay in sync, which the integration tests exercise by calling every
//! method through both backends.

use super::types::{FunctionType, Type};

/// The type of `base.member` for the fixed per-kind method tables.
/// Returns `None` for unknown members.
pub fn builtin_member_type(base: &Type, member: &str) -> Option<Type> {
    let function = |params: Vec<(&str, Type)>, ret: Type| {
        Some(Type::Function(Box::new(FunctionType::new(
            params
                .into_iter()
                .map(|(name, type_id)| (name.to_string(), type_id))
                .collect(),
            ret,
        ))))
    };

    match base {
        Type::String => match member {
            "len" => function(vec![], Type::Int),
            "replace" => function(
                vec![("from", Type::String), ("to", Type::String)],
                Type::String,
            ),
            "repeat" => function(vec![("count", Type::Int)], Type::String),
            "split" => function(
                vec![("separator", Type::String)],
                Type::List(Box::new(Type::String)),
            ),
            "contains" => function(vec![("needle", Type::String)], Type::Bool),
            "to_lower" => function(vec![], Type::String),
            "to_upper" => function(vec![], Type::String),
            "parse_int" => function(vec![], Type::Option(Box::new(Type::Int))),
            "parse_float" => function(vec![], Type::Option(Box::new(Type::Float))),
            "parse_bool" => function(vec![], Type::Option(Box::new(Type::Bool))),
            "parse_json" => function(vec![], Type::Any),
            "compare_lev" => function(vec![("other", Type::String)], Type::Int),
            _ => None,
        },
        Type::List(element) => {
            let element = (**element).clone();
            match member {
                "len" => function(vec![], Type::Int),
                "contains" => function(vec![("element", element)], Type::Bool),
                "concat" => function(
                    vec![("other", Type::List(Box::new(element.clone())))],
                    Type::List(Box::new(element)),
                ),
                "join" => function(vec![("separator", Type::String)], Type::String),
                "push" => function(vec![("element", element)], Type::Null),
                "pop" => function(vec![], Type::Option(Box::new(element))),
                "push_front" => function(vec![("element", element)], Type::Null),
                "pop_front" => function(vec![], Type::Option(Box::new(element))),
                "insert" => function(
                    vec![("index", Type::Int), ("element", element)],
                    Type::Null,
                ),
                "remove" => function(vec![("index", Type::Int)], Type::Null),
                "last" => function(vec![], Type::Option(Box::new(element))),
                "sort" => function(vec![], Type::Null),
                "to_json" => function(vec![], Type::String),
                "to_json_indent" => function(vec![], Type::String),
                _ => None,
            }
        }
        Type::Object(_) => match member {
            "keys" => function(vec![], Type::List(Box::new(Type::String))),
            "to_json" => function(vec![], Type::String),
            "to_json_indent" => function(vec![], Type::String),
            _ => None,
        },
        Type::AnyObject => match member {
            "keys" => function(vec![], Type::List(Box::new(Type::String))),
            "get" => function(vec![("key", Type::String)], Type::Option(Box::new(Type::Any))),
            "set" => function(vec![("key", Type::String), ("value", Type::Any)], Type::Null),
            "to_json" => function(vec![], Type::String),
            "to_json_indent" => function(vec![], Type::String),
            _ => None,
        },
        Type::Range => match member {
            "start" => function(vec![], Type::Int),
            "end" => function(vec![], Type::Int),
            "rev" => function(vec![], Type::Range),
            "diff" => function(vec![], Type::Int),
            _ => None,
        },
        Type::Option(inner) => {
            let inner = (**inner).clone();
            match member {
                "is_some" => function(vec![], Type::Bool),
                "is_none" => function(vec![], Type::Bool),
                "unwrap" => function(vec![], inner),
                "unwrap_or" => function(vec![("fallback", inner.clone())], inner),
                "expect" => function(vec![("message", Type::String)], inner),
                "to_string" => function(vec![], Type::String),
                _ => None,
            }
        }
        Type::Int => match member {
            "to_string" => function(vec![], Type::String),
            "to_range" => function(vec![], Type::Range),
            _ => None,
        },
        Type::Float => match member {
            "to_string" => function(vec![], Type::String),
            "is_int" => function(vec![], Type::Bool),
            "trunc" => function(vec![], Type::Int),
            "round" => function(vec![], Type::Int),
            _ => None,
        },
        Type::Bool => match member {
            "to_string" => function(vec![], Type::String),
            _ => None,
        },
        _ => None,
    }
}

/// Element kinds `[T].sort()` is defined for (insertion sort semantics).
pub fn sortable_element(element: &Type) -> bool {
    matches!(
        element,
        Type::Int | Type::Float | Type::String | Type::Unknown | Type::Never
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_methods_are_element_typed() {
        let list = Type::List(Box::new(Type::Int));
        let Some(Type::Function(pop)) = builtin_member_type(&list, "pop") else {
            panic!("expected a function type");
        };
        assert_eq!(pop.return_type, Type::Option(Box::new(Type::Int)));
    }

    #[test]
    fn test_option_unwrap() {
        let option = Type::Option(Box::new(Type::String));
        let Some(Type::Function(unwrap)) = builtin_member_type(&option, "unwrap") else {
            panic!("expected a function type");
        };
        assert_eq!(unwrap.return_type, Type::String);
    }

    #[test]
    fn test_unknown_member() {
        assert!(builtin_member_type(&Type::Int, "frobnicate").is_none());
    }
}
