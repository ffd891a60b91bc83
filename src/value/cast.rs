//! Deep structural casts.
//!
//! `value as T` converts recursively: scalars use the defined coercions
//! (`bool` ↔ 0/1, `int` ↔ `float` lossy), `object` → `{ ? }` is an
//! erasure view onto the same storage, `{ ? }` → object converts field
//! by field with name equality, lists map elementwise, and casting into
//! `?T` wraps non-option values (with `null` becoming `none`).
//! Structurally incompatible casts fail with a catchable `CastError`
//! carrying the cast's span.

use std::rc::Rc;

use crate::analyzer::types::Type;
use crate::diagnostic::ErrorCode;
use crate::interrupt::{ExecResult, Interrupt};
use crate::lexer::Span;

use super::Value;

fn cast_error(value: &Value, target: &Type, span: &Span, detail: &str) -> Interrupt {
    let detail = if detail.is_empty() {
        String::new()
    } else {
        format!(": {detail}")
    };
    Interrupt::throw(
        ErrorCode::CastError,
        format!(
            "cannot cast a value of type '{}' to '{target}'{detail}",
            value.kind()
        ),
        span.clone(),
    )
}

/// Recursively convert `value` to `target`. Idempotent: casting the
/// result to the same target yields a structurally equal value.
pub fn deep_cast(value: &Value, target: &Type, span: &Span) -> ExecResult<Value> {
    match target {
        Type::Any | Type::Unknown | Type::Never => return Ok(value.clone()),
        Type::Option(inner) => {
            return match value {
                Value::Null => Ok(Value::none()),
                Value::Option(None) => Ok(Value::none()),
                Value::Option(Some(boxed)) => {
                    Ok(Value::some(deep_cast(boxed, inner, span)?))
                }
                other => Ok(Value::some(deep_cast(other, inner, span)?)),
            };
        }
        _ => {}
    }

    match (value, target) {
        (Value::Null, Type::Null) => Ok(Value::Null),

        (Value::Int(v), Type::Int) => Ok(Value::Int(*v)),
        (Value::Int(v), Type::Float) => Ok(Value::Float(*v as f64)),
        (Value::Int(0), Type::Bool) => Ok(Value::Bool(false)),
        (Value::Int(1), Type::Bool) => Ok(Value::Bool(true)),
        (Value::Int(_), Type::Bool) => {
            Err(cast_error(value, target, span, "only 0 and 1 convert to bool"))
        }

        (Value::Float(v), Type::Float) => Ok(Value::Float(*v)),
        (Value::Float(v), Type::Int) => Ok(Value::Int(*v as i64)),
        (Value::Float(v), Type::Bool) if *v == 0.0 => Ok(Value::Bool(false)),
        (Value::Float(v), Type::Bool) if *v == 1.0 => Ok(Value::Bool(true)),
        (Value::Float(_), Type::Bool) => {
            Err(cast_error(value, target, span, "only 0 and 1 convert to bool"))
        }

        (Value::Bool(v), Type::Bool) => Ok(Value::Bool(*v)),
        (Value::Bool(v), Type::Int) => Ok(Value::Int(i64::from(*v))),
        (Value::Bool(v), Type::Float) => Ok(Value::Float(if *v { 1.0 } else { 0.0 })),

        (Value::String(v), Type::String) => Ok(Value::String(v.clone())),
        (Value::Range { .. }, Type::Range) => Ok(value.clone()),

        (Value::List(list), Type::List(inner)) => {
            let mut elements = vec![];
            for element in list.borrow().iter() {
                elements.push(deep_cast(element, inner, span)?);
            }
            Ok(Value::new_list(elements))
        }

        // erasure view: the cast aliases the same storage
        (Value::Object(map) | Value::AnyObject(map), Type::AnyObject) => {
            Ok(Value::AnyObject(Rc::clone(map)))
        }

        // field-by-field with name equality; the tree interpreter's
        // semantics, shared by both backends
        (Value::Object(map) | Value::AnyObject(map), Type::Object(fields)) => {
            let map = map.borrow();
            if map.len() != fields.len() {
                return Err(cast_error(
                    value,
                    target,
                    span,
                    "field sets do not match",
                ));
            }
            let mut converted = vec![];
            for field in fields {
                let Some(inner) = map.get(&field.name) else {
                    return Err(cast_error(
                        value,
                        target,
                        span,
                        &format!("missing field '{}'", field.name),
                    ));
                };
                converted.push((field.name.clone(), deep_cast(inner, &field.type_id, span)?));
            }
            Ok(Value::new_object(converted))
        }

        (value, Type::Function(_)) if value.is_callable() => Ok(value.clone()),
        (value, Type::Singleton(_)) => Ok(value.clone()),

        _ => Err(cast_error(value, target, span, "")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::types::ObjectField;

    fn cast(value: &Value, target: &Type) -> ExecResult<Value> {
        deep_cast(value, target, &Span::default())
    }

    #[test]
    fn test_scalar_coercions() {
        assert_eq!(cast(&Value::Int(2), &Type::Float).unwrap(), Value::Float(2.0));
        assert_eq!(cast(&Value::Float(2.7), &Type::Int).unwrap(), Value::Int(2));
        assert_eq!(cast(&Value::Bool(true), &Type::Int).unwrap(), Value::Int(1));
        assert_eq!(cast(&Value::Int(1), &Type::Bool).unwrap(), Value::Bool(true));
        assert!(cast(&Value::Int(2), &Type::Bool).is_err());
    }

    #[test]
    fn test_null_to_option_is_none() {
        assert_eq!(
            cast(&Value::Null, &Type::Option(Box::new(Type::Int))).unwrap(),
            Value::none()
        );
    }

    #[test]
    fn test_wrap_into_option() {
        assert_eq!(
            cast(&Value::Int(3), &Type::Option(Box::new(Type::Float))).unwrap(),
            Value::some(Value::Float(3.0))
        );
    }

    #[test]
    fn test_list_cast_is_elementwise() {
        let list = Value::new_list(vec![Value::Int(1), Value::Int(2)]);
        let casted = cast(&list, &Type::List(Box::new(Type::Float))).unwrap();
        assert_eq!(
            casted,
            Value::new_list(vec![Value::Float(1.0), Value::Float(2.0)])
        );
    }

    #[test]
    fn test_object_erasure_aliases_storage() {
        let object = Value::new_object(vec![("a".to_string(), Value::Int(1))]);
        let erased = cast(&object, &Type::AnyObject).unwrap();
        if let Value::AnyObject(map) = &erased {
            map.borrow_mut().insert("a".to_string(), Value::Int(2));
        }
        // the original observes the mutation through the view
        if let Value::Object(map) = &object {
            assert_eq!(map.borrow().get("a"), Some(&Value::Int(2)));
        }
    }

    #[test]
    fn test_any_object_to_object_checks_fields() {
        let dynamic = Value::new_any_object(vec![("a".to_string(), Value::Int(1))]);
        let target = Type::Object(vec![ObjectField {
            name: "a".to_string(),
            type_id: Type::Float,
        }]);
        assert_eq!(
            cast(&dynamic, &target).unwrap(),
            Value::new_object(vec![("a".to_string(), Value::Float(1.0))])
        );

        let wrong = Value::new_any_object(vec![("b".to_string(), Value::Int(1))]);
        assert!(cast(&wrong, &target).is_err());
    }

    #[test]
    fn test_deep_cast_idempotent() {
        let list = Value::new_list(vec![Value::Int(1), Value::Bool(true)]);
        let target = Type::List(Box::new(Type::Float));
        let once = cast(&list, &target).unwrap();
        let twice = cast(&once, &target).unwrap();
        assert!(once.is_equal(&twice));
    }
}
