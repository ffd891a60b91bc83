//! JSON bridge.
//!
//! Marshalling produces objects, arrays and scalars; function-valued
//! object fields are skipped. Unmarshalling maps JSON `null` to `none`,
//! integral numbers to `int`, non-integral numbers to `float`, objects
//! to objects and arrays to lists.

use serde_json::{Map, Number};

use crate::diagnostic::ErrorCode;
use crate::interrupt::{ExecResult, Interrupt};
use crate::lexer::Span;

use super::Value;

pub fn to_json(value: &Value, span: &Span) -> ExecResult<String> {
    let json = marshal(value, span)?;
    serde_json::to_string(&json)
        .map_err(|err| Interrupt::throw(ErrorCode::JsonError, err.to_string(), span.clone()))
}

pub fn to_json_indent(value: &Value, span: &Span) -> ExecResult<String> {
    let json = marshal(value, span)?;
    serde_json::to_string_pretty(&json)
        .map_err(|err| Interrupt::throw(ErrorCode::JsonError, err.to_string(), span.clone()))
}

pub fn parse_json(input: &str, span: &Span) -> ExecResult<Value> {
    let json: serde_json::Value = serde_json::from_str(input)
        .map_err(|err| Interrupt::throw(ErrorCode::JsonError, err.to_string(), span.clone()))?;
    Ok(unmarshal(&json))
}

pub fn marshal(value: &Value, span: &Span) -> ExecResult<serde_json::Value> {
    let json = match value {
        Value::Null => serde_json::Value::Null,
        Value::Int(v) => serde_json::Value::Number((*v).into()),
        Value::Float(v) => match Number::from_f64(*v) {
            Some(number) => serde_json::Value::Number(number),
            None => {
                return Err(Interrupt::throw(
                    ErrorCode::JsonError,
                    format!("'{v}' has no JSON representation"),
                    span.clone(),
                ))
            }
        },
        Value::Bool(v) => serde_json::Value::Bool(*v),
        Value::String(v) => serde_json::Value::String(v.clone()),
        Value::Range {
            start,
            end,
            inclusive,
        } => {
            let mut map = Map::new();
            map.insert("start".to_string(), serde_json::Value::Number((*start).into()));
            map.insert("end".to_string(), serde_json::Value::Number((*end).into()));
            map.insert("inclusive".to_string(), serde_json::Value::Bool(*inclusive));
            serde_json::Value::Object(map)
        }
        Value::List(list) => {
            let mut elements = vec![];
            for element in list.borrow().iter() {
                elements.push(marshal(element, span)?);
            }
            serde_json::Value::Array(elements)
        }
        Value::Object(map) | Value::AnyObject(map) => {
            let mut fields = Map::new();
            for (name, field) in map.borrow().iter() {
                // function values are skipped during marshalling
                if field.is_callable() {
                    continue;
                }
                fields.insert(name.clone(), marshal(field, span)?);
            }
            serde_json::Value::Object(fields)
        }
        Value::Option(Some(inner)) => marshal(inner, span)?,
        Value::Option(None) => serde_json::Value::Null,
        other => {
            return Err(Interrupt::throw(
                ErrorCode::JsonError,
                format!("a value of type '{}' has no JSON representation", other.kind()),
                span.clone(),
            ))
        }
    };
    Ok(json)
}

pub fn unmarshal(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::none(),
        serde_json::Value::Bool(v) => Value::Bool(*v),
        serde_json::Value::Number(number) => {
            if let Some(v) = number.as_i64() {
                Value::Int(v)
            } else {
                Value::Float(number.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(v) => Value::String(v.clone()),
        serde_json::Value::Array(elements) => {
            Value::new_list(elements.iter().map(unmarshal).collect())
        }
        serde_json::Value::Object(fields) => Value::new_object(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), unmarshal(value)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let value = Value::new_object(vec![
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::new_list(vec![Value::Float(1.5)])),
            ("c".to_string(), Value::none()),
        ]);
        let json = to_json(&value, &Span::default()).unwrap();
        let back = parse_json(&json, &Span::default()).unwrap();

        // JSON null comes back as `none`, numbers keep their kinds
        if let Value::Object(map) = &back {
            let map = map.borrow();
            assert_eq!(map.get("a"), Some(&Value::Int(1)));
            assert_eq!(map.get("c"), Some(&Value::none()));
        } else {
            panic!("expected an object");
        }
    }

    #[test]
    fn test_integral_numbers_become_int() {
        assert_eq!(parse_json("3", &Span::default()).unwrap(), Value::Int(3));
        assert_eq!(
            parse_json("3.5", &Span::default()).unwrap(),
            Value::Float(3.5)
        );
    }

    #[test]
    fn test_functions_are_skipped() {
        use crate::value::{BuiltinFunction, NativeFunction};
        let value = Value::new_object(vec![
            ("a".to_string(), Value::Int(1)),
            (
                "f".to_string(),
                Value::Builtin(BuiltinFunction::Native(NativeFunction::Println)),
            ),
        ]);
        let json = to_json(&value, &Span::default()).unwrap();
        assert_eq!(json, "{\"a\":1}");
    }

    #[test]
    fn test_parse_error_is_catchable() {
        let err = parse_json("{oops", &Span::default()).unwrap_err();
        assert!(matches!(err, Interrupt::Throw(e) if e.kind == ErrorCode::JsonError));
    }
}
