//! Per-kind member tables and builtin method dispatch.
//!
//! `member` resolves `base.name` into either a dynamic object field or a
//! bound builtin method; `call_method` executes the bound methods. The
//! static signatures live in `analyzer::methods`; the two tables must
//! agree.

use std::cmp::Ordering;

use crate::diagnostic::ErrorCode;
use crate::interrupt::{ExecResult, Interrupt};
use crate::lexer::Span;

use super::{json, BuiltinFunction, Value};

/// Methods available on each value kind.
fn method_table(value: &Value) -> &'static [&'static str] {
    match value {
        Value::String(_) => &[
            "len",
            "replace",
            "repeat",
            "split",
            "contains",
            "to_lower",
            "to_upper",
            "parse_int",
            "parse_float",
            "parse_bool",
            "parse_json",
            "compare_lev",
        ],
        Value::List(_) => &[
            "len",
            "contains",
            "concat",
            "join",
            "push",
            "pop",
            "push_front",
            "pop_front",
            "insert",
            "remove",
            "last",
            "sort",
            "to_json",
            "to_json_indent",
        ],
        Value::Object(_) => &["keys", "to_json", "to_json_indent"],
        Value::AnyObject(_) => &["keys", "get", "set", "to_json", "to_json_indent"],
        Value::Range { .. } => &["start", "end", "rev", "diff"],
        Value::Option(_) => &[
            "is_some",
            "is_none",
            "unwrap",
            "unwrap_or",
            "expect",
            "to_string",
        ],
        Value::Int(_) => &["to_string", "to_range"],
        Value::Float(_) => &["to_string", "is_int", "trunc", "round"],
        Value::Bool(_) => &["to_string"],
        _ => &[],
    }
}

/// Resolve a member access. Objects expose their dynamic fields first,
/// then the fixed per-kind method table. Field names are case sensitive.
pub fn member(value: &Value, name: &str) -> Option<Value> {
    if let Value::Object(map) | Value::AnyObject(map) = value {
        if let Some(field) = map.borrow().get(name) {
            return Some(field.clone());
        }
    }

    if method_table(value).contains(&name) {
        return Some(Value::Builtin(BuiltinFunction::Method {
            receiver: Box::new(value.clone()),
            name: name.to_string(),
        }));
    }

    None
}

fn arity_error(name: &str, expected: usize, got: usize, span: &Span) -> Interrupt {
    Interrupt::throw(
        ErrorCode::ValueError,
        format!("'{name}' expects {expected} argument(s), got {got}"),
        span.clone(),
    )
}

fn index_error(index: i64, len: usize, span: &Span) -> Interrupt {
    Interrupt::throw(
        ErrorCode::IndexOutOfBounds,
        format!("index {index} is out of bounds for length {len}"),
        span.clone(),
    )
}

/// Execute a bound builtin method.
pub fn call_method(
    receiver: &Value,
    name: &str,
    mut args: Vec<Value>,
    span: &Span,
) -> ExecResult<Value> {
    let argc = args.len();
    let expect_arity = move |expected: usize| -> ExecResult<()> {
        if argc != expected {
            Err(arity_error(name, expected, argc, span))
        } else {
            Ok(())
        }
    };

    match (receiver, name) {
        // ------------------------------------------------------ strings
        (Value::String(this), "len") => {
            expect_arity(0)?;
            Ok(Value::Int(this.chars().count() as i64))
        }
        (Value::String(this), "replace") => {
            expect_arity(2)?;
            let (from, to) = (string_arg(&args[0], span)?, string_arg(&args[1], span)?);
            Ok(Value::String(this.replace(&from, &to)))
        }
        (Value::String(this), "repeat") => {
            expect_arity(1)?;
            let count = int_arg(&args[0], span)?.max(0) as usize;
            Ok(Value::String(this.repeat(count)))
        }
        (Value::String(this), "split") => {
            expect_arity(1)?;
            let separator = string_arg(&args[0], span)?;
            let parts = if separator.is_empty() {
                this.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                this.split(&separator)
                    .map(|part| Value::String(part.to_string()))
                    .collect()
            };
            Ok(Value::new_list(parts))
        }
        (Value::String(this), "contains") => {
            expect_arity(1)?;
            let needle = string_arg(&args[0], span)?;
            Ok(Value::Bool(this.contains(&needle)))
        }
        (Value::String(this), "to_lower") => {
            expect_arity(0)?;
            Ok(Value::String(this.to_lowercase()))
        }
        (Value::String(this), "to_upper") => {
            expect_arity(0)?;
            Ok(Value::String(this.to_uppercase()))
        }
        (Value::String(this), "parse_int") => {
            expect_arity(0)?;
            Ok(match this.trim().parse::<i64>() {
                Ok(value) => Value::some(Value::Int(value)),
                Err(_) => Value::none(),
            })
        }
        (Value::String(this), "parse_float") => {
            expect_arity(0)?;
            Ok(match this.trim().parse::<f64>() {
                Ok(value) => Value::some(Value::Float(value)),
                Err(_) => Value::none(),
            })
        }
        (Value::String(this), "parse_bool") => {
            expect_arity(0)?;
            Ok(match this.trim() {
                "true" | "on" => Value::some(Value::Bool(true)),
                "false" | "off" => Value::some(Value::Bool(false)),
                _ => Value::none(),
            })
        }
        (Value::String(this), "parse_json") => {
            expect_arity(0)?;
            json::parse_json(this, span)
        }
        (Value::String(this), "compare_lev") => {
            expect_arity(1)?;
            let other = string_arg(&args[0], span)?;
            Ok(Value::Int(levenshtein(this, &other) as i64))
        }

        // -------------------------------------------------------- lists
        (Value::List(this), "len") => {
            expect_arity(0)?;
            Ok(Value::Int(this.borrow().len() as i64))
        }
        (Value::List(this), "contains") => {
            expect_arity(1)?;
            let needle = &args[0];
            Ok(Value::Bool(
                this.borrow().iter().any(|element| element.is_equal(needle)),
            ))
        }
        (Value::List(this), "concat") => {
            expect_arity(1)?;
            let Value::List(other) = &args[0] else {
                return Err(type_error(name, "list", &args[0], span));
            };
            let mut combined = this.borrow().clone();
            combined.extend(other.borrow().iter().cloned());
            Ok(Value::new_list(combined))
        }
        (Value::List(this), "join") => {
            expect_arity(1)?;
            let separator = string_arg(&args[0], span)?;
            let joined = this
                .borrow()
                .iter()
                .map(Value::display)
                .collect::<Vec<_>>()
                .join(&separator);
            Ok(Value::String(joined))
        }
        (Value::List(this), "push") => {
            expect_arity(1)?;
            this.borrow_mut().push(args.remove(0));
            Ok(Value::Null)
        }
        (Value::List(this), "pop") => {
            expect_arity(0)?;
            Ok(match this.borrow_mut().pop() {
                Some(value) => Value::some(value),
                None => Value::none(),
            })
        }
        (Value::List(this), "push_front") => {
            expect_arity(1)?;
            this.borrow_mut().insert(0, args.remove(0));
            Ok(Value::Null)
        }
        (Value::List(this), "pop_front") => {
            expect_arity(0)?;
            let mut list = this.borrow_mut();
            if list.is_empty() {
                Ok(Value::none())
            } else {
                Ok(Value::some(list.remove(0)))
            }
        }
        (Value::List(this), "insert") => {
            expect_arity(2)?;
            let index = int_arg(&args[0], span)?;
            let mut list = this.borrow_mut();
            if index < 0 || index as usize > list.len() {
                return Err(index_error(index, list.len(), span));
            }
            list.insert(index as usize, args.remove(1));
            Ok(Value::Null)
        }
        (Value::List(this), "remove") => {
            expect_arity(1)?;
            let index = int_arg(&args[0], span)?;
            let mut list = this.borrow_mut();
            if index < 0 || index as usize >= list.len() {
                return Err(index_error(index, list.len(), span));
            }
            list.remove(index as usize);
            Ok(Value::Null)
        }
        (Value::List(this), "last") => {
            expect_arity(0)?;
            Ok(match this.borrow().last() {
                Some(value) => Value::some(value.clone()),
                None => Value::none(),
            })
        }
        (Value::List(this), "sort") => {
            expect_arity(0)?;
            insertion_sort(&mut this.borrow_mut(), span)?;
            Ok(Value::Null)
        }
        (Value::List(_), "to_json") => {
            expect_arity(0)?;
            Ok(Value::String(json::to_json(receiver, span)?))
        }
        (Value::List(_), "to_json_indent") => {
            expect_arity(0)?;
            Ok(Value::String(json::to_json_indent(receiver, span)?))
        }

        // ------------------------------------------------------ objects
        (Value::Object(this) | Value::AnyObject(this), "keys") => {
            expect_arity(0)?;
            Ok(Value::new_list(
                this.borrow()
                    .keys()
                    .map(|key| Value::String(key.clone()))
                    .collect(),
            ))
        }
        (Value::AnyObject(this), "get") => {
            expect_arity(1)?;
            let key = string_arg(&args[0], span)?;
            Ok(match this.borrow().get(&key) {
                Some(value) => Value::some(value.clone()),
                None => Value::none(),
            })
        }
        (Value::AnyObject(this), "set") => {
            expect_arity(2)?;
            let key = string_arg(&args[0], span)?;
            this.borrow_mut().insert(key, args.remove(1));
            Ok(Value::Null)
        }
        (Value::Object(_) | Value::AnyObject(_), "to_json") => {
            expect_arity(0)?;
            Ok(Value::String(json::to_json(receiver, span)?))
        }
        (Value::Object(_) | Value::AnyObject(_), "to_json_indent") => {
            expect_arity(0)?;
            Ok(Value::String(json::to_json_indent(receiver, span)?))
        }

        // ------------------------------------------------------- ranges
        (Value::Range { start, .. }, "start") => {
            expect_arity(0)?;
            Ok(Value::Int(*start))
        }
        (Value::Range { end, .. }, "end") => {
            expect_arity(0)?;
            Ok(Value::Int(*end))
        }
        (
            Value::Range {
                start,
                end,
                inclusive,
            },
            "rev",
        ) => {
            expect_arity(0)?;
            Ok(reverse_range(*start, *end, *inclusive))
        }
        (Value::Range { start, end, .. }, "diff") => {
            expect_arity(0)?;
            Ok(Value::Int((end - start).abs()))
        }

        // ------------------------------------------------------ options
        (Value::Option(this), "is_some") => {
            expect_arity(0)?;
            Ok(Value::Bool(this.is_some()))
        }
        (Value::Option(this), "is_none") => {
            expect_arity(0)?;
            Ok(Value::Bool(this.is_none()))
        }
        (Value::Option(this), "unwrap") => {
            expect_arity(0)?;
            match this {
                Some(inner) => Ok((**inner).clone()),
                None => Err(Interrupt::throw(
                    ErrorCode::ValueError,
                    "unwrapped a 'none' value",
                    span.clone(),
                )),
            }
        }
        (Value::Option(this), "unwrap_or") => {
            expect_arity(1)?;
            Ok(match this {
                Some(inner) => (**inner).clone(),
                None => args.remove(0),
            })
        }
        (Value::Option(this), "expect") => {
            expect_arity(1)?;
            let message = string_arg(&args[0], span)?;
            match this {
                Some(inner) => Ok((**inner).clone()),
                None => Err(Interrupt::throw(
                    ErrorCode::ValueError,
                    message,
                    span.clone(),
                )),
            }
        }
        (Value::Option(_), "to_string") => {
            expect_arity(0)?;
            Ok(Value::String(receiver.repr()))
        }

        // ------------------------------------------------------ scalars
        (Value::Int(this), "to_string") => {
            expect_arity(0)?;
            Ok(Value::String(format!("{this}")))
        }
        (Value::Int(this), "to_range") => {
            expect_arity(0)?;
            Ok(Value::Range {
                start: 0,
                end: *this,
                inclusive: false,
            })
        }
        (Value::Float(this), "to_string") => {
            expect_arity(0)?;
            Ok(Value::String(Value::Float(*this).repr()))
        }
        (Value::Float(this), "is_int") => {
            expect_arity(0)?;
            Ok(Value::Bool(this.fract() == 0.0))
        }
        (Value::Float(this), "trunc") => {
            expect_arity(0)?;
            Ok(Value::Int(this.trunc() as i64))
        }
        (Value::Float(this), "round") => {
            expect_arity(0)?;
            Ok(Value::Int(this.round() as i64))
        }
        (Value::Bool(this), "to_string") => {
            expect_arity(0)?;
            Ok(Value::String(format!("{this}")))
        }

        _ => Err(Interrupt::throw(
            ErrorCode::TypeError,
            format!(
                "a value of type '{}' has no method '{name}'",
                receiver.kind()
            ),
            span.clone(),
        )),
    }
}

fn type_error(method: &str, expected: &str, got: &Value, span: &Span) -> Interrupt {
    Interrupt::throw(
        ErrorCode::TypeError,
        format!(
            "'{method}' expects a value of type '{expected}', got '{}'",
            got.kind()
        ),
        span.clone(),
    )
}

fn string_arg(value: &Value, span: &Span) -> ExecResult<String> {
    match value {
        Value::String(v) => Ok(v.clone()),
        other => Err(type_error("argument", "str", other, span)),
    }
}

fn int_arg(value: &Value, span: &Span) -> ExecResult<i64> {
    match value {
        Value::Int(v) => Ok(*v),
        other => Err(type_error("argument", "int", other, span)),
    }
}

/// Reverse a range so iterating the result yields the original elements
/// backwards.
fn reverse_range(start: i64, end: i64, inclusive: bool) -> Value {
    let (first, last) = if inclusive {
        (start, end)
    } else if start <= end {
        (start, end - 1)
    } else {
        (start, end + 1)
    };
    if (start <= end && first > last) || (start > end && first < last) {
        // empty range stays empty
        return Value::Range {
            start,
            end: start,
            inclusive: false,
        };
    }
    Value::Range {
        start: last,
        end: first,
        inclusive: true,
    }
}

/// In-place insertion sort; defined for int, float and string elements.
fn insertion_sort(list: &mut Vec<Value>, span: &Span) -> ExecResult<()> {
    for i in 1..list.len() {
        let mut j = i;
        while j > 0 {
            let order = compare_elements(&list[j - 1], &list[j], span)?;
            if order == Ordering::Greater {
                list.swap(j - 1, j);
                j -= 1;
            } else {
                break;
            }
        }
    }
    Ok(())
}

fn compare_elements(left: &Value, right: &Value, span: &Span) -> ExecResult<Ordering> {
    match (left, right) {
        (Value::Int(l), Value::Int(r)) => Ok(l.cmp(r)),
        (Value::Float(l), Value::Float(r)) => Ok(l.partial_cmp(r).unwrap_or(Ordering::Equal)),
        (Value::String(l), Value::String(r)) => Ok(l.cmp(r)),
        (l, r) => Err(Interrupt::throw(
            ErrorCode::TypeError,
            format!("cannot order values of types '{}' and '{}'", l.kind(), r.kind()),
            span.clone(),
        )),
    }
}

/// Levenshtein edit distance over Unicode scalar values.
fn levenshtein(left: &str, right: &str) -> usize {
    let left: Vec<char> = left.chars().collect();
    let right: Vec<char> = right.chars().collect();

    if left.is_empty() {
        return right.len();
    }
    if right.is_empty() {
        return left.len();
    }

    let mut previous: Vec<usize> = (0..=right.len()).collect();
    let mut current = vec![0usize; right.len() + 1];

    for (i, lc) in left.iter().enumerate() {
        current[0] = i + 1;
        for (j, rc) in right.iter().enumerate() {
            let substitution = previous[j] + usize::from(lc != rc);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[right.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(receiver: &Value, name: &str, args: Vec<Value>) -> ExecResult<Value> {
        call_method(receiver, name, args, &Span::default())
    }

    #[test]
    fn test_member_prefers_object_fields() {
        let object = Value::new_object(vec![("keys".to_string(), Value::Int(1))]);
        assert_eq!(member(&object, "keys"), Some(Value::Int(1)));
    }

    #[test]
    fn test_list_push_mutates_shared_storage() {
        let list = Value::new_list(vec![Value::Int(1)]);
        let alias = list.clone();
        call(&alias, "push", vec![Value::Int(2)]).unwrap();
        assert_eq!(call(&list, "len", vec![]).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_sort_is_insertion_sort() {
        let list = Value::new_list(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        call(&list, "sort", vec![]).unwrap();
        assert_eq!(list.repr(), "[1, 2, 3]");

        let mixed = Value::new_list(vec![Value::Int(1), Value::Bool(true)]);
        assert!(call(&mixed, "sort", vec![]).is_err());
    }

    #[test]
    fn test_option_methods() {
        let some = Value::some(Value::Int(3));
        assert_eq!(call(&some, "unwrap", vec![]).unwrap(), Value::Int(3));
        assert_eq!(call(&some, "is_some", vec![]).unwrap(), Value::Bool(true));

        let none = Value::none();
        assert!(call(&none, "unwrap", vec![]).is_err());
        assert_eq!(
            call(&none, "unwrap_or", vec![Value::Int(7)]).unwrap(),
            Value::Int(7)
        );
    }

    #[test]
    fn test_range_rev_round_trip() {
        // 0..3 yields 0,1,2; its reverse yields 2,1,0
        let rev = call(
            &Value::Range {
                start: 0,
                end: 3,
                inclusive: false,
            },
            "rev",
            vec![],
        )
        .unwrap();
        assert_eq!(
            rev,
            Value::Range {
                start: 2,
                end: 0,
                inclusive: true,
            }
        );
    }

    #[test]
    fn test_compare_lev() {
        assert_eq!(
            call(
                &Value::String("kitten".to_string()),
                "compare_lev",
                vec![Value::String("sitting".to_string())]
            )
            .unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn test_parse_methods() {
        assert_eq!(
            call(&Value::String(" 42 ".to_string()), "parse_int", vec![]).unwrap(),
            Value::some(Value::Int(42))
        );
        assert_eq!(
            call(&Value::String("nope".to_string()), "parse_int", vec![]).unwrap(),
            Value::none()
        );
    }

    #[test]
    fn test_float_methods() {
        assert_eq!(
            call(&Value::Float(2.7), "trunc", vec![]).unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            call(&Value::Float(2.7), "round", vec![]).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            call(&Value::Float(2.0), "is_int", vec![]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_list_remove_out_of_bounds() {
        let list = Value::new_list(vec![Value::Int(1)]);
        let err = call(&list, "remove", vec![Value::Int(5)]).unwrap_err();
        assert!(matches!(err, Interrupt::Throw(e) if e.kind == ErrorCode::IndexOutOfBounds));
    }
}
