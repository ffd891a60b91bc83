//! # Value Model
//!
//! The tagged runtime value union shared by the tree interpreter and the
//! VM. Scalars are plain values; lists and objects are reference
//! semantic: two bindings to the same aggregate observe each other's
//! mutations, which `Rc<RefCell<…>>` cells model directly. Taking a field
//! never copies.
//!
//! The submodules carry the value operations: per-kind member tables
//! ([`fields`]), iteration ([`iter`]), deep structural casts ([`cast`])
//! and the JSON bridge ([`json`]).

pub mod cast;
pub mod fields;
pub mod iter;
pub mod json;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::analyzer::types::Type;
use crate::analyzer::TypeInformation;
use crate::parser::ast::FnLiteral;

pub use iter::ValueIterator;

/// One scope frame of captured bindings; closures keep their defining
/// chain alive.
pub type Env = Rc<RefCell<HashMap<String, Value>>>;

/// Shared storage of object values. Insertion order is preserved for
/// display; equality ignores it.
pub type ObjectMap = Rc<RefCell<IndexMap<String, Value>>>;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Range {
        start: i64,
        end: i64,
        inclusive: bool,
    },
    List(Rc<RefCell<Vec<Value>>>),
    /// An object with statically known fields.
    Object(ObjectMap),
    /// The dynamic string→any map; `obj as { ? }` produces a view onto
    /// the same storage.
    AnyObject(ObjectMap),
    Option(Option<Box<Value>>),
    /// A module-level function, referenced by module and name.
    Function {
        module: String,
        name: String,
    },
    Closure(Rc<Closure>),
    Builtin(BuiltinFunction),
    Iterator(Rc<RefCell<ValueIterator>>),
}

#[derive(Debug)]
pub enum Closure {
    /// Tree backend: the function literal plus its captured scope chain.
    Tree {
        literal: Rc<FnLiteral<TypeInformation>>,
        env: Vec<Env>,
        module: String,
    },
    /// VM backend: a function table entry plus captured cells.
    Vm {
        function: String,
        upvalues: Vec<(String, Rc<RefCell<Value>>)>,
    },
}

#[derive(Debug, Clone)]
pub enum BuiltinFunction {
    /// One of the always-present prelude functions.
    Native(NativeFunction),
    /// A builtin method bound to its receiver, e.g. `xs.push`.
    Method { receiver: Box<Value>, name: String },
    /// A function value provided by the host executor.
    Host(HostFunction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFunction {
    Print,
    Println,
    Debug,
    Exit,
    Assert,
    Throw,
    Sleep,
    GetUser,
}

impl NativeFunction {
    pub fn name(&self) -> &'static str {
        match self {
            NativeFunction::Print => "print",
            NativeFunction::Println => "println",
            NativeFunction::Debug => "debug",
            NativeFunction::Exit => "exit",
            NativeFunction::Assert => "assert",
            NativeFunction::Throw => "throw",
            NativeFunction::Sleep => "sleep",
            NativeFunction::GetUser => "get_user",
        }
    }
}

/// A host-provided function value, delivered through
/// `get_builtin_import`.
#[derive(Clone)]
pub struct HostFunction {
    pub name: String,
    pub f: Rc<dyn Fn(Vec<Value>, &crate::lexer::Span) -> crate::interrupt::ExecResult<Value>>,
}

impl std::fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostFunction({})", self.name)
    }
}

impl Value {
    pub fn some(value: Value) -> Value {
        Value::Option(Some(Box::new(value)))
    }

    pub fn none() -> Value {
        Value::Option(None)
    }

    pub fn new_list(elements: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(elements)))
    }

    pub fn new_object(fields: Vec<(String, Value)>) -> Value {
        Value::Object(Rc::new(RefCell::new(fields.into_iter().collect())))
    }

    pub fn new_any_object(fields: Vec<(String, Value)>) -> Value {
        Value::AnyObject(Rc::new(RefCell::new(fields.into_iter().collect())))
    }

    /// The kind name used in runtime error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::String(_) => "str",
            Value::Range { .. } => "range",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::AnyObject(_) => "any-object",
            Value::Option(_) => "option",
            Value::Function { .. } => "fn",
            Value::Closure(_) => "closure",
            Value::Builtin(_) => "builtin-fn",
            Value::Iterator(_) => "iterator",
        }
    }

    /// Whether this value is callable.
    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function { .. } | Value::Closure(_) | Value::Builtin(_)
        )
    }

    /// The user-facing display form. Strings render raw; inside
    /// containers they render quoted (see [`Value::repr`]).
    pub fn display(&self) -> String {
        match self {
            Value::String(value) => value.clone(),
            other => other.repr(),
        }
    }

    /// The source-faithful form: floats keep a trailing `f` when
    /// integral-valued, strings are quoted and escaped.
    pub fn repr(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Int(value) => format!("{value}"),
            Value::Float(value) => {
                if value.fract() == 0.0 && value.is_finite() {
                    format!("{value}f")
                } else {
                    format!("{value}")
                }
            }
            Value::Bool(value) => format!("{value}"),
            Value::String(value) => {
                let escaped = value
                    .replace('\\', "\\\\")
                    .replace('"', "\\\"")
                    .replace('\n', "\\n")
                    .replace('\t', "\\t")
                    .replace('\r', "\\r");
                format!("\"{escaped}\"")
            }
            Value::Range {
                start,
                end,
                inclusive,
            } => {
                if *inclusive {
                    format!("{start}..={end}")
                } else {
                    format!("{start}..{end}")
                }
            }
            Value::List(list) => {
                let elements = list
                    .borrow()
                    .iter()
                    .map(Value::repr)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("[{elements}]")
            }
            Value::Object(map) | Value::AnyObject(map) => {
                let fields = map
                    .borrow()
                    .iter()
                    .map(|(name, value)| format!("{name}: {}", value.repr()))
                    .collect::<Vec<_>>()
                    .join(", ");
                if fields.is_empty() {
                    "{}".to_string()
                } else {
                    format!("{{ {fields} }}")
                }
            }
            Value::Option(Some(inner)) => format!("some({})", inner.repr()),
            Value::Option(None) => "none".to_string(),
            Value::Function { module, name } => format!("<fn {module}::{name}>"),
            Value::Closure(_) => "<closure>".to_string(),
            Value::Builtin(BuiltinFunction::Native(native)) => {
                format!("<builtin fn {}>", native.name())
            }
            Value::Builtin(BuiltinFunction::Method { name, .. }) => {
                format!("<builtin method {name}>")
            }
            Value::Builtin(BuiltinFunction::Host(host)) => {
                format!("<host fn {}>", host.name)
            }
            Value::Iterator(_) => "<iterator>".to_string(),
        }
    }

    /// Structural equality. Containers compare elementwise, options by
    /// inner comparison, scalars numerically, strings by byte identity.
    /// Different kinds are never equal (and never an error).
    pub fn is_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(l), Value::Int(r)) => l == r,
            (Value::Float(l), Value::Float(r)) => l == r,
            (Value::Bool(l), Value::Bool(r)) => l == r,
            (Value::String(l), Value::String(r)) => l == r,
            (
                Value::Range {
                    start: ls,
                    end: le,
                    inclusive: li,
                },
                Value::Range {
                    start: rs,
                    end: re,
                    inclusive: ri,
                },
            ) => ls == rs && le == re && li == ri,
            (Value::List(l), Value::List(r)) => {
                if Rc::ptr_eq(l, r) {
                    return true;
                }
                let l = l.borrow();
                let r = r.borrow();
                l.len() == r.len() && l.iter().zip(r.iter()).all(|(l, r)| l.is_equal(r))
            }
            (
                Value::Object(l) | Value::AnyObject(l),
                Value::Object(r) | Value::AnyObject(r),
            ) => {
                if Rc::ptr_eq(l, r) {
                    return true;
                }
                let l = l.borrow();
                let r = r.borrow();
                // field order is irrelevant to equality
                l.len() == r.len()
                    && l.iter()
                        .all(|(name, lv)| r.get(name).map(|rv| lv.is_equal(rv)).unwrap_or(false))
            }
            (Value::Option(l), Value::Option(r)) => match (l, r) {
                (Some(l), Some(r)) => l.is_equal(r),
                (None, None) => true,
                _ => false,
            },
            (
                Value::Function {
                    module: lm,
                    name: ln,
                },
                Value::Function {
                    module: rm,
                    name: rn,
                },
            ) => lm == rm && ln == rn,
            (Value::Closure(l), Value::Closure(r)) => Rc::ptr_eq(l, r),
            (Value::Builtin(l), Value::Builtin(r)) => match (l, r) {
                (BuiltinFunction::Native(l), BuiltinFunction::Native(r)) => l == r,
                (BuiltinFunction::Host(l), BuiltinFunction::Host(r)) => Rc::ptr_eq(&l.f, &r.f),
                _ => false,
            },
            (Value::Iterator(l), Value::Iterator(r)) => Rc::ptr_eq(l, r),
            _ => false,
        }
    }

    /// Synthesized zero value for a type; used when the host does not
    /// provide a singleton value.
    pub fn zero_value(type_id: &Type) -> Value {
        match type_id {
            Type::Null | Type::Unknown | Type::Never | Type::Any => Value::Null,
            Type::Int => Value::Int(0),
            Type::Float => Value::Float(0.0),
            Type::Bool => Value::Bool(false),
            Type::String => Value::String(String::new()),
            Type::Range => Value::Range {
                start: 0,
                end: 0,
                inclusive: false,
            },
            Type::List(_) => Value::new_list(vec![]),
            Type::Object(fields) => Value::new_object(
                fields
                    .iter()
                    .map(|field| (field.name.clone(), Value::zero_value(&field.type_id)))
                    .collect(),
            ),
            Type::AnyObject => Value::new_any_object(vec![]),
            Type::Option(_) => Value::none(),
            Type::Function(_) | Type::Singleton(_) => Value::Null,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_semantics() {
        let list = Value::new_list(vec![Value::Int(1)]);
        let alias = list.clone();
        if let Value::List(cell) = &alias {
            cell.borrow_mut().push(Value::Int(2));
        }
        assert_eq!(list.repr(), "[1, 2]");
    }

    #[test]
    fn test_float_display_keeps_f_suffix() {
        assert_eq!(Value::Float(2.0).repr(), "2f");
        assert_eq!(Value::Float(2.5).repr(), "2.5");
    }

    #[test]
    fn test_string_display_vs_repr() {
        let value = Value::String("a\"b".to_string());
        assert_eq!(value.display(), "a\"b");
        assert_eq!(value.repr(), "\"a\\\"b\"");
    }

    #[test]
    fn test_object_equality_ignores_field_order() {
        let left = Value::new_object(vec![
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Int(2)),
        ]);
        let right = Value::new_object(vec![
            ("b".to_string(), Value::Int(2)),
            ("a".to_string(), Value::Int(1)),
        ]);
        assert!(left.is_equal(&right));
    }

    #[test]
    fn test_different_kinds_are_not_equal() {
        assert!(!Value::Int(1).is_equal(&Value::Float(1.0)));
        assert!(!Value::Null.is_equal(&Value::none()));
    }

    #[test]
    fn test_zero_value_of_object_type() {
        use crate::analyzer::types::ObjectField;
        let zero = Value::zero_value(&Type::Object(vec![ObjectField {
            name: "power".to_string(),
            type_id: Type::Bool,
        }]));
        assert_eq!(zero.repr(), "{ power: false }");
    }
}
