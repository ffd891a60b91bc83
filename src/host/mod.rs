//! # Host Executor Boundary
//!
//! The language core never talks to devices, clocks or storage directly;
//! everything flows through the [`HostExecutor`] trait. The analyzer uses
//! the type-level half of the contract (`get_builtin_import`,
//! [`AnalyzerImport`], [`TemplateSpec`]); the runtime uses the value-level
//! half (`get_builtin_value`, `load_singleton`, `write_string`,
//! `get_user`). The two halves must agree.
//!
//! Cooperative cancellation is threaded through both backends as a
//! [`CancelContext`]: a shared flag plus an optional deadline, sampled
//! before every statement and expression evaluation. Timeouts are just a
//! parent scope armed with a deadline.

pub mod builtins;
mod executors;

pub use executors::{FsExecutor, TestExecutor};

use std::cell::{Cell, RefCell};
use std::fmt::Display;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::analyzer::types::{FunctionType, Type};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HostError {}

/// A template: required method signatures over an implicit singleton
/// receiver, plus optional capability method sets. Satisfied by an
/// `impl` block.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSpec {
    pub base_methods: Vec<(String, FunctionType)>,
    pub capabilities: Vec<(String, Vec<(String, FunctionType)>)>,
}

impl TemplateSpec {
    /// The full required method set given the capabilities an impl block
    /// opts into.
    pub fn required_methods(&self, capabilities: &[String]) -> Vec<(String, FunctionType)> {
        let mut methods = self.base_methods.clone();
        for (name, cap_methods) in &self.capabilities {
            if capabilities.contains(name) {
                methods.extend(cap_methods.iter().cloned());
            }
        }
        methods
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|(cap, _)| cap == name)
    }
}

/// The analyzer-side result of `get_builtin_import(module, symbol)`.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzerImport {
    /// A value (usually a function) with its type.
    Value(Type),
    /// A named type.
    TypeSymbol(Type),
    /// A template for singleton impl blocks.
    Template(TemplateSpec),
    ModuleNotFound,
    SymbolNotFound,
}

/// The only boundary between the language core and its embedder.
pub trait HostExecutor {
    /// Resolve module source text by name; `Ok(None)` means the host
    /// knows no such module (it may still answer builtin imports for it).
    fn resolve_module(&self, name: &str) -> Result<Option<String>, HostError>;

    /// Type-level half of the builtin import contract, for the analyzer.
    fn get_builtin_import(&self, module: &str, symbol: &str) -> AnalyzerImport;

    /// Value-level half, for the runtime. Must agree with
    /// [`HostExecutor::get_builtin_import`].
    fn get_builtin_value(&self, module: &str, symbol: &str) -> Option<Value>;

    /// Provide the initial value of singleton `$ident`. `Ok(None)` makes
    /// the runtime synthesize the type's zero value.
    fn load_singleton(&self, ident: &str, type_id: &Type) -> Result<Option<Value>, HostError>;

    /// The stdout sink; `println` output is serialized through it.
    fn write_string(&self, output: &str);

    fn get_user(&self) -> String;
}

#[derive(Debug)]
struct CancelInner {
    cancelled: Cell<bool>,
    reason: RefCell<String>,
    deadline: Cell<Option<Instant>>,
    parent: Option<CancelContext>,
}

/// Cooperative cancellation scope. Children share their parent's fate:
/// cancelling a scope cancels everything spawned under it.
#[derive(Debug, Clone)]
pub struct CancelContext {
    inner: Rc<CancelInner>,
}

impl Default for CancelContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelContext {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(CancelInner {
                cancelled: Cell::new(false),
                reason: RefCell::new(String::new()),
                deadline: Cell::new(None),
                parent: None,
            }),
        }
    }

    /// A child scope; used by `spawn` so child tasks are bounded by the
    /// parent's cancellation.
    pub fn child(&self) -> Self {
        Self {
            inner: Rc::new(CancelInner {
                cancelled: Cell::new(false),
                reason: RefCell::new(String::new()),
                deadline: Cell::new(None),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        if !self.inner.cancelled.get() {
            self.inner.cancelled.set(true);
            *self.inner.reason.borrow_mut() = reason.into();
        }
    }

    /// Arm a deadline; the context reports itself cancelled once it
    /// passes.
    pub fn arm_deadline(&self, timeout: Duration) {
        self.inner.deadline.set(Some(Instant::now() + timeout));
    }

    /// `Some(reason)` once this scope or any ancestor is cancelled.
    pub fn check(&self) -> Option<String> {
        if self.inner.cancelled.get() {
            return Some(self.inner.reason.borrow().clone());
        }
        if let Some(deadline) = self.inner.deadline.get() {
            if Instant::now() >= deadline {
                self.cancel("timeout expired");
                return Some(self.inner.reason.borrow().clone());
            }
        }
        self.inner.parent.as_ref().and_then(CancelContext::check)
    }
}

/// The always-present builtin functions and their types. Every module
/// scope starts with these.
pub fn prelude_types() -> Vec<(&'static str, Type)> {
    vec![
        (
            "print",
            Type::Function(Box::new(FunctionType::var_args(Type::Any, Type::Null))),
        ),
        (
            "println",
            Type::Function(Box::new(FunctionType::var_args(Type::Any, Type::Null))),
        ),
        (
            "debug",
            Type::Function(Box::new(FunctionType::var_args(Type::Any, Type::Null))),
        ),
        (
            "exit",
            Type::function(vec![("code".to_string(), Type::Int)], Type::Never),
        ),
        (
            "assert",
            Type::function(vec![("condition".to_string(), Type::Bool)], Type::Null),
        ),
        (
            "throw",
            Type::function(vec![("message".to_string(), Type::String)], Type::Never),
        ),
        (
            "sleep",
            Type::function(vec![("seconds".to_string(), Type::Int)], Type::Null),
        ),
        ("get_user", Type::function(vec![], Type::String)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_sees_parent_cancellation() {
        let parent = CancelContext::new();
        let child = parent.child();
        assert!(child.check().is_none());

        parent.cancel("shutting down");
        assert_eq!(child.check(), Some("shutting down".to_string()));
    }

    #[test]
    fn test_deadline_cancels() {
        let ctx = CancelContext::new();
        ctx.arm_deadline(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        assert!(ctx.check().is_some());
    }

    #[test]
    fn test_required_methods_respect_capabilities() {
        let spec = TemplateSpec {
            base_methods: vec![("set".to_string(), FunctionType::new(vec![], Type::Null))],
            capabilities: vec![(
                "dim".to_string(),
                vec![(
                    "set_level".to_string(),
                    FunctionType::new(vec![("level".to_string(), Type::Int)], Type::Null),
                )],
            )],
        };

        assert_eq!(spec.required_methods(&[]).len(), 1);
        assert_eq!(spec.required_methods(&["dim".to_string()]).len(), 2);
    }
}
